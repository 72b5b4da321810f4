pub mod container_writer;
