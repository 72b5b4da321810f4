pub mod activation;
pub mod capture_session;
pub mod control;
pub mod output_streamer;
pub mod task_driven;
pub mod thread_driven;
