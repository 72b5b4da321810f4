pub mod audio_format;
pub mod config;
pub mod error;
pub mod negotiated;
pub mod state;
pub mod summary;
