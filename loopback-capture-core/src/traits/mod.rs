pub mod capture_delegate;
pub mod capture_events;
pub mod capture_source;
pub mod clock;
pub mod media_transform;
pub mod render_endpoint;
