pub mod capture_delegate;
pub mod capture_session;
pub mod tap_backend;
