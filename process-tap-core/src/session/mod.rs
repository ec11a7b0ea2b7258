pub mod manager;
pub mod process_tap;
