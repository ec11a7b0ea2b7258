//! Backends that run without OS audio support.

pub mod simulated;
