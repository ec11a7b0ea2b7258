//! Ownership primitives for native resources and asynchronous OS completions.

pub mod completion;
pub mod resource;
