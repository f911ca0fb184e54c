//! Domain models

pub mod environment;
pub mod flow;
pub mod task;
