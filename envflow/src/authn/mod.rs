//! Authentication of API actors

pub mod actor;
