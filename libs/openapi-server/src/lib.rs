//! envflow API models

pub mod models;
