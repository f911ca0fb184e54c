//! SDN controller client models

pub mod models;
