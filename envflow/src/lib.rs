//! envflow library
//!
//! Network environment hierarchy with asynchronous SDN flow orchestration.

pub mod app;
pub mod authn;
pub mod controller;
pub mod environment;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod schema;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod utils;
pub mod workers;
