//! HTTP request handlers

pub mod environments;
pub mod flows;
pub mod service;
pub mod tasks;
