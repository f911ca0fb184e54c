//! Task tracking for asynchronous flow operations

pub mod fsm;
pub mod registry;
