pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod serve;
pub mod state;
