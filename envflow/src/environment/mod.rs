pub mod projection;
pub mod search;
pub mod store;
