pub mod monitor;
pub mod processor;
