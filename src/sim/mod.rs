pub mod backend;
pub mod config;
pub mod flat_mem;
pub mod top;
