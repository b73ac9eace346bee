pub mod backends;
pub mod config;
pub mod errors;
pub mod execution;
pub mod job_scheduling;
pub mod models;
pub mod utils;
