//! Small helpers shared across the scheduler

pub mod time;
