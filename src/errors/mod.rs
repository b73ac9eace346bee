//! Centralized error handling for the source refresh scheduler
//!
//! # Error Categories
//!
//! - **Store Errors**: the authoritative source store is unreachable or returned bad data
//! - **Backend Errors**: job submission or status queries failed or timed out
//! - **Source Errors**: a single source record is malformed
//!
//! A guard rejection ("a job is already outstanding") is not an error; see
//! [`crate::execution::GuardRejected`].

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for store Results
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience type alias for backend Results
pub type BackendResult<T> = Result<T, BackendError>;
