//! API route handlers

pub mod metrics;
pub mod query;
pub mod session;
