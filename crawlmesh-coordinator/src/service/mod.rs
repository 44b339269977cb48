//! Service Module
//!
//! Business logic layer for the coordinator.
//! The route table owns scheduling state, the bundle store owns files.

pub mod bundle;
pub mod route;

// Re-export for convenience
pub use bundle as bundle_service;
pub use route as route_service;
