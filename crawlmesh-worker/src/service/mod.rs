//! Service layer
//!
//! Services contain business logic for the worker. They orchestrate
//! operations using the coordinator client and the task registry and
//! implement bundle synchronization, task execution and capability discovery.
//!
//! Execution and capabilities are trait-based to enable testing and
//! dependency injection.

mod capabilities;
mod execution;
mod sync;

// Re-export traits
pub use capabilities::CapabilitiesService;
pub use execution::ExecutionService;

// Re-export implementations
pub use capabilities::StandardCapabilitiesService;
pub use execution::StandardExecutionService;
pub use sync::BundleSync;
