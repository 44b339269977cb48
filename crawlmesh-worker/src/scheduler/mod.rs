//! Scheduler layer for the worker
//!
//! This layer polls the coordinator for work and reacts to each answer:
//! running dispatched metas, backing off on an empty queue, pulling
//! out-of-date bundles and dropping closed clients.

pub mod poller;

pub use poller::{PollStep, TaskPoller};
