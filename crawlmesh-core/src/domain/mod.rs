//! Core domain types
//!
//! This module contains the structures that travel between the crawler,
//! the coordinator and the workers. The coordinator stores them in its
//! route table, workers execute them and crawlers consume the results.

pub mod bundle;
pub mod meta;
pub mod result;
