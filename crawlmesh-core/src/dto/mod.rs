//! Data Transfer Objects for the coordinator RPC surface
//!
//! This module contains the request and reply shapes exchanged between the
//! coordinator and its callers (crawlers and workers).

pub mod rpc;
pub mod stats;
