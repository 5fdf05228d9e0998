//! quotabench - paired HTTP load generator and quota-enforcing test server.
//!
//! The `qbench` binary has two halves that talk to each other over plain
//! HTTP: `drive` pushes configurable load at a set of URLs and reacts to
//! backpressure, while `serve` answers with synthetic content and enforces
//! named, time-windowed quotas over heterogeneous units (bytes, requests,
//! seconds).

pub mod cli;
pub mod client;
pub mod config;
pub mod quota;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod units;
