//! State module for scan results and per-hostname warm-up
//!
//! # Components
//!
//! - `TaskPrint`: the result document written for every task, with its retry sub-document
//! - `DnsRecord`, `RedirectHop`, `DstChange`, `ResponseSummary`: the parts a fetch fills in
//! - `Sentinel`: one-time per-hostname health check and robots priming state

mod sentinel;
mod task_print;

// Re-export main types
pub use sentinel::{Sentinel, SentinelState};
pub use task_print::{
    Attempt, DnsRecord, DstChange, RedirectHop, ResponseSummary, RetryAttempt, TaskPrint,
};
