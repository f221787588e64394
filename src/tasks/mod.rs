//! Task intake
//!
//! This module turns the input files into worker batches:
//! - Reading `URL[,source]` lines
//! - Loading (and periodically reloading) the excluded-hostname list
//! - Grouping tasks by hostname and packing groups into worker batches

mod excluded;
mod grouper;
mod input;

pub use excluded::ExcludedHosts;
pub use grouper::{filter_excluded, group_by_hostname, pack_batches, HostGroup, WorkerBatch};
pub use input::{read_task_lines, TaskLine};
