//! Task grouping and worker packing
//!
//! Tasks are grouped by hostname (deduplicating identical `(URL, source)`
//! pairs), then whole hostname groups are packed into worker batches. A
//! hostname is never split across batches, so exactly one worker makes every
//! pacing decision for it.

use crate::tasks::{ExcludedHosts, TaskLine};
use std::collections::{HashMap, HashSet};

/// All tasks for one hostname, in first-seen order
#[derive(Debug, Clone)]
pub struct HostGroup {
    pub hostname: String,
    pub tasks: Vec<TaskLine>,
}

impl HostGroup {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Tasks owned by one worker
pub type WorkerBatch = Vec<HostGroup>;

/// Drops tasks whose hostname is excluded, returning the kept tasks and the dropped count
pub fn filter_excluded(tasks: Vec<TaskLine>, excluded: &ExcludedHosts) -> (Vec<TaskLine>, usize) {
    let before = tasks.len();
    let kept: Vec<TaskLine> = tasks
        .into_iter()
        .filter(|task| !excluded.contains(&task.hostname))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Groups tasks by hostname, collapsing duplicate `(URL, source)` pairs
///
/// Hostnames are compared case-sensitively as they appear after URL parsing.
pub fn group_by_hostname(tasks: Vec<TaskLine>) -> Vec<HostGroup> {
    let mut groups: Vec<HostGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    for task in tasks {
        let key = (
            task.hostname.clone(),
            task.raw_url.clone(),
            task.source.clone(),
        );
        if !seen.insert(key) {
            continue;
        }

        let slot = *index.entry(task.hostname.clone()).or_insert_with(|| {
            groups.push(HostGroup {
                hostname: task.hostname.clone(),
                tasks: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].tasks.push(task);
    }

    groups
}

/// Packs hostname groups into batches of at most `max_tasks` tasks
///
/// A group larger than `max_tasks` gets a batch of its own rather than being split.
pub fn pack_batches(groups: Vec<HostGroup>, max_tasks: usize) -> Vec<WorkerBatch> {
    let mut batches = Vec::new();
    let mut current: WorkerBatch = Vec::new();
    let mut current_len = 0;

    for group in groups.into_iter().filter(|g| !g.is_empty()) {
        if !current.is_empty() && current_len + group.len() > max_tasks {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += group.len();
        current.push(group);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
