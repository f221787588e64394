//! Per-hostname politeness scheduler
//!
//! One worker owns one [`HostScheduler`]: a min-heap of hostname units keyed
//! by their next scheduled offset from the worker's start. Each pop yields at
//! most one step for one hostname and re-pushes the unit further in the future,
//! so requests to a hostname are spread evenly over the expected runtime.

use crate::state::{DnsRecord, Sentinel, SentinelState};
use crate::tasks::{TaskLine, WorkerBatch};
use crate::FetchError;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Schedule bump applied while a hostname's sentinel is still running
pub const SENTINEL_WAIT_BUMP: Duration = Duration::from_millis(50);

/// Entry in a hostname's queue
#[derive(Debug, Clone)]
pub enum QueueEntry {
    Task(TaskLine),
    /// One-shot sitemap fetch, inserted by the sentinel
    Sitemap,
}

/// All scheduling state of one hostname
pub struct HostUnit {
    pub hostname: String,
    /// Explicit port carried by the hostname's task URLs, if any
    pub port: Option<u16>,
    /// Interval between two dispatches for this hostname
    pub politeness: Duration,
    queue: Mutex<VecDeque<QueueEntry>>,
    sentinel: Mutex<Sentinel>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl HostUnit {
    pub fn new(hostname: String, tasks: Vec<TaskLine>, politeness: Duration) -> Self {
        let port = tasks.iter().find_map(|task| task.url.port());
        Self {
            hostname,
            port,
            politeness,
            queue: Mutex::new(tasks.into_iter().map(QueueEntry::Task).collect()),
            sentinel: Mutex::new(Sentinel::default()),
        }
    }

    /// `host[:port]` as used in URLs built for this hostname
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn sentinel_state(&self) -> SentinelState {
        lock(&self.sentinel).state()
    }

    /// Snapshot of the sentinel's health and DNS records
    pub fn sentinel(&self) -> Sentinel {
        lock(&self.sentinel).clone()
    }

    fn begin_sentinel(&self) -> bool {
        lock(&self.sentinel).advance(SentinelState::InProgress)
    }

    fn pop_entry(&self) -> Option<QueueEntry> {
        lock(&self.queue).pop_front()
    }

    /// Removes every queued task `allowed` rejects and inserts the sitemap
    /// marker at a random position
    ///
    /// # Returns
    ///
    /// The removed tasks, in queue order
    pub fn filter_and_mark<F>(&self, mut allowed: F) -> Vec<TaskLine>
    where
        F: FnMut(&TaskLine) -> bool,
    {
        let mut queue = lock(&self.queue);
        let mut rejected = Vec::new();
        queue.retain(|entry| match entry {
            QueueEntry::Task(task) if !allowed(task) => {
                rejected.push(task.clone());
                false
            }
            _ => true,
        });

        let position = rand::thread_rng().gen_range(0..=queue.len());
        queue.insert(position, QueueEntry::Sitemap);
        rejected
    }

    /// Records the warm-up outcome and releases the hostname's tasks
    pub fn complete_sentinel(&self, health: Option<FetchError>, dns_records: Vec<DnsRecord>) {
        let mut sentinel = lock(&self.sentinel);
        sentinel.health = health;
        sentinel.dns_records = dns_records;
        if !sentinel.advance(SentinelState::Done) {
            tracing::warn!(
                "Sentinel for {} completed from state {}",
                self.hostname,
                sentinel.state()
            );
        }
    }
}

/// A hostname unit at its next offset
struct ScheduledHost {
    at: Duration,
    host: Arc<HostUnit>,
}

// Reversed so the BinaryHeap pops the smallest offset first
impl Ord for ScheduledHost {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for ScheduledHost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledHost {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for ScheduledHost {}

/// What the dispatch loop should do next
///
/// Every variant but `Exhausted` carries the offset the caller must wait for
/// before acting.
pub enum Step {
    /// Run the hostname's warm-up
    Sentinel { host: Arc<HostUnit>, at: Duration },
    /// Fetch the hostname's sitemap
    Sitemap { host: Arc<HostUnit>, at: Duration },
    /// Dispatch one task
    Task {
        task: TaskLine,
        host: Arc<HostUnit>,
        at: Duration,
    },
    /// Nothing to dispatch yet
    Wait(Duration),
    /// Every queue is empty
    Exhausted,
}

impl Step {
    pub fn at(&self) -> Option<Duration> {
        match self {
            Self::Sentinel { at, .. } | Self::Sitemap { at, .. } | Self::Task { at, .. } => {
                Some(*at)
            }
            Self::Wait(at) => Some(*at),
            Self::Exhausted => None,
        }
    }
}

/// Min-heap of hostname units owned by one worker
pub struct HostScheduler {
    heap: BinaryHeap<ScheduledHost>,
    sentinel_politeness: u32,
}

impl HostScheduler {
    /// Builds the heap for a worker batch
    ///
    /// A hostname with N tasks gets a pacing interval of
    /// `expected_runtime / (N + 1 + sentinel_politeness)` and a random first
    /// offset within one interval.
    pub fn new(batch: WorkerBatch, expected_runtime: Duration, sentinel_politeness: u32) -> Self {
        let mut rng = rand::thread_rng();
        let mut heap = BinaryHeap::with_capacity(batch.len());

        for group in batch {
            if group.is_empty() {
                continue;
            }
            let slots = group.len() as u32 + 1 + sentinel_politeness;
            let politeness = expected_runtime / slots;
            let at = if politeness.is_zero() {
                Duration::ZERO
            } else {
                politeness.mul_f64(rng.gen::<f64>())
            };
            tracing::trace!(
                "Scheduling {} tasks for {} every {:?} from {:?}",
                group.len(),
                group.hostname,
                politeness,
                at
            );
            let host = Arc::new(HostUnit::new(group.hostname, group.tasks, politeness));
            heap.push(ScheduledHost { at, host });
        }

        Self {
            heap,
            sentinel_politeness,
        }
    }

    /// Number of hostnames still on the heap
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pops the next step
    pub fn next_step(&mut self) -> Step {
        while let Some(ScheduledHost { at, host }) = self.heap.pop() {
            if host.queue_len() == 0 {
                tracing::trace!("Queue for {} is empty, dropping it", host.hostname);
                continue;
            }

            match host.sentinel_state() {
                SentinelState::NotStarted => {
                    host.begin_sentinel();
                    let next = at + host.politeness * self.sentinel_politeness;
                    self.heap.push(ScheduledHost {
                        at: next,
                        host: Arc::clone(&host),
                    });
                    return Step::Sentinel { host, at };
                }
                SentinelState::InProgress => {
                    self.heap.push(ScheduledHost {
                        at: at + SENTINEL_WAIT_BUMP,
                        host,
                    });
                    return Step::Wait(at);
                }
                SentinelState::Done => {}
            }

            let Some(entry) = host.pop_entry() else {
                continue;
            };
            if host.queue_len() > 0 {
                self.heap.push(ScheduledHost {
                    at: at + host.politeness,
                    host: Arc::clone(&host),
                });
            }
            return match entry {
                QueueEntry::Task(task) => Step::Task { task, host, at },
                QueueEntry::Sitemap => Step::Sitemap { host, at },
            };
        }
        Step::Exhausted
    }
}
