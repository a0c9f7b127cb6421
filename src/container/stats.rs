use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::runtime;

/// Number of samples retained per container.
pub const STATS_BUFFER_CAPACITY: usize = 60;

/// One resource usage reading of a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    pub timestamp: DateTime<Utc>,
    /// Cumulative CPU time in nanoseconds.
    pub cpu_usage_core_nanos: Option<u64>,
    /// CPU usage averaged over the runtime's sampling window, in nanocores.
    pub cpu_usage_nano_cores: Option<u64>,
    pub memory_working_set_bytes: Option<u64>,
    pub memory_usage_bytes: Option<u64>,
    pub memory_available_bytes: Option<u64>,
}

impl StatsSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_usage_core_nanos: None,
            cpu_usage_nano_cores: None,
            memory_working_set_bytes: None,
            memory_usage_bytes: None,
            memory_available_bytes: None,
        }
    }

    /// Working set if reported, otherwise raw usage.
    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory_working_set_bytes.or(self.memory_usage_bytes)
    }
}

/// Fixed-capacity ring of the most recent samples.
#[derive(Debug, Clone)]
pub struct StatsBuffer {
    samples: VecDeque<StatsSample>,
    latest: Option<StatsSample>,
}

impl StatsBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(STATS_BUFFER_CAPACITY),
            latest: None,
        }
    }

    /// Appends `sample`, returning the evicted oldest sample when the buffer was full.
    pub fn push(&mut self, sample: StatsSample) -> Option<StatsSample> {
        let evicted = if self.samples.len() == STATS_BUFFER_CAPACITY {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        self.latest = Some(sample);
        evicted
    }

    pub fn latest(&self) -> Option<&StatsSample> {
        self.latest.as_ref()
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &StatsSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for StatsBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// An open stats stream for one container.
///
/// The gatherer sends samples until `done` fires (or its sender is dropped),
/// the receiver of `samples` goes away, or the container disappears.
#[derive(Debug)]
pub struct StatsRequest {
    pub container_id: String,
    pub samples: mpsc::Sender<StatsSample>,
    pub done: oneshot::Receiver<()>,
}

/// Produces stats samples for a container.
#[async_trait]
pub trait StatsGatherer: Send + Sync {
    /// Streams samples into `request.samples`. Returns `Ok(())` on a normal end
    /// of stream, including cancellation and a vanished container.
    async fn stats(&self, request: StatsRequest) -> runtime::Result<()>;
}
