use crate::priority::Priority;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileEvent {
    TaskScheduled { seq: u64, priority: Priority, at: f64, start_time: f64 },
    TaskStarted { seq: u64, priority: Priority, at: f64 },
    TaskYielded { seq: u64, at: f64 },
    TaskCompleted { seq: u64, at: f64 },
    TaskErrored { seq: u64, at: f64 },
    TaskCancelled { seq: u64, at: f64 },
    SliceStarted { at: f64 },
    SliceYielded { at: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityStats {
    pub scheduled: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub pending_tasks: usize,
    pub total_tasks_executed: u64,
    pub total_tasks_failed: u64,
    pub total_tasks_cancelled: u64,
    pub continuations: u64,
    pub slices: u64,
    pub yields: u64,
    /// Mean time between a task becoming eligible and its first slice.
    pub average_latency_ms: f64,
    pub per_priority: FxHashMap<Priority, PriorityStats>,
    #[serde(skip)]
    latency_samples: u64,
}

impl SchedulerMetrics {
    fn record_latency(&mut self, latency: f64) {
        self.latency_samples += 1;
        let n = self.latency_samples as f64;
        self.average_latency_ms += (latency.max(0.0) - self.average_latency_ms) / n;
    }
}

/// Bounded event log plus running counters. Counters are always kept; events
/// are only buffered when enabled.
#[derive(Debug)]
pub struct Profiler {
    enabled: bool,
    capacity: usize,
    events: VecDeque<ProfileEvent>,
    metrics: SchedulerMetrics,
}

impl Profiler {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity: capacity.max(1),
            events: VecDeque::new(),
            metrics: SchedulerMetrics::default(),
        }
    }

    fn push(&mut self, event: ProfileEvent) {
        if !self.enabled {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn task_scheduled(&mut self, seq: u64, priority: Priority, at: f64, start_time: f64) {
        self.metrics.per_priority.entry(priority).or_default().scheduled += 1;
        self.push(ProfileEvent::TaskScheduled {
            seq,
            priority,
            at,
            start_time,
        });
    }

    pub fn task_started(&mut self, seq: u64, priority: Priority, at: f64, start_time: f64) {
        self.metrics.record_latency(at - start_time);
        self.push(ProfileEvent::TaskStarted { seq, priority, at });
    }

    pub fn task_yielded(&mut self, seq: u64, at: f64) {
        self.metrics.continuations += 1;
        self.push(ProfileEvent::TaskYielded { seq, at });
    }

    pub fn task_completed(&mut self, seq: u64, priority: Priority, at: f64) {
        self.metrics.total_tasks_executed += 1;
        self.metrics.per_priority.entry(priority).or_default().completed += 1;
        self.push(ProfileEvent::TaskCompleted { seq, at });
    }

    pub fn task_errored(&mut self, seq: u64, at: f64) {
        self.metrics.total_tasks_failed += 1;
        self.push(ProfileEvent::TaskErrored { seq, at });
    }

    pub fn task_cancelled(&mut self, seq: u64, at: f64) {
        self.metrics.total_tasks_cancelled += 1;
        self.push(ProfileEvent::TaskCancelled { seq, at });
    }

    pub fn slice_started(&mut self, at: f64) {
        self.metrics.slices += 1;
        self.push(ProfileEvent::SliceStarted { at });
    }

    pub fn slice_yielded(&mut self, at: f64) {
        self.metrics.yields += 1;
        self.push(ProfileEvent::SliceYielded { at });
    }

    pub fn take_events(&mut self) -> Vec<ProfileEvent> {
        self.events.drain(..).collect()
    }

    pub fn metrics(&self, pending_tasks: usize) -> SchedulerMetrics {
        SchedulerMetrics {
            pending_tasks,
            ..self.metrics.clone()
        }
    }
}
