//! Progress tracking and cancellation for background runs.
//!
//! A [`ProgressCoordinator`] owns a [`WorkerHandle`], classifies each event it
//! drains and keeps running counters. Optional [`ProgressSink`]s mirror the counters
//! somewhere visible, such as a terminal progress bar.


use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::coverage::{CoverageEvent, ProbeOutcome};
use crate::worker::{WorkerEvent, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Found,
    NotFound,
    /// Work happened without a result of its own
    Progress,
    Finished,
    Interrupted,
    Failed,
}

impl EventKind {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Interrupted | Self::Failed)
    }
}

/// Event a coordinator can classify.
pub trait ProgressEvent: Send + 'static {
    fn kind(&self) -> EventKind;

    fn failure(&self) -> Option<&str> {
        None
    }
}

impl<T: Send + 'static> ProgressEvent for WorkerEvent<T> {
    fn kind(&self) -> EventKind {
        match self {
            Self::Found { .. } => EventKind::Found,
            Self::NotFound { .. } => EventKind::NotFound,
            Self::Finished => EventKind::Finished,
            Self::Interrupted => EventKind::Interrupted,
            Self::Failed(_) => EventKind::Failed,
        }
    }

    fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}

impl ProgressEvent for CoverageEvent {
    fn kind(&self) -> EventKind {
        match self {
            Self::Probe {
                outcome: ProbeOutcome::Miss(_),
                ..
            } => EventKind::NotFound,
            Self::Probe { .. } => EventKind::Progress,
            Self::Found(_) => EventKind::Found,
            Self::Finished(_) => EventKind::Finished,
            Self::Interrupted(_) => EventKind::Interrupted,
            Self::Failed(_) => EventKind::Failed,
        }
    }

    fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Finished,
    Interrupted,
    Failed(String),
}

impl RunState {
    pub const fn is_done(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCounters {
    /// Expected number of items, when known up front
    pub total: Option<usize>,
    pub found: usize,
    pub not_found: usize,
    pub events: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProgressCounters {
    fn new(total: Option<usize>) -> Self {
        Self {
            total,
            found: 0,
            not_found: 0,
            events: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Found plus not found.
    pub fn processed(&self) -> usize {
        self.found + self.not_found
    }

    pub fn fraction(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| (self.processed() as f64 / total as f64).min(1.0))
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Receives counter updates from a coordinator.
pub trait ProgressSink: Send {
    fn update(&mut self, counters: &ProgressCounters);

    fn finish(&mut self, state: &RunState, counters: &ProgressCounters);
}

/// Logs progress every `every` processed items.
#[derive(Debug, Clone)]
pub struct LogSink {
    every: usize,
    last: usize,
}

impl LogSink {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            last: 0,
        }
    }
}

impl ProgressSink for LogSink {
    fn update(&mut self, counters: &ProgressCounters) {
        let processed = counters.processed();
        if processed / self.every > self.last / self.every {
            info!(
                processed,
                total = ?counters.total,
                found = counters.found,
                not_found = counters.not_found,
                "Search progress"
            );
        }
        self.last = processed;
    }

    fn finish(&mut self, state: &RunState, counters: &ProgressCounters) {
        info!(
            ?state,
            found = counters.found,
            not_found = counters.not_found,
            elapsed_ms = counters.elapsed().num_milliseconds(),
            "Search ended"
        );
    }
}

#[cfg(feature = "progress-bar")]
pub use bar::BarSink;

#[cfg(feature = "progress-bar")]
mod bar {
    use indicatif::{ProgressBar, ProgressStyle};

    use super::{ProgressCounters, ProgressSink, RunState};

    /// Terminal progress bar.
    #[derive(Debug)]
    pub struct BarSink {
        bar: ProgressBar,
    }

    impl BarSink {
        pub fn new(total: Option<usize>) -> Self {
            let bar = match total {
                Some(total) => {
                    let bar = ProgressBar::new(total as u64);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                            .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    bar
                }
                None => ProgressBar::new_spinner(),
            };
            Self { bar }
        }

        pub fn hidden() -> Self {
            Self {
                bar: ProgressBar::hidden(),
            }
        }
    }

    impl ProgressSink for BarSink {
        fn update(&mut self, counters: &ProgressCounters) {
            self.bar.set_position(counters.processed() as u64);
            self.bar.set_message(format!("{} found", counters.found));
        }

        fn finish(&mut self, state: &RunState, counters: &ProgressCounters) {
            self.update(counters);
            match state {
                RunState::Finished => self.bar.finish_with_message("done"),
                RunState::Interrupted => self.bar.abandon_with_message("interrupted"),
                RunState::Failed(message) => self.bar.abandon_with_message(message.clone()),
                RunState::Running => {}
            }
        }
    }
}

/// Drives a worker's event stream and tracks its progress.
pub struct ProgressCoordinator<E> {
    handle: WorkerHandle<E>,
    counters: ProgressCounters,
    state: RunState,
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl<E: ProgressEvent> ProgressCoordinator<E> {
    pub fn new(handle: WorkerHandle<E>, total: Option<usize>) -> Self {
        Self {
            handle,
            counters: ProgressCounters::new(total),
            state: RunState::Running,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Ask the worker to stop before its next request.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.handle.cancel();
    }

    /// Drain at most `max` events without blocking.
    pub fn poll(&mut self, max: usize) -> Vec<E> {
        let events = self.handle.poll(max);
        for event in &events {
            self.observe(event);
        }
        if events.is_empty() && !self.is_done() && self.handle.is_finished() {
            // Last chance: events sent just before the thread exited
            let late = self.handle.poll(max);
            if late.is_empty() {
                self.set_state(RunState::Failed("worker exited without a terminal event".into()));
            } else {
                for event in &late {
                    self.observe(event);
                }
                return late;
            }
        }
        events
    }

    /// Block until the run ends and return every remaining event.
    pub fn wait(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while !self.is_done() {
            match self.handle.recv() {
                Some(event) => {
                    self.observe(&event);
                    events.push(event);
                }
                None => self.set_state(RunState::Failed(
                    "worker exited without a terminal event".into(),
                )),
            }
        }
        self.handle.join();
        events
    }

    /// Cancel, then drain until the worker reports how it ended.
    pub fn stop(&mut self) -> Vec<E> {
        self.cancel();
        self.wait()
    }

    fn observe(&mut self, event: &E) {
        self.counters.events += 1;
        let kind = event.kind();
        match kind {
            EventKind::Found => self.counters.found += 1,
            EventKind::NotFound => self.counters.not_found += 1,
            EventKind::Progress => {}
            EventKind::Finished => self.set_state(RunState::Finished),
            EventKind::Interrupted => self.set_state(RunState::Interrupted),
            EventKind::Failed => self.set_state(RunState::Failed(
                event.failure().unwrap_or("worker failed").to_string(),
            )),
        }
        if !kind.is_terminal() {
            for sink in &mut self.sinks {
                sink.update(&self.counters);
            }
        }
    }

    fn set_state(&mut self, state: RunState) {
        if self.state.is_done() {
            return;
        }
        if let RunState::Failed(message) = &state {
            warn!(%message, "Run failed");
        }
        self.counters.finished_at = Some(Utc::now());
        self.state = state;
        for sink in &mut self.sinks {
            sink.finish(&self.state, &self.counters);
        }
    }
}
