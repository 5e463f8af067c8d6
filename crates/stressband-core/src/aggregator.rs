//! Rolling view of the most recent band readings.
//!
//! [`StreamAggregator`] owns one [`HistoryBuffer`] per continuous signal and
//! the latest classification. It is fed decoded [`Sample`]s and produces an
//! immutable [`UiSnapshot`] after every change; observers only ever see
//! whole snapshots, never the buffers themselves.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use stressband_types::{ContinuousSignal, Sample, StressState};

/// Number of samples kept per continuous signal.
pub const HISTORY_CAPACITY: usize = 60;

/// Fixed-capacity FIFO: pushing onto a full buffer drops the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, then drop the oldest entry if over capacity.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Copy out the entries, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> Default for HistoryBuffer<T> {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

/// Everything a presentation layer needs, as one immutable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiSnapshot {
    /// Whether a link to the band is up.
    pub connected: bool,
    /// Human-readable status line.
    pub status: String,
    /// Latest HRV reading in milliseconds.
    pub latest_hrv: Option<f32>,
    /// Latest EDA reading in microsiemens.
    pub latest_eda: Option<f32>,
    /// HRV history, oldest first.
    pub hrv_history: Vec<f32>,
    /// EDA history, oldest first.
    pub eda_history: Vec<f32>,
    /// Current stress classification.
    pub stress_state: StressState,
    /// Last raw classification code.
    pub last_code: Option<u8>,
}

/// Owner of the per-signal history and latest values.
#[derive(Debug, Clone)]
pub struct StreamAggregator {
    hrv: HistoryBuffer<f32>,
    eda: HistoryBuffer<f32>,
    stress_state: StressState,
    last_code: Option<u8>,
    connected: bool,
    status: String,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAggregator {
    /// Create an aggregator with empty buffers of [`HISTORY_CAPACITY`].
    pub fn new() -> Self {
        Self {
            hrv: HistoryBuffer::new(HISTORY_CAPACITY),
            eda: HistoryBuffer::new(HISTORY_CAPACITY),
            stress_state: StressState::Unknown,
            last_code: None,
            connected: false,
            status: "Idle".to_string(),
        }
    }

    /// Fold one sample in and return the resulting snapshot.
    pub fn apply(&mut self, sample: Sample) -> UiSnapshot {
        match sample {
            Sample::Continuous { signal, value } => self.buffer_mut(signal).push(value),
            Sample::Classification { code, state } => {
                self.stress_state = state;
                self.last_code = Some(code);
                self.status = format!("Last state: {} → {}", code, state);
            }
        }
        self.snapshot()
    }

    /// Update the link flag and status line.
    pub fn set_link(&mut self, connected: bool, status: impl Into<String>) -> UiSnapshot {
        self.connected = connected;
        self.status = status.into();
        self.snapshot()
    }

    /// Replace only the status line.
    pub fn set_status(&mut self, status: impl Into<String>) -> UiSnapshot {
        self.status = status.into();
        self.snapshot()
    }

    /// Empty both histories and forget the classification.
    pub fn reset_history(&mut self) {
        self.hrv.clear();
        self.eda.clear();
        self.stress_state = StressState::Unknown;
        self.last_code = None;
    }

    /// History for a continuous signal.
    pub fn history(&self, signal: ContinuousSignal) -> &HistoryBuffer<f32> {
        match signal {
            ContinuousSignal::Hrv => &self.hrv,
            ContinuousSignal::Eda => &self.eda,
        }
    }

    fn buffer_mut(&mut self, signal: ContinuousSignal) -> &mut HistoryBuffer<f32> {
        match signal {
            ContinuousSignal::Hrv => &mut self.hrv,
            ContinuousSignal::Eda => &mut self.eda,
        }
    }

    /// Build a snapshot of the current state.
    pub fn snapshot(&self) -> UiSnapshot {
        UiSnapshot {
            connected: self.connected,
            status: self.status.clone(),
            latest_hrv: self.hrv.latest().copied(),
            latest_eda: self.eda.latest().copied(),
            hrv_history: self.hrv.to_vec(),
            eda_history: self.eda.to_vec(),
            stress_state: self.stress_state,
            last_code: self.last_code,
        }
    }
}
