use crate::core::{MileageError, Result};
use crate::scheduler::{CatchUpPolicy, TriggerWindow};
use crate::storage::DurabilityMode;
use chrono::{FixedOffset, TimeDelta};
use std::path::PathBuf;
use std::time::Duration;

/// Tracker configuration
///
/// Built with chained setters and checked with [`TrackerConfig::validate`]
/// before anything is opened.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often the scheduler wakes up
    pub wake_interval: Duration,

    /// Time-of-day window in which a boundary is acted on
    pub trigger_window: TriggerWindow,

    /// Offset of the local wall clock; `None` uses the host's
    pub utc_offset: Option<FixedOffset>,

    /// Start-up behaviour on a boundary day past the window
    pub catch_up: CatchUpPolicy,

    /// Ledgers rolled over in parallel during one sweep
    pub sweep_concurrency: usize,

    /// Directory for the WAL and snapshot; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,

    pub durability: DurabilityMode,

    /// WAL entries written before an automatic checkpoint
    pub checkpoint_threshold: usize,
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self {
            wake_interval: Duration::from_secs(60 * 60),
            trigger_window: TriggerWindow::default(),
            utc_offset: None,
            catch_up: CatchUpPolicy::WindowOnly,
            sweep_concurrency: 4,
            data_dir: None,
            durability: DurabilityMode::default(),
            checkpoint_threshold: 1000,
        }
    }

    /// Set the scheduler wake interval
    pub fn wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = interval;
        self
    }

    /// Set the trigger window
    pub fn trigger_window(mut self, window: TriggerWindow) -> Self {
        self.trigger_window = window;
        self
    }

    /// Keep the window anchored at midnight, change only its width
    pub fn window_tolerance(mut self, tolerance: TimeDelta) -> Self {
        self.trigger_window = TriggerWindow::new(self.trigger_window.start(), tolerance);
        self
    }

    pub fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn catch_up(mut self, policy: CatchUpPolicy) -> Self {
        self.catch_up = policy;
        self
    }

    pub fn sweep_concurrency(mut self, concurrency: usize) -> Self {
        self.sweep_concurrency = concurrency;
        self
    }

    /// Persist ledgers under `dir`
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.wake_interval.is_zero() {
            return Err(MileageError::Config("wake_interval must be > 0".to_string()));
        }

        if self.trigger_window.tolerance() <= TimeDelta::zero() {
            return Err(MileageError::Config(
                "trigger window tolerance must be > 0".to_string(),
            ));
        }

        if self.trigger_window.tolerance() > TimeDelta::days(1) {
            return Err(MileageError::Config(
                "trigger window tolerance cannot exceed one day".to_string(),
            ));
        }

        if self.sweep_concurrency == 0 {
            return Err(MileageError::Config("sweep_concurrency must be > 0".to_string()));
        }

        if self.data_dir.is_some() && self.checkpoint_threshold == 0 {
            return Err(MileageError::Config("checkpoint_threshold must be > 0".to_string()));
        }

        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}
