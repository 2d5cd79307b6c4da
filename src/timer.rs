use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

#[derive(Debug, Default)]
struct TimerState {
    started_at: Option<DateTime<Utc>>,
    elapsed_secs: u64,
    /// Last elapsed value, kept after stop until reset
    consumed_secs: u64,
}

impl TimerState {
    fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(started) = self.started_at {
            let secs = (now - started).num_seconds().max(0) as u64;
            self.elapsed_secs = secs;
            self.consumed_secs = secs;
        }
    }
}

/// Elapsed-time tracker for one tracking session.
///
/// While running, a background task refreshes the elapsed value once per
/// second from the wall-clock delta against the start instant.
pub struct SessionTimer {
    state: Arc<Mutex<TimerState>>,
    ticker: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            ticker: None,
        }
    }

    /// Start timing from now. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        self.start_at(Utc::now());

        let state = Arc::clone(&self.state);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval(Duration::from_secs(1));
            loop {
                ticks.tick().await;
                match state.lock() {
                    Ok(mut state) => state.tick(Utc::now()),
                    Err(_) => break,
                }
            }
        }));
    }

    fn start_at(&mut self, now: DateTime<Utc>) {
        self.abort_ticker();
        if let Ok(mut state) = self.state.lock() {
            state.started_at = Some(now);
            state.elapsed_secs = 0;
        }
    }

    /// Stop ticking; elapsed drops to zero, consumed keeps its last value
    pub fn stop(&mut self) {
        self.abort_ticker();
        if let Ok(mut state) = self.state.lock() {
            state.tick(Utc::now());
            state.started_at = None;
            state.elapsed_secs = 0;
        }
    }

    pub fn reset(&mut self) {
        self.abort_ticker();
        if let Ok(mut state) = self.state.lock() {
            *state = TimerState::default();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.started_at.is_some())
            .unwrap_or(false)
    }

    /// Whole seconds since start as of the last tick
    pub fn elapsed_secs(&self) -> u64 {
        self.state.lock().map(|s| s.elapsed_secs).unwrap_or(0)
    }

    /// Duration of the current or most recent session
    pub fn consumed_secs(&self) -> u64 {
        self.state.lock().map(|s| s.consumed_secs).unwrap_or(0)
    }

    fn tick_at(&self, now: DateTime<Utc>) {
        if let Ok(mut state) = self.state.lock() {
            state.tick(now);
        }
    }

    fn abort_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}
