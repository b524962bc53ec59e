// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Progress reporting with cooperative cancellation.

use crate::EngineError;
use std::sync::Mutex;

/// User progress callback. Receives the completed fraction in `[0, 1]`;
/// returning `false` requests abortion.
pub type ProgressCallback = Box<dyn FnMut(f64) -> bool + Send>;

struct ProgressState {
    callback: Option<ProgressCallback>,
    total: f64,
    done: f64,
    aborted: bool,
}

/// Tracks work units across one `execute` call and relays the completed
/// fraction to an optional user callback.
///
/// Cancellation is cooperative: once the callback returns `false`, every
/// further [`update`](Progress::update) fails with [`EngineError::Aborted`]
/// and the orchestrator stops submitting work.
pub struct Progress {
    state: Mutex<ProgressState>,
}

impl Progress {
    /// Creates a progress tracker; `callback` may be `None`.
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                callback,
                total: 0.0,
                done: 0.0,
                aborted: false,
            }),
        }
    }

    /// Starts a new run with the given total work amount. A previous run's
    /// abort is forgotten; abortion applies per run.
    pub fn start(&self, total: f64) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.total = total.max(1.0);
        state.done = 0.0;
        state.aborted = false;
        Self::notify(&mut state)
    }

    /// Records `units` completed work units.
    pub fn update(&self, units: f64) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.done = (state.done + units).min(state.total);
        Self::notify(&mut state)
    }

    /// Marks the run complete, reporting a fraction of exactly 1.
    pub fn finish(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.done = state.total;
        Self::notify(&mut state)
    }

    fn notify(state: &mut ProgressState) -> Result<(), EngineError> {
        if state.aborted {
            return Err(EngineError::Aborted);
        }
        let fraction = if state.total > 0.0 {
            state.done / state.total
        } else {
            1.0
        };
        if let Some(callback) = state.callback.as_mut() {
            if !callback(fraction) {
                state.aborted = true;
                return Err(EngineError::Aborted);
            }
        }
        Ok(())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(None)
    }
}
