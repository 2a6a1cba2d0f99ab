//! Keeps exactly one round controller running, forever.
//!
//! Nothing the page does ends the loop. Surface errors are logged, followed by
//! a backoff and a fresh round. The only way out is an explicit stop request,
//! honored between controller steps.

use crate::clock::Clock;
use crate::error::SurfaceError;
use crate::round::{RoundController, RoundState, StepOutcome};
use crate::surface::GameSurface;
use chrono::{DateTime, Local};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// "Is a round already live" flag. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if someone already holds the guard.
    pub fn try_acquire(&self) -> Option<RunToken> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_held(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop.
#[derive(Debug)]
pub struct RunToken {
    running: Arc<AtomicBool>,
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Requests the supervisor loop to exit at the next step boundary.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn rearm(&self) {
        self.stopped.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// Wait after start and after each page reload before touching the page.
    pub page_load_delay: Duration,
    /// Wait after an unexpected failure before restarting the controller.
    pub backoff: Duration,
    /// Full page reload cadence; `None` disables it.
    pub refresh_interval: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            page_load_delay: Duration::from_millis(3_000),
            backoff: Duration::from_millis(5_000),
            refresh_interval: Some(Duration::from_millis(600_000)),
        }
    }
}

/// Periodic full-page refresh, armed for the lifetime of `start()`.
#[derive(Debug, Clone, Default)]
struct RefreshTimer {
    interval: Option<Duration>,
    armed_at: Option<Duration>,
}

impl RefreshTimer {
    fn arm(&mut self, now: Duration) {
        if self.interval.is_some() {
            self.armed_at = Some(now);
        }
    }

    fn disarm(&mut self) {
        self.armed_at = None;
    }

    fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    fn due(&self, now: Duration) -> bool {
        match (self.interval, self.armed_at) {
            (Some(interval), Some(armed_at)) => now.saturating_sub(armed_at) >= interval,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub words_typed: u64,
    pub typos: u64,
    pub scores_submitted: u64,
    pub rounds_restarted: u64,
    pub controller_restarts: u64,
    pub page_refreshes: u64,
    pub last_submitted_at: Option<DateTime<Local>>,
}

impl SessionStats {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::WordTyped { word, typed } => {
                self.words_typed += 1;
                if typed.trim_end() != word {
                    self.typos += 1;
                }
            }
            StepOutcome::Transitioned {
                from: RoundState::Submitting,
                ..
            } => {
                self.scores_submitted += 1;
                self.last_submitted_at = Some(Local::now());
                info!(
                    submitted = self.scores_submitted,
                    words = self.words_typed,
                    typos = self.typos,
                    "session progress"
                );
            }
            StepOutcome::Transitioned {
                from: RoundState::Restarting,
                ..
            } => self.rounds_restarted += 1,
            StepOutcome::Transitioned { .. } | StepOutcome::Waiting(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The loop ran and exited on a stop request.
    Stopped,
    /// Another run held the guard; nothing was done.
    AlreadyRunning,
}

pub struct Supervisor<S, C, R> {
    controller: RoundController<S, C, R>,
    settings: SupervisorSettings,
    guard: RunGuard,
    stop: StopHandle,
    refresh: RefreshTimer,
    stats: SessionStats,
}

impl<S: GameSurface, C: Clock, R: Rng> Supervisor<S, C, R> {
    pub fn new(controller: RoundController<S, C, R>, settings: SupervisorSettings) -> Self {
        let refresh = RefreshTimer {
            interval: settings.refresh_interval,
            armed_at: None,
        };
        Self {
            controller,
            settings,
            guard: RunGuard::new(),
            stop: StopHandle::new(),
            refresh,
            stats: SessionStats::default(),
        }
    }

    /// Share a guard with other supervisors driving the same page.
    pub fn with_guard(mut self, guard: RunGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn guard(&self) -> RunGuard {
        self.guard.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn controller(&self) -> &RoundController<S, C, R> {
        &self.controller
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh.is_armed()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run rounds until stopped. Returns immediately with `AlreadyRunning` if
    /// the guard is held elsewhere.
    pub fn start(&mut self) -> RunOutcome {
        let Some(_token) = self.guard.try_acquire() else {
            warn!("automation already running, ignoring duplicate start");
            return RunOutcome::AlreadyRunning;
        };

        info!(
            refresh_interval_ms = self.settings.refresh_interval.map(|d| d.as_millis() as u64),
            "automation starting"
        );
        self.controller.clock().sleep(self.settings.page_load_delay);
        self.refresh.arm(self.controller.clock().now());

        self.run_until_stopped();

        self.refresh.disarm();
        info!(
            words = self.stats.words_typed,
            submitted = self.stats.scores_submitted,
            "automation stopped"
        );
        self.stop.rearm();
        RunOutcome::Stopped
    }

    fn run_until_stopped(&mut self) {
        let mut needs_begin = true;
        while !self.stop.is_stopped() {
            if self.refresh.due(self.controller.clock().now()) {
                needs_begin = true;
                if let Err(err) = self.refresh_page() {
                    self.recover(err);
                    continue;
                }
            }

            let result = if needs_begin {
                self.controller.begin().map(|()| None)
            } else {
                self.controller.step().map(Some)
            };

            match result {
                Ok(outcome) => {
                    needs_begin = false;
                    if let Some(outcome) = outcome {
                        self.stats.record(&outcome);
                    }
                }
                Err(err) => {
                    self.recover(err);
                    needs_begin = true;
                }
            }
        }
    }

    fn refresh_page(&mut self) -> Result<(), SurfaceError> {
        info!("refreshing page");
        self.controller.surface_mut().reload()?;
        self.stats.page_refreshes += 1;
        self.controller.clock().sleep(self.settings.page_load_delay);
        self.refresh.arm(self.controller.clock().now());
        self.controller.reset();
        Ok(())
    }

    fn recover(&mut self, err: SurfaceError) {
        self.stats.controller_restarts += 1;
        error!(
            %err,
            round = self.controller.round().number,
            state = %self.controller.state(),
            backoff_ms = self.settings.backoff.as_millis() as u64,
            "round controller failed, restarting with a fresh round"
        );
        self.controller.clock().sleep(self.settings.backoff);
        self.controller.reset();
    }
}
