use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use crate::core::config::SessionConfig;
use crate::core::curve::CurveData;
use crate::engine::adapter::{AdvanceContext, EngineAdapter, EngineError};
use crate::session::controller::SharedSession;
use crate::session::{preview, SessionState, SessionStatus};

/// Everything the worker thread owns for the lifetime of one session.
pub(crate) struct Worker {
    engine: Arc<dyn EngineAdapter>,
    curve: Arc<CurveData>,
    config: Arc<SessionConfig>,
    shared: Arc<SharedSession>,
}

/// How a unit of work ended, after classification.
enum Step {
    Continue,
    Finish(SessionStatus, String),
}

impl Worker {
    pub(crate) fn new(
        engine: Arc<dyn EngineAdapter>,
        curve: Arc<CurveData>,
        config: Arc<SessionConfig>,
        shared: Arc<SharedSession>,
    ) -> Self {
        Self { engine, curve, config, shared }
    }

    /// Drives the session to a terminal status. `_done` is dropped on return
    /// (or unwind), which is how joiners and the watchdog learn the thread
    /// is gone. The final publish always happens before that.
    pub(crate) fn run(self, _done: Sender<()>) {
        let mut state = self.shared.current();
        let id = self.shared.id();

        info!(
            "Session {} started on '{}' ({} points, budget {} units)",
            id,
            self.engine.name(),
            self.curve.len(),
            state.total_iterations
        );
        state.push_event(format!(
            "Session started: {} points, {} islands, budget {} units, target {:.1}",
            self.curve.len(),
            self.config.islands,
            state.total_iterations,
            self.config.target_score
        ));
        if !self.publish(&mut state) {
            return;
        }

        // 1. Bind the engine to this session
        if let Err(e) = guarded(|| self.engine.prepare(&self.curve, &self.config)) {
            self.finish(&mut state, SessionStatus::Failed, format!("Engine setup failed: {}", e));
            return;
        }

        // 2. Main Loop
        let mut consecutive_failures = 0usize;
        loop {
            if self.shared.stop_requested() {
                self.finish(&mut state, SessionStatus::Completed, "Stopped by request".to_string());
                return;
            }

            match self.step(&mut state, &mut consecutive_failures) {
                Step::Continue => {
                    if !self.publish(&mut state) {
                        debug!("Session {} superseded by watchdog; worker exiting", id);
                        return;
                    }
                }
                Step::Finish(status, reason) => {
                    self.finish(&mut state, status, reason);
                    return;
                }
            }
        }
    }

    /// One unit of work: advance the engine, fold the outcome into `state`,
    /// then decide whether the session is over.
    fn step(&self, state: &mut SessionState, consecutive_failures: &mut usize) -> Step {
        let per_cycle = self.config.interactions_per_cycle;
        let index = state.iteration;
        let cycle = index / per_cycle + 1;
        let epoch = index % per_cycle + 1;

        if epoch == 1 {
            if let Err(e) = guarded(|| self.engine.begin_cycle(cycle)) {
                return Step::Finish(SessionStatus::Failed, format!("Cycle {} setup failed: {}", cycle, e));
            }
            state.push_event(format!("Cycle {}/{} started", cycle, self.config.cycles));

            // A stop or watchdog verdict may have landed while the engine was
            // busy; past this point the engine may already belong to a newer
            // session.
            if self.shared.stop_requested() {
                return Step::Finish(SessionStatus::Completed, "Stopped by request".to_string());
            }
        }

        let ctx = AdvanceContext {
            iteration: index,
            cycle,
            epoch,
            best_score: state.has_best().then_some(state.best_score),
        };

        let mut escalate = None;
        match guarded(|| self.engine.advance(&ctx)) {
            Ok(candidate) => {
                *consecutive_failures = 0;
                state.api_calls += candidate.api_calls;
                let improved = state.record_best(&candidate);
                debug!(
                    "Unit {} scored {:.4} (best {:.4}){}",
                    index + 1,
                    candidate.score,
                    state.best_score,
                    if improved { " new best" } else { "" }
                );
                state.push_event(format!(
                    "Epoch {}/{} of cycle {} | score {:.4} | best {:.4}{} | {}",
                    epoch,
                    per_cycle,
                    cycle,
                    candidate.score,
                    state.best_score,
                    if improved { " >>>" } else { "" },
                    preview(&candidate.expression)
                ));
            }
            Err(EngineError::Evaluation(e)) => {
                *consecutive_failures += 1;
                state.evaluation_failures += 1;
                warn!("Unit {} produced an unusable candidate: {}", index + 1, e);
                state.push_event(format!("Epoch {}/{} of cycle {} | candidate failed: {}", epoch, per_cycle, cycle, e));
                if *consecutive_failures > self.config.max_consecutive_failures {
                    escalate = Some(format!(
                        "{} consecutive evaluation failures, last: {}",
                        consecutive_failures, e
                    ));
                }
            }
            Err(EngineError::Exhausted) => {
                return Step::Finish(SessionStatus::Completed, "Engine has no more candidates".to_string());
            }
            Err(e) => {
                return Step::Finish(SessionStatus::Failed, format!("Engine error: {}", e));
            }
        }

        // The unit counts once its outcome is folded in.
        state.iteration = index + 1;
        state.cycle = cycle;
        state.epoch = epoch;
        state.history.push((state.iteration, state.best_score));

        if let Some(reason) = escalate {
            return Step::Finish(SessionStatus::Failed, reason);
        }
        if state.target_reached(self.config.target_score) {
            return Step::Finish(
                SessionStatus::Completed,
                format!("Target score {:.1} reached", self.config.target_score),
            );
        }
        if state.iteration >= state.total_iterations {
            return Step::Finish(SessionStatus::Completed, "Iteration budget exhausted".to_string());
        }
        if self.shared.stop_requested() {
            return Step::Finish(SessionStatus::Completed, "Stopped by request".to_string());
        }
        Step::Continue
    }

    fn publish(&self, state: &mut SessionState) -> bool {
        state.version += 1;
        self.shared.publish(state)
    }

    fn finish(&self, state: &mut SessionState, status: SessionStatus, reason: String) {
        state.status = status;
        state.finished_at = Some(chrono::Local::now());
        match status {
            SessionStatus::Failed => {
                error!("Session {} failed: {}", self.shared.id(), reason);
                state.push_event(format!("FAILED: {}", reason));
                state.error_message = Some(reason);
            }
            _ => {
                info!(
                    "Session {} completed after {} units: {} (best {:.4})",
                    self.shared.id(),
                    state.iteration,
                    reason,
                    state.best_score
                );
                state.push_event(format!("{} | final best {:.4}", reason, state.best_score));
            }
        }
        if !self.publish(state) {
            debug!("Session {} already finalized by watchdog", self.shared.id());
        }
    }
}

/// Runs an engine call, turning a panic into an `EngineError`.
fn guarded<T>(f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(EngineError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
