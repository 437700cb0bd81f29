use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{info, warn};
use nalgebra::DMatrix;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::config::SessionConfig;
use crate::core::curve::CurveData;
use crate::engine::adapter::{EngineAdapter, EngineError, EvaluationError, ParetoPoint};
use crate::session::runner::Worker;
use crate::session::{SessionError, SessionState, SessionStatus, StaleSessionError};

/// Upper bound on how long `join` sleeps between watchdog checks.
const JOIN_POLL: Duration = Duration::from_millis(50);

// --- Shared Cell ---

struct Published {
    state: Arc<SessionState>,
    at: Instant,
}

/// The only structure crossing the worker/poller boundary.
///
/// Writers swap in a fully built `SessionState` under a short write lock;
/// readers clone the `Arc` under a read lock. Nobody holds the lock while an
/// engine call is in flight. Once a terminal state is stored the cell is
/// frozen: later publishes are refused.
pub(crate) struct SharedSession {
    id: Uuid,
    cell: RwLock<Published>,
    cancel: AtomicBool,
    stale_after: Duration,
}

impl SharedSession {
    fn new(id: Uuid, initial: SessionState, stale_after: Duration) -> Self {
        Self {
            id,
            cell: RwLock::new(Published {
                state: Arc::new(initial),
                at: Instant::now(),
            }),
            cancel: AtomicBool::new(false),
            stale_after,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn current(&self) -> SessionState {
        (*self.load().0).clone()
    }

    fn load(&self) -> (Arc<SessionState>, Instant) {
        let cell = self.cell.read();
        (Arc::clone(&cell.state), cell.at)
    }

    /// Stores `next` unless the session already reached a terminal status.
    pub(crate) fn publish(&self, next: &SessionState) -> bool {
        let mut cell = self.cell.write();
        if cell.state.status.is_terminal() {
            return false;
        }
        cell.state = Arc::new(next.clone());
        cell.at = Instant::now();
        true
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Watchdog verdict: marks a still-live session Failed and tells any
    /// surviving worker to exit. Returns whatever terminal state won.
    fn fail_if_live(&self, reason: String) -> SessionState {
        self.cancel.store(true, Ordering::Release);
        let mut cell = self.cell.write();
        if cell.state.status.is_terminal() {
            return (*cell.state).clone();
        }

        warn!("Session {} marked failed by watchdog: {}", self.id, reason);
        let mut next = (*cell.state).clone();
        next.status = SessionStatus::Failed;
        next.push_event(format!("FAILED: {}", reason));
        next.error_message = Some(reason);
        next.finished_at = Some(chrono::Local::now());
        next.version += 1;

        cell.state = Arc::new(next.clone());
        cell.at = Instant::now();
        next
    }
}

// --- Handle ---

/// Caller-side reference to one session. Cheap to clone; all clones observe
/// the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SharedSession>,
    done: Receiver<()>,
    engine: Arc<dyn EngineAdapter>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Asks the worker to stop after its current unit. Idempotent.
    pub fn request_stop(&self) {
        let was_set = self.shared.cancel.swap(true, Ordering::AcqRel);
        if !was_set {
            info!("Stop requested for session {}", self.shared.id);
        }
    }

    /// A consistent copy of the latest published state. Never waits on the
    /// worker's progress.
    pub fn snapshot(&self) -> SessionState {
        let (state, at) = self.shared.load();
        if state.status.is_terminal() {
            return (*state).clone();
        }

        if self.worker_gone() {
            // The worker publishes its final state before it lets go of the
            // channel, so a second look settles a normal exit.
            let (state, _) = self.shared.load();
            if state.status.is_terminal() {
                return (*state).clone();
            }
            return self
                .shared
                .fail_if_live("session worker exited without reporting a final status".to_string());
        }

        let idle = at.elapsed();
        if idle >= self.shared.stale_after {
            let err = StaleSessionError {
                idle,
                threshold: self.shared.stale_after,
            };
            return self.shared.fail_if_live(err.to_string());
        }

        let mut copy = (*state).clone();
        if copy.status == SessionStatus::Running && self.shared.stop_requested() {
            copy.status = SessionStatus::Stopping;
        }
        copy
    }

    /// Blocks until the session is Completed or Failed, or `timeout` elapses.
    /// Returns the final state, or `None` on timeout. A timeout too large to
    /// represent (e.g. `Duration::MAX`) waits without a deadline.
    pub fn join(&self, timeout: Duration) -> Option<SessionState> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let state = self.snapshot();
            if state.status.is_terminal() {
                return Some(state);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    (deadline - now).min(JOIN_POLL)
                }
                None => JOIN_POLL,
            };
            match self.done.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Worker gone; the next snapshot resolves the outcome.
                }
            }
        }
    }

    /// Forwards to the engine's on-demand frontier.
    pub fn pareto_frontier(&self) -> Result<Vec<ParetoPoint>, EngineError> {
        self.engine.current_pareto_frontier()
    }

    pub fn evaluate(&self, expression: &str, inputs: &DMatrix<f64>) -> Result<Vec<f64>, EvaluationError> {
        self.engine.evaluate(expression, inputs)
    }

    fn worker_gone(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

// --- Controller ---

/// Runs at most one fitting session at a time against a single engine.
///
/// There is no process-wide registry: each `start` returns the handle that
/// every later call goes through. Independent controllers share nothing.
pub struct FittingController {
    engine: Arc<dyn EngineAdapter>,
    active: Mutex<Option<SessionHandle>>,
}

impl FittingController {
    pub fn new(engine: Arc<dyn EngineAdapter>) -> Self {
        Self {
            engine,
            active: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<dyn EngineAdapter> {
        &self.engine
    }

    /// Validates the config and spawns the session worker.
    ///
    /// Fails synchronously, without touching any session, on an invalid
    /// config or while another session of this controller is still live.
    pub fn start(&self, curve: CurveData, config: SessionConfig) -> Result<SessionHandle, SessionError> {
        config.validate()?;

        let mut active = self.active.lock();
        if let Some(existing) = active.as_ref() {
            if !existing.snapshot().status.is_terminal() {
                return Err(SessionError::AlreadyRunning(existing.id()));
            }
        }

        let id = Uuid::new_v4();
        let initial = SessionState::started(id, config.total_iterations());
        let shared = Arc::new(SharedSession::new(id, initial, config.stale_after()));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let worker = Worker::new(
            Arc::clone(&self.engine),
            Arc::new(curve),
            Arc::new(config),
            Arc::clone(&shared),
        );

        let short_id: String = id.to_string().chars().take(8).collect();
        thread::Builder::new()
            .name(format!("fit-session-{}", short_id))
            .spawn(move || worker.run(done_tx))
            .map_err(SessionError::Spawn)?;

        let handle = SessionHandle {
            shared,
            done: done_rx,
            engine: Arc::clone(&self.engine),
        };
        *active = Some(handle.clone());
        Ok(handle)
    }

    pub fn request_stop(&self, handle: &SessionHandle) {
        handle.request_stop();
    }

    pub fn snapshot(&self, handle: &SessionHandle) -> SessionState {
        handle.snapshot()
    }

    pub fn join(&self, handle: &SessionHandle, timeout: Duration) -> Option<SessionState> {
        handle.join(timeout)
    }

    /// Snapshot of the most recent session, or an Idle state before the first
    /// `start`.
    pub fn current(&self) -> SessionState {
        self.active
            .lock()
            .as_ref()
            .map(SessionHandle::snapshot)
            .unwrap_or_default()
    }
}
