use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use uuid::Uuid;

use crate::core::config::ConfigError;
use crate::engine::adapter::Candidate;

pub mod controller;
pub mod runner;

// --- Constants ---
pub const EVENT_CAPACITY: usize = 200;
const EXPRESSION_PREVIEW: usize = 60;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Stopping)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Idle => "IDLE",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Stopping => "STOPPING",
            SessionStatus::Completed => "DONE",
            SessionStatus::Failed => "FAILED",
        }
    }
}

// --- Errors ---

/// Synchronous failures of `start`. Everything that goes wrong after a worker
/// exists is reported through [`SessionState::error_message`] instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("session {0} is still running")]
    AlreadyRunning(Uuid),
    #[error("failed to spawn session worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Watchdog verdict for a worker that stopped publishing.
#[derive(Debug, Clone, Error)]
#[error("stale session: no update for {idle:.1?} (threshold {threshold:.1?})")]
pub struct StaleSessionError {
    pub idle: Duration,
    pub threshold: Duration,
}

// --- The Shared Record ---

/// Progress of one session as seen by a poller.
///
/// The worker builds each next state in full and publishes it as a unit, so
/// any copy handed out by `snapshot` is internally consistent: the best score
/// always travels with the expression that earned it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,

    pub best_expression: String,
    pub best_score: f64,
    pub best_parameters: Vec<f64>,

    pub iteration: usize,
    pub total_iterations: usize,
    pub cycle: usize,
    pub epoch: usize,

    /// (iteration, best score so far), one entry per completed unit.
    pub history: Vec<(usize, f64)>,
    /// Most recent human-readable lines, oldest evicted first.
    pub events: VecDeque<String>,
    pub error_message: Option<String>,

    pub api_calls: u64,
    pub evaluation_failures: usize,
    /// Bumped on every publish.
    pub version: u64,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            status: SessionStatus::Idle,
            best_expression: String::new(),
            best_score: f64::NEG_INFINITY,
            best_parameters: Vec::new(),
            iteration: 0,
            total_iterations: 0,
            cycle: 0,
            epoch: 0,
            history: Vec::new(),
            events: VecDeque::with_capacity(EVENT_CAPACITY),
            error_message: None,
            api_calls: 0,
            evaluation_failures: 0,
            version: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

impl SessionState {
    /// Fresh state for a session that is about to run.
    pub fn started(id: Uuid, total_iterations: usize) -> Self {
        Self {
            session_id: Some(id),
            status: SessionStatus::Running,
            total_iterations,
            started_at: Some(Local::now()),
            ..Default::default()
        }
    }

    pub fn has_best(&self) -> bool {
        self.best_score.is_finite()
    }

    /// Replaces the best on strict improvement only. Ties keep the earlier
    /// expression; NaN and infinite scores never win.
    pub fn record_best(&mut self, candidate: &Candidate) -> bool {
        if !candidate.score.is_finite() || candidate.score <= self.best_score {
            return false;
        }
        self.best_score = candidate.score;
        self.best_expression = candidate.expression.clone();
        self.best_parameters = candidate.parameters.clone();
        true
    }

    /// Running-best target check. Never true before something scored.
    pub fn target_reached(&self, target: f64) -> bool {
        self.has_best() && self.best_score >= target
    }

    /// Appends a timestamped line, evicting the oldest at capacity.
    pub fn push_event(&mut self, msg: impl AsRef<str>) {
        if self.events.len() >= EVENT_CAPACITY {
            self.events.pop_front();
        }
        let stamp = Local::now().format("%H:%M:%S");
        self.events.push_back(format!("[{}] {}", stamp, msg.as_ref()));
    }

    /// Fraction of the iteration budget used, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.total_iterations == 0 {
            return 0.0;
        }
        (self.iteration as f64 / self.total_iterations as f64).min(1.0)
    }

    pub fn elapsed(&self) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.unwrap_or_else(Local::now);
        (end - start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Shortens an expression for one-line displays.
pub fn preview(expression: &str) -> String {
    if expression.chars().count() > EXPRESSION_PREVIEW {
        let head: String = expression.chars().take(EXPRESSION_PREVIEW).collect();
        format!("{}...", head)
    } else {
        expression.to_string()
    }
}
