use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::SessionConfig;
use crate::core::curve::CurveData;

/// A proposed expression together with its evaluated fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub expression: String,
    /// Fit score in [0, 100]. Non-finite scores never count as an improvement.
    pub score: f64,
    /// Node count of the expression, if the engine reports one.
    #[serde(default)]
    pub complexity: Option<usize>,
    /// Fitted parameter values, if the expression has free constants.
    #[serde(default)]
    pub parameters: Vec<f64>,
    /// Model API calls spent producing this candidate.
    #[serde(default)]
    pub api_calls: u64,
}

impl Candidate {
    pub fn new(expression: impl Into<String>, score: f64) -> Self {
        Self {
            expression: expression.into(),
            score,
            complexity: None,
            parameters: Vec::new(),
            api_calls: 0,
        }
    }
}

/// One point on the complexity/score trade-off curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoPoint {
    pub complexity: usize,
    pub score: f64,
    pub expression: String,
}

/// Where the run loop is when it asks the engine for the next unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceContext {
    /// 0-based index of the unit about to run.
    pub iteration: usize,
    /// 1-based cycle (generation) number.
    pub cycle: usize,
    /// 1-based interaction within the cycle.
    pub epoch: usize,
    /// Running best, `None` until something scored.
    pub best_score: Option<f64>,
}

// --- Errors ---

/// A candidate that could not be parsed or evaluated. Non-fatal to a session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("function '{0}' is not enabled")]
    DisallowedFunction(String),
    #[error("variable '{name}' refers to column {column} but data has {dims}")]
    VariableOutOfRange { name: String, column: usize, dims: usize },
    #[error("input has {found} columns, expected at least {expected}")]
    InputShape { expected: usize, found: usize },
    #[error("candidate rejected: {0}")]
    Rejected(String),
}

/// A failure of the search engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Per-candidate failure; the run loop logs it and keeps going.
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("engine backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),
    #[error("engine protocol violation: {0}")]
    Protocol(String),
    #[error("engine panicked: {0}")]
    Panicked(String),
    #[error("engine has no more candidates")]
    Exhausted,
}

// --- The Engine Seam ---

/// The external search engine as seen by the session controller.
///
/// Every call may be slow (network, numeric optimization) and may fail.
/// Implementations own their retry and timeout policy; the controller never
/// retries. Calls come from the session worker thread, while
/// `current_pareto_frontier` and `evaluate` may also come from a presentation
/// thread, so implementations must be `Sync`.
pub trait EngineAdapter: Send + Sync {
    /// Binds the engine to a session's data and knobs. Called once per session,
    /// on the worker thread, before the first unit.
    fn prepare(&self, _curve: &CurveData, _config: &SessionConfig) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called at the first interaction of every cycle.
    fn begin_cycle(&self, _cycle: usize) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs one proposal-and-evaluation round and returns the scored candidate.
    fn advance(&self, ctx: &AdvanceContext) -> Result<Candidate, EngineError>;

    /// Current non-dominated candidates, recomputed on demand.
    fn current_pareto_frontier(&self) -> Result<Vec<ParetoPoint>, EngineError>;

    /// Evaluates `expression` on each row of `inputs`.
    fn evaluate(&self, expression: &str, inputs: &DMatrix<f64>) -> Result<Vec<f64>, EvaluationError>;

    /// Returns the name of the engine (e.g., "IdeaSearch bridge").
    fn name(&self) -> &str;
}
