use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use nalgebra::DMatrix;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::analysis::pareto;
use crate::core::config::{FunctionName, SessionConfig};
use crate::core::curve::CurveData;
use crate::engine::adapter::{
    AdvanceContext, Candidate, EngineAdapter, EngineError, EvaluationError, ParetoPoint,
};
use crate::engine::expression::Expression;
use crate::engine::scoring;

/// One entry of a recorded search: a bare expression string, or an object
/// with an optional pre-computed score.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Recorded {
    Plain(String),
    Full {
        expression: String,
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        api_calls: u64,
    },
}

impl Recorded {
    fn expression(&self) -> &str {
        match self {
            Recorded::Plain(e) => e,
            Recorded::Full { expression, .. } => expression,
        }
    }
}

#[derive(Default)]
struct ReplayState {
    cursor: usize,
    curve: Option<CurveData>,
    functions: Vec<FunctionName>,
    constants: BTreeMap<String, f64>,
    archive: Vec<ParetoPoint>,
}

/// Replays a recorded sequence of candidate expressions as if they were
/// being proposed live, scoring each against the session's curve.
///
/// Useful for demos and for re-running a past search offline.
pub struct ReplayEngine {
    script: Vec<Recorded>,
    looping: bool,
    state: Mutex<ReplayState>,
}

impl ReplayEngine {
    pub fn new(expressions: Vec<String>) -> Self {
        Self::from_entries(expressions.into_iter().map(Recorded::Plain).collect())
    }

    fn from_entries(script: Vec<Recorded>) -> Self {
        Self {
            script,
            looping: false,
            state: Mutex::new(ReplayState {
                constants: default_constants(),
                functions: FunctionName::ALL.to_vec(),
                ..Default::default()
            }),
        }
    }

    /// Loads a JSON array of expressions or `{expression, score?, api_calls?}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let script: Vec<Recorded> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse replay file {}", path.display()))?;
        if script.is_empty() {
            anyhow::bail!("Replay file {} holds no candidates", path.display());
        }
        Ok(Self::from_entries(script))
    }

    /// Restart from the first entry instead of failing once the script runs out.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

fn default_constants() -> BTreeMap<String, f64> {
    SessionConfig::default().allowed_constants()
}

impl EngineAdapter for ReplayEngine {
    fn prepare(&self, curve: &CurveData, config: &SessionConfig) -> Result<(), EngineError> {
        let mut st = self.state.lock();
        st.cursor = 0;
        st.curve = Some(curve.clone());
        st.functions = config.functions.clone();
        st.constants = config.allowed_constants();
        st.archive.clear();
        Ok(())
    }

    fn advance(&self, ctx: &AdvanceContext) -> Result<Candidate, EngineError> {
        let mut st = self.state.lock();
        if st.cursor >= self.script.len() {
            if !self.looping || self.script.is_empty() {
                return Err(EngineError::Exhausted);
            }
            st.cursor = 0;
        }
        let entry = self.script[st.cursor].clone();
        st.cursor += 1;

        let curve = st
            .curve
            .as_ref()
            .ok_or_else(|| EngineError::Protocol("advance called before prepare".to_string()))?;

        let expr = Expression::parse(entry.expression())?;
        expr.check_functions(&st.functions)?;
        let predicted = expr.evaluate_rows(curve.x(), &st.constants)?;

        let (score, api_calls) = match &entry {
            Recorded::Full { score: Some(s), api_calls, .. } => (*s, *api_calls),
            Recorded::Full { api_calls, .. } => (scoring::score(curve, &predicted), *api_calls),
            Recorded::Plain(_) => (scoring::score(curve, &predicted), 0),
        };
        let complexity = expr.complexity();
        debug!("Replay unit {} -> {:.4} (complexity {})", ctx.iteration + 1, score, complexity);

        pareto::insert(
            &mut st.archive,
            ParetoPoint {
                complexity,
                score,
                expression: entry.expression().to_string(),
            },
        );

        Ok(Candidate {
            expression: entry.expression().to_string(),
            score,
            complexity: Some(complexity),
            parameters: Vec::new(),
            api_calls,
        })
    }

    fn current_pareto_frontier(&self) -> Result<Vec<ParetoPoint>, EngineError> {
        Ok(self.state.lock().archive.clone())
    }

    fn evaluate(&self, expression: &str, inputs: &DMatrix<f64>) -> Result<Vec<f64>, EvaluationError> {
        let constants = self.state.lock().constants.clone();
        Expression::parse(expression)?.evaluate_rows(inputs, &constants)
    }

    fn name(&self) -> &str {
        "Replay"
    }
}
