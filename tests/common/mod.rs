#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use nalgebra::DMatrix;
use parking_lot::Mutex;

use ideafit::core::config::SessionConfig;
use ideafit::core::curve::CurveData;
use ideafit::engine::adapter::{
    AdvanceContext, Candidate, EngineAdapter, EngineError, EvaluationError, ParetoPoint,
};

/// Upper bound on how long a blocked call waits for `release`.
const BLOCK_LIMIT: Duration = Duration::from_secs(30);

/// One scripted outcome of `advance`.
#[derive(Debug, Clone)]
pub enum Step {
    Score(String, f64),
    Invalid(String),
    Fatal(String),
    Panic(String),
    /// Waits until `release` is called, then scores.
    Block(String, f64),
}

/// Plays back a fixed list of outcomes, one per `advance` call.
pub struct ScriptedEngine {
    steps: Vec<Step>,
    cursor: AtomicUsize,
    delay: Duration,
    released: AtomicBool,
    fail_prepare: bool,
    block_cycles: bool,
    panic_on_name: bool,
    api_calls_per_unit: u64,

    pub prepared: AtomicUsize,
    pub cycles_begun: Mutex<Vec<usize>>,
    pub contexts: Mutex<Vec<AdvanceContext>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            cursor: AtomicUsize::new(0),
            delay: Duration::ZERO,
            released: AtomicBool::new(false),
            fail_prepare: false,
            block_cycles: false,
            panic_on_name: false,
            api_calls_per_unit: 0,
            prepared: AtomicUsize::new(0),
            cycles_begun: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// One candidate per score. Each expression names its own score so a
    /// reader can tell whether expression and score travelled together.
    pub fn scores(scores: &[f64]) -> Self {
        Self::new(
            scores
                .iter()
                .map(|&s| Step::Score(format!("{}", s), s))
                .collect(),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// `begin_cycle` waits for `release` like a `Block` step.
    pub fn blocking_cycles(mut self) -> Self {
        self.block_cycles = true;
        self
    }

    /// `name` panics, which happens outside any engine-call guard.
    pub fn panicking_name(mut self) -> Self {
        self.panic_on_name = true;
        self
    }

    pub fn with_api_calls(mut self, per_unit: u64) -> Self {
        self.api_calls_per_unit = per_unit;
        self
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    /// Number of `advance` calls that have started.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Spins until at least `n` `advance` calls have started.
    pub fn wait_for_calls(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.calls() < n {
            assert!(Instant::now() < deadline, "engine never reached call {}", n);
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Spins until at least `n` `begin_cycle` calls have started.
    pub fn wait_for_cycles(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.cycles_begun.lock().len() < n {
            assert!(Instant::now() < deadline, "engine never reached cycle call {}", n);
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_for_release(&self) {
        let start = Instant::now();
        while !self.released.load(Ordering::Acquire) && start.elapsed() < BLOCK_LIMIT {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn candidate(&self, expression: &str, score: f64) -> Candidate {
        Candidate {
            api_calls: self.api_calls_per_unit,
            ..Candidate::new(expression, score)
        }
    }
}

impl EngineAdapter for ScriptedEngine {
    fn prepare(&self, _curve: &CurveData, _config: &SessionConfig) -> Result<(), EngineError> {
        self.prepared.fetch_add(1, Ordering::AcqRel);
        if self.fail_prepare {
            return Err(EngineError::Backend(anyhow!("mock engine refused to start")));
        }
        Ok(())
    }

    fn begin_cycle(&self, cycle: usize) -> Result<(), EngineError> {
        self.cycles_begun.lock().push(cycle);
        if self.block_cycles {
            self.wait_for_release();
        }
        Ok(())
    }

    fn advance(&self, ctx: &AdvanceContext) -> Result<Candidate, EngineError> {
        self.contexts.lock().push(*ctx);
        let i = self.cursor.fetch_add(1, Ordering::AcqRel);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        match self.steps.get(i) {
            None => Err(EngineError::Exhausted),
            Some(Step::Score(expr, score)) => Ok(self.candidate(expr, *score)),
            Some(Step::Invalid(msg)) => Err(EvaluationError::Rejected(msg.clone()).into()),
            Some(Step::Fatal(msg)) => Err(EngineError::Backend(anyhow!(msg.clone()))),
            Some(Step::Panic(msg)) => panic!("{}", msg),
            Some(Step::Block(expr, score)) => {
                self.wait_for_release();
                Ok(self.candidate(expr, *score))
            }
        }
    }

    fn current_pareto_frontier(&self) -> Result<Vec<ParetoPoint>, EngineError> {
        let seen = self.calls().min(self.steps.len());
        let points = self.steps[..seen]
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Step::Score(expr, score) => Some(ParetoPoint {
                    complexity: i + 1,
                    score: *score,
                    expression: expr.clone(),
                }),
                _ => None,
            })
            .collect();
        Ok(points)
    }

    fn evaluate(&self, _expression: &str, inputs: &DMatrix<f64>) -> Result<Vec<f64>, EvaluationError> {
        Ok(vec![0.0; inputs.nrows()])
    }

    fn name(&self) -> &str {
        if self.panic_on_name {
            panic!("mock engine lost its name");
        }
        "Scripted Engine"
    }
}

/// A small straight line, y = 2x + 1.
pub fn line_curve() -> CurveData {
    let points: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
    CurveData::from_points(&points).expect("valid curve")
}

pub fn config(cycles: usize, interactions: usize, target: f64) -> SessionConfig {
    SessionConfig {
        cycles,
        interactions_per_cycle: interactions,
        target_score: target,
        ..Default::default()
    }
}
