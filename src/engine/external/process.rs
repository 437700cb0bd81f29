use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use nalgebra::DMatrix;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::config::SessionConfig;
use crate::core::curve::CurveData;
use crate::engine::adapter::{
    AdvanceContext, Candidate, EngineAdapter, EngineError, EvaluationError, ParetoPoint,
};

// --- Wire Types ---

#[derive(Serialize)]
struct WireCurve<'a> {
    variable_names: Vec<String>,
    x: Vec<Vec<f64>>,
    y: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a [f64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    units: Option<&'a BTreeMap<String, String>>,
}

impl<'a> WireCurve<'a> {
    fn new(curve: &'a CurveData) -> Self {
        Self {
            variable_names: curve.variable_names(),
            x: rows(curve.x()),
            y: curve.y(),
            error: curve.error(),
            units: curve.units(),
        }
    }
}

fn rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|r| r.iter().copied().collect()).collect()
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    candidate: Option<Candidate>,
    #[serde(default)]
    frontier: Option<Vec<ParetoPoint>>,
    #[serde(default)]
    values: Option<Vec<f64>>,
}

impl Response {
    /// Classifies a refusal: `kind: "evaluation"` is a per-candidate failure,
    /// anything else is fatal to the session.
    fn into_result(self) -> Result<Self, EngineError> {
        if self.ok {
            return Ok(self);
        }
        let msg = self.error.unwrap_or_else(|| "engine reported failure".to_string());
        match self.kind.as_deref() {
            Some("evaluation") => Err(EngineError::Evaluation(EvaluationError::Rejected(msg))),
            _ => Err(EngineError::Backend(anyhow!(msg))),
        }
    }
}

// --- Child Process ---

struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Bridge {
    /// Writes one request line and reads one response line.
    fn call(&mut self, request: &serde_json::Value) -> Result<Response> {
        let mut line = serde_json::to_string(request).context("Failed to encode engine request")?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .context("Failed to write to engine stdin")?;
        self.stdin.flush().context("Failed to flush engine stdin")?;

        let mut reply = String::new();
        let n = self
            .stdout
            .read_line(&mut reply)
            .context("Failed to read engine output")?;
        if n == 0 {
            let status = self.child.try_wait().ok().flatten();
            bail!("Engine closed its output (exit status: {:?})", status);
        }
        serde_json::from_str(reply.trim()).with_context(|| format!("Malformed engine reply: {}", reply.trim()))
    }
}

/// Drives an external search engine process over a JSON-lines pipe.
///
/// The process receives one request object per line on stdin and answers
/// each with one response object on stdout. It owns its own retries and
/// timeouts (LLM calls, optimizer runs); this side only forwards.
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
    stderr_log: Option<PathBuf>,
    bridge: Mutex<Option<Bridge>>,
}

impl ProcessEngine {
    /// # Arguments
    /// * `program` - Engine executable (e.g., "python3").
    /// * `args` - Arguments, e.g. the path of the driver script.
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            stderr_log: None,
            bridge: Mutex::new(None),
        }
    }

    /// Sends the engine's stderr to a file instead of discarding it.
    pub fn with_stderr_log(mut self, path: &Path) -> Self {
        self.stderr_log = Some(path.to_path_buf());
        self
    }

    fn spawn(&self) -> Result<Bridge> {
        let stderr = match &self.stderr_log {
            Some(path) => Stdio::from(
                File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Stdio::null(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("Failed to spawn engine '{}'", self.program))?;

        let stdin = child.stdin.take().context("Engine stdin unavailable")?;
        let stdout = child.stdout.take().context("Engine stdout unavailable")?;
        info!("Engine process '{}' started (pid {})", self.program, child.id());

        Ok(Bridge {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn call(&self, request: serde_json::Value) -> Result<Response, EngineError> {
        let mut guard = self.bridge.lock();
        let bridge = guard
            .as_mut()
            .ok_or_else(|| EngineError::Protocol("engine process not started".to_string()))?;
        let response = bridge.call(&request)?;
        response.into_result()
    }
}

impl EngineAdapter for ProcessEngine {
    fn prepare(&self, curve: &CurveData, config: &SessionConfig) -> Result<(), EngineError> {
        {
            let mut guard = self.bridge.lock();
            if let Some(old) = guard.take() {
                shutdown(old);
            }
            *guard = Some(self.spawn()?);
        }

        let request = json!({
            "op": "prepare",
            "curve": WireCurve::new(curve),
            "config": config,
        });
        self.call(request).map(|_| ())
    }

    fn begin_cycle(&self, cycle: usize) -> Result<(), EngineError> {
        self.call(json!({ "op": "begin_cycle", "cycle": cycle })).map(|_| ())
    }

    fn advance(&self, ctx: &AdvanceContext) -> Result<Candidate, EngineError> {
        let response = self.call(json!({
            "op": "advance",
            "iteration": ctx.iteration,
            "cycle": ctx.cycle,
            "epoch": ctx.epoch,
            "best_score": ctx.best_score,
        }))?;
        let candidate = response
            .candidate
            .ok_or_else(|| EngineError::Protocol("advance reply without candidate".to_string()))?;
        debug!("Engine candidate {:.4}: {}", candidate.score, candidate.expression);
        Ok(candidate)
    }

    fn current_pareto_frontier(&self) -> Result<Vec<ParetoPoint>, EngineError> {
        let response = self.call(json!({ "op": "pareto" }))?;
        Ok(response.frontier.unwrap_or_default())
    }

    fn evaluate(&self, expression: &str, inputs: &DMatrix<f64>) -> Result<Vec<f64>, EvaluationError> {
        let request = json!({
            "op": "evaluate",
            "expression": expression,
            "inputs": rows(inputs),
        });
        match self.call(request) {
            Ok(response) => response
                .values
                .ok_or_else(|| EvaluationError::Rejected("evaluate reply without values".to_string())),
            Err(EngineError::Evaluation(e)) => Err(e),
            Err(e) => Err(EvaluationError::Rejected(format!("engine unavailable: {}", e))),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.get_mut().take() {
            shutdown(bridge);
        }
    }
}

/// Best-effort polite shutdown, then kill.
fn shutdown(mut bridge: Bridge) {
    if let Err(e) = bridge.stdin.write_all(b"{\"op\":\"shutdown\"}\n") {
        debug!("Engine shutdown request not delivered: {}", e);
    }
    drop(bridge.stdin);
    if let Err(e) = bridge.child.kill() {
        debug!("Engine kill: {}", e);
    }
    match bridge.child.wait() {
        Ok(status) => info!("Engine process exited: {}", status),
        Err(e) => warn!("Failed to reap engine process: {}", e),
    }
}
