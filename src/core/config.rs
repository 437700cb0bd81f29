use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Enumerated Options ---

/// Function library names the search engine may use in candidate expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionName {
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Abs,
}

impl FunctionName {
    pub const ALL: [FunctionName; 13] = [
        FunctionName::Sin,
        FunctionName::Cos,
        FunctionName::Tan,
        FunctionName::Arcsin,
        FunctionName::Arccos,
        FunctionName::Arctan,
        FunctionName::Sinh,
        FunctionName::Cosh,
        FunctionName::Tanh,
        FunctionName::Exp,
        FunctionName::Log,
        FunctionName::Sqrt,
        FunctionName::Abs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FunctionName::Sin => "sin",
            FunctionName::Cos => "cos",
            FunctionName::Tan => "tan",
            FunctionName::Arcsin => "arcsin",
            FunctionName::Arccos => "arccos",
            FunctionName::Arctan => "arctan",
            FunctionName::Sinh => "sinh",
            FunctionName::Cosh => "cosh",
            FunctionName::Tanh => "tanh",
            FunctionName::Exp => "exp",
            FunctionName::Log => "log",
            FunctionName::Sqrt => "sqrt",
            FunctionName::Abs => "abs",
        }
    }

    pub fn apply(self, v: f64) -> f64 {
        match self {
            FunctionName::Sin => v.sin(),
            FunctionName::Cos => v.cos(),
            FunctionName::Tan => v.tan(),
            FunctionName::Arcsin => v.asin(),
            FunctionName::Arccos => v.acos(),
            FunctionName::Arctan => v.atan(),
            FunctionName::Sinh => v.sinh(),
            FunctionName::Cosh => v.cosh(),
            FunctionName::Tanh => v.tanh(),
            FunctionName::Exp => v.exp(),
            FunctionName::Log => v.ln(),
            FunctionName::Sqrt => v.sqrt(),
            FunctionName::Abs => v.abs(),
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        // numpy-style aliases appear in engine output
        let canonical = match lower.as_str() {
            "asin" => "arcsin",
            "acos" => "arccos",
            "atan" => "arctan",
            "ln" => "log",
            other => other,
        };
        FunctionName::ALL
            .into_iter()
            .find(|f| f.as_str() == canonical)
            .ok_or_else(|| ConfigError::UnknownFunction(s.to_string()))
    }
}

/// Parameter optimizer used by the engine to fit constants inside a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerMethod {
    #[serde(rename = "L-BFGS-B")]
    LBfgsB,
    #[serde(rename = "differential-evolution")]
    DifferentialEvolution,
}

impl OptimizerMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerMethod::LBfgsB => "L-BFGS-B",
            OptimizerMethod::DifferentialEvolution => "differential-evolution",
        }
    }
}

impl fmt::Display for OptimizerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "l-bfgs-b" | "lbfgsb" => Ok(OptimizerMethod::LBfgsB),
            "differential-evolution" | "de" => Ok(OptimizerMethod::DifferentialEvolution),
            _ => Err(ConfigError::UnknownOptimizer(s.to_string())),
        }
    }
}

fn default_temperature() -> f64 {
    1.0
}

/// An LLM model identifier. Credentials live in the api-keys file, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temperature: default_temperature(),
        }
    }
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a positive integer")]
    NonPositive { field: &'static str },
    #[error("target score must lie in [0, 100], got {0}")]
    TargetOutOfRange(f64),
    #[error("sampling temperature must be finite and non-negative, got {0}")]
    BadTemperature(f64),
    #[error("model '{name}' has invalid temperature {temperature}")]
    BadModelTemperature { name: String, temperature: f64 },
    #[error("hand-over threshold must lie in [-1, 1], got {0}")]
    HandOverOutOfRange(f64),
    #[error("at least one function must be enabled")]
    NoFunctions,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown optimizer method '{0}'")]
    UnknownOptimizer(String),
    #[error("whitelisted constant '{0}' has no value in the constant map")]
    MissingConstant(String),
    #[error("fuzzy mode needs a translator model")]
    NoFuzzyTranslator,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// --- The Session Configuration ---

/// Immutable knobs for one fitting session.
///
/// Built once from user input, validated by [`SessionConfig::validate`] before a
/// worker exists, and never mutated while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // Search budget
    pub islands: usize,
    pub cycles: usize,
    pub interactions_per_cycle: usize,
    pub target_score: f64,

    // Sampling
    pub sample_temperature: f64,
    pub samplers: usize,
    pub evaluators: usize,
    pub examples: usize,
    pub generate_per_call: usize,
    pub hand_over_threshold: f64,

    // Expression search
    pub enable_mutation: bool,
    pub enable_crossover: bool,
    pub optimizer: OptimizerMethod,
    pub optimizer_trials: usize,
    pub functions: Vec<FunctionName>,
    pub constant_whitelist: Vec<String>,
    pub constant_map: BTreeMap<String, f64>,

    // Fuzzy mode
    pub fuzzy: bool,
    pub fuzzy_translator: Option<String>,

    // Models
    pub models: Vec<ModelSpec>,
    pub api_keys_path: Option<PathBuf>,

    // Session supervision
    pub max_consecutive_failures: usize,
    pub stale_after_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut constant_map = BTreeMap::new();
        constant_map.insert("pi".to_string(), std::f64::consts::PI);

        Self {
            islands: 2,
            cycles: 3,
            interactions_per_cycle: 5,
            target_score: 80.0,
            sample_temperature: 20.0,
            samplers: 2,
            evaluators: 2,
            examples: 3,
            generate_per_call: 2,
            hand_over_threshold: 0.0,
            enable_mutation: false,
            enable_crossover: false,
            optimizer: OptimizerMethod::LBfgsB,
            optimizer_trials: 5,
            functions: FunctionName::ALL.to_vec(),
            constant_whitelist: vec!["pi".to_string()],
            constant_map,
            fuzzy: false,
            fuzzy_translator: None,
            models: Vec::new(),
            api_keys_path: None,
            max_consecutive_failures: 5,
            stale_after_secs: 600,
        }
    }
}

impl SessionConfig {
    /// Loads a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("islands", self.islands),
            ("cycles", self.cycles),
            ("interactions_per_cycle", self.interactions_per_cycle),
            ("samplers", self.samplers),
            ("evaluators", self.evaluators),
            ("examples", self.examples),
            ("generate_per_call", self.generate_per_call),
            ("optimizer_trials", self.optimizer_trials),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }
        if self.stale_after_secs == 0 {
            return Err(ConfigError::NonPositive { field: "stale_after_secs" });
        }

        if !(0.0..=100.0).contains(&self.target_score) {
            return Err(ConfigError::TargetOutOfRange(self.target_score));
        }
        if !self.sample_temperature.is_finite() || self.sample_temperature < 0.0 {
            return Err(ConfigError::BadTemperature(self.sample_temperature));
        }
        if !(-1.0..=1.0).contains(&self.hand_over_threshold) {
            return Err(ConfigError::HandOverOutOfRange(self.hand_over_threshold));
        }
        for m in &self.models {
            if !m.temperature.is_finite() || m.temperature < 0.0 {
                return Err(ConfigError::BadModelTemperature {
                    name: m.name.clone(),
                    temperature: m.temperature,
                });
            }
        }

        if self.functions.is_empty() {
            return Err(ConfigError::NoFunctions);
        }
        if let Some(missing) = self
            .constant_whitelist
            .iter()
            .find(|c| !self.constant_map.contains_key(*c))
        {
            return Err(ConfigError::MissingConstant(missing.clone()));
        }
        if self.fuzzy && self.translator().is_none() {
            return Err(ConfigError::NoFuzzyTranslator);
        }

        Ok(())
    }

    /// Total units of work for a session: one unit advances every island once.
    pub fn total_iterations(&self) -> usize {
        self.cycles.saturating_mul(self.interactions_per_cycle)
    }

    /// Fuzzy translator model, falling back to the first configured model.
    pub fn translator(&self) -> Option<&str> {
        self.fuzzy_translator
            .as_deref()
            .or_else(|| self.models.first().map(|m| m.name.as_str()))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Constants an expression may reference, restricted to the whitelist.
    pub fn allowed_constants(&self) -> BTreeMap<String, f64> {
        self.constant_whitelist
            .iter()
            .filter_map(|name| self.constant_map.get(name).map(|v| (name.clone(), *v)))
            .collect()
    }
}
