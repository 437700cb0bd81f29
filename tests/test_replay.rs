use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use nalgebra::DMatrix;
use tempfile::NamedTempFile;

use ideafit::core::config::{FunctionName, SessionConfig};
use ideafit::engine::adapter::{AdvanceContext, EngineAdapter, EngineError, EvaluationError};
use ideafit::engine::external::replay::ReplayEngine;
use ideafit::session::controller::FittingController;
use ideafit::session::SessionStatus;

use crate::common::{config, line_curve};

mod common;

fn ctx(iteration: usize) -> AdvanceContext {
    AdvanceContext {
        iteration,
        cycle: 1,
        epoch: iteration + 1,
        best_score: None,
    }
}

#[test]
fn test_replay_scores_against_curve() {
    let engine = ReplayEngine::new(vec!["2 * x1".into(), "2 * x1 + 1".into()]);
    engine.prepare(&line_curve(), &SessionConfig::default()).unwrap();

    let rough = engine.advance(&ctx(0)).unwrap();
    let exact = engine.advance(&ctx(1)).unwrap();

    assert_eq!(rough.score, 80.0);
    assert_eq!(rough.complexity, Some(3));
    assert_eq!(exact.score, 100.0);
    assert_eq!(exact.complexity, Some(5));
    assert!(matches!(engine.advance(&ctx(2)), Err(EngineError::Exhausted)));

    let front = engine.current_pareto_frontier().unwrap();
    let names: Vec<&str> = front.iter().map(|p| p.expression.as_str()).collect();
    assert_eq!(names, vec!["2 * x1", "2 * x1 + 1"]);
}

#[test]
fn test_replay_rejects_bad_candidates() {
    let engine = ReplayEngine::new(vec!["x1 +".into(), "tanh(x1)".into(), "x2".into()]);
    let cfg = SessionConfig {
        functions: vec![FunctionName::Sin],
        ..Default::default()
    };
    engine.prepare(&line_curve(), &cfg).unwrap();

    assert!(matches!(
        engine.advance(&ctx(0)),
        Err(EngineError::Evaluation(EvaluationError::Syntax { .. }))
    ));
    assert!(matches!(
        engine.advance(&ctx(1)),
        Err(EngineError::Evaluation(EvaluationError::DisallowedFunction(_)))
    ));
    assert!(matches!(
        engine.advance(&ctx(2)),
        Err(EngineError::Evaluation(EvaluationError::VariableOutOfRange { .. }))
    ));
}

#[test]
fn test_replay_looping_and_prepare_reset() {
    let engine = ReplayEngine::new(vec!["x1".into()]).looping(true);
    engine.prepare(&line_curve(), &SessionConfig::default()).unwrap();

    let a = engine.advance(&ctx(0)).unwrap();
    let b = engine.advance(&ctx(1)).unwrap();
    assert_eq!(a, b);

    engine.prepare(&line_curve(), &SessionConfig::default()).unwrap();
    assert!(engine.current_pareto_frontier().unwrap().is_empty());
}

#[test]
fn test_replay_requires_prepare() {
    let engine = ReplayEngine::new(vec!["x1".into()]);
    assert!(matches!(engine.advance(&ctx(0)), Err(EngineError::Protocol(_))));
}

#[test]
fn test_replay_evaluate() {
    let engine = ReplayEngine::new(vec![]);
    let inputs = DMatrix::from_column_slice(2, 1, &[0.0, 2.0]);
    assert_eq!(engine.evaluate("x1 * pi", &inputs).unwrap(), vec![0.0, 2.0 * std::f64::consts::PI]);
    assert!(engine.evaluate("q", &inputs).is_err());
}

#[test]
fn test_replay_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"["x1", {{"expression": "2 * x1 + 1", "api_calls": 3}}, {{"expression": "x1 + 1", "score": 42.5}}]"#
    )
    .unwrap();
    file.flush().unwrap();

    let engine = ReplayEngine::from_json_file(file.path()).unwrap();
    assert_eq!(engine.len(), 3);
    engine.prepare(&line_curve(), &SessionConfig::default()).unwrap();

    engine.advance(&ctx(0)).unwrap();
    let exact = engine.advance(&ctx(1)).unwrap();
    assert_eq!(exact.api_calls, 3);
    assert_eq!(exact.score, 100.0);
    let recorded = engine.advance(&ctx(2)).unwrap();
    assert_eq!(recorded.score, 42.5);

    let mut empty = NamedTempFile::new().unwrap();
    write!(empty, "[]").unwrap();
    empty.flush().unwrap();
    assert!(ReplayEngine::from_json_file(empty.path()).is_err());
}

#[test]
fn test_replay_drives_session() {
    let engine = Arc::new(ReplayEngine::new(vec![
        "x1".into(),
        "x1 +".into(),
        "2 * x1".into(),
        "2 * x1 + 1".into(),
        "x1 * x1".into(),
    ]));
    let ctl = FittingController::new(engine);

    let handle = ctl.start(line_curve(), config(2, 3, 95.0)).unwrap();
    let state = handle.join(Duration::from_secs(10)).unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.best_expression, "2 * x1 + 1");
    assert_eq!(state.best_score, 100.0);
    assert_eq!(state.iteration, 4);
    assert_eq!(state.evaluation_failures, 1);

    let front = handle.pareto_frontier().unwrap();
    assert_eq!(front.last().map(|p| p.score), Some(100.0));
}

#[test]
fn test_short_replay_completes_session() {
    let engine = Arc::new(ReplayEngine::new(vec!["x1".into(), "2 * x1".into()]));
    let ctl = FittingController::new(engine);

    let handle = ctl.start(line_curve(), config(2, 5, 95.0)).unwrap();
    let state = handle.join(Duration::from_secs(10)).unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.error_message.is_none());
    assert_eq!(state.iteration, 2);
    assert_eq!(state.best_expression, "2 * x1");
    assert_eq!(state.best_score, 80.0);
    let last = state.events.back().unwrap();
    assert!(last.contains("no more candidates"), "unexpected final event: {}", last);
}
