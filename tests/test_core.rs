use std::collections::BTreeMap;
use std::io::Write;

use nalgebra::DMatrix;
use tempfile::NamedTempFile;

use ideafit::core::config::{ConfigError, FunctionName, ModelSpec, OptimizerMethod, SessionConfig};
use ideafit::core::curve::{CurveData, CurveError};
use ideafit::core::sample::{self, SampleShape, SampleSpec};

fn temp_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// --- Curve ---

#[test]
fn test_curve_validation() {
    let x = DMatrix::from_column_slice(3, 1, &[0.0, 1.0, 2.0]);

    assert!(matches!(
        CurveData::new(x.clone(), vec![1.0, 2.0], None),
        Err(CurveError::LengthMismatch { x: 3, y: 2 })
    ));
    assert!(matches!(
        CurveData::new(x.clone(), vec![1.0, f64::NAN, 2.0], None),
        Err(CurveError::NonFinite { column: "y", index: 1 })
    ));
    assert!(matches!(
        CurveData::new(x.clone(), vec![1.0, 2.0, 3.0], Some(vec![0.1, 0.0, 0.1])),
        Err(CurveError::NonPositiveError { index: 1, .. })
    ));
    assert!(matches!(
        CurveData::new(x.clone(), vec![1.0, 2.0, 3.0], Some(vec![0.1])),
        Err(CurveError::ErrorLengthMismatch { error: 1, y: 3 })
    ));
    assert!(matches!(CurveData::from_points(&[]), Err(CurveError::Empty)));

    let curve = CurveData::new(x, vec![1.0, 2.0, 3.0], Some(vec![0.1, 0.2, 0.3])).unwrap();
    assert_eq!(curve.len(), 3);
    assert_eq!(curve.dims(), 1);
    assert_eq!(curve.error(), Some(&[0.1, 0.2, 0.3][..]));
    assert_eq!(curve.variable_names(), vec!["x1".to_string()]);
    assert_eq!(curve.x_range(), (0.0, 2.0));
    assert_eq!(curve.y_range(), (1.0, 3.0));
}

#[test]
fn test_curve_units() {
    let curve = CurveData::from_points(&[(0.0, 1.0), (1.0, 2.0)]).unwrap();
    assert!(curve.units().is_none());

    let mut units = BTreeMap::new();
    units.insert("x1".to_string(), "s".to_string());
    units.insert("y".to_string(), "m".to_string());
    let curve = curve.with_units(units);
    assert_eq!(curve.units().unwrap()["y"], "m");
}

#[test]
fn test_csv_with_header() {
    let file = temp_file("x,y\n0,1\n1,3\n\n2,5\n");
    let curve = CurveData::from_csv(file.path(), 1, false).unwrap();

    assert_eq!(curve.len(), 3);
    assert_eq!(curve.y(), &[1.0, 3.0, 5.0]);
    assert!(curve.error().is_none());
}

#[test]
fn test_csv_multi_dim_with_error() {
    let file = temp_file("1.0, 2.0, 10.0, 0.5\n3.0, 4.0, 20.0, 0.25\n");
    let curve = CurveData::from_csv(file.path(), 2, true).unwrap();

    assert_eq!(curve.dims(), 2);
    assert_eq!(curve.x()[(1, 0)], 3.0);
    assert_eq!(curve.x()[(1, 1)], 4.0);
    assert_eq!(curve.y(), &[10.0, 20.0]);
    assert_eq!(curve.error(), Some(&[0.5, 0.25][..]));
    assert_eq!(curve.variable_names(), vec!["x1".to_string(), "x2".to_string()]);
}

#[test]
fn test_csv_errors() {
    let short = temp_file("0,1\n1\n");
    assert!(matches!(
        CurveData::from_csv(short.path(), 1, false),
        Err(CurveError::BadRow { row: 2, expected: 2, found: 1 })
    ));

    let garbage = temp_file("0,1\n1,abc\n");
    match CurveData::from_csv(garbage.path(), 1, false) {
        Err(CurveError::BadNumber { row, field }) => {
            assert_eq!(row, 2);
            assert_eq!(field, "abc");
        }
        other => panic!("expected BadNumber, got {:?}", other),
    }

    let header_only = temp_file("x,y\n");
    assert!(matches!(CurveData::from_csv(header_only.path(), 1, false), Err(CurveError::Empty)));
}

// --- Sample curves ---

#[test]
fn test_sample_is_reproducible() {
    let spec = SampleSpec { noise: 0.5, seed: 7, ..Default::default() };
    let a = sample::generate(&spec).unwrap();
    let b = sample::generate(&spec).unwrap();
    assert_eq!(a.y(), b.y());
    assert_eq!(a.len(), 100);
    let (lo, hi) = a.x_range();
    assert_eq!(lo, 0.0);
    assert!((hi - 10.0).abs() < 1e-9);

    let other = sample::generate(&SampleSpec { seed: 8, ..spec }).unwrap();
    assert_ne!(a.y(), other.y());
}

#[test]
fn test_sample_shapes() {
    for shape in SampleShape::ALL {
        let curve = sample::generate(&SampleSpec { shape, points: 11, ..Default::default() }).unwrap();
        assert_eq!(curve.len(), 11);
    }

    let line = sample::generate(&SampleSpec { shape: SampleShape::Linear, points: 11, ..Default::default() }).unwrap();
    assert_eq!(line.y()[0], 1.0);
    assert_eq!(line.y()[10], 21.0);

    assert_eq!("Gaussian".parse::<SampleShape>(), Ok(SampleShape::Gaussian));
    assert!("spiral".parse::<SampleShape>().is_err());
}

#[test]
fn test_sample_rejects_bad_noise() {
    for noise in [f64::INFINITY, f64::NAN, -0.5, f64::MAX] {
        let spec = SampleSpec { noise, ..Default::default() };
        assert!(matches!(sample::generate(&spec), Err(CurveError::BadNoise(_))), "noise {}", noise);
    }
    assert!(sample::generate(&SampleSpec { noise: 1.0e6, ..Default::default() }).is_ok());
}

// --- Config ---

#[test]
fn test_default_config_is_valid() {
    let cfg = SessionConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.total_iterations(), 15);
    assert_eq!(cfg.allowed_constants().len(), 1);
    assert_eq!(cfg.stale_after().as_secs(), 600);
}

#[test]
fn test_config_validation() {
    let bad = |cfg: SessionConfig| cfg.validate().unwrap_err();

    assert!(matches!(
        bad(SessionConfig { cycles: 0, ..Default::default() }),
        ConfigError::NonPositive { field: "cycles" }
    ));
    assert!(matches!(
        bad(SessionConfig { interactions_per_cycle: 0, ..Default::default() }),
        ConfigError::NonPositive { field: "interactions_per_cycle" }
    ));
    assert!(matches!(
        bad(SessionConfig { target_score: 120.0, ..Default::default() }),
        ConfigError::TargetOutOfRange(_)
    ));
    assert!(matches!(
        bad(SessionConfig { sample_temperature: -1.0, ..Default::default() }),
        ConfigError::BadTemperature(_)
    ));
    assert!(matches!(
        bad(SessionConfig { hand_over_threshold: 1.5, ..Default::default() }),
        ConfigError::HandOverOutOfRange(_)
    ));
    assert!(matches!(
        bad(SessionConfig { functions: vec![], ..Default::default() }),
        ConfigError::NoFunctions
    ));
    assert!(matches!(
        bad(SessionConfig { constant_whitelist: vec!["pi".into(), "e".into()], ..Default::default() }),
        ConfigError::MissingConstant(name) if name == "e"
    ));
    assert!(matches!(
        bad(SessionConfig { fuzzy: true, ..Default::default() }),
        ConfigError::NoFuzzyTranslator
    ));

    let mut model = ModelSpec::new("gpt");
    model.temperature = f64::NAN;
    assert!(matches!(
        bad(SessionConfig { models: vec![model], ..Default::default() }),
        ConfigError::BadModelTemperature { .. }
    ));
}

#[test]
fn test_fuzzy_translator_fallback() {
    let cfg = SessionConfig {
        fuzzy: true,
        models: vec![ModelSpec::new("model-a"), ModelSpec::new("model-b")],
        ..Default::default()
    };
    cfg.validate().unwrap();
    assert_eq!(cfg.translator(), Some("model-a"));

    let cfg = SessionConfig { fuzzy_translator: Some("model-b".into()), ..cfg };
    assert_eq!(cfg.translator(), Some("model-b"));
}

#[test]
fn test_config_from_json() {
    let file = temp_file(
        r#"{
            "cycles": 4,
            "interactions_per_cycle": 3,
            "functions": ["sin", "exp"],
            "optimizer": "differential-evolution",
            "models": [{"name": "m1"}, {"name": "m2", "temperature": 0.5}]
        }"#,
    );
    let cfg = SessionConfig::from_json_file(file.path()).unwrap();

    assert_eq!(cfg.total_iterations(), 12);
    assert_eq!(cfg.islands, 2);
    assert_eq!(cfg.functions, vec![FunctionName::Sin, FunctionName::Exp]);
    assert_eq!(cfg.optimizer, OptimizerMethod::DifferentialEvolution);
    assert_eq!(cfg.models[0].temperature, 1.0);
    assert_eq!(cfg.models[1].temperature, 0.5);

    let broken = temp_file("{ not json");
    assert!(matches!(SessionConfig::from_json_file(broken.path()), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_function_names() {
    assert_eq!("ln".parse::<FunctionName>().unwrap(), FunctionName::Log);
    assert_eq!("ATAN".parse::<FunctionName>().unwrap(), FunctionName::Arctan);
    assert!(matches!("gamma".parse::<FunctionName>(), Err(ConfigError::UnknownFunction(_))));
    assert_eq!(FunctionName::Sqrt.apply(9.0), 3.0);
    assert_eq!("L-BFGS-B".parse::<OptimizerMethod>().unwrap(), OptimizerMethod::LBfgsB);
}
