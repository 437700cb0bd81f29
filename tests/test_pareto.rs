use ideafit::analysis::pareto;
use ideafit::engine::adapter::ParetoPoint;

fn pt(complexity: usize, score: f64, expression: &str) -> ParetoPoint {
    ParetoPoint {
        complexity,
        score,
        expression: expression.to_string(),
    }
}

#[test]
fn test_frontier_filters_dominated() {
    let points = vec![
        pt(5, 60.0, "e"),
        pt(1, 20.0, "a"),
        pt(3, 20.0, "b"),
        pt(3, 50.0, "c"),
        pt(7, 55.0, "d"),
        pt(9, f64::NAN, "n"),
        pt(11, 90.0, "f"),
    ];

    let front = pareto::frontier(&points);
    let names: Vec<&str> = front.iter().map(|p| p.expression.as_str()).collect();
    assert_eq!(names, vec!["a", "c", "e", "f"]);
    assert!(front.windows(2).all(|w| w[0].complexity < w[1].complexity && w[0].score < w[1].score));
}

#[test]
fn test_frontier_tie_keeps_first() {
    let points = vec![pt(2, 40.0, "first"), pt(2, 40.0, "second")];
    let front = pareto::frontier(&points);
    assert_eq!(front.len(), 1);
    assert_eq!(front[0].expression, "first");
}

#[test]
fn test_dominance() {
    assert!(pareto::dominates(&pt(1, 50.0, ""), &pt(2, 50.0, "")));
    assert!(pareto::dominates(&pt(2, 60.0, ""), &pt(2, 50.0, "")));
    assert!(!pareto::dominates(&pt(1, 40.0, ""), &pt(2, 50.0, "")));
    assert!(!pareto::dominates(&pt(2, 50.0, ""), &pt(2, 50.0, "")));
}

#[test]
fn test_insert_maintains_frontier() {
    let mut archive = Vec::new();

    assert!(pareto::insert(&mut archive, pt(5, 50.0, "mid")));
    assert!(pareto::insert(&mut archive, pt(9, 70.0, "big")));
    assert!(!pareto::insert(&mut archive, pt(7, 45.0, "worse")));
    assert!(!pareto::insert(&mut archive, pt(5, 50.0, "dup")));
    assert!(!pareto::insert(&mut archive, pt(1, f64::INFINITY, "inf")));

    // Simpler and better: evicts "mid".
    assert!(pareto::insert(&mut archive, pt(3, 55.0, "small")));
    let names: Vec<&str> = archive.iter().map(|p| p.expression.as_str()).collect();
    assert_eq!(names, vec!["small", "big"]);

    assert_eq!(pareto::frontier(&archive), archive);
}
