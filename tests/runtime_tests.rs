//! Engine runs, configuration, and batch pooling

mod common;

use std::sync::Arc;

use common::{batch, numbered, row, source, source_error, vars, Probe, ProbeBatchIt};
use rivulet_core::prelude::{BatchBinding, EngineConfig, Error, Term};
use rivulet_exec::{collect_rows, Engine, ExecError, Outcome};
use rivulet_mem::BatchPool;
use rivulet_operators::{BatchIt, BindBatchIt, BindType, ConcatBatchIt, FailingBatchIt, VecBatchIt};

fn engine() -> Engine {
    Engine::new(EngineConfig::default())
}

#[test]
fn test_run_summarizes_a_drain() {
    let mut root = numbered("x", "r", 25, 10);
    let summary = engine().run(&mut root).unwrap();
    assert_eq!(summary.rows, 25);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.max_batch_rows, 10);
    assert_eq!(summary.outcome, Outcome::Completed);
    assert_eq!(summary.root, "vec");

    let json = summary.to_json().unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["rows"], 25);
    assert_eq!(v["outcome"], "completed");
    assert!(v["id"].is_string());
}

#[test]
fn test_engine_applies_configured_batch_cap() {
    let cfg = EngineConfig {
        max_batch: 3,
        ..EngineConfig::default()
    };
    let mut root = numbered("x", "r", 10, 10);
    let summary = Engine::new(cfg).run(&mut root).unwrap();
    assert_eq!(summary.rows, 10);
    assert_eq!(summary.batches, 4);
    assert_eq!(summary.max_batch_rows, 3);
}

#[test]
fn test_zero_max_batch_is_rejected() {
    let cfg = EngineConfig {
        max_batch: 0,
        ..EngineConfig::default()
    };
    let mut root = numbered("x", "r", 1, 1);
    let err = Engine::new(cfg).run(&mut root).unwrap_err();
    assert!(matches!(err, ExecError::Config(_)));
}

#[test]
fn test_row_limit_cancels_and_closes_root() {
    let probe = Probe::new();
    let mut root = ProbeBatchIt::new(numbered("x", "r", 100, 10), &probe).boxed();
    let summary = engine().with_row_limit(25).run(&mut root).unwrap();
    assert_eq!(summary.outcome, Outcome::Limited);
    assert_eq!(summary.rows, 30);
    assert_eq!(probe.cancels(), 1);
    assert_eq!(probe.closes(), 1);
}

#[test]
fn test_cancelled_root_ends_quietly() {
    let mut root = ConcatBatchIt::new(vars(&["x"]), vec![numbered("x", "r", 10, 1)]);
    assert!(root.try_cancel());
    let summary = engine().run(&mut root).unwrap();
    assert_eq!(summary.outcome, Outcome::Cancelled);
    assert_eq!(summary.rows, 0);
}

#[test]
fn test_operator_failure_is_reported() {
    let mut root = FailingBatchIt::new(
        vars(&["x"]),
        [batch(1, &[&["<a>"]])],
        source_error("socket reset"),
    );
    let err = engine().run(&mut root).unwrap_err();
    match &err {
        ExecError::Operator { op, .. } => assert_eq!(*op, "failing"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.core(), Some(Error::Source(m)) if m == "socket reset"));
    assert!(err.to_string().contains("socket reset"));
}

#[test]
fn test_visitor_error_stops_run_and_closes_root() {
    let probe = Probe::new();
    let mut root = ProbeBatchIt::new(numbered("x", "r", 50, 5), &probe).boxed();
    let mut seen = 0;
    let err = engine()
        .run_with(&mut root, |b| {
            seen += b.rows();
            if seen >= 10 {
                return Err(ExecError::Visitor("enough".into()));
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, ExecError::Visitor(_)));
    assert_eq!(seen, 10);
    assert_eq!(probe.closes(), 1);
}

#[test]
fn test_collect_rows_from_a_join() {
    let left = source(&["s"], &[&["<alice>"], &["<bob>"]]);
    let mut join = BindBatchIt::from_fn(
        left,
        BindType::LeftJoin,
        vars(&["name"]),
        |b: &BatchBinding<'_>| {
            let rows = match b.get("s") {
                Some(Term::Iri(s)) if s == "alice" => vec![vec![Some(Term::lit("Alice"))]],
                _ => Vec::new(),
            };
            Ok(Box::new(VecBatchIt::from_rows(vars(&["name"]), rows))
                as rivulet_operators::BoxedBatchIt)
        },
    );
    let rows = collect_rows(&mut join).unwrap();
    assert_eq!(
        rows,
        vec![row(&["<alice>", "\"Alice\""]), row(&["<bob>", "-"])]
    );
}

#[test]
fn test_pool_reuses_and_bounds_batches() {
    let pool = BatchPool::new(2);
    assert!(pool.is_empty());

    let mut b = pool.get(2);
    assert_eq!(pool.stats().misses(), 1);
    b.push_row([Some(Term::iri("a")), None]);

    assert!(pool.offer(b).is_none());
    assert!(pool.offer(batch(2, &[])).is_none());
    assert!(pool.offer(batch(2, &[])).is_some(), "full pool hands the batch back");
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.stats().rejected(), 1);
    assert_eq!(pool.stats().peak(), 2);

    let reused = pool.get(3);
    assert_eq!(pool.stats().hits(), 1);
    assert!(reused.is_empty());
    assert_eq!(reused.cols(), 3);

    pool.clear();
    assert_eq!(pool.len(), 0);
    assert_eq!(pool.capacity(), 2);
}

#[test]
fn test_vec_source_recycles_into_its_pool() {
    let pool = Arc::new(BatchPool::new(4));
    let mut it = VecBatchIt::new(vars(&["x"]), [batch(1, &[&["<a>"]])]).with_pool(Arc::clone(&pool));
    let b = it.next_batch(None).unwrap().unwrap();
    let pooled = pool.len();
    assert!(it.recycle(b).is_none());
    assert_eq!(pool.len(), pooled + 1);
}

#[test]
fn test_config_from_json_fills_defaults() {
    let cfg = EngineConfig::from_json(r#"{"max_batch": 32, "thread_prefix": "q"}"#).unwrap();
    assert_eq!(cfg.max_batch, 32);
    assert_eq!(cfg.min_batch, EngineConfig::default().min_batch);
    assert_eq!(cfg.thread_name("merge", 3), "q-merge-3");
    assert_eq!(cfg.timing().max_batch, 32);

    let err = EngineConfig::from_json("{ not json").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
