//! Fan-in merge: completion, ordering, errors, and shutdown

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{
    drain, iri, numbered, returns_within, source, source_error, stalled, vars,
    PanickingBatchIt, Probe, ProbeBatchIt,
};
use rivulet_core::id::SourceId;
use rivulet_core::prelude::{Batch, EngineConfig, Error, Term};
use rivulet_operators::{
    BatchIt, BoxedBatchIt, ConcatBatchIt, EmptyBatchIt, FailingBatchIt, FlatMapBatchIt,
    MergeBatchIt,
};

fn empty(names: &[&str]) -> BoxedBatchIt {
    Box::new(EmptyBatchIt::new(vars(names)))
}

#[test]
fn test_scenario_d_empty_sources_complete_immediately() {
    let mut merge = MergeBatchIt::new(
        vars(&["x"]),
        vec![empty(&["x"]), empty(&["x"]), empty(&["x"])],
    );
    let start = Instant::now();
    assert!(merge.next_batch(None).unwrap().is_none());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(merge.live_workers(), 0);
    merge.close();
}

#[test]
fn test_zero_sources() {
    let mut merge = MergeBatchIt::new(vars(&["x"]), Vec::new());
    assert_eq!(merge.sources(), 0);
    assert!(merge.next_batch(None).unwrap().is_none());
}

#[test]
fn test_rows_from_all_sources_in_per_source_order() {
    let sources = vec![
        numbered("x", "a", 300, 7),
        numbered("x", "b", 200, 13),
        numbered("x", "c", 100, 1),
    ];
    let mut merge = MergeBatchIt::new(vars(&["x"]), sources);
    let rows = drain(&mut merge).unwrap();
    assert_eq!(rows.len(), 600);

    let mut seen: HashMap<String, Vec<usize>> = HashMap::new();
    for r in &rows {
        let Some(Term::Iri(s)) = &r[0] else {
            panic!("unexpected cell {:?}", r[0]);
        };
        let (prefix, n) = s.split_once('-').unwrap();
        seen.entry(prefix.to_string())
            .or_default()
            .push(n.parse().unwrap());
    }
    for (prefix, expected) in [("a", 300), ("b", 200), ("c", 100)] {
        let got = &seen[prefix];
        assert_eq!(got.len(), expected);
        assert!(got.windows(2).all(|w| w[0] < w[1]), "source {prefix} reordered");
    }
    for idx in 0..3 {
        assert!(merge.has_fed(SourceId::new(idx)));
    }
}

#[test]
fn test_sources_with_other_schema_are_projected() {
    let sources = vec![
        source(&["x"], &[&["<a>"]]),
        source(&["y", "x"], &[&["<y>", "<b>"]]),
    ];
    let mut merge = MergeBatchIt::new(vars(&["x"]), sources);
    let mut rows = drain(&mut merge).unwrap();
    rows.sort_by_key(|r| format!("{:?}", r));
    assert_eq!(rows, vec![vec![iri("a")], vec![iri("b")]]);
}

#[test]
fn test_first_error_wins() {
    let sources: Vec<BoxedBatchIt> = vec![
        numbered("x", "ok", 50, 5),
        Box::new(FailingBatchIt::new(vars(&["x"]), [], source_error("boom"))),
    ];
    let mut merge = MergeBatchIt::new(vars(&["x"]), sources);
    let err = drain(&mut merge).unwrap_err();
    assert!(matches!(err.primary(), Error::Source(m) if m == "boom"));
    assert!(merge.next_batch(None).unwrap().is_none());
    merge.close();
    assert_eq!(merge.live_workers(), 0);
}

#[test]
fn test_panicking_source_is_reported() {
    let mut merge = MergeBatchIt::new(
        vars(&["x"]),
        vec![PanickingBatchIt::boxed(&["x"]), empty(&["x"])],
    );
    let err = drain(&mut merge).unwrap_err();
    assert!(matches!(err.primary(), Error::Panicked(m) if m.contains("exploded")));
    merge.close();
}

#[test]
fn test_close_joins_workers_and_closes_sources() {
    let probes: Vec<_> = (0..3).map(|_| Probe::new()).collect();
    let sources: Vec<BoxedBatchIt> = probes
        .iter()
        .enumerate()
        .map(|(i, p)| {
            ProbeBatchIt::new(numbered("x", &format!("s{i}"), 10_000, 1), p)
                .slow(Duration::from_millis(1))
                .boxed()
        })
        .collect();
    let mut merge = MergeBatchIt::new(vars(&["x"]), sources);

    assert!(merge.next_batch(None).unwrap().is_some());
    merge.close();

    assert_eq!(merge.live_workers(), 0);
    for p in &probes {
        assert_eq!(p.closes(), 1, "every source closed exactly once");
    }
    merge.close();
    assert!(merge.next_batch(None).unwrap().is_none());
}

#[test]
fn test_close_cancels_a_blocked_source() {
    let (queue, src) = stalled("x");
    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![src]);
    let first = merge.next_batch(None).unwrap().unwrap();
    assert_eq!(first.row(0)[0], iri("first"));

    assert!(returns_within(Duration::from_secs(5), move || merge.close()));
    assert!(queue.is_cancelled());
}

#[test]
fn test_try_cancel_wakes_a_blocked_source() {
    let (queue, src) = stalled("x");
    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![src]);
    assert!(merge.next_batch(None).unwrap().is_some());

    assert!(merge.try_cancel());
    assert!(queue.is_cancelled());
    assert!(matches!(merge.next_batch(None), Err(Error::Cancelled)));
    assert!(returns_within(Duration::from_secs(5), move || merge.close()));
}

#[test]
fn test_first_error_cancels_stalled_sources() {
    let (queue, stuck) = stalled("x");
    let failing: BoxedBatchIt =
        Box::new(FailingBatchIt::new(vars(&["x"]), [], source_error("disk gone")));
    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![stuck, failing]);

    let err = drain(&mut merge).unwrap_err();
    assert!(matches!(err.primary(), Error::Source(m) if m == "disk gone"));
    assert!(queue.is_cancelled());
    assert!(returns_within(Duration::from_secs(5), move || merge.close()));
}

#[test]
fn test_cancel_reaches_sources_behind_operators() {
    let (concat_queue, inner) = stalled("x");
    let concat: BoxedBatchIt = Box::new(ConcatBatchIt::new(vars(&["x"]), vec![inner]));
    let (merge_queue, inner) = stalled("x");
    let nested: BoxedBatchIt = Box::new(MergeBatchIt::new(vars(&["x"]), vec![inner]));

    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![concat, nested]);
    let mut firsts = 0;
    while firsts < 2 {
        let b = merge.next_batch(None).unwrap().unwrap();
        firsts += b.rows();
    }

    assert!(returns_within(Duration::from_secs(5), move || merge.close()));
    assert!(concat_queue.is_cancelled());
    assert!(merge_queue.is_cancelled());
}

#[test]
fn test_cancel_before_start_closes_sources() {
    let probe = Probe::new();
    let src = ProbeBatchIt::new(numbered("x", "a", 10, 1), &probe).boxed();
    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![src]);
    assert!(merge.try_cancel());
    assert!(!merge.try_cancel());
    assert!(matches!(merge.next_batch(None), Err(Error::Cancelled)));
    assert_eq!(probe.closes(), 1);
    assert_eq!(probe.pulls(), 0);
    merge.close();
}

#[test]
fn test_recycle_goes_to_a_fed_source() {
    let mut merge = MergeBatchIt::new(vars(&["x"]), vec![numbered("x", "a", 4, 1)]);

    // nothing fed yet: the batch is handed back
    assert!(merge.recycle(Batch::new(1)).is_some());

    assert_eq!(drain(&mut merge).unwrap().len(), 4);
    assert!(merge.has_fed(SourceId::new(0)));
    assert!(!merge.has_fed(SourceId::new(1)));

    // one spare slot per source
    assert!(merge.recycle(Batch::new(1)).is_none());
    assert!(merge.recycle(Batch::new(1)).is_some());
}

#[test]
fn test_thread_names_follow_config() {
    let cfg = EngineConfig {
        thread_prefix: "fanin".to_string(),
        ..EngineConfig::default()
    };
    let name = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&name);
    let src: BoxedBatchIt = Box::new(FlatMapBatchIt::new(
        vars(&["x"]),
        std::iter::once(Ok(())),
        move |()| {
            *seen.lock().unwrap() = std::thread::current().name().map(str::to_string);
            Ok(source(&["x"], &[&["<a>"]]))
        },
    ));
    let mut merge = MergeBatchIt::with_config(vars(&["x"]), vec![src], &cfg);
    assert_eq!(drain(&mut merge).unwrap().len(), 1);
    assert_eq!(name.lock().unwrap().as_deref(), Some("fanin-merge-0"));
}
