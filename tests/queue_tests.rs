//! Batch queue handoff, backpressure, and termination tests

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{batch, vars};
use rivulet_core::prelude::{Error, Timing};
use rivulet_operators::queue::{BatchQueue, QueueReader, QueueState, READY, TERMINATED};
use rivulet_operators::{BatchIt, BatchItExt};

fn one_row_timing() -> Timing {
    // publish every batch as soon as it has a row, never merge offers
    Timing::new(1, 1, Duration::ZERO, Duration::ZERO)
}

#[test]
fn test_spsc_holds_one_ready_batch() {
    let q = BatchQueue::spsc(vars(&["x"]), one_row_timing());
    assert_eq!(q.max_ready_batches(), 1);
    assert_eq!(q.state(), QueueState::Empty);

    assert!(q.offer(batch(1, &[&["<a>"]])).unwrap().is_none());
    assert_eq!(q.state(), QueueState::Ready);
    assert_eq!(q.ready_len(), 1);
    assert_ne!(q.flags() & READY, 0);

    let b = q.next_batch(None).unwrap().unwrap();
    assert_eq!(b.rows(), 1);
    assert_eq!(q.state(), QueueState::Empty);
    assert_eq!(q.flags() & READY, 0);
}

#[test]
fn test_second_offer_blocks_until_consumed() {
    let q = Arc::new(BatchQueue::spsc(vars(&["x"]), one_row_timing()));
    q.offer(batch(1, &[&["<a>"]])).unwrap();

    let second_done = Arc::new(AtomicBool::new(false));
    let producer = {
        let q = Arc::clone(&q);
        let done = Arc::clone(&second_done);
        thread::spawn(move || {
            q.offer(batch(1, &[&["<b>"]])).unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!second_done.load(Ordering::SeqCst), "producer must wait for the slot");
    assert!(q.ready_len() <= 1);

    let first = q.next_batch(None).unwrap().unwrap();
    assert_eq!(first.get(0, 0).map(|t| t.to_string()), Some("<a>".to_string()));
    producer.join().unwrap();
    assert!(second_done.load(Ordering::SeqCst));

    let second = q.next_batch(None).unwrap().unwrap();
    assert_eq!(second.get(0, 0).map(|t| t.to_string()), Some("<b>".to_string()));
}

#[test]
fn test_offers_coalesce_up_to_max_batch() {
    let timing = Timing::new(4, 4, Duration::ZERO, Duration::from_secs(60));
    let q = BatchQueue::spsc(vars(&["x"]), timing);

    // the first offer starts filling, later ones are appended and handed back
    assert!(q.offer(batch(1, &[&["<a>"]])).unwrap().is_none());
    let back = q.offer(batch(1, &[&["<b>"], &["<c>"]])).unwrap();
    assert!(back.is_some_and(|b| b.is_empty()));
    assert_eq!(q.state(), QueueState::Filling);

    q.offer(batch(1, &[&["<d>"]])).unwrap();
    assert_eq!(q.state(), QueueState::Ready);
    assert_eq!(q.next_batch(None).unwrap().unwrap().rows(), 4);
}

#[test]
fn test_consumer_steals_after_max_wait() {
    let timing = Timing::new(100, 100, Duration::ZERO, Duration::from_millis(20));
    let q = BatchQueue::spsc(vars(&["x"]), timing);
    q.copy(&batch(1, &[&["<a>"], &["<b>"]])).unwrap();
    assert_eq!(q.state(), QueueState::Filling);

    let start = Instant::now();
    let b = q.next_batch(None).unwrap().unwrap();
    assert_eq!(b.rows(), 2);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_eager_publishes_partial_batch() {
    let timing = Timing::new(100, 100, Duration::ZERO, Duration::from_secs(60));
    let q = BatchQueue::spsc(vars(&["x"]), timing);
    q.copy(&batch(1, &[&["<a>"]])).unwrap();
    assert_eq!(q.state(), QueueState::Filling);

    q.set_eager();
    assert_eq!(q.state(), QueueState::Ready);
    assert_eq!(q.next_batch(None).unwrap().unwrap().rows(), 1);
}

#[test]
fn test_complete_delivers_buffered_then_exhausts() {
    let q = BatchQueue::spsc(vars(&["x"]), Timing::default());
    q.copy(&batch(1, &[&["<a>"]])).unwrap();
    assert!(q.complete(None));
    assert!(!q.complete(Some(Error::Cancelled)), "second completion is ignored");

    assert_eq!(q.next_batch(None).unwrap().unwrap().rows(), 1);
    assert!(q.next_batch(None).unwrap().is_none());
    assert_eq!(q.state(), QueueState::Terminated);
}

#[test]
fn test_complete_with_error_reports_it_once() {
    let q = BatchQueue::spsc(vars(&["x"]), Timing::default());
    q.complete(Some(Error::Source("disk gone".into())));
    let err = q.next_batch(None).unwrap_err();
    assert!(matches!(err, Error::Source(_)));
    assert!(q.next_batch(None).unwrap().is_none());
}

#[test]
fn test_offer_after_completion_is_rejected() {
    let q = BatchQueue::spsc(vars(&["x"]), Timing::default());
    q.complete(None);
    let err = q.offer(batch(1, &[&["<a>"]])).unwrap_err();
    assert!(matches!(err, Error::QueueTerminated));
    assert_ne!(q.flags() & TERMINATED, 0);
}

#[test]
fn test_cancel_unblocks_waiting_producer() {
    let q = Arc::new(BatchQueue::spsc(vars(&["x"]), one_row_timing()));
    q.offer(batch(1, &[&["<a>"]])).unwrap();

    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.offer(batch(1, &[&["<b>"]])))
    };
    thread::sleep(Duration::from_millis(20));

    assert!(q.cancel());
    assert!(!q.cancel(), "cancel is idempotent");
    let res = producer.join().unwrap();
    assert!(matches!(res, Err(Error::Cancelled)));
    assert!(q.is_cancelled());
    assert!(matches!(q.next_batch(None), Err(Error::Cancelled)));
}

#[test]
fn test_parked_consumer_wakes_on_offer() {
    let q = Arc::new(BatchQueue::spsc(vars(&["x"]), Timing::default()));
    let consumer = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.next_batch(None))
    };
    thread::sleep(Duration::from_millis(20));
    q.offer(batch(1, &[&["<a>"]])).unwrap();
    let got = consumer.join().unwrap().unwrap();
    assert_eq!(got.map(|b| b.rows()), Some(1));
}

#[test]
fn test_recycle_keeps_one_spare() {
    let q = BatchQueue::spsc(vars(&["x"]), Timing::default());
    assert!(q.recycle(batch(1, &[])).is_none());
    assert!(q.recycle(batch(1, &[])).is_some());
    assert!(q.take_spare().is_some());
    assert!(q.take_spare().is_none());
}

#[test]
fn test_many_batches_arrive_in_order() {
    let q = Arc::new(BatchQueue::spsc(vars(&["x"]), one_row_timing()));
    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for i in 0..500 {
                let iri = format!("<n{i}>");
                q.offer(batch(1, &[&[iri.as_str()]])).unwrap();
            }
            q.complete(None);
        })
    };

    let mut reader = QueueReader::new(Arc::clone(&q));
    let rows: Vec<_> = reader.rows().collect::<Result<_, _>>().unwrap();
    producer.join().unwrap();

    assert_eq!(rows.len(), 500);
    for (i, r) in rows.iter().enumerate() {
        assert_eq!(r[0].as_ref().map(|t| t.to_string()), Some(format!("<n{i}>")));
    }
    reader.close();
}

#[test]
fn test_reader_close_cancels_queue() {
    let q = Arc::new(BatchQueue::spsc(vars(&["x"]), Timing::default()));
    let mut reader = QueueReader::new(Arc::clone(&q));
    reader.close();
    reader.close();
    assert!(q.is_cancelled());
    assert!(reader.next_batch(None).unwrap().is_none());
}
