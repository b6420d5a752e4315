//! Dispatch order and batch boundaries.

mod common;

use std::sync::Arc;

use batchsim_orchestrator::{Priority, TaskStatus};
use common::{params, scheduler, serial_config, StubBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODELS: [&str; 3] = ["orbit", "climate", "fluid"];

/// Submit `count` tasks with random priority and model, dispatch them all
/// and return the priority of each task in the order the backend saw it.
async fn dispatch_random(seed: u64, count: usize, max_batch_size: usize) -> Vec<(Priority, usize)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(max_batch_size));

    let mut submitted = Vec::with_capacity(count);
    for i in 0..count {
        let priority = Priority::ALL[rng.gen_range(0..Priority::ALL.len())];
        let model = MODELS[rng.gen_range(0..MODELS.len())];
        s.submit(model, params(&[("i", i as f64)]), priority).unwrap();
        submitted.push(priority);
    }

    let report = s.run_dispatch_cycle().await;
    assert_eq!(report.completed, count);

    backend
        .calls()
        .iter()
        .flat_map(|c| c.values("i"))
        .map(|i| {
            let i = i as usize;
            (submitted[i], i)
        })
        .collect()
}

fn assert_priority_then_fifo(seed: u64, order: &[(Priority, usize)]) {
    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(
            a.0.level() < b.0.level() || (a.0 == b.0 && a.1 < b.1),
            "seed {}: {:?} dispatched before {:?}",
            seed,
            a,
            b
        );
    }
}

#[tokio::test(start_paused = true)]
async fn random_submissions_dispatch_by_priority_then_fifo() {
    for seed in 0..8 {
        let order = dispatch_random(seed, 40, 1).await;
        assert_eq!(order.len(), 40);
        assert_priority_then_fifo(seed, &order);
    }
}

#[tokio::test(start_paused = true)]
async fn random_submissions_keep_order_when_batched() {
    for seed in 100..108 {
        let order = dispatch_random(seed, 40, 4).await;
        assert_eq!(order.len(), 40);
        assert_priority_then_fifo(seed, &order);
    }
}

#[tokio::test(start_paused = true)]
async fn higher_priority_dispatches_first() {
    common::init_tracing();
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(1));

    s.submit("orbit", params(&[("i", 0.0)]), Priority::Low).unwrap();
    s.submit("climate", params(&[("i", 1.0)]), Priority::Normal).unwrap();
    s.submit("fluid", params(&[("i", 2.0)]), Priority::Critical).unwrap();
    s.submit("orbit", params(&[("i", 3.0)]), Priority::High).unwrap();
    s.submit("orbit", params(&[("i", 4.0)]), Priority::Normal).unwrap();

    let report = s.run_dispatch_cycle().await;
    assert_eq!(report.batches, 5);
    assert_eq!(report.completed, 5);

    let order: Vec<f64> = backend.calls().iter().flat_map(|c| c.values("i")).collect();
    assert_eq!(order, vec![2.0, 3.0, 1.0, 4.0, 0.0]);
}

#[tokio::test(start_paused = true)]
async fn equal_priority_is_fifo() {
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(1));

    for (i, model) in ["fluid", "orbit", "climate", "orbit", "fluid"].iter().enumerate() {
        s.submit(*model, params(&[("i", i as f64)]), Priority::Normal)
            .unwrap();
    }
    s.run_dispatch_cycle().await;

    let order: Vec<f64> = backend.calls().iter().flat_map(|c| c.values("i")).collect();
    assert_eq!(order, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[tokio::test(start_paused = true)]
async fn batches_stop_at_first_model_change() {
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(4));

    s.submit("orbit", params(&[("i", 0.0)]), Priority::Normal).unwrap();
    s.submit("orbit", params(&[("i", 1.0)]), Priority::Normal).unwrap();
    s.submit("climate", params(&[("i", 2.0)]), Priority::Normal).unwrap();
    s.submit("orbit", params(&[("i", 3.0)]), Priority::Normal).unwrap();

    let report = s.run_dispatch_cycle().await;
    assert_eq!(report.batches, 3);

    let calls = backend.calls();
    let shape: Vec<(&str, Vec<f64>)> = calls
        .iter()
        .map(|c| (c.model_id.as_str(), c.values("i")))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("orbit", vec![0.0, 1.0]),
            ("climate", vec![2.0]),
            ("orbit", vec![3.0]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn batches_span_at_most_one_priority_level() {
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(4));

    s.submit("orbit", params(&[("i", 0.0)]), Priority::Critical).unwrap();
    s.submit("orbit", params(&[("i", 1.0)]), Priority::High).unwrap();
    s.submit("orbit", params(&[("i", 2.0)]), Priority::Normal).unwrap();
    s.submit("orbit", params(&[("i", 3.0)]), Priority::Low).unwrap();

    s.run_dispatch_cycle().await;

    let batches: Vec<Vec<f64>> = backend.calls().iter().map(|c| c.values("i")).collect();
    assert_eq!(batches, vec![vec![0.0, 1.0], vec![2.0, 3.0]]);
}

#[tokio::test(start_paused = true)]
async fn batches_respect_max_size() {
    let backend = Arc::new(StubBackend::new());
    let s = scheduler(backend.clone(), serial_config(4));

    let ids: Vec<_> = (0..6)
        .map(|i| {
            s.submit("orbit", params(&[("i", i as f64)]), Priority::Normal)
                .unwrap()
        })
        .collect();
    s.run_dispatch_cycle().await;

    let sizes: Vec<usize> = backend.calls().iter().map(|c| c.parameter_sets.len()).collect();
    assert_eq!(sizes, vec![4, 2]);

    // Each result lands on the task that asked for it.
    for (i, id) in ids.iter().enumerate() {
        let task = s.status(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["sum"], i as f64);
    }
}
