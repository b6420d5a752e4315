//! Result cache behaviour as seen through the scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use batchsim_orchestrator::{
    EventKind, OrchestratorConfig, Priority, Scheduler, SchedulerConfig, TaskId, TaskStatus,
};
use common::{memory_cache, models, params, scheduler, serial_config, StubBackend};

fn backend() -> Arc<StubBackend> {
    Arc::new(StubBackend::new().with_unit(Duration::ZERO))
}

#[tokio::test]
async fn identical_request_is_served_from_cache() {
    common::init_tracing();
    let backend = backend();
    let s = scheduler(backend.clone(), serial_config(4));
    let p = params(&[("mass", 5.97e24), ("velocity", 29.78)]);

    let first = s.submit("orbit", p.clone(), Priority::Normal).unwrap();
    s.run_dispatch_cycle().await;
    let second = s.submit("orbit", p, Priority::Low).unwrap();
    let report = s.run_dispatch_cycle().await;

    assert_eq!(report.cache_hits, 1);
    assert_eq!(backend.call_count(), 1);

    let a = s.status(&first).unwrap();
    let b = s.status(&second).unwrap();
    assert!(!a.cache_hit);
    assert!(b.cache_hit);
    assert_eq!(b.status, TaskStatus::Completed);
    assert_eq!(b.progress, 100);
    assert_eq!(a.result, b.result);
}

#[tokio::test]
async fn excluded_keys_do_not_change_the_key() {
    let backend = backend();
    let s = scheduler(backend.clone(), serial_config(4));

    s.submit(
        "orbit",
        params(&[("x", 1.0), ("request_id", 17.0)]),
        Priority::Normal,
    )
    .unwrap();
    s.run_dispatch_cycle().await;
    let id = s
        .submit(
            "orbit",
            params(&[("x", 1.0), ("request_id", 99.0)]),
            Priority::Normal,
        )
        .unwrap();
    s.run_dispatch_cycle().await;

    assert!(s.status(&id).unwrap().cache_hit);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn parameter_order_and_float_noise_do_not_change_the_key() {
    let backend = backend();
    let s = scheduler(backend.clone(), serial_config(4));

    s.submit("orbit", params(&[("a", 0.1 + 0.2), ("b", 2.0)]), Priority::Normal)
        .unwrap();
    s.run_dispatch_cycle().await;
    let id = s
        .submit("orbit", params(&[("b", 2.0), ("a", 0.3)]), Priority::Normal)
        .unwrap();
    s.run_dispatch_cycle().await;

    assert!(s.status(&id).unwrap().cache_hit);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn cached_tasks_skip_the_backend_within_a_batch() {
    let backend = backend();
    let s = scheduler(backend.clone(), serial_config(4));
    let mut hits = s.subscribe([EventKind::CacheHit]);

    for i in 0..2 {
        s.submit("orbit", params(&[("i", i as f64)]), Priority::Normal)
            .unwrap();
    }
    s.run_dispatch_cycle().await;

    let ids: Vec<TaskId> = (0..4)
        .map(|i| {
            s.submit("orbit", params(&[("i", i as f64)]), Priority::Normal)
                .unwrap()
        })
        .collect();
    let report = s.run_dispatch_cycle().await;

    assert_eq!(report.batches, 1);
    assert_eq!(report.cache_hits, 2);
    assert_eq!(report.completed, 4);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].values("i"), vec![2.0, 3.0]);

    let hit_ids: Vec<TaskId> = hits.drain().iter().map(|e| e.task_id).collect();
    assert_eq!(hit_ids, ids[..2].to_vec());
    for (i, id) in ids.iter().enumerate() {
        let task = s.status(id).unwrap();
        assert_eq!(task.cache_hit, i < 2);
        assert_eq!(task.result.unwrap()["sum"], i as f64);
    }
}

#[tokio::test]
async fn engine_version_change_misses() {
    let cache = memory_cache();
    let models = models();
    let old = Arc::new(StubBackend::new().with_unit(Duration::ZERO));
    let new = Arc::new(
        StubBackend::new()
            .with_unit(Duration::ZERO)
            .with_version("sim-2.5"),
    );
    let s_old = Scheduler::new(serial_config(4), old.clone(), cache.clone(), models.clone()).unwrap();
    let s_new = Scheduler::new(serial_config(4), new.clone(), cache.clone(), models).unwrap();
    let p = params(&[("x", 1.0)]);

    s_old.submit("orbit", p.clone(), Priority::Normal).unwrap();
    s_old.run_dispatch_cycle().await;
    let id = s_new.submit("orbit", p, Priority::Normal).unwrap();
    s_new.run_dispatch_cycle().await;

    assert!(!s_new.status(&id).unwrap().cache_hit);
    assert_eq!(old.call_count(), 1);
    assert_eq!(new.call_count(), 1);
    assert_eq!(cache.stats().entries, 2);
}

#[tokio::test]
async fn model_content_change_misses() {
    let models = models();
    let backend = backend();
    let s = Scheduler::new(serial_config(4), backend.clone(), memory_cache(), models.clone()).unwrap();
    let p = params(&[("x", 1.0)]);

    s.submit("climate", p.clone(), Priority::Normal).unwrap();
    s.run_dispatch_cycle().await;

    models.insert("climate", "climate model v2");
    let id = s.submit("climate", p.clone(), Priority::Normal).unwrap();
    s.run_dispatch_cycle().await;
    assert!(!s.status(&id).unwrap().cache_hit);

    // Same content again hits the entry computed from it.
    let id = s.submit("climate", p, Priority::Normal).unwrap();
    s.run_dispatch_cycle().await;
    assert!(s.status(&id).unwrap().cache_hit);
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn results_survive_restart_with_local_store() {
    let dir = std::env::temp_dir().join(format!("batchsim-cache-it-{}", TaskId::new()));
    let mut config = OrchestratorConfig::default();
    config.scheduler = SchedulerConfig {
        max_in_flight: 1,
        ..Default::default()
    };
    config.cache.dir = Some(dir.clone());
    let p = params(&[("x", 42.0)]);

    let first_backend = backend();
    let first = Scheduler::from_config(&config, first_backend.clone(), models())
        .await
        .unwrap();
    first.submit("fluid", p.clone(), Priority::Normal).unwrap();
    first.run_dispatch_cycle().await;
    assert_eq!(first_backend.call_count(), 1);
    drop(first);

    let second_backend = backend();
    let second = Scheduler::from_config(&config, second_backend.clone(), models())
        .await
        .unwrap();
    assert_eq!(second.cache().stats().entries, 1);
    let id = second.submit("fluid", p, Priority::Normal).unwrap();
    second.run_dispatch_cycle().await;

    let task = second.status(&id).unwrap();
    assert!(task.cache_hit);
    assert_eq!(task.result.unwrap()["sum"], 42.0);
    assert_eq!(second_backend.call_count(), 0);

    let _ = std::fs::remove_dir_all(&dir);
}
