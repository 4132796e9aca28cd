//! Engine end-to-end over the SQLite store and catalog with filesystem storage.

mod common;

use common::{config, wait_for_state, TestEnv};
use reliquary_core::application::{EngineConfig, SubmitOutcome};
use reliquary_core::domain::{Filter, Job, JobState, ObjectClass, ObjectSelector, PluginType};
use reliquary_core::port::plugin::mocks::PluginScript;
use reliquary_core::port::JobStore;
use reliquary_infra_system::VERIFY_STORAGE_PLUGIN_ID;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn verify_job(selector: ObjectSelector) -> Job {
    Job::new_test(VERIFY_STORAGE_PLUGIN_ID, selector).with_plugin_type(PluginType::Misc)
}

fn finished_state(outcome: SubmitOutcome) -> JobState {
    match outcome {
        SubmitOutcome::Finished { state, .. } => state,
        other => panic!("expected a finished job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_filtered_population_with_missing_binaries() {
    let env = TestEnv::new().await;
    let ids = env.seed_aips(250).await;
    env.store_binaries(&ids[3..]).await;

    let engine = env.engine(config(100), env.registry(|_| {}));
    let job = verify_job(ObjectSelector::Filter {
        class: ObjectClass::Aip,
        filter: Filter::all().with("state", "ACTIVE"),
    });
    let job_id = job.id.clone();

    let state = finished_state(engine.submit(job, true).await.unwrap());
    assert_eq!(state, JobState::Completed);

    let stored = env.store.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.stats.source_objects_count, 250);
    assert_eq!(stored.stats.source_objects_processed_with_success, 247);
    assert_eq!(stored.stats.source_objects_processed_with_failure, 3);
    assert_eq!(stored.stats.source_objects_waiting_to_be_processed, 0);
    assert_eq!(stored.stats.completion_percentage, 100);
    assert!(stored.started_at.is_some());
    assert!(stored.ended_at.is_some());
}

#[tokio::test]
async fn test_all_of_type_listing_counts_unreadable_objects() {
    let env = TestEnv::new().await;
    let ids = env.seed_aips(30).await;
    env.store_binaries(&ids).await;
    env.catalog
        .set_object_state(ObjectClass::Aip, "aip-005", "DELETED")
        .await
        .unwrap();

    let engine = env.engine(config(7), env.registry(|_| {}));
    let job = verify_job(ObjectSelector::All {
        class: ObjectClass::Aip,
    });
    let job_id = job.id.clone();

    assert_eq!(
        finished_state(engine.submit(job, true).await.unwrap()),
        JobState::Completed
    );

    let stats = env.store.find_by_id(&job_id).await.unwrap().unwrap().stats;
    assert_eq!(stats.source_objects_count, 30);
    assert_eq!(stats.source_objects_processed_with_success, 29);
    assert_eq!(stats.source_objects_processed_with_failure, 1);
}

#[tokio::test]
async fn test_id_list_with_unknown_object() {
    let env = TestEnv::new().await;
    let ids = env.seed_aips(3).await;
    env.store_binaries(&ids).await;

    let engine = env.engine(config(10), env.registry(|_| {}));
    let job = verify_job(ObjectSelector::list(
        ObjectClass::Aip,
        vec!["aip-000".to_string(), "aip-002".to_string(), "ghost".to_string()],
    ));
    let job_id = job.id.clone();

    finished_state(engine.submit(job, true).await.unwrap());

    let stats = env.store.find_by_id(&job_id).await.unwrap().unwrap().stats;
    assert_eq!(stats.source_objects_count, 3);
    assert_eq!(stats.source_objects_processed_with_success, 2);
    assert_eq!(stats.source_objects_processed_with_failure, 1);
}

#[tokio::test]
async fn test_stop_running_job_persists_stopped() {
    let env = TestEnv::new().await;
    env.seed_aips(50).await;

    let gate = Arc::new(Semaphore::new(0));
    let script = Arc::new(PluginScript::succeeding().gated(gate.clone()));
    let plugins = env.registry(|registry| {
        let script = script.clone();
        registry.register("test.gated", move || script.instantiate());
    });
    let engine = env.engine(
        EngineConfig {
            block_size: 5,
            worker_pool_size: 1,
            ..EngineConfig::default()
        },
        plugins,
    );

    let job = Job::new_test(
        "test.gated",
        ObjectSelector::All {
            class: ObjectClass::Aip,
        },
    );
    let job_id = job.id.clone();
    engine.submit(job, false).await.unwrap();
    wait_for_state(&env, &job_id, JobState::Running).await;

    assert!(engine.request_stop(&job_id));
    gate.add_permits(100);
    wait_for_state(&env, &job_id, JobState::Stopped).await;

    let stored = env.store.find_by_id(&job_id).await.unwrap().unwrap();
    assert!(stored.stats.source_objects_processed_with_success < 50);
    assert!(stored.ended_at.is_some());
}

#[tokio::test]
async fn test_single_shot_job_runs_once() {
    let env = TestEnv::new().await;
    let script = Arc::new(PluginScript::new(PluginType::SingleShot));
    let plugins = env.registry(|registry| {
        let script = script.clone();
        registry.register("test.once", move || script.instantiate());
    });
    let engine = env.engine(config(100), plugins);

    let job = Job::new_test("test.once", ObjectSelector::None).with_plugin_type(PluginType::SingleShot);
    let job_id = job.id.clone();

    assert_eq!(
        finished_state(engine.submit(job, true).await.unwrap()),
        JobState::Completed
    );
    assert_eq!(script.executed_blocks(), vec![Vec::<String>::new()]);
    assert_eq!(
        env.store.find_by_id(&job_id).await.unwrap().unwrap().stats.source_objects_count,
        0
    );
}

#[tokio::test]
async fn test_parallel_jobs_over_shared_store() {
    let env = TestEnv::new().await;
    let ids = env.seed_aips(40).await;
    env.store_binaries(&ids).await;

    let engine = env.engine(
        EngineConfig {
            block_size: 10,
            max_parallel_jobs: 2,
            ..EngineConfig::default()
        },
        env.registry(|_| {}),
    );

    let mut job_ids = Vec::new();
    for _ in 0..4 {
        let job = verify_job(ObjectSelector::All {
            class: ObjectClass::Aip,
        });
        job_ids.push(job.id.clone());
        engine.submit(job, false).await.unwrap();
    }

    for job_id in &job_ids {
        wait_for_state(&env, job_id, JobState::Completed).await;
    }
    assert_eq!(env.store.count_by_state(JobState::Completed).await.unwrap(), 4);

    // Slots come back once each job task observes its final state
    for _ in 0..100 {
        let stats = engine.stats();
        if stats.pools.running == 0 && stats.available_job_slots == 2 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job slots were not released: {:?}", engine.stats());
}
