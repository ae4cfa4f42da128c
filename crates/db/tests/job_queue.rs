//! Repository tests against a real PostgreSQL.
//!
//! Run with `DATABASE_URL` set and `cargo test -p fitline-db -- --ignored`.

use fitline_core::job_status::JobKind;
use fitline_db::models::job::CreateJob;
use fitline_db::models::task::NewTask;
use fitline_db::repositories::{JobRepo, TaskRepo};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn transition_if_is_compare_and_set(pool: PgPool) {
    let job = JobRepo::create(&pool, &CreateJob::new(JobKind::GarmentFit, json!({})))
        .await
        .unwrap();

    let moved = JobRepo::transition_if(
        &pool,
        job.id,
        "pending_segmentation",
        "pending_crop",
        &json!({"mask_ref": "m.png"}),
        0,
    )
    .await
    .unwrap();
    assert_eq!(moved.unwrap().results["mask_ref"], "m.png");

    let again = JobRepo::transition_if(
        &pool,
        job.id,
        "pending_segmentation",
        "pending_crop",
        &json!({}),
        0,
    )
    .await
    .unwrap();
    assert!(again.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn worker_results_accumulate(pool: PgPool) {
    let job = JobRepo::create(&pool, &CreateJob::new(JobKind::MaskConsensus, json!({})))
        .await
        .unwrap();

    JobRepo::record_worker_result(&pool, job.id, "0", &json!({"ok": true}))
        .await
        .unwrap();
    let job = JobRepo::record_worker_result(&pool, job.id, "1", &json!({"ok": false}))
        .await
        .unwrap()
        .unwrap();

    let slots = job.results["worker_results"].as_object().unwrap();
    assert_eq!(slots.len(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stage_claim_is_exclusive(pool: PgPool) {
    let job = JobRepo::create(&pool, &CreateJob::new(JobKind::Generation, json!({})))
        .await
        .unwrap();

    assert!(JobRepo::claim_stage(&pool, job.id, "pending_generation", "generate").await.unwrap());
    assert!(!JobRepo::claim_stage(&pool, job.id, "pending_generation", "generate").await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn dependents_found_by_payload_reference(pool: PgPool) {
    let mask = JobRepo::create(&pool, &CreateJob::new(JobKind::MaskConsensus, json!({})))
        .await
        .unwrap();
    let fit = JobRepo::create(
        &pool,
        &CreateJob::new(JobKind::GarmentFit, json!({"mask_job_id": mask.id})),
    )
    .await
    .unwrap();

    let found = JobRepo::find_by_payload_ref(&pool, "mask_job_id", mask.id)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, fit.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_pending_tasks_collapse(pool: PgPool) {
    let task = NewTask::keyed("advance", json!({"job_id": 1}));
    assert!(TaskRepo::enqueue(&pool, &task).await.unwrap().is_some());
    assert!(TaskRepo::enqueue(&pool, &task).await.unwrap().is_none());

    let claimed = TaskRepo::claim_next(&pool, "w1", 300).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);

    // Once the first copy is running a fresh copy may queue behind it.
    assert!(TaskRepo::enqueue(&pool, &task).await.unwrap().is_some());
    TaskRepo::release(&pool, claimed.id, "boom", 0).await.unwrap();
    assert_eq!(task_keys(&pool).await, vec![(task.idempotency_key.clone(), false)]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn released_task_without_waiting_copy_is_retried(pool: PgPool) {
    let task = NewTask::keyed("advance", json!({"job_id": 2}));
    TaskRepo::enqueue(&pool, &task).await.unwrap();
    let claimed = TaskRepo::claim_next(&pool, "w1", 300).await.unwrap().unwrap();

    TaskRepo::release(&pool, claimed.id, "boom", 0).await.unwrap();

    let retried = TaskRepo::claim_next(&pool, "w2", 300).await.unwrap().unwrap();
    assert_eq!(retried.id, claimed.id);
    assert_eq!(retried.attempts, 2);
    assert_eq!(retried.last_error.as_deref(), Some("boom"));
}

/// Idempotency key and lock state of every task row.
async fn task_keys(pool: &PgPool) -> Vec<(String, bool)> {
    sqlx::query_as("SELECT idempotency_key, locked_at IS NOT NULL FROM tasks ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}
