#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{BackoffPolicy, JobFilter, JobId, JobRecord, JobStatus};
use serde_json::json;

use db::{Expected, JobStore};

fn known(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn backdated(job_type: &str, seconds: i64) -> JobRecord {
    let mut job = JobRecord::new(job_type, json!({ "age": seconds }));
    job.created_at -= chrono::Duration::seconds(seconds);
    job.available_at = job.created_at;
    job.updated_at = job.created_at;
    job
}

#[tokio::test]
async fn insert_and_get_round_trip_the_record() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let job = JobRecord::new("order-accounting", json!({ "orderId": "o-1", "tenantId": "t-1" }));
    let created = repo.insert(&job).await?;
    assert_eq!(created.id, job.id);
    assert_eq!(created.status, JobStatus::Pending);
    assert_eq!(created.attempts, 0);

    let loaded = repo.get(job.id).await?.ok_or("job not found")?;
    assert_eq!(loaded.job_type, "order-accounting");
    assert_eq!(loaded.payload, job.payload);
    assert_eq!(millis(loaded.available_at), millis(job.available_at));
    assert!(loaded.locked_at.is_none());
    assert!(loaded.error_message.is_none());

    assert!(repo.get(JobId::new()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn claim_respects_type_availability_and_order() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let older = backdated("echo", 20);
    let newer = backdated("echo", 10);
    let unregistered = backdated("mystery", 30);
    let delayed = JobRecord::new("echo", json!({})).with_delay(Duration::from_secs(600));
    for job in [&newer, &delayed, &unregistered, &older] {
        repo.insert(job).await?;
    }

    let types = known(&["echo"]);
    let now = Utc::now();

    let first = repo.claim_next(&types, now).await?.ok_or("expected a claim")?;
    assert_eq!(first.id, older.id);
    assert_eq!(first.status, JobStatus::Processing);
    assert_eq!(first.locked_at.map(millis), Some(millis(now)));

    let second = repo.claim_next(&types, now).await?.ok_or("expected a claim")?;
    assert_eq!(second.id, newer.id);

    assert!(repo.claim_next(&types, now).await?.is_none());

    let untouched = repo.get(unregistered.id).await?.ok_or("job not found")?;
    assert_eq!(untouched.status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_take_a_job_once() -> Result<(), Box<dyn Error>> {
    let repo = Arc::new(common::setup_repo().await?);
    let job = repo.insert(&JobRecord::new("echo", json!({}))).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.claim_next(&known(&["echo"]), Utc::now()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if let Some(claimed) = handle.await?? {
            assert_eq!(claimed.id, job.id);
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test]
async fn update_if_applies_only_to_the_expected_state() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    repo.insert(&JobRecord::new("echo", json!({}))).await?;

    let claimed = repo
        .claim_next(&known(&["echo"]), Utc::now())
        .await?
        .ok_or("expected a claim")?;

    // A different lock holder may not finish the job.
    let mut foreign = claimed.clone();
    foreign.locked_at = claimed.locked_at.map(|at| at - chrono::Duration::seconds(5));
    let rejected = repo
        .update_if(&claimed.completed(Utc::now()), Expected::lock_of(&foreign))
        .await?;
    assert!(rejected.is_none());

    let backoff = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(60));
    let now = Utc::now();
    let retried = repo
        .update_if(
            &claimed.failed_attempt("boom", 3, &backoff, now),
            Expected::lock_of(&claimed),
        )
        .await?
        .ok_or("failure was not recorded")?;
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.error_message.as_deref(), Some("boom"));
    assert!(retried.locked_at.is_none());
    assert!(retried.available_at > now);

    let stored = repo.get(claimed.id).await?.ok_or("job not found")?;
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(stored.locked_at.is_none());

    // The same transition cannot apply twice.
    let again = repo
        .update_if(&claimed.completed(Utc::now()), Expected::lock_of(&claimed))
        .await?;
    assert!(again.is_none());
    Ok(())
}

#[tokio::test]
async fn release_stale_only_resets_old_locks() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let now = Utc::now();

    let stale = JobRecord::new("echo", json!({})).claimed(now - chrono::Duration::minutes(10));
    let recent = JobRecord::new("echo", json!({})).claimed(now - chrono::Duration::seconds(5));
    let pending = JobRecord::new("echo", json!({}));
    for job in [&stale, &recent, &pending] {
        repo.insert(job).await?;
    }

    let released = repo
        .release_stale(now - chrono::Duration::minutes(5), now)
        .await?;
    assert_eq!(released, 1);

    let stale = repo.get(stale.id).await?.ok_or("job not found")?;
    assert_eq!(stale.status, JobStatus::Pending);
    assert!(stale.locked_at.is_none());
    assert_eq!(stale.attempts, 0);

    let recent = repo.get(recent.id).await?.ok_or("job not found")?;
    assert_eq!(recent.status, JobStatus::Processing);
    Ok(())
}

#[tokio::test]
async fn list_count_and_instants() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let now = Utc::now();

    let first = backdated("echo", 30);
    let second = backdated("report", 20);
    let mut failed = backdated("echo", 10);
    failed.status = JobStatus::Failed;
    failed.attempts = 3;
    failed.error_message = Some("gave up".to_string());
    failed.updated_at = now;
    for job in [&second, &failed, &first] {
        repo.insert(job).await?;
    }

    let all = repo.list(&JobFilter::default()).await?;
    let ids: Vec<_> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id, failed.id]);

    let echoes = repo.list(&JobFilter::default().job_type("echo")).await?;
    assert_eq!(echoes.len(), 2);

    let failures = repo.list(&JobFilter::default().status(JobStatus::Failed)).await?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_message.as_deref(), Some("gave up"));

    let page = repo.list(&JobFilter::default().limit(1).skip(1)).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, second.id);

    assert_eq!(repo.count(JobStatus::Pending).await?, 2);
    assert_eq!(repo.count(JobStatus::Failed).await?, 1);
    assert_eq!(repo.count(JobStatus::Completed).await?, 0);

    let next = repo.next_available_at().await?.ok_or("no pending job")?;
    assert_eq!(millis(next), millis(first.available_at));

    let last_failure = repo.last_failure_at().await?.ok_or("no failed job")?;
    assert_eq!(millis(last_failure), millis(now));
    Ok(())
}

#[tokio::test]
async fn purge_and_delete() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let now = Utc::now();

    let mut old_done = backdated("echo", 7200);
    old_done.status = JobStatus::Completed;
    let mut fresh_done = JobRecord::new("echo", json!({}));
    fresh_done.status = JobStatus::Completed;
    let pending = JobRecord::new("echo", json!({}));
    for job in [&old_done, &fresh_done, &pending] {
        repo.insert(job).await?;
    }

    let purged = repo
        .purge(JobStatus::Completed, Some(now - chrono::Duration::hours(1)))
        .await?;
    assert_eq!(purged, 1);
    assert!(repo.get(old_done.id).await?.is_none());
    assert!(repo.get(fresh_done.id).await?.is_some());

    assert_eq!(repo.purge(JobStatus::Completed, None).await?, 1);
    assert_eq!(repo.count(JobStatus::Pending).await?, 1);

    assert!(repo.delete(pending.id).await?);
    assert!(!repo.delete(pending.id).await?);
    assert!(repo.get(pending.id).await?.is_none());
    Ok(())
}
