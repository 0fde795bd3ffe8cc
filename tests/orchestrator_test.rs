//! End-to-end tests for the generation job lifecycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use pixelforge::error::AppError;
use pixelforge::model::JobStatus;
use pixelforge::orchestrator::CreateJobRequest;
use pixelforge::usage::UsageAggregator;

use common::{png_image, Harness, ScriptedProvider, ScriptedStore};

fn request(model: &str, num_images: u32) -> CreateJobRequest {
    CreateJobRequest {
        prompt: "a lighthouse at dusk".to_string(),
        negative_prompt: None,
        model: model.to_string(),
        width: None,
        height: None,
        steps: None,
        guidance: None,
        seed: None,
        num_images: Some(num_images),
    }
}

#[tokio::test]
async fn test_successful_generation_end_to_end() {
    let provider = Arc::new(ScriptedProvider::always(vec![
        png_image(1000, Some(7)),
        png_image(1200, Some(8)),
    ]));
    let store = Arc::new(ScriptedStore::new());
    let h = Harness::new(provider, store.clone(), 100);

    // flux-klein at default 1024x1024 costs 40 per image
    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 2))
        .unwrap();
    assert_eq!(receipt.credits_reserved, 80);
    assert_eq!(receipt.credits_remaining, 20);
    assert_eq!(h.credits(), 20);

    assert_eq!(
        h.db.get_job(receipt.job_id).unwrap().status,
        JobStatus::Pending
    );

    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.artifact_ids.len(), 2);
    assert!(job.error.is_none());
    assert!(job.processing_time_ms.is_some());

    // Completion keeps the charge
    assert_eq!(h.credits(), 20);
    assert_eq!(h.storage_used(), 2200);
    assert_eq!(store.object_count(), 2);

    let artifact = h.db.get_artifact(job.artifact_ids[0]).unwrap();
    assert_eq!(artifact.mime_type, "image/png");
    assert_eq!(artifact.seed, Some(7));
    assert!(artifact.storage_key.starts_with("images/user_test/"));

    let usage = UsageAggregator::new(h.db.clone())
        .daily(h.user_id, chrono::Utc::now().date_naive())
        .unwrap();
    assert_eq!(usage.successes, 1);
    assert_eq!(usage.credits_spent, 80);
    assert_eq!(usage.model_usage.get("flux-klein"), Some(&1));
}

#[tokio::test]
async fn test_cost_scales_with_resolution() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(100, None)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 1000);

    let mut req = request("flux-klein", 1);
    req.width = Some(2048);
    req.height = Some(2048);

    // 4x the baseline pixel count quadruples the 40-credit base cost
    let receipt = h.orchestrator.create_job("user_test", req).unwrap();
    assert_eq!(receipt.credits_reserved, 160);
}

#[tokio::test]
async fn test_insufficient_credits_rejects_without_side_effects() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(100, None)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 50);

    let err = h
        .orchestrator
        .create_job("user_test", request("flux-pro", 1))
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientCredits {
            required: 100,
            available: 50
        }
    ));

    assert_eq!(h.credits(), 50);
    assert_eq!(h.dispatcher.pending(), 0);
}

#[tokio::test]
async fn test_validation_rejections() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(100, None)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 1000);

    let mut empty = request("flux-klein", 1);
    empty.prompt = "   ".to_string();
    assert!(matches!(
        h.orchestrator.create_job("user_test", empty),
        Err(AppError::InvalidRequest(_))
    ));

    let mut long = request("flux-klein", 1);
    long.prompt = "x".repeat(2001);
    assert!(matches!(
        h.orchestrator.create_job("user_test", long),
        Err(AppError::InvalidRequest(_))
    ));

    let mut tiny = request("flux-klein", 1);
    tiny.width = Some(128);
    assert!(matches!(
        h.orchestrator.create_job("user_test", tiny),
        Err(AppError::InvalidRequest(_))
    ));

    let mut many = request("flux-klein", 5);
    many.num_images = Some(5);
    assert!(matches!(
        h.orchestrator.create_job("user_test", many),
        Err(AppError::InvalidRequest(_))
    ));

    // No credits were touched by any rejection
    assert_eq!(h.credits(), 1000);
}

#[tokio::test]
async fn test_transient_failure_retries_with_backoff_then_refunds() {
    let provider = Arc::new(ScriptedProvider::always_unavailable());
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    assert_eq!(h.credits(), 60);

    let delays = h.run_to_completion().await;

    // Initial run plus three retries, exponential from 2s
    assert_eq!(
        delays,
        vec![
            Duration::ZERO,
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(8000),
        ]
    );
    assert_eq!(provider.calls(), 4);

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert!(job.error.as_deref().unwrap().contains("unavailable"));

    // Exhausted transient failures refund the reservation
    assert_eq!(h.credits(), 100);

    let usage = UsageAggregator::new(h.db.clone())
        .daily(h.user_id, chrono::Utc::now().date_naive())
        .unwrap();
    assert_eq!(usage.failures, 1);
    assert_eq!(usage.credits_spent, 0);
}

#[tokio::test]
async fn test_retry_then_success_keeps_charge() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(AppError::ProviderRateLimited("slow down".into())),
        Ok(vec![png_image(500, None)]),
    ]));
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(provider.calls(), 2);
    assert_eq!(h.credits(), 60);
}

#[tokio::test]
async fn test_terminal_provider_rejection_keeps_charge() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        AppError::ProviderBadRequest("unsupported prompt".into()),
    )]));
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(provider.calls(), 1);

    // Caller-attributable rejection, no refund
    assert_eq!(h.credits(), 60);
}

#[tokio::test]
async fn test_no_images_fails_without_refund() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(AppError::NoImages)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.credits(), 60);
}

#[tokio::test]
async fn test_first_upload_failure_fails_job_with_refund() {
    let provider = Arc::new(ScriptedProvider::always(vec![
        png_image(500, None),
        png_image(500, None),
    ]));
    let store = Arc::new(ScriptedStore::failing_on([0]));
    let h = Harness::new(provider, store.clone(), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 2))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.artifact_ids.is_empty());

    // Storage failure is service-attributable
    assert_eq!(h.credits(), 100);
    assert_eq!(h.storage_used(), 0);
}

#[tokio::test]
async fn test_later_upload_failure_is_tolerated() {
    let provider = Arc::new(ScriptedProvider::always(vec![
        png_image(500, None),
        png_image(700, None),
    ]));
    let store = Arc::new(ScriptedStore::failing_on([1]));
    let h = Harness::new(provider, store.clone(), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 2))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.artifact_ids.len(), 1);
    assert_eq!(h.credits(), 20);
    assert_eq!(h.storage_used(), 500);
    assert_eq!(store.object_count(), 1);
}

#[tokio::test]
async fn test_quota_exceeded_fails_without_refund_or_usage_mutation() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(600 * 1024, None)]));
    let store = Arc::new(ScriptedStore::new());
    let h = Harness::new(provider, store.clone(), 100);

    h.db.update_user(h.user_id, |u| {
        u.storage_quota_bytes = 500 * 1024;
        Ok(())
    })
    .unwrap();

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("quota"));

    // Quota rejections keep the charge and write nothing
    assert_eq!(h.credits(), 60);
    assert_eq!(h.storage_used(), 0);
    assert_eq!(store.object_count(), 0);
}

/// Two jobs racing on the same user's quota: the reservation happens under
/// the user document's lock, so only one can claim the remaining bytes no
/// matter how the store awaits interleave.
#[tokio::test]
async fn test_concurrent_jobs_cannot_jointly_exceed_quota() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(600, None)]));
    let store = Arc::new(ScriptedStore::yielding());
    let h = Harness::new(provider, store.clone(), 100);

    h.db.update_user(h.user_id, |u| {
        u.storage_quota_bytes = 1000;
        Ok(())
    })
    .unwrap();

    let a = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    let b = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();

    let run_a = h.dispatcher.pop().unwrap();
    let run_b = h.dispatcher.pop().unwrap();
    let (res_a, res_b) = tokio::join!(
        h.orchestrator.advance(run_a.job_id, run_a.attempt),
        h.orchestrator.advance(run_b.job_id, run_b.attempt),
    );
    res_a.unwrap();
    res_b.unwrap();

    let statuses = [
        h.db.get_job(a.job_id).unwrap().status,
        h.db.get_job(b.job_id).unwrap().status,
    ];
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == JobStatus::Completed)
            .count(),
        1
    );
    assert_eq!(
        statuses.iter().filter(|s| **s == JobStatus::Failed).count(),
        1
    );

    assert!(h.storage_used() <= 1000);
    assert_eq!(h.storage_used(), 600);
    assert_eq!(store.object_count(), 1);

    // Both charges stick: one job succeeded, the other lost the quota race
    assert_eq!(h.credits(), 20);
}

#[tokio::test]
async fn test_deadline_breach_fails_with_refund() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(500, None)]));
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    assert_eq!(h.credits(), 60);

    // Age the job past the default 600s wall-clock limit
    h.db.update_job(receipt.job_id, |j| {
        j.created_at = chrono::Utc::now() - chrono::Duration::seconds(700);
    })
    .unwrap();

    h.run_to_completion().await;

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("deadline"));

    // The provider was never invoked and the reservation came back
    assert_eq!(provider.calls(), 0);
    assert_eq!(h.credits(), 100);
}

#[tokio::test]
async fn test_fits_within_quota() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(400 * 1024, None)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 100);

    h.db.update_user(h.user_id, |u| {
        u.storage_quota_bytes = 500 * 1024;
        Ok(())
    })
    .unwrap();

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    assert_eq!(
        h.db.get_job(receipt.job_id).unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(h.storage_used(), 400 * 1024);
}

#[tokio::test]
async fn test_duplicate_dispatch_is_idempotent() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(500, None)]));
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();

    h.orchestrator.advance(receipt.job_id, 0).await.unwrap();
    // Replay of the same dispatch is a no-op against the completed job
    h.orchestrator.advance(receipt.job_id, 0).await.unwrap();

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.artifact_ids.len(), 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(h.credits(), 60);
}

#[tokio::test]
async fn test_stale_attempt_is_skipped() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(500, None)]));
    let h = Harness::new(provider.clone(), Arc::new(ScriptedStore::new()), 100);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();

    // A dispatch from a retry epoch the job never reached does nothing
    h.orchestrator.advance(receipt.job_id, 3).await.unwrap();

    let job = h.db.get_job(receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_read_side_scoped_to_owner() {
    let provider = Arc::new(ScriptedProvider::always(vec![png_image(500, None)]));
    let h = Harness::new(provider, Arc::new(ScriptedStore::new()), 100);

    let other = pixelforge::model::User::new("user_other".into(), "o@example.com".into());
    h.db.insert_user(other);

    let receipt = h
        .orchestrator
        .create_job("user_test", request("flux-klein", 1))
        .unwrap();
    h.run_to_completion().await;

    assert!(h
        .orchestrator
        .get_job_for("user_test", receipt.job_id)
        .is_ok());
    assert!(matches!(
        h.orchestrator.get_job_for("user_other", receipt.job_id),
        Err(AppError::NotFound(_))
    ));

    let job = h.db.get_job(receipt.job_id).unwrap();
    let artifact_id = job.artifact_ids[0];
    assert!(matches!(
        h.orchestrator.get_artifact_for("user_other", artifact_id),
        Err(AppError::NotFound(_))
    ));

    // Public artifacts are readable by anyone and count views
    h.db.update_artifact(artifact_id, |a| a.is_public = true)
        .unwrap();
    let seen = h
        .orchestrator
        .get_artifact_for("user_other", artifact_id)
        .unwrap();
    assert_eq!(seen.views, 1);
}
