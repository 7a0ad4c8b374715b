mod common;

use std::sync::Arc;
use parking_lot::Mutex;
use video_uploader::core::{
    CancellationRegistry,
    LocalFile,
    ProgressCallback,
    TransferProgress,
    UploadError,
    UploadMode,
    UploadOutcome,
    UploadState,
    VideoId,
};
use common::{
    create_test_file,
    remove_test_file,
    settle_background_reports,
    test_config,
    Call,
    Harness,
    MockBackend,
    MockStorage,
};

fn collecting_callback() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressCallback = Arc::new(move |progress| sink.lock().push(progress));
    (callback, events)
}

#[tokio::test]
async fn test_mode_follows_threshold() {
    let harness = Harness::simple(test_config(1000, 400));

    for size in [0, 1, 999, 1000] {
        assert_eq!(harness.orchestrator.select_mode(size), UploadMode::Single);
    }
    for size in [1001, 5000, u64::MAX] {
        assert_eq!(harness.orchestrator.select_mode(size), UploadMode::Multipart);
    }

    let at_threshold = create_test_file("threshold-exact.mp4", 1000).await;
    let above = create_test_file("threshold-above.mp4", 1001).await;

    let file = LocalFile::open(&at_threshold).await.unwrap();
    let outcome = harness.orchestrator.upload(file, None).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));

    let file = LocalFile::open(&above).await.unwrap();
    let outcome = harness.orchestrator.upload(file, None).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));

    assert_eq!(harness.backend.count(|call| *call == Call::SingleUploadUrl), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::InitiateMultipart), 1);

    remove_test_file(&at_threshold).await;
    remove_test_file(&above).await;
}

#[tokio::test]
async fn test_single_upload_lifecycle() {
    let harness = Harness::simple(test_config(10 * 1024 * 1024, 1024 * 1024));
    let path = create_test_file("single-lifecycle.mp4", 300 * 1024).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    assert_eq!(task.mode, UploadMode::Single);
    assert_eq!(task.state, UploadState::Negotiating);

    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    let UploadOutcome::Completed(record) = outcome else {
        panic!("expected completed upload");
    };

    assert_eq!(record.id, task.video_id);
    assert_eq!(task.state, UploadState::Done);
    assert_eq!(task.bytes_transferred, 300 * 1024);
    assert!(task.completed_at.is_some());

    let puts = harness.storage.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].content_length, 300 * 1024);
    assert_eq!(puts[0].received, 300 * 1024);
    assert_eq!(puts[0].content_type, "video/mp4");

    let expected_key = format!("videos/{}/{}", task.video_id, task.file.name);
    assert_eq!(task.object_key.as_deref(), Some(expected_key.as_str()));
    assert!(harness.backend.calls().contains(&Call::Confirm { object_key: expected_key }));
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 0);
    assert!(harness.registry.is_empty());

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_multipart_parts_are_ordered() {
    let harness = Harness::simple(test_config(1000, 1000));
    let path = create_test_file("multipart-ordered.mp4", 2500).await;

    let file = LocalFile::open(&path).await.unwrap();
    let outcome = harness.orchestrator.upload(file, None).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));

    let parts = harness.backend.completed_parts().unwrap();
    let numbers: Vec<u32> = parts.iter().map(|part| part.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let etags: Vec<&str> = parts.iter().map(|part| part.etag.as_str()).collect();
    assert_eq!(etags, vec!["etag-1", "etag-2", "etag-3"]);

    let lengths: Vec<u64> = harness.storage.puts().iter().map(|put| put.received).collect();
    assert_eq!(lengths, vec![1000, 1000, 500]);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_three_part_scenario() {
    const KIB: u64 = 1024;
    let harness = Harness::simple(test_config(100 * KIB, 100 * KIB));
    let path = create_test_file("multipart-scenario.mov", 250 * 1024).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    assert_eq!(task.mode, UploadMode::Multipart);

    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));
    assert_eq!(task.state, UploadState::Done);

    assert_eq!(harness.backend.part_url_requests(), vec![1, 2, 3]);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Complete(_))), 1);

    let puts = harness.storage.puts();
    assert_eq!(puts.len(), 3);
    let lengths: Vec<u64> = puts.iter().map(|put| put.content_length).collect();
    assert_eq!(lengths, vec![100 * KIB, 100 * KIB, 50 * KIB]);
    assert!(puts[2].url.ends_with("/part/3"));
    assert!(puts.iter().all(|put| put.content_type == "video/quicktime"));

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_before_put() {
    let harness = Harness::simple(test_config(10_000, 1000));
    let path = create_test_file("cancel-before-put.mp4", 5000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    harness.orchestrator.cancel(&task.video_id).await;

    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Cancelled(task.video_id.clone()));
    assert_eq!(task.state, UploadState::Cancelled);

    assert_eq!(harness.storage.started(), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::NotifyCancel), 1);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Confirm { .. })), 0);
    assert!(!harness.registry.is_cancelled(&task.video_id));

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_before_first_part() {
    let harness = Harness::simple(test_config(1000, 1000));
    let path = create_test_file("cancel-before-part.mp4", 3000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    harness.orchestrator.cancel(&task.video_id).await;

    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    assert!(outcome.is_cancelled());

    assert_eq!(harness.storage.started(), 0);
    assert!(harness.backend.part_url_requests().is_empty());
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_mid_part() {
    let registry = Arc::new(CancellationRegistry::new());
    // 第一个 initiate 返回 video-1
    let storage = MockStorage::new().cancel_during(registry.clone(), VideoId::new("video-1"), 2);
    let harness = Harness::new(MockBackend::new(), storage, registry, test_config(1000, 1000));
    let path = create_test_file("cancel-mid-part.mp4", 3000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    assert_eq!(task.video_id, VideoId::new("video-1"));

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        harness.orchestrator.run(&mut task, None),
    )
    .await
    .expect("cancel should interrupt the stalled PUT")
    .unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(task.state, UploadState::Cancelled);
    assert_eq!(task.bytes_transferred, 1000);
    assert_eq!(harness.backend.part_url_requests(), vec![1, 2]);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Complete(_))), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);
    assert!(harness.registry.is_empty());

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_mid_single_put() {
    let registry = Arc::new(CancellationRegistry::new());
    let storage = MockStorage::new().cancel_during(registry.clone(), VideoId::new("video-1"), 1);
    let harness = Harness::new(MockBackend::new(), storage, registry, test_config(10_000, 1000));
    let path = create_test_file("cancel-mid-single.mp4", 4000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        harness.orchestrator.upload(file, None),
    )
    .await
    .expect("cancel should interrupt the stalled PUT")
    .unwrap();

    assert_eq!(outcome, UploadOutcome::Cancelled(VideoId::new("video-1")));
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Confirm { .. })), 0);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_after_second_of_three_parts() {
    let registry = Arc::new(CancellationRegistry::new());
    let storage = MockStorage::new().cancel_after(registry.clone(), VideoId::new("video-1"), 2);
    let harness = Harness::new(MockBackend::new(), storage, registry, test_config(1000, 1000));
    let path = create_test_file("cancel-after-part-2.mp4", 2500).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(task.state, UploadState::Cancelled);
    assert_eq!(harness.storage.started(), 2);
    assert_eq!(harness.backend.part_url_requests(), vec![1, 2]);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Complete(_))), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_reaches_100() {
    let harness = Harness::simple(test_config(1000, 700));
    let path = create_test_file("progress-monotonic.mp4", 5000).await;

    let (callback, events) = collecting_callback();
    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    harness.orchestrator.run(&mut task, Some(callback)).await.unwrap();

    let events = events.lock().clone();
    assert!(!events.is_empty());
    assert!(events.windows(2).all(|pair| pair[0].loaded < pair[1].loaded));
    assert!(events.windows(2).all(|pair| pair[0].percent() <= pair[1].percent()));

    let last = events.last().unwrap();
    assert_eq!(last.loaded, 5000);
    assert_eq!(last.percent(), 100);
    assert_eq!(task.last_reported_percent, Some(100));

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_backend_progress_reports_are_throttled() {
    // 250 个分片，每片 0.4%
    let harness = Harness::simple(test_config(100, 100));
    let path = create_test_file("progress-throttled.mp4", 25_000).await;

    let file = LocalFile::open(&path).await.unwrap();
    harness.orchestrator.upload(file, None).await.unwrap();
    settle_background_reports().await;

    let mut reports = harness.backend.progress_reports();
    assert!(reports.len() <= 101, "got {} reports", reports.len());

    let total = reports.len();
    reports.sort_unstable();
    reports.dedup();
    assert_eq!(reports.len(), total, "each percent reported at most once");
    assert_eq!(reports.last(), Some(&100));

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_missing_etag_fails_upload() {
    let storage = MockStorage::new().omit_etag_on(2);
    let harness = Harness::new(
        MockBackend::new(),
        storage,
        Arc::new(CancellationRegistry::new()),
        test_config(1000, 1000),
    );
    let path = create_test_file("missing-etag.mp4", 3000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    let result = harness.orchestrator.run(&mut task, None).await;

    assert!(matches!(result, Err(UploadError::MissingETag { part_number: 2 })));
    assert_eq!(task.state, UploadState::Failed);
    assert!(task.error.is_some());
    assert_eq!(task.bytes_transferred, 1000);
    assert_eq!(harness.backend.part_url_requests(), vec![1, 2]);
    assert_eq!(harness.backend.count(|call| matches!(call, Call::Complete(_))), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_negotiation_failure_marks_record_failed() {
    let harness = Harness::new(
        MockBackend::new().failing("presigned"),
        MockStorage::new(),
        Arc::new(CancellationRegistry::new()),
        test_config(10_000, 1000),
    );
    let path = create_test_file("negotiation-failure.mp4", 100).await;

    let file = LocalFile::open(&path).await.unwrap();
    let result = harness.orchestrator.upload(file, None).await;

    assert!(matches!(result, Err(UploadError::Negotiation { status: 500, .. })));
    assert_eq!(harness.storage.started(), 0);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_confirm_failure_marks_record_failed() {
    let harness = Harness::new(
        MockBackend::new().failing("confirm"),
        MockStorage::new(),
        Arc::new(CancellationRegistry::new()),
        test_config(10_000, 1000),
    );
    let path = create_test_file("confirm-failure.mp4", 100).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    let result = harness.orchestrator.run(&mut task, None).await;

    assert!(result.is_err());
    assert_eq!(task.state, UploadState::Failed);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);
    assert!(harness.registry.is_empty());

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cleanup_errors_are_swallowed() {
    let harness = Harness::new(
        MockBackend::new().failing("abort").failing("fail").failing("cancel"),
        MockStorage::new(),
        Arc::new(CancellationRegistry::new()),
        test_config(1000, 1000),
    );
    let path = create_test_file("cleanup-errors.mp4", 3000).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    harness.orchestrator.cancel(&task.video_id).await;

    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(harness.backend.count(|call| *call == Call::Abort), 1);
    assert_eq!(harness.backend.count(|call| *call == Call::Fail), 1);

    remove_test_file(&path).await;
}

#[tokio::test]
async fn test_cancel_after_completion_is_ignored() {
    let harness = Harness::simple(test_config(10_000, 1000));
    let path = create_test_file("cancel-after-completion.mp4", 500).await;

    let file = LocalFile::open(&path).await.unwrap();
    let mut task = harness.orchestrator.prepare(file).await.unwrap();
    let outcome = harness.orchestrator.run(&mut task, None).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(_)));

    assert!(!harness.orchestrator.cancel(&task.video_id).await);
    assert!(!harness.registry.is_cancelled(&task.video_id));
    assert!(harness.registry.is_empty());
    assert_eq!(harness.backend.count(|call| *call == Call::NotifyCancel), 0);

    // 从未创建过的记录同样忽略
    assert!(!harness.orchestrator.cancel(&VideoId::new("unknown")).await);
    assert!(harness.registry.is_empty());

    remove_test_file(&path).await;
}
