mod common;

use codethreat_cli::scan::submit;
use codethreat_cli::ScanError;
use common::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn submit_returns_job_and_removes_archive() {
    let mock = MockService::new().start_reply(200, json!({ "scanId": "job-42" }));
    let addr = mock.spawn().await;
    let (tmp, src) = source_tree(&[("main.py", "print('hi')"), ("pkg/util.py", "x = 1")]);

    let before = chrono::Utc::now();
    let job = submit(&client_for(addr), "proj", &src, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.id, "job-42");
    assert_eq!(job.project_key, "proj");
    assert!(job.created_at >= before);
    assert!(leftover_archives(&tmp).is_empty());
    let files = unzip(&mock.uploads()[0].archive);
    assert!(files.contains(&("pkg/util.py".to_string(), "x = 1".to_string())), "{files:?}");
}

#[tokio::test]
async fn reply_with_both_scan_id_and_id_uses_scan_id() {
    let mock = MockService::new().start_reply(200, json!({ "scanId": "abc", "id": 7 }));
    let addr = mock.spawn().await;
    let (tmp, src) = source_tree(&[("a", "1")]);

    let job = submit(&client_for(addr), "proj", &src, &CancellationToken::new()).await.unwrap();

    assert_eq!(job.id, "abc");
    assert_eq!(mock.start_calls(), 1);
    assert!(leftover_archives(&tmp).is_empty());
}

#[tokio::test]
async fn missing_scan_id_is_protocol_error_and_still_cleans_up() {
    let mock = MockService::new().start_reply(200, json!({ "message": "accepted" }));
    let addr = mock.spawn().await;
    let (tmp, src) = source_tree(&[("a", "1")]);

    let err = submit(&client_for(addr), "proj", &src, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ScanError::Protocol(_)), "got {err:?}");
    assert!(leftover_archives(&tmp).is_empty());
}

#[tokio::test]
async fn unreachable_service_is_transport_error_and_still_cleans_up() {
    let addr = dead_addr().await;
    let (tmp, src) = source_tree(&[("a", "1")]);

    let err = submit(&client_for(addr), "proj", &src, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ScanError::Transport { .. }), "got {err:?}");
    assert!(err.is_retryable());
    assert!(leftover_archives(&tmp).is_empty());
}

#[tokio::test]
async fn cancelled_submit_sends_nothing() {
    let mock = MockService::new();
    let addr = mock.spawn().await;
    let (tmp, src) = source_tree(&[("a", "1")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = submit(&client_for(addr), "proj", &src, &cancel).await.unwrap_err();

    assert!(matches!(err, ScanError::Cancelled { job_id: None, .. }), "got {err:?}");
    assert_eq!(mock.start_calls(), 0);
    // The blocking archive task may still be winding down; give it a moment.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(leftover_archives(&tmp).is_empty());
}
