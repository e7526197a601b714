mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_retry, payload, staged_files};
use parcel::error::{TransferError, EXIT_FATAL, EXIT_INTEGRITY};
use parcel::protocol::{MemoryStore, StoreError, StoreOp};
use parcel::transfer::{
    EncryptionContext, ProgressEvent, ProgressReporter, Strategy, StrategyOverride, TransferJob,
    TransferRequest, TransferStatus, KIB, MIB,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_chunked_download_reassembles_out_of_order_parts() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("copy.bin");
    let data = payload((8 * KIB + 100) as usize);
    let store = MemoryStore::new();
    store.insert_object("archive.tar", data.clone());
    // The first range fails once, so later ranges land before it
    store.fail_read_at(0, StoreError::Network("connection reset".to_string()), 1);

    let request = TransferRequest::download("archive.tar", &dest)
        .with_chunk_size(KIB)
        .with_workers(4)
        .with_retry_policy(fast_retry());
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);
    assert_eq!(result.strategy, Some(Strategy::Chunked));
    assert_eq!(result.parts, 9);
    assert_eq!(result.bytes_transferred, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(store.call_count(StoreOp::GetRange), 10);
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_forced_chunked_small_object() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("small.bin");
    let data = payload(KIB as usize);
    let store = MemoryStore::new();
    store.insert_object("small.bin", data.clone());

    let request = TransferRequest::download("small.bin", &dest)
        .with_strategy(StrategyOverride::ForceChunked);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);
    assert_eq!(result.strategy, Some(Strategy::Chunked));
    assert_eq!(result.parts, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_overwrite_during_download_is_detected() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("report.csv");
    let store = MemoryStore::new();
    store.insert_object("report.csv", payload((4 * KIB) as usize));
    store.schedule_overwrite(1, "report.csv", payload((4 * KIB) as usize + 1));

    let request = TransferRequest::download("report.csv", &dest)
        .with_chunk_size(KIB)
        .with_workers(1);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert!(matches!(
        result.error,
        Some(TransferError::InconsistentSource(_))
    ));
    assert_eq!(result.exit_code(), EXIT_INTEGRITY);
    assert!(!dest.exists());
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_versioned_source_survives_overwrite() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("report.csv");
    let original = payload((4 * KIB) as usize);
    let store = MemoryStore::new().with_versioning();
    store.insert_object("report.csv", original.clone());
    store.schedule_overwrite(2, "report.csv", vec![0u8; 10]);

    let request = TransferRequest::download("report.csv", &dest)
        .with_chunk_size(KIB)
        .with_workers(1);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);
    assert_eq!(std::fs::read(&dest).unwrap(), original);
    assert_eq!(store.object("report.csv").unwrap().len(), 10);
}

#[tokio::test]
async fn test_chunked_download_refuses_unpinned_source() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.bin");
    let store = MemoryStore::new().without_stable_handles();
    store.insert_object("out.bin", payload((3 * KIB) as usize));

    let request = TransferRequest::download("out.bin", &dest).with_chunk_size(KIB);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert!(matches!(
        result.error,
        Some(TransferError::InconsistentSource(_))
    ));
    assert_eq!(store.call_count(StoreOp::GetRange), 0);
    assert!(!dest.exists());
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_single_shot_download_allows_unpinned_source() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.bin");
    let data = payload(600);
    let store = MemoryStore::new().without_stable_handles();
    store.insert_object("out.bin", data.clone());

    let request = TransferRequest::download("out.bin", &dest).with_chunk_size(KIB);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);
    assert_eq!(result.strategy, Some(Strategy::SingleShot));
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(store.call_count(StoreOp::GetRange), 1);
}

#[tokio::test]
async fn test_zero_length_object_makes_no_reads() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("nested/empty.txt");
    let store = MemoryStore::new();
    store.insert_object("empty.txt", Vec::<u8>::new());

    let request = TransferRequest::download("empty.txt", &dest);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);
    assert_eq!(store.call_count(StoreOp::GetRange), 0);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
}

#[tokio::test]
async fn test_failed_download_keeps_existing_file() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("keep.bin");
    std::fs::write(&dest, b"previous contents").unwrap();
    let store = MemoryStore::new();
    store.insert_object("keep.bin", payload((4 * KIB) as usize));
    store.fail_read_at(2 * KIB, StoreError::AccessDenied("denied".to_string()), 1);

    let request = TransferRequest::download("keep.bin", &dest).with_chunk_size(KIB);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert!(matches!(result.error, Some(TransferError::Permanent { .. })));
    assert_eq!(std::fs::read(&dest).unwrap(), b"previous contents");
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_object_is_fatal() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("missing.bin");
    let store = MemoryStore::new();

    let request = TransferRequest::download("missing.bin", &dest);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert_eq!(result.status, TransferStatus::Failed);
    assert_eq!(result.exit_code(), EXIT_FATAL);
    assert!(!dest.exists());
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_customer_key_download() {
    let dir = TempDir::new().unwrap();
    let data = payload((3 * KIB) as usize);
    let encryption = EncryptionContext::customer_key(&[7u8; 32]).unwrap();
    let store = MemoryStore::new();
    store.insert_encrypted_object("vault.bin", data.clone(), &encryption);

    let without_key = TransferJob::new(
        TransferRequest::download("vault.bin", dir.path().join("a.bin")),
        Arc::new(store.clone()),
    )
    .run()
    .await;
    assert_eq!(without_key.status, TransferStatus::Failed);
    assert!(!dir.path().join("a.bin").exists());

    let dest = dir.path().join("b.bin");
    let with_key = TransferJob::new(
        TransferRequest::download("vault.bin", &dest)
            .with_chunk_size(KIB)
            .with_encryption(encryption),
        Arc::new(store.clone()),
    )
    .run()
    .await;
    assert_eq!(with_key.status, TransferStatus::Succeeded, "{:?}", with_key.error);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn test_forced_single_shot_over_memory_limit_rejected() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert_object("big.bin", payload((2 * MIB) as usize));

    let request = TransferRequest::download("big.bin", dir.path().join("big.bin"))
        .with_strategy(StrategyOverride::ForceSingle)
        .with_single_shot_limit(MIB);
    let result = TransferJob::new(request, Arc::new(store.clone())).run().await;

    assert!(matches!(
        result.error,
        Some(TransferError::InvalidConfiguration(_))
    ));
    assert_eq!(store.call_count(StoreOp::GetRange), 0);
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancellation_mid_download_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("large.bin");
    let store = MemoryStore::new().with_latency(Duration::from_millis(40));
    store.insert_object("large.bin", payload((20 * KIB) as usize));

    let request = TransferRequest::download("large.bin", &dest)
        .with_chunk_size(KIB)
        .with_workers(2);
    let job = TransferJob::new(request, Arc::new(store.clone()));
    let cancel = job.cancellation_token();
    let handle = tokio::spawn(job.run());

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result.status, TransferStatus::Aborted);
    assert!(store.call_count(StoreOp::GetRange) < 20);
    assert!(!dest.exists());
    assert!(staged_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_progress_events_cover_object() {
    let dir = TempDir::new().unwrap();
    let data = payload((5 * KIB + 3) as usize);
    let store = MemoryStore::new();
    store.insert_object("p.bin", data.clone());
    let (reporter, mut events) = ProgressReporter::new();

    let request = TransferRequest::download("p.bin", dir.path().join("p.bin")).with_chunk_size(KIB);
    let result = TransferJob::new(request, Arc::new(store))
        .with_progress(reporter)
        .run()
        .await;
    assert_eq!(result.status, TransferStatus::Succeeded, "{:?}", result.error);

    let mut part_bytes = 0;
    let mut last_total = 0;
    let mut completed = false;
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::PartCompleted { bytes, .. } => part_bytes += bytes,
            ProgressEvent::Progress {
                bytes_transferred, ..
            } => last_total = last_total.max(bytes_transferred),
            ProgressEvent::TransferCompleted { total_bytes, .. } => {
                assert_eq!(total_bytes, data.len() as u64);
                completed = true;
            }
            _ => {}
        }
    }
    assert_eq!(part_bytes, data.len() as u64);
    assert_eq!(last_total, data.len() as u64);
    assert!(completed);
}
