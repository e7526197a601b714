//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use parcel::transfer::RetryPolicy;

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 251) as u8).collect()
}

/// Retry policy with millisecond backoff so failure tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Leftover `.parcel-*.partial` staging files in `dir`
pub fn staged_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(".parcel-"))
                .unwrap_or(false)
        })
        .collect()
}
