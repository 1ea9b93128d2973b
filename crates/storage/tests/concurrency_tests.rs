// Concurrent writers racing for the same cache entry.
// Exactly one complete source must win and no temporary file may remain.

use peercache_storage::{CacheStore, StorageError, WriteOutcome};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

fn payload(byte: u8) -> Vec<u8> {
    vec![byte; PAYLOAD_SIZE]
}

fn temp_files(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_produce_one_complete_file() {
    for round in 0..10 {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::new(dir.path()).await.unwrap());
        let name = format!("entry{round}");

        let handles: Vec<_> = [b'a', b'b']
            .into_iter()
            .map(|byte| {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let data = payload(byte);
                    store.write(&name, &data[..]).await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let mut stored = 0;
        for result in results {
            match result.unwrap() {
                Ok(WriteOutcome::Stored(n)) => {
                    assert_eq!(n as usize, PAYLOAD_SIZE);
                    stored += 1;
                }
                Ok(WriteOutcome::AlreadyPresent) => {}
                Err(StorageError::WriteInProgress(_)) => {}
                Err(e) => panic!("unexpected write error: {e}"),
            }
        }
        assert_eq!(stored, 1, "exactly one writer should publish the entry");

        let (mut file, size) = store.read(&name).await.unwrap();
        assert_eq!(size as usize, PAYLOAD_SIZE);
        let mut data = Vec::with_capacity(PAYLOAD_SIZE);
        file.read_to_end(&mut data).await.unwrap();
        let first = data[0];
        assert!(first == b'a' || first == b'b');
        assert!(
            data.iter().all(|b| *b == first),
            "entry must contain exactly one source"
        );

        assert!(temp_files(&dir).is_empty(), "temporary file left behind");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_writers_converge() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CacheStore::new(dir.path()).await.unwrap());

    let handles: Vec<_> = (0..16u8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let data = vec![i; 256 * 1024];
                store.write("shared", &data[..]).await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) | Err(StorageError::WriteInProgress(_)) => {}
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }

    assert!(store.exists("shared").await);
    let (_, size) = store.read("shared").await.unwrap();
    assert_eq!(size, 256 * 1024);
    assert!(temp_files(&dir).is_empty());
}
