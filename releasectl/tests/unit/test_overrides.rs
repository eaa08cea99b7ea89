//! Override file cache tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use releasectl::cache::OverrideFileCache;
use releasectl::filesys::Dir;

fn temp_dir() -> Dir {
    Dir::new(std::env::temp_dir().join(format!("overrides-test-{}", uuid::Uuid::new_v4())))
}

#[tokio::test]
async fn test_identical_content_shares_one_file() {
    let dir = temp_dir();
    let cache = OverrideFileCache::new(dir.clone(), Duration::from_secs(1800));

    let a = cache.materialize("replicas: 3\n").await.unwrap();
    let b = cache.materialize("replicas: 3\n").await.unwrap();
    let c = cache.materialize("replicas: 4\n").await.unwrap();

    assert_eq!(a.path(), b.path());
    assert_ne!(a.path(), c.path());
    assert_eq!(a.read_string().await.unwrap(), "replicas: 3\n");
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.path_for("replicas: 3\n").path(), a.path());
    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_writers_of_same_content() {
    let dir = temp_dir();
    let cache = Arc::new(OverrideFileCache::new(dir.clone(), Duration::from_secs(1800)));
    let content = "image:\n  tag: 1.4.2\n".repeat(200);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let content = content.clone();
        handles.push(tokio::spawn(async move {
            cache.materialize(&content).await.unwrap()
        }));
    }
    let mut paths = Vec::new();
    for handle in handles {
        paths.push(handle.await.unwrap().path().to_path_buf());
    }

    paths.dedup();
    assert_eq!(paths.len(), 1);
    assert_eq!(tokio::fs::read_to_string(&paths[0]).await.unwrap(), content);

    // No temp files left behind
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut count = 0;
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 1);
    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_materialize_all_skips_blank_entries() {
    let dir = temp_dir();
    let cache = OverrideFileCache::new(dir.clone(), Duration::from_secs(1800));

    let files = cache
        .materialize_all(&["a: 1".to_string(), " \n".to_string(), "b: 2".to_string()])
        .await
        .unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].read_string().await.unwrap(), "b: 2");
    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_idle_entries_are_evicted_with_their_file() {
    let dir = temp_dir();
    let cache = OverrideFileCache::new(dir.clone(), Duration::from_secs(60));
    let file = cache.materialize("a: 1").await.unwrap();

    assert_eq!(cache.evict_idle(Instant::now()), 0);
    assert!(file.exists().await);

    assert_eq!(cache.evict_idle(Instant::now() + Duration::from_secs(120)), 1);
    assert!(cache.is_empty());
    assert!(!file.exists().await);

    // A later request writes the file again
    let again = cache.materialize("a: 1").await.unwrap();
    assert_eq!(again.path(), file.path());
    assert!(again.exists().await);
    dir.delete().await.unwrap();
}
