mod common;

use std::sync::Arc;

use mealcache_core::tier::IMAGES_TIER;
use mealcache_core::{CacheLayer, EvictionManager, FsBackend, ResponseSource};

use common::{config, get, with_tier_limit, ScriptedFetcher, ORIGIN};

#[tokio::test]
async fn eviction_order_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let config = with_tier_limit(config(), IMAGES_TIER, 2);

    {
        let backend = Arc::new(FsBackend::new(dir.path()).unwrap());
        let layer = CacheLayer::new(config.clone(), backend, fetcher.clone()).unwrap();
        for name in ["a", "b", "c"] {
            layer.handle(&get(&format!("{}/img/{}.png", ORIGIN, name))).await;
        }
        layer.settle().await;
    }

    let backend = Arc::new(FsBackend::new(dir.path()).unwrap());
    let layer = CacheLayer::new(config, backend, fetcher.clone()).unwrap();
    let images = layer.tiers().get(IMAGES_TIER).unwrap().clone();
    assert_eq!(
        layer.store().keys(&images).await.unwrap(),
        vec![format!("{}/img/b.png", ORIGIN), format!("{}/img/c.png", ORIGIN)]
    );

    // Trimming a tier already within bounds removes nothing
    let eviction = EvictionManager::new(layer.store().clone());
    assert_eq!(eviction.trim(&images).await.unwrap(), 0);
    assert_eq!(layer.store().keys(&images).await.unwrap().len(), 2);

    fetcher.set_online(false);
    let resp = layer.handle(&get(&format!("{}/img/c.png", ORIGIN))).await;
    assert_eq!(resp.source, ResponseSource::Cache);
    assert_eq!(resp.body_text(), "/img/c.png");
}

#[tokio::test]
async fn install_and_activate_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let backend = Arc::new(FsBackend::new(dir.path()).unwrap());
    let layer = CacheLayer::new(config(), backend, fetcher.clone()).unwrap();

    let report = layer.lifecycle().startup().await.unwrap();
    assert!(report.deleted_namespaces.is_empty());
    assert!(dir.path().join("mealcache-static-v1").is_dir());

    let status = layer.status().await.unwrap();
    assert_eq!(status.total_entries(), 3);
    assert!(status.stale_namespaces.is_empty());
}
