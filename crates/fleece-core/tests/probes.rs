mod common;

use common::{cache, key, TestLoader};
use fleece_core::{Probes, Readiness};
use std::sync::Arc;

#[tokio::test]
async fn test_ready_without_default_model() {
    let loader = Arc::new(TestLoader::new());
    let probes = Probes::new(cache(2, Arc::clone(&loader)), None);

    assert!(probes.healthy());
    assert!(probes.ready().await.is_ready());
    assert_eq!(loader.load_count(), 0);
}

#[tokio::test]
async fn test_readiness_recovers_after_load_failure() {
    let loader = Arc::new(TestLoader::new());
    loader.set_failing(true);
    let cache = cache(2, Arc::clone(&loader));
    let probes = Probes::new(Arc::clone(&cache), Some(key("default")));

    match probes.ready().await {
        Readiness::NotReady { error } => assert_eq!(error.model_name, "default"),
        other => panic!("expected not ready, got {other:?}"),
    }
    // Liveness is unaffected
    assert!(probes.healthy());
    assert!(!cache.contains(&key("default")));

    loader.set_failing(false);
    match probes.ready().await {
        Readiness::Ready { message } => assert!(message.contains("(loaded)"), "{message}"),
        other => panic!("expected ready, got {other:?}"),
    }
    match probes.ready().await {
        Readiness::Ready { message } => assert!(message.contains("(cached)"), "{message}"),
        other => panic!("expected ready, got {other:?}"),
    }
    assert_eq!(loader.load_count(), 2);
}
