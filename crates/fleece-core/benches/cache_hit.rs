use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleece_core::loader::EchoLoader;
use fleece_core::{
    CacheConfig, CacheKey, Inputs, ModelCache, NoopRecorder, Options, Orchestrator, PredictionRequest,
    PrometheusRecorder,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_cache(capacity: usize) -> Arc<ModelCache> {
    let config = CacheConfig {
        capacity,
        ..CacheConfig::default()
    };
    Arc::new(ModelCache::new(&config, Arc::new(EchoLoader::new()), Arc::new(NoopRecorder)).unwrap())
}

/// Lookups of an entry that is already cached
fn bench_cache_hit(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache_hit");

    for &size in &[1usize, 10, 100] {
        let cache = build_cache(size);
        let keys: Vec<CacheKey> = (0..size)
            .map(|i| CacheKey::new(format!("model-{i}"), "sentiment-analysis", -1))
            .collect();
        runtime.block_on(async {
            for key in &keys {
                cache.get_or_load(key).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                runtime.block_on(async { black_box(cache.get_or_load(key).await.unwrap()) })
            });
        });
    }

    group.finish();
}

/// Full orchestrated request on a warm cache, with Prometheus recording
fn bench_warm_request(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let metrics = Arc::new(PrometheusRecorder::new());
    let config = CacheConfig::default();
    let cache = Arc::new(ModelCache::new(&config, Arc::new(EchoLoader::new()), metrics.clone()).unwrap());
    let orchestrator = Orchestrator::new(cache, metrics, -1);

    let request = PredictionRequest {
        model_name: "distilbert".to_string(),
        task: "sentiment-analysis".to_string(),
        inputs: Inputs::Batch(vec!["great".into(), "awful".into()]),
        pipeline_kwargs: Options::new(),
    };
    runtime.block_on(orchestrator.handle(request.clone())).unwrap();

    c.bench_function("warm_request", |b| {
        b.iter(|| runtime.block_on(orchestrator.handle(black_box(request.clone()))).unwrap())
    });
}

criterion_group!(benches, bench_cache_hit, bench_warm_request);
criterion_main!(benches);
