//! End-to-end request orchestration against the cache and a Prometheus recorder

mod common;

use common::{cache_with_metrics, key, TestLoader};
use fleece_core::metrics::{HANDLE_WAIT_TIME, INFERENCE_LATENCY, MODEL_LOAD_TIME, REQUEST_TOTAL_LATENCY};
use fleece_core::{
    InvocationError, Inputs, Options, Orchestrator, Phase, PredictionRequest, PrometheusRecorder,
    RequestError, ServedFrom,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn setup(capacity: usize) -> (Arc<TestLoader>, Arc<PrometheusRecorder>, Orchestrator) {
    let loader = Arc::new(TestLoader::new());
    let metrics = Arc::new(PrometheusRecorder::new());
    let cache = cache_with_metrics(capacity, Arc::clone(&loader), metrics.clone());
    let orchestrator = Orchestrator::new(cache, metrics.clone(), 0);
    (loader, metrics, orchestrator)
}

fn request(model: &str, inputs: Inputs, kwargs: serde_json::Value) -> PredictionRequest {
    let pipeline_kwargs: Options = serde_json::from_value(kwargs).unwrap();
    PredictionRequest {
        model_name: model.to_string(),
        task: "t".to_string(),
        inputs,
        pipeline_kwargs,
    }
}

#[tokio::test]
async fn test_first_request_loads_second_is_cached() {
    let (loader, metrics, orchestrator) = setup(2);

    let first = orchestrator
        .handle(request("bert", Inputs::from("hello"), json!({})))
        .await
        .unwrap();
    assert_eq!(first.served_from, ServedFrom::Loaded);
    assert!(!first.pipeline_from_lru_cache);
    assert_eq!(first.worker_pid, fleece_core::worker_pid());
    assert!(first.total_request_time_ms >= first.inference_execution_time_ms);

    let second = orchestrator
        .handle(request("bert", Inputs::from("again"), json!({"max_length": 5})))
        .await
        .unwrap();
    assert_eq!(second.served_from, ServedFrom::Hit);
    assert!(second.pipeline_from_lru_cache);
    assert_eq!(second.predictions, json!({ "handle": 1, "items": 1 }));

    assert_eq!(loader.load_count(), 1);
    assert_eq!(metrics.request_count("bert", "t", 200), 2);
    assert_eq!(metrics.observation_count(MODEL_LOAD_TIME, "bert", "t"), 1);
    assert_eq!(metrics.observation_count(HANDLE_WAIT_TIME, "bert", "t"), 2);
    assert_eq!(metrics.observation_count(INFERENCE_LATENCY, "bert", "t"), 2);
    assert_eq!(metrics.observation_count(REQUEST_TOTAL_LATENCY, "bert", "t"), 2);
}

#[tokio::test]
async fn test_batch_inputs_reach_the_handle() {
    let (_loader, _metrics, orchestrator) = setup(2);
    let batch = Inputs::Batch(vec!["a".into(), "b".into(), "c".into()]);

    let result = orchestrator.handle(request("bert", batch, json!({}))).await.unwrap();
    assert_eq!(result.predictions["items"], 3);
}

#[tokio::test]
async fn test_bad_option_is_invocation_error_and_handle_stays_cached() {
    let (loader, metrics, orchestrator) = setup(2);

    orchestrator
        .handle(request("bert", Inputs::from("warm up"), json!({})))
        .await
        .unwrap();

    let err = orchestrator
        .handle(request("bert", Inputs::from("x"), json!({"bogus_option": true})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    match &err {
        RequestError::Invocation { model_name, source } => {
            assert_eq!(model_name, "bert");
            assert!(matches!(source, InvocationError::InvalidOptions(msg) if msg.contains("bogus_option")));
        }
        other => panic!("expected invocation error, got {other:?}"),
    }

    let lookup = orchestrator.cache().get_or_load(&key("bert")).await.unwrap();
    assert_eq!(lookup.served_from, ServedFrom::Hit);
    assert_eq!(loader.load_count(), 1);
    assert_eq!(metrics.request_count("bert", "t", 500), 1);
    assert_eq!(metrics.request_count("bert", "t", 200), 1);
}

#[tokio::test]
async fn test_load_failure_is_counted_and_not_cached() {
    let (loader, metrics, orchestrator) = setup(2);
    loader.set_failing(true);

    let err = orchestrator
        .handle(request("ghost", Inputs::from("x"), json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Load(_)));
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().contains("ghost"));

    assert_eq!(metrics.request_count("ghost", "t", 400), 1);
    assert_eq!(metrics.observation_count(REQUEST_TOTAL_LATENCY, "ghost", "t"), 1);
    assert_eq!(metrics.observation_count(INFERENCE_LATENCY, "ghost", "t"), 0);
    assert!(!orchestrator.cache().contains(&key("ghost")));

    loader.set_failing(false);
    let result = orchestrator
        .handle(request("ghost", Inputs::from("x"), json!({})))
        .await
        .unwrap();
    assert_eq!(result.served_from, ServedFrom::Loaded);
    assert_eq!(loader.load_count(), 2);
}

#[tokio::test]
async fn test_invalid_request_never_touches_the_cache() {
    let (loader, metrics, orchestrator) = setup(2);

    let err = orchestrator
        .handle(request("bert", Inputs::Batch(Vec::new()), json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::InvalidRequest(_)));
    assert_eq!(loader.load_count(), 0);
    assert_eq!(metrics.request_count("bert", "t", 400), 1);
}

#[tokio::test]
async fn test_invoke_timeout_leaves_handle_cached() {
    let (loader, metrics, orchestrator) = setup(2);
    let orchestrator = orchestrator.with_invoke_timeout(Some(Duration::from_millis(50)));

    let err = orchestrator
        .handle(request("slow", Inputs::from("x"), json!({"sleep_ms": 5_000})))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout { phase: Phase::Invoke, .. }));
    assert_eq!(err.status_code(), 504);
    assert_eq!(metrics.request_count("slow", "t", 504), 1);

    assert!(orchestrator.cache().contains(&key("slow")));
    let result = orchestrator
        .handle(request("slow", Inputs::from("x"), json!({})))
        .await
        .unwrap();
    assert_eq!(result.served_from, ServedFrom::Hit);
    assert_eq!(loader.load_count(), 1);
}

#[tokio::test]
async fn test_request_timeout_is_counted_and_load_continues() {
    let loader = Arc::new(TestLoader::gated());
    let metrics = Arc::new(PrometheusRecorder::new());
    let cache = cache_with_metrics(2, Arc::clone(&loader), metrics.clone());
    let orchestrator = Orchestrator::new(cache, metrics.clone(), 0)
        .with_request_timeout(Some(Duration::from_millis(50)));

    let err = orchestrator
        .handle(request("stuck", Inputs::from("x"), json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout { phase: Phase::Request, .. }));
    assert_eq!(err.code(), "REQUEST_TIMEOUT");
    assert_eq!(metrics.request_count("stuck", "t", 504), 1);
    assert_eq!(metrics.observation_count(REQUEST_TOTAL_LATENCY, "stuck", "t"), 1);

    // The abandoned load still completes and is cached
    assert_eq!(orchestrator.cache().stats().in_flight, 1);
    loader.release(1);
    let result = orchestrator
        .handle(request("stuck", Inputs::from("x"), json!({})))
        .await
        .unwrap();
    assert_ne!(result.served_from, ServedFrom::Loaded);
    assert_eq!(loader.load_count(), 1);
}

#[tokio::test]
async fn test_panicking_handle_is_internal_error() {
    let (_loader, metrics, orchestrator) = setup(2);

    let err = orchestrator
        .handle(request("fragile", Inputs::from("x"), json!({"panic": true})))
        .await
        .unwrap_err();
    match &err {
        RequestError::Internal(msg) => assert!(msg.contains("scripted panic")),
        other => panic!("expected internal error, got {other:?}"),
    }
    assert_eq!(metrics.request_count("fragile", "t", 500), 1);

    // Still usable afterwards
    let result = orchestrator
        .handle(request("fragile", Inputs::from("x"), json!({})))
        .await
        .unwrap();
    assert_eq!(result.served_from, ServedFrom::Hit);
}

#[tokio::test]
async fn test_eviction_through_requests() {
    let (loader, _metrics, orchestrator) = setup(2);

    for model in ["a", "b", "c", "b", "d"] {
        orchestrator
            .handle(request(model, Inputs::from("x"), json!({})))
            .await
            .unwrap();
    }

    let cache = orchestrator.cache();
    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, vec![key("b"), key("d")]);
    assert_eq!(cache.stats().evictions, 2);
    assert_eq!(loader.load_count(), 4);
}

#[tokio::test]
async fn test_rendered_metrics_carry_request_labels() {
    let (_loader, metrics, orchestrator) = setup(2);
    orchestrator
        .handle(request("bert", Inputs::from("x"), json!({})))
        .await
        .unwrap();

    let text = metrics.render();
    let expected = format!(
        "hf_requests_total{{model_name=\"bert\",task=\"t\",worker_pid=\"{}\",http_status=\"200\"}} 1",
        fleece_core::worker_pid()
    );
    assert!(text.contains(&expected), "{text}");
    assert!(text.contains("hf_model_load_time_seconds_count{model_name=\"bert\",task=\"t\"} 1"));
}
