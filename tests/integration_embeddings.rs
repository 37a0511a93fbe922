#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Embedding provider selection and per-call fallback over mocked HTTP backends

use coach_retrieval::config::{API_KEY_ENV_VAR, Config};
use coach_retrieval::embeddings::{EmbeddingError, EmbeddingProvider};
use serde_json::json;
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

async fn ollama_returning(vector: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [vector] })))
        .mount(&server)
        .await;
    server
}

fn config_for(temp_dir: &TempDir, ollama: &MockServer, remote: Option<&MockServer>) -> Config {
    // SAFETY: tests touching the environment run serially
    unsafe { std::env::remove_var(API_KEY_ENV_VAR) };

    let mut config = Config::default();
    config.base_dir = temp_dir.path().to_path_buf();
    config.embedding.dimension = 8;
    config.ollama.host = ollama.address().ip().to_string();
    config.ollama.port = ollama.address().port();
    if let Some(remote) = remote {
        config.embedding.remote.base_url = remote.uri();
        config.embedding.remote.api_key = Some("test-key".to_string());
    }
    config
}

#[tokio::test]
#[serial]
async fn local_model_only_without_credentials() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let ollama = ollama_returning(json!([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])).await;

    let provider = EmbeddingProvider::from_config(&config_for(&temp_dir, &ollama, None))
        .expect("should build provider");
    assert_eq!(provider.primary_name(), "ollama");
    assert_eq!(provider.fallback_name(), None);

    let vector = provider
        .embed("what is a fraction", TIMEOUT)
        .await
        .expect("local model should embed");
    assert_eq!(vector.len(), 8);
}

#[tokio::test]
#[serial]
async fn remote_failure_falls_back_per_call() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let ollama = ollama_returning(json!([0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])).await;

    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&remote)
        .await;

    let provider = EmbeddingProvider::from_config(&config_for(&temp_dir, &ollama, Some(&remote)))
        .expect("should build provider");
    assert_eq!(provider.fallback_name(), Some("ollama"));

    for _ in 0..2 {
        let vector = provider
            .embed("what is a fraction", TIMEOUT)
            .await
            .expect("fallback should serve the call");
        assert_eq!(vector[1], 1.0);
    }

    // Each call tried the remote backend first
    remote.verify().await;
}

#[tokio::test]
#[serial]
async fn malformed_remote_output_falls_back() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let ollama = ollama_returning(json!([0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0])).await;

    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.5, 0.5]]
        })))
        .mount(&remote)
        .await;

    let provider = EmbeddingProvider::from_config(&config_for(&temp_dir, &ollama, Some(&remote)))
        .expect("should build provider");
    let vector = provider
        .embed("photosynthesis", TIMEOUT)
        .await
        .expect("fallback should serve the call");
    assert_eq!(vector[2], 1.0);
}

#[tokio::test]
#[serial]
async fn both_backends_down_is_unavailable() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");

    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&ollama)
        .await;
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&remote)
        .await;

    let provider = EmbeddingProvider::from_config(&config_for(&temp_dir, &ollama, Some(&remote)))
        .expect("should build provider");
    let err = provider
        .embed("photosynthesis", TIMEOUT)
        .await
        .expect_err("no backend can serve the call");

    assert!(matches!(err, EmbeddingError::Unavailable { .. }));
    assert_eq!(err.backend(), "ollama");
}
