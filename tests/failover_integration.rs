//! Failover against real sockets: HttpTransport, dialect adapters and the
//! failover controller talking to mock upstreams.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    anthropic_reply, openai_reply, provider, start_mock_backend, start_programmable_backend,
};
use llm_gateway::config::{CircuitBreakerConfig, HealthCheckConfig, ProviderConfig};
use llm_gateway::error::GatewayError;
use llm_gateway::providers::adapter::{ChatMessage, CompletionRequest};
use llm_gateway::providers::{
    FailoverManager, FailoverOptions, HttpTransport, ProviderDescriptor,
};
use llm_gateway::resilience::CircuitBreakerRegistry;

fn manager(configs: &[ProviderConfig]) -> FailoverManager {
    let registry = CircuitBreakerRegistry::default();
    let descriptors = configs.iter().map(ProviderDescriptor::from).collect();
    FailoverManager::new(
        descriptors,
        &registry,
        FailoverOptions::from_config(
            &CircuitBreakerConfig::default(),
            &HealthCheckConfig::default(),
        ),
        Arc::new(HttpTransport::new().unwrap()),
    )
    .unwrap()
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![ChatMessage::new("user", text)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failover_to_secondary_on_server_error() {
    let primary = start_mock_backend(500, r#"{"error":"overloaded"}"#).await;
    let secondary = start_mock_backend(200, openai_reply("from secondary")).await;

    let failover = manager(&[
        provider("openai", primary.url("/v1/chat/completions"), 1),
        provider("backup", secondary.url("/v1/chat/completions"), 2),
    ]);

    let response = failover.execute_with_failover(&request("hello")).await.unwrap();
    assert_eq!(response.content, "from secondary");
    assert_eq!(response.metadata.provider, "backup");
    assert_eq!(failover.current_provider(), "backup");
    assert_eq!(primary.hits(), 1);

    // Sticky: the failed primary is skipped on the next call.
    failover.execute_with_failover(&request("again")).await.unwrap();
    assert_eq!(primary.hits(), 1);
    assert_eq!(secondary.hits(), 2);

    let stats = failover.failover_stats();
    assert_eq!(stats.total_failovers, 1);
    assert_eq!(stats.failed_providers, vec!["openai".to_string()]);
}

#[tokio::test]
async fn test_openai_wire_format() {
    let upstream = start_programmable_backend(|captured| async move {
        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        let ok = captured.head.to_ascii_lowercase().contains("authorization: bearer openai-key")
            && body["model"] == "openai-model"
            && body["messages"][0]["content"] == "ping"
            && body["max_tokens"] == 256;
        if ok {
            (200, openai_reply("pong"))
        } else {
            (400, r#"{"error":"unexpected request"}"#.to_string())
        }
    })
    .await;

    let failover = manager(&[provider("openai", upstream.url("/v1/chat/completions"), 1)]);
    let response = failover.execute_with_failover(&request("ping")).await.unwrap();

    assert_eq!(response.content, "pong");
    assert_eq!(response.role, "assistant");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.metadata.model, "openai-model");
    // "ping" and "pong" are one estimated token each.
    assert_eq!(response.metadata.tokens, 2);
}

#[tokio::test]
async fn test_anthropic_wire_format() {
    let upstream = start_programmable_backend(|captured| async move {
        let head = captured.head.to_ascii_lowercase();
        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        let ok = head.contains("x-api-key: anthropic-key")
            && head.contains("anthropic-version: 2023-06-01")
            && body["system"] == "be brief"
            && body["messages"].as_array().map(Vec::len) == Some(1);
        if ok {
            (200, anthropic_reply("short answer"))
        } else {
            (400, r#"{"error":"unexpected request"}"#.to_string())
        }
    })
    .await;

    let failover = manager(&[provider("anthropic", upstream.url("/v1/messages"), 1)]);
    let request = CompletionRequest {
        messages: vec![
            ChatMessage::new("system", "be brief"),
            ChatMessage::new("user", "explain breakers"),
        ],
        ..Default::default()
    };

    let response = failover.execute_with_failover(&request).await.unwrap();
    assert_eq!(response.content, "short answer");
    assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn test_slow_provider_times_out_and_fails_over() {
    let slow = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, openai_reply("too late"))
    })
    .await;
    let fast = start_mock_backend(200, openai_reply("fast")).await;

    let mut slow_config = provider("openai", slow.url("/"), 1);
    slow_config.timeout_ms = 50;
    let failover = manager(&[slow_config, provider("azure", fast.url("/"), 2)]);

    let response = failover.execute_with_failover(&request("hi")).await.unwrap();
    assert_eq!(response.content, "fast");
    assert_eq!(response.metadata.provider, "azure");
}

#[tokio::test]
async fn test_all_providers_failing_reports_attempts() {
    let down = start_mock_backend(503, r#"{"error":"down"}"#).await;
    let malformed = start_mock_backend(200, r#"{"choices":[]}"#).await;

    let failover = manager(&[
        provider("openai", down.url("/"), 1),
        provider("azure", malformed.url("/"), 2),
    ]);

    let err = failover.execute_with_failover(&request("hi")).await.unwrap_err();
    match err {
        GatewayError::AllProvidersFailed { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.to_string().contains("missing content"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Both are now excluded until a health pass readmits them.
    let err = failover.execute_with_failover(&request("hi")).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoProvidersAvailable));
}

#[tokio::test]
async fn test_unreachable_provider_is_a_transport_failure() {
    // Bind and drop for a port nothing listens on.
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let backup = start_mock_backend(200, openai_reply("ok")).await;
    let failover = manager(&[
        provider("openai", format!("http://{addr}/"), 1),
        provider("backup", backup.url("/"), 2),
    ]);

    let response = failover.execute_with_failover(&request("hi")).await.unwrap();
    assert_eq!(response.metadata.provider, "backup");
}

#[tokio::test]
async fn test_health_check_marks_and_recovers_provider() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = healthy.clone();
    let upstream = start_programmable_backend(move |_| {
        let up = flag.load(std::sync::atomic::Ordering::SeqCst);
        async move {
            if up {
                (200, r#"{"status":"ok"}"#.to_string())
            } else {
                (503, r#"{"status":"down"}"#.to_string())
            }
        }
    })
    .await;

    let mut config = provider("openai", upstream.url("/v1/chat/completions"), 1);
    config.health_check_endpoint = Some(upstream.url("/health"));
    let failover = manager(&[config, provider("backup", upstream.url("/"), 2)]);

    failover.check_health().await;
    let available: Vec<_> = failover
        .available_providers()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(available, vec!["backup".to_string()]);

    healthy.store(true, std::sync::atomic::Ordering::SeqCst);
    failover.check_health().await;
    assert_eq!(failover.available_providers().len(), 2);
    assert_eq!(failover.current_provider(), "openai");
}
