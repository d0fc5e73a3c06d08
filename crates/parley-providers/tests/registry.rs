use parley_config::{ParleyConfig, ProviderConfig};
use parley_protocol::{
    CapabilityKind, CapabilityRef, InvocationResult, ProviderError, ProviderStatus,
};
use parley_providers::ProviderRegistry;
use parley_test_utils::{FakeBehavior, FakeConnector, FakeProvider};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn echo_tool(provider: &Arc<FakeProvider>, name: &str) -> Arc<FakeProvider> {
    provider.tool(
        name,
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }),
        FakeBehavior::Reply(InvocationResult::text("ok")),
    )
}

async fn connected(connector: &FakeConnector) -> ProviderRegistry {
    let registry = ProviderRegistry::new(Arc::new(connector.clone()), Duration::from_millis(200));
    for (id, config) in connector.provider_configs() {
        registry.connect(&id, config).await.expect("connect");
    }
    registry
}

#[tokio::test]
async fn connect_all_tolerates_failing_providers() {
    let connector = FakeConnector::new()
        .with_provider("alpha", echo_tool(&FakeProvider::new(), "echo"))
        .with_provider("beta", echo_tool(&FakeProvider::new(), "shout"));
    connector.refuse("beta", true);
    let config = connector
        .provider_configs()
        .into_iter()
        .fold(ParleyConfig::builder(), |builder, (id, provider)| {
            builder.provider(id, provider)
        })
        .build();
    let registry = ProviderRegistry::from_config(&config, Arc::new(connector.clone()));

    let summaries = registry.connect_all().await;

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].status, ProviderStatus::Ready);
    assert_eq!(summaries[1].status, ProviderStatus::Closed);
    assert!(summaries[1].last_error.is_some());
    assert_eq!(registry.list_capabilities(None).len(), 1);
    assert_eq!(registry.list_capabilities(None)[0].provider_id, "alpha");
}

#[tokio::test]
async fn disabled_providers_are_not_registered() {
    let mut disabled = ProviderConfig::new("fake-off");
    disabled.enabled = false;
    let config = ParleyConfig::builder()
        .provider("on", ProviderConfig::new("fake-on"))
        .provider("off", disabled)
        .build();

    let registry = ProviderRegistry::from_config(&config, Arc::new(FakeConnector::new()));

    let ids = registry
        .summaries()
        .into_iter()
        .map(|summary| summary.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["on".to_string()]);
    assert_eq!(registry.call_timeout(), Duration::from_secs(60));
}

#[tokio::test]
async fn unqualified_names_must_be_unique() {
    let connector = FakeConnector::new()
        .with_provider("alpha", echo_tool(&FakeProvider::new(), "echo"))
        .with_provider(
            "beta",
            echo_tool(&echo_tool(&FakeProvider::new(), "echo"), "shout"),
        );
    let registry = connected(&connector).await;

    let shout = registry
        .resolve(CapabilityKind::Tool, "shout", None)
        .expect("unique");
    assert_eq!(shout, CapabilityRef::tool("beta", "shout"));

    let err = registry
        .resolve(CapabilityKind::Tool, "echo", None)
        .expect_err("ambiguous");
    assert!(matches!(err, ProviderError::Ambiguous(_)));

    let pinned = registry
        .resolve(CapabilityKind::Tool, "echo", Some("alpha"))
        .expect("qualified");
    assert_eq!(pinned.provider_id, "alpha");

    let err = registry
        .resolve(CapabilityKind::Tool, "missing", None)
        .expect_err("missing");
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn schema_violations_are_rejected_before_dispatch() {
    let provider = echo_tool(&FakeProvider::new(), "echo");
    let connector = FakeConnector::new().with_provider("alpha", provider.clone());
    let registry = connected(&connector).await;

    let err = registry
        .invoke(&CapabilityRef::tool("alpha", "echo"), json!({ "text": 3 }))
        .await
        .expect_err("invalid");

    assert!(matches!(err, ProviderError::InvalidArguments(_)));
    assert!(provider.invocations().is_empty());

    let result = registry
        .invoke(&CapabilityRef::tool("alpha", "echo"), json!({ "text": "hi" }))
        .await
        .expect("valid");
    assert_eq!(result.text, "ok");
    assert_eq!(provider.invocations().len(), 1);
}

#[tokio::test]
async fn slow_invocations_time_out() {
    let provider = FakeProvider::new().tool("wait", json!({ "type": "object" }), FakeBehavior::Hang);
    let connector = FakeConnector::new().with_provider("alpha", provider);
    let registry = connected(&connector).await;

    let err = registry
        .invoke(&CapabilityRef::tool("alpha", "wait"), json!(null))
        .await
        .expect_err("timeout");

    assert!(matches!(err, ProviderError::Timeout { .. }));
    assert_eq!(
        registry.summary("alpha").expect("summary").status,
        ProviderStatus::Ready
    );
}

#[tokio::test]
async fn transport_failure_degrades_until_reconnect() {
    let provider = echo_tool(&FakeProvider::new(), "echo");
    provider.set_behavior(
        "echo",
        FakeBehavior::Fail(ProviderError::Transport("pipe closed".to_string())),
    );
    let connector = FakeConnector::new().with_provider("alpha", provider.clone());
    let registry = connected(&connector).await;
    let reference = CapabilityRef::tool("alpha", "echo");

    let err = registry
        .invoke(&reference, json!({ "text": "hi" }))
        .await
        .expect_err("transport");
    assert!(matches!(err, ProviderError::Transport(_)));
    assert_eq!(
        registry.summary("alpha").expect("summary").status,
        ProviderStatus::Degraded
    );
    assert!(registry.list_capabilities(None).is_empty());

    let err = registry
        .invoke(&reference, json!({ "text": "again" }))
        .await
        .expect_err("fail fast");
    assert!(matches!(err, ProviderError::Unavailable(_)));
    assert_eq!(provider.invocations().len(), 1);

    provider.set_behavior("echo", FakeBehavior::Reply(InvocationResult::text("back")));
    let summary = registry.reconnect("alpha").await.expect("reconnect");
    assert_eq!(summary.status, ProviderStatus::Ready);
    assert_eq!(provider.close_count(), 1);
    let result = registry
        .invoke(&reference, json!({ "text": "hi" }))
        .await
        .expect("recovered");
    assert_eq!(result.text, "back");
}

#[tokio::test]
async fn reconnect_is_idempotent_when_ready() {
    let connector = FakeConnector::new().with_provider("alpha", echo_tool(&FakeProvider::new(), "echo"));
    let registry = connected(&connector).await;
    assert_eq!(connector.connect_count("alpha"), 1);

    registry.reconnect("alpha").await.expect("reconnect");
    registry.reconnect("alpha").await.expect("reconnect");

    assert_eq!(connector.connect_count("alpha"), 1);
    let err = registry.reconnect("nope").await.expect_err("unknown");
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn resources_and_prompts_route_by_name() {
    let provider = FakeProvider::new()
        .resource("note://today", "buy milk")
        .prompt(
            "summarize",
            json!({
                "type": "object",
                "properties": { "topic": { "type": "string" } },
                "required": ["topic"]
            }),
            FakeBehavior::Reply(InvocationResult::text("Summarize rust")),
        );
    let connector = FakeConnector::new().with_provider("notes", provider.clone());
    let registry = connected(&connector).await;

    let (reference, result) = registry
        .fetch_resource("note://today", None)
        .await
        .expect("resource");
    assert_eq!(reference.provider_id, "notes");
    assert_eq!(result.text, "buy milk");

    let (_, rendered) = registry
        .execute_prompt("summarize", json!({ "topic": "rust" }), Some("notes"))
        .await
        .expect("prompt");
    assert_eq!(rendered.text, "Summarize rust");

    let err = registry
        .execute_prompt("summarize", json!({}), None)
        .await
        .expect_err("missing argument");
    assert!(matches!(err, ProviderError::InvalidArguments(_)));
}

#[tokio::test]
async fn shutdown_closes_every_client() {
    let alpha = echo_tool(&FakeProvider::new(), "echo");
    let beta = echo_tool(&FakeProvider::new(), "shout");
    let connector = FakeConnector::new()
        .with_provider("alpha", alpha.clone())
        .with_provider("beta", beta.clone());
    let registry = connected(&connector).await;

    registry.shutdown().await;

    assert_eq!(alpha.close_count(), 1);
    assert_eq!(beta.close_count(), 1);
    assert!(registry.list_capabilities(None).is_empty());
    assert!(
        registry
            .summaries()
            .iter()
            .all(|summary| summary.status == ProviderStatus::Closed)
    );
}
