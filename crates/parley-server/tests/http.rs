use parley_config::{ParleyConfig, SessionsConfig};
use parley_core::{CompletionService, Orchestrator};
use parley_protocol::{
    Capability, ChatResponse, HealthStatus, InvocationResult, ResourceContent, Session,
    SessionStats, SessionSummary, TurnKind,
};
use parley_providers::ProviderRegistry;
use parley_test_utils::{EchoCompletion, FakeBehavior, FakeConnector, FakeProvider};
use pretty_assertions::assert_eq;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn client_with(max_sessions: usize, completion: Arc<dyn CompletionService>) -> Client {
    let connector = FakeConnector::new().with_provider(
        "calc",
        FakeProvider::new()
            .tool(
                "add",
                json!({ "type": "object", "required": ["a", "b"] }),
                FakeBehavior::Reply(InvocationResult::text("5")),
            )
            .resource("file:///notes.txt", "remember the milk"),
    );
    let registry = ProviderRegistry::new(Arc::new(connector.clone()), Duration::from_secs(1));
    for (id, provider) in connector.provider_configs() {
        registry.connect(&id, provider).await.expect("connect");
    }
    let config = ParleyConfig::builder()
        .sessions(SessionsConfig {
            persist: false,
            max_sessions,
            ..SessionsConfig::default()
        })
        .build();
    let orchestrator =
        Orchestrator::new(config, registry, completion, None, None).expect("orchestrator");
    Client::tracked(parley_server::mount(rocket::build(), Arc::new(orchestrator)))
        .await
        .expect("client")
}

async fn client() -> Client {
    client_with(10, Arc::new(EchoCompletion::new())).await
}

#[tokio::test]
async fn chat_runs_a_turn() {
    let client = client().await;

    let response = client
        .post("/chat")
        .header(ContentType::JSON)
        .body(json!({ "query": "hello there" }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: ChatResponse = response.into_json().await.expect("chat response");
    assert_eq!(body.kind, TurnKind::Chat);
    assert_eq!(body.message.content, "echo: hello there");
    assert_eq!(body.stats.expect("stats").message_count, 2);
}

#[tokio::test]
async fn empty_query_is_a_bad_request() {
    let client = client().await;

    let response = client
        .post("/chat")
        .header(ContentType::JSON)
        .body(json!({ "query": "   " }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], json!("empty_query"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn session_admin_round_trip() {
    let client = client().await;

    let response = client
        .post("/sessions")
        .header(ContentType::JSON)
        .body(json!({ "title": "Demo" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);
    let created: SessionSummary = response.into_json().await.expect("summary");
    assert_eq!(created.title, "Demo");

    client
        .post("/chat")
        .header(ContentType::JSON)
        .body(json!({ "query": "What's 2+2?", "session_id": created.id }).to_string())
        .dispatch()
        .await;

    let listed: Vec<SessionSummary> = client
        .get("/sessions")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].message_count, 2);

    let renamed: SessionSummary = client
        .patch(format!("/sessions/{}/title", created.id))
        .header(ContentType::JSON)
        .body(json!({ "title": "Arithmetic" }).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("rename");
    assert_eq!(renamed.title, "Arithmetic");

    let messages: Value = client
        .get(format!("/sessions/{}/messages?limit=1", created.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("messages");
    assert_eq!(messages["messages"].as_array().expect("array").len(), 1);
    assert_eq!(messages["messages"][0]["content"], json!("echo: What's 2+2?"));

    let stats: SessionStats = client
        .get(format!("/sessions/{}/stats", created.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("stats");
    assert_eq!(stats.user_messages, 1);

    let cleared: SessionSummary = client
        .post(format!("/sessions/{}/clear", created.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("clear");
    assert_eq!(cleared.message_count, 0);

    let session: Session = client
        .get(format!("/sessions/{}", created.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("session");
    assert!(session.messages.is_empty());

    let response = client
        .delete(format!("/sessions/{}", created.id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let receipt: Value = response.into_json().await.expect("receipt");
    assert_eq!(receipt["deleted"], json!(true));

    let response = client
        .get(format!("/sessions/{}", created.id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], json!("session_not_found"));
}

#[tokio::test]
async fn malformed_session_ids_are_rejected() {
    let client = client().await;
    let response = client.get("/sessions/not-a-uuid").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], json!("invalid_session_id"));
}

#[tokio::test]
async fn capacity_maps_to_conflict() {
    let client = client_with(1, Arc::new(EchoCompletion::new())).await;
    client.post("/sessions").dispatch().await;

    let response = client
        .post("/chat")
        .header(ContentType::JSON)
        .body(json!({ "query": "hi" }).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Conflict);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], json!("capacity_exceeded"));
}

#[tokio::test]
async fn capability_listing_and_resource_fetch() {
    let client = client().await;

    let tools: Vec<Capability> = client
        .get("/tools")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("tools");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "add");

    let resource: ResourceContent = client
        .post("/resource")
        .header(ContentType::JSON)
        .body(json!({ "uri": "file:///notes.txt" }).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("resource");
    assert_eq!(resource.provider_id, "calc");
    assert_eq!(resource.text, "remember the milk");

    let response = client
        .post("/resource")
        .header(ContentType::JSON)
        .body(json!({ "uri": "file:///missing" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client.post("/providers/ghost/reconnect").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}

#[tokio::test]
async fn health_and_memory_surface() {
    let client = client().await;

    let health: Value = client
        .get("/health")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("health");
    assert_eq!(health["status"], json!("healthy"));
    assert_eq!(
        serde_json::from_value::<HealthStatus>(health["status"].clone()).expect("status"),
        HealthStatus::Healthy
    );

    let stats: Value = client
        .get("/memory/stats")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("stats");
    assert_eq!(stats["active_tools"], json!(1));
    assert_eq!(stats["active_resources"], json!(1));

    let response = client.post("/memory/save").dispatch().await;
    assert_eq!(response.status(), Status::Conflict);
}

#[tokio::test]
async fn unknown_routes_get_json_errors() {
    let client = client().await;
    let response = client.get("/nowhere").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], json!("not_found"));
}
