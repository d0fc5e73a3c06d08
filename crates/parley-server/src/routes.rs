//! Single-turn HTTP adapter and the administrative surface.

use crate::error::ApiError;
use parley_core::Orchestrator;
use parley_protocol::{
    Capability, CapabilityKind, ChatRequest, ChatResponse, DeleteReceipt, Health, MemoryStats,
    Message, PromptOutput, ProviderSummary, ResourceContent, SaveReceipt, Session, SessionId,
    SessionStats, SessionSummary,
};
use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Default page size for `/sessions/<id>/messages`.
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

type Engine = State<Arc<Orchestrator>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourceRequest {
    pub uri: String,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub session_id: SessionId,
    pub messages: Vec<Message>,
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_session_id", format!("'{raw}' is not a session id"))
    })
}

#[post("/chat", data = "<request>")]
pub async fn chat(engine: &Engine, request: Json<ChatRequest>) -> ApiResult<ChatResponse> {
    let ChatRequest { query, session_id } = request.into_inner();
    let outcome = engine.submit(session_id, &query).await?;
    Ok(Json(outcome.into_response()))
}

#[post("/sessions", data = "<request>")]
pub fn create_session(
    engine: &Engine,
    request: Option<Json<CreateSessionRequest>>,
) -> Result<status::Custom<Json<SessionSummary>>, ApiError> {
    let title = request.and_then(|request| request.into_inner().title);
    let summary = engine.create_session(title)?;
    Ok(status::Custom(Status::Created, Json(summary)))
}

#[get("/sessions")]
pub fn list_sessions(engine: &Engine) -> Json<Vec<SessionSummary>> {
    Json(engine.list_sessions())
}

#[get("/sessions/<id>")]
pub fn get_session(engine: &Engine, id: &str) -> ApiResult<Session> {
    Ok(Json(engine.get_session(parse_session_id(id)?)?))
}

#[delete("/sessions/<id>")]
pub async fn delete_session(engine: &Engine, id: &str) -> ApiResult<DeleteReceipt> {
    Ok(Json(engine.delete_session(parse_session_id(id)?).await?))
}

#[post("/sessions/<id>/clear")]
pub async fn clear_session(engine: &Engine, id: &str) -> ApiResult<SessionSummary> {
    Ok(Json(engine.clear_session(parse_session_id(id)?).await?))
}

#[patch("/sessions/<id>/title", data = "<request>")]
pub fn update_title(
    engine: &Engine,
    id: &str,
    request: Json<TitleRequest>,
) -> ApiResult<SessionSummary> {
    let title = request.into_inner().title;
    if title.trim().is_empty() {
        return Err(ApiError::bad_request("invalid_title", "title must not be empty"));
    }
    Ok(Json(engine.update_title(parse_session_id(id)?, title)?))
}

#[get("/sessions/<id>/messages?<limit>")]
pub fn session_messages(
    engine: &Engine,
    id: &str,
    limit: Option<usize>,
) -> ApiResult<MessagesResponse> {
    let session_id = parse_session_id(id)?;
    let messages =
        engine.session_messages(session_id, limit.unwrap_or(DEFAULT_MESSAGE_LIMIT))?;
    Ok(Json(MessagesResponse {
        session_id,
        messages,
    }))
}

#[get("/sessions/<id>/stats")]
pub fn session_stats(engine: &Engine, id: &str) -> ApiResult<SessionStats> {
    Ok(Json(engine.session_stats(parse_session_id(id)?)?))
}

#[get("/tools")]
pub fn tools(engine: &Engine) -> Json<Vec<Capability>> {
    Json(engine.list_capabilities(Some(CapabilityKind::Tool)))
}

#[get("/prompts")]
pub fn prompts(engine: &Engine) -> Json<Vec<Capability>> {
    Json(engine.list_capabilities(Some(CapabilityKind::Prompt)))
}

#[get("/resources")]
pub fn resources(engine: &Engine) -> Json<Vec<Capability>> {
    Json(engine.list_capabilities(Some(CapabilityKind::Resource)))
}

#[post("/resource", data = "<request>")]
pub async fn fetch_resource(
    engine: &Engine,
    request: Json<ResourceRequest>,
) -> ApiResult<ResourceContent> {
    let ResourceRequest { uri, provider } = request.into_inner();
    Ok(Json(engine.fetch_resource(&uri, provider.as_deref()).await?))
}

#[post("/prompt", data = "<request>")]
pub async fn execute_prompt(
    engine: &Engine,
    request: Json<PromptRequest>,
) -> ApiResult<PromptOutput> {
    let PromptRequest {
        name,
        arguments,
        provider,
    } = request.into_inner();
    Ok(Json(
        engine
            .execute_prompt(&name, arguments, provider.as_deref())
            .await?,
    ))
}

#[post("/providers/<id>/reconnect")]
pub async fn reconnect_provider(engine: &Engine, id: &str) -> ApiResult<ProviderSummary> {
    Ok(Json(engine.reconnect_provider(id).await?))
}

#[get("/memory/stats")]
pub fn memory_stats(engine: &Engine) -> Json<MemoryStats> {
    Json(engine.memory_stats())
}

#[post("/memory/save")]
pub async fn save_now(engine: &Engine) -> ApiResult<SaveReceipt> {
    Ok(Json(engine.save_now().await?))
}

#[get("/health")]
pub fn health(engine: &Engine) -> Json<Health> {
    Json(engine.health())
}
