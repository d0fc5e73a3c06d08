//! Orchestrator Core

mod locks;
mod turn;

use crate::commands::{Command, HELP_TEXT};
use crate::completion::CompletionService;
use crate::error::CoreError;
use crate::persistence::{SaveSchedule, SnapshotWriter};
use crate::sessions::SessionStore;
use crate::state::{FileSnapshotStore, SnapshotStore};
use chrono::Utc;
use directories::BaseDirs;
use log::{debug, info, warn};
use parley_config::{ParleyConfig, SessionsConfig};
use parley_protocol::{
    Capability, CapabilityKind, ChatResponse, DeleteReceipt, EventSink, Health, HealthStatus,
    MemoryStats, Message, PromptOutput, ProviderCall, ProviderStatus, ProviderSummary,
    ResourceContent, SaveReceipt, Session, SessionId, SessionStats, SessionSummary,
    TurnEvent, TurnKind,
};
use parley_providers::ProviderRegistry;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use locks::SessionLocks;
use turn::{TurnExecutor, TurnParams};

/// Result of `Orchestrator::submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Session the query ran in (possibly created for it).
    pub session_id: SessionId,
    pub session_title: String,
    /// Final assistant message, or the reply to a command or resource fetch.
    pub message: Message,
    /// Every provider call made during the turn.
    pub tool_calls: Vec<ProviderCall>,
    pub stats: SessionStats,
    pub kind: TurnKind,
}

impl TurnOutcome {
    /// Shape the outcome for delivery adapters.
    pub fn into_response(self) -> ChatResponse {
        ChatResponse {
            session_id: self.session_id,
            session_title: self.session_title,
            message: self.message,
            tool_calls: self.tool_calls,
            stats: Some(self.stats),
            kind: self.kind,
            timestamp: Utc::now(),
        }
    }
}

struct FanoutEventSink {
    primary: Option<Arc<dyn EventSink>>,
    secondary: Arc<dyn EventSink>,
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: TurnEvent) {
        if let Some(primary) = &self.primary {
            primary.emit(event.clone());
        }
        self.secondary.emit(event);
    }
}

/// Main façade: owns sessions, persistence, and the turn state machine.
pub struct Orchestrator {
    config: Arc<ParleyConfig>,
    sessions: SessionStore,
    registry: ProviderRegistry,
    writer: Arc<SnapshotWriter>,
    executor: TurnExecutor,
    locks: SessionLocks,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl Orchestrator {
    /// Build an orchestrator and restore the latest snapshot.
    ///
    /// When persistence is enabled and no snapshot store is supplied, a file
    /// store at the configured (or default) path is used. An unreadable
    /// snapshot is a fatal error.
    pub fn new(
        config: ParleyConfig,
        registry: ProviderRegistry,
        completion: Arc<dyn CompletionService>,
        snapshot_store: Option<Arc<dyn SnapshotStore>>,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, CoreError> {
        info!("initializing orchestrator");
        debug!(
            "orchestrator limits (max_sessions={}, max_tool_round_trips={}, persist={})",
            config.sessions.max_sessions,
            config.orchestrator.max_tool_round_trips,
            config.sessions.persist
        );
        let backend = if config.sessions.persist {
            match snapshot_store {
                Some(store) => Some(store),
                None => Some(build_default_snapshot_store(&config.sessions)?),
            }
        } else {
            None
        };

        let sessions = SessionStore::new(config.sessions.max_sessions);
        if let Some(backend) = &backend
            && let Some(snapshot) = backend.load()?
        {
            sessions.restore(snapshot)?;
        }

        let writer = SnapshotWriter::new(
            sessions.clone(),
            backend,
            SaveSchedule {
                interval: Duration::from_secs(config.sessions.save_interval_secs),
                after_mutations: config.sessions.save_after_mutations,
            },
        );
        let executor = TurnExecutor::new(
            sessions.clone(),
            registry.clone(),
            completion,
            config.orchestrator.max_tool_round_trips,
        );

        info!("orchestrator initialized (sessions={})", sessions.len());
        Ok(Self {
            config: Arc::new(config),
            sessions,
            registry,
            writer,
            executor,
            locks: SessionLocks::default(),
            event_sink,
        })
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Connect providers and start the background snapshot writer.
    pub async fn start(&self) -> Vec<ProviderSummary> {
        self.writer.start();
        let summaries = self.registry.connect_all().await;
        let ready = summaries
            .iter()
            .filter(|summary| summary.status == ProviderStatus::Ready)
            .count();
        info!(
            "providers connected (ready={}, configured={})",
            ready,
            summaries.len()
        );
        summaries
    }

    /// Flush a final snapshot and close every provider.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        info!("shutting down orchestrator");
        let flushed = self.writer.shutdown().await;
        self.registry.shutdown().await;
        flushed
    }

    /// Run one query against a session.
    pub async fn submit(
        &self,
        session_id: Option<SessionId>,
        query: &str,
    ) -> Result<TurnOutcome, CoreError> {
        self.submit_with_events(session_id, query, None).await
    }

    /// Run one query, additionally streaming turn events to `event_sink`.
    ///
    /// Slash commands and `@uri` fetches are answered directly and are not
    /// recorded in history. Anything else runs a full turn. An unknown
    /// session id creates a session under that id.
    pub async fn submit_with_events(
        &self,
        session_id: Option<SessionId>,
        query: &str,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<TurnOutcome, CoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CoreError::EmptyQuery);
        }
        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        if query.starts_with('/') {
            return self.run_command(session_id, Command::parse(query)).await;
        }

        let _turn = self.locks.acquire(session_id).await;
        if let Some(uri) = query.strip_prefix('@') {
            // A failed fetch must not leave an empty session behind.
            let resource = self.fetch_resource(uri.trim(), None).await?;
            self.sessions.get_or_create(session_id)?;
            let reply = Message::assistant(format!(
                "Resource {} from {}:\n\n{}",
                resource.uri, resource.provider_id, resource.text
            ));
            return self.outcome(session_id, reply, Vec::new(), TurnKind::Resource);
        }
        self.sessions.get_or_create(session_id)?;

        let event_sink = match (self.event_sink.clone(), event_sink) {
            (primary, Some(secondary)) => Some(Arc::new(FanoutEventSink { primary, secondary })
                as Arc<dyn EventSink>),
            (primary, None) => primary,
        };
        let report = self
            .executor
            .run_turn(TurnParams {
                session_id,
                query: query.to_string(),
                event_sink,
            })
            .await?;
        self.outcome(session_id, report.message, report.calls, TurnKind::Chat)
    }

    /// Create a session explicitly.
    pub fn create_session(&self, title: Option<String>) -> Result<SessionSummary, CoreError> {
        Ok(self.sessions.create(title)?.summary())
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list()
    }

    pub fn get_session(&self, session_id: SessionId) -> Result<Session, CoreError> {
        self.sessions.get(session_id)
    }

    /// Delete a session once any turn running on it has finished.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<DeleteReceipt, CoreError> {
        {
            let _turn = self.locks.acquire(session_id).await;
            self.sessions.delete(session_id)?;
        }
        self.locks.forget(session_id);
        Ok(DeleteReceipt {
            session_id,
            deleted: true,
        })
    }

    /// Clear a session's history once any running turn has finished.
    pub async fn clear_session(&self, session_id: SessionId) -> Result<SessionSummary, CoreError> {
        let _turn = self.locks.acquire(session_id).await;
        Ok(self.sessions.clear(session_id)?.summary())
    }

    pub fn update_title(
        &self,
        session_id: SessionId,
        title: impl Into<String>,
    ) -> Result<SessionSummary, CoreError> {
        Ok(self.sessions.update_title(session_id, title)?.summary())
    }

    pub fn session_messages(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError> {
        self.sessions.messages(session_id, limit)
    }

    pub fn session_stats(&self, session_id: SessionId) -> Result<SessionStats, CoreError> {
        self.sessions.stats(session_id)
    }

    /// Capabilities of ready providers, optionally filtered by kind.
    pub fn list_capabilities(&self, kind: Option<CapabilityKind>) -> Vec<Capability> {
        self.registry.list_capabilities(kind)
    }

    /// Read a resource outside of any turn.
    pub async fn fetch_resource(
        &self,
        uri: &str,
        provider_id: Option<&str>,
    ) -> Result<ResourceContent, CoreError> {
        let (reference, result) = self.registry.fetch_resource(uri, provider_id).await?;
        debug!(
            "fetched resource (provider_id={}, uri={}, text_len={})",
            reference.provider_id,
            reference.name,
            result.text.len()
        );
        Ok(ResourceContent {
            provider_id: reference.provider_id,
            uri: reference.name,
            contents: result.content,
            text: result.text,
            fetched_at: Utc::now(),
        })
    }

    /// Render a prompt outside of any turn.
    pub async fn execute_prompt(
        &self,
        name: &str,
        arguments: Value,
        provider_id: Option<&str>,
    ) -> Result<PromptOutput, CoreError> {
        let (reference, result) = self
            .registry
            .execute_prompt(name, arguments.clone(), provider_id)
            .await?;
        let messages = result
            .content
            .get("messages")
            .cloned()
            .unwrap_or(result.content);
        Ok(PromptOutput {
            provider_id: reference.provider_id,
            name: reference.name,
            arguments,
            messages,
            text: result.text,
            executed_at: Utc::now(),
        })
    }

    pub async fn reconnect_provider(&self, provider_id: &str) -> Result<ProviderSummary, CoreError> {
        info!("reconnecting provider (provider_id={})", provider_id);
        Ok(self.registry.reconnect(provider_id).await?)
    }

    pub fn provider_summaries(&self) -> Vec<ProviderSummary> {
        self.registry.summaries()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let capabilities = self.registry.list_capabilities(None);
        let count = |kind: CapabilityKind| {
            capabilities
                .iter()
                .filter(|capability| capability.kind == kind)
                .count()
        };
        let status = self.writer.status();
        MemoryStats {
            total_sessions: self.sessions.len(),
            max_sessions: self.sessions.max_sessions(),
            total_messages: self.sessions.total_messages(),
            active_tools: count(CapabilityKind::Tool),
            active_prompts: count(CapabilityKind::Prompt),
            active_resources: count(CapabilityKind::Resource),
            snapshot_path: self.writer.location(),
            last_saved_at: status.last_saved_at,
            last_save_error: status.last_error,
            pending_mutations: self.sessions.mutations().pending(),
        }
    }

    pub fn health(&self) -> Health {
        let providers = self.registry.summaries();
        let persistence_error = self.writer.status().last_error;
        let healthy = persistence_error.is_none()
            && providers
                .iter()
                .all(|provider| provider.status == ProviderStatus::Ready);
        Health {
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            sessions: self.sessions.len(),
            providers,
            persistence_error,
        }
    }

    /// Write the snapshot immediately.
    pub async fn save_now(&self) -> Result<SaveReceipt, CoreError> {
        info!("explicit snapshot save requested");
        self.writer.save_now().await
    }

    fn outcome(
        &self,
        session_id: SessionId,
        message: Message,
        tool_calls: Vec<ProviderCall>,
        kind: TurnKind,
    ) -> Result<TurnOutcome, CoreError> {
        let session = self.sessions.get(session_id)?;
        Ok(TurnOutcome {
            session_id,
            session_title: session.title.clone(),
            stats: session.stats(),
            message,
            tool_calls,
            kind,
        })
    }

    /// Answer a slash command under the current session's turn lock.
    ///
    /// `/delete` runs without it and queues on the target's lock instead, so
    /// no command holds one turn lock while waiting for another.
    async fn run_command(
        &self,
        current: SessionId,
        command: Command,
    ) -> Result<TurnOutcome, CoreError> {
        debug!(
            "running command (session_id={}, command={:?})",
            current, command
        );
        let turn = match &command {
            Command::Delete(_) => None,
            _ => Some(self.locks.acquire(current).await),
        };
        self.sessions.get_or_create(current)?;
        let replied = self.command_reply(current, command).await;
        drop(turn);
        let (reply, session_id) = match replied {
            Ok(result) => result,
            Err(err) => {
                warn!("command failed (session_id={}, err={})", current, err);
                (format!("Command failed: {err}"), current)
            }
        };
        let session_id = if self.sessions.contains(session_id) {
            session_id
        } else {
            self.sessions.create(None)?.id
        };
        self.outcome(
            session_id,
            Message::assistant(reply),
            Vec::new(),
            TurnKind::Command,
        )
    }

    /// `/delete <prefix>` waits for any turn running on the target.
    async fn delete_command(&self, prefix: &str) -> Result<String, CoreError> {
        let target = self.sessions.resolve_prefix(prefix)?;
        self.delete_session(target).await?;
        Ok(format!("Deleted session {target}"))
    }

    async fn command_reply(
        &self,
        current: SessionId,
        command: Command,
    ) -> Result<(String, SessionId), CoreError> {
        let reply = match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::Sessions => {
                let lines = self
                    .sessions
                    .list()
                    .into_iter()
                    .map(|summary| {
                        let marker = if summary.id == current { " *" } else { "" };
                        format!(
                            "{} {} ({} messages){}",
                            short_id(summary.id),
                            summary.title,
                            summary.message_count,
                            marker
                        )
                    })
                    .collect::<Vec<_>>();
                format!("Sessions ({}):\n{}", lines.len(), lines.join("\n"))
            }
            Command::New(title) => {
                let session = self.sessions.create(title)?;
                let reply = format!("Started new session {} ({})", session.title, session.id);
                return Ok((reply, session.id));
            }
            Command::Delete(prefix) => self.delete_command(&prefix).await?,
            Command::Clear => {
                self.sessions.clear(current)?;
                "Cleared the current session.".to_string()
            }
            Command::Title(title) => {
                let session = self.sessions.update_title(current, title)?;
                format!("Session renamed to {}.", session.title)
            }
            Command::Stats => {
                let stats = self.sessions.stats(current)?;
                format!(
                    "Messages: {} (user {}, assistant {}, tool {})\nProvider calls: {}\nEstimated tokens: {}\nActive for: {}s",
                    stats.message_count,
                    stats.user_messages,
                    stats.assistant_messages,
                    stats.tool_messages,
                    stats.provider_call_count,
                    stats.estimated_tokens,
                    stats.duration_secs
                )
            }
            Command::History(limit) => {
                let messages = self.sessions.messages(current, limit)?;
                if messages.is_empty() {
                    "No messages yet.".to_string()
                } else {
                    messages
                        .iter()
                        .map(|message| format!("[{}] {}", message.role.as_str(), message.content))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Tools => capability_listing("Tools", self.list_capabilities(Some(CapabilityKind::Tool))),
            Command::Prompts => {
                capability_listing("Prompts", self.list_capabilities(Some(CapabilityKind::Prompt)))
            }
            Command::Resources => capability_listing(
                "Resources",
                self.list_capabilities(Some(CapabilityKind::Resource)),
            ),
            Command::Prompt { name, arguments } => {
                let output = self
                    .execute_prompt(&name, Value::Object(arguments), None)
                    .await?;
                format!("Prompt {} from {}:\n\n{}", output.name, output.provider_id, output.text)
            }
            Command::Usage(usage) => format!("Usage: {usage}"),
            Command::Unknown(name) => {
                format!("Unknown command /{name}. Type /help for the list of commands.")
            }
        };
        Ok((reply, current))
    }
}

fn short_id(session_id: SessionId) -> String {
    session_id.to_string().chars().take(8).collect()
}

fn capability_listing(heading: &str, capabilities: Vec<Capability>) -> String {
    if capabilities.is_empty() {
        return format!("{heading}: none available.");
    }
    let lines = capabilities
        .iter()
        .map(|capability| match &capability.description {
            Some(description) => format!("{} - {}", capability.reference(), description),
            None => capability.reference().to_string(),
        })
        .collect::<Vec<_>>();
    format!("{heading} ({}):\n{}", lines.len(), lines.join("\n"))
}

/// Build the default snapshot store from config.
fn build_default_snapshot_store(
    config: &SessionsConfig,
) -> Result<Arc<dyn SnapshotStore>, CoreError> {
    let path = resolve_snapshot_path(config.snapshot_path.as_deref())?;
    info!("initializing snapshot store (path={})", path.display());
    Ok(Arc::new(FileSnapshotStore::new(path)))
}

/// Resolve an absolute snapshot path from an optional configured value.
pub fn resolve_snapshot_path(path: Option<&str>) -> Result<PathBuf, CoreError> {
    let cwd = std::env::current_dir().map_err(CoreError::Io)?;
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    if let Some(path) = path {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = &home
        {
            return Ok(home.join(rest));
        }
        let path = PathBuf::from(path);
        if path.is_absolute() {
            debug!("using absolute snapshot path: {}", path.display());
            return Ok(path);
        }
        debug!(
            "resolving snapshot path relative to cwd: {}",
            cwd.join(&path).display()
        );
        return Ok(cwd.join(path));
    }

    let root = home.unwrap_or(cwd);
    Ok(root.join(".parley").join("sessions.json"))
}
