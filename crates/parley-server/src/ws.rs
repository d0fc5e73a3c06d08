//! Streaming adapter: JSON frames over a websocket.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parley_core::{CoreError, Orchestrator};
use parley_protocol::{ClientFrame, EventSink, ServerFrame, TurnEvent};
use rocket::{State, get};
use rocket_ws::stream::DuplexStream;
use rocket_ws::{Channel, Message, WebSocket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// Forwards turn events to one connection as `turn_event` frames.
struct FrameEventSink {
    frames: FrameSender,
}

impl EventSink for FrameEventSink {
    fn emit(&self, event: TurnEvent) {
        let _ = self.frames.send(ServerFrame::TurnEvent { event });
    }
}

#[get("/ws")]
pub fn stream(ws: WebSocket, engine: &State<Arc<Orchestrator>>) -> Channel<'static> {
    let engine = engine.inner().clone();
    ws.channel(move |stream| Box::pin(run_connection(engine, stream)))
}

fn error_frame(request_id: Option<String>, err: &CoreError) -> ServerFrame {
    ServerFrame::error(request_id, err.kind(), err.to_string())
}

/// Serve one connection until the client goes away.
///
/// Frames are written by a dedicated task so that turns running in parallel
/// can all push events. Turns still in flight when the socket closes are
/// aborted.
async fn run_connection(
    engine: Arc<Orchestrator>,
    stream: DuplexStream,
) -> rocket_ws::result::Result<()> {
    let connection_id = Uuid::new_v4();
    info!("websocket connected (connection_id={})", connection_id);
    let (mut outbound, mut inbound) = stream.split();
    let (frames, mut pending) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = pending.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!("failed to encode frame (err={})", err);
                    continue;
                }
            };
            if outbound.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = frames.send(ServerFrame::Welcome {
        connection_id,
        timestamp: Utc::now(),
    });

    let mut turns = JoinSet::new();
    while let Some(message) = inbound.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(
                    "websocket read failed (connection_id={}, err={})",
                    connection_id, err
                );
                break;
            }
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => dispatch(&engine, &frames, &mut turns, frame),
            Err(err) => {
                let _ = frames.send(ServerFrame::error(None, "invalid_frame", err.to_string()));
            }
        }
        while turns.try_join_next().is_some() {}
    }

    let aborted = turns.len();
    turns.abort_all();
    drop(frames);
    writer.abort();
    info!(
        "websocket closed (connection_id={}, aborted_turns={})",
        connection_id, aborted
    );
    Ok(())
}

fn dispatch(
    engine: &Arc<Orchestrator>,
    frames: &FrameSender,
    turns: &mut JoinSet<()>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Chat {
            request_id,
            query,
            session_id,
        } => {
            let engine = engine.clone();
            let frames = frames.clone();
            turns.spawn(async move {
                let sink: Arc<dyn EventSink> = Arc::new(FrameEventSink {
                    frames: frames.clone(),
                });
                let frame = match engine
                    .submit_with_events(session_id, &query, Some(sink))
                    .await
                {
                    Ok(outcome) => ServerFrame::ChatResponse {
                        request_id,
                        response: outcome.into_response(),
                    },
                    Err(err) => error_frame(request_id, &err),
                };
                let _ = frames.send(frame);
            });
        }
        ClientFrame::CreateSession { title } => {
            let frame = match engine.create_session(title) {
                Ok(session) => ServerFrame::SessionCreated { session },
                Err(err) => error_frame(None, &err),
            };
            let _ = frames.send(frame);
        }
        ClientFrame::ListSessions => {
            let _ = frames.send(ServerFrame::SessionsList {
                sessions: engine.list_sessions(),
            });
        }
        ClientFrame::GetResource { uri, provider } => {
            let engine = engine.clone();
            let frames = frames.clone();
            turns.spawn(async move {
                let frame = match engine.fetch_resource(&uri, provider.as_deref()).await {
                    Ok(resource) => ServerFrame::ResourceResponse { resource },
                    Err(err) => error_frame(None, &err),
                };
                let _ = frames.send(frame);
            });
        }
        ClientFrame::Ping { .. } => {
            let _ = frames.send(ServerFrame::Pong {
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dispatch;
    use parley_config::{ParleyConfig, SessionsConfig};
    use parley_core::{CompletionService, Orchestrator};
    use parley_protocol::{ClientFrame, Role, ServerFrame, TurnEventPayload};
    use parley_providers::ProviderRegistry;
    use parley_test_utils::{EchoCompletion, FakeConnector};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinSet;

    fn engine() -> Arc<Orchestrator> {
        engine_with(Arc::new(EchoCompletion::new()))
    }

    fn engine_with(completion: Arc<dyn CompletionService>) -> Arc<Orchestrator> {
        let config = ParleyConfig::builder()
            .sessions(SessionsConfig {
                persist: false,
                ..SessionsConfig::default()
            })
            .build();
        let registry = ProviderRegistry::new(Arc::new(FakeConnector::new()), Duration::from_secs(1));
        Arc::new(
            Orchestrator::new(config, registry, completion, None, None).expect("orchestrator"),
        )
    }

    async fn drain(
        frames: mpsc::UnboundedSender<ServerFrame>,
        mut pending: mpsc::UnboundedReceiver<ServerFrame>,
        mut turns: JoinSet<()>,
    ) -> Vec<ServerFrame> {
        while turns.join_next().await.is_some() {}
        drop(frames);
        let mut out = Vec::new();
        while let Some(frame) = pending.recv().await {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn chat_frames_stream_events_before_the_response() {
        let engine = engine();
        let (frames, pending) = mpsc::unbounded_channel();
        let mut turns = JoinSet::new();

        dispatch(
            &engine,
            &frames,
            &mut turns,
            ClientFrame::Chat {
                request_id: Some("r1".to_string()),
                query: "hi".to_string(),
                session_id: None,
            },
        );
        let out = drain(frames, pending, turns).await;

        assert_eq!(out.len(), 3);
        match &out[0] {
            ServerFrame::TurnEvent { event } => assert_eq!(
                event.payload,
                TurnEventPayload::TurnStarted {
                    query: "hi".to_string()
                }
            ),
            other => panic!("expected turn event, got {other:?}"),
        }
        match &out[2] {
            ServerFrame::ChatResponse {
                request_id,
                response,
            } => {
                assert_eq!(request_id.as_deref(), Some("r1"));
                assert_eq!(response.message.content, "echo: hi");
            }
            other => panic!("expected chat response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chat_yields_error_frame() {
        let engine = engine();
        let (frames, pending) = mpsc::unbounded_channel();
        let mut turns = JoinSet::new();

        dispatch(
            &engine,
            &frames,
            &mut turns,
            ClientFrame::Chat {
                request_id: Some("r2".to_string()),
                query: " ".to_string(),
                session_id: None,
            },
        );
        let out = drain(frames, pending, turns).await;

        match &out[..] {
            [ServerFrame::Error {
                request_id, error, ..
            }] => {
                assert_eq!(request_id.as_deref(), Some("r2"));
                assert_eq!(error, "empty_query");
            }
            other => panic!("expected one error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_and_ping_frames_answer_inline() {
        let engine = engine();
        let (frames, pending) = mpsc::unbounded_channel();
        let mut turns = JoinSet::new();

        dispatch(
            &engine,
            &frames,
            &mut turns,
            ClientFrame::CreateSession {
                title: Some("Demo".to_string()),
            },
        );
        dispatch(&engine, &frames, &mut turns, ClientFrame::ListSessions);
        dispatch(
            &engine,
            &frames,
            &mut turns,
            ClientFrame::Ping { timestamp: None },
        );
        dispatch(
            &engine,
            &frames,
            &mut turns,
            ClientFrame::GetResource {
                uri: "file:///missing".to_string(),
                provider: None,
            },
        );
        let out = drain(frames, pending, turns).await;

        assert_eq!(out.len(), 4);
        assert!(matches!(&out[0], ServerFrame::SessionCreated { session } if session.title == "Demo"));
        assert!(matches!(&out[1], ServerFrame::SessionsList { sessions } if sessions.len() == 1));
        assert!(matches!(&out[2], ServerFrame::Pong { .. }));
        assert!(
            matches!(&out[3], ServerFrame::Error { error, .. } if error == "capability_not_found")
        );
    }

    #[tokio::test]
    async fn closing_a_connection_aborts_only_its_own_turns() {
        let engine = engine_with(Arc::new(EchoCompletion::with_delay(Duration::from_millis(200))));
        let abandoned = engine.create_session(None).expect("abandoned");
        let other = engine.create_session(None).expect("other");

        let (closing_frames, _closing_pending) = mpsc::unbounded_channel();
        let mut closing = JoinSet::new();
        dispatch(
            &engine,
            &closing_frames,
            &mut closing,
            ClientFrame::Chat {
                request_id: None,
                query: "never answered".to_string(),
                session_id: Some(abandoned.id),
            },
        );
        let (frames, pending) = mpsc::unbounded_channel();
        let mut open = JoinSet::new();
        dispatch(
            &engine,
            &frames,
            &mut open,
            ClientFrame::Chat {
                request_id: None,
                query: "still here".to_string(),
                session_id: Some(other.id),
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        closing.abort_all();
        while closing.join_next().await.is_some() {}

        let out = drain(frames, pending, open).await;
        assert!(matches!(
            out.last(),
            Some(ServerFrame::ChatResponse { response, .. })
                if response.message.content == "echo: still here"
        ));

        let kept = engine.get_session(abandoned.id).expect("session survives the close");
        assert!(
            kept.messages
                .iter()
                .all(|message| message.role != Role::Assistant)
        );

        let follow_up = tokio::time::timeout(
            Duration::from_secs(1),
            engine.submit(Some(abandoned.id), "after close"),
        )
        .await
        .expect("turn lock released")
        .expect("turn");
        assert_eq!(follow_up.message.content, "echo: after close");
    }
}
