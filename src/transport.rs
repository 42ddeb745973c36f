use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    auth::{IdentityProvider, extract_credential},
    error::{ArenaError, ArenaResult},
    metrics::MetricsRegistry,
    protocol::{Envelope, Inbound},
    room::{Mailbox, Participant, ParticipantId, Room},
    usage::UsagePolicy,
};

#[derive(Clone)]
pub struct AppState {
    pub room: Arc<Room>,
    pub identity: Arc<dyn IdentityProvider>,
    pub usage: Arc<dyn UsagePolicy>,
    pub metrics: Arc<MetricsRegistry>,
    pub auth_required: bool,
    pub outbound_capacity: usize,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(connect))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "waiting": state.room.waiting_len().await,
        "matches": state.room.active_matches().await,
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match admit(&state, &headers, params.token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade
        .on_failed_upgrade(|err| tracing::debug!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_socket(state, identity, socket))
}

/// Resolves the caller's identity and checks the free-tier allowance. Nothing is
/// counted here; the game is consumed once the upgrade has gone through.
async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> ArenaResult<String> {
    let identity = if state.auth_required {
        let credential =
            extract_credential(headers, query_token).ok_or(ArenaError::Unauthorized)?;
        state.identity.identify(&credential)?
    } else {
        format!("anonymous-{}", Uuid::new_v4().simple())
    };

    if !state.usage.can_play(&identity).await? {
        tracing::info!(identity = %identity, "daily game limit reached");
        return Err(ArenaError::UsageLimitReached);
    }
    Ok(identity)
}

async fn serve_socket(state: AppState, identity: String, socket: WebSocket) {
    match state.usage.try_consume(&identity).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(identity = %identity, "daily game limit reached after upgrade");
            refuse(socket, Envelope::error(ArenaError::UsageLimitReached.to_string())).await;
            return;
        }
        Err(err) => {
            tracing::warn!(identity = %identity, error = %err, "failed to record usage");
        }
    }

    let (participant, mailbox) = Participant::connect(identity, state.outbound_capacity);
    let id = participant.id();
    let Mailbox {
        outbound,
        activation,
    } = mailbox;
    let (sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(id, sink, outbound));
    state.room.register(participant).await;

    tokio::select! {
        _ = read_loop(&state.room, id, &mut stream, activation) => {}
        _ = &mut writer => {}
    }
    state.room.handle_disconnect(id).await;
}

async fn refuse(mut socket: WebSocket, envelope: Envelope) {
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Forwards queued envelopes in order. Ends once the room closes the queue or the
/// socket stops accepting writes.
async fn write_loop(
    id: ParticipantId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = outbound.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(participant = %id, error = %err, "failed to encode envelope");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(participant = %id, error = %err, "write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    room: &Room,
    id: ParticipantId,
    stream: &mut SplitStream<WebSocket>,
    mut activation: oneshot::Receiver<()>,
) {
    // Frames that arrive before the match starts are discarded.
    loop {
        tokio::select! {
            activated = &mut activation => {
                if activated.is_err() {
                    return;
                }
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match Inbound::decode(text.as_str()) {
                Ok(message) => room.dispatch(id, message).await,
                Err(err) => {
                    tracing::warn!(participant = %id, error = %err, "ignoring malformed message");
                }
            },
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(participant = %id, error = %err, "read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        net::SocketAddr,
        sync::Arc,
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
    use tower::ServiceExt;

    use super::{AppState, routes};
    use crate::{
        auth::StaticTokenAuth,
        config::UsageConfig,
        judge::{JudgeError, JudgeQueue, SubmissionJudge, spawn_worker_pool},
        metrics::MetricsRegistry,
        models::{ProblemId, TestCase, Verdict},
        room::Room,
        store::{InMemoryProblemStore, seed_problems},
        usage::{DailyUsageLimiter, UsagePolicy},
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Passes code that reads "solved" and fails everything else.
    struct KeywordJudge;

    #[async_trait]
    impl SubmissionJudge for KeywordJudge {
        async fn judge(
            &self,
            _problem_id: ProblemId,
            code: &str,
            _test_cases: &[TestCase],
        ) -> Result<Verdict, JudgeError> {
            let passed = if code == "solved" { 2 } else { 0 };
            Ok(Verdict {
                passed,
                total: 2,
                failed_cases: if passed == 2 { vec![] } else { vec![1, 2] },
            })
        }
    }

    fn state(daily_free_games: u32) -> (AppState, Arc<DailyUsageLimiter>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = JudgeQueue::new(4, metrics.clone());
        let room = Arc::new(Room::new(
            Arc::new(InMemoryProblemStore::new(seed_problems())),
            queue.clone(),
            metrics.clone(),
        ));
        spawn_worker_pool(1, queue.receiver(), Arc::new(KeywordJudge), room.clone());
        let usage = Arc::new(DailyUsageLimiter::new(&UsageConfig {
            daily_free_games,
            premium_identities: HashSet::new(),
        }));
        let tokens = HashMap::from([
            ("secret".to_string(), "alice".to_string()),
            ("hunter2".to_string(), "bob".to_string()),
        ]);
        (
            AppState {
                room,
                identity: Arc::new(StaticTokenAuth::new(tokens)),
                usage: usage.clone(),
                metrics,
                auth_required: true,
                outbound_capacity: 16,
            },
            usage,
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn serve(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, routes(state)).await.unwrap() });
        addr
    }

    async fn dial(addr: SocketAddr, token: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
            .await
            .unwrap();
        client
    }

    /// Next JSON frame, or None once the server has closed the connection.
    async fn recv(client: &mut Client) -> Option<serde_json::Value> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn send(client: &mut Client, frame: serde_json::Value) {
        client.send(Message::text(frame.to_string())).await.unwrap();
    }

    fn kind_and_status(frame: &serde_json::Value) -> (&str, &str) {
        (
            frame["type"].as_str().unwrap_or_default(),
            frame["status"].as_str().unwrap_or_default(),
        )
    }

    #[tokio::test]
    async fn health_and_metrics_are_served() {
        let (state, _) = state(10);
        let app = routes(state);

        let health = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let body = to_bytes(health.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, serde_json::json!({ "ok": true, "waiting": 0, "matches": 0 }));

        let metrics = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("arena_waiting_participants 0"));
    }

    #[tokio::test]
    async fn connect_without_credentials_is_unauthorized() {
        let (state, _) = state(10);
        let app = routes(state);

        let missing = app.clone().oneshot(get("/ws")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app.oneshot(get("/ws?token=guess")).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn exhausted_allowance_is_forbidden() {
        let (state, usage) = state(1);
        assert!(usage.try_consume("alice").await.unwrap());
        let app = routes(state);

        let request = Request::builder()
            .uri("/ws")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("daily game limit reached"));
    }

    #[tokio::test]
    async fn admitted_plain_request_is_refused_without_counting_a_game() {
        let (state, usage) = state(1);
        let app = routes(state);

        let request = Request::builder()
            .uri("/ws")
            .header(header::COOKIE, "theme=dark; access_token=secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(response.status(), StatusCode::FORBIDDEN);
        assert!(usage.can_play("alice").await.unwrap());
    }

    #[tokio::test]
    async fn full_match_over_websockets() {
        let (state, usage) = state(10);
        let addr = serve(state).await;

        let mut alice = dial(addr, "secret").await;
        assert_eq!(kind_and_status(&recv(&mut alice).await.unwrap()), ("status", "waiting"));
        send(&mut alice, serde_json::json!({ "type": "chat", "text": "anyone there?" })).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut bob = dial(addr, "hunter2").await;
        let ready_a = recv(&mut alice).await.unwrap();
        let ready_b = recv(&mut bob).await.unwrap();
        assert_eq!(kind_and_status(&ready_a), ("problem", "ready"));
        assert_eq!(ready_a, ready_b);

        alice.send(Message::text("{not json")).await.unwrap();
        send(&mut alice, serde_json::json!({ "type": "chat", "text": "good luck" })).await;
        let chat = recv(&mut bob).await.unwrap();
        assert_eq!(chat["type"], "chat");
        assert_eq!(chat["text"], "good luck");
        assert_eq!(chat["from"], "opponent");

        send(&mut bob, serde_json::json!({ "type": "submit", "code": "guess" })).await;
        let judged = recv(&mut bob).await.unwrap();
        assert_eq!(kind_and_status(&judged), ("result", "judged"));
        assert_eq!(judged["result"]["passed"], 0);

        send(&mut alice, serde_json::json!({ "type": "submit", "code": "solved" })).await;
        let judged = recv(&mut alice).await.unwrap();
        assert_eq!(judged["result"]["passed"], 2);
        assert_eq!(kind_and_status(&recv(&mut alice).await.unwrap()), ("game_end", "win"));
        assert_eq!(kind_and_status(&recv(&mut bob).await.unwrap()), ("game_end", "lose"));
        assert!(recv(&mut alice).await.is_none());
        assert!(recv(&mut bob).await.is_none());

        assert!(usage.can_play("alice").await.unwrap());
        for _ in 0..9 {
            assert!(usage.try_consume("alice").await.unwrap());
        }
        assert!(!usage.can_play("alice").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_socket_forfeits_the_match() {
        let (state, _) = state(10);
        let addr = serve(state).await;

        let mut alice = dial(addr, "secret").await;
        recv(&mut alice).await.unwrap();
        let mut bob = dial(addr, "hunter2").await;
        recv(&mut alice).await.unwrap();
        recv(&mut bob).await.unwrap();

        drop(bob);
        let end = recv(&mut alice).await.unwrap();
        assert_eq!(kind_and_status(&end), ("game_end", "win"));
        assert_eq!(end["msg"], "You won! Your opponent disconnected.");
        assert!(recv(&mut alice).await.is_none());
    }

    #[tokio::test]
    async fn simultaneous_connections_share_one_allowance() {
        let (state, usage) = state(1);
        let addr = serve(state).await;
        let url = format!("ws://{addr}/ws?token=secret");

        // A connection is refused either before the upgrade (403) or right after it.
        let (first, second) = tokio::join!(connect_async(url.clone()), connect_async(url));
        let mut admitted = 0;
        for attempt in [first, second] {
            let Ok((mut client, _)) = attempt else {
                continue;
            };
            let frame = recv(&mut client).await.unwrap();
            if kind_and_status(&frame) == ("status", "waiting") {
                admitted += 1;
            } else {
                assert_eq!(kind_and_status(&frame), ("error", "error"));
                assert!(recv(&mut client).await.is_none());
            }
        }
        assert_eq!(admitted, 1);
        assert!(!usage.can_play("alice").await.unwrap());
    }
}
