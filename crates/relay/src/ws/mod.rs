pub mod handler;
pub mod protocol;
pub mod session;

use std::time::Duration;

use axum::{routing::get, Router};

use crate::auth::IdentityService;
use crate::config::RelayConfig;
use crate::timeline::TimelineEngine;

pub use session::ConnectionRegistry;

/// Shared state behind `GET /v1/ws`.
#[derive(Clone)]
pub struct WsState {
    pub engine: TimelineEngine,
    pub identity: IdentityService,
    /// Time allowed between socket open and a successful `startup`.
    pub auth_timeout: Duration,
    pub identity_timeout: Duration,
}

impl WsState {
    pub fn new(engine: TimelineEngine, identity: IdentityService, config: &RelayConfig) -> Self {
        Self {
            engine,
            identity,
            auth_timeout: config.auth_timeout,
            identity_timeout: config.identity_timeout,
        }
    }
}

pub fn router(state: WsState) -> Router {
    Router::new().route("/v1/ws", get(handler::ws_upgrade)).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cowatch_common::protocol::ws::{ClientEvent, ServerEvent};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{protocol::frame::coding::CloseCode, Message as WsFrame},
        MaybeTlsStream, WebSocketStream,
    };
    use uuid::Uuid;

    use super::{router, WsState};
    use crate::auth::{Identity, IdentityService, Profile};
    use crate::presence::{PresencePublisher, USER_DISCONNECTED, USER_ONLINE};
    use crate::rooms::RoomRouter;
    use crate::store::TimelineStore;
    use crate::timeline::TimelineEngine;
    use crate::validation::MAX_WS_FRAME_BYTES;

    type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    struct TestRelay {
        ws_url: String,
        identity: IdentityService,
        store: TimelineStore,
        presence: PresencePublisher,
    }

    impl TestRelay {
        async fn start(auth_timeout: Duration) -> Self {
            let store = TimelineStore::in_memory();
            let presence = PresencePublisher::for_tests();
            let identity = IdentityService::for_tests();
            let engine =
                TimelineEngine::new(store.clone(), RoomRouter::default(), presence.clone(), 50);
            let state = WsState {
                engine,
                identity: identity.clone(),
                auth_timeout,
                identity_timeout: Duration::from_secs(2),
            };

            let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
            let addr = listener.local_addr().expect("listener should expose local address");
            let app = router(state);
            tokio::spawn(async move {
                axum::serve(listener, app).await.expect("relay server should run for test");
            });

            Self { ws_url: format!("ws://{addr}/v1/ws"), identity, store, presence }
        }

        async fn user(&self, token: &str, username: &str) -> Uuid {
            let user_id = Uuid::new_v4();
            let identity = Identity {
                user_id,
                profile: Profile { username: username.into(), ..Profile::default() },
            };
            self.identity.register_for_tests(token, identity).await;
            user_id
        }

        async fn open(&self) -> ClientSocket {
            let (socket, _) =
                connect_async(self.ws_url.as_str()).await.expect("websocket should connect");
            socket
        }

        /// Opens a socket, authenticates with `startup` and joins `video_id`.
        async fn watching(&self, token: &str, video_id: Uuid) -> ClientSocket {
            let mut socket = self.open().await;
            ws_send(&mut socket, &ClientEvent::Startup { auth_token: token.to_string() }).await;
            assert_eq!(ws_recv(&mut socket).await.name(), "authenticated");
            ws_send(&mut socket, &ClientEvent::TimelineConnect { video_id }).await;
            recv_named(&mut socket, "timeline_user_avatars").await;
            socket
        }
    }

    async fn ws_send(socket: &mut ClientSocket, event: &ClientEvent) {
        let raw = serde_json::to_string(event).expect("event should serialize");
        socket.send(WsFrame::Text(raw.into())).await.expect("frame should send");
    }

    async fn ws_recv(socket: &mut ClientSocket) -> ServerEvent {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for websocket frame");
            let frame =
                next.expect("websocket should remain open").expect("websocket frame should decode");

            match frame {
                WsFrame::Text(payload) => {
                    return serde_json::from_str::<ServerEvent>(&payload)
                        .expect("text frame should decode as server event");
                }
                WsFrame::Ping(payload) => {
                    socket.send(WsFrame::Pong(payload)).await.expect("pong should send");
                }
                WsFrame::Close(frame) => panic!("websocket closed unexpectedly: {frame:?}"),
                WsFrame::Binary(_) | WsFrame::Pong(_) | WsFrame::Frame(_) => {}
            }
        }
    }

    async fn recv_named(socket: &mut ClientSocket, name: &str) -> ServerEvent {
        loop {
            let event = ws_recv(socket).await;
            if event.name() == name {
                return event;
            }
        }
    }

    /// Reads until the server closes. Returns the close code, if one was sent.
    async fn recv_close(socket: &mut ClientSocket) -> Option<CloseCode> {
        loop {
            let next = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("timed out waiting for close");
            match next {
                Some(Ok(WsFrame::Close(frame))) => return frame.map(|frame| frame.code),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    }

    #[tokio::test]
    async fn ping_is_answered_before_authentication() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let mut socket = relay.open().await;

        ws_send(&mut socket, &ClientEvent::Ping).await;
        assert_eq!(ws_recv(&mut socket).await, ServerEvent::Pong);
    }

    #[tokio::test]
    async fn timeline_event_before_startup_is_fatal() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let mut socket = relay.open().await;

        ws_send(&mut socket, &ClientEvent::TimelineConnect { video_id: Uuid::new_v4() }).await;

        match ws_recv(&mut socket).await {
            ServerEvent::FatalError { code, .. } => assert_eq!(code, "AUTH_REQUIRED"),
            other => panic!("expected fatal_error, got {other:?}"),
        }
        assert_eq!(recv_close(&mut socket).await, Some(CloseCode::Policy));
    }

    #[tokio::test]
    async fn invalid_startup_token_is_fatal() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let mut socket = relay.open().await;

        ws_send(&mut socket, &ClientEvent::Startup { auth_token: "nope".into() }).await;

        match ws_recv(&mut socket).await {
            ServerEvent::FatalError { code, .. } => assert_eq!(code, "AUTH_INVALID_TOKEN"),
            other => panic!("expected fatal_error, got {other:?}"),
        }
        assert_eq!(recv_close(&mut socket).await, Some(CloseCode::Policy));
    }

    #[tokio::test]
    async fn missing_startup_times_out() {
        let relay = TestRelay::start(Duration::from_millis(200)).await;
        let mut socket = relay.open().await;

        match ws_recv(&mut socket).await {
            ServerEvent::FatalError { code, .. } => assert_eq!(code, "AUTH_REQUIRED"),
            other => panic!("expected fatal_error, got {other:?}"),
        }
        assert_eq!(recv_close(&mut socket).await, Some(CloseCode::Policy));
    }

    #[tokio::test]
    async fn startup_then_connect_delivers_snapshot() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let user_id = relay.user("token-ana", "ana").await;
        let video_id = Uuid::new_v4();
        let mut socket = relay.open().await;

        ws_send(&mut socket, &ClientEvent::Startup { auth_token: "token-ana".into() }).await;
        assert_eq!(ws_recv(&mut socket).await, ServerEvent::Authenticated { user_id });

        ws_send(&mut socket, &ClientEvent::TimelineConnect { video_id }).await;
        let mut names = Vec::new();
        for _ in 0..5 {
            names.push(ws_recv(&mut socket).await.name());
        }
        assert_eq!(
            names,
            vec![
                "timeline_chat_history",
                "timeline_status",
                "timeline_server_timestamp",
                "timeline_single_users",
                "timeline_user_avatars",
            ]
        );

        let session = relay.store.sessions.get_by_user(user_id).await.expect("lookup");
        assert_eq!(session.map(|session| session.video_id), Some(video_id));
        let subjects: Vec<_> =
            relay.presence.published_for_tests().iter().map(|message| message.subject).collect();
        assert_eq!(subjects.first(), Some(&USER_ONLINE));
    }

    #[tokio::test]
    async fn query_token_authenticates_during_upgrade() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let user_id = relay.user("token-ben", "ben").await;

        let url = format!("{}?token=token-ben", relay.ws_url);
        let (mut socket, _) = connect_async(url.as_str()).await.expect("websocket should connect");

        assert_eq!(ws_recv(&mut socket).await, ServerEvent::Authenticated { user_id });
    }

    #[tokio::test]
    async fn bad_query_token_rejects_upgrade() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let url = format!("{}?token=forged", relay.ws_url);

        assert!(connect_async(url.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_recoverable() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let mut socket = relay.open().await;

        socket.send(WsFrame::Text("not json".into())).await.expect("send");
        match ws_recv(&mut socket).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "VALIDATION_FAILED"),
            other => panic!("expected error, got {other:?}"),
        }

        ws_send(&mut socket, &ClientEvent::Ping).await;
        assert_eq!(ws_recv(&mut socket).await, ServerEvent::Pong);
    }

    #[tokio::test]
    async fn oversized_frame_closes_with_size_code() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let mut socket = relay.open().await;

        let oversized = "x".repeat(MAX_WS_FRAME_BYTES + 1);
        socket.send(WsFrame::Text(oversized.into())).await.expect("send");

        assert_eq!(recv_close(&mut socket).await, Some(CloseCode::Size));
    }

    #[tokio::test]
    async fn non_host_timecode_gets_error_event() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let video_id = Uuid::new_v4();
        let host_id = relay.user("token-host", "host").await;
        relay.user("token-guest", "guest").await;
        let mut host = relay.watching("token-host", video_id).await;
        let mut guest = relay.watching("token-guest", video_id).await;

        ws_send(&mut guest, &ClientEvent::TimelineJoinUser { target_user_id: host_id }).await;
        let joined = recv_named(&mut guest, "timeline_you_joined_group").await;
        let ServerEvent::TimelineYouJoinedGroup { group_id, .. } = joined else {
            panic!("expected timeline_you_joined_group");
        };
        assert_eq!(
            recv_named(&mut host, "timeline_start_voice_chat").await,
            ServerEvent::TimelineStartVoiceChat { group_id }
        );

        ws_send(&mut guest, &ClientEvent::TimelineUpdateTimecode { timecode: 42, server_timestamp: None })
            .await;
        match ws_recv(&mut guest).await {
            ServerEvent::Error { code, retryable, .. } => {
                assert_eq!(code, "NOT_GROUP_HOST");
                assert!(!retryable);
            }
            other => panic!("expected error, got {other:?}"),
        }

        ws_send(&mut host, &ClientEvent::TimelineUpdateTimecode { timecode: 42, server_timestamp: Some(7) })
            .await;
        match recv_named(&mut guest, "timeline_timecode").await {
            ServerEvent::TimelineTimecode { timecode, server_timestamp, .. } => {
                assert_eq!((timecode, server_timestamp), (42, 7));
            }
            other => panic!("expected timecode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_socket_removes_watcher() {
        let relay = TestRelay::start(Duration::from_secs(10)).await;
        let video_id = Uuid::new_v4();
        let leaver_id = relay.user("token-leaver", "leaver").await;
        let stayer_id = relay.user("token-stayer", "stayer").await;
        let mut leaver = relay.watching("token-leaver", video_id).await;
        let mut stayer = relay.watching("token-stayer", video_id).await;

        leaver.close(None).await.expect("close should send");

        loop {
            if let ServerEvent::TimelineSingleUsers { users, .. } =
                recv_named(&mut stayer, "timeline_single_users").await
            {
                let ids: Vec<Uuid> = users.iter().map(|user| user.user_id).collect();
                if ids == vec![stayer_id] {
                    break;
                }
            }
        }

        assert!(relay.store.sessions.get_by_user(leaver_id).await.expect("lookup").is_none());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !relay
            .presence
            .published_for_tests()
            .iter()
            .any(|message| message.subject == USER_DISCONNECTED)
        {
            assert!(tokio::time::Instant::now() < deadline, "user.disconnected was not published");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
