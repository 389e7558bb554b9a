// Presence and timeline notifications for the external event bus.
//
// Publishing is fire-and-forget: delivery failures and timeouts are logged and
// swallowed, never surfaced to the client that triggered them.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const USER_ONLINE: &str = "user.online";
pub const USER_DISCONNECTED: &str = "user.disconnected";
pub const TIMELINE_USER_CONNECTED: &str = "timeline.user_connected";
pub const TIMELINE_USER_JOINED_GROUP: &str = "timeline.user_joined_group";
pub const TIMELINE_USER_LEFT_GROUP: &str = "timeline.user_left_group";
pub const TIMELINE_USER_LEFT: &str = "timeline.user_left";
pub const TIMELINE_CHAT_MESSAGE_SENT: &str = "timeline.chat_message_sent";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusMessage {
    pub subject: &'static str,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// HTTP bridge to the bus: each message is POSTed to `{base}/{subject}`.
#[derive(Clone)]
pub struct HttpEventBus {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventBus {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build event bus http client")?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    async fn deliver(&self, message: &BusMessage) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/{}", self.base_url, message.subject))
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Clone)]
pub enum EventBus {
    Http(HttpEventBus),
    /// No bus configured: messages are only logged.
    Log,
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<Mutex<Vec<BusMessage>>>),
}

#[derive(Clone)]
pub struct PresencePublisher {
    bus: EventBus,
    timeout: Duration,
}

impl PresencePublisher {
    pub fn new(bus: EventBus, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub fn from_config(url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let bus = match url {
            Some(url) => EventBus::Http(HttpEventBus::new(url, timeout)?),
            None => {
                info!("no event bus configured, presence events will only be logged");
                EventBus::Log
            }
        };
        Ok(Self::new(bus, timeout))
    }

    pub async fn user_online(&self, user_id: Uuid) {
        self.publish(USER_ONLINE, json!({ "user_id": user_id })).await;
    }

    pub async fn user_disconnected(&self, user_id: Uuid) {
        self.publish(USER_DISCONNECTED, json!({ "user_id": user_id })).await;
    }

    pub async fn user_connected_to_timeline(&self, user_id: Uuid, video_id: Uuid) {
        self.publish(TIMELINE_USER_CONNECTED, json!({ "user_id": user_id, "video_id": video_id }))
            .await;
    }

    pub async fn user_joined_group(&self, user_id: Uuid, group_id: Uuid, video_id: Uuid) {
        self.publish(
            TIMELINE_USER_JOINED_GROUP,
            json!({ "user_id": user_id, "group_id": group_id, "video_id": video_id }),
        )
        .await;
    }

    /// `participant_ids` are the members the user shared the group with.
    pub async fn user_left_group(&self, user_id: Uuid, group_id: Uuid, participant_ids: &[Uuid]) {
        self.publish(
            TIMELINE_USER_LEFT_GROUP,
            json!({ "user_id": user_id, "group_id": group_id, "participant_ids": participant_ids }),
        )
        .await;
    }

    pub async fn user_left_timeline(&self, user_id: Uuid, video_id: Uuid, watch_time: i64) {
        self.publish(
            TIMELINE_USER_LEFT,
            json!({ "user_id": user_id, "video_id": video_id, "watch_time": watch_time }),
        )
        .await;
    }

    pub async fn chat_message_sent(&self, user_id: Uuid, video_id: Uuid, message_id: Uuid) {
        self.publish(
            TIMELINE_CHAT_MESSAGE_SENT,
            json!({ "user_id": user_id, "video_id": video_id, "message_id": message_id }),
        )
        .await;
    }

    async fn publish(&self, subject: &'static str, payload: Value) {
        let message = BusMessage { subject, payload, published_at: Utc::now() };

        match &self.bus {
            EventBus::Http(bus) => {
                let bus = bus.clone();
                let deadline = self.timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(deadline, bus.deliver(&message)).await {
                        Ok(Ok(())) => debug!(subject = message.subject, "event published"),
                        Ok(Err(error)) => {
                            warn!(subject = message.subject, error = %error, "event publish failed")
                        }
                        Err(_) => warn!(
                            subject = message.subject,
                            timeout_ms = deadline.as_millis() as u64,
                            "event publish timed out"
                        ),
                    }
                });
            }
            EventBus::Log => {
                debug!(subject, payload = %message.payload, "event bus not configured, dropping event")
            }
            EventBus::Memory(published) => {
                published.lock().unwrap_or_else(PoisonError::into_inner).push(message);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(EventBus::Memory(Arc::new(Mutex::new(Vec::new()))), Duration::from_secs(1))
    }

    #[cfg(test)]
    pub(crate) fn published_for_tests(&self) -> Vec<BusMessage> {
        match &self.bus {
            EventBus::Memory(published) => {
                published.lock().unwrap_or_else(PoisonError::into_inner).clone()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use axum::{extract::Path, extract::State, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use super::{
        EventBus, HttpEventBus, PresencePublisher, TIMELINE_USER_LEFT_GROUP, USER_ONLINE,
    };

    type Received = Arc<Mutex<Vec<(String, Value)>>>;

    async fn record(
        State(received): State<Received>,
        Path(subject): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if subject == "user.disconnected" {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        received.lock().expect("lock").push((subject, body));
        StatusCode::ACCEPTED
    }

    async fn spawn_bus() -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
        let addr = listener.local_addr().expect("address");
        let app = Router::new().route("/bus/{subject}", post(record)).with_state(received.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("bus stub should serve");
        });
        (format!("http://{addr}/bus/"), received)
    }

    #[tokio::test]
    async fn memory_bus_captures_subjects_and_payloads() {
        let publisher = PresencePublisher::for_tests();
        let user_id = Uuid::new_v4();
        let group_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        publisher.user_online(user_id).await;
        publisher.user_left_group(user_id, group_id, &[other]).await;

        let published = publisher.published_for_tests();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].subject, USER_ONLINE);
        assert_eq!(published[1].subject, TIMELINE_USER_LEFT_GROUP);
        assert_eq!(published[1].payload["participant_ids"][0], other.to_string());
    }

    #[tokio::test]
    async fn http_bus_posts_to_subject_path() {
        let (base, received) = spawn_bus().await;
        let bus = HttpEventBus::new(&base, Duration::from_secs(1)).expect("bus");
        let publisher = PresencePublisher::new(EventBus::Http(bus), Duration::from_secs(1));
        let user_id = Uuid::new_v4();

        publisher.user_online(user_id).await;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some((subject, body)) = received.lock().expect("lock").first().cloned() {
                assert_eq!(subject, "user.online");
                assert_eq!(body["payload"]["user_id"], user_id.to_string());
                break;
            }
            assert!(Instant::now() < deadline, "event was never delivered");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn slow_bus_does_not_block_the_caller() {
        let (base, _received) = spawn_bus().await;
        let bus = HttpEventBus::new(&base, Duration::from_millis(100)).expect("bus");
        let publisher = PresencePublisher::new(EventBus::Http(bus), Duration::from_millis(100));

        let started = Instant::now();
        publisher.user_disconnected(Uuid::new_v4()).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unreachable_bus_is_swallowed() {
        let bus = HttpEventBus::new("http://127.0.0.1:9", Duration::from_millis(200)).expect("bus");
        let publisher = PresencePublisher::new(EventBus::Http(bus), Duration::from_millis(200));
        publisher.user_online(Uuid::new_v4()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
