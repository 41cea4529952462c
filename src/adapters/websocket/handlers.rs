//! Built-in message handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::participant::Connection;
use crate::domain::room_event::{event_types, Audience, RoomEvent, SignalPayload, StorageEvent};
use crate::ports::{latest_matching, EventArchive, EventFilter, HotEventStore};

use super::dispatcher::MessageHandler;
use super::messages::{
    message_types, CodeMessage, ReactionMessage, ScreenShareChanged, ScreenShareToggleMessage,
    VideoChatSignalMessage,
};
use super::router::EventRouter;
use super::sender::SendError;

fn missing_payload(message_type: &str) -> DomainError {
    DomainError::validation("Value", format!("'{}' requires a payload", message_type))
}

fn payload_error(e: serde_json::Error) -> DomainError {
    DomainError::new(ErrorCode::InternalError, format!("Payload encoding failed: {}", e))
}

fn delivery_error(e: SendError) -> DomainError {
    DomainError::new(ErrorCode::DeliveryFailed, e.to_string())
}

/// `reaction` → stateless `reaction` event to everyone else in the room.
pub struct ReactionHandler {
    router: Arc<EventRouter>,
}

impl ReactionHandler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for ReactionHandler {
    type Payload = ReactionMessage;

    fn supported_type(&self) -> &'static str {
        message_types::REACTION
    }

    fn name(&self) -> &'static str {
        "ReactionHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        payload: Option<ReactionMessage>,
    ) -> Result<(), DomainError> {
        let reaction = payload.ok_or_else(|| missing_payload(message_types::REACTION))?;

        let event = RoomEvent::builder(connection.room_id(), event_types::REACTION)
            .created_by(connection.user_id())
            .payload(&reaction)
            .map_err(payload_error)?
            .build();

        self.router
            .broadcast(event, Audience::RoomExcept(connection.user_id()))
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// `code` → stateful `code` event carrying the full editor content.
pub struct CodeHandler {
    router: Arc<EventRouter>,
}

impl CodeHandler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for CodeHandler {
    type Payload = CodeMessage;

    fn supported_type(&self) -> &'static str {
        message_types::CODE
    }

    fn name(&self) -> &'static str {
        "CodeHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        payload: Option<CodeMessage>,
    ) -> Result<(), DomainError> {
        let code = payload.ok_or_else(|| missing_payload(message_types::CODE))?;

        let event = RoomEvent::builder(connection.room_id(), event_types::CODE)
            .stateful()
            .created_by(connection.user_id())
            .payload(&code)
            .map_err(payload_error)?
            .build();

        self.router
            .broadcast(event, Audience::RoomExcept(connection.user_id()))
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// `code-state-request` → the latest `code` event, to the asking
/// connection only.
///
/// Reads the hot store newest-first and falls back to the archive when the
/// hot tier has nothing (or is unavailable).
pub struct CodeStateRequestHandler {
    router: Arc<EventRouter>,
    hot_store: Arc<dyn HotEventStore>,
    archive: Arc<dyn EventArchive>,
}

impl CodeStateRequestHandler {
    pub fn new(
        router: Arc<EventRouter>,
        hot_store: Arc<dyn HotEventStore>,
        archive: Arc<dyn EventArchive>,
    ) -> Self {
        Self {
            router,
            hot_store,
            archive,
        }
    }

    async fn latest_code(
        &self,
        connection: &Connection,
    ) -> Result<Option<StorageEvent>, DomainError> {
        let filter = EventFilter::for_room(connection.room_id())
            .with_type(event_types::CODE)
            .stateful_only();

        let hot_error = match latest_matching(self.hot_store.as_ref(), filter).await {
            Ok(Some(event)) => return Ok(Some(event)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    room_id = %connection.room_id(),
                    error = %e,
                    "Hot store lookup failed, trying archive"
                );
                Some(e)
            }
        };

        let archived = self
            .archive
            .latest(&connection.room_id(), event_types::CODE)
            .await
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?;

        // Nothing archived says nothing about recent edits the hot tier holds
        match (archived, hot_error) {
            (None, Some(e)) => Err(DomainError::new(ErrorCode::HotStoreError, e.to_string())
                .with_detail("store", self.hot_store.name())),
            (archived, _) => Ok(archived),
        }
    }
}

#[async_trait]
impl MessageHandler for CodeStateRequestHandler {
    type Payload = JsonValue;

    fn supported_type(&self) -> &'static str {
        message_types::CODE_STATE_REQUEST
    }

    fn name(&self) -> &'static str {
        "CodeStateRequestHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        _payload: Option<JsonValue>,
    ) -> Result<(), DomainError> {
        let Some(stored) = self.latest_code(connection).await? else {
            tracing::debug!(room_id = %connection.room_id(), "No code state to send");
            return Ok(());
        };

        let event = stored.to_room_event().map_err(|e| {
            DomainError::new(ErrorCode::InternalError, "Stored code event is corrupt")
                .with_detail("event_id", stored.id.to_string())
                .with_detail("error", e.to_string())
        })?;

        self.router
            .reply(connection, event)
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// `screen-share-toggle` → updates the connection flag and broadcasts
/// `screen-share-changed` when it actually changed.
pub struct ScreenShareToggleHandler {
    router: Arc<EventRouter>,
}

impl ScreenShareToggleHandler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for ScreenShareToggleHandler {
    type Payload = ScreenShareToggleMessage;

    fn supported_type(&self) -> &'static str {
        message_types::SCREEN_SHARE_TOGGLE
    }

    fn name(&self) -> &'static str {
        "ScreenShareToggleHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        payload: Option<ScreenShareToggleMessage>,
    ) -> Result<(), DomainError> {
        let toggle = payload.ok_or_else(|| missing_payload(message_types::SCREEN_SHARE_TOGGLE))?;

        if connection.set_screen_share(toggle.enabled) == toggle.enabled {
            return Ok(());
        }

        let changed = ScreenShareChanged {
            user_id: connection.user_id(),
            enabled: toggle.enabled,
        };
        let event = RoomEvent::builder(connection.room_id(), event_types::SCREEN_SHARE_CHANGED)
            .created_by(connection.user_id())
            .payload(&changed)
            .map_err(payload_error)?
            .build();

        self.router
            .broadcast(event, Audience::RoomExcept(connection.user_id()))
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// `video-chat-signal` → `video-chat-signal-received` for one peer.
///
/// Signals are transient: published so a peer on another node gets them,
/// never persisted.
pub struct VideoChatSignalHandler {
    router: Arc<EventRouter>,
}

impl VideoChatSignalHandler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for VideoChatSignalHandler {
    type Payload = VideoChatSignalMessage;

    fn supported_type(&self) -> &'static str {
        message_types::VIDEO_CHAT_SIGNAL
    }

    fn name(&self) -> &'static str {
        "VideoChatSignalHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        payload: Option<VideoChatSignalMessage>,
    ) -> Result<(), DomainError> {
        let message = payload.ok_or_else(|| missing_payload(message_types::VIDEO_CHAT_SIGNAL))?;

        let signal = SignalPayload {
            from: connection.user_id(),
            signal: message.signal,
        };
        let event =
            RoomEvent::builder(connection.room_id(), event_types::VIDEO_CHAT_SIGNAL_RECEIVED)
                .created_by(connection.user_id())
                .built_payload(&signal)
                .build();

        self.router
            .signal(event, Audience::User(message.target_user_id))
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

/// `ping` → `pong` to the sender only.
pub struct PingHandler {
    router: Arc<EventRouter>,
}

impl PingHandler {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl MessageHandler for PingHandler {
    type Payload = JsonValue;

    fn supported_type(&self) -> &'static str {
        message_types::PING
    }

    fn name(&self) -> &'static str {
        "PingHandler"
    }

    async fn handle(
        &self,
        connection: &Arc<Connection>,
        _payload: Option<JsonValue>,
    ) -> Result<(), DomainError> {
        let event = RoomEvent::builder(connection.room_id(), event_types::PONG).build();
        self.router
            .reply(connection, event)
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::archive::InMemoryEventArchive;
    use crate::adapters::bus::InMemoryEventBus;
    use crate::adapters::hot_store::InMemoryHotEventStore;
    use crate::adapters::serialization::JsonEventSerializer;
    use crate::adapters::websocket::registry::ConnectionRegistry;
    use crate::domain::foundation::{EventId, ParticipantId, RoomId, UserId};
    use crate::domain::participant::{OutboundFrame, ParticipantType};
    use crate::ports::{HotStoreError, ScanOrder, ScanPage, ServerId};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        store: Arc<InMemoryHotEventStore>,
        archive: Arc<InMemoryEventArchive>,
        bus: InMemoryEventBus,
        router: Arc<EventRouter>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(InMemoryHotEventStore::new());
        let bus = InMemoryEventBus::new();
        let router = Arc::new(EventRouter::new(
            registry.clone(),
            store.clone(),
            Arc::new(bus.clone()),
            ServerId::new("node-a"),
            JsonEventSerializer::new(),
        ));
        Fixture {
            registry,
            store,
            archive: Arc::new(InMemoryEventArchive::new()),
            bus,
            router,
        }
    }

    fn join(
        registry: &ConnectionRegistry,
        room: RoomId,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (connection, rx) = Connection::open(
            ParticipantId::new(),
            UserId::new(),
            room,
            ParticipantType::Examinee,
            8,
        );
        registry.register(&connection);
        (connection, rx)
    }

    fn received(rx: &mut mpsc::Receiver<OutboundFrame>) -> Option<RoomEvent> {
        match rx.try_recv().ok()? {
            OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
            OutboundFrame::Close => None,
        }
    }

    #[tokio::test]
    async fn reaction_without_payload_is_rejected() {
        let f = fixture();
        let (connection, _rx) = join(&f.registry, RoomId::new());
        let result = ReactionHandler::new(f.router.clone())
            .handle(&connection, None)
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn bare_reaction_is_forwarded_unchanged() {
        let f = fixture();
        let room = RoomId::new();
        let (sender, mut rx_sender) = join(&f.registry, room);
        let (_peer, mut rx_peer) = join(&f.registry, room);

        ReactionHandler::new(f.router.clone())
            .handle(&sender, Some(ReactionMessage::Bare("👍".to_string())))
            .await
            .unwrap();

        let event = received(&mut rx_peer).unwrap();
        assert_eq!(event.event_type, event_types::REACTION);
        assert!(!event.stateful);
        assert_eq!(event.value, Some(json!("👍")));
        assert!(f.store.contains(&event.id));
        assert!(received(&mut rx_sender).is_none());
    }

    #[tokio::test]
    async fn code_event_is_stateful_and_persisted() {
        let f = fixture();
        let room = RoomId::new();
        let (author, _rx_author) = join(&f.registry, room);
        let (_peer, mut rx_peer) = join(&f.registry, room);

        CodeHandler::new(f.router.clone())
            .handle(
                &author,
                Some(CodeMessage {
                    content: "fn main() {}".to_string(),
                    language: Some("rust".to_string()),
                }),
            )
            .await
            .unwrap();

        let event = received(&mut rx_peer).unwrap();
        assert!(event.stateful);
        assert_eq!(event.event_type, event_types::CODE);
        assert_eq!(event.created_by_id, Some(author.user_id()));
        assert!(f.store.contains(&event.id));
    }

    #[tokio::test]
    async fn code_state_request_replies_with_latest_hot_event() {
        let f = fixture();
        let room = RoomId::new();
        let (author, _rx_author) = join(&f.registry, room);
        let (asking, mut rx_asking) = join(&f.registry, room);
        let code = CodeHandler::new(f.router.clone());
        for content in ["v1", "v2"] {
            code.handle(
                &author,
                Some(CodeMessage {
                    content: content.to_string(),
                    language: None,
                }),
            )
            .await
            .unwrap();
        }
        while rx_asking.try_recv().is_ok() {}

        CodeStateRequestHandler::new(f.router.clone(), f.store.clone(), f.archive.clone())
            .handle(&asking, None)
            .await
            .unwrap();

        let reply = received(&mut rx_asking).unwrap();
        assert_eq!(reply.value_as::<CodeMessage>().unwrap().content, "v2");
    }

    #[tokio::test]
    async fn code_state_request_falls_back_to_archive() {
        let f = fixture();
        let room = RoomId::new();
        let (asking, mut rx) = join(&f.registry, room);
        let archived = RoomEvent::builder(room, event_types::CODE)
            .stateful()
            .payload(&json!({"Content": "archived"}))
            .unwrap()
            .build();
        f.archive
            .store(&[StorageEvent::from(&archived)])
            .await
            .unwrap();

        CodeStateRequestHandler::new(f.router.clone(), f.store.clone(), f.archive.clone())
            .handle(&asking, None)
            .await
            .unwrap();

        assert_eq!(received(&mut rx).unwrap().id, archived.id);
    }

    struct UnavailableStore;

    #[async_trait]
    impl HotEventStore for UnavailableStore {
        async fn add(&self, _event: StorageEvent) -> Result<(), HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }

        async fn fetch_page(
            &self,
            _filter: &EventFilter,
            _order: ScanOrder,
            _offset: usize,
            _limit: usize,
        ) -> Result<ScanPage, HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }

        async fn delete(&self, _ids: &[EventId]) -> Result<u64, HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }

        fn name(&self) -> &'static str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn unavailable_hot_store_still_serves_archived_state() {
        let f = fixture();
        let room = RoomId::new();
        let (asking, mut rx) = join(&f.registry, room);
        let archived = RoomEvent::builder(room, event_types::CODE).stateful().build();
        f.archive
            .store(&[StorageEvent::from(&archived)])
            .await
            .unwrap();

        CodeStateRequestHandler::new(
            f.router.clone(),
            Arc::new(UnavailableStore),
            f.archive.clone(),
        )
        .handle(&asking, None)
        .await
        .unwrap();

        assert_eq!(received(&mut rx).unwrap().id, archived.id);
    }

    #[tokio::test]
    async fn unavailable_hot_store_with_empty_archive_is_a_hot_store_error() {
        let f = fixture();
        let (asking, mut rx) = join(&f.registry, RoomId::new());

        let error = CodeStateRequestHandler::new(
            f.router.clone(),
            Arc::new(UnavailableStore),
            f.archive.clone(),
        )
        .handle(&asking, None)
        .await
        .unwrap_err();

        assert_eq!(error.code, ErrorCode::HotStoreError);
        assert!(!error.code.is_client_error());
        assert!(received(&mut rx).is_none());
    }

    #[tokio::test]
    async fn screen_share_broadcasts_only_on_change() {
        let f = fixture();
        let room = RoomId::new();
        let (sharer, _rx_sharer) = join(&f.registry, room);
        let (_peer, mut rx_peer) = join(&f.registry, room);
        let handler = ScreenShareToggleHandler::new(f.router.clone());

        handler
            .handle(&sharer, Some(ScreenShareToggleMessage { enabled: true }))
            .await
            .unwrap();
        handler
            .handle(&sharer, Some(ScreenShareToggleMessage { enabled: true }))
            .await
            .unwrap();

        assert!(sharer.screen_share_enabled());
        let event = received(&mut rx_peer).unwrap();
        assert_eq!(event.event_type, event_types::SCREEN_SHARE_CHANGED);
        assert!(received(&mut rx_peer).is_none());
    }

    #[tokio::test]
    async fn video_signal_reaches_target_only_and_is_not_persisted() {
        let f = fixture();
        let room = RoomId::new();
        let (caller, _rx_caller) = join(&f.registry, room);
        let (callee, mut rx_callee) = join(&f.registry, room);
        let (_bystander, mut rx_bystander) = join(&f.registry, room);

        VideoChatSignalHandler::new(f.router.clone())
            .handle(
                &caller,
                Some(VideoChatSignalMessage {
                    target_user_id: callee.user_id(),
                    signal: json!({"type": "offer"}),
                }),
            )
            .await
            .unwrap();

        let event = received(&mut rx_callee).unwrap();
        assert_eq!(event.value.unwrap()["From"], json!(caller.user_id()));
        assert!(received(&mut rx_bystander).is_none());
        assert!(f.store.is_empty());
        assert_eq!(f.bus.message_count(), 1);
    }

    #[tokio::test]
    async fn ping_replies_pong_without_side_effects() {
        let f = fixture();
        let (connection, mut rx) = join(&f.registry, RoomId::new());

        PingHandler::new(f.router.clone())
            .handle(&connection, None)
            .await
            .unwrap();

        assert_eq!(received(&mut rx).unwrap().event_type, event_types::PONG);
        assert!(f.store.is_empty());
        assert_eq!(f.bus.message_count(), 0);
    }
}
