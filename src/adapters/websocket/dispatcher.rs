//! Inbound message dispatch.
//!
//! Handlers are registered explicitly at startup, keyed by the exact
//! message type they accept. Each inbound frame is decoded once; the
//! payload is then decoded per handler into that handler's own type.
//!
//! # Failure isolation
//!
//! - Malformed frames are logged and dropped
//! - Unknown message types are ignored
//! - A handler error or panic is logged; other handlers for the same type
//!   still run and the connection stays open

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::adapters::serialization::JsonEventSerializer;
use crate::domain::foundation::DomainError;
use crate::domain::participant::Connection;

use super::messages::InboundFrame;

/// Handler for one inbound message type.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Payload type decoded from the frame's `Value`.
    type Payload: DeserializeOwned + Send;

    /// Exact, case-sensitive message type this handler accepts.
    fn supported_type(&self) -> &'static str;

    /// Handler name for logging.
    fn name(&self) -> &'static str;

    /// Handle one message.
    ///
    /// `payload` is `None` when the frame had no value or the value did
    /// not decode into [`Self::Payload`].
    async fn handle(
        &self,
        connection: &Arc<Connection>,
        payload: Option<Self::Payload>,
    ) -> Result<(), DomainError>;
}

/// Object-safe view of a [`MessageHandler`].
#[async_trait]
trait RegisteredHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle_value(
        &self,
        connection: &Arc<Connection>,
        value: Option<JsonValue>,
    ) -> Result<(), DomainError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: MessageHandler> RegisteredHandler for Typed<H> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn handle_value(
        &self,
        connection: &Arc<Connection>,
        value: Option<JsonValue>,
    ) -> Result<(), DomainError> {
        let payload = value.and_then(|value| match serde_json::from_value(value) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::debug!(
                    handler = self.0.name(),
                    error = %e,
                    "Payload did not match handler type"
                );
                None
            }
        });
        self.0.handle(connection, payload).await
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was not a valid `{Type, Value}` object.
    Malformed,
    /// No handler is registered for the type.
    Unhandled { message_type: String },
    /// Handlers ran; `failed` of them returned an error or panicked.
    Handled { handlers: usize, failed: usize },
}

/// Builder collecting handlers before dispatch starts.
#[derive(Default)]
pub struct MessageDispatcherBuilder {
    handlers: HashMap<&'static str, Vec<Arc<dyn RegisteredHandler>>>,
    serializer: JsonEventSerializer,
}

impl MessageDispatcherBuilder {
    /// Register a handler under its supported type.
    pub fn register<H: MessageHandler>(mut self, handler: H) -> Self {
        let message_type = handler.supported_type();
        self.handlers
            .entry(message_type)
            .or_default()
            .push(Arc::new(Typed(handler)));
        self
    }

    pub fn build(self) -> MessageDispatcher {
        MessageDispatcher {
            handlers: self.handlers,
            serializer: self.serializer,
        }
    }
}

/// Routes inbound frames to their registered handlers.
pub struct MessageDispatcher {
    handlers: HashMap<&'static str, Vec<Arc<dyn RegisteredHandler>>>,
    serializer: JsonEventSerializer,
}

impl MessageDispatcher {
    pub fn builder() -> MessageDispatcherBuilder {
        MessageDispatcherBuilder::default()
    }

    /// Message types with at least one handler.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Decode a text frame and run every handler registered for its type.
    ///
    /// Handlers run one after another, each on its own task so a panic is
    /// contained.
    pub async fn handle_inbound(
        &self,
        connection: &Arc<Connection>,
        text: &str,
    ) -> DispatchOutcome {
        let Some(frame) = self.serializer.deserialize::<InboundFrame>(text) else {
            tracing::warn!(
                connection_id = %connection.id(),
                room_id = %connection.room_id(),
                "Dropping malformed frame"
            );
            return DispatchOutcome::Malformed;
        };

        let Some(handlers) = self.handlers.get(frame.message_type.as_str()) else {
            tracing::debug!(
                connection_id = %connection.id(),
                message_type = %frame.message_type,
                "No handler for message type"
            );
            return DispatchOutcome::Unhandled {
                message_type: frame.message_type,
            };
        };

        let mut failed = 0;
        for handler in handlers {
            let task = {
                let handler = Arc::clone(handler);
                let connection = Arc::clone(connection);
                let value = frame.value.clone();
                tokio::spawn(async move { handler.handle_value(&connection, value).await })
            };

            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.code.is_client_error() => {
                    failed += 1;
                    tracing::debug!(
                        handler = handler.name(),
                        connection_id = %connection.id(),
                        message_type = %frame.message_type,
                        error = %e,
                        "Message rejected"
                    );
                }
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(
                        handler = handler.name(),
                        connection_id = %connection.id(),
                        message_type = %frame.message_type,
                        error = %e,
                        "Message handler failed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        handler = handler.name(),
                        connection_id = %connection.id(),
                        message_type = %frame.message_type,
                        panicked = e.is_panic(),
                        "Message handler aborted"
                    );
                }
            }
        }

        DispatchOutcome::Handled {
            handlers: handlers.len(),
            failed,
        }
    }
}
