//! Bus for single-node deployments.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::room_event::RoutingKey;
use crate::ports::{BusCallback, BusError, BusMessage, EventBus, Subscription};

/// Drops every publish and never delivers.
///
/// With one process, local delivery already reached every socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

impl NoopEventBus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _key: &RoutingKey, _message: BusMessage) -> Result<(), BusError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        key: &RoutingKey,
        _callback: Arc<dyn BusCallback>,
    ) -> Result<Subscription, BusError> {
        Ok(Subscription::inert(key.clone()))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
