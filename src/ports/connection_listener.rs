//! ConnectionListener port - Reactions to connections opening and closing.
//!
//! Listeners are notified after a connection is admitted and again after
//! it closed. Notifications come in pairs, one connect and one disconnect
//! per admitted connection.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::participant::ConnectionDetail;

/// Handler for connection lifecycle notifications.
///
/// Implementations should be:
/// - **Quick** - notifications are awaited with a bounded timeout
/// - **Isolated** - an error or panic is logged and does not affect other
///   listeners or the connection itself
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_connect(&self, detail: &ConnectionDetail) -> Result<(), DomainError>;

    async fn on_disconnect(&self, detail: &ConnectionDetail) -> Result<(), DomainError>;

    /// Listener name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn ConnectionListener) {}
}
