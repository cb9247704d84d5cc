//! Association events raised by the grant stores.
//!
//! Dependent read models subscribe here to stay consistent with grant
//! changes. Each grant store publishes under its own write lock, so events
//! for one category arrive in causal order; there is no ordering across
//! categories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempora_core::{PrincipalId, ResourceId};
use tokio::sync::broadcast;

use super::grants::GrantCategory;
use super::privilege::PermissionLevel;

/// What happened to an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// A principal was associated with a resource.
    Created,
    /// The grant level changed.
    Updated,
    /// The association was revoked.
    Removed,
}

/// An association change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationEvent {
    /// Grant table the change happened in.
    pub category: GrantCategory,
    /// Resource instance.
    pub resource_id: ResourceId,
    /// Associated principal.
    pub principal_id: PrincipalId,
    /// New level, `None` when removed.
    pub level: Option<PermissionLevel>,
    /// Kind of change.
    pub kind: AssociationKind,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
}

impl AssociationEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(
        category: GrantCategory,
        resource_id: ResourceId,
        principal_id: PrincipalId,
        level: Option<PermissionLevel>,
        kind: AssociationKind,
    ) -> Self {
        Self {
            category,
            resource_id,
            principal_id,
            level,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Default channel capacity for association broadcasts.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcaster for association events.
#[derive(Clone)]
pub struct AssociationBroadcaster {
    sender: broadcast::Sender<AssociationEvent>,
}

impl AssociationBroadcaster {
    /// Create a new broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broadcaster with custom capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: AssociationEvent) -> usize {
        // No subscribers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to receive events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssociationEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AssociationBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AssociationBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Log every association change until the channel closes.
///
/// Spawned by the gateway as the audit trail for grant changes.
pub async fn audit_associations(mut rx: broadcast::Receiver<AssociationEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::info!(
                    category = %event.category,
                    resource_id = %event.resource_id,
                    principal_id = %event.principal_id,
                    level = ?event.level,
                    kind = ?event.kind,
                    "Association changed"
                );
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Association audit lagged, missed {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: AssociationKind) -> AssociationEvent {
        AssociationEvent::new(
            GrantCategory::Project,
            ResourceId::new(1),
            PrincipalId::new(2),
            Some(PermissionLevel::Read),
            kind,
        )
    }

    #[tokio::test]
    async fn test_broadcaster() {
        let broadcaster = AssociationBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        assert_eq!(broadcaster.publish(event(AssociationKind::Created)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, AssociationKind::Created);
        assert_eq!(received.resource_id, ResourceId::new(1));
    }

    #[test]
    fn test_no_subscribers() {
        let broadcaster = AssociationBroadcaster::new();
        assert_eq!(broadcaster.publish(event(AssociationKind::Removed)), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(event(AssociationKind::Updated)).unwrap();
        assert_eq!(json["category"], "project");
        assert_eq!(json["kind"], "updated");
        assert_eq!(json["level"], "READ");
        assert_eq!(json["resource_id"], 1);
    }
}
