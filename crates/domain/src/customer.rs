//! Local user to remote customer mapping.
//!
//! The commerce system gets one customer record per chat user. The mapping
//! lives on its own stream keyed by a derived id, so concurrent syncs for two
//! orders of the same user agree on a single remote customer.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventStore, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::command::CommandHandler;
use crate::error::DomainError;
use crate::order::{RemoteCustomerId, UserId};

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("User already linked to remote customer {existing}")]
    AlreadyLinked { existing: RemoteCustomerId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CustomerEvent {
    CustomerLinked(CustomerLinkedData),
}

impl DomainEvent for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerLinked(_) => "CustomerLinked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerLinkedData {
    pub link_id: AggregateId,
    pub user_id: UserId,
    pub remote_customer_id: RemoteCustomerId,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerLink {
    id: Option<AggregateId>,
    version: Version,
    user_id: Option<UserId>,
    remote_customer_id: Option<RemoteCustomerId>,
}

impl Aggregate for CustomerLink {
    type Event = CustomerEvent;
    type Error = CustomerError;

    fn aggregate_type() -> &'static str {
        "CustomerLink"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CustomerEvent::CustomerLinked(data) => {
                self.id = Some(data.link_id);
                self.user_id = Some(data.user_id);
                self.remote_customer_id = Some(data.remote_customer_id);
            }
        }
    }
}

impl CustomerLink {
    pub fn key(user_id: UserId) -> AggregateId {
        AggregateId::derived("customer", &user_id.to_string())
    }

    pub fn remote_customer_id(&self) -> Option<&RemoteCustomerId> {
        self.remote_customer_id.as_ref()
    }

    pub fn link(
        &self,
        user_id: UserId,
        remote_customer_id: RemoteCustomerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CustomerEvent>, CustomerError> {
        if let Some(existing) = &self.remote_customer_id {
            return Err(CustomerError::AlreadyLinked {
                existing: existing.clone(),
            });
        }

        Ok(vec![CustomerEvent::CustomerLinked(CustomerLinkedData {
            link_id: Self::key(user_id),
            user_id,
            remote_customer_id,
            linked_at: now,
        })])
    }
}

/// Reads and records customer mappings.
pub struct CustomerDirectory<S: EventStore> {
    handler: CommandHandler<S, CustomerLink>,
}

impl<S: EventStore + Clone> Clone for CustomerDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: EventStore> CustomerDirectory<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Result<Option<RemoteCustomerId>, DomainError> {
        let link = self.handler.load(CustomerLink::key(user_id)).await?;
        Ok(link.remote_customer_id().cloned())
    }

    /// Records the mapping unless one exists; returns whichever mapping won.
    #[tracing::instrument(skip(self))]
    pub async fn record(
        &self,
        user_id: UserId,
        remote_customer_id: RemoteCustomerId,
    ) -> Result<RemoteCustomerId, DomainError> {
        let key = CustomerLink::key(user_id);
        let result = self
            .handler
            .execute(key, |link| {
                link.link(user_id, remote_customer_id.clone(), Utc::now())
            })
            .await;

        match result {
            Ok(_) => Ok(remote_customer_id),
            Err(DomainError::Customer(CustomerError::AlreadyLinked { existing })) => {
                if existing != remote_customer_id {
                    tracing::warn!(
                        %user_id,
                        %existing,
                        discarded = %remote_customer_id,
                        "customer already mapped, keeping existing remote customer"
                    );
                }
                Ok(existing)
            }
            Err(e) if e.is_stale() => self
                .lookup(user_id)
                .await?
                .ok_or(DomainError::Contended(key)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use event_store::InMemoryEventStore;

    use super::*;

    #[tokio::test]
    async fn test_first_mapping_wins() {
        let directory = CustomerDirectory::new(InMemoryEventStore::new());
        let user = UserId::new(77);

        assert!(directory.lookup(user).await.unwrap().is_none());

        let first = directory
            .record(user, RemoteCustomerId::new("c-1"))
            .await
            .unwrap();
        let second = directory
            .record(user, RemoteCustomerId::new("c-2"))
            .await
            .unwrap();

        assert_eq!(first, RemoteCustomerId::new("c-1"));
        assert_eq!(second, RemoteCustomerId::new("c-1"));
        assert_eq!(
            directory.lookup(user).await.unwrap(),
            Some(RemoteCustomerId::new("c-1"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_records_agree() {
        let store = InMemoryEventStore::new();
        let user = UserId::new(5);

        let mut handles = Vec::new();
        for i in 0..6 {
            let directory = CustomerDirectory::new(store.clone());
            handles.push(tokio::spawn(async move {
                directory
                    .record(user, RemoteCustomerId::new(format!("c-{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            winners.push(handle.await.unwrap());
        }
        winners.dedup();
        assert_eq!(winners.len(), 1);
        assert_eq!(store.count_of_type("CustomerLinked").await, 1);
    }
}
