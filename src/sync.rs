//! Background-sync coordination.
//!
//! The worker cannot see the pages' pending-operation queue. A sync attempt
//! therefore only tells every page to drain its own queue and relays the
//! results pages report back; it never waits for, or touches, the queue.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::clients::{ClientId, Clients, broadcast};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::message::{ClientMessage, timestamp_now};

/// Progress of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Triggered,
    NotifyingClients,
    AwaitingAppResult,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Triggered => "triggered",
            Self::NotifyingClients => "notifying-clients",
            Self::AwaitingAppResult => "awaiting-app-result",
        };
        f.write_str(name)
    }
}

/// Result of handling a sync trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The tag is not ours.
    Ignored,
    /// Every reachable page was asked to sync.
    Requested { clients: usize },
    /// No page could be told. The platform will retry the sync later.
    Failed { reason: String },
}

/// Relays background-sync triggers to pages.
pub struct SyncCoordinator {
    tag: String,
    state: Mutex<SyncState>,
}

impl SyncCoordinator {
    /// Creates an idle coordinator listening for the configured tag.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tag: config.sync.tag.clone(),
            state: Mutex::new(SyncState::Idle),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Handles a platform background-sync event.
    pub async fn on_sync<C: Clients + ?Sized>(&self, tag: &str, clients: &C) -> SyncOutcome {
        if tag != self.tag {
            log::debug!("Ignoring sync event with tag {tag}");
            return SyncOutcome::Ignored;
        }
        self.trigger(clients).await
    }

    /// Runs one sync attempt: `SYNC_STARTED` then `REQUEST_SYNC` to every
    /// page, then back to idle without waiting for results.
    pub async fn trigger<C: Clients + ?Sized>(&self, clients: &C) -> SyncOutcome {
        self.set_state(SyncState::Triggered);
        let timestamp = timestamp_now();

        self.set_state(SyncState::NotifyingClients);
        let notified = async {
            broadcast(clients, &ClientMessage::sync_started(timestamp.as_str()), None).await?;
            broadcast(clients, &ClientMessage::request_sync(timestamp.as_str()), None).await
        }
        .await;

        let outcome = match notified {
            Ok(count) => {
                self.set_state(SyncState::AwaitingAppResult);
                log::info!("Requested sync from {count} client(s)");
                SyncOutcome::Requested { clients: count }
            }
            Err(e) => {
                log::error!("Sync attempt failed: {e}");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.set_state(SyncState::Idle);
        outcome
    }

    /// Relays a page's `SYNC_RESULT` to every other page. Never starts a
    /// new attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if no page is open or no other page could be reached.
    pub async fn on_sync_result<C: Clients + ?Sized>(
        &self,
        source: &ClientId,
        message: &ClientMessage,
        clients: &C,
    ) -> Result<usize> {
        let relayed = broadcast(clients, message, Some(source)).await?;
        log::debug!("Relayed sync result from {source} to {relayed} client(s)");
        Ok(relayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ChannelClients;
    use serde_json::{Map, json};
    use url::Url;

    fn root() -> Url {
        Url::parse("http://localhost:3000/").unwrap()
    }

    #[tokio::test]
    async fn sync_sends_started_then_request() {
        let coordinator = SyncCoordinator::new(&EngineConfig::default());
        let clients = ChannelClients::new();
        let mut a = clients.connect(root());
        let mut b = clients.connect(root());
        clients.claim().await.unwrap();

        let outcome = coordinator
            .on_sync("sync-pending-operations", &clients)
            .await;
        assert_eq!(outcome, SyncOutcome::Requested { clients: 2 });
        assert_eq!(coordinator.state(), SyncState::Idle);

        for page in [&mut a, &mut b] {
            let kinds: Vec<_> = page.drain().iter().map(ClientMessage::kind).collect();
            assert_eq!(
                kinds,
                vec![
                    crate::message::MessageType::SyncStarted,
                    crate::message::MessageType::RequestSync
                ]
            );
        }
    }

    #[tokio::test]
    async fn other_tags_are_ignored() {
        let coordinator = SyncCoordinator::new(&EngineConfig::default());
        let clients = ChannelClients::new();
        let mut page = clients.connect(root());
        clients.claim().await.unwrap();

        assert_eq!(
            coordinator.on_sync("sync-photos", &clients).await,
            SyncOutcome::Ignored
        );
        assert!(page.try_recv().is_none());
    }

    #[tokio::test]
    async fn no_clients_fails_and_returns_to_idle() {
        let coordinator = SyncCoordinator::new(&EngineConfig::default());
        let clients = ChannelClients::new();

        let outcome = coordinator
            .on_sync("sync-pending-operations", &clients)
            .await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(coordinator.state(), SyncState::Idle);

        // Still eligible for the next attempt.
        let mut page = clients.connect(root());
        clients.claim().await.unwrap();
        let outcome = coordinator
            .on_sync("sync-pending-operations", &clients)
            .await;
        assert_eq!(outcome, SyncOutcome::Requested { clients: 1 });
        assert_eq!(page.drain().len(), 2);
    }

    #[tokio::test]
    async fn sync_result_is_relayed_to_other_pages_only() {
        let coordinator = SyncCoordinator::new(&EngineConfig::default());
        let clients = ChannelClients::new();
        let mut source = clients.connect(root());
        let mut other = clients.connect(root());
        clients.claim().await.unwrap();

        let mut result = Map::new();
        result.insert("synced".to_string(), json!(4));
        let message = ClientMessage::SyncResult {
            timestamp: Some("t".to_string()),
            result,
        };

        let relayed = coordinator
            .on_sync_result(&source.id, &message, &clients)
            .await
            .unwrap();
        assert_eq!(relayed, 1);
        assert!(source.try_recv().is_none());
        assert_eq!(other.drain(), vec![message]);
        assert_eq!(coordinator.state(), SyncState::Idle);
    }
}
