//! Open pages the worker can address, and fire-and-forget messaging to them.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::message::ClientMessage;

/// Opaque identifier of an open page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A snapshot of one open page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: Url,
    pub focused: bool,
    /// Whether this worker controls the page's fetches.
    pub controlled: bool,
}

/// Abstraction over the platform clients API.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Lists open window clients. Uncontrolled pages are included only when
    /// asked for.
    async fn match_all(&self, include_uncontrolled: bool) -> Vec<ClientInfo>;

    /// Queues a message for a client without waiting for it to be handled.
    async fn post_message(&self, client: &ClientId, message: ClientMessage) -> Result<()>;

    /// Takes control of every open page. Returns how many were claimed.
    async fn claim(&self) -> Result<usize>;

    /// Opens a new window at `url`.
    async fn open_window(&self, url: &Url) -> Result<ClientId>;

    /// Focuses an existing window.
    async fn focus(&self, client: &ClientId) -> Result<()>;
}

/// Sends `message` to every controlled client except `except`.
///
/// Delivery is attempted to every client; individual failures are logged.
/// Returns the number of clients that received the message.
///
/// # Errors
///
/// Returns [`Error::NoClients`] if no client is open, or the first delivery
/// error if every delivery failed.
pub async fn broadcast<C: Clients + ?Sized>(
    clients: &C,
    message: &ClientMessage,
    except: Option<&ClientId>,
) -> Result<usize> {
    let targets: Vec<ClientInfo> = clients.match_all(false).await;
    if targets.is_empty() {
        return Err(Error::NoClients);
    }

    let mut delivered = 0;
    let mut first_error = None;
    for client in targets.iter().filter(|c| Some(&c.id) != except) {
        match clients.post_message(&client.id, message.clone()).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                log::warn!("Failed to post {} to client {}: {e}", message.kind(), client.id);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if delivered == 0 => Err(e),
        _ => Ok(delivered),
    }
}

/// Receiving end of a page connected to [`ChannelClients`].
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub url: Url,
    receiver: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientHandle {
    /// Waits for the next message. `None` once the worker side is gone.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.receiver.recv().await
    }

    /// Returns the next queued message, if any.
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.receiver.try_recv().ok()
    }

    /// Drains every queued message.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

struct ClientSlot {
    info: ClientInfo,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

#[derive(Default)]
struct Registry {
    slots: Vec<ClientSlot>,
    claimed: bool,
    opened: Vec<ClientHandle>,
}

/// In-process clients: each page is an unbounded channel.
#[derive(Default)]
pub struct ChannelClients {
    inner: Mutex<Registry>,
}

impl ChannelClients {
    /// Creates an empty client set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(registry: &mut Registry, url: Url, focused: bool) -> ClientHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::new();
        if focused {
            for slot in &mut registry.slots {
                slot.info.focused = false;
            }
        }
        registry.slots.push(ClientSlot {
            info: ClientInfo {
                id: id.clone(),
                url: url.clone(),
                focused,
                controlled: registry.claimed,
            },
            sender,
        });
        ClientHandle { id, url, receiver }
    }

    /// Connects a page. Pages loaded after the worker claimed clients are
    /// controlled from the start.
    pub fn connect(&self, url: Url) -> ClientHandle {
        Self::add(&mut self.lock(), url, false)
    }

    /// Removes a page, as when its tab closes.
    pub fn disconnect(&self, id: &ClientId) -> bool {
        let mut registry = self.lock();
        let before = registry.slots.len();
        registry.slots.retain(|slot| &slot.info.id != id);
        registry.slots.len() != before
    }

    /// Takes the handles of windows opened by the worker.
    pub fn take_opened(&self) -> Vec<ClientHandle> {
        std::mem::take(&mut self.lock().opened)
    }

    /// Returns a snapshot of one client.
    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<ClientInfo> {
        self.lock()
            .slots
            .iter()
            .find(|slot| &slot.info.id == id)
            .map(|slot| slot.info.clone())
    }

    /// Number of open pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// True if no page is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Clients for ChannelClients {
    async fn match_all(&self, include_uncontrolled: bool) -> Vec<ClientInfo> {
        self.lock()
            .slots
            .iter()
            .filter(|slot| include_uncontrolled || slot.info.controlled)
            .map(|slot| slot.info.clone())
            .collect()
    }

    async fn post_message(&self, client: &ClientId, message: ClientMessage) -> Result<()> {
        let registry = self.lock();
        let slot = registry
            .slots
            .iter()
            .find(|slot| &slot.info.id == client)
            .ok_or_else(|| Error::ClientGone(client.to_string()))?;
        slot.sender
            .send(message)
            .map_err(|_| Error::ClientGone(client.to_string()))
    }

    async fn claim(&self) -> Result<usize> {
        let mut registry = self.lock();
        registry.claimed = true;
        let mut claimed = 0;
        for slot in &mut registry.slots {
            if !slot.info.controlled {
                slot.info.controlled = true;
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn open_window(&self, url: &Url) -> Result<ClientId> {
        let mut registry = self.lock();
        let handle = Self::add(&mut registry, url.clone(), true);
        let id = handle.id.clone();
        registry.opened.push(handle);
        Ok(id)
    }

    async fn focus(&self, client: &ClientId) -> Result<()> {
        let mut registry = self.lock();
        if !registry.slots.iter().any(|slot| &slot.info.id == client) {
            return Err(Error::ClientGone(client.to_string()));
        }
        for slot in &mut registry.slots {
            slot.info.focused = &slot.info.id == client;
        }
        Ok(())
    }
}
