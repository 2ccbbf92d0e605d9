//! The worker: one entry point per platform event.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cache::{CacheRegistry, CacheStorage};
use crate::classify::classify;
use crate::clients::{ClientId, Clients};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::lifecycle::{ActivationReport, InstallReport, Lifecycle, LifecycleState, PrecacheReport};
use crate::message::ClientMessage;
use crate::network::Network;
use crate::notification::{ClickOutcome, Notification, NotificationBridge, Notifier};
use crate::strategy::StrategyExecutor;
use crate::sync::{SyncCoordinator, SyncOutcome};

/// An event delivered by the platform.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// First run of this version. `replacing_active` is true when an older
    /// version currently controls pages.
    Install { replacing_active: bool },
    Activate,
    Fetch(Request),
    Sync { tag: String },
    Message {
        source: ClientId,
        message: ClientMessage,
    },
    Push { data: Option<Vec<u8>> },
    NotificationClick { notification: Notification },
}

impl WorkerEvent {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Install { .. } => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Sync { .. } => "sync",
            Self::Message { .. } => "message",
            Self::Push { .. } => "push",
            Self::NotificationClick { .. } => "notificationclick",
        }
    }
}

/// What the worker does with an intercepted request.
pub enum FetchDisposition {
    /// Not handled; the request goes to the network untouched.
    Passthrough,
    /// Handled; the future yields the response.
    RespondWith(BoxFuture<'static, Response>),
}

impl fmt::Debug for FetchDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passthrough => f.write_str("Passthrough"),
            Self::RespondWith(_) => f.write_str("RespondWith(..)"),
        }
    }
}

/// Result of handling a page message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Skip-waiting recorded. `activate_now` is true when the worker is
    /// waiting and the host should deliver [`WorkerEvent::Activate`].
    SkipWaiting { activate_now: bool },
    Recached(PrecacheReport),
    /// A sync result relayed to this many other pages.
    Relayed(usize),
    SyncRequested(SyncOutcome),
    Ignored,
}

/// Result of handling one event.
#[derive(Debug)]
pub enum EventOutcome {
    /// The worker is `Waiting`. The report's `activate_now` tells the host
    /// whether to deliver [`WorkerEvent::Activate`] right away.
    Installed(InstallReport),
    Activated(ActivationReport),
    /// `None` when the request was passed through.
    Fetched(Option<Response>),
    Synced(SyncOutcome),
    Message(MessageOutcome),
    Notified(Notification),
    Clicked(ClickOutcome),
}

/// The offline caching and sync engine.
pub struct Worker<N, S, C, P>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
    C: Clients + 'static,
    P: Notifier + 'static,
{
    config: Arc<EngineConfig>,
    registry: Arc<CacheRegistry<S>>,
    strategies: StrategyExecutor<N, S>,
    lifecycle: Lifecycle<N, S>,
    sync: SyncCoordinator,
    notifications: NotificationBridge,
    clients: Arc<C>,
    notifier: P,
}

impl<N, S, C, P> Worker<N, S, C, P>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
    C: Clients + 'static,
    P: Notifier + 'static,
{
    /// Builds a worker in the `Parsed` state.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: EngineConfig, network: N, storage: S, clients: Arc<C>, notifier: P) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let network = Arc::new(network);
        let registry = Arc::new(CacheRegistry::new(storage, config.stores()));

        Ok(Self {
            strategies: StrategyExecutor::new(Arc::clone(&network), Arc::clone(&registry), Arc::clone(&config)),
            lifecycle: Lifecycle::new(network, Arc::clone(&registry), Arc::clone(&config)),
            sync: SyncCoordinator::new(&config),
            notifications: NotificationBridge::new(&config),
            registry,
            clients,
            notifier,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &CacheRegistry<S> {
        &self.registry
    }

    #[must_use]
    pub fn clients(&self) -> &C {
        &self.clients
    }

    #[must_use]
    pub const fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Decides synchronously whether to answer a request, so the caller can
    /// let unhandled requests through without waiting.
    #[must_use]
    pub fn handle_fetch(&self, request: Request) -> FetchDisposition {
        let Some(class) = classify(&request, &self.config) else {
            log::trace!("Passing through {} {}", request.method, request.url);
            return FetchDisposition::Passthrough;
        };
        let strategies = self.strategies.clone();
        FetchDisposition::RespondWith(async move { strategies.execute(class, &request).await }.boxed())
    }

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns an error for lifecycle events arriving in the wrong state, a
    /// notification that cannot be shown, or a sync result that reached no
    /// other page.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        log::debug!("Dispatching {} event", event.kind());
        match event {
            WorkerEvent::Install { replacing_active } => Ok(EventOutcome::Installed(
                self.lifecycle.install(replacing_active).await?,
            )),
            WorkerEvent::Activate => Ok(EventOutcome::Activated(
                self.lifecycle.activate(&*self.clients).await?,
            )),
            WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetched(match self.handle_fetch(request) {
                FetchDisposition::Passthrough => None,
                FetchDisposition::RespondWith(response) => Some(response.await),
            })),
            WorkerEvent::Sync { tag } => Ok(EventOutcome::Synced(self.sync.on_sync(&tag, &*self.clients).await)),
            WorkerEvent::Message { source, message } => {
                Ok(EventOutcome::Message(self.on_message(&source, message).await?))
            }
            WorkerEvent::Push { data } => Ok(EventOutcome::Notified(
                self.notifications
                    .on_push(data.as_deref(), &self.notifier)
                    .await?,
            )),
            WorkerEvent::NotificationClick { notification } => Ok(EventOutcome::Clicked(
                self.notifications
                    .on_click(&notification, &self.notifier, &*self.clients)
                    .await,
            )),
        }
    }

    async fn on_message(&self, source: &ClientId, message: ClientMessage) -> Result<MessageOutcome> {
        log::debug!("{} from client {source}", message.kind());
        match message {
            ClientMessage::SkipWaiting => Ok(MessageOutcome::SkipWaiting {
                activate_now: self.lifecycle.skip_waiting(),
            }),
            ClientMessage::CacheNewVersion => Ok(MessageOutcome::Recached(self.lifecycle.recache_manifest().await?)),
            ClientMessage::SyncResult { .. } => Ok(MessageOutcome::Relayed(
                self.sync
                    .on_sync_result(source, &message, &*self.clients)
                    .await?,
            )),
            ClientMessage::RequestSync { .. } => {
                Ok(MessageOutcome::SyncRequested(self.sync.trigger(&*self.clients).await))
            }
            ClientMessage::SyncStarted { .. } => Ok(MessageOutcome::Ignored),
        }
    }

    /// Waits for background cache writes to finish.
    pub async fn settle(&self) {
        self.strategies.settle().await;
    }
}
