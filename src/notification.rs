//! Push notifications: payload parsing, display and click routing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::clients::{ClientId, Clients};
use crate::config::{EngineConfig, NotificationConfig};
use crate::error::Result;

/// Badge icon shown with every notification.
pub const BADGE_ICON: &str = "/icons/icon-72x72.png";

/// Vibration pattern used for every notification, in milliseconds.
pub const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];

/// Application data carried by a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Where a click should take the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A button shown on the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The wire form senders push. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushMessage {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    data: Option<NotificationData>,
    #[serde(default)]
    actions: Vec<NotificationAction>,
}

/// A push payload with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// Parses a push payload.
///
/// JSON objects are read field by field with defaults for anything missing.
/// Anything else (plain text, malformed JSON) becomes the body of a
/// notification with the default title and icon. No payload at all yields
/// the defaults.
#[must_use]
pub fn parse_push(data: Option<&[u8]>, defaults: &NotificationConfig) -> NotificationPayload {
    let message = match data {
        None | Some([]) => PushMessage::default(),
        Some(bytes) => serde_json::from_slice::<PushMessage>(bytes).unwrap_or_else(|e| {
            log::debug!("Push payload is not JSON ({e}); using it as plain text");
            PushMessage {
                body: Some(String::from_utf8_lossy(bytes).into_owned()),
                ..PushMessage::default()
            }
        }),
    };

    NotificationPayload {
        title: message
            .title
            .unwrap_or_else(|| defaults.default_title.clone()),
        body: message.body.unwrap_or_else(|| defaults.default_body.clone()),
        icon: message.icon.unwrap_or_else(|| defaults.default_icon.clone()),
        data: message.data.unwrap_or_default(),
        actions: message.actions,
    }
}

/// A notification as displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Identifies the notification for closing.
    pub tag: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Builds a displayable notification from a parsed payload.
    #[must_use]
    pub fn from_payload(payload: NotificationPayload) -> Self {
        Self {
            tag: uuid::Uuid::new_v4().to_string(),
            title: payload.title,
            body: payload.body,
            icon: payload.icon,
            badge: BADGE_ICON.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: payload.data,
            actions: payload.actions,
        }
    }
}

/// Abstraction over the platform notification surface.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Displays a notification.
    async fn show(&self, notification: &Notification) -> Result<()>;

    /// Closes a displayed notification.
    async fn close(&self, tag: &str) -> Result<()>;
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "Notification [{}] {}: {}",
            notification.tag,
            notification.title,
            notification.body
        );
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        log::info!("Notification [{tag}] closed");
        Ok(())
    }
}

/// Where a notification click took the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An open window was already at the target and got focus.
    Focused(ClientId),
    /// A new window was opened at the target.
    Opened(ClientId),
    /// Neither was possible; the notification is still closed.
    Failed { reason: String },
}

/// Bridges push events into notifications and clicks back into pages.
pub struct NotificationBridge {
    defaults: NotificationConfig,
    origin: Url,
}

impl NotificationBridge {
    /// Creates a bridge using the configured defaults.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            defaults: config.notifications.clone(),
            origin: config.origin.clone(),
        }
    }

    /// Handles a push event: parses the payload and shows a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the notifier cannot display it.
    pub async fn on_push<P: Notifier + ?Sized>(
        &self,
        data: Option<&[u8]>,
        notifier: &P,
    ) -> Result<Notification> {
        let notification = Notification::from_payload(parse_push(data, &self.defaults));
        notifier.show(&notification).await?;
        Ok(notification)
    }

    /// Handles a click: closes the notification, then focuses or opens a
    /// window at the payload URL, or at the root when there is none.
    pub async fn on_click<P, C>(
        &self,
        notification: &Notification,
        notifier: &P,
        clients: &C,
    ) -> ClickOutcome
    where
        P: Notifier + ?Sized,
        C: Clients + ?Sized,
    {
        if let Err(e) = notifier.close(&notification.tag).await {
            log::warn!("Failed to close notification {}: {e}", notification.tag);
        }

        let target = match self.target_url(notification) {
            Ok(url) => url,
            Err(e) => {
                return ClickOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let existing = clients
            .match_all(true)
            .await
            .into_iter()
            .find(|client| client.url == target);

        let outcome = match existing {
            Some(client) => clients
                .focus(&client.id)
                .await
                .map(|()| ClickOutcome::Focused(client.id)),
            None => clients.open_window(&target).await.map(ClickOutcome::Opened),
        };
        outcome.unwrap_or_else(|e| {
            log::warn!("Failed to route notification click to {target}: {e}");
            ClickOutcome::Failed {
                reason: e.to_string(),
            }
        })
    }

    /// The payload URL resolved against the origin, or the root. An
    /// unparsable payload URL falls back to the root.
    fn target_url(&self, notification: &Notification) -> Result<Url> {
        if let Some(url) = notification.data.url.as_deref() {
            match self.origin.join(url) {
                Ok(url) => return Ok(url),
                Err(e) => log::warn!("Ignoring notification URL {url:?}: {e}"),
            }
        }
        Ok(self.origin.join("/")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ChannelClients;
    use crate::error::Error;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<Notification>>,
        closed: Mutex<Vec<String>>,
        fail_close: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn show(&self, notification: &Notification) -> Result<()> {
            self.shown.lock().unwrap().push(notification.clone());
            Ok(())
        }

        async fn close(&self, tag: &str) -> Result<()> {
            self.closed.lock().unwrap().push(tag.to_string());
            if self.fail_close {
                return Err(Error::Notification("already gone".to_string()));
            }
            Ok(())
        }
    }

    fn bridge() -> NotificationBridge {
        NotificationBridge::new(&EngineConfig::default())
    }

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
    }

    #[test]
    fn plain_text_push_uses_default_title() {
        let payload = parse_push(Some(b"Hello".as_slice()), &NotificationConfig::default());
        assert_eq!(payload.title, "LawnSync Update");
        assert_eq!(payload.body, "Hello");
        assert_eq!(payload.icon, "/icons/icon-192x192.png");
        assert_eq!(payload.data, NotificationData::default());
    }

    #[test]
    fn json_push_fills_missing_fields() {
        let raw = json!({
            "title": "Frost tonight",
            "data": {"url": "/schedule", "alertId": 7},
            "actions": [{"action": "view", "title": "View"}]
        })
        .to_string();
        let payload = parse_push(Some(raw.as_bytes()), &NotificationConfig::default());
        assert_eq!(payload.title, "Frost tonight");
        assert_eq!(payload.body, "You have a new update from LawnSync");
        assert_eq!(payload.data.url.as_deref(), Some("/schedule"));
        assert_eq!(payload.data.extra.get("alertId"), Some(&json!(7)));
        assert_eq!(payload.actions.len(), 1);
    }

    #[test]
    fn empty_push_uses_defaults() {
        let defaults = NotificationConfig::default();
        assert_eq!(parse_push(None, &defaults).title, defaults.default_title);
        assert_eq!(parse_push(Some(b"".as_slice()), &defaults).body, defaults.default_body);
    }

    #[tokio::test]
    async fn push_shows_notification_with_fixed_badge_and_vibration() {
        let notifier = RecordingNotifier::default();
        let shown = bridge().on_push(Some(b"Water today".as_slice()), &notifier).await.unwrap();

        assert_eq!(shown.badge, BADGE_ICON);
        assert_eq!(shown.vibrate, VIBRATE_PATTERN.to_vec());
        assert_eq!(notifier.shown.lock().unwrap().as_slice(), &[shown]);
    }

    #[tokio::test]
    async fn click_with_url_opens_window_there() {
        let notifier = RecordingNotifier::default();
        let clients = ChannelClients::new();
        let notification = Notification::from_payload(parse_push(
            Some(br#"{"data":{"url":"/schedule"}}"#.as_slice()),
            &NotificationConfig::default(),
        ));

        let outcome = bridge().on_click(&notification, &notifier, &clients).await;
        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(clients.get(&id).unwrap().url, url("/schedule"));
        assert_eq!(*notifier.closed.lock().unwrap(), vec![notification.tag]);
    }

    #[tokio::test]
    async fn click_without_url_focuses_root_window() {
        let notifier = RecordingNotifier::default();
        let clients = ChannelClients::new();
        let _other = clients.connect(url("/lawn"));
        let root = clients.connect(url("/"));
        let notification =
            Notification::from_payload(parse_push(Some(b"hi".as_slice()), &NotificationConfig::default()));

        let outcome = bridge().on_click(&notification, &notifier, &clients).await;
        assert_eq!(outcome, ClickOutcome::Focused(root.id.clone()));
        assert!(clients.get(&root.id).unwrap().focused);
        assert!(clients.take_opened().is_empty());
    }

    #[tokio::test]
    async fn click_without_url_opens_root_when_none_open() {
        let notifier = RecordingNotifier::default();
        let clients = ChannelClients::new();
        let _other = clients.connect(url("/lawn"));
        let notification =
            Notification::from_payload(parse_push(None, &NotificationConfig::default()));

        let outcome = bridge().on_click(&notification, &notifier, &clients).await;
        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(clients.get(&id).unwrap().url, url("/"));
    }

    #[tokio::test]
    async fn click_routes_even_if_close_fails() {
        let notifier = RecordingNotifier {
            fail_close: true,
            ..RecordingNotifier::default()
        };
        let clients = ChannelClients::new();
        let notification =
            Notification::from_payload(parse_push(None, &NotificationConfig::default()));

        let outcome = bridge().on_click(&notification, &notifier, &clients).await;
        assert!(matches!(outcome, ClickOutcome::Opened(_)));
        assert_eq!(notifier.closed.lock().unwrap().len(), 1);
    }

    /// A clients API with no windows that refuses to open new ones.
    struct LockedClients;

    #[async_trait]
    impl Clients for LockedClients {
        async fn match_all(&self, _include_uncontrolled: bool) -> Vec<crate::clients::ClientInfo> {
            Vec::new()
        }

        async fn post_message(&self, client: &ClientId, _message: crate::message::ClientMessage) -> Result<()> {
            Err(Error::ClientGone(client.to_string()))
        }

        async fn claim(&self) -> Result<usize> {
            Ok(0)
        }

        async fn open_window(&self, _url: &Url) -> Result<ClientId> {
            Err(Error::Notification("window blocked".to_string()))
        }

        async fn focus(&self, client: &ClientId) -> Result<()> {
            Err(Error::ClientGone(client.to_string()))
        }
    }

    #[tokio::test]
    async fn click_closes_even_when_window_cannot_open() {
        let notifier = RecordingNotifier::default();
        let notification =
            Notification::from_payload(parse_push(None, &NotificationConfig::default()));

        let outcome = bridge().on_click(&notification, &notifier, &LockedClients).await;
        assert!(matches!(outcome, ClickOutcome::Failed { .. }));
        assert_eq!(*notifier.closed.lock().unwrap(), vec![notification.tag]);
    }
}
