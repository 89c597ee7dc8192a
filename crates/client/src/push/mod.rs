//! Push subscription lifecycle.
//!
//! ```text
//! NotSupported
//! Unregistered -> Registering -> PermissionPending -> PermissionGranted | PermissionDenied
//!   PermissionGranted -> Subscribing -> Subscribed | SubscriptionFailed
//!   Subscribed -> ServerRegistered | ServerRegistrationFailed
//! ```
//!
//! Any failure ends the chain in the state reached so far and is logged.
//! Nothing is rolled back: a subscription may exist on the platform even when
//! the server never learned about it.

pub mod dispatch;
pub mod platform;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use shelf_core::config::PushSettings;
use shelf_core::{AppConfig, Error, PermissionState, PushSubscription, SubscriptionRegistration};

use crate::fetch::{FetchOutcome, Fetcher};

pub use dispatch::{ActionDispatcher, ClientAction, Navigator};
pub use platform::HeadlessPlatform;

/// Handle of a registered background execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub scope: String,
    pub script: String,
}

/// Options for creating a push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub user_visible_only: bool,
    /// Decoded application server public key.
    pub application_server_key: Vec<u8>,
}

/// Button on a local notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Local notification content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub actions: Vec<NotificationAction>,
    pub tag: String,
    pub renotify: bool,
}

/// Title of the invitation notification.
pub const INVITATION_TITLE: &str = "Learn PWA with me";

impl NotificationOptions {
    /// The study invitation with `show-book` and `contact-me` buttons.
    pub fn invitation() -> Self {
        Self {
            body: "You are invited to study together".into(),
            icon: "/img/icons/book-128.png".into(),
            actions: vec![
                NotificationAction { action: dispatch::SHOW_BOOK.into(), title: "Take a look".into() },
                NotificationAction { action: dispatch::CONTACT_ME.into(), title: "Contact me".into() },
            ],
            tag: "pwa-starter".into(),
            renotify: true,
        }
    }
}

/// Platform capabilities the push flow depends on.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    /// Whether a background execution context can be registered.
    fn supports_worker(&self) -> bool;

    /// Whether push subscriptions can be created.
    fn supports_push(&self) -> bool;

    async fn register_worker(&self, script: &str) -> Result<WorkerRegistration, Error>;

    async fn request_permission(&self) -> Result<PermissionState, Error>;

    async fn subscribe(&self, registration: &WorkerRegistration, options: &SubscribeOptions)
    -> Result<PushSubscription, Error>;

    async fn show_notification(
        &self, registration: &WorkerRegistration, title: &str, options: &NotificationOptions,
    ) -> Result<(), Error>;
}

/// Where the push flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    NotSupported,
    Unregistered,
    Registering,
    PermissionPending,
    PermissionGranted,
    PermissionDenied,
    Subscribing,
    Subscribed,
    SubscriptionFailed,
    ServerRegistered,
    ServerRegistrationFailed,
}

/// Drives the push subscription flow.
pub struct PushManager {
    platform: Arc<dyn PushPlatform>,
    fetcher: Arc<dyn Fetcher>,
    settings: PushSettings,
    registration_url: String,
    state: PushState,
    registration: Option<WorkerRegistration>,
    subscription: Option<PushSubscription>,
    client_id: Option<i64>,
}

impl PushManager {
    pub fn new(platform: Arc<dyn PushPlatform>, fetcher: Arc<dyn Fetcher>, config: &AppConfig) -> Self {
        Self {
            platform,
            fetcher,
            settings: config.push.clone(),
            registration_url: config.url_for(&config.push.subscription_path),
            state: PushState::Unregistered,
            registration: None,
            subscription: None,
            client_id: None,
        }
    }

    pub fn state(&self) -> PushState {
        self.state
    }

    /// ClientId of the last subscription that reached `Subscribed`.
    pub fn client_id(&self) -> Option<i64> {
        self.client_id
    }

    pub fn subscription(&self) -> Option<&PushSubscription> {
        self.subscription.as_ref()
    }

    pub fn registration(&self) -> Option<&WorkerRegistration> {
        self.registration.as_ref()
    }

    /// Run the whole flow and return the state it ended in.
    pub async fn run(&mut self) -> PushState {
        if !self.platform.supports_worker() || !self.platform.supports_push() {
            tracing::info!("push not supported on this platform");
            return self.transition(PushState::NotSupported);
        }

        self.transition(PushState::Registering);
        let registration = match self.platform.register_worker(&self.settings.script_path).await {
            Ok(registration) => registration,
            Err(e) => return self.fail(PushState::Unregistered, "push.register_failed", &e),
        };
        tracing::info!(scope = %registration.scope, "background context registered");
        self.registration = Some(registration.clone());

        self.transition(PushState::PermissionPending);
        match self.platform.request_permission().await {
            Ok(PermissionState::Granted) => {
                self.transition(PushState::PermissionGranted);
            }
            Ok(other) => {
                let e = Error::PermissionDenied(other.to_string());
                return self.fail(PushState::PermissionDenied, "push.permission_denied", &e);
            }
            Err(e) => return self.fail(PushState::PermissionDenied, "push.permission_denied", &e),
        }

        self.transition(PushState::Subscribing);
        let subscription = match self.subscribe(&registration).await {
            Ok(subscription) => subscription,
            Err(e) => return self.fail(PushState::SubscriptionFailed, "push.subscribe_failed", &e),
        };
        self.subscription = Some(subscription.clone());
        self.transition(PushState::Subscribed);

        let uniqueid = self.next_client_id();
        tracing::info!(uniqueid, "push subscription created");

        match self.submit(SubscriptionRegistration { subscription, uniqueid }).await {
            Ok(response) => {
                tracing::info!(uniqueid, response = %response, "subscription registered with server");
                self.transition(PushState::ServerRegistered)
            }
            Err(e) => self.fail(PushState::ServerRegistrationFailed, "push.server_registration_failed", &e),
        }
    }

    /// Show the invitation notification through the held registration.
    pub async fn show_invitation(&self) -> Result<(), Error> {
        let Some(registration) = &self.registration else {
            return Err(Error::WorkerUnavailable("no background context registered".into()));
        };
        self.platform
            .show_notification(registration, INVITATION_TITLE, &NotificationOptions::invitation())
            .await
    }

    async fn subscribe(&self, registration: &WorkerRegistration) -> Result<PushSubscription, Error> {
        let key = URL_SAFE_NO_PAD
            .decode(self.settings.public_key.trim_end_matches('='))
            .map_err(|e| Error::SubscriptionFailed(format!("invalid application server key: {e}")))?;

        let options = SubscribeOptions { user_visible_only: true, application_server_key: key };
        self.platform.subscribe(registration, &options).await
    }

    async fn submit(&self, body: SubscriptionRegistration) -> Result<serde_json::Value, Error> {
        let body = serde_json::to_value(&body)?;
        match self.fetcher.post_json(&self.registration_url, &body).await {
            Ok(FetchOutcome::Json(value)) => Ok(value),
            Ok(FetchOutcome::Text(text)) => Ok(serde_json::Value::String(text)),
            Ok(FetchOutcome::NoData { status }) => {
                Err(Error::ServerRegistrationFailed(format!("server answered {status}")))
            }
            Err(e) => Err(Error::ServerRegistrationFailed(e.to_string())),
        }
    }

    /// Millisecond timestamp, bumped past the previous id so repeated
    /// subscriptions never share one.
    fn next_client_id(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let id = match self.client_id {
            Some(previous) if previous >= now => previous + 1,
            _ => now,
        };
        self.client_id = Some(id);
        id
    }

    fn transition(&mut self, state: PushState) -> PushState {
        tracing::debug!(from = ?self.state, to = ?state, "push state");
        self.state = state;
        state
    }

    fn fail(&mut self, state: PushState, event: &'static str, err: &Error) -> PushState {
        tracing::warn!(event, code = err.code(), "push flow stopped: {}", err);
        self.transition(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use shelf_core::SubscriptionKeys;
    use std::sync::Mutex;

    struct FakePlatform {
        supported: bool,
        permission: PermissionState,
        reject_subscribe: bool,
        subscribe_options: Mutex<Option<SubscribeOptions>>,
        shown: Mutex<Vec<(String, NotificationOptions)>>,
    }

    impl FakePlatform {
        fn granting() -> Self {
            Self {
                supported: true,
                permission: PermissionState::Granted,
                reject_subscribe: false,
                subscribe_options: Mutex::new(None),
                shown: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        fn supports_worker(&self) -> bool {
            self.supported
        }

        fn supports_push(&self) -> bool {
            self.supported
        }

        async fn register_worker(&self, script: &str) -> Result<WorkerRegistration, Error> {
            Ok(WorkerRegistration { scope: "/".into(), script: script.into() })
        }

        async fn request_permission(&self) -> Result<PermissionState, Error> {
            Ok(self.permission)
        }

        async fn subscribe(
            &self, _registration: &WorkerRegistration, options: &SubscribeOptions,
        ) -> Result<PushSubscription, Error> {
            *self.subscribe_options.lock().unwrap() = Some(options.clone());
            if self.reject_subscribe {
                return Err(Error::SubscriptionFailed("push service unavailable".into()));
            }
            Ok(PushSubscription {
                endpoint: "https://push.example.com/abc".into(),
                expiration_time: None,
                keys: SubscriptionKeys { p256dh: "p".into(), auth: "a".into() },
            })
        }

        async fn show_notification(
            &self, _registration: &WorkerRegistration, title: &str, options: &NotificationOptions,
        ) -> Result<(), Error> {
            self.shown.lock().unwrap().push((title.to_string(), options.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Server {
        bodies: Mutex<Vec<(String, Value)>>,
        status: Option<u16>,
    }

    #[async_trait]
    impl Fetcher for Server {
        async fn get(&self, _url: &str) -> Result<FetchOutcome, Error> {
            unreachable!()
        }

        async fn post_json(&self, url: &str, body: &Value) -> Result<FetchOutcome, Error> {
            self.bodies.lock().unwrap().push((url.to_string(), body.clone()));
            Ok(match self.status {
                Some(status) => FetchOutcome::NoData { status },
                None => FetchOutcome::Json(json!({"status": 0})),
            })
        }
    }

    fn manager(platform: FakePlatform, server: Arc<Server>) -> (PushManager, Arc<FakePlatform>) {
        let platform = Arc::new(platform);
        (PushManager::new(platform.clone(), server, &AppConfig::default()), platform)
    }

    #[tokio::test]
    async fn test_full_flow_registers_with_server() {
        let server = Arc::new(Server::default());
        let (mut manager, platform) = manager(FakePlatform::granting(), server.clone());

        assert_eq!(manager.run().await, PushState::ServerRegistered);

        let bodies = server.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0, "http://127.0.0.1:8085/subscription");
        assert_eq!(bodies[0].1["subscription"]["endpoint"], "https://push.example.com/abc");
        assert_eq!(bodies[0].1["uniqueid"], json!(manager.client_id().unwrap()));

        let options = platform.subscribe_options.lock().unwrap().clone().unwrap();
        assert!(options.user_visible_only);
        assert_eq!(options.application_server_key.len(), 65);
        assert_eq!(options.application_server_key[0], 0x04);
    }

    #[tokio::test]
    async fn test_unsupported_platform_does_nothing() {
        let server = Arc::new(Server::default());
        let (mut manager, _) = manager(FakePlatform { supported: false, ..FakePlatform::granting() }, server.clone());

        assert_eq!(manager.run().await, PushState::NotSupported);
        assert!(manager.registration().is_none());
        assert!(server.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_denied_permission_creates_no_subscription() {
        for permission in [PermissionState::Denied, PermissionState::Default] {
            let server = Arc::new(Server::default());
            let (mut manager, platform) = manager(FakePlatform { permission, ..FakePlatform::granting() }, server.clone());

            assert_eq!(manager.run().await, PushState::PermissionDenied);
            assert!(platform.subscribe_options.lock().unwrap().is_none());
            assert!(manager.client_id().is_none());
            assert!(server.bodies.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_rejected_subscription_generates_no_client_id() {
        let server = Arc::new(Server::default());
        let (mut manager, _) = manager(FakePlatform { reject_subscribe: true, ..FakePlatform::granting() }, server.clone());

        assert_eq!(manager.run().await, PushState::SubscriptionFailed);
        assert!(manager.client_id().is_none());
        assert!(server.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_rejection_keeps_subscription() {
        let server = Arc::new(Server { status: Some(500), ..Default::default() });
        let (mut manager, _) = manager(FakePlatform::granting(), server);

        assert_eq!(manager.run().await, PushState::ServerRegistrationFailed);
        assert!(manager.subscription().is_some());
        assert!(manager.client_id().is_some());
    }

    #[tokio::test]
    async fn test_repeated_flows_use_fresh_client_ids() {
        let server = Arc::new(Server::default());
        let (mut manager, _) = manager(FakePlatform::granting(), server.clone());

        manager.run().await;
        let first = manager.client_id().unwrap();
        manager.run().await;
        let second = manager.client_id().unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_invitation_needs_registration() {
        let server = Arc::new(Server::default());
        let (mut manager, platform) = manager(FakePlatform::granting(), server);

        assert!(matches!(manager.show_invitation().await, Err(Error::WorkerUnavailable(_))));

        manager.run().await;
        manager.show_invitation().await.unwrap();

        let shown = platform.shown.lock().unwrap();
        assert_eq!(shown[0].0, INVITATION_TITLE);
        let actions: Vec<&str> = shown[0].1.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["show-book", "contact-me"]);
        assert_eq!(shown[0].1.tag, "pwa-starter");
        assert!(shown[0].1.renotify);
    }
}
