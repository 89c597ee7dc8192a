//! Headless push platform for terminals and tests.
//!
//! Permission comes from configuration and the subscription descriptor is read
//! from a JSON file, as issued earlier by a real push service. Notifications
//! are written to the log and their actions replayed as clicks on the worker.

use std::path::PathBuf;

use async_trait::async_trait;
use shelf_core::config::PushSettings;
use shelf_core::{Error, PermissionState, PushSubscription};

use super::{NotificationOptions, PushPlatform, SubscribeOptions, WorkerRegistration};
use crate::worker::WorkerHandle;

pub struct HeadlessPlatform {
    permission: PermissionState,
    subscription_file: Option<PathBuf>,
    worker: Option<WorkerHandle>,
    click: Option<String>,
}

impl HeadlessPlatform {
    pub fn new(settings: &PushSettings) -> Self {
        Self {
            permission: settings.permission,
            subscription_file: settings.subscription_file.clone(),
            worker: None,
            click: None,
        }
    }

    /// Back the platform with a running worker; without one it reports no
    /// worker support.
    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Action clicked on every notification shown.
    pub fn with_click(mut self, action: impl Into<String>) -> Self {
        self.click = Some(action.into());
        self
    }
}

#[async_trait]
impl PushPlatform for HeadlessPlatform {
    fn supports_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerHandle::is_alive)
    }

    fn supports_push(&self) -> bool {
        true
    }

    async fn register_worker(&self, script: &str) -> Result<WorkerRegistration, Error> {
        if !self.supports_worker() {
            return Err(Error::WorkerUnavailable("no background context running".into()));
        }
        let scope = match script.rfind('/') {
            Some(idx) => script[..=idx].trim_start_matches('.').to_string(),
            None => "/".to_string(),
        };
        Ok(WorkerRegistration { scope, script: script.to_string() })
    }

    async fn request_permission(&self) -> Result<PermissionState, Error> {
        Ok(self.permission)
    }

    async fn subscribe(
        &self, _registration: &WorkerRegistration, options: &SubscribeOptions,
    ) -> Result<PushSubscription, Error> {
        if !options.user_visible_only {
            return Err(Error::SubscriptionFailed("only user-visible subscriptions are supported".into()));
        }

        let Some(path) = &self.subscription_file else {
            return Err(Error::SubscriptionFailed("no subscription descriptor configured".into()));
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::SubscriptionFailed(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| Error::SubscriptionFailed(format!("{}: {e}", path.display())))
    }

    async fn show_notification(
        &self, _registration: &WorkerRegistration, title: &str, options: &NotificationOptions,
    ) -> Result<(), Error> {
        let actions: Vec<&str> = options.actions.iter().map(|a| a.action.as_str()).collect();
        tracing::info!(title, body = %options.body, tag = %options.tag, ?actions, "notification shown");

        if let (Some(action), Some(worker)) = (&self.click, &self.worker) {
            worker.notification_click(action.clone())?;
        }
        Ok(())
    }
}
