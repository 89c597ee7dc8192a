//! Inbound message dispatch.
//!
//! Every plain message from the background context goes through one table:
//! `show-book` and `contact-me` navigate, anything else shows the panel.

use shelf_core::config::LinkSettings;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::worker::ClientMessage;

pub const SHOW_BOOK: &str = "show-book";
pub const CONTACT_ME: &str = "contact-me";

/// Actions the foreground understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    ShowBook,
    ContactMe,
    /// Any other action identifier.
    Other(String),
}

impl ClientAction {
    pub fn parse(action: &str) -> Self {
        match action {
            SHOW_BOOK => ClientAction::ShowBook,
            CONTACT_ME => ClientAction::ContactMe,
            other => ClientAction::Other(other.to_string()),
        }
    }
}

/// Foreground side effects of dispatched actions.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
    fn show_panel(&self);
}

pub struct ActionDispatcher<N> {
    navigator: N,
    links: LinkSettings,
}

impl<N: Navigator> ActionDispatcher<N> {
    pub fn new(navigator: N, links: LinkSettings) -> Self {
        Self { navigator, links }
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// Perform the side effect for `message`.
    pub fn dispatch(&self, message: &str) -> ClientAction {
        let action = ClientAction::parse(message);
        tracing::debug!(message, ?action, "dispatching client message");
        match &action {
            ClientAction::ShowBook => self.navigator.navigate(&self.links.book_page),
            ClientAction::ContactMe => self.navigator.navigate(&self.links.contact),
            ClientAction::Other(_) => self.navigator.show_panel(),
        }
        action
    }

    /// Dispatch messages until the worker side closes.
    pub async fn listen(&self, mut messages: UnboundedReceiver<ClientMessage>) {
        while let Some(ClientMessage(message)) = messages.recv().await {
            self.dispatch(&message);
        }
    }
}
