//! Background execution context.
//!
//! The worker is a separately spawned task. The foreground never calls into
//! it; it only sends commands through a [`WorkerHandle`]: register a deferred
//! task by tag, post a message, or forward a notification click. Registered
//! tags run when connectivity goes from offline to online (or immediately if
//! registered while online). A tag is unregistered after its task succeeds and
//! kept for the next connectivity event after it fails.
//!
//! Tasks run on their own tokio tasks and report back to the worker loop, so a
//! slow delivery never holds up other commands. A tag registered again while
//! its task is running is run once more after that task finishes.

pub mod tasks;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_core::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};

pub use tasks::{MessageDeliveryTask, PingTask, StoreDeliveryTask};

/// Network connectivity as observed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// A deferred task the worker runs for a tag.
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self, tag: &str) -> Result<(), Error>;
}

/// Payload of a data-carrying sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgSyncMessage {
    pub name: String,
}

/// JSON messages the foreground posts to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// `{"type":"bgsync","msg":{"name":...}}`
    Bgsync { msg: BgSyncMessage },
}

impl WorkerMessage {
    pub fn bgsync(name: impl Into<String>) -> Self {
        WorkerMessage::Bgsync { msg: BgSyncMessage { name: name.into() } }
    }

    /// Wire encoding, a JSON string.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Plain action string the worker forwards to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage(pub String);

/// Freshest `bgsync` message posted to the worker.
pub type Mailbox = Arc<Mutex<Option<BgSyncMessage>>>;

enum Command {
    Register { tag: String, message: Option<String>, ack: oneshot::Sender<Result<(), Error>> },
    Post(String),
    NotificationClick(String),
    Tags(oneshot::Sender<Vec<String>>),
}

/// Foreground side of the worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register { tag, .. } => write!(f, "Register({tag})"),
            Command::Post(msg) => write!(f, "Post({msg})"),
            Command::NotificationClick(action) => write!(f, "NotificationClick({action})"),
            Command::Tags(_) => f.write_str("Tags"),
        }
    }
}

impl WorkerHandle {
    /// Register the deferred task for `tag`. Resolves once the worker has
    /// accepted or rejected the registration.
    pub async fn register(&self, tag: &str) -> Result<(), Error> {
        self.register_command(tag, None).await
    }

    /// Register `tag` together with a message for its task.
    ///
    /// The worker takes the message only if it accepts the registration, and
    /// before the task can run, so the task always sees this value.
    pub async fn register_with_message(&self, tag: &str, message: impl Into<String>) -> Result<(), Error> {
        self.register_command(tag, Some(message.into())).await
    }

    /// Post a message to the worker.
    pub fn post_message(&self, message: impl Into<String>) -> Result<(), Error> {
        self.send(Command::Post(message.into()))
    }

    /// Deliver a notification action click; the worker forwards it to the
    /// foreground.
    pub fn notification_click(&self, action: impl Into<String>) -> Result<(), Error> {
        self.send(Command::NotificationClick(action.into()))
    }

    /// Tags registered and not yet completed.
    pub async fn pending_tags(&self) -> Result<Vec<String>, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Tags(tx))?;
        rx.await.map_err(|_| unavailable())
    }

    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn register_command(&self, tag: &str, message: Option<String>) -> Result<(), Error> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::Register { tag: tag.to_string(), message, ack })?;
        rx.await.map_err(|_| unavailable())?
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| unavailable())
    }
}

fn unavailable() -> Error {
    Error::WorkerUnavailable("background context has stopped".into())
}

/// Collects the tasks the worker knows how to run, then spawns it.
#[derive(Default)]
pub struct WorkerBuilder {
    tasks: HashMap<String, Arc<dyn SyncTask>>,
    restored: BTreeSet<String>,
    mailbox: Mailbox,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `tag` with `task`.
    pub fn task(mut self, tag: impl Into<String>, task: Arc<dyn SyncTask>) -> Self {
        self.tasks.insert(tag.into(), task);
        self
    }

    /// Start with `tags` already registered, e.g. tags whose payloads survived
    /// a restart. Tags without a task are ignored.
    pub fn restore(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.restored.extend(tags);
        self
    }

    /// The mailbox posted `bgsync` messages land in.
    pub fn mailbox(&self) -> Mailbox {
        Arc::clone(&self.mailbox)
    }

    /// Spawn the worker on the current runtime.
    ///
    /// Returns the command handle and the channel of messages the worker sends
    /// to the foreground.
    pub fn spawn(self, connectivity: watch::Receiver<Connectivity>) -> (WorkerHandle, mpsc::UnboundedReceiver<ClientMessage>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (clients_tx, clients_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let pending: BTreeSet<String> =
            self.restored.into_iter().filter(|tag| self.tasks.contains_key(tag)).collect();
        if !pending.is_empty() {
            tracing::info!(tags = ?pending, "restored sync registrations");
        }

        let worker = Worker {
            tasks: self.tasks,
            pending,
            running: HashSet::new(),
            rerun: HashSet::new(),
            mailbox: self.mailbox,
            commands: commands_rx,
            connectivity,
            clients: clients_tx,
            done_tx,
            done_rx,
        };
        tokio::spawn(worker.run());

        (WorkerHandle { commands: commands_tx }, clients_rx)
    }
}

type Completion = (String, Result<(), Error>);

struct Worker {
    tasks: HashMap<String, Arc<dyn SyncTask>>,
    pending: BTreeSet<String>,
    running: HashSet<String>,
    rerun: HashSet<String>,
    mailbox: Mailbox,
    commands: mpsc::UnboundedReceiver<Command>,
    connectivity: watch::Receiver<Connectivity>,
    clients: mpsc::UnboundedSender<ClientMessage>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!(tasks = self.tasks.len(), "background context started");
        let mut watching = true;
        if self.online() {
            self.start_pending();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some((tag, result)) = self.done_rx.recv() => self.finish(tag, result),
                changed = self.connectivity.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let state = *self.connectivity.borrow_and_update();
                    tracing::debug!(?state, pending = self.pending.len(), "connectivity changed");
                    if state == Connectivity::Online {
                        self.start_pending();
                    }
                }
            }
        }

        tracing::debug!("background context stopped");
    }

    fn online(&self) -> bool {
        *self.connectivity.borrow() == Connectivity::Online
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { tag, message, ack } => {
                if !self.tasks.contains_key(&tag) {
                    let _ = ack.send(Err(Error::InvalidInput(format!("no deferred task handles tag '{tag}'"))));
                    return;
                }
                if let Some(raw) = message {
                    self.receive(&raw).await;
                }
                if self.running.contains(&tag) {
                    self.rerun.insert(tag.clone());
                }
                self.pending.insert(tag.clone());
                let _ = ack.send(Ok(()));
                if self.online() {
                    self.start(&tag);
                }
            }
            Command::Post(raw) => {
                if self.receive(&raw).await && self.online() {
                    self.start_pending();
                }
            }
            Command::NotificationClick(action) => {
                if self.clients.send(ClientMessage(action)).is_err() {
                    tracing::warn!(event = "worker.client_gone", "no foreground listening for messages");
                }
            }
            Command::Tags(reply) => {
                let _ = reply.send(self.pending.iter().cloned().collect());
            }
        }
    }

    /// Store a `bgsync` message in the mailbox. Returns whether it was one.
    async fn receive(&self, raw: &str) -> bool {
        match serde_json::from_str::<WorkerMessage>(raw) {
            Ok(WorkerMessage::Bgsync { msg }) => {
                tracing::debug!(name = %msg.name, "bgsync message received");
                *self.mailbox.lock().await = Some(msg);
                true
            }
            Err(_) => {
                tracing::debug!(message = %raw, "ignoring unrecognized message");
                false
            }
        }
    }

    fn start_pending(&mut self) {
        let tags: Vec<String> = self.pending.iter().cloned().collect();
        for tag in tags {
            self.start(&tag);
        }
    }

    fn start(&mut self, tag: &str) {
        if self.running.contains(tag) {
            return;
        }
        let Some(task) = self.tasks.get(tag).cloned() else {
            return;
        };

        self.running.insert(tag.to_string());
        let tag = tag.to_string();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = task.run(&tag).await;
            let _ = done.send((tag, result));
        });
    }

    fn finish(&mut self, tag: String, result: Result<(), Error>) {
        self.running.remove(&tag);
        let rerun = self.rerun.remove(&tag);

        match result {
            Ok(()) if rerun => {
                tracing::debug!(tag = %tag, "deferred task completed, registered again meanwhile");
                if self.online() {
                    self.start(&tag);
                }
            }
            Ok(()) => {
                self.pending.remove(&tag);
                tracing::info!(tag = %tag, "deferred task completed");
            }
            Err(e) => {
                tracing::warn!(event = "worker.task_failed", tag = %tag, "deferred task failed, kept for retry: {}", e);
            }
        }
    }
}
