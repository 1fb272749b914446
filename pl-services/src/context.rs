//! Serial execution contexts.
//!
//! A [`ManagedContext`] is one dedicated thread driving a current-thread
//! tokio runtime. It owns one pooled connection and a metadata map, and runs
//! submitted jobs one at a time in submission order. Timer tasks spawned on
//! its runtime make progress while the context waits for the next job.
//!
//! Two contexts exist per process: the UI-facing one and the background
//! sync one ([`ContextStack`]). Objects loaded in one context are never
//! handed to the other; ids cross the boundary and are re-fetched.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pl_core::error::{PlError, PlResult};
use pl_core::ContextKind;
use pl_models::{Database, Message, PooledConn};

use crate::event_bus::EventBus;

type Job = Box<dyn FnOnce(&mut ContextState) + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<(u64, ContextKind)>> = Cell::new(None);
}

struct Shared {
    id: u64,
    kind: ContextKind,
    sender: mpsc::UnboundedSender<Command>,
    runtime: Handle,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// Handle to a serial execution context. Cheap to clone.
#[derive(Clone)]
pub struct ManagedContext {
    shared: Arc<Shared>,
}

impl ManagedContext {
    /// Start a context of the given kind on its own thread.
    pub fn spawn(kind: ContextKind, database: &Database, event_bus: EventBus) -> PlResult<Self> {
        let conn = database.conn()?;
        let runtime = Builder::new_current_thread()
            .enable_time()
            .thread_name(format!("parley-{kind}"))
            .build()
            .map_err(|e| PlError::ServiceInit(format!("{kind} context runtime: {e}")))?;

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();
        let context = Self {
            shared: Arc::new(Shared {
                id,
                kind,
                sender,
                runtime: runtime.handle().clone(),
                thread: Mutex::new(None),
            }),
        };

        let own = context.clone();
        let thread = std::thread::Builder::new()
            .name(format!("parley-{kind}-context"))
            .spawn(move || {
                CURRENT_CONTEXT.with(|c| c.set(Some((id, kind))));
                let mut state = ContextState::new(own, conn, event_bus);

                runtime.block_on(async {
                    while let Some(command) = receiver.recv().await {
                        match command {
                            Command::Run(job) => job(&mut state),
                            Command::Stop => break,
                        }
                    }
                });

                state.tear_down();
                // Dropping the runtime cancels any task still scheduled on it.
                drop(runtime);
                CURRENT_CONTEXT.with(|c| c.set(None));
                debug!(context = %kind, "context thread exited");
            })
            .map_err(|e| PlError::ServiceInit(format!("{kind} context thread: {e}")))?;

        *context.shared.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);

        info!(context = %kind, id, "execution context started");
        Ok(context)
    }

    pub fn kind(&self) -> ContextKind {
        self.shared.kind
    }

    /// True when called from this context's own thread.
    pub fn is_current(&self) -> bool {
        CURRENT_CONTEXT.with(|c| matches!(c.get(), Some((id, _)) if id == self.shared.id))
    }

    /// Kind of the context the calling thread belongs to, if any.
    pub fn current_kind() -> Option<ContextKind> {
        CURRENT_CONTEXT.with(|c| c.get().map(|(_, kind)| kind))
    }

    /// Whether the context still accepts work.
    pub fn is_running(&self) -> bool {
        !self.shared.sender.is_closed()
    }

    fn submit(&self, job: Job) -> PlResult<()> {
        self.shared
            .sender
            .send(Command::Run(job))
            .map_err(|_| PlError::ContextClosed(self.kind().to_string()))
    }

    /// Queue a job. Jobs run in submission order. A job sent to a stopped
    /// context is dropped with a warning.
    pub fn perform<F>(&self, job: F)
    where
        F: FnOnce(&mut ContextState) + Send + 'static,
    {
        if self.submit(Box::new(job)).is_err() {
            warn!(context = %self.kind(), "context has shut down, dropping job");
        }
    }

    /// Queue a job and await its result.
    pub async fn perform_async<T, F>(&self, job: F) -> PlResult<T>
    where
        F: FnOnce(&mut ContextState) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move |state| {
            let _ = tx.send(job(state));
        }))?;
        rx.await
            .map_err(|_| PlError::ContextClosed(self.kind().to_string()))
    }

    /// Queue a job and block the calling thread until it finishes.
    ///
    /// Fails instead of deadlocking when called from this context itself.
    pub fn perform_and_wait<T, F>(&self, job: F) -> PlResult<T>
    where
        F: FnOnce(&mut ContextState) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Err(PlError::Internal(format!(
                "perform_and_wait called from the {} context itself",
                self.kind()
            )));
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.submit(Box::new(move |state| {
            let _ = tx.send(job(state));
        }))?;
        rx.recv()
            .map_err(|_| PlError::ContextClosed(self.kind().to_string()))
    }

    /// Spawn a future on this context's runtime.
    pub(crate) fn spawn_task<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.runtime.spawn(future)
    }

    /// Stop the context: queued jobs ahead of the stop still run, timer
    /// registries are torn down, the connection returns to the pool.
    /// Idempotent. Waits for the thread unless called from it.
    pub fn shutdown(&self) {
        if self.shared.sender.send(Command::Stop).is_ok() {
            info!(context = %self.kind(), "stopping execution context");
        }
        if self.is_current() {
            return;
        }
        let thread = self
            .shared
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!(context = %self.kind(), "context thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ManagedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContext")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

/// What a job running on a context gets access to.
pub struct ContextState {
    context: ManagedContext,
    conn: PooledConn,
    event_bus: EventBus,
    metadata: HashMap<&'static str, Box<dyn Any>>,
}

impl ContextState {
    fn new(context: ManagedContext, conn: PooledConn, event_bus: EventBus) -> Self {
        Self {
            context,
            conn,
            event_bus,
            metadata: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.context.kind()
    }

    /// Handle to the context this state belongs to.
    pub fn context(&self) -> &ManagedContext {
        &self.context
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // ─── Metadata ────────────────────────────────────────────────────────

    /// A clone of the value stored under `key`, if present with type `T`.
    pub fn metadata<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.metadata
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn set_metadata<T: 'static>(&mut self, key: &'static str, value: T) {
        self.metadata.insert(key, Box::new(value));
    }

    /// Remove and return the value under `key` if it has type `T`.
    pub fn remove_metadata<T: 'static>(&mut self, key: &str) -> Option<T> {
        let value = self.metadata.remove(key)?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    // ─── Loading ─────────────────────────────────────────────────────────

    /// Load messages by id into this context, in the given order.
    pub fn fetch_messages(&self, ids: &[i64]) -> PlResult<Vec<Message>> {
        let kind = self.kind();
        let mut messages = Message::find_by_ids(&self.conn, ids)?;
        for message in &mut messages {
            message.context = Some(kind);
        }
        Ok(messages)
    }

    pub fn fetch_message(&self, id: i64) -> PlResult<Option<Message>> {
        let kind = self.kind();
        Ok(Message::find_by_id(&self.conn, id)?.map(|mut message| {
            message.context = Some(kind);
            message
        }))
    }

    fn tear_down(&mut self) {
        self.tear_down_message_obfuscation_timer();
        self.tear_down_message_deletion_timer();
        self.metadata.clear();
    }
}

/// The UI-facing and background contexts over one database.
pub struct ContextStack {
    pub ui: ManagedContext,
    pub sync: ManagedContext,
    event_bus: EventBus,
}

impl ContextStack {
    pub fn new(database: &Database, event_bus: EventBus) -> PlResult<Self> {
        let ui = ManagedContext::spawn(ContextKind::Ui, database, event_bus.clone())?;
        let sync = match ManagedContext::spawn(ContextKind::Sync, database, event_bus.clone()) {
            Ok(sync) => sync,
            Err(e) => {
                ui.shutdown();
                return Err(e);
            }
        };
        Ok(Self {
            ui,
            sync,
            event_bus,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn get(&self, kind: ContextKind) -> &ManagedContext {
        match kind {
            ContextKind::Ui => &self.ui,
            ContextKind::Sync => &self.sync,
        }
    }

    /// Stop both contexts. Sync first, so nothing it queues for the UI
    /// context is lost before the UI context stops.
    pub fn shutdown(&self) {
        self.sync.shutdown();
        self.ui.shutdown();
    }
}

impl Drop for ContextStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}
