//! Destruction timers for ephemeral messages.
//!
//! One registry per execution context, created on first access and kept in
//! the context's metadata: the obfuscation registry on the UI context, the
//! deletion registry on the sync context. Each entry is keyed by message id
//! and tagged with what happens on fire. Every start, stop and fire runs on
//! the owning context, and a fire only acts if its generation is still the
//! current one for the message, so a replaced timer can never run.
//!
//! Every armed timer also has a `destruction_timers` row. The row survives
//! teardown and restarts, and [`DestructionTimer::restore`] re-arms it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pl_core::constants::metadata_keys::{MESSAGE_DELETION_TIMER, MESSAGE_OBFUSCATION_TIMER};
use pl_core::error::{PlError, PlResult};
use pl_core::ContextKind;
use pl_models::{DestructionType, PendingDestruction};

use crate::context::{ContextState, ManagedContext};
use crate::event_bus::AppEvent;

struct TimerEntry {
    generation: u64,
    kind: DestructionType,
    fire_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

struct TimerInner {
    registry: &'static str,
    context: ManagedContext,
    entries: Mutex<HashMap<i64, TimerEntry>>,
    next_generation: AtomicU64,
    torn_down: AtomicBool,
}

/// Per-context table of message destruction timers. Cheap to clone; all
/// clones share one table.
#[derive(Clone)]
pub struct DestructionTimer {
    inner: Arc<TimerInner>,
}

impl DestructionTimer {
    fn new(registry: &'static str, context: ManagedContext) -> Self {
        debug!(registry, context = %context.kind(), "destruction timer registry created");
        Self {
            inner: Arc::new(TimerInner {
                registry,
                context,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Name under which owed timers of this registry are stored.
    pub fn registry(&self) -> &'static str {
        self.inner.registry
    }

    /// Obfuscate the message after `timeout`, replacing any pending timer.
    pub fn start_obfuscation_timer(
        &self,
        state: &ContextState,
        message_id: i64,
        timeout: Duration,
    ) -> PlResult<()> {
        self.start(state, message_id, DestructionType::Obfuscation, timeout)
    }

    /// Delete the message for everyone after `timeout`, replacing any
    /// pending timer.
    pub fn start_deletion_timer(
        &self,
        state: &ContextState,
        message_id: i64,
        timeout: Duration,
    ) -> PlResult<()> {
        self.start(state, message_id, DestructionType::Deletion, timeout)
    }

    fn start(
        &self,
        state: &ContextState,
        message_id: i64,
        kind: DestructionType,
        timeout: Duration,
    ) -> PlResult<()> {
        self.assert_on_context();
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return Err(PlError::Internal(format!(
                "{} registry has been torn down",
                self.inner.registry
            )));
        }

        let delay = chrono::Duration::from_std(timeout)
            .map_err(|e| PlError::Internal(format!("timeout out of range: {e}")))?;
        let fire_at = Utc::now() + delay;

        PendingDestruction {
            registry: self.inner.registry.to_string(),
            message_id,
            kind,
            fire_at,
        }
        .save(state.conn())?;

        self.arm(message_id, kind, fire_at, timeout);
        debug!(
            registry = self.inner.registry,
            message_id,
            %kind,
            timeout_ms = timeout.as_millis() as u64,
            "destruction timer started"
        );
        Ok(())
    }

    /// Schedule the in-memory timer, replacing and cancelling any previous
    /// one for the message.
    fn arm(&self, message_id: i64, kind: DestructionType, fire_at: DateTime<Utc>, delay: Duration) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<TimerInner> = Arc::downgrade(&self.inner);
        let context = self.inner.context.clone();

        let task = self.inner.context.spawn_task(async move {
            tokio::time::sleep(delay).await;
            context.perform(move |state| {
                if let Some(inner) = weak.upgrade() {
                    DestructionTimer { inner }.fire(state, message_id, generation);
                }
            });
        });

        let previous = self.entries().insert(
            message_id,
            TimerEntry {
                generation,
                kind,
                fire_at,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
            debug!(
                registry = self.inner.registry,
                message_id,
                replaced = %previous.kind,
                "pending destruction timer replaced"
            );
        }
    }

    /// Cancel the timer for a message. Returns whether one was pending.
    pub fn stop_timer(&self, state: &ContextState, message_id: i64) -> PlResult<bool> {
        self.assert_on_context();
        let entry = self.entries().remove(&message_id);
        let owed = PendingDestruction::delete(state.conn(), self.inner.registry, message_id)?;

        let was_running = match entry {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        };
        if was_running || owed {
            debug!(registry = self.inner.registry, message_id, "destruction timer stopped");
        }
        Ok(was_running || owed)
    }

    pub fn is_timer_running(&self, message_id: i64) -> bool {
        self.entries().contains_key(&message_id)
    }

    /// Number of armed timers.
    pub fn pending_count(&self) -> usize {
        self.entries().len()
    }

    /// When the armed timer for a message is due.
    pub fn fire_at(&self, message_id: i64) -> Option<DateTime<Utc>> {
        self.entries().get(&message_id).map(|e| e.fire_at)
    }

    /// Re-arm every owed timer of this registry. Overdue ones fire on the
    /// next turn of the context. Returns how many were armed.
    pub fn restore(&self, state: &ContextState) -> PlResult<usize> {
        self.assert_on_context();
        let owed = PendingDestruction::load_for_registry(state.conn(), self.inner.registry)?;
        let now = Utc::now();

        let mut restored = 0;
        for pending in owed {
            if self.is_timer_running(pending.message_id) {
                continue;
            }
            let remaining = (pending.fire_at - now).to_std().unwrap_or(Duration::ZERO);
            self.arm(pending.message_id, pending.kind, pending.fire_at, remaining);
            restored += 1;
        }

        if restored > 0 {
            info!(registry = self.inner.registry, restored, "owed destruction timers restored");
        }
        Ok(restored)
    }

    /// Cancel every armed timer. Owed rows stay so a later
    /// [`restore`](Self::restore) can re-arm them. Idempotent.
    pub fn tear_down(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<TimerEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.task.abort();
        }
        debug!(
            registry = self.inner.registry,
            cancelled = entries.len(),
            "destruction timer registry torn down"
        );
    }

    fn fire(&self, state: &mut ContextState, message_id: i64, generation: u64) {
        let entry = {
            let mut entries = self.entries();
            match entries.get(&message_id) {
                Some(entry) if entry.generation == generation => entries.remove(&message_id),
                _ => None,
            }
        };
        // Replaced or stopped since this fire was queued.
        let Some(entry) = entry else { return };

        if let Err(e) = PendingDestruction::delete(state.conn(), self.inner.registry, message_id) {
            warn!(registry = self.inner.registry, message_id, "failed to clear owed timer: {e}");
        }
        if let Err(e) = self.execute(state, message_id, entry.kind) {
            warn!(
                registry = self.inner.registry,
                message_id,
                kind = %entry.kind,
                "destruction failed: {e}"
            );
        }
    }

    fn execute(&self, state: &mut ContextState, message_id: i64, kind: DestructionType) -> PlResult<()> {
        let message = state
            .fetch_message(message_id)?
            .filter(|m| !m.is_orphaned() && !m.has_been_deleted());
        let Some(mut message) = message else {
            debug!(message_id, %kind, "message gone before its timer fired");
            state
                .event_bus()
                .emit(AppEvent::DestructionTimerDropped { message_id, kind });
            return Ok(());
        };

        match kind {
            DestructionType::Obfuscation => {
                message.obfuscate(state.conn())?;
                state
                    .event_bus()
                    .emit(AppEvent::MessageObfuscated { message_id });
            }
            DestructionType::Deletion => {
                let conversation_id = message.conversation_id().unwrap_or_default();
                message.delete_for_everyone(state.conn())?;
                state.event_bus().emit(AppEvent::MessageDeletedForEveryone {
                    message_id,
                    conversation_id,
                });
            }
        }
        Ok(())
    }

    /// The entry table. Every mutation is a single map operation, so a
    /// panic elsewhere while the lock was held leaves it consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<i64, TimerEntry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assert_on_context(&self) {
        assert!(
            self.inner.context.is_current(),
            "{} registry used outside the {} context",
            self.inner.registry,
            self.inner.context.kind()
        );
    }
}

impl std::fmt::Debug for DestructionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestructionTimer")
            .field("registry", &self.inner.registry)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ContextState {
    /// The obfuscation timer registry. UI context only; panics elsewhere.
    pub fn message_obfuscation_timer(&mut self) -> DestructionTimer {
        assert_eq!(
            self.kind(),
            ContextKind::Ui,
            "the obfuscation timer must be used on the ui context"
        );
        self.timer_registry(MESSAGE_OBFUSCATION_TIMER)
    }

    /// The deletion timer registry. Sync context only; panics elsewhere.
    pub fn message_deletion_timer(&mut self) -> DestructionTimer {
        assert_eq!(
            self.kind(),
            ContextKind::Sync,
            "the deletion timer must be used on the sync context"
        );
        self.timer_registry(MESSAGE_DELETION_TIMER)
    }

    fn timer_registry(&mut self, key: &'static str) -> DestructionTimer {
        if let Some(timer) = self.metadata::<DestructionTimer>(key) {
            return timer;
        }
        let timer = DestructionTimer::new(key, self.context().clone());
        self.set_metadata(key, timer.clone());
        timer
    }

    pub fn tear_down_message_obfuscation_timer(&mut self) {
        if let Some(timer) = self.remove_metadata::<DestructionTimer>(MESSAGE_OBFUSCATION_TIMER) {
            timer.tear_down();
        }
    }

    pub fn tear_down_message_deletion_timer(&mut self) {
        if let Some(timer) = self.remove_metadata::<DestructionTimer>(MESSAGE_DELETION_TIMER) {
            timer.tear_down();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStack;
    use crate::event_bus::EventBus;
    use pl_core::config::DatabaseConfig;
    use pl_models::Database;
    use tempfile::TempDir;

    fn test_stack() -> (ContextStack, Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("timers.db"), &DatabaseConfig::default()).unwrap();
        let stack = ContextStack::new(&db, EventBus::new(16)).unwrap();
        (stack, db, dir)
    }

    #[test]
    fn test_registry_is_a_singleton_per_context() {
        let (stack, _db, _dir) = test_stack();
        let same = stack
            .ui
            .perform_and_wait(|state| {
                let a = state.message_obfuscation_timer();
                let b = state.message_obfuscation_timer();
                Arc::ptr_eq(&a.inner, &b.inner)
            })
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_teardown_drops_the_registry() {
        let (stack, _db, _dir) = test_stack();
        let (fresh, first_torn_down) = stack
            .sync
            .perform_and_wait(|state| {
                let first = state.message_deletion_timer();
                state.tear_down_message_deletion_timer();
                state.tear_down_message_deletion_timer();
                let second = state.message_deletion_timer();
                (
                    !Arc::ptr_eq(&first.inner, &second.inner),
                    first.inner.torn_down.load(Ordering::SeqCst),
                )
            })
            .unwrap();
        assert!(fresh);
        assert!(first_torn_down);
    }

    #[test]
    fn test_start_after_teardown_is_refused() {
        let (stack, _db, _dir) = test_stack();
        let refused = stack
            .ui
            .perform_and_wait(|state| {
                let timer = state.message_obfuscation_timer();
                timer.tear_down();
                timer
                    .start_obfuscation_timer(state, 1, Duration::from_secs(1))
                    .is_err()
            })
            .unwrap();
        assert!(refused);
    }

    #[test]
    fn test_poisoned_table_still_arms_and_reports() {
        let (stack, _db, _dir) = test_stack();
        let (running, pending, due) = stack
            .ui
            .perform_and_wait(|state| {
                let timer = state.message_obfuscation_timer();
                let inner = timer.inner.clone();
                let poisoner = std::thread::spawn(move || {
                    let _entries = inner.entries.lock().unwrap();
                    panic!("panicked while holding the timer table");
                });
                assert!(poisoner.join().is_err());
                assert!(timer.inner.entries.is_poisoned());

                let fire_at = Utc::now() + chrono::Duration::seconds(60);
                timer.arm(7, DestructionType::Obfuscation, fire_at, Duration::from_secs(60));
                let result = (timer.is_timer_running(7), timer.pending_count(), timer.fire_at(7));
                timer.tear_down();
                result
            })
            .unwrap();
        assert!(running);
        assert_eq!(pending, 1);
        assert!(due.is_some());
    }

    #[test]
    fn test_registry_names() {
        let (stack, _db, _dir) = test_stack();
        let name = stack
            .sync
            .perform_and_wait(|state| state.message_deletion_timer().registry())
            .unwrap();
        assert_eq!(name, MESSAGE_DELETION_TIMER);
    }
}
