//! Lifecycle service for starting and stopping the data layer.
//!
//! Startup spawns both execution contexts, erases orphaned messages and
//! re-arms the destruction timers that were owed when the process last
//! stopped. Shutdown stops the contexts, which tears their timer
//! registries down.

use tracing::{debug, info, warn};

use pl_core::config::ConfigHandle;
use pl_core::error::{PlError, PlResult};
use pl_core::ContextKind;
use pl_models::{Database, Message};

use crate::context::ContextStack;
use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState};

/// Application lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    NotStarted,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What the startup sequence did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub orphans_purged: usize,
    pub obfuscation_timers_restored: usize,
    pub deletion_timers_restored: usize,
}

impl std::fmt::Display for StartupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "orphans_purged={}, obfuscation_timers={}, deletion_timers={}",
            self.orphans_purged, self.obfuscation_timers_restored, self.deletion_timers_restored,
        )
    }
}

/// Owns the execution contexts for the lifetime of the application.
pub struct LifecycleService {
    state: ServiceState,
    config: ConfigHandle,
    database: Database,
    event_bus: EventBus,
    phase: LifecyclePhase,
    contexts: Option<ContextStack>,
}

impl LifecycleService {
    pub fn new(config: ConfigHandle, database: Database, event_bus: EventBus) -> Self {
        Self {
            state: ServiceState::Created,
            config,
            database,
            event_bus,
            phase: LifecyclePhase::NotStarted,
            contexts: None,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// The running contexts, once startup has completed.
    pub fn contexts(&self) -> Option<&ContextStack> {
        self.contexts.as_ref()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Run the startup sequence.
    ///
    /// Steps:
    /// 1. Spawn the UI and sync contexts
    /// 2. Erase orphaned messages (if enabled)
    /// 3. Restore owed obfuscation timers on the UI context and owed
    ///    deletion timers on the sync context (if enabled)
    pub async fn startup(&mut self) -> PlResult<StartupReport> {
        if self.contexts.is_some() {
            return Err(PlError::Internal("lifecycle already started".into()));
        }
        info!("starting data layer");
        self.phase = LifecyclePhase::Starting;

        let config = self.config.snapshot().await;
        let contexts = ContextStack::new(&self.database, self.event_bus.clone())?;
        let mut report = StartupReport::default();

        if config.ephemeral.purge_orphans_on_startup {
            let purged = contexts
                .sync
                .perform_async(|state| Message::purge_orphans(state.conn()))
                .await??;
            if purged > 0 {
                info!("purged {purged} orphaned message(s)");
            }
            self.event_bus.emit(AppEvent::OrphansPurged { count: purged });
            report.orphans_purged = purged;
        }

        if config.ephemeral.restore_timers_on_startup {
            report.obfuscation_timers_restored = contexts
                .ui
                .perform_async(|state| {
                    let timer = state.message_obfuscation_timer();
                    timer.restore(state)
                })
                .await??;
            self.event_bus.emit(AppEvent::TimersRestored {
                context: ContextKind::Ui,
                count: report.obfuscation_timers_restored,
            });

            report.deletion_timers_restored = contexts
                .sync
                .perform_async(|state| {
                    let timer = state.message_deletion_timer();
                    timer.restore(state)
                })
                .await??;
            self.event_bus.emit(AppEvent::TimersRestored {
                context: ContextKind::Sync,
                count: report.deletion_timers_restored,
            });
        } else {
            debug!("timer restore disabled");
        }

        self.contexts = Some(contexts);
        self.phase = LifecyclePhase::Running;
        info!("startup complete ({report})");
        Ok(report)
    }

    /// Run the shutdown sequence: stop both contexts (tearing down their
    /// timer registries) and log final database stats.
    pub fn shutdown_sequence(&mut self) -> PlResult<()> {
        info!("starting shutdown sequence");
        self.phase = LifecyclePhase::ShuttingDown;

        if let Some(contexts) = self.contexts.take() {
            contexts.shutdown();
        }

        match self.database.stats() {
            Ok(stats) => info!("database stats at shutdown: {stats}"),
            Err(e) => warn!("failed to read database stats: {e}"),
        }

        self.phase = LifecyclePhase::Stopped;
        info!("shutdown sequence complete");
        Ok(())
    }
}

impl Service for LifecycleService {
    fn name(&self) -> &str {
        "lifecycle"
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    fn init(&mut self) -> PlResult<()> {
        self.state = ServiceState::Running;
        info!("lifecycle service initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> PlResult<()> {
        self.state = ServiceState::ShuttingDown;
        let result = self.shutdown_sequence();
        self.state = ServiceState::Stopped;
        result
    }

    fn is_healthy(&self) -> bool {
        self.state == ServiceState::Running
            && self
                .contexts
                .as_ref()
                .map(|c| c.ui.is_running() && c.sync.is_running())
                .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::config::{AppConfig, DatabaseConfig};
    use tempfile::TempDir;

    fn create_test_deps() -> (ConfigHandle, Database, EventBus, TempDir) {
        let config = ConfigHandle::new(AppConfig::default());
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("test.db"), &DatabaseConfig::default()).unwrap();
        (config, db, EventBus::new(16), dir)
    }

    #[test]
    fn test_lifecycle_service_name() {
        let (config, db, bus, _dir) = create_test_deps();
        let svc = LifecycleService::new(config, db, bus);
        assert_eq!(svc.name(), "lifecycle");
        assert_eq!(svc.phase(), LifecyclePhase::NotStarted);
        assert!(svc.contexts().is_none());
    }

    #[tokio::test]
    async fn test_startup_and_shutdown_on_empty_store() {
        let (config, db, bus, _dir) = create_test_deps();
        let mut svc = LifecycleService::new(config, db, bus);
        svc.init().unwrap();

        let report = svc.startup().await.unwrap();
        assert_eq!(report, StartupReport::default());
        assert_eq!(svc.phase(), LifecyclePhase::Running);
        assert!(svc.is_healthy());
        assert!(svc.startup().await.is_err());

        svc.shutdown().unwrap();
        assert_eq!(svc.phase(), LifecyclePhase::Stopped);
        assert_eq!(svc.state(), ServiceState::Stopped);
        assert!(svc.contexts().is_none());
    }

    #[test]
    fn test_lifecycle_phase_display() {
        assert_eq!(LifecyclePhase::Running.to_string(), "running");
        assert_eq!(LifecyclePhase::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(LifecyclePhase::NotStarted.to_string(), "not_started");
    }
}
