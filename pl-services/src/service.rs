//! Service trait and lifecycle states.

use pl_core::error::PlResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Created but not initialized.
    Created,
    /// Initializing.
    Initializing,
    /// Running and ready.
    Running,
    /// Shutting down.
    ShuttingDown,
    /// Stopped.
    Stopped,
    /// Encountered a fatal error.
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Standard lifecycle and health-checking interface.
pub trait Service: Send {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    /// Current state of this service.
    fn state(&self) -> ServiceState;

    /// Initialize the service. Called once during startup.
    fn init(&mut self) -> PlResult<()>;

    /// Gracefully shut down the service.
    fn shutdown(&mut self) -> PlResult<()>;

    /// Returns true if the service is operational.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceState::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(ServiceState::Running.to_string(), "running");
    }
}
