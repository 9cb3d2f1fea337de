//! Finite state machine for the container lifecycle

use crate::errors::PlatformError;
use crate::models::container::ContainerStatus;

/// Lifecycle event applied to a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Start launching the backing service
    Deploy,

    /// Backing service created or updated
    DeploySucceeded,

    /// A finished build rolled a new image out
    Rollout,

    /// Begin scaling to zero
    Stop,

    /// Service scaled to zero
    Stopped,

    /// Begin tearing down the backing service
    Delete { force: bool },

    /// Unrecoverable error
    Fail,
}

/// Compute the status reached by applying `event` to `state`
pub fn next_status(
    state: ContainerStatus,
    event: LifecycleEvent,
) -> Result<ContainerStatus, PlatformError> {
    use ContainerStatus::*;

    let next = match (state, event) {
        // Deploy
        (Creating | Stopped | Failed, LifecycleEvent::Deploy) => Starting,
        (Starting, LifecycleEvent::DeploySucceeded) => Running,

        // Build rollouts replace the image in place
        (Creating | Starting | Running | Stopped | Failed, LifecycleEvent::Rollout) => Running,

        // Stop
        (Running, LifecycleEvent::Stop) => Stopping,
        (Stopping, LifecycleEvent::Stopped) => Stopped,

        // Delete
        (Stopped | Failed, LifecycleEvent::Delete { .. }) => Deleting,
        (Running, LifecycleEvent::Delete { force: true }) => Deleting,

        // Failure is reachable from anywhere
        (_, LifecycleEvent::Fail) => Failed,

        (state, event) => {
            return Err(PlatformError::InvalidTransition(format!(
                "{} -> {:?}",
                state, event
            )));
        }
    };

    Ok(next)
}

/// Tracks a single container's status through the lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleFsm {
    state: ContainerStatus,
}

impl LifecycleFsm {
    pub fn new(state: ContainerStatus) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ContainerStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: LifecycleEvent) -> Result<ContainerStatus, PlatformError> {
        self.state = next_status(self.state, event)?;
        Ok(self.state)
    }
}

impl Default for LifecycleFsm {
    fn default() -> Self {
        Self::new(ContainerStatus::Creating)
    }
}
