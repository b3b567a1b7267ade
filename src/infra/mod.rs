//! Infra control plane
//!
//! Power management for the compute backend VM, behind the
//! [`VmControlPlane`] trait so the readiness controller can be tested
//! without a cloud account. [`AzureRestControlPlane`] is the production
//! implementation.

mod azure;

pub use self::azure::AzureRestControlPlane;

use async_trait::async_trait;

use crate::Result;

/// VM power management operations
#[async_trait]
pub trait VmControlPlane: Send + Sync {
    /// Fetch the VM's current status codes (e.g. `PowerState/running`)
    async fn instance_view(&self) -> Result<Vec<String>>;

    /// Issue a start command. Idempotent on the infra side.
    async fn begin_start(&self) -> Result<()>;

    /// Issue a deallocate command. Idempotent on the infra side.
    async fn begin_deallocate(&self) -> Result<()>;
}

/// Interpreted VM power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// VM is up (the process inside may still be booting)
    Running,
    /// VM is starting
    Starting,
    /// VM is stopped, deallocated, or in an unrecognized state
    Stopped,
}

/// Interpret instance-view status codes into a power state
#[must_use]
pub fn power_state(statuses: &[String]) -> PowerState {
    for status in statuses {
        match status.as_str() {
            "PowerState/running" => return PowerState::Running,
            "PowerState/starting" => return PowerState::Starting,
            _ => {}
        }
    }
    PowerState::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_interpretation() {
        let running = vec![
            "ProvisioningState/succeeded".to_string(),
            "PowerState/running".to_string(),
        ];
        assert_eq!(power_state(&running), PowerState::Running);

        let starting = vec!["PowerState/starting".to_string()];
        assert_eq!(power_state(&starting), PowerState::Starting);

        let deallocated = vec!["PowerState/deallocated".to_string()];
        assert_eq!(power_state(&deallocated), PowerState::Stopped);

        assert_eq!(power_state(&[]), PowerState::Stopped);
    }
}
