//! Backend readiness and idle shutdown
//!
//! The compute backend runs on a cost-optimized VM that is deallocated when
//! idle. This module owns the two halves of that lifecycle: waking the VM
//! when a solve finds it unreachable, and deallocating it after a period of
//! inactivity.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compute::ComputeBackend;
use crate::config::IdleConfig;
use crate::infra::{PowerState, VmControlPlane, power_state};
use crate::{Error, Result};

/// Shared backend activity state.
///
/// Constructed once at startup and passed explicitly to the solve pipeline
/// and the background idle loop. Both fields are plain atomics; no lock is
/// held across any suspension point.
pub struct ActivityState {
    /// Seconds since the epoch of the last backend-facing call.
    /// Initialized to "now" so a fresh boot is never mistaken for idle.
    last_activity: AtomicU64,
    /// Guard against concurrent start/deallocate commands. Advisory:
    /// duplicate commands to the idempotent infra API are harmless, just
    /// wasteful.
    wakeup_in_progress: AtomicBool,
}

impl ActivityState {
    /// Create activity state anchored at "now"
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: AtomicU64::new(epoch_seconds()),
            wakeup_in_progress: AtomicBool::new(false),
        }
    }

    /// Record backend activity. Called at solve entry regardless of outcome,
    /// so a flurry of failing calls still counts as activity.
    pub fn touch(&self) {
        self.last_activity.store(epoch_seconds(), Ordering::Relaxed);
    }

    /// How long the backend has been without activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity.load(Ordering::Relaxed);
        Duration::from_secs(epoch_seconds().saturating_sub(last))
    }

    /// Whether a start/deallocate command is currently in flight
    #[must_use]
    pub fn wakeup_in_progress(&self) -> bool {
        self.wakeup_in_progress.load(Ordering::Relaxed)
    }

    /// Try to claim the transition guard. Returns false when another caller
    /// holds it.
    fn try_begin_transition(&self) -> bool {
        self.wakeup_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the transition guard
    fn end_transition(&self) {
        self.wakeup_in_progress.store(false, Ordering::Release);
    }
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Outcome of an `ensure_running` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Backend answered the health probe
    Running,
    /// VM is booting or a start command was just issued
    Starting,
}

/// Backend readiness controller
pub struct ReadinessController {
    compute: Arc<dyn ComputeBackend>,
    infra: Option<Arc<dyn VmControlPlane>>,
    activity: Arc<ActivityState>,
    idle: IdleConfig,
}

impl ReadinessController {
    /// Create a controller. `infra` may be absent, in which case wake-up and
    /// idle shutdown report a configuration error instead of acting.
    #[must_use]
    pub fn new(
        compute: Arc<dyn ComputeBackend>,
        infra: Option<Arc<dyn VmControlPlane>>,
        activity: Arc<ActivityState>,
        idle: IdleConfig,
    ) -> Self {
        Self {
            compute,
            infra,
            activity,
            idle,
        }
    }

    /// Make sure the backend is running or on its way up.
    ///
    /// Probe first: a healthy backend needs no infra round-trip. When the
    /// probe fails, consult the VM power state; a VM that is already running
    /// or starting gets no duplicate start command (the process inside is
    /// still booting), otherwise a start is issued under the transition
    /// guard.
    pub async fn ensure_running(&self) -> Result<Readiness> {
        if self.compute.health().await.is_ok() {
            self.activity.touch();
            return Ok(Readiness::Running);
        }

        let infra = self.infra.as_ref().ok_or_else(|| {
            Error::InfraNotConfigured(
                "backend is unreachable and no control plane is configured to start it"
                    .to_string(),
            )
        })?;

        let statuses = infra.instance_view().await?;
        match power_state(&statuses) {
            PowerState::Running | PowerState::Starting => {
                debug!(?statuses, "VM up but probe failed; process still booting");
                Ok(Readiness::Starting)
            }
            PowerState::Stopped => {
                if self.activity.try_begin_transition() {
                    let result = infra.begin_start().await;
                    self.activity.end_transition();
                    result?;
                    info!("Backend VM start issued");
                } else {
                    debug!("Wake-up already in progress, not issuing duplicate start");
                }
                Ok(Readiness::Starting)
            }
        }
    }

    /// Deallocate the backend VM when it has been idle past the threshold.
    ///
    /// Runs on a fixed period from the background loop. Must never panic or
    /// return an error: an infra hiccup logs and skips the cycle.
    pub async fn check_idle_and_shutdown(&self) {
        if !self.idle.enabled {
            return;
        }

        let idle_for = self.activity.idle_for();
        if idle_for < self.idle.threshold {
            return;
        }
        if self.activity.wakeup_in_progress() {
            debug!("Power transition in progress, skipping idle check");
            return;
        }

        let Some(infra) = self.infra.as_ref() else {
            debug!("Idle past threshold but no control plane configured");
            return;
        };

        let statuses = match infra.instance_view().await {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(error = %e, "Instance view failed, skipping idle cycle");
                return;
            }
        };

        if power_state(&statuses) != PowerState::Running {
            return;
        }

        info!(idle_minutes = idle_for.as_secs() / 60, "Backend idle, deallocating VM");
        if self.activity.try_begin_transition() {
            if let Err(e) = infra.begin_deallocate().await {
                warn!(error = %e, "Deallocate failed");
            }
            self.activity.end_transition();
        }
    }

    /// Spawn the periodic idle check loop. Exits when the shutdown channel
    /// fires.
    pub fn spawn_idle_loop(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = controller.idle.check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a just-booted
            // gateway does not race its own initialization.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.check_idle_and_shutdown().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("Idle loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}
