//! Cancellation switch for long-running sweeps.
//!
//! Activation is a single atomic flag plus who/when metadata. Workers poll
//! [`KillSwitch::is_active`] before taking new work, and anything that waits
//! can race [`KillSwitch::cancelled`] in a `tokio::select!`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Events emitted by the kill switch.
#[derive(Debug, Clone)]
pub enum KillSwitchEvent {
    Activated {
        by: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Reset {
        by: String,
        at: DateTime<Utc>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KillSwitchError {
    #[error("Kill switch is already active")]
    AlreadyActive,

    #[error("Kill switch is not active")]
    NotActive,
}

/// Returned by [`KillSwitch::check`] once work has been cancelled.
#[derive(Error, Debug, Clone)]
#[error("Cancelled by {activated_by} at {activated_at}: {reason}")]
pub struct Cancelled {
    pub activated_at: DateTime<Utc>,
    pub activated_by: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Activation {
    by: String,
    reason: String,
    at: DateTime<Utc>,
}

/// Current status of the kill switch.
#[derive(Debug, Clone)]
pub struct KillSwitchStatus {
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<String>,
    pub reason: Option<String>,
}

/// Cooperative cancellation flag shared by the scanner and removal executor.
///
/// ```rust,no_run
/// use ts_policy::kill_switch::KillSwitch;
///
/// #[tokio::main]
/// async fn main() {
///     let kill_switch = KillSwitch::new();
///     assert!(kill_switch.check().await.is_ok());
///
///     kill_switch.activate("operator", "ctrl-c").await.unwrap();
///     assert!(kill_switch.check().await.is_err());
/// }
/// ```
pub struct KillSwitch {
    active: AtomicBool,
    activation: RwLock<Option<Activation>>,
    sender: broadcast::Sender<KillSwitchEvent>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            active: AtomicBool::new(false),
            activation: RwLock::new(None),
            sender,
        }
    }

    /// Activates the switch. Work already in flight is allowed to finish.
    pub async fn activate(&self, by: &str, reason: &str) -> Result<(), KillSwitchError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(by = %by, "Kill switch already active");
            return Err(KillSwitchError::AlreadyActive);
        }

        let now = Utc::now();
        *self.activation.write().await = Some(Activation {
            by: by.to_string(),
            reason: reason.to_string(),
            at: now,
        });

        // No receivers is fine.
        let _ = self.sender.send(KillSwitchEvent::Activated {
            by: by.to_string(),
            reason: reason.to_string(),
            at: now,
        });

        warn!(by = %by, reason = %reason, "Cancellation requested, no new work will be dispatched");
        Ok(())
    }

    /// Clears the switch so a new run can start.
    pub async fn reset(&self, by: &str) -> Result<(), KillSwitchError> {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(KillSwitchError::NotActive);
        }

        let previous = self.activation.write().await.take();
        let _ = self.sender.send(KillSwitchEvent::Reset {
            by: by.to_string(),
            at: Utc::now(),
        });

        info!(
            by = %by,
            previous_by = ?previous.as_ref().map(|a| a.by.clone()),
            "Kill switch reset"
        );
        Ok(())
    }

    /// Lock-free check used on hot paths.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the switch is active, for use with `?`.
    pub async fn check(&self) -> Result<(), Cancelled> {
        if !self.is_active() {
            return Ok(());
        }
        let activation = self.activation.read().await.clone();
        Err(match activation {
            Some(a) => Cancelled {
                activated_at: a.at,
                activated_by: a.by,
                reason: a.reason,
            },
            None => Cancelled {
                activated_at: Utc::now(),
                activated_by: "unknown".to_string(),
                reason: String::new(),
            },
        })
    }

    /// Resolves when the switch is activated; immediately if it already is.
    pub async fn cancelled(&self) {
        let mut rx = self.sender.subscribe();
        if self.is_active() {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(KillSwitchEvent::Activated { .. }) => return,
                Ok(KillSwitchEvent::Reset { .. }) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_active() {
                        return;
                    }
                }
                // The sender lives as long as `self`.
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KillSwitchEvent> {
        self.sender.subscribe()
    }

    pub async fn status(&self) -> KillSwitchStatus {
        let activation = self.activation.read().await.clone();
        KillSwitchStatus {
            active: self.is_active(),
            activated_at: activation.as_ref().map(|a| a.at),
            activated_by: activation.as_ref().map(|a| a.by.clone()),
            reason: activation.map(|a| a.reason),
        }
    }
}
