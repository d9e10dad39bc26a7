//! Write-control arbitration.
//!
//! At most one controller token may issue mutating commands at a time.
//! Holding the token *is* being the controller: two browsers that know the
//! same token are co-owners. Every change of ownership is broadcast to all
//! sessions as a `control_status` event that never carries the token.
//!
//! # Architecture
//!
//! The state lives behind one [`std::sync::Mutex`]. Transitions are short
//! and never await; the broadcast is sent after the guard is dropped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gateway_types::{ControlStatus, ControlView, PushEvent};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::config::ControlConfig;

/// Reasons a control operation is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The token is empty or not on the allowlist.
    #[error("invalid control token")]
    InvalidToken,

    /// A write was attempted without any token.
    #[error("control token required")]
    MissingToken,

    /// Another token holds control.
    #[error("control is held by another controller")]
    ControlTaken,

    /// The token does not match the current controller.
    #[error("not the controller")]
    NotController,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlState {
    Free,
    Controlled { token: String, last_activity: Instant },
}

#[derive(Debug)]
struct ArbiterState {
    control: ControlState,
    revision: u64,
}

/// Arbitrates which token may write.
#[derive(Debug)]
pub struct ControlArbiter {
    state: Mutex<ArbiterState>,
    allowed_tokens: BTreeSet<String>,
    idle_timeout: Option<Duration>,
    bus: Arc<EventBus>,
}

impl ControlArbiter {
    /// Create a free arbiter broadcasting through `bus`.
    pub fn new(config: &ControlConfig, bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(ArbiterState {
                control: ControlState::Free,
                revision: 0,
            }),
            allowed_tokens: config.tokens.iter().cloned().collect(),
            idle_timeout: config.idle_timeout(),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle timeout in whole seconds, 0 when disabled.
    pub fn timeout_sec(&self) -> u64 {
        self.idle_timeout.map_or(0, |t| t.as_secs())
    }

    /// How often a watchdog should call [`Self::expire_idle`], if at all.
    pub fn watchdog_interval(&self) -> Option<Duration> {
        self.idle_timeout
            .map(|t| t.checked_div(2).unwrap_or(t).max(Duration::from_secs(1)))
    }

    fn is_idle(&self, last_activity: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| last_activity.elapsed() > timeout)
    }

    fn snapshot(&self, state: &ArbiterState) -> ControlStatus {
        ControlStatus {
            has_controller: matches!(state.control, ControlState::Controlled { .. }),
            timeout_sec: self.timeout_sec(),
            revision: state.revision,
        }
    }

    /// Try to become the controller with `token`.
    ///
    /// Succeeds when control is free, already held by the same token, or
    /// held by a controller that has been idle past the timeout.
    pub async fn take(&self, token: &str) -> Result<ControlView, ControlError> {
        if token.is_empty() {
            return Err(ControlError::InvalidToken);
        }
        if !self.allowed_tokens.is_empty() && !self.allowed_tokens.contains(token) {
            warn!("Rejected control take with a token outside the allowlist");
            return Err(ControlError::InvalidToken);
        }

        let status = {
            let mut state = self.lock();
            match &state.control {
                ControlState::Controlled {
                    token: current,
                    last_activity,
                } if current != token => {
                    if !self.is_idle(*last_activity) {
                        return Err(ControlError::ControlTaken);
                    }
                    info!("Idle controller superseded");
                }
                ControlState::Controlled { .. } | ControlState::Free => {}
            }
            state.control = ControlState::Controlled {
                token: token.to_owned(),
                last_activity: Instant::now(),
            };
            state.revision = state.revision.wrapping_add(1);
            self.snapshot(&state)
        };

        info!(revision = status.revision, "Control taken");
        self.bus.broadcast(PushEvent::ControlStatus(status)).await;
        Ok(ControlView {
            is_controller: true,
            has_controller: true,
            timeout_sec: status.timeout_sec,
        })
    }

    /// Release control unconditionally.
    pub async fn release(&self) -> ControlStatus {
        let status = {
            let mut state = self.lock();
            state.control = ControlState::Free;
            state.revision = state.revision.wrapping_add(1);
            self.snapshot(&state)
        };
        info!(revision = status.revision, "Control released");
        self.bus.broadcast(PushEvent::ControlStatus(status)).await;
        status
    }

    /// Control state as seen by the holder of `token`.
    pub fn status(&self, token: Option<&str>) -> ControlView {
        let state = self.lock();
        let (has_controller, is_controller) = match &state.control {
            ControlState::Free => (false, false),
            ControlState::Controlled { token: current, .. } => {
                (true, token.is_some_and(|t| !t.is_empty() && t == current))
            }
        };
        ControlView {
            is_controller,
            has_controller,
            timeout_sec: self.timeout_sec(),
        }
    }

    /// Control state as broadcast to every session.
    pub fn current_status(&self) -> ControlStatus {
        self.snapshot(&self.lock())
    }

    /// Gate a write: the token must be the controller's.
    ///
    /// Success refreshes the idle timer.
    pub fn authorize(&self, token: Option<&str>) -> Result<(), ControlError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ControlError::MissingToken),
        };
        let mut state = self.lock();
        match &mut state.control {
            ControlState::Controlled {
                token: current,
                last_activity,
            } if current.as_str() == token => {
                *last_activity = Instant::now();
                Ok(())
            }
            _ => Err(ControlError::NotController),
        }
    }

    /// Release control if the controller has been idle past the timeout.
    ///
    /// Returns `true` when control was released.
    pub async fn expire_idle(&self) -> bool {
        let status = {
            let mut state = self.lock();
            let expired = match &state.control {
                ControlState::Controlled { last_activity, .. } => self.is_idle(*last_activity),
                ControlState::Free => false,
            };
            if !expired {
                return false;
            }
            state.control = ControlState::Free;
            state.revision = state.revision.wrapping_add(1);
            self.snapshot(&state)
        };
        info!(revision = status.revision, "Idle controller released");
        self.bus.broadcast(PushEvent::ControlStatus(status)).await;
        true
    }
}
