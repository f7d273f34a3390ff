//! Reconnection policy: connection status machine plus exponential backoff.
//!
//! The machine is a pure, synchronous state core; the session drives it from
//! transport events and executes the returned [`ReconnectAction`]s. All
//! backoff state lives here so no other component ever races to open a
//! second socket.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Connection status of the single realtime transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. }
        )
    }
}

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub cap_delay_ms: u64,
    /// Attempt ceiling; exceeding it is terminal until a manual retry
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            cap_delay_ms: 30000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for a 1-indexed attempt: `min(base * 2^(n-1), cap)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.cap_delay_ms))
    }
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Invoke the transport adapter's connect now.
    Connect,
    /// Sleep for the given delay, then report `on_backoff_elapsed`.
    Backoff(Duration),
}

/// Pure state machine over [`ConnectionStatus`].
#[derive(Debug)]
pub struct ReconnectMachine {
    config: ReconnectConfig,
    status: ConnectionStatus,
    attempt: u32,
    timer_pending: bool,
}

impl ReconnectMachine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            timer_pending: false,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Login or manual retry. Ignored while a connect or backoff timer is
    /// already in flight.
    pub fn on_connect_requested(&mut self) -> Option<ReconnectAction> {
        if self.timer_pending {
            return None;
        }
        match self.status {
            ConnectionStatus::Disconnected | ConnectionStatus::Failed { .. } => {
                self.attempt = 0;
                self.status = ConnectionStatus::Connecting;
                Some(ReconnectAction::Connect)
            }
            _ => None,
        }
    }

    /// The transport reported opened.
    ///
    /// Ignored unless a connect is actually in flight: a logout may have
    /// reset the machine while the attempt was awaiting the socket, and the
    /// late open must not resurrect `Connected`.
    pub fn on_opened(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.attempt = 0;
    }

    /// The transport closed or a connect attempt failed.
    ///
    /// A normal closure goes straight to `Disconnected` without scheduling a
    /// reconnect. Close events while a backoff timer is pending, or while
    /// already down, are ignored rather than scheduling a second timer.
    pub fn on_closed(&mut self, normal: bool) -> Option<ReconnectAction> {
        if self.timer_pending {
            return None;
        }
        if matches!(
            self.status,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed { .. }
        ) {
            return None;
        }
        if normal {
            self.status = ConnectionStatus::Disconnected;
            return None;
        }
        if self.attempt >= self.config.max_attempts {
            warn!(
                max_attempts = self.config.max_attempts,
                "reconnect ceiling exceeded, giving up"
            );
            self.status = ConnectionStatus::Failed {
                reason: format!(
                    "max reconnect attempts ({}) exceeded",
                    self.config.max_attempts
                ),
            };
            return None;
        }
        self.attempt += 1;
        self.timer_pending = true;
        self.status = ConnectionStatus::Reconnecting {
            attempt: self.attempt,
        };
        let delay = self.config.delay_for_attempt(self.attempt);
        info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        Some(ReconnectAction::Backoff(delay))
    }

    /// The backoff timer fired. Returns `Connect` unless a logout reset the
    /// machine in the meantime.
    pub fn on_backoff_elapsed(&mut self) -> Option<ReconnectAction> {
        if !self.timer_pending {
            return None;
        }
        self.timer_pending = false;
        if !matches!(self.status, ConnectionStatus::Reconnecting { .. }) {
            return None;
        }
        self.status = ConnectionStatus::Connecting;
        Some(ReconnectAction::Connect)
    }

    /// Logout or explicit teardown: back to `Disconnected`, counters cleared.
    pub fn reset(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.attempt = 0;
        self.timer_pending = false;
    }
}

/// Thread-safe wrapper broadcasting status through a watch channel.
pub struct ReconnectController {
    machine: Mutex<ReconnectMachine>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            machine: Mutex::new(ReconnectMachine::new(config)),
            status_tx,
        }
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut ReconnectMachine) -> R) -> R {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut machine);
        self.status_tx.send_if_modified(|status| {
            if *status != *machine.status() {
                *status = machine.status().clone();
                true
            } else {
                false
            }
        });
        result
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn on_connect_requested(&self) -> Option<ReconnectAction> {
        self.with_machine(|m| m.on_connect_requested())
    }

    pub fn on_opened(&self) {
        self.with_machine(|m| m.on_opened())
    }

    pub fn on_closed(&self, normal: bool) -> Option<ReconnectAction> {
        self.with_machine(|m| m.on_closed(normal))
    }

    pub fn on_backoff_elapsed(&self) -> Option<ReconnectAction> {
        self.with_machine(|m| m.on_backoff_elapsed())
    }

    pub fn reset(&self) {
        self.with_machine(|m| m.reset())
    }
}
