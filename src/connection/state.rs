//! Session lifecycle states and the transitions between them.

/// WebSocket session state.
///
/// A session starts `Closed`, moves through `Connecting` to `Open`, and ends
/// back in `Closed`, from which it may connect again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No transport; the initial and terminal state.
    #[default]
    Closed,
    /// Transport connecting or opening handshake in progress.
    Connecting,
    /// Handshake complete; data may flow both ways.
    Open,
    /// Close frame sent, waiting for the peer's Close.
    Closing,
}

impl ConnectionState {
    /// Returns `true` for `Connecting`, `Open`, or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Sending data is only allowed while `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are read while `Open` or `Closing`.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

#[cfg(feature = "async-tokio")]
pub use machine::StateMachine;

#[cfg(feature = "async-tokio")]
mod machine {
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::sync::watch;

    use super::ConnectionState;
    use crate::error::{Error, Result};

    /// Owner of a session's [`ConnectionState`].
    ///
    /// Every transition goes through here and is published on a `watch`
    /// channel, so tasks blocked on the transport can observe teardown.
    /// Each connect attempt starts a new epoch; delayed actions carry the
    /// epoch they were scheduled in and are ignored once it has passed.
    #[derive(Debug)]
    pub struct StateMachine {
        tx: watch::Sender<ConnectionState>,
        epoch: AtomicU64,
    }

    impl Default for StateMachine {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StateMachine {
        /// A machine in `Closed`, epoch 0.
        #[must_use]
        pub fn new() -> Self {
            let (tx, _) = watch::channel(ConnectionState::Closed);
            Self {
                tx,
                epoch: AtomicU64::new(0),
            }
        }

        /// Current state.
        #[must_use]
        pub fn state(&self) -> ConnectionState {
            *self.tx.borrow()
        }

        /// Current connect epoch.
        #[must_use]
        pub fn epoch(&self) -> u64 {
            self.epoch.load(Ordering::Acquire)
        }

        /// Watch state changes.
        #[must_use]
        pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
            self.tx.subscribe()
        }

        /// `Closed` → `Connecting`, starting a new epoch which is returned.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidState`] from any other state.
        pub fn begin_connect(&self) -> Result<u64> {
            let mut epoch = 0;
            self.transition("connect", &[ConnectionState::Closed], ConnectionState::Connecting, || {
                epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            })?;
            Ok(epoch)
        }

        /// `Connecting` → `Open`.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidState`] if the attempt was torn down meanwhile.
        pub fn handshake_succeeded(&self) -> Result<()> {
            self.transition("open", &[ConnectionState::Connecting], ConnectionState::Open, || {})
        }

        /// `Connecting` → `Closed`. No-op from any other state.
        pub fn handshake_failed(&self) {
            let _ = self.transition(
                "fail handshake",
                &[ConnectionState::Connecting],
                ConnectionState::Closed,
                || {},
            );
        }

        /// `Open` → `Closing`.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidState`] from any other state.
        pub fn begin_close(&self) -> Result<()> {
            self.transition("close", &[ConnectionState::Open], ConnectionState::Closing, || {})
        }

        /// `Closing` → `Closed`. Returns whether the transition happened.
        pub fn close_completed(&self) -> bool {
            self.transition(
                "complete close",
                &[ConnectionState::Closing],
                ConnectionState::Closed,
                || {},
            )
            .is_ok()
        }

        /// `Closing` → `Closed` if `epoch` is still the current epoch.
        pub fn close_wait_elapsed(&self, epoch: u64) -> bool {
            let mut fired = false;
            self.tx.send_if_modified(|state| {
                if *state == ConnectionState::Closing && self.epoch() == epoch {
                    *state = ConnectionState::Closed;
                    fired = true;
                }
                fired
            });
            if fired {
                tracing::debug!(epoch, "close wait elapsed, Closing -> Closed");
            }
            fired
        }

        /// Any state → `Closed`. Returns the state left.
        pub fn transport_lost(&self) -> ConnectionState {
            let previous = self.tx.send_replace(ConnectionState::Closed);
            if previous != ConnectionState::Closed {
                tracing::debug!(%previous, "transport lost, -> Closed");
            }
            previous
        }

        fn transition(
            &self,
            operation: &'static str,
            from: &[ConnectionState],
            to: ConnectionState,
            on_success: impl FnOnce(),
        ) -> Result<()> {
            let mut outcome = Ok(());
            self.tx.send_if_modified(|state| {
                if from.contains(state) {
                    tracing::debug!(from = %state, %to, "{operation}");
                    *state = to;
                    on_success();
                    true
                } else {
                    outcome = Err(Error::InvalidState {
                        operation,
                        state: *state,
                    });
                    false
                }
            });
            outcome
        }
    }
}
