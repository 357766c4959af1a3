//! In-flight calls awaiting a reply.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use zbus::message::Type as MessageType;
use zbus::Message;

use super::call::CallTimeout;
use super::codec::ReplyMessage;
use super::error::{BusError, RpcError};

/// Sender half handed to whatever resolves the call.
pub type ReplySender = oneshot::Sender<Result<Message, BusError>>;

enum State {
    Waiting(oneshot::Receiver<Result<Message, BusError>>),
    Resolved(ReplyMessage),
    Consumed,
}

/// Handle to a sent call.
///
/// [`block`](Self::block) waits for the reply, bounded by the timeout given
/// at send time; [`steal_reply`](Self::steal_reply) then hands it out once.
/// Dropping the handle stops listening for the reply.
pub struct PendingCall {
    serial: u32,
    timeout: CallTimeout,
    state: State,
    listener: Option<JoinHandle<()>>,
}

impl PendingCall {
    /// Create a pending call resolved through the returned sender.
    pub fn channel(serial: u32, timeout: CallTimeout) -> (Self, ReplySender) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            serial,
            timeout,
            state: State::Waiting(rx),
            listener: None,
        };
        (pending, tx)
    }

    /// Attach the task that listens for the reply; it is aborted on drop.
    pub fn with_listener(mut self, listener: JoinHandle<()>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Serial of the call this handle waits on.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn timeout(&self) -> CallTimeout {
        self.timeout
    }

    /// Whether a reply is ready to be stolen.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Resolved(_))
    }

    /// Wait until the reply arrives or the send timeout expires.
    pub async fn block(&mut self) -> Result<(), RpcError> {
        let limit = self.timeout.duration();
        self.wait(limit.map(|d| Instant::now() + d)).await
    }

    /// Wait with a caller-supplied deadline instead of the send timeout.
    ///
    /// Timing out leaves the call pending, so the wait can be resumed.
    pub async fn block_until(&mut self, deadline: Instant) -> Result<(), RpcError> {
        self.wait(Some(deadline)).await
    }

    async fn wait(&mut self, deadline: Option<Instant>) -> Result<(), RpcError> {
        let mut rx = match std::mem::replace(&mut self.state, State::Consumed) {
            State::Waiting(rx) => rx,
            State::Resolved(reply) => {
                self.state = State::Resolved(reply);
                return Ok(());
            }
            State::Consumed => {
                return Err(RpcError::ProtocolViolation(format!(
                    "call {} has no reply left to wait for",
                    self.serial
                )))
            }
        };

        let started = Instant::now();
        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Still in flight: a later wait may pick the reply up.
                    self.state = State::Waiting(rx);
                    return Err(RpcError::Timeout(
                        deadline.saturating_duration_since(started),
                    ));
                }
            },
            None => rx.await,
        };

        let message = match outcome {
            Ok(Ok(message)) => message,
            Ok(Err(bus)) => return Err(RpcError::Connection(bus)),
            Err(_) => return Err(RpcError::Connection(BusError::disconnected())),
        };

        debug!(
            serial = self.serial,
            elapsed = ?started.elapsed(),
            "call resolved"
        );

        if message.message_type() == MessageType::Error {
            return Err(RpcError::Remote(BusError::from_error_reply(&message)));
        }

        self.state = State::Resolved(ReplyMessage::new(message));
        Ok(())
    }

    /// Take the reply. Succeeds exactly once, after a successful `block`.
    pub fn steal_reply(&mut self) -> Result<ReplyMessage, RpcError> {
        match std::mem::replace(&mut self.state, State::Consumed) {
            State::Resolved(reply) => Ok(reply),
            State::Waiting(rx) => {
                self.state = State::Waiting(rx);
                Err(RpcError::ProtocolViolation(format!(
                    "call {} has not been resolved yet",
                    self.serial
                )))
            }
            State::Consumed => Err(RpcError::ProtocolViolation(format!(
                "reply to call {} was already taken",
                self.serial
            ))),
        }
    }

    /// Stop waiting for the reply.
    pub fn cancel(mut self) -> RpcError {
        self.state = State::Consumed;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        RpcError::Cancelled
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Waiting(_) => "waiting",
            State::Resolved(_) => "resolved",
            State::Consumed => "consumed",
        };
        f.debug_struct("PendingCall")
            .field("serial", &self.serial)
            .field("timeout", &self.timeout)
            .field("state", &state)
            .finish()
    }
}
