//! Error taxonomy for the request cycle and the uniform error reporter.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use zbus::message::Type as MessageType;
use zbus::Message;

/// Error name used when zbus fails without a D-Bus error name of its own.
pub const ZBUS_ERROR_NAME: &str = "org.freedesktop.zbus.Error";

/// Error name used when the connection goes away under a pending call.
pub const DISCONNECTED_ERROR_NAME: &str = "org.freedesktop.DBus.Error.Disconnected";

/// A bus-level failure: the D-Bus error name plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub name: String,
    pub message: String,
}

impl BusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The connection closed before the operation could complete.
    pub fn disconnected() -> Self {
        Self::new(
            DISCONNECTED_ERROR_NAME,
            "connection closed before a reply arrived",
        )
    }

    /// Build from an ERROR reply message.
    ///
    /// The message text is the first string argument, as the bus daemon and
    /// most services send it.
    pub fn from_error_reply(reply: &Message) -> Self {
        let header = reply.header();
        let name = header
            .error_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| ZBUS_ERROR_NAME.to_string());
        let message = if reply.message_type() == MessageType::Error {
            reply.body().deserialize::<String>().unwrap_or_default()
        } else {
            String::new()
        };
        Self { name, message }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for BusError {}

/// Socket errors zbus reports once the peer or the bus daemon has gone away.
fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, description, _) => {
                Self::new(name.to_string(), description.unwrap_or_default())
            }
            zbus::Error::InputOutput(io) if is_disconnect(&io) => {
                Self::new(DISCONNECTED_ERROR_NAME, format!("I/O error: {}", io))
            }
            other => Self::new(ZBUS_ERROR_NAME, other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for BusError {
    fn from(err: zbus::fdo::Error) -> Self {
        match err {
            zbus::fdo::Error::ZBus(inner) => inner.into(),
            other => Self::new("org.freedesktop.DBus.Error", other.to_string()),
        }
    }
}

/// Everything that can end a request cycle.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("{0}")]
    Connection(BusError),

    #[error("{0}")]
    NameRequest(BusError),

    #[error("name {name} still queued after {attempts} attempts")]
    NameUnavailable { name: String, attempts: u32 },

    #[error("name {0} is already owned by this client")]
    NameAlreadyHeld(String),

    #[error("cannot build method call: {0}")]
    MessageConstruction(String),

    #[error("cannot serialize argument: {0}")]
    Serialization(String),

    #[error("{0}")]
    Send(BusError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("call was cancelled")]
    Cancelled,

    #[error("{0}")]
    ProtocolViolation(String),

    #[error("reply arguments do not match: expected `{expected}`, got `{actual}`")]
    ArgumentMismatch { expected: String, actual: String },

    #[error("{0}")]
    Remote(BusError),

    #[error("{0}")]
    Release(BusError),
}

impl RpcError {
    /// Name of the operation that failed, used as the report prefix.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connect",
            Self::NameRequest(_) | Self::NameUnavailable { .. } | Self::NameAlreadyHeld(_) => {
                "request_name"
            }
            Self::MessageConstruction(_) => "new_method_call",
            Self::Serialization(_) => "append_arg",
            Self::Send(_) => "send_with_reply",
            Self::Timeout(_) | Self::Cancelled => "pending_call_block",
            Self::ProtocolViolation(_) => "pending_call_steal_reply",
            Self::ArgumentMismatch { .. } => "get_args",
            Self::Remote(_) => "method_reply",
            Self::Release(_) => "release_name",
        }
    }

    /// The bus error carried by this failure, if it came from the bus.
    pub fn bus_error(&self) -> Option<&BusError> {
        match self {
            Self::Connection(e)
            | Self::NameRequest(e)
            | Self::Send(e)
            | Self::Remote(e)
            | Self::Release(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the bus session itself is gone, so later cycles cannot succeed.
    ///
    /// Any step of the cycle can be the first to notice, so a disconnect is
    /// recognised by its error name whichever operation reported it.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            other => other
                .bus_error()
                .is_some_and(|e| e.name == DISCONNECTED_ERROR_NAME),
        }
    }
}

/// Format a failure as `"<operation>: <message>"`.
///
/// The caller decides where the line goes; the D-Bus error name, which the
/// line leaves out, is logged here.
pub fn report(err: &RpcError) -> String {
    let line = format!("{}: {}", err.operation(), err);
    if let Some(bus) = err.bus_error() {
        debug!(error_name = %bus.name, "{}", line);
    }
    line
}
