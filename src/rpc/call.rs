//! Method-call construction and call timeouts.

use std::fmt;
use std::time::Duration;
use zbus::names::{BusName, InterfaceName, MemberName};
use zbus::zvariant::{ObjectPath, StructureBuilder, Value};
use zbus::Message;

use super::error::RpcError;

/// Bus default reply timeout, matching libdbus.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(25_000);

/// Timeout sentinel for "use the bus default".
pub const TIMEOUT_USE_DEFAULT: i32 = -1;

/// Timeout sentinel for "wait forever".
pub const TIMEOUT_INFINITE: i32 = i32::MAX;

/// How long to wait for the reply to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallTimeout {
    /// Bus default ([`DEFAULT_TIMEOUT`]).
    #[default]
    Default,
    /// Explicit bound. Zero expires immediately.
    Millis(u32),
    /// No bound at all.
    Infinite,
}

impl CallTimeout {
    /// Map the libdbus-style millisecond value onto a timeout.
    ///
    /// Returns `None` for negative values other than [`TIMEOUT_USE_DEFAULT`].
    pub fn from_millis(ms: i32) -> Option<Self> {
        match ms {
            TIMEOUT_USE_DEFAULT => Some(Self::Default),
            TIMEOUT_INFINITE => Some(Self::Infinite),
            ms if ms >= 0 => Some(Self::Millis(ms as u32)),
            _ => None,
        }
    }

    /// The wait bound, or `None` when infinite.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Default => Some(DEFAULT_TIMEOUT),
            Self::Millis(ms) => Some(Duration::from_millis(u64::from(*ms))),
            Self::Infinite => None,
        }
    }
}

impl fmt::Display for CallTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default ({:?})", DEFAULT_TIMEOUT),
            Self::Millis(ms) => write!(f, "{}ms", ms),
            Self::Infinite => f.write_str("infinite"),
        }
    }
}

/// An addressed method call and its ordered argument list.
///
/// All four address fields are validated as D-Bus names on construction.
#[derive(Debug)]
pub struct MethodCall {
    destination: String,
    path: String,
    interface: String,
    member: String,
    args: Vec<Value<'static>>,
}

impl MethodCall {
    pub fn new(
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<Self, RpcError> {
        BusName::try_from(destination).map_err(|e| {
            RpcError::MessageConstruction(format!("invalid destination '{}': {}", destination, e))
        })?;
        ObjectPath::try_from(path).map_err(|e| {
            RpcError::MessageConstruction(format!("invalid object path '{}': {}", path, e))
        })?;
        InterfaceName::try_from(interface).map_err(|e| {
            RpcError::MessageConstruction(format!("invalid interface '{}': {}", interface, e))
        })?;
        MemberName::try_from(member).map_err(|e| {
            RpcError::MessageConstruction(format!("invalid method '{}': {}", member, e))
        })?;

        Ok(Self {
            destination: destination.to_string(),
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args: Vec::new(),
        })
    }

    /// Append one typed argument after the ones already present.
    pub fn append_arg<V>(&mut self, value: V) -> Result<(), RpcError>
    where
        V: Into<Value<'static>>,
    {
        let value = value.into();
        if let Value::Str(s) = &value {
            if s.as_str().contains('\0') {
                return Err(RpcError::Serialization(
                    "string arguments cannot contain NUL bytes".into(),
                ));
            }
        }
        self.args.push(value);
        Ok(())
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn args(&self) -> &[Value<'static>] {
        &self.args
    }

    /// Serialize into a wire message. The message serial is assigned here.
    pub fn into_message(self) -> Result<Message, RpcError> {
        let Self {
            destination,
            path,
            interface,
            member,
            args,
        } = self;

        let builder = Message::method_call(path.as_str(), member.as_str())
            .and_then(|b| b.destination(destination.as_str()))
            .and_then(|b| b.interface(interface.as_str()))
            .map_err(|e| RpcError::MessageConstruction(e.to_string()))?;

        let message = if args.is_empty() {
            builder.build(&())
        } else {
            let body = args
                .into_iter()
                .fold(StructureBuilder::new(), |body, arg| body.append_field(arg))
                .build()
                .map_err(|e| RpcError::Serialization(e.to_string()))?;
            builder.build(&body)
        };

        message.map_err(|e| RpcError::Serialization(e.to_string()))
    }
}
