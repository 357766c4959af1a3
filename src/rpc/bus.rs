//! Bus connection and the `Bus` seam used by the request cycle.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, trace};
use zbus::fdo::{DBusProxy, ReleaseNameReply, RequestNameReply};
use zbus::message::Type as MessageType;
use zbus::names::WellKnownName;
use zbus::{connection::Builder, Connection, MessageStream};

use super::call::{CallTimeout, MethodCall};
use super::error::{BusError, RpcError, DISCONNECTED_ERROR_NAME};
use super::pending::PendingCall;
use super::registrar::Ownership;

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The login session bus.
    #[default]
    Session,
    /// The system-wide bus.
    System,
    /// The bus that activated this process, if any.
    Starter,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "session",
            Self::System => "system",
            Self::Starter => "starter",
        })
    }
}

impl BusKind {
    /// Connection builder for this bus, ready for `build()`.
    pub fn builder(self) -> zbus::Result<Builder<'static>> {
        match self {
            Self::Session => Builder::session(),
            Self::System => Builder::system(),
            Self::Starter => starter_builder(),
        }
    }
}

/// Resolve the starter bus from the environment set by the bus daemon.
fn starter_builder() -> zbus::Result<Builder<'static>> {
    if let Ok(address) = std::env::var("DBUS_STARTER_ADDRESS") {
        return Builder::address(address.as_str());
    }
    match std::env::var("DBUS_STARTER_BUS_TYPE").as_deref() {
        Ok("session") => Builder::session(),
        Ok("system") => Builder::system(),
        _ => Err(zbus::Error::Address(
            "not activated by a bus: DBUS_STARTER_ADDRESS is not set".into(),
        )),
    }
}

/// Operations the request cycle needs from a bus session.
///
/// Access from concurrent request cycles must be serialized by the caller.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Ask the bus for a well-known name, allowing the request to queue.
    async fn request_name(&self, name: &str) -> Result<Ownership, RpcError>;

    /// Give up a well-known name. Returns `false` if it was not ours.
    async fn release_name(&self, name: &str) -> Result<bool, RpcError>;

    /// Send a method call and return the handle for its reply.
    async fn send(&self, call: MethodCall, timeout: CallTimeout)
        -> Result<PendingCall, RpcError>;

    /// Wait until every queued outgoing message has been written.
    async fn flush(&self) -> Result<(), RpcError>;
}

/// A live bus session backed by zbus.
pub struct ZbusBus {
    connection: Connection,
    dbus: DBusProxy<'static>,
}

impl ZbusBus {
    /// Connect to the bus and register as a peer. No retry.
    pub async fn connect(kind: BusKind) -> Result<Self, RpcError> {
        let connection = kind
            .builder()
            .map_err(|e| RpcError::Connection(e.into()))?
            .build()
            .await
            .map_err(|e| RpcError::Connection(e.into()))?;
        Self::from_connection(connection, kind).await
    }

    /// Wrap an already established connection.
    pub async fn from_connection(connection: Connection, kind: BusKind) -> Result<Self, RpcError> {
        let dbus = DBusProxy::new(&connection)
            .await
            .map_err(|e| RpcError::Connection(e.into()))?;

        info!(
            "Connected to {} bus as {}",
            kind,
            connection
                .unique_name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<anonymous>".into())
        );

        Ok(Self { connection, dbus })
    }

    /// Get a reference to the connection for advanced usage.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Fails once zbus has seen the socket close. A message stream opened
    /// after that would never yield the reply.
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.connection.is_closed() {
            return Err(BusError::new(
                DISCONNECTED_ERROR_NAME,
                "connection to the bus is closed",
            ));
        }
        Ok(())
    }
}

fn well_known(name: &str) -> Result<WellKnownName<'_>, RpcError> {
    WellKnownName::try_from(name).map_err(|e| {
        RpcError::NameRequest(BusError::new(
            "org.freedesktop.DBus.Error.InvalidArgs",
            format!("invalid bus name '{}': {}", name, e),
        ))
    })
}

#[async_trait]
impl Bus for ZbusBus {
    async fn request_name(&self, name: &str) -> Result<Ownership, RpcError> {
        self.ensure_open().map_err(RpcError::NameRequest)?;
        let reply = self
            .dbus
            .request_name(well_known(name)?, Default::default())
            .await
            .map_err(|e| RpcError::NameRequest(e.into()))?;

        debug!("RequestName({}) -> {:?}", name, reply);
        Ok(match reply {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {
                Ownership::PrimaryOwner
            }
            RequestNameReply::InQueue | RequestNameReply::Exists => Ownership::Queued,
        })
    }

    async fn release_name(&self, name: &str) -> Result<bool, RpcError> {
        let name = WellKnownName::try_from(name).map_err(|e| {
            RpcError::Release(BusError::new(
                "org.freedesktop.DBus.Error.InvalidArgs",
                e.to_string(),
            ))
        })?;
        let reply = self
            .dbus
            .release_name(name.clone())
            .await
            .map_err(|e| RpcError::Release(e.into()))?;

        debug!("ReleaseName({}) -> {:?}", name, reply);
        Ok(matches!(reply, ReleaseNameReply::Released))
    }

    async fn send(
        &self,
        call: MethodCall,
        timeout: CallTimeout,
    ) -> Result<PendingCall, RpcError> {
        self.ensure_open().map_err(RpcError::Send)?;
        let message = call.into_message()?;
        let serial = message.primary_header().serial_num();

        // Subscribe before sending so the reply cannot slip past.
        let mut replies = MessageStream::from(&self.connection);

        self.connection
            .send(&message)
            .await
            .map_err(|e| RpcError::Send(e.into()))?;
        trace!(serial = serial.get(), "method call sent");

        let (pending, reply_tx) = PendingCall::channel(serial.get(), timeout);
        let listener = tokio::spawn(async move {
            while let Some(incoming) = replies.next().await {
                let message = match incoming {
                    Ok(message) => message,
                    Err(e) => {
                        let _ = reply_tx.send(Err(e.into()));
                        return;
                    }
                };
                let is_reply = matches!(
                    message.message_type(),
                    MessageType::MethodReturn | MessageType::Error
                );
                if is_reply && message.header().reply_serial() == Some(serial) {
                    let _ = reply_tx.send(Ok(message));
                    return;
                }
            }
            // Stream ended: the connection is gone and reply_tx drops here.
        });

        Ok(pending.with_listener(listener))
    }

    async fn flush(&self) -> Result<(), RpcError> {
        // zbus writes the whole message to the socket before `send` resolves.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_kind_parse() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: BusKind,
        }

        let w: Wrapper = toml::from_str(r#"kind = "system""#).unwrap();
        assert_eq!(w.kind, BusKind::System);
        let w: Wrapper = toml::from_str(r#"kind = "starter""#).unwrap();
        assert_eq!(w.kind, BusKind::Starter);
        assert!(toml::from_str::<Wrapper>(r#"kind = "user""#).is_err());
    }

    #[test]
    fn test_bus_kind_display() {
        assert_eq!(BusKind::Session.to_string(), "session");
        assert_eq!(BusKind::default(), BusKind::Session);
    }

    #[test]
    fn test_well_known_rejects_unique_names() {
        assert!(well_known("org.addbus.AddClient").is_ok());
        assert!(matches!(
            well_known(":1.42"),
            Err(RpcError::NameRequest(_))
        ));
    }
}
