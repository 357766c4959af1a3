//! D-Bus service setup for the adder.

use tracing::{info, warn};
use zbus::names::WellKnownName;
use zbus::zvariant::ObjectPath;
use zbus::{connection::Builder, Connection, Result};

use super::interface::AdderInterface;
use crate::config::ServiceConfig;
use crate::rpc::BusKind;

/// Well-known bus name for the adder service.
pub const SERVICE_NAME: &str = "org.addbus.AddServer";

/// Object path for the adder interface.
pub const OBJECT_PATH: &str = "/org/addbus/Adder";

/// Interface name the adder is served under.
pub const INTERFACE_NAME: &str = "org.addbus.Adder1";

/// The one method of the interface.
pub const METHOD_NAME: &str = "add_numbers";

/// Register the adder at `service.path` on a connection being built.
pub fn serve_adder(
    builder: Builder<'static>,
    service: &ServiceConfig,
) -> Result<Builder<'static>> {
    let path = ObjectPath::try_from(service.path.clone())?;
    builder.serve_at(path, AdderInterface)
}

/// D-Bus service handle.
///
/// Keeps the connection alive; the service stops when this is dropped.
pub struct AdderService {
    connection: Connection,
}

impl AdderService {
    /// Start the service.
    ///
    /// Registers the adder interface at `service.path` on the given bus and
    /// requests `service.destination` as its well-known name. The interface
    /// and method names are fixed by [`AdderInterface`]; configured values
    /// that differ only get a warning, since no client could reach them.
    pub async fn start(kind: BusKind, service: &ServiceConfig) -> Result<Self> {
        if service.interface != INTERFACE_NAME || service.method != METHOD_NAME {
            warn!(
                "The adder is served as {}.{}, not the configured {}.{}",
                INTERFACE_NAME, METHOD_NAME, service.interface, service.method
            );
        }

        let name = WellKnownName::try_from(service.destination.clone())?;
        let builder = kind.builder()?.name(name)?;
        let connection = serve_adder(builder, service)?.build().await?;

        info!(
            "D-Bus service started: {} at {} on the {} bus",
            service.destination, service.path, kind
        );

        Ok(Self { connection })
    }

    /// Get a reference to the connection for advanced usage.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
