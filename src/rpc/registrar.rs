//! Well-known name acquisition with contention backoff.

use std::time::Duration;
use tracing::{debug, warn};

use super::bus::Bus;
use super::error::RpcError;

/// Outcome of a single name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// This connection is now the primary owner.
    PrimaryOwner,
    /// Another connection holds the name; ours is waiting in its queue.
    Queued,
}

/// Acquires and releases one well-known name for request cycles.
///
/// While the name is queued the registrar sleeps `backoff` and asks again.
/// With `max_attempts` unset it keeps asking forever, relying on the
/// current holder to let go eventually.
#[derive(Debug, Clone)]
pub struct NameRegistrar {
    name: String,
    backoff: Duration,
    max_attempts: Option<u32>,
    owned: bool,
}

impl NameRegistrar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backoff: Duration::from_secs(1),
            max_attempts: None,
            owned: false,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Give up after this many queued answers. `None` retries forever.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|n| *n > 0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Become primary owner of the name.
    ///
    /// Returns how many backoff retries it took. Bus failures are returned
    /// at once; only contention is retried.
    pub async fn acquire<B: Bus + ?Sized>(&mut self, bus: &B) -> Result<u32, RpcError> {
        if self.owned {
            return Err(RpcError::NameAlreadyHeld(self.name.clone()));
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match bus.request_name(&self.name).await? {
                Ownership::PrimaryOwner => {
                    self.owned = true;
                    debug!(name = %self.name, attempts, "Acquired bus name");
                    return Ok(attempts - 1);
                }
                Ownership::Queued => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        // Leave the queue so a later release elsewhere does not
                        // hand us the name behind the caller's back.
                        if let Err(e) = bus.release_name(&self.name).await {
                            warn!("Failed to withdraw queued request for {}: {}", self.name, e);
                        }
                        return Err(RpcError::NameUnavailable {
                            name: self.name.clone(),
                            attempts,
                        });
                    }
                    warn!("Waiting for the bus ... ({} is taken)", self.name);
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    /// Release the name after a cycle. Returns `false` if the bus says we
    /// did not own it.
    pub async fn release<B: Bus + ?Sized>(&mut self, bus: &B) -> Result<bool, RpcError> {
        // Whatever the bus answers, this registrar no longer claims the name.
        self.owned = false;
        let released = bus.release_name(&self.name).await?;
        debug!(name = %self.name, released, "Released bus name");
        Ok(released)
    }
}
