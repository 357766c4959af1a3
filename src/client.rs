//! Request cycles against the adder service.
//!
//! Each cycle:
//! 1. Acquires the client's well-known name (backing off while queued)
//! 2. Builds and sends the `add_numbers` call
//! 3. Blocks until the reply arrives or the timeout expires
//! 4. Decodes the single string result
//! 5. Releases the name, whether or not the call succeeded

use crate::config::{Config, ConfigError};
use crate::rpc::{extract, report, Bus, CallTimeout, MethodCall, NameRegistrar, RpcError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Address of the remote method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub method: String,
}

impl From<&crate::config::ServiceConfig> for ServiceTarget {
    fn from(service: &crate::config::ServiceConfig) -> Self {
        Self {
            destination: service.destination.clone(),
            path: service.path.clone(),
            interface: service.interface.clone(),
            method: service.method.clone(),
        }
    }
}

/// How [`RpcClient::run`] treats failures and prompting.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop at the first failed cycle
    pub fail_fast: bool,
    /// Written before each line is read
    pub prompt: Option<String>,
}

/// Outcome counts of a [`RpcClient::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs request cycles over one bus session.
pub struct RpcClient<B: Bus> {
    bus: B,
    registrar: NameRegistrar,
    target: ServiceTarget,
    timeout: CallTimeout,
}

impl<B: Bus> RpcClient<B> {
    pub fn new(
        bus: B,
        registrar: NameRegistrar,
        target: ServiceTarget,
        timeout: CallTimeout,
    ) -> Self {
        Self {
            bus,
            registrar,
            target,
            timeout,
        }
    }

    /// Build a client from the identity, service and call sections.
    pub fn from_config(bus: B, config: &Config) -> Result<Self, ConfigError> {
        let registrar = NameRegistrar::new(config.identity.name.clone())
            .with_backoff(config.identity.backoff())
            .with_max_attempts(config.identity.max_attempts());
        Ok(Self::new(
            bus,
            registrar,
            ServiceTarget::from(&config.service),
            config.call.timeout()?,
        ))
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn registrar(&self) -> &NameRegistrar {
        &self.registrar
    }

    pub fn timeout(&self) -> CallTimeout {
        self.timeout
    }

    /// Run one request cycle with `input` as the sole argument.
    pub async fn call(&mut self, input: &str) -> Result<String, RpcError> {
        let retries = self.registrar.acquire(&self.bus).await?;
        if retries > 0 {
            info!(
                "Acquired {} after {} retries",
                self.registrar.name(),
                retries
            );
        }

        let result = self.dispatch(input).await;

        // The result is already in hand, so a failed release only warns.
        match self.registrar.release(&self.bus).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "{} was no longer owned when releasing it",
                self.registrar.name()
            ),
            Err(e) => warn!("{}", report(&e)),
        }

        result
    }

    async fn dispatch(&self, input: &str) -> Result<String, RpcError> {
        let mut call = MethodCall::new(
            &self.target.destination,
            &self.target.path,
            &self.target.interface,
            &self.target.method,
        )?;
        call.append_arg(input.to_string())?;

        let mut pending = self.bus.send(call, self.timeout).await?;
        self.bus.flush().await?;
        debug!(
            serial = pending.serial(),
            timeout = %self.timeout,
            "Waiting for {}.{}",
            self.target.interface,
            self.target.method
        );

        pending.block().await?;
        let reply = pending.steal_reply()?;
        extract::<String>(&reply)
    }

    /// Run one cycle per non-empty input line, writing each result on its
    /// own line to `output`.
    ///
    /// Failures go to stderr as `"<operation>: <message>"`. A lost connection
    /// always ends the run; other failures end it only with `fail_fast`.
    pub async fn run<R, W>(
        &mut self,
        input: R,
        output: &mut W,
        options: &RunOptions,
    ) -> Result<RunSummary, ClientError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = RunSummary::default();
        let mut lines = input.lines();

        loop {
            if let Some(prompt) = &options.prompt {
                output.write_all(prompt.as_bytes()).await?;
                output.flush().await?;
            }

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            match self.call(line).await {
                Ok(value) => {
                    output.write_all(value.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                    summary.succeeded += 1;
                }
                Err(e) => {
                    eprintln!("{}", report(&e));
                    summary.failed += 1;
                    if options.fail_fast || e.is_connection_lost() {
                        return Err(e.into());
                    }
                }
            }
        }

        debug!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Input exhausted"
        );
        Ok(summary)
    }
}
