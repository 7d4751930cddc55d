//! Relay Launchers
//!
//! A launcher is the proxy's locator for the relay execution context: given
//! the relay's end of a fresh channel, it starts a relay somewhere and hands
//! back a [`RelayContext`] that can forcibly discard it.

use tokio::task::AbortHandle;

use super::in_process::RelayEndpoint;
use crate::client::NetworkClient;
use crate::error::BridgeError;
use crate::relay::Relay;

/// Starts relay contexts on demand
///
/// Called once when the proxy is constructed, and again whenever `connect`
/// follows a relay that was declared dead.
pub trait RelayLauncher: Send + Sync + 'static {
    /// Start a relay that serves the given endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if no context could be started.
    fn launch(&self, endpoint: RelayEndpoint) -> Result<RelayContext, BridgeError>;
}

/// Handle to a running relay context
///
/// Dropping the handle terminates the context.
#[derive(Debug)]
pub struct RelayContext {
    abort: AbortHandle,
}

impl RelayContext {
    /// Wrap the abort handle of the task hosting a relay
    #[must_use]
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Forcibly discard the relay context
    pub fn terminate(self) {
        drop(self);
    }

    /// Whether the hosting task has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl Drop for RelayContext {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Launches each relay as a task on the current tokio runtime
///
/// A fresh network client is built from `factory` for every launch, so a
/// relaunched relay never inherits state from the one it replaces.
pub struct TaskLauncher<F> {
    factory: F,
}

impl<F> TaskLauncher<F> {
    /// Create a launcher from a network-client factory
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, C> RelayLauncher for TaskLauncher<F>
where
    F: Fn() -> C + Send + Sync + 'static,
    C: NetworkClient,
{
    fn launch(&self, endpoint: RelayEndpoint) -> Result<RelayContext, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;

        let RelayEndpoint { sender, receiver } = endpoint;
        let relay = Relay::new((self.factory)(), sender);
        let task = runtime.spawn(relay.run(receiver));

        tracing::debug!("Relay context launched");
        Ok(RelayContext::new(task.abort_handle()))
    }
}

impl<F> std::fmt::Debug for TaskLauncher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher").finish_non_exhaustive()
    }
}
