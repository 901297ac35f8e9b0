use serde::Serialize;
use std::fmt;
use tokio::sync::oneshot;

/// Exit-status message a process-exit wrapper produces for an
/// out-of-memory kill.
pub(crate) const OUT_OF_MEMORY: &str = "signal: killed";

/// One generation of the proxy process. The hot-restart handshake requires
/// each launch to use exactly `max(running epochs) + 1`; the first epoch
/// is 0.
pub type Epoch = u32;

/// Signals an epoch to shut down. The proxy decides when to exit; the
/// supervisor never kills it directly.
pub type AbortRx = oneshot::Receiver<Aborted>;

/// The distinguished abort sentinel: a run that ends because the
/// supervisor requested it returns this as its error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("epoch aborted")]
pub struct Aborted;

/// The configuration an epoch is launched with.
///
/// `Drain` instructs the proxy to stop accepting connections and complete
/// the outstanding ones; it is applied through the same reconcile path as
/// any other configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyConfig<C> {
    Serve(C),
    Drain,
}

/// Launches proxy processes and cleans up after them.
#[async_trait::async_trait]
pub trait Proxy: Send + Sync + 'static {
    /// Configurations are compared structurally to decide whether a change
    /// requires a new epoch.
    type Config: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Starts the proxy at `epoch` and blocks until the process exits.
    /// Implementations must observe `abort` and initiate shutdown when it
    /// fires, returning [`Aborted`] as the error.
    async fn run(
        &self,
        config: ProxyConfig<Self::Config>,
        epoch: Epoch,
        abort: AbortRx,
    ) -> anyhow::Result<()>;

    /// Releases an epoch's resources. Called exactly once per completed
    /// run, synchronously on the control loop: must not block.
    fn cleanup(&self, epoch: Epoch);
}
