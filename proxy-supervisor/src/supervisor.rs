use crate::proxy::{Aborted, Epoch, Proxy, ProxyConfig, OUT_OF_MEMORY};
use ahash::AHashMap as HashMap;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tracing::{debug, error, info, warn};

/// Pending configuration updates admitted while the loop is busy.
const CONFIG_BUFFER: usize = 1;

/// In-flight exit notifications; bounds the number of epochs that can
/// report between loop iterations.
const STATUS_BUFFER: usize = 8;

/// Drives the epoch protocol over a [`Proxy`].
///
/// A single event-driven control loop reacts to configuration changes,
/// epoch exits, and shutdown. Each accepted configuration change launches
/// exactly one new epoch; old epochs exit on their own per the hot-restart
/// handshake and are aborted only on cascading failure or after the
/// shutdown drain.
pub struct Supervisor<P: Proxy> {
    proxy: Arc<P>,

    /// The most recent configuration accepted from the config channel.
    desired: Option<ProxyConfig<P::Config>>,

    /// The configuration the latest epoch was started with.
    current: Option<ProxyConfig<P::Config>>,

    /// The highest epoch ever started; `None` until the first launch.
    current_epoch: Option<Epoch>,

    /// One abort handle per live epoch. Entries are removed only when the
    /// epoch's exit is observed.
    aborts: HashMap<Epoch, AbortHandle>,

    config_rx: mpsc::Receiver<P::Config>,
    status_tx: mpsc::Sender<ExitStatus>,
    status_rx: mpsc::Receiver<ExitStatus>,

    /// Time allowed for draining before remaining epochs are aborted on
    /// shutdown.
    drain_duration: Duration,
}

struct ExitStatus {
    epoch: Epoch,
    result: anyhow::Result<()>,
}

/// Sends the abort sentinel to one epoch, at most once.
struct AbortHandle(Option<oneshot::Sender<Aborted>>);

// === impl Supervisor ===

impl<P: Proxy> Supervisor<P> {
    /// Builds a supervisor and the channel used to post configuration
    /// updates to it.
    pub fn new(proxy: P, drain_duration: Duration) -> (Self, mpsc::Sender<P::Config>) {
        let (config_tx, config_rx) = mpsc::channel(CONFIG_BUFFER);
        let (status_tx, status_rx) = mpsc::channel(STATUS_BUFFER);
        let supervisor = Self {
            proxy: Arc::new(proxy),
            desired: None,
            current: None,
            current_epoch: None,
            aborts: HashMap::new(),
            config_rx,
            status_tx,
            status_rx,
            drain_duration,
        };
        (supervisor, config_tx)
    }

    /// Runs the control loop until every epoch has exited or `shutdown`
    /// fires. Shutdown applies a drain configuration, sleeps for the drain
    /// duration, then aborts whatever is still running.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) {
        info!("Starting proxy supervisor");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(config) = self.config_rx.recv() => self.on_config(config),

                Some(status) = self.status_rx.recv() => {
                    if self.on_exit(status) {
                        return;
                    }
                }

                _ = &mut shutdown => {
                    self.terminate().await;
                    info!("Proxy supervisor terminated");
                    return;
                }
            }
        }
    }

    fn on_config(&mut self, config: P::Config) {
        let desired = ProxyConfig::Serve(config);
        if self.desired.as_ref() == Some(&desired) {
            debug!("Desired configuration is unchanged");
            return;
        }

        info!("Received new configuration");
        self.desired = Some(desired);
        self.reconcile();
    }

    /// Launches a new epoch when the desired configuration differs from the
    /// one the latest epoch runs. The new epoch is exactly one greater than
    /// the highest epoch ever started, as the hot-restart protocol
    /// requires.
    fn reconcile(&mut self) {
        if self.desired == self.current {
            debug!("Desired configuration is already applied");
            return;
        }
        let Some(config) = self.desired.clone() else {
            return;
        };

        let epoch = self.current_epoch.map_or(0, |e| e + 1);
        self.current_epoch = Some(epoch);

        let (abort_tx, abort_rx) = oneshot::channel();
        self.aborts.insert(epoch, AbortHandle(Some(abort_tx)));
        self.current = self.desired.clone();

        let proxy = self.proxy.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            info!(epoch, "Epoch starting");
            let result = proxy.run(config, epoch, abort_rx).await;
            let _ = status_tx.send(ExitStatus { epoch, result }).await;
        });
    }

    /// Observes one epoch's exit. Returns true once no epochs remain and
    /// the loop should stop.
    fn on_exit(&mut self, ExitStatus { epoch, result }: ExitStatus) -> bool {
        self.aborts.remove(&epoch);

        match result {
            Ok(()) => info!(epoch, "Epoch exited normally"),
            Err(error) if error.is::<Aborted>() => warn!(epoch, "Epoch aborted"),
            Err(error) => {
                if error.to_string() == OUT_OF_MEMORY {
                    warn!(
                        epoch,
                        "Proxy may have been out-of-memory killed; check memory usage and limits"
                    );
                }
                error!(epoch, %error, "Epoch exited with error");
            }
        }

        self.proxy.cleanup(epoch);

        // The newest epoch dying means the fleet cannot roll forward;
        // cascade the failure to every older epoch.
        if Some(epoch) == self.current_epoch {
            info!("Latest epoch exited; aborting all epochs");
            self.abort_all();
        }

        if self.aborts.is_empty() {
            info!("All epochs exited");
            true
        } else {
            debug!(live = self.aborts.len(), "Waiting for epochs to exit");
            false
        }
    }

    async fn terminate(&mut self) {
        info!("Draining proxy");
        self.desired = Some(ProxyConfig::Drain);
        self.reconcile();

        info!(duration = ?self.drain_duration, "Graceful drain started");
        time::sleep(self.drain_duration).await;

        info!("Drain complete; aborting remaining epochs");
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for (epoch, handle) in self.aborts.iter_mut() {
            warn!(epoch = *epoch, "Aborting epoch");
            handle.abort();
        }
    }
}

// === impl AbortHandle ===

impl AbortHandle {
    fn abort(&mut self) {
        if let Some(tx) = self.0.take() {
            // The receiver only disappears once the run returns; a failed
            // send means the epoch is already exiting.
            let _ = tx.send(Aborted);
        }
    }
}
