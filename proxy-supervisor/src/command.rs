use crate::proxy::{AbortRx, Epoch, Proxy, ProxyConfig, OUT_OF_MEMORY};
use anyhow::Context;
use std::{path::PathBuf, process::Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs the proxy binary as a child process, one per epoch.
///
/// Each epoch's configuration is written to its own JSON file under
/// `config_dir`; the binary receives `--restart-epoch` and `--config` and
/// carries out the hot-restart handshake itself. An abort kills the child;
/// cleanup removes the epoch's configuration file.
pub struct CommandProxy {
    binary: PathBuf,
    config_dir: PathBuf,
}

// === impl CommandProxy ===

impl CommandProxy {
    pub fn new(binary: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_dir: config_dir.into(),
        }
    }

    fn config_path(&self, epoch: Epoch) -> PathBuf {
        self.config_dir.join(format!("epoch-{epoch}.json"))
    }
}

#[async_trait::async_trait]
impl Proxy for CommandProxy {
    type Config = serde_json::Value;

    async fn run(
        &self,
        config: ProxyConfig<serde_json::Value>,
        epoch: Epoch,
        mut abort: AbortRx,
    ) -> anyhow::Result<()> {
        let path = self.config_path(epoch);
        let doc = serde_json::to_vec_pretty(&config).context("serializing epoch configuration")?;
        tokio::fs::write(&path, doc)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        let mut child = Command::new(&self.binary)
            .arg("--restart-epoch")
            .arg(epoch.to_string())
            .arg("--config")
            .arg(&path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawning proxy")?;
        info!(epoch, pid = child.id(), "Proxy started");

        tokio::select! {
            status = child.wait() => exit_result(status.context("waiting on proxy")?),

            res = &mut abort => match res {
                Ok(aborted) => {
                    warn!(epoch, "Abort requested; stopping proxy");
                    child.start_kill().ok();
                    let _ = child.wait().await;
                    Err(aborted.into())
                }
                // The supervisor is gone without requesting an abort; wait
                // out the process as usual.
                Err(_) => exit_result(child.wait().await.context("waiting on proxy")?),
            },
        }
    }

    fn cleanup(&self, epoch: Epoch) {
        let path = self.config_path(epoch);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(epoch, "Removed epoch configuration"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(epoch, %error, "Failed to remove epoch configuration"),
        }
    }
}

fn exit_result(status: std::process::ExitStatus) -> anyhow::Result<()> {
    if status.success() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGKILL is how the kernel's OOM killer reaps a process; surface
        // the signature the supervisor recognizes.
        if status.signal() == Some(9) {
            anyhow::bail!("{OUT_OF_MEMORY}");
        }
    }

    anyhow::bail!("{status}")
}
