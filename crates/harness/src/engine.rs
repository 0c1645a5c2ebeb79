//! The consensus engine as an opaque child process.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cluster::{EngineConfig, NodeId, PeerList, PortSet};
use crate::error::HarnessError;
use crate::output::OutputBuffer;

/// How long to wait for the output pipes to drain once the engine exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

impl EngineConfig {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(&self.base_args).stdin(Stdio::null());
        command
    }

    /// Arguments of the long-running `node` subcommand.
    pub fn node_args(&self, home: &Path, ports: &PortSet, peers: &PeerList) -> Vec<String> {
        vec![
            "node".to_string(),
            "--home".to_string(),
            home.to_string_lossy().to_string(),
            "--proxy_app".to_string(),
            tcp_url(self, ports.proxy),
            "--p2p.laddr".to_string(),
            tcp_url(self, ports.p2p),
            "--rpc.laddr".to_string(),
            tcp_url(self, ports.rpc),
            format!("--p2p.seeds={peers}"),
        ]
    }

    /// Run `init --home <home>` to completion.
    pub(crate) async fn init(&self, node: NodeId, home: &Path) -> Result<(), HarnessError> {
        let output = self
            .command()
            .arg("init")
            .arg("--home")
            .arg(home)
            .output()
            .await
            .map_err(|e| HarnessError::EngineInit {
                node,
                reason: format!("cannot run {}: {e}", self.binary.display()),
                output: String::new(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(HarnessError::EngineInit {
                node,
                reason: format!("init exited with {}", output.status),
                output: combined,
            });
        }
        debug!(node = %node, home = %home.display(), "consensus engine initialized");
        Ok(())
    }
}

fn tcp_url(config: &EngineConfig, port: u16) -> String {
    format!("tcp://{}", std::net::SocketAddr::new(config.host, port))
}

/// A running consensus engine whose stdout and stderr are copied into an
/// [`OutputBuffer`].
///
/// The child is killed if the handle is dropped without [`stop`](Self::stop).
#[derive(Debug)]
pub struct EngineProcess {
    node: NodeId,
    child: Child,
    output: OutputBuffer,
    pipes: Vec<JoinHandle<()>>,
}

impl EngineProcess {
    pub(crate) fn spawn(
        config: &EngineConfig,
        node: NodeId,
        args: &[String],
        output: OutputBuffer,
    ) -> Result<Self, HarnessError> {
        let mut child = config
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::EngineSpawn { node, source })?;

        let mut pipes = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pipes.push(output.capture(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            pipes.push(output.capture(stderr));
        }
        info!(node = %node, pid = ?child.id(), "consensus engine spawned");

        Ok(Self {
            node,
            child,
            output,
            pipes,
        })
    }

    /// OS process id, `None` once the exit status has been collected.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Interrupt the engine and wait for it to exit.
    ///
    /// Exit by `SIGINT` or with one of `graceful_exit_codes` is a clean stop.
    /// After `timeout` the process is killed and
    /// [`HarnessError::EngineTimeout`] is returned.
    pub(crate) async fn stop(
        mut self,
        timeout: Duration,
        graceful_exit_codes: &[i32],
    ) -> Result<(), HarnessError> {
        if let Some(pid) = self.child.id() {
            let pid = i32::try_from(pid).map_err(|_| HarnessError::EngineSignal {
                node: self.node,
                reason: format!("pid {pid} out of range"),
            })?;
            signal::kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|errno| {
                HarnessError::EngineSignal {
                    node: self.node,
                    reason: errno.to_string(),
                }
            })?;
        }

        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.drain().await;
                return Err(unknown_exit(self.node, &e, self.output.contents()));
            }
            Err(_) => {
                warn!(node = %self.node, ?timeout, "consensus engine ignored interrupt, killing");
                if let Err(e) = self.child.kill().await {
                    return Err(HarnessError::EngineSignal {
                        node: self.node,
                        reason: format!("kill after {timeout:?} failed: {e}"),
                    });
                }
                self.drain().await;
                return Err(HarnessError::EngineTimeout {
                    node: self.node,
                    timeout,
                    output: self.output.contents(),
                });
            }
        };
        self.drain().await;

        if exited_gracefully(status, graceful_exit_codes) {
            info!(node = %self.node, %status, "consensus engine stopped");
            Ok(())
        } else {
            Err(HarnessError::EngineExit {
                node: self.node,
                status: status.to_string(),
                output: self.output.contents(),
            })
        }
    }

    async fn drain(&mut self) {
        for pipe in self.pipes.drain(..) {
            let abort = pipe.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, pipe).await.is_err() {
                abort.abort();
            }
        }
    }
}

/// The engine's exit status could not be collected.
fn unknown_exit(node: NodeId, error: &std::io::Error, output: String) -> HarnessError {
    HarnessError::EngineExit {
        node,
        status: format!("unknown status ({error})"),
        output,
    }
}

fn exited_gracefully(status: ExitStatus, graceful_exit_codes: &[i32]) -> bool {
    status.signal() == Some(Signal::SIGINT as i32)
        || status
            .code()
            .is_some_and(|code| graceful_exit_codes.contains(&code))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn node_args_point_the_engine_at_the_proxy() {
        let config = EngineConfig::default();
        let id = NodeId::new(1).unwrap();
        let ids = [NodeId::new(0).unwrap(), id];
        let peers = PeerList::excluding(id, &ids, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let args = config.node_args(&PathBuf::from("/data/BCNode01"), &PortSet::for_node(id), &peers);

        assert_eq!(
            args,
            vec![
                "node",
                "--home",
                "/data/BCNode01",
                "--proxy_app",
                "tcp://127.0.0.1:50001",
                "--p2p.laddr",
                "tcp://127.0.0.1:50201",
                "--rpc.laddr",
                "tcp://127.0.0.1:50101",
                "--p2p.seeds=127.0.0.1:50200",
            ]
        );
    }

    #[test]
    fn graceful_exit_statuses() {
        let codes = [0, 1];
        // Raw wait statuses: exit code in the high byte, signal in the low bits.
        assert!(exited_gracefully(ExitStatus::from_raw(0), &codes));
        assert!(exited_gracefully(ExitStatus::from_raw(1 << 8), &codes));
        assert!(exited_gracefully(ExitStatus::from_raw(Signal::SIGINT as i32), &codes));
        assert!(!exited_gracefully(ExitStatus::from_raw(2 << 8), &codes));
        assert!(!exited_gracefully(ExitStatus::from_raw(Signal::SIGKILL as i32), &codes));
        assert!(!exited_gracefully(ExitStatus::from_raw(1 << 8), &[0]));
    }

    #[test]
    fn uncollectable_status_keeps_node_and_output() {
        let node = NodeId::new(7).unwrap();
        let error = std::io::Error::other("ECHILD");
        let err = unknown_exit(node, &error, "last words\n".to_owned());

        let HarnessError::EngineExit { node: failed, status, output } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*failed, node);
        assert!(status.contains("ECHILD"), "{status}");
        assert_eq!(output, "last words\n");
        assert!(err.to_string().contains("last words"));
    }
}
