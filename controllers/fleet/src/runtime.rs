//! Container runtime access for in-namespace packet capture
//!
//! The controller resolves a container to its host pid with `crictl inspect`,
//! then runs `ip` and `tcpdump` inside that pid's network namespace through
//! `nsenter --target <pid> --net`. Only the network namespace is entered, so
//! the capture file lands on the controller's own filesystem.

use std::fmt::Debug;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControllerError;

/// How long a stopped tcpdump gets to flush before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

/// One tcpdump invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    /// Interface inside the target's network namespace
    pub interface: String,
    /// Where the pcap file is written
    pub output_path: String,
    /// Stop after this many packets
    pub packet_count: Option<u64>,
    /// Rotate output after this many million bytes
    pub file_size: Option<u64>,
}

impl CaptureCommand {
    /// tcpdump arguments; a packet count wins over a file size
    pub fn tcpdump_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.interface.clone(),
            "-w".to_string(),
            self.output_path.clone(),
        ];
        if let Some(count) = self.packet_count {
            args.push("-c".to_string());
            args.push(count.to_string());
        } else if let Some(size) = self.file_size {
            args.push("-C".to_string());
            args.push(size.to_string());
        }
        args
    }
}

/// A running capture
#[async_trait]
pub trait CaptureProcess: Debug + Send + Sync {
    /// Host pid of the capture, while known
    fn id(&self) -> Option<u32>;

    /// Stop the capture and wait for it to exit
    async fn stop(&mut self) -> Result<(), ControllerError>;
}

/// Operations the capture reconciler needs from the node
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Host pid of a container's init process
    async fn container_pid(&self, container_id: &str) -> Result<u32, ControllerError>;

    /// Whether `interface` exists in the network namespace of `pid`
    async fn interface_exists(&self, pid: u32, interface: &str) -> Result<bool, ControllerError>;

    /// Start tcpdump in the network namespace of `pid`
    async fn spawn_capture(
        &self,
        pid: u32,
        command: &CaptureCommand,
    ) -> Result<Box<dyn CaptureProcess>, ControllerError>;
}

/// `crictl` + `nsenter` backed implementation
#[derive(Debug, Clone)]
pub struct NsenterBackend {
    crictl: String,
    nsenter: String,
    tcpdump: String,
    ip: String,
}

impl NsenterBackend {
    /// Backend using the configured tool paths
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            crictl: config.crictl_path.clone(),
            nsenter: config.nsenter_path.clone(),
            tcpdump: config.tcpdump_path.clone(),
            ip: config.ip_path.clone(),
        }
    }

    fn in_net_namespace(&self, pid: u32, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.nsenter);
        cmd.args(nsenter_args(pid, program, args));
        cmd
    }
}

/// Arguments for running `program` in the network namespace of `pid`
pub fn nsenter_args(pid: u32, program: &str, args: &[String]) -> Vec<String> {
    let mut out = vec![
        "--target".to_string(),
        pid.to_string(),
        "--net".to_string(),
        "--".to_string(),
        program.to_string(),
    ];
    out.extend(args.iter().cloned());
    out
}

/// Pull `info.pid` out of `crictl inspect` output
pub fn parse_inspect_pid(output: &[u8]) -> Result<u32, ControllerError> {
    let value: Value = serde_json::from_slice(output)
        .map_err(|e| ControllerError::Runtime(format!("unreadable crictl inspect output: {e}")))?;
    let pid = value
        .pointer("/info/pid")
        .and_then(Value::as_u64)
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ControllerError::Runtime("crictl inspect reported no pid".to_string()))?;
    u32::try_from(pid).map_err(|e| ControllerError::Runtime(format!("pid {pid}: {e}")))
}

#[async_trait]
impl CaptureBackend for NsenterBackend {
    async fn container_pid(&self, container_id: &str) -> Result<u32, ControllerError> {
        let output = Command::new(&self.crictl)
            .args(["inspect", container_id])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ControllerError::Runtime(format!("running {}: {e}", self.crictl)))?;
        if !output.status.success() {
            return Err(ControllerError::Runtime(format!(
                "crictl inspect {container_id} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let pid = parse_inspect_pid(&output.stdout)?;
        debug!("Container {} has pid {}", container_id, pid);
        Ok(pid)
    }

    async fn interface_exists(&self, pid: u32, interface: &str) -> Result<bool, ControllerError> {
        let args = vec![
            "link".to_string(),
            "show".to_string(),
            "dev".to_string(),
            interface.to_string(),
        ];
        let output = self
            .in_net_namespace(pid, &self.ip, &args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ControllerError::Runtime(format!("running {}: {e}", self.nsenter)))?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("does not exist") {
            return Ok(false);
        }
        Err(ControllerError::Runtime(format!(
            "entering network namespace of pid {pid} failed with {}: {}",
            output.status,
            stderr.trim()
        )))
    }

    async fn spawn_capture(
        &self,
        pid: u32,
        command: &CaptureCommand,
    ) -> Result<Box<dyn CaptureProcess>, ControllerError> {
        if let Some(dir) = Path::new(&command.output_path).parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ControllerError::Runtime(format!("creating {}: {e}", dir.display())))?;
        }

        let child = self
            .in_net_namespace(pid, &self.tcpdump, &command.tcpdump_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControllerError::Runtime(format!("spawning tcpdump: {e}")))?;

        info!(
            "Capturing on {} in namespace of pid {} to {} (capture pid {:?})",
            command.interface,
            pid,
            command.output_path,
            child.id()
        );
        Ok(Box::new(TcpdumpProcess { child }))
    }
}

fn interrupt(pid: u32) -> Result<(), Errno> {
    let Ok(pid) = i32::try_from(pid) else {
        return Err(Errno::EINVAL);
    };
    kill(Pid::from_raw(pid), Signal::SIGINT)
}

/// tcpdump running under nsenter
#[derive(Debug)]
pub struct TcpdumpProcess {
    child: Child,
}

#[async_trait]
impl CaptureProcess for TcpdumpProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn stop(&mut self) -> Result<(), ControllerError> {
        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };

        // SIGINT lets tcpdump flush and close the pcap file
        match interrupt(pid) {
            Ok(()) => {
                if let Ok(waited) = tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
                    let status = waited.map_err(|e| ControllerError::Runtime(format!("waiting for tcpdump: {e}")))?;
                    debug!("tcpdump {} exited with {}", pid, status);
                    return Ok(());
                }
                warn!("tcpdump {} ignored SIGINT for {:?}, killing", pid, STOP_GRACE);
            }
            // Exited between the id check and the signal
            Err(Errno::ESRCH) => {
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|e| ControllerError::Runtime(format!("waiting for tcpdump: {e}")))?;
                debug!("tcpdump {} had already exited with {}", pid, status);
                return Ok(());
            }
            Err(errno) => {
                return Err(ControllerError::Runtime(format!("interrupting tcpdump {pid}: {errno}")));
            }
        }

        self.child
            .start_kill()
            .map_err(|e| ControllerError::Runtime(format!("killing tcpdump {pid}: {e}")))?;
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ControllerError::Runtime(format!("waiting for killed tcpdump {pid}: {e}")))?;
        debug!("tcpdump {} killed, exited with {}", pid, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> CaptureCommand {
        CaptureCommand {
            interface: "eth0".to_string(),
            output_path: "/var/lib/fleetcap/pcap/w-1-20260101T000000Z.pcap".to_string(),
            packet_count: None,
            file_size: None,
        }
    }

    #[test]
    fn test_tcpdump_args() {
        assert_eq!(
            command().tcpdump_args(),
            vec!["-i", "eth0", "-w", "/var/lib/fleetcap/pcap/w-1-20260101T000000Z.pcap"]
        );

        let counted = CaptureCommand {
            packet_count: Some(100),
            file_size: Some(10),
            ..command()
        };
        assert_eq!(&counted.tcpdump_args()[4..], &["-c", "100"]);

        let sized = CaptureCommand {
            file_size: Some(10),
            ..command()
        };
        assert_eq!(&sized.tcpdump_args()[4..], &["-C", "10"]);
    }

    #[test]
    fn test_nsenter_args() {
        let args = nsenter_args(4242, "ip", &["link".to_string(), "show".to_string()]);
        assert_eq!(args, vec!["--target", "4242", "--net", "--", "ip", "link", "show"]);
    }

    #[test]
    fn test_parse_inspect_pid() {
        let output = br#"{"status": {"id": "abc"}, "info": {"pid": 31337, "sandboxID": "s"}}"#;
        assert_eq!(parse_inspect_pid(output).unwrap(), 31337);
    }

    #[test]
    fn test_parse_inspect_pid_rejects_missing_or_zero() {
        assert!(matches!(
            parse_inspect_pid(br#"{"info": {}}"#),
            Err(ControllerError::Runtime(_))
        ));
        assert!(matches!(
            parse_inspect_pid(br#"{"info": {"pid": 0}}"#),
            Err(ControllerError::Runtime(_))
        ));
        assert!(matches!(parse_inspect_pid(b"not json"), Err(ControllerError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_stop_interrupts_and_reaps() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut process = TcpdumpProcess { child };
        assert!(process.id().is_some());

        process.stop().await.unwrap();

        assert_eq!(process.id(), None);
        // A reaped process has nothing left to stop
        process.stop().await.unwrap();
    }

    #[test]
    fn test_interrupt_rejects_out_of_range_pid() {
        assert_eq!(interrupt(u32::MAX), Err(Errno::EINVAL));
    }
}
