use std::path::{Path, PathBuf};

use crate::{
    error::BridgeError,
    process::{CommandLine, CommandOutput, CommandRunner, InvokeMode},
};

/// One line of `adb devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeDevice {
    pub id: String,
    pub status: String,
}

impl BridgeDevice {
    pub fn is_ready(&self) -> bool {
        self.status == "device"
    }

    pub fn health(&self) -> &'static str {
        match self.status.as_str() {
            "device" => "online",
            "unauthorized" => "unauthorized",
            "offline" => "offline",
            "recovery" => "recovery",
            "bootloader" => "bootloader",
            "authorizing" | "connecting" => "booting",
            _ => "unknown",
        }
    }
}

/// `adb` scoped to one device serial, or to adb's default device when no
/// serial is bound (only valid with exactly one device attached).
#[derive(Clone, Debug)]
pub struct AdbBridge<R> {
    adb: PathBuf,
    serial: Option<String>,
    runner: R,
}

impl<R: CommandRunner> AdbBridge<R> {
    pub fn new(adb: impl Into<PathBuf>, serial: Option<&str>, runner: R) -> Self {
        Self {
            adb: adb.into(),
            serial: serial
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            runner,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn command(&self) -> CommandLine {
        let cmd = CommandLine::new(&self.adb);
        match self.serial.as_deref() {
            Some(serial) => cmd.arg("-s").arg(serial),
            None => cmd,
        }
    }

    pub async fn shell(&self, command: &str, mode: InvokeMode) -> Result<CommandOutput, BridgeError> {
        let line = self.command().arg("shell").split_args(command);
        self.runner.invoke(&line, mode).await
    }

    /// `shell` in the default buffered mode, returning the text.
    pub async fn shell_text(&self, command: &str) -> Result<String, BridgeError> {
        self.shell(command, InvokeMode::strict()).await?.into_text()
    }

    pub async fn push(
        &self,
        source: &Path,
        destination: &str,
        mode: InvokeMode,
    ) -> Result<CommandOutput, BridgeError> {
        let line = self
            .command()
            .arg("push")
            .arg(source.to_string_lossy())
            .arg(destination);
        self.runner.invoke(&line, mode).await
    }

    pub async fn devices_output(&self, mode: InvokeMode) -> Result<CommandOutput, BridgeError> {
        let line = self.command().arg("devices");
        self.runner.invoke(&line, mode).await
    }

    pub async fn devices(&self) -> Result<Vec<BridgeDevice>, BridgeError> {
        let text = self.devices_output(InvokeMode::strict()).await?.into_text()?;
        Ok(parse_devices(&text))
    }
}

/// Parses `adb devices` output: a header line, then `<id>\t<status>` lines.
/// Lines without a tab are skipped.
pub fn parse_devices(output: &str) -> Vec<BridgeDevice> {
    let mut devices = Vec::new();
    for line in output.lines().skip(1) {
        if line.trim().is_empty() || line.starts_with("* ") {
            continue;
        }
        let Some((id, status)) = line.split_once('\t') else {
            tracing::warn!("skipping malformed adb devices line: {line:?}");
            continue;
        };
        devices.push(BridgeDevice {
            id: id.trim().to_string(),
            status: status.trim().to_string(),
        });
    }
    devices
}
