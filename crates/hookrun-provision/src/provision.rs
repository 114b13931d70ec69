use std::path::PathBuf;

use hookrun_bridge::{detach, AdbBridge, BridgeError, CommandRunner, InvokeMode, StreamIo};
use hookrun_util::{HookrunConfig, Theme};

use crate::{
    abi::Arch,
    artifacts::{unpack_xz, ArtifactFetcher},
    error::ProvisionError,
    plan::{ProvisionPlan, ServerLayout},
};

/// What `ls` prints for a path that does not exist on the device.
pub const MISSING_PATH_MARKER: &str = "No such file or directory";

#[derive(Clone, Debug)]
pub struct ProvisionSettings {
    pub layout: ServerLayout,
    pub xz_path: PathBuf,
    /// Host directory that holds the per-attempt scratch directory.
    pub scratch_root: PathBuf,
    /// Overrides the version reported by the instrumentation runtime.
    pub framework_version: Option<String>,
}

impl ProvisionSettings {
    pub fn from_config(cfg: &HookrunConfig) -> Self {
        Self {
            layout: ServerLayout::from_config(cfg),
            xz_path: cfg.xz_path(),
            scratch_root: std::env::temp_dir(),
            framework_version: cfg.framework_version.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Present,
    Missing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub plan: ProvisionPlan,
    /// False when the binary was already on the device.
    pub installed: bool,
}

/// Puts a server binary matching the host runtime on one device and starts
/// it. Every device command goes through `bridge`, so the bridge's serial
/// decides which device is touched.
pub struct Provisioner<'a, R, F> {
    bridge: &'a AdbBridge<R>,
    fetcher: &'a F,
    settings: &'a ProvisionSettings,
    theme: &'a Theme,
}

impl<'a, R: CommandRunner, F: ArtifactFetcher> Provisioner<'a, R, F> {
    pub fn new(
        bridge: &'a AdbBridge<R>,
        fetcher: &'a F,
        settings: &'a ProvisionSettings,
        theme: &'a Theme,
    ) -> Self {
        Self {
            bridge,
            fetcher,
            settings,
            theme,
        }
    }

    pub async fn ensure_root(&self) -> Result<(), ProvisionError> {
        let whoami = match self.bridge.shell_text("su 0 whoami").await {
            Ok(text) => text,
            // su missing or refused; the device is not rooted for our purposes.
            Err(err @ (BridgeError::Stderr { .. } | BridgeError::Exit { .. })) => {
                return Err(ProvisionError::NotRooted {
                    whoami: err.diagnostic(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        if whoami.trim() != "root" {
            return Err(ProvisionError::NotRooted {
                whoami: whoami.trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn plan(&self, framework_version: Option<&str>) -> Result<ProvisionPlan, ProvisionError> {
        let version = framework_version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ProvisionError::FrameworkMissing)?;
        let abi = self.bridge.shell_text("getprop ro.product.cpu.abi").await?;
        let arch = Arch::from_abi(&abi)?;
        Ok(ProvisionPlan::new(&self.settings.layout, version, arch))
    }

    /// Probes with stderr folded into the output, so `ls` reporting a missing
    /// path reads as `Missing` whether adb returns it as text or as a failure.
    pub async fn probe(&self, plan: &ProvisionPlan) -> Result<Presence, ProvisionError> {
        let command = format!("ls {}", plan.remote_path());
        match self.bridge.shell(&command, InvokeMode::lenient()).await {
            Ok(output) => {
                let text = output.into_text()?;
                if text.contains(MISSING_PATH_MARKER) {
                    Ok(Presence::Missing)
                } else {
                    Ok(Presence::Present)
                }
            }
            Err(err) if err.mentions(MISSING_PATH_MARKER) => Ok(Presence::Missing),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn install(&self, plan: &ProvisionPlan) -> Result<(), ProvisionError> {
        let server_name = &self.settings.layout.server_name;
        eprintln!(
            "{}",
            self.theme.warning(&format!(
                "{} executable not found, downloading...",
                display_name(server_name)
            ))
        );

        let workdir = tempfile::Builder::new()
            .prefix(&format!("{server_name}-"))
            .tempdir_in(&self.settings.scratch_root)
            .map_err(|source| ProvisionError::Scratch {
                path: self.settings.scratch_root.clone(),
                source,
            })?;
        let archive = workdir.path().join(plan.archive_name());

        self.fetcher.fetch(plan.release_url(), &archive).await?;
        let binary = unpack_xz(self.bridge.runner(), &self.settings.xz_path, &archive).await?;

        // Some adb builds report transfer progress on stderr.
        self.bridge
            .push(&binary, plan.remote_path(), InvokeMode::lenient())
            .await?;
        tracing::info!("pushed {} to {}", binary.display(), plan.remote_path());

        let workdir_path = workdir.path().to_path_buf();
        if let Err(err) = workdir.close() {
            tracing::warn!("failed to remove {}: {err}", workdir_path.display());
        }

        self.bridge
            .shell(&format!("chmod +x {}", plan.remote_path()), InvokeMode::strict())
            .await?;
        hookrun_telemetry::event(
            "provision.installed",
            &[
                ("version", plan.server_version()),
                ("arch", plan.arch().as_str()),
            ],
        );
        Ok(())
    }

    /// Starts the server in the background as root. The adb process is handed
    /// off and never awaited.
    pub async fn launch(&self, plan: &ProvisionPlan) -> Result<(), ProvisionError> {
        eprintln!(
            "{}",
            self.theme.info(&format!(
                "Run {} from {}",
                display_name(&self.settings.layout.server_name),
                plan.remote_path()
            ))
        );
        let child = self
            .bridge
            .shell(
                &format!("su 0 {} &", plan.remote_path()),
                InvokeMode::Streaming(StreamIo::Discard),
            )
            .await?
            .into_handle()?;
        detach(child);
        hookrun_telemetry::event("provision.launched", &[("path", plan.remote_path())]);
        Ok(())
    }

    pub async fn run(&self, framework_version: Option<&str>) -> Result<ProvisionOutcome, ProvisionError> {
        let plan = self.plan(framework_version).await?;
        tracing::info!(
            "provisioning {} on {}",
            plan.binary_name(),
            self.bridge.serial().unwrap_or("default device")
        );
        hookrun_telemetry::event(
            "provision.start",
            &[
                ("version", plan.server_version()),
                ("arch", plan.arch().as_str()),
            ],
        );

        let installed = match self.probe(&plan).await? {
            Presence::Present => {
                tracing::info!("{} already on device", plan.remote_path());
                hookrun_telemetry::event("provision.skip", &[("path", plan.remote_path())]);
                false
            }
            Presence::Missing => {
                self.install(&plan).await?;
                true
            }
        };

        self.launch(&plan).await?;
        Ok(ProvisionOutcome { plan, installed })
    }
}

/// `frida-server` reads as "Frida server" in messages.
fn display_name(server_name: &str) -> String {
    let mut words = server_name.split('-');
    let Some(first) = words.next() else {
        return String::new();
    };
    let mut chars = first.chars();
    let mut name: String = match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    for word in words {
        name.push(' ');
        name.push_str(word);
    }
    name
}
