use std::path::PathBuf;

use hookrun_bridge::{same_serial, AdbBridge, BridgeError, CommandRunner};
use hookrun_util::Theme;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::{
    artifacts::ArtifactFetcher,
    error::ProvisionError,
    provision::{ProvisionOutcome, ProvisionSettings, Provisioner},
    session::{AttachError, Instrumentation, SessionReport, SessionRequest, TargetDevice},
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error("no matching Android device for {id}")]
    NoMatchingDevice { id: String },
    #[error("ambiguous Android device {id}: {count} adb devices match")]
    AmbiguousDevice { id: String, count: usize },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[derive(Debug)]
pub enum AttachOutcome {
    Attached(SessionReport),
    /// The server was missing and has been provisioned. The session was not
    /// retried; the caller decides whether to attach again.
    Provisioned(ProvisionOutcome),
}

/// Attaches through the instrumentation backend and, when the device has no
/// server running, provisions one over adb.
pub struct Orchestrator<'a, I, R, F> {
    backend: &'a I,
    adb: PathBuf,
    runner: R,
    fetcher: &'a F,
    settings: &'a ProvisionSettings,
    theme: &'a Theme,
}

impl<'a, I, R, F> Orchestrator<'a, I, R, F>
where
    I: Instrumentation,
    R: CommandRunner + Clone,
    F: ArtifactFetcher,
{
    pub fn new(
        backend: &'a I,
        adb: impl Into<PathBuf>,
        runner: R,
        fetcher: &'a F,
        settings: &'a ProvisionSettings,
        theme: &'a Theme,
    ) -> Self {
        Self {
            backend,
            adb: adb.into(),
            runner,
            fetcher,
            settings,
            theme,
        }
    }

    pub async fn attach(
        &self,
        device: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<AttachOutcome, RunError> {
        tracing::debug!("attaching to {:?} on {}", request.target, device.id);
        let err = match off_worker(|| self.backend.run_session(device, request)) {
            Ok(report) => return Ok(AttachOutcome::Attached(report)),
            Err(err) => err,
        };
        if !err.is_missing_server() {
            return Err(err.into());
        }

        tracing::warn!("no server reachable on {}: {err}", device.id);
        hookrun_telemetry::event("attach.fallback", &[("device", device.id.as_str())]);
        let outcome = self.provision(&device.id).await?;
        Ok(AttachOutcome::Provisioned(outcome))
    }

    /// Bridge bound to the single ready adb device whose serial matches
    /// `device_id`.
    pub async fn matching_bridge(&self, device_id: &str) -> Result<AdbBridge<R>, RunError> {
        let listing = AdbBridge::new(&self.adb, None, self.runner.clone())
            .devices()
            .await?;
        let matches: Vec<_> = listing
            .into_iter()
            .filter(|device| device.is_ready() && same_serial(&device.id, device_id))
            .collect();
        match matches.as_slice() {
            [] => Err(RunError::NoMatchingDevice {
                id: device_id.to_string(),
            }),
            [device] => Ok(AdbBridge::new(
                &self.adb,
                Some(device.id.as_str()),
                self.runner.clone(),
            )),
            many => Err(RunError::AmbiguousDevice {
                id: device_id.to_string(),
                count: many.len(),
            }),
        }
    }

    pub async fn provision(&self, device_id: &str) -> Result<ProvisionOutcome, RunError> {
        let bridge = self.matching_bridge(device_id).await?;
        let provisioner = Provisioner::new(&bridge, self.fetcher, self.settings, self.theme);
        provisioner.ensure_root().await?;

        let version = self
            .settings
            .framework_version
            .clone()
            .or_else(|| self.backend.framework_version());
        Ok(provisioner.run(version.as_deref()).await?)
    }
}

/// Runs a blocking backend call. On a multi-threaded runtime the worker hands
/// its other tasks away first; a current-thread runtime has nowhere to move
/// them and runs the call in place.
fn off_worker<T>(call: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(call)
        }
        _ => call(),
    }
}
