//! Instrumentation backend on top of the frida runtime. Without the `frida`
//! feature the backend only reports that it is unavailable, which keeps the
//! `devices` and `provision` paths usable on hosts without the devkit.

use hookrun_util::Theme;

use crate::session::{AttachError, Instrumentation, SessionReport, SessionRequest, TargetDevice};

pub struct FridaBackend {
    #[cfg_attr(not(feature = "frida"), allow(dead_code))]
    theme: Theme,
}

impl FridaBackend {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }
}

#[cfg(not(feature = "frida"))]
impl Instrumentation for FridaBackend {
    fn framework_version(&self) -> Option<String> {
        None
    }

    fn enumerate_devices(&self, _remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError> {
        Err(disabled())
    }

    fn run_session(
        &self,
        _device: &TargetDevice,
        _request: &SessionRequest,
    ) -> Result<SessionReport, AttachError> {
        Err(disabled())
    }
}

#[cfg(not(feature = "frida"))]
fn disabled() -> AttachError {
    AttachError::other(
        "frida support is disabled. Rebuild hookrun with `--features frida` to attach to processes.",
    )
}

#[cfg(feature = "frida")]
impl Instrumentation for FridaBackend {
    fn framework_version(&self) -> Option<String> {
        Some(::frida::Frida::version().to_string())
    }

    fn enumerate_devices(&self, remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError> {
        inner::enumerate_devices(remote)
    }

    fn run_session(
        &self,
        device: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<SessionReport, AttachError> {
        inner::run_session(&self.theme, device, request)
    }
}

#[cfg(feature = "frida")]
mod inner {
    use std::{thread, time::Duration};

    use ::frida::{
        Device, DeviceManager, DeviceType, Frida, Message, ScriptHandler, ScriptOption,
        SpawnOptions,
    };

    use super::*;
    use crate::session::{resolve_pid, DeviceKind, ProcessEntry, ProcessTarget};

    const DETACH_POLL_INTERVAL: Duration = Duration::from_millis(250);

    fn backend_error(context: &str, err: ::frida::Error) -> AttachError {
        AttachError::from_backend_message(format!("{context}: {err}")).with_cause(err)
    }

    fn kind_of(device: &Device<'_>) -> DeviceKind {
        match device.get_type() {
            DeviceType::USB => DeviceKind::Usb,
            DeviceType::Remote => DeviceKind::Remote,
            _ => DeviceKind::Local,
        }
    }

    fn describe(device: &Device<'_>) -> TargetDevice {
        TargetDevice {
            id: device.get_id().to_string(),
            name: device.get_name().to_string(),
            kind: kind_of(device),
            address: None,
        }
    }

    pub(super) fn enumerate_devices(remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError> {
        let frida = unsafe { Frida::obtain() };
        let manager = DeviceManager::obtain(&frida);
        if let Some(addr) = remote {
            let device = manager
                .get_remote_device(addr)
                .map_err(|err| backend_error(&format!("connect remote device {addr}"), err))?;
            return Ok(vec![TargetDevice::remote(
                device.get_id(),
                device.get_name(),
                addr,
            )]);
        }
        Ok(manager
            .enumerate_all_devices()
            .iter()
            .map(describe)
            .collect())
    }

    fn open<'a>(
        manager: &'a DeviceManager<'a>,
        target: &TargetDevice,
    ) -> Result<Device<'a>, AttachError> {
        match (target.kind, target.connect_address()) {
            (DeviceKind::Remote, Some(addr)) => manager
                .get_remote_device(addr)
                .map_err(|err| backend_error(&format!("connect remote device {addr}"), err)),
            (DeviceKind::Remote, None) => Err(AttachError::other(format!(
                "remote device {} has no address to connect to",
                target.id
            ))),
            _ => manager
                .get_device_by_id(&target.id)
                .map_err(|err| backend_error(&format!("open device {}", target.id), err)),
        }
    }

    pub(super) fn run_session(
        theme: &Theme,
        target: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<SessionReport, AttachError> {
        let frida = unsafe { Frida::obtain() };
        let manager = DeviceManager::obtain(&frida);
        let mut device = open(&manager, target)?;

        let (pid, spawned) = match &request.target {
            ProcessTarget::Pid(pid) => (*pid, false),
            ProcessTarget::Name(name) => {
                let processes: Vec<ProcessEntry> = device
                    .enumerate_processes()
                    .iter()
                    .map(|process| ProcessEntry {
                        pid: process.get_pid(),
                        name: process.get_name().to_string(),
                    })
                    .collect();
                (resolve_pid(&processes, name)?, false)
            }
            ProcessTarget::Spawn(program) => {
                let pid = device
                    .spawn(program, &SpawnOptions::default())
                    .map_err(|err| backend_error(&format!("spawn {program}"), err))?;
                (pid, true)
            }
        };

        let session = device
            .attach(pid)
            .map_err(|err| backend_error(&format!("attach to pid {pid}"), err))?;
        tracing::info!("attached to pid {pid} on {}", target.id);

        // Scripts stay alive for the whole session.
        let mut scripts = Vec::with_capacity(request.scripts.len());
        for source in &request.scripts {
            let mut options = ScriptOption::default();
            let mut script = session
                .create_script(&source.code, &mut options)
                .map_err(|err| {
                    backend_error(&format!("create script {}", source.path.display()), err)
                })?;
            script
                .handle_message(ConsoleHandler {
                    theme: theme.clone(),
                })
                .map_err(|err| backend_error("register message handler", err))?;
            script
                .load()
                .map_err(|err| backend_error(&format!("load {}", source.path.display()), err))?;
            tracing::info!("loaded {}", source.path.display());
            scripts.push(script);
        }

        if spawned && !request.pause {
            device
                .resume(pid)
                .map_err(|err| backend_error(&format!("resume pid {pid}"), err))?;
        }

        while !session.is_detached() {
            thread::sleep(DETACH_POLL_INTERVAL);
        }
        tracing::info!("session for pid {pid} detached");

        Ok(SessionReport {
            pid,
            scripts_loaded: scripts.len(),
        })
    }

    /// Prints script output: `send` payloads to stdout, errors to stderr with
    /// their location.
    struct ConsoleHandler {
        theme: Theme,
    }

    impl ScriptHandler for ConsoleHandler {
        fn on_message(&mut self, message: &Message, _data: Option<Vec<u8>>) {
            match message {
                Message::Send(send) => println!("{}", send.payload.returns),
                Message::Log(log) => println!("{}", log.payload),
                Message::Error(err) => {
                    eprintln!("{}", self.theme.error(&err.description));
                    if !err.stack.is_empty() {
                        eprintln!("{}", err.stack);
                    }
                    eprintln!(
                        "{}:{}:{}",
                        err.file_name, err.line_number, err.column_number
                    );
                }
                Message::Other(value) => tracing::debug!("unhandled script message: {value}"),
            }
        }
    }
}
