use std::{
    error::Error as StdError,
    fs, io,
    path::{Path, PathBuf},
};

use hookrun_bridge::same_serial;
use thiserror::Error;

pub const DEFAULT_REMOTE_PORT: u16 = 27042;

/// Text the instrumentation backend reports when no server answers on the
/// device. Only `AttachError::from_backend_message` looks at it.
pub const MISSING_SERVER_MARKER: &str = "unable to connect to remote frida-server";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Local,
    Usb,
    Remote,
}

/// A device as the instrumentation backend sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDevice {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    /// `host:port` a remote device was reached through. The backend id of a
    /// remote device is not an address and cannot be used to reconnect.
    pub address: Option<String>,
}

impl TargetDevice {
    pub fn remote(id: impl Into<String>, name: impl Into<String>, addr: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DeviceKind::Remote,
            address: Some(normalize_remote_addr(addr)),
        }
    }

    /// Address to reconnect through, for remote devices only.
    pub fn connect_address(&self) -> Option<&str> {
        match self.kind {
            DeviceKind::Remote => self.address.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceQuery {
    pub kind: DeviceKind,
    pub id: Option<String>,
    pub remote: Option<String>,
}

impl DeviceQuery {
    /// `--remote` takes precedence over `--usb`; neither means the local device.
    pub fn new(usb: bool, remote: Option<&str>, id: Option<&str>) -> Self {
        let remote = remote
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(normalize_remote_addr);
        let kind = if remote.is_some() {
            DeviceKind::Remote
        } else if usb {
            DeviceKind::Usb
        } else {
            DeviceKind::Local
        };
        Self {
            kind,
            id: id.map(str::to_string),
            remote,
        }
    }
}

pub fn normalize_remote_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.split(':').count() == 1 {
        format!("{addr}:{DEFAULT_REMOTE_PORT}")
    } else {
        addr.to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("No devices found.")]
    NoDevices,
    #[error("Multiple devices found, please specify one.")]
    Multiple(usize),
}

pub fn select_device(
    devices: Vec<TargetDevice>,
    query: &DeviceQuery,
) -> Result<TargetDevice, SelectError> {
    let mut matches: Vec<TargetDevice> = devices
        .into_iter()
        .filter(|device| device.kind == query.kind)
        .filter(|device| match query.id.as_deref() {
            Some(id) => device.id == id || same_serial(&device.id, id),
            None => true,
        })
        .collect();
    match matches.len() {
        0 => Err(SelectError::NoDevices),
        1 => Ok(matches.remove(0)),
        count => Err(SelectError::Multiple(count)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessTarget {
    Pid(u32),
    Name(String),
    /// Start the program, then attach to it.
    Spawn(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

pub fn resolve_pid(processes: &[ProcessEntry], name: &str) -> Result<u32, AttachError> {
    processes
        .iter()
        .find(|process| process.name == name)
        .map(|process| process.pid)
        .ok_or_else(|| AttachError::other(format!("Process \"{name}\" not found")))
}

#[derive(Clone, Debug)]
pub struct ScriptSource {
    pub path: PathBuf,
    pub code: String,
}

impl ScriptSource {
    pub fn read(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            code: fs::read_to_string(path)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub target: ProcessTarget,
    pub scripts: Vec<ScriptSource>,
    /// Leave the process suspended after the scripts are loaded.
    pub pause: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub pid: u32,
    pub scripts_loaded: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachFailureKind {
    MissingInstrumentationServer,
    Other,
}

/// Failure to establish an instrumentation session. `kind` is decided where
/// the failure is first seen; the backend's own error, if any, is the source.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AttachError {
    kind: AttachFailureKind,
    message: String,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl AttachError {
    pub fn new(kind: AttachFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(AttachFailureKind::Other, message)
    }

    pub fn missing_server(message: impl Into<String>) -> Self {
        Self::new(AttachFailureKind::MissingInstrumentationServer, message)
    }

    /// Classifies a backend error by its text. The backend exposes nothing
    /// better; a reworded upstream message lands in `Other`.
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.to_ascii_lowercase().contains(MISSING_SERVER_MARKER) {
            AttachFailureKind::MissingInstrumentationServer
        } else {
            AttachFailureKind::Other
        };
        Self::new(kind, message)
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> AttachFailureKind {
        self.kind
    }

    pub fn is_missing_server(&self) -> bool {
        self.kind == AttachFailureKind::MissingInstrumentationServer
    }
}

/// The instrumentation runtime. Calls block until the runtime answers, and
/// `run_session` blocks for as long as the session stays attached. Async
/// callers must keep it off the runtime's worker threads.
pub trait Instrumentation {
    /// Version of the locally installed runtime, which the device server must
    /// match.
    fn framework_version(&self) -> Option<String>;

    fn enumerate_devices(&self, remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError>;

    /// Attaches (spawning first if asked), loads the scripts in order and
    /// resumes the process unless `pause` is set.
    fn run_session(
        &self,
        device: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<SessionReport, AttachError>;
}
