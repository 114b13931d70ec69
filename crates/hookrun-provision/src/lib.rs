mod abi;
mod artifacts;
mod attach;
mod backend;
mod error;
mod plan;
mod provision;
mod session;

pub use abi::Arch;
pub use artifacts::{unpack_xz, ArtifactFetcher, HttpFetcher};
pub use attach::{AttachOutcome, Orchestrator, RunError};
pub use backend::FridaBackend;
pub use error::{FetchError, ProvisionError};
pub use plan::{ProvisionPlan, ServerLayout};
pub use provision::{
    Presence, ProvisionOutcome, ProvisionSettings, Provisioner, MISSING_PATH_MARKER,
};
pub use session::{
    normalize_remote_addr, resolve_pid, select_device, AttachError, AttachFailureKind,
    DeviceKind, DeviceQuery, Instrumentation, ProcessEntry, ProcessTarget, ScriptSource,
    SelectError, SessionReport, SessionRequest, TargetDevice, DEFAULT_REMOTE_PORT,
    MISSING_SERVER_MARKER,
};
