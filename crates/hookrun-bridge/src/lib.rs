//! Host-side process control and the `adb` device bridge.

mod adb;
mod error;
mod ids;
mod process;

pub use adb::{parse_devices, AdbBridge, BridgeDevice};
pub use error::BridgeError;
pub use ids::{normalize_adb_addr, normalize_serial, same_serial};
pub use process::{
    detach, BufferedOptions, CommandLine, CommandOutput, CommandRunner, Encoding, InvokeMode,
    StreamIo, SystemRunner,
};
