use std::fmt;

use crate::error::ProvisionError;

/// CPU architecture as named in server release artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    Arm,
    Arm64,
    X86,
    X86_64,
}

impl Arch {
    /// Maps `ro.product.cpu.abi`. Anything outside the known ABIs is an error.
    pub fn from_abi(abi: &str) -> Result<Self, ProvisionError> {
        match abi.trim() {
            "armeabi" | "armeabi-v7a" => Ok(Arch::Arm),
            "arm64-v8a" => Ok(Arch::Arm64),
            "x86" => Ok(Arch::X86),
            "x86_64" => Ok(Arch::X86_64),
            "" => Err(ProvisionError::ArchUnknown),
            other => Err(ProvisionError::UnsupportedArch(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
