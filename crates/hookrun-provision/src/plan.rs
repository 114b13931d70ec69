use hookrun_util::HookrunConfig;

use crate::abi::Arch;

/// Where server binaries come from and where they live on the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerLayout {
    pub server_name: String,
    pub release_base_url: String,
    pub device_tmp_root: String,
}

impl ServerLayout {
    pub fn from_config(cfg: &HookrunConfig) -> Self {
        Self {
            server_name: cfg.server_name.clone(),
            release_base_url: cfg.release_base_url.trim_end_matches('/').to_string(),
            device_tmp_root: cfg.device_tmp_root.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for ServerLayout {
    fn default() -> Self {
        Self::from_config(&HookrunConfig::default())
    }
}

/// Computed once per provisioning attempt. Every derived name is a pure
/// function of layout, version and arch, so repeated attempts probe and write
/// the same remote path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionPlan {
    server_version: String,
    arch: Arch,
    binary_name: String,
    remote_path: String,
    release_url: String,
}

impl ProvisionPlan {
    pub fn new(layout: &ServerLayout, server_version: &str, arch: Arch) -> Self {
        let server_version = server_version.trim().to_string();
        let binary_name = format!("{}-{server_version}-android-{arch}", layout.server_name);
        let remote_path = format!("{}/{binary_name}", layout.device_tmp_root);
        let release_url = format!(
            "{}/{server_version}/{binary_name}.xz",
            layout.release_base_url
        );
        Self {
            server_version,
            arch,
            binary_name,
            remote_path,
            release_url,
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// File name of the decompressed executable.
    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    pub fn archive_name(&self) -> String {
        format!("{}.xz", self.binary_name)
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn release_url(&self) -> &str {
        &self.release_url
    }
}
