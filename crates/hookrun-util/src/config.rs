use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{env_var, expand_user, state_file_path, write_json_atomic};

pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_RELEASE_BASE_URL: &str = "https://github.com/frida/frida/releases/download";
const DEFAULT_SERVER_NAME: &str = "frida-server";
const DEFAULT_DEVICE_TMP_ROOT: &str = "/data/local/tmp";

/// Settings read from `<data dir>/state/config.json`. Environment variables
/// override the file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookrunConfig {
    pub adb_path: String,
    pub xz_path: String,
    pub release_base_url: String,
    pub server_name: String,
    pub device_tmp_root: String,
    pub framework_version: Option<String>,
    pub download_progress: bool,
}

impl Default for HookrunConfig {
    fn default() -> Self {
        Self {
            adb_path: String::new(),
            xz_path: "xz".into(),
            release_base_url: DEFAULT_RELEASE_BASE_URL.into(),
            server_name: DEFAULT_SERVER_NAME.into(),
            device_tmp_root: DEFAULT_DEVICE_TMP_ROOT.into(),
            framework_version: None,
            download_progress: true,
        }
    }
}

impl HookrunConfig {
    pub fn load() -> Self {
        Self::load_with(&state_file_path(CONFIG_FILE_NAME), env_var)
    }

    pub fn load_with<E>(path: &Path, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut cfg = match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<HookrunConfig>(&data) {
                Ok(file_cfg) => file_cfg,
                Err(err) => {
                    tracing::warn!("failed to parse {}: {err}", path.display());
                    HookrunConfig::default()
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("failed to read {}: {err}", path.display());
                }
                HookrunConfig::default()
            }
        };
        cfg.apply_env(&env);
        cfg
    }

    fn apply_env<E>(&mut self, env: &E)
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("HOOKRUN_ADB_PATH").or_else(|| env("ADB_PATH")) {
            self.adb_path = path;
        }
        if self.adb_path.trim().is_empty() {
            self.adb_path = resolve_adb_path(env).display().to_string();
        }
        if let Some(path) = env("HOOKRUN_XZ_PATH") {
            self.xz_path = path;
        }
        if let Some(url) = env("HOOKRUN_RELEASE_BASE_URL") {
            self.release_base_url = url;
        }
        if let Some(name) = env("HOOKRUN_SERVER_NAME") {
            self.server_name = name;
        }
        if let Some(root) = env("HOOKRUN_DEVICE_TMP") {
            self.device_tmp_root = root;
        }
        if let Some(version) = env("HOOKRUN_FRIDA_VERSION") {
            self.framework_version = Some(version);
        }
        self.release_base_url = self.release_base_url.trim_end_matches('/').to_string();
        self.device_tmp_root = self.device_tmp_root.trim_end_matches('/').to_string();
    }

    pub fn adb_path(&self) -> PathBuf {
        expand_user(&self.adb_path)
    }

    pub fn xz_path(&self) -> PathBuf {
        expand_user(&self.xz_path)
    }

    /// Writes to the config file and returns its path.
    pub fn save(&self) -> io::Result<PathBuf> {
        let path = state_file_path(CONFIG_FILE_NAME);
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}

/// `adb` from the Android SDK when one is configured, else whatever `adb` is
/// on `PATH`.
pub fn resolve_adb_path<E>(env: &E) -> PathBuf
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(sdk_root) = env("ANDROID_SDK_ROOT").or_else(|| env("ANDROID_HOME")) {
        let tools = PathBuf::from(&sdk_root).join("platform-tools");
        for name in ["adb", "adb.exe"] {
            let candidate = tools.join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from("adb")
}
