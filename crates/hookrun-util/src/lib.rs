mod config;
mod theme;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use hookrun_telemetry as telemetry;
use serde::Serialize;

pub use config::{resolve_adb_path, HookrunConfig, CONFIG_FILE_NAME};
pub use theme::Theme;

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn data_dir() -> PathBuf {
    if let Some(home) = env_var("HOME") {
        PathBuf::from(home).join(".local/share/hookrun")
    } else {
        PathBuf::from("/tmp/hookrun")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = env_var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

pub fn init_cli_telemetry(app_name: &'static str, app_version: &'static str, command: &str) {
    telemetry::init_with_env(app_name, app_version);
    telemetry::event("cli.start", &[("command", command)]);
}
