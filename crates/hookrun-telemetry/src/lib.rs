//! Opt-in local usage events, appended as JSON lines under the data directory.
//! Nothing leaves the machine.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use uuid::Uuid;

pub const ENABLE_ENV: &str = "HOOKRUN_TELEMETRY";
const LOG_FILE: &str = "events.jsonl";
const ROTATE_AT: u64 = 2 * 1024 * 1024;

static RECORDER: OnceLock<Recorder> = OnceLock::new();

#[derive(Debug, Serialize)]
struct Event<'a> {
    event: &'a str,
    at_ms: u64,
    app: &'a str,
    version: &'a str,
    run_id: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    props: BTreeMap<&'a str, &'a str>,
}

/// Append-only JSONL file that is moved aside to `<name>.1` once it grows
/// past `rotate_at` bytes.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    rotate_at: u64,
}

impl EventLog {
    pub fn new(dir: &Path, rotate_at: u64) -> Self {
        Self {
            path: dir.join(LOG_FILE),
            rotate_at,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let size = fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0);
        if size >= self.rotate_at {
            fs::rename(&self.path, self.path.with_extension("jsonl.1"))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

/// Stamps events with the app and a per-run id. A disabled recorder drops
/// everything without touching the disk.
#[derive(Debug)]
pub struct Recorder {
    app: &'static str,
    version: &'static str,
    run_id: String,
    log: Option<Mutex<EventLog>>,
}

impl Recorder {
    pub fn new(app: &'static str, version: &'static str, log: Option<EventLog>) -> Self {
        Self {
            app,
            version,
            run_id: Uuid::new_v4().to_string(),
            log: log.map(Mutex::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn record(&self, event: &str, props: &[(&str, &str)]) {
        let Some(log) = &self.log else {
            return;
        };
        let entry = Event {
            event,
            at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|since| since.as_millis() as u64)
                .unwrap_or(0),
            app: self.app,
            version: self.version,
            run_id: &self.run_id,
            props: props
                .iter()
                .filter(|(key, _)| !key.trim().is_empty())
                .copied()
                .collect(),
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::debug!("telemetry: cannot encode {event}: {err}");
                return;
            }
        };
        let Ok(log) = log.lock() else {
            return;
        };
        if let Err(err) = log.append(&line) {
            tracing::debug!("telemetry: cannot write {}: {err}", log.path().display());
        }
    }
}

/// Installs the process-wide recorder, enabled when `HOOKRUN_TELEMETRY` is
/// truthy. Later calls keep the first recorder.
pub fn init_with_env(app: &'static str, version: &'static str) -> &'static Recorder {
    RECORDER.get_or_init(|| {
        let enabled = enabled_by(std::env::var(ENABLE_ENV).ok().as_deref());
        let log = enabled.then(|| EventLog::new(&default_dir(app), ROTATE_AT));
        Recorder::new(app, version, log)
    })
}

/// Records through the process-wide recorder; a no-op before `init_with_env`.
pub fn event(event: &str, props: &[(&str, &str)]) {
    if let Some(recorder) = RECORDER.get() {
        recorder.record(event, props);
    }
}

fn default_dir(app: &str) -> PathBuf {
    let base = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".local/share"),
        _ => PathBuf::from("/tmp"),
    };
    base.join(app).join("telemetry")
}

fn enabled_by(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    ["1", "true", "yes", "on"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}
