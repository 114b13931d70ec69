use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use hookrun_bridge::{BridgeError, CommandLine, CommandOutput, CommandRunner, InvokeMode, StreamIo};
use hookrun_provision::{
    ArtifactFetcher, AttachError, AttachOutcome, DeviceKind, FetchError, Instrumentation,
    Orchestrator, ProcessTarget, ProvisionError, ProvisionSettings, RunError, SessionReport,
    SessionRequest, TargetDevice,
};
use hookrun_util::{HookrunConfig, Theme};

const LISTING: &str = "List of devices attached\nABC123\tdevice\nXYZ789\tunauthorized\n";

#[derive(Clone)]
struct FakeAdb {
    calls: Arc<Mutex<Vec<(String, InvokeMode)>>>,
    replies: Arc<Vec<(&'static str, &'static str)>>,
}

impl FakeAdb {
    fn new(replies: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            calls: Arc::default(),
            replies: Arc::new(replies),
        }
    }

    fn device_missing_server() -> Self {
        Self::new(vec![
            (" devices", LISTING),
            ("whoami", "root\n"),
            ("getprop ro.product.cpu.abi", "arm64-v8a\n"),
            (
                "shell ls ",
                "ls: /data/local/tmp/frida-server-16.1.0-android-arm64: No such file or directory",
            ),
        ])
    }

    fn calls(&self) -> Vec<(String, InvokeMode)> {
        self.calls.lock().unwrap().clone()
    }

    fn position(&self, needle: &str) -> Option<usize> {
        self.calls().iter().position(|(line, _)| line.contains(needle))
    }

    fn count(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(line, _)| line.contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandRunner for FakeAdb {
    async fn invoke(
        &self,
        command: &CommandLine,
        mode: InvokeMode,
    ) -> Result<CommandOutput, BridgeError> {
        let line = command.to_string();
        self.calls.lock().unwrap().push((line.clone(), mode));
        if let InvokeMode::Streaming(_) = mode {
            let child = tokio::process::Command::new("true")
                .spawn()
                .expect("spawn true");
            return Ok(CommandOutput::Handle(child));
        }
        let reply = self
            .replies
            .iter()
            .find(|(needle, _)| line.contains(needle))
            .map(|(_, reply)| *reply)
            .unwrap_or("");
        Ok(CommandOutput::Text(reply.to_string()))
    }
}

#[derive(Default)]
struct FakeFetcher {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        fs::write(destination, b"xz-bytes").map_err(|source| FetchError::Write {
            path: destination.to_path_buf(),
            source,
        })
    }
}

struct FakeBackend {
    failure: Mutex<Option<AttachError>>,
    version: Option<&'static str>,
}

impl FakeBackend {
    fn failing(message: &str) -> Self {
        Self {
            failure: Mutex::new(Some(AttachError::from_backend_message(message))),
            version: Some("16.1.0"),
        }
    }

    fn healthy() -> Self {
        Self {
            failure: Mutex::new(None),
            version: Some("16.1.0"),
        }
    }
}

impl Instrumentation for FakeBackend {
    fn framework_version(&self) -> Option<String> {
        self.version.map(str::to_string)
    }

    fn enumerate_devices(&self, _remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError> {
        Ok(vec![usb_device("ABC123")])
    }

    fn run_session(
        &self,
        _device: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<SessionReport, AttachError> {
        match self.failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(SessionReport {
                pid: 4242,
                scripts_loaded: request.scripts.len(),
            }),
        }
    }
}

fn usb_device(id: &str) -> TargetDevice {
    TargetDevice {
        id: id.to_string(),
        name: "Pixel".to_string(),
        kind: DeviceKind::Usb,
        address: None,
    }
}

fn request() -> SessionRequest {
    SessionRequest {
        target: ProcessTarget::Name("com.example.app".into()),
        scripts: Vec::new(),
        pause: false,
    }
}

fn settings(scratch: &Path) -> ProvisionSettings {
    let mut settings = ProvisionSettings::from_config(&HookrunConfig::default());
    settings.scratch_root = scratch.to_path_buf();
    settings
}

const MISSING_SERVER: &str = "unable to connect to remote frida-server: closed";

#[tokio::test]
async fn missing_server_is_downloaded_pushed_and_launched() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let outcome = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap();

    let outcome = match outcome {
        AttachOutcome::Provisioned(outcome) => outcome,
        other => panic!("expected provisioning, got {other:?}"),
    };
    assert!(outcome.installed);
    assert_eq!(
        outcome.plan.remote_path(),
        "/data/local/tmp/frida-server-16.1.0-android-arm64"
    );

    let urls = fetcher.urls.lock().unwrap().clone();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("/16.1.0/frida-server-16.1.0-android-arm64.xz"));

    assert_eq!(adb.count(" push "), 1);
    assert_eq!(adb.count("chmod +x"), 1);
    assert_eq!(adb.count("su 0 /data/local/tmp/frida-server-16.1.0-android-arm64 &"), 1);

    let push = adb.position(" push ").unwrap();
    let chmod = adb.position("chmod +x").unwrap();
    let launch = adb.position("su 0 /data/local/tmp/").unwrap();
    assert!(push < chmod && chmod < launch);

    let calls = adb.calls();
    assert_eq!(calls[launch].1, InvokeMode::Streaming(StreamIo::Discard));
    assert!(calls[push].0.contains("/data/local/tmp/frida-server-16.1.0-android-arm64"));

    // Everything after the listing, apart from the host-side unpack, is
    // scoped to the matched device.
    assert_eq!(calls[0].0, "adb devices");
    assert_eq!(adb.count("xz -d "), 1);
    assert!(calls[1..]
        .iter()
        .filter(|(line, _)| !line.starts_with("xz "))
        .all(|(line, _)| line.starts_with("adb -s ABC123 ")));

    // Scratch directory is gone once the binary is on the device.
    let leftovers: Vec<PathBuf> = fs::read_dir(scratch.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
}

#[tokio::test]
async fn present_server_is_launched_without_download() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::new(vec![
        (" devices", LISTING),
        ("whoami", "root"),
        ("getprop ro.product.cpu.abi", "x86_64"),
        ("shell ls ", "/data/local/tmp/frida-server-16.1.0-android-x86_64"),
    ]);
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let outcome = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap();

    let outcome = match outcome {
        AttachOutcome::Provisioned(outcome) => outcome,
        other => panic!("expected provisioning, got {other:?}"),
    };
    assert!(!outcome.installed);
    assert!(fetcher.urls.lock().unwrap().is_empty());
    assert_eq!(adb.count(" push "), 0);
    assert_eq!(adb.count("chmod"), 0);
    assert_eq!(adb.count("su 0 /data/local/tmp/frida-server-16.1.0-android-x86_64 &"), 1);
}

#[tokio::test]
async fn other_attach_failures_never_touch_the_device() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing("Process \"com.example.app\" not found");

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let err = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Attach(_)));
    assert_eq!(err.to_string(), "Process \"com.example.app\" not found");
    assert!(adb.calls().is_empty());
    assert!(fetcher.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn successful_attach_reports_session() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::healthy();

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let outcome = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap();

    assert!(matches!(outcome, AttachOutcome::Attached(SessionReport { pid: 4242, .. })));
    assert!(adb.calls().is_empty());
}

/// Waits inside `run_session` for a task spawned on the same runtime, the way
/// a real session blocks until the target detaches.
struct WaitingBackend {
    pending: Mutex<Option<tokio::task::JoinHandle<u32>>>,
}

impl Instrumentation for WaitingBackend {
    fn framework_version(&self) -> Option<String> {
        Some("16.1.0".to_string())
    }

    fn enumerate_devices(&self, _remote: Option<&str>) -> Result<Vec<TargetDevice>, AttachError> {
        Ok(vec![usb_device("ABC123")])
    }

    fn run_session(
        &self,
        _device: &TargetDevice,
        request: &SessionRequest,
    ) -> Result<SessionReport, AttachError> {
        let pending = self.pending.lock().unwrap().take().unwrap();
        let pid = tokio::runtime::Handle::current()
            .block_on(pending)
            .map_err(|err| AttachError::other(err.to_string()))?;
        Ok(SessionReport {
            pid,
            scripts_loaded: request.scripts.len(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_session_leaves_runtime_running() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = WaitingBackend {
        pending: Mutex::new(Some(tokio::spawn(async { 777 }))),
    };

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let outcome = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap();

    assert!(matches!(outcome, AttachOutcome::Attached(SessionReport { pid: 777, .. })));
    assert!(adb.calls().is_empty());
}

#[tokio::test]
async fn unknown_or_unready_device_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let fetcher = FakeFetcher::default();

    for id in ["NOPE00", "XYZ789"] {
        let adb = FakeAdb::device_missing_server();
        let backend = FakeBackend::failing(MISSING_SERVER);
        let orchestrator =
            Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
        let err = orchestrator
            .attach(&usb_device(id), &request())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::NoMatchingDevice { .. }), "{id}: {err:?}");
        assert_eq!(adb.calls().len(), 1, "only the listing runs for {id}");
    }
}

#[tokio::test]
async fn serials_differing_in_case_are_distinct_devices() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::new(vec![
        (
            " devices",
            "List of devices attached\nABC123\tdevice\nabc123\tdevice\n",
        ),
        ("whoami", "shell"),
    ]);
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let err = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Provision(ProvisionError::NotRooted { .. })
    ));
    let calls = adb.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, "adb -s ABC123 shell su 0 whoami");
}

#[tokio::test]
async fn loopback_aliases_are_ambiguous() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::new(vec![(
        " devices",
        "List of devices attached\n127.0.0.1:5555\tdevice\nlocalhost:5555\tdevice\n",
    )]);
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let err = orchestrator
        .attach(&usb_device("localhost:5555"), &request())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::AmbiguousDevice { count: 2, .. }));
    assert_eq!(adb.calls().len(), 1);
}

#[tokio::test]
async fn unrooted_device_stops_before_planning() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::new(vec![(" devices", LISTING), ("whoami", "shell")]);
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let err = orchestrator
        .attach(&usb_device("ABC123"), &request())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Provision(ProvisionError::NotRooted { .. })
    ));
    assert_eq!(err.to_string(), "Please root your device first.");
    assert_eq!(adb.count("getprop"), 0);
}

#[tokio::test]
async fn configured_version_wins_over_runtime() {
    let scratch = tempfile::tempdir().unwrap();
    let mut settings = settings(scratch.path());
    settings.framework_version = Some("16.2.1".into());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend::failing(MISSING_SERVER);

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let outcome = orchestrator.provision("ABC123").await.unwrap();

    assert_eq!(outcome.plan.server_version(), "16.2.1");
    let urls = fetcher.urls.lock().unwrap().clone();
    assert!(urls[0].ends_with("/16.2.1/frida-server-16.2.1-android-arm64.xz"));
}

#[tokio::test]
async fn missing_runtime_version_is_reported() {
    let scratch = tempfile::tempdir().unwrap();
    let settings = settings(scratch.path());
    let theme = Theme::plain();
    let adb = FakeAdb::device_missing_server();
    let fetcher = FakeFetcher::default();
    let backend = FakeBackend {
        failure: Mutex::new(None),
        version: None,
    };

    let orchestrator = Orchestrator::new(&backend, "adb", adb.clone(), &fetcher, &settings, &theme);
    let err = orchestrator.provision("ABC123").await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Can not find frida package, maybe install frida first."
    );
}
