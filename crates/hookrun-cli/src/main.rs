use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{ArgGroup, Args, Parser, Subcommand};
use hookrun_bridge::{AdbBridge, SystemRunner};
use hookrun_provision::{
    select_device, AttachOutcome, DeviceQuery, FridaBackend, HttpFetcher, Instrumentation,
    Orchestrator, ProcessTarget, ProvisionOutcome, ProvisionSettings, ScriptSource, SelectError,
    SessionRequest,
};
use hookrun_util::{HookrunConfig, Theme};

#[derive(Debug, Parser)]
#[command(name = "hookrun", version, about = "Run frida scripts against Android devices")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Attach to a process and load scripts into it
    Run(RunArgs),
    /// List devices known to adb
    Devices,
    /// Install and start the frida server on a device
    Provision(ProvisionArgs),
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("process").required(true).args(["pid", "name"])))]
struct RunArgs {
    /// Connect to device <ID>
    #[arg(short, long)]
    device: Option<String>,
    /// Connect to USB device
    #[arg(short, long, conflicts_with = "remote")]
    usb: bool,
    /// Connect to remote device <IP[:PORT]> (port defaults to 27042)
    #[arg(short, long, value_name = "IP[:PORT]")]
    remote: Option<String>,
    /// Attach to process with PID
    #[arg(short, long, conflicts_with = "spawn")]
    pid: Option<u32>,
    /// Attach to process with name or path
    #[arg(short, long)]
    name: Option<String>,
    /// Start the named process instead of looking it up
    #[arg(short, long, requires = "name")]
    spawn: bool,
    /// Leave a spawned process suspended after loading scripts
    #[arg(long)]
    pause: bool,
    /// Script files, loaded in order
    #[arg(required = true, value_parser = existing_file)]
    files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    /// adb serial of the device; optional with a single device attached
    #[arg(short, long)]
    device: Option<String>,
    /// Server version to install instead of the local frida version
    #[arg(long)]
    server_version: Option<String>,
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("Script file {value} does not exist"))
    }
}

impl Cmd {
    fn name(&self) -> &'static str {
        match self {
            Cmd::Run(_) => "run",
            Cmd::Devices => "devices",
            Cmd::Provision(_) => "provision",
            Cmd::Config { .. } => "config",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let theme = Theme::detect(cli.no_color);
    if let Err(err) = hookrun_util::init_tracing() {
        eprintln!("failed to initialize logging: {err}");
    }
    hookrun_util::init_cli_telemetry("hookrun", env!("CARGO_PKG_VERSION"), cli.cmd.name());

    let cfg = HookrunConfig::load();
    let result = match cli.cmd {
        Cmd::Run(args) => run(args, &cfg, &theme).await,
        Cmd::Devices => devices(&cfg).await,
        Cmd::Provision(args) => provision(args, &cfg, &theme).await,
        Cmd::Config { write } => show_config(&cfg, write, &theme),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", theme.error(&err.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs, cfg: &HookrunConfig, theme: &Theme) -> Result<(), Box<dyn Error>> {
    let backend = FridaBackend::new(theme.clone());
    let query = DeviceQuery::new(args.usb, args.remote.as_deref(), args.device.as_deref());
    let device = select_device(backend.enumerate_devices(query.remote.as_deref())?, &query)?;
    tracing::info!("using {} ({})", device.name, device.id);

    let scripts = args
        .files
        .iter()
        .map(|path| ScriptSource::read(path).map_err(|err| read_error(path, err)))
        .collect::<Result<Vec<_>, _>>()?;
    let target = match (args.pid, args.name) {
        (Some(pid), _) => ProcessTarget::Pid(pid),
        (None, Some(name)) if args.spawn => ProcessTarget::Spawn(name),
        (None, Some(name)) => ProcessTarget::Name(name),
        (None, None) => return Err("Either --pid or --name must be specified".into()),
    };
    let request = SessionRequest {
        target,
        scripts,
        pause: args.pause,
    };

    let settings = ProvisionSettings::from_config(cfg);
    let fetcher = HttpFetcher::new(theme.clone(), cfg.download_progress)?;
    let orchestrator = Orchestrator::new(
        &backend,
        cfg.adb_path(),
        SystemRunner,
        &fetcher,
        &settings,
        theme,
    );

    match orchestrator.attach(&device, &request).await? {
        AttachOutcome::Attached(report) => {
            tracing::info!(
                "session for pid {} ended ({} scripts)",
                report.pid,
                report.scripts_loaded
            );
        }
        AttachOutcome::Provisioned(outcome) => {
            report_provisioned(&outcome, theme);
            eprintln!("{}", theme.info("Run the command again to attach."));
        }
    }
    Ok(())
}

fn read_error(path: &Path, err: std::io::Error) -> Box<dyn Error> {
    format!("failed to read {}: {err}", path.display()).into()
}

async fn devices(cfg: &HookrunConfig) -> Result<(), Box<dyn Error>> {
    let bridge = AdbBridge::new(cfg.adb_path(), None, SystemRunner);
    let devices = bridge.devices().await?;
    if devices.is_empty() {
        println!("No devices found.");
    }
    for device in devices {
        println!("{}\t{}\t{}", device.id, device.status, device.health());
    }
    Ok(())
}

async fn provision(
    args: ProvisionArgs,
    cfg: &HookrunConfig,
    theme: &Theme,
) -> Result<(), Box<dyn Error>> {
    let device_id = match args.device {
        Some(id) => id,
        None => {
            let bridge = AdbBridge::new(cfg.adb_path(), None, SystemRunner);
            let mut ready: Vec<_> = bridge
                .devices()
                .await?
                .into_iter()
                .filter(|device| device.is_ready())
                .collect();
            match ready.len() {
                0 => return Err(SelectError::NoDevices.into()),
                1 => ready.remove(0).id,
                count => return Err(SelectError::Multiple(count).into()),
            }
        }
    };

    let mut settings = ProvisionSettings::from_config(cfg);
    if let Some(version) = args.server_version {
        settings.framework_version = Some(version);
    }
    let backend = FridaBackend::new(theme.clone());
    let fetcher = HttpFetcher::new(theme.clone(), cfg.download_progress)?;
    let orchestrator = Orchestrator::new(
        &backend,
        cfg.adb_path(),
        SystemRunner,
        &fetcher,
        &settings,
        theme,
    );
    let outcome = orchestrator.provision(&device_id).await?;
    report_provisioned(&outcome, theme);
    Ok(())
}

fn show_config(cfg: &HookrunConfig, write: bool, theme: &Theme) -> Result<(), Box<dyn Error>> {
    if write {
        let path = cfg.save()?;
        eprintln!("{}", theme.info(&format!("Wrote {}", path.display())));
    }
    println!("{}", serde_json::to_string_pretty(cfg)?);
    Ok(())
}

fn report_provisioned(outcome: &ProvisionOutcome, theme: &Theme) {
    let verb = if outcome.installed { "Installed" } else { "Found" };
    eprintln!(
        "{}",
        theme.info(&format!("{verb} {}", outcome.plan.remote_path()))
    );
}
