use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::BridgeError;

/// An executable plus its argument vector. Command lines given as text are
/// split on whitespace; no shell is involved on the host side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).args(words))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends the whitespace-separated words of `line`.
    pub fn split_args(self, line: &str) -> Self {
        self.args(line.split_whitespace())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamIo {
    /// stdin, stdout and stderr are pipes the caller owns.
    Piped,
    /// All three streams go to the null device.
    Discard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Text,
    Raw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BufferedOptions {
    pub encoding: Encoding,
    pub suppress_error_stream: bool,
}

impl BufferedOptions {
    /// Non-empty stderr fails the call.
    pub const fn strict() -> Self {
        Self {
            encoding: Encoding::Text,
            suppress_error_stream: false,
        }
    }

    /// stderr is folded into the returned text instead of failing the call.
    pub const fn lenient() -> Self {
        Self {
            encoding: Encoding::Text,
            suppress_error_stream: true,
        }
    }

    pub const fn raw() -> Self {
        Self {
            encoding: Encoding::Raw,
            suppress_error_stream: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeMode {
    Streaming(StreamIo),
    Buffered(BufferedOptions),
}

impl InvokeMode {
    pub const fn strict() -> Self {
        InvokeMode::Buffered(BufferedOptions::strict())
    }

    pub const fn lenient() -> Self {
        InvokeMode::Buffered(BufferedOptions::lenient())
    }

    pub const fn raw() -> Self {
        InvokeMode::Buffered(BufferedOptions::raw())
    }
}

impl Default for InvokeMode {
    fn default() -> Self {
        InvokeMode::strict()
    }
}

/// What an invocation produced; the variant follows the requested mode.
#[derive(Debug)]
pub enum CommandOutput {
    Handle(Child),
    Text(String),
    Bytes { stdout: Vec<u8>, stderr: Vec<u8> },
}

impl CommandOutput {
    fn kind(&self) -> &'static str {
        match self {
            CommandOutput::Handle(_) => "process handle",
            CommandOutput::Text(_) => "text",
            CommandOutput::Bytes { .. } => "raw",
        }
    }

    pub fn into_text(self) -> Result<String, BridgeError> {
        match self {
            CommandOutput::Text(text) => Ok(text),
            other => Err(BridgeError::UnexpectedOutput {
                expected: "text",
                actual: other.kind(),
            }),
        }
    }

    pub fn into_handle(self) -> Result<Child, BridgeError> {
        match self {
            CommandOutput::Handle(child) => Ok(child),
            other => Err(BridgeError::UnexpectedOutput {
                expected: "process handle",
                actual: other.kind(),
            }),
        }
    }

    pub fn into_bytes(self) -> Result<(Vec<u8>, Vec<u8>), BridgeError> {
        match self {
            CommandOutput::Bytes { stdout, stderr } => Ok((stdout, stderr)),
            other => Err(BridgeError::UnexpectedOutput {
                expected: "raw",
                actual: other.kind(),
            }),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn invoke(
        &self,
        command: &CommandLine,
        mode: InvokeMode,
    ) -> Result<CommandOutput, BridgeError>;
}

/// Runs commands as host processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn invoke(
        &self,
        command: &CommandLine,
        mode: InvokeMode,
    ) -> Result<CommandOutput, BridgeError> {
        match mode {
            InvokeMode::Streaming(io) => spawn_streaming(command, io).map(CommandOutput::Handle),
            InvokeMode::Buffered(options) => {
                let captured = run_buffered(command).await?;
                apply_policy(command, options, captured)
            }
        }
    }
}

/// Gives up ownership of a launched process. Nothing waits on, restarts or
/// kills it afterwards; it outlives this process unless the OS says otherwise.
pub fn detach(child: Child) {
    match child.id() {
        Some(pid) => tracing::info!("detached process pid={pid}"),
        None => tracing::info!("detached process (already exited)"),
    }
    drop(child);
}

fn spawn_failure(command: &CommandLine, err: io::Error) -> BridgeError {
    if err.kind() == io::ErrorKind::NotFound {
        BridgeError::NotFound {
            program: command.program().display().to_string(),
        }
    } else {
        BridgeError::Io {
            command: command.to_string(),
            source: err,
        }
    }
}

fn spawn_streaming(command: &CommandLine, io: StreamIo) -> Result<Child, BridgeError> {
    let mut cmd = command.command();
    match io {
        StreamIo::Piped => cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped()),
        StreamIo::Discard => cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null()),
    };
    tracing::debug!("spawning {command}");
    cmd.spawn().map_err(|e| spawn_failure(command, e))
}

/// Exit status and both streams of a finished command.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub(crate) status: Option<i32>,
    pub(crate) success: bool,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
}

async fn run_buffered(command: &CommandLine) -> Result<Captured, BridgeError> {
    let mut cmd = command.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    tracing::debug!("running {command}");
    let output = cmd
        .output()
        .await
        .map_err(|e| spawn_failure(command, e))?;
    Ok(Captured {
        status: output.status.code(),
        success: output.status.success(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

pub(crate) fn apply_policy(
    command: &CommandLine,
    options: BufferedOptions,
    captured: Captured,
) -> Result<CommandOutput, BridgeError> {
    if options.encoding == Encoding::Raw {
        if !captured.success {
            return Err(exit_failure(command, &captured));
        }
        return Ok(CommandOutput::Bytes {
            stdout: captured.stdout,
            stderr: captured.stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&captured.stdout);
    let stderr = String::from_utf8_lossy(&captured.stderr);

    if !options.suppress_error_stream && !stderr.is_empty() {
        return Err(BridgeError::Stderr {
            command: command.to_string(),
            detail: stderr.into_owned(),
        });
    }
    if !captured.success {
        return Err(exit_failure(command, &captured));
    }

    Ok(CommandOutput::Text(
        format!("{stdout}\n{stderr}").trim_end().to_string(),
    ))
}

fn exit_failure(command: &CommandLine, captured: &Captured) -> BridgeError {
    BridgeError::Exit {
        command: command.to_string(),
        status: captured.status.unwrap_or(-1),
        stdout: String::from_utf8_lossy(&captured.stdout).to_string(),
        stderr: String::from_utf8_lossy(&captured.stderr).to_string(),
    }
}
