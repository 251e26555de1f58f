//! Browser Supervisor - secures a reachable CDP endpoint
//!
//! Remote first (if configured), else a locally spawned browser whose
//! debug address is scraped from its stderr before a startup deadline.
//!
//! ```text
//! Starting → AwaitingAddress ─┬─ banner line ──→ Ready
//!                             ├─ deadline ─────→ Failed
//!                             └─ process exit ─→ Terminated
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::config::{ExportConfig, RemoteBrowser};
use crate::error::{PdfError, Result};
use crate::tempdir::TemporaryDirectory;
use crate::version::{parse_major_version, VersionProbe};

/// Line a browser prints once its debugging endpoint is up.
///
/// First group is `ip:port`, second the browser id.
static DEVTOOLS_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"DevTools listening on ws://((?:\d+\.?){4}:\d+)/devtools/browser/([\w-]+)")
        .unwrap()
});

/// Flags every local browser is started with
const LAUNCH_FLAGS: &[&str] = &[
    "--headless",
    "--disable-gpu",
    "--no-sandbox",
    "--no-first-run",
    "--disable-dev-shm-usage",
    "--remote-debugging-port=0",
];

/// Where a browser's debugging endpoint lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerAddress {
    pub host: String,
    pub port: u16,
    pub browser_id: String,
}

impl DebuggerAddress {
    pub fn new(host: impl Into<String>, port: u16, browser_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            browser_id: browser_id.into(),
        }
    }

    /// Parse the DevTools banner out of a line of browser output
    pub fn from_banner(line: &str) -> Option<Self> {
        let caps = DEVTOOLS_BANNER.captures(line.trim())?;
        let (host, port) = caps[1].rsplit_once(':')?;

        Some(Self::new(host, port.parse().ok()?, &caps[2]))
    }

    pub fn browser_url(&self) -> String {
        format!(
            "ws://{}:{}/devtools/browser/{}",
            self.host, self.port, self.browser_id
        )
    }

    pub fn page_url(&self, target_id: &str) -> String {
        format!("ws://{}:{}/devtools/page/{}", self.host, self.port, target_id)
    }
}

/// Startup phases of a local browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Starting,
    AwaitingAddress,
    Ready(DebuggerAddress),
    Failed,
    Terminated,
}

/// Drives [`LaunchState`] from process output, deadline expiry and exit
#[derive(Debug)]
pub struct StartupMonitor {
    state: LaunchState,
    timeout: Duration,
}

impl StartupMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: LaunchState::Starting,
            timeout,
        }
    }

    pub fn state(&self) -> &LaunchState {
        &self.state
    }

    pub fn spawned(&mut self) {
        if self.state == LaunchState::Starting {
            self.state = LaunchState::AwaitingAddress;
        }
    }

    /// The deadline only counts while the address is outstanding; leaving
    /// that state cancels it.
    pub fn timer_armed(&self) -> bool {
        self.state == LaunchState::AwaitingAddress
    }

    pub fn on_output(&mut self, line: &str) -> Option<DebuggerAddress> {
        if self.state != LaunchState::AwaitingAddress {
            return None;
        }

        let address = DebuggerAddress::from_banner(line)?;
        self.state = LaunchState::Ready(address.clone());
        Some(address)
    }

    pub fn on_deadline(&mut self) -> PdfError {
        self.state = LaunchState::Failed;
        PdfError::StartupTimeout(self.timeout)
    }

    pub fn on_exit(&mut self, status: ExitStatus) -> PdfError {
        self.state = LaunchState::Terminated;
        PdfError::ProcessExited {
            code: status.code(),
            signal: exit_signal(&status),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// A browser process spawned by us, with its profile directory
#[derive(Debug)]
pub struct LocalBrowser {
    child: Child,
    profile: Option<TemporaryDirectory>,
    output: Option<JoinHandle<()>>,
}

impl LocalBrowser {
    /// Kill the process and remove its profile directory
    pub async fn terminate(mut self) {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => Ok(status),
            _ => {
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!("Failed to signal browser process: {}", e);
                }
                self.child.wait().await
            }
        };

        match status {
            Ok(status) => tracing::debug!(
                "Browser terminated by signal {:?} and exited with code {:?}",
                exit_signal(&status),
                status.code()
            ),
            Err(e) => tracing::warn!("Failed to reap browser process: {}", e),
        }

        if let Some(output) = self.output.take() {
            output.abort();
        }

        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                tracing::warn!("Failed to remove browser profile {}: {}", path.display(), e);
            }
        }
    }
}

/// A reachable CDP endpoint, owning the local process if there is one
#[derive(Debug)]
pub struct Endpoint {
    address: DebuggerAddress,
    process: Option<LocalBrowser>,
}

impl Endpoint {
    pub fn remote(address: DebuggerAddress) -> Self {
        Self {
            address,
            process: None,
        }
    }

    pub fn address(&self) -> &DebuggerAddress {
        &self.address
    }

    pub fn is_local(&self) -> bool {
        self.process.is_some()
    }

    /// Terminate the local process, if any. Remote browsers are left alone.
    pub async fn release(self) {
        if let Some(process) = self.process {
            process.terminate().await;
        }
    }
}

fn shell_escape(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Render name/value pairs as a shell-escaped string.
///
/// A name ending with `=` is glued to its value, other names are separated
/// by a space. Used for log lines only, processes are spawned without a shell.
pub fn render_argument_list(arguments: &[(&str, Option<&str>)]) -> String {
    arguments
        .iter()
        .map(|(name, value)| match value {
            Some(value) if name.ends_with('=') => format!("{}{}", shell_escape(name), shell_escape(value)),
            Some(value) => format!("{} {}", shell_escape(name), shell_escape(value)),
            None => shell_escape(name),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn launch_arguments(home: &str) -> Vec<(&'static str, Option<&str>)> {
    LAUNCH_FLAGS
        .iter()
        .map(|flag| (*flag, None))
        .chain([("--homedir=", Some(home)), ("--user-data-dir=", Some(home))])
        .collect()
}

/// Build the launch command for the given OS (`std::env::consts::OS` values)
pub fn launch_command_for(os: &str, binary: &Path, home: &Path) -> Result<Command> {
    let home_str = home.to_string_lossy();
    let arguments = launch_arguments(&home_str);
    let command_line = format!(
        "{} {}",
        shell_escape(&binary.to_string_lossy()),
        render_argument_list(&arguments)
    );

    let mut command = Command::new(binary);
    for (name, value) in &arguments {
        match value {
            Some(value) => command.arg(format!("{}{}", name, value)),
            None => command.arg(name),
        };
    }

    match os {
        "linux" | "macos" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" | "solaris"
        | "illumos" => {
            // Spawned in place, so signals reach the browser and not a wrapping shell
            tracing::debug!(
                "Starting browser process: HOME={} exec {}",
                home.display(),
                command_line
            );
            command.env("HOME", home);
        }
        "windows" => {
            tracing::debug!("Starting browser process: {}", command_line);
        }
        other => return Err(PdfError::UnsupportedPlatform(other.to_string())),
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    Ok(command)
}

pub fn launch_command(binary: &Path, home: &Path) -> Result<Command> {
    launch_command_for(std::env::consts::OS, binary, home)
}

/// Keep reading browser output so the process never blocks on a full pipe
fn drain_output(mut lines: tokio::io::Lines<BufReader<ChildStderr>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("Caught browser output: {}", line);
        }
    })
}

/// Resolves endpoints according to an [`ExportConfig`]
pub struct Supervisor {
    config: ExportConfig,
    probe: VersionProbe,
}

impl Supervisor {
    pub fn new(config: ExportConfig) -> Result<Self> {
        let probe = VersionProbe::new(config.probe_timeout)?;
        Ok(Self { config, probe })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Remote browser if reachable, else a freshly launched local one
    pub async fn acquire_endpoint(&self) -> Result<Endpoint> {
        if let Some(remote) = &self.config.remote {
            match self.try_remote(remote).await {
                Ok(address) => return Ok(Endpoint::remote(address)),
                Err(e) => self.fall_back(remote, e)?,
            }
        }

        match &self.config.binary {
            Some(binary) => self.launch_local(binary).await,
            None => Err(PdfError::NoBrowserAvailable),
        }
    }

    /// Local endpoint standing in for a remote one that dropped mid-render.
    ///
    /// Only connectivity failures are recovered, and only with a binary configured.
    pub async fn recover(&self, error: PdfError) -> Result<Endpoint> {
        match (&self.config.remote, &self.config.binary) {
            (Some(remote), Some(binary)) if error.is_connectivity() => {
                self.fall_back(remote, error)?;
                self.launch_local(binary).await
            }
            _ => Err(error),
        }
    }

    /// Major version of the configured browser; `None` if it can't be parsed
    pub async fn browser_version(&self) -> Result<Option<u32>> {
        if let Some(remote) = &self.config.remote {
            let fetched = self
                .probe
                .fetch(&remote.host, remote.port)
                .await
                .and_then(|version| version.ok_or_else(|| unavailable(remote)));

            match fetched {
                Ok(version) => return Ok(version.major_version()),
                Err(e) => self.fall_back(remote, e)?,
            }
        }

        match &self.config.binary {
            Some(binary) => local_version(binary).await,
            None => Err(PdfError::NoBrowserAvailable),
        }
    }

    async fn try_remote(&self, remote: &RemoteBrowser) -> Result<DebuggerAddress> {
        let version = self
            .probe
            .fetch(&remote.host, remote.port)
            .await?
            .ok_or_else(|| unavailable(remote))?;

        Ok(DebuggerAddress::new(
            remote.host.clone(),
            remote.port,
            version.browser_id()?,
        ))
    }

    /// Without a local binary the remote failure is final
    fn fall_back(&self, remote: &RemoteBrowser, error: PdfError) -> Result<()> {
        if self.config.binary.is_none() {
            return Err(error);
        }

        tracing::warn!(
            "Failed to connect to remote chrome: {}:{} ({})",
            remote.host,
            remote.port,
            error
        );
        Ok(())
    }

    async fn launch_local(&self, binary: &Path) -> Result<Endpoint> {
        let profile = TemporaryDirectory::create(self.config.temp_root.as_deref())?;

        match self.spawn_browser(binary, &profile).await {
            Ok((child, address, output)) => Ok(Endpoint {
                address,
                process: Some(LocalBrowser {
                    child,
                    profile: Some(profile),
                    output: Some(output),
                }),
            }),
            Err(e) => {
                if let Err(cleanup) = profile.close() {
                    tracing::warn!("Failed to remove browser profile: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn spawn_browser(
        &self,
        binary: &Path,
        profile: &TemporaryDirectory,
    ) -> Result<(Child, DebuggerAddress, JoinHandle<()>)> {
        let home = profile.resolve_path("HOME")?;
        tokio::fs::create_dir_all(&home).await?;

        let mut child = launch_command(binary, &home)?.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "browser stderr not captured"))?;
        let mut lines = BufReader::new(stderr).lines();

        let mut monitor = StartupMonitor::new(self.config.startup_timeout);
        monitor.spawned();

        let deadline = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(deadline);
        let mut stderr_open = true;
        let mut exit_status: Option<ExitStatus> = None;

        let outcome = loop {
            tokio::select! {
                _ = &mut deadline, if monitor.timer_armed() => {
                    break Err(monitor.on_deadline());
                }
                line = lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        tracing::debug!("Caught browser output: {}", line);
                        if let Some(address) = monitor.on_output(&line) {
                            break Ok(address);
                        }
                    }
                    Ok(None) => {
                        stderr_open = false;
                        if let Some(status) = exit_status {
                            break Err(monitor.on_exit(status));
                        }
                    }
                    Err(e) => break Err(PdfError::Io(e)),
                },
                status = child.wait(), if exit_status.is_none() => match status {
                    // Output written right before exiting may still be buffered
                    Ok(status) if stderr_open => exit_status = Some(status),
                    Ok(status) => break Err(monitor.on_exit(status)),
                    Err(e) => break Err(PdfError::Io(e)),
                },
            }
        };

        match outcome {
            Ok(address) => {
                tracing::info!("Browser is listening on {}:{}", address.host, address.port);
                Ok((child, address, drain_output(lines)))
            }
            Err(e) => {
                if monitor.state() == &LaunchState::Failed {
                    if let Err(kill) = child.start_kill() {
                        tracing::debug!("Failed to signal browser process: {}", kill);
                    }
                    if let Err(reap) = child.wait().await {
                        tracing::debug!("Failed to reap browser process: {}", reap);
                    }
                    tracing::error!(
                        "Terminated browser process after {} seconds elapsed without the expected output",
                        self.config.startup_timeout.as_secs_f64()
                    );
                }
                Err(e)
            }
        }
    }
}

fn unavailable(remote: &RemoteBrowser) -> PdfError {
    PdfError::VersionUnavailable {
        host: remote.host.clone(),
        port: remote.port,
    }
}

async fn local_version(binary: &Path) -> Result<Option<u32>> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(PdfError::VersionCommand(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(parse_major_version(&String::from_utf8_lossy(&output.stdout)))
}
