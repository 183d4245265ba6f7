use std::ffi::OsString;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lsp_types::notification::{DidChangeWatchedFiles, Exit, Notification};
use lsp_types::DidChangeWatchedFilesParams;
use tracing::{debug, info, warn};

use crate::acquire::{AcquireOutcome, Acquirer, ResolvedServer};
use crate::codec::{FrameReader, FrameWriter};
use crate::config::ClientConfig;
use crate::update::{UpdateCheck, UpdateCheckOutcome};
use crate::watch::{HostFileEvent, WatchedFilesForwarder};

const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ServerCommand {
    /// The acquired binary is launched without arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// A running language-server session, seen from the acquisition side.
pub trait LanguageSession: Send {
    /// Passes one editor message through to the server unchanged.
    fn send_message(&mut self, message: &serde_json::Value) -> Result<()>;

    fn did_change_watched_files(&mut self, params: DidChangeWatchedFilesParams) -> Result<()>;

    fn shutdown(self: Box<Self>) -> Result<()>;
}

pub trait SessionLauncher {
    fn launch(&self, command: &ServerCommand) -> Result<Box<dyn LanguageSession>>;
}

/// Spawns the server as a child process speaking LSP over stdio.
///
/// The server writes straight to the inherited stdout; everything it reads
/// goes through the session so watched-file changes can be rewritten.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher {
    extra_args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments appended to every launched server command.
    pub fn with_args(mut self, args: Vec<OsString>) -> Self {
        self.extra_args = args;
        self
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch(&self, command: &ServerCommand) -> Result<Box<dyn LanguageSession>> {
        let mut command = command.clone();
        command.args.extend(self.extra_args.iter().cloned());
        let mut child = command
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start {}", command.program.display()))?;
        let stdin = child
            .stdin
            .take()
            .context("language server stdin was not captured")?;
        info!(pid = child.id(), program = %command.program.display(), "language server started");
        Ok(Box::new(ProcessSession {
            child,
            writer: Some(FrameWriter::new(stdin)),
        }))
    }
}

struct ProcessSession {
    child: Child,
    writer: Option<FrameWriter<ChildStdin>>,
}

impl ProcessSession {
    fn writer(&mut self) -> Result<&mut FrameWriter<ChildStdin>> {
        self.writer
            .as_mut()
            .context("language server input is already closed")
    }
}

impl LanguageSession for ProcessSession {
    fn send_message(&mut self, message: &serde_json::Value) -> Result<()> {
        self.writer()?.write_frame(message)
    }

    fn did_change_watched_files(&mut self, params: DidChangeWatchedFilesParams) -> Result<()> {
        self.writer()?
            .write_notification(DidChangeWatchedFiles::METHOD, &params)
    }

    fn shutdown(mut self: Box<Self>) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.write_notification(Exit::METHOD, &serde_json::Value::Null) {
                debug!(error = %format!("{err:#}"), "failed sending exit notification");
            }
        }

        let deadline = Instant::now() + EXIT_GRACE_PERIOD;
        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .context("failed polling language server")?
            {
                debug!(%status, "language server exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(pid = self.child.id(), "language server did not exit in time, killing");
        self.child.kill().context("failed killing language server")?;
        self.child
            .wait()
            .context("failed reaping language server")?;
        Ok(())
    }
}

/// A started session plus everything that outlives acquisition.
pub struct ClientHandle {
    resolved: ResolvedServer,
    session: Box<dyn LanguageSession>,
    forwarder: WatchedFilesForwarder,
    update_check: Option<UpdateCheck>,
}

impl ClientHandle {
    pub fn resolved(&self) -> &ResolvedServer {
        &self.resolved
    }

    /// Forwards host file events to the server. Returns how many file
    /// changes were sent.
    pub fn forward_file_events(&mut self, events: &[HostFileEvent]) -> Result<usize> {
        let Some(params) = self.forwarder.translate(events) else {
            return Ok(0);
        };
        let count = params.changes.len();
        self.session.did_change_watched_files(params)?;
        Ok(count)
    }

    /// Relays editor messages from `input` to the server until the editor
    /// closes its end. Watched-file notifications are expanded on the way
    /// through; everything else is passed on as-is. Returns how many
    /// messages were read.
    pub fn relay_editor_input<R: BufRead>(&mut self, input: R) -> Result<usize> {
        let mut reader = FrameReader::new(input);
        let mut relayed = 0;
        while let Some(message) = reader.read_frame().context("reading editor message")? {
            relayed += 1;
            let method = message.get("method").and_then(serde_json::Value::as_str);
            if method == Some(DidChangeWatchedFiles::METHOD) {
                self.forward_editor_file_events(&message)?;
                continue;
            }
            self.session
                .send_message(&message)
                .context("forwarding editor message to language server")?;
            if method == Some(Exit::METHOD) {
                debug!("editor requested exit");
                break;
            }
        }
        Ok(relayed)
    }

    fn forward_editor_file_events(&mut self, message: &serde_json::Value) -> Result<()> {
        let params = message
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let params: DidChangeWatchedFilesParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                warn!(error = %err, "passing through unreadable watched-files notification");
                return self.session.send_message(message);
            }
        };
        let events = params
            .changes
            .iter()
            .filter_map(HostFileEvent::from_lsp)
            .collect::<Vec<_>>();
        self.forward_file_events(&events)?;
        Ok(())
    }

    pub fn take_update_check(&mut self) -> Option<UpdateCheck> {
        self.update_check.take()
    }
}

/// Acquires a server binary and launches a session on it.
///
/// `Ok(None)` means the user cancelled the download. Acquisition failures are
/// returned as errors carrying the underlying cause.
pub fn start_client(
    acquirer: &Acquirer,
    config: &ClientConfig,
    launcher: &dyn SessionLauncher,
) -> Result<Option<ClientHandle>> {
    let forwarder = WatchedFilesForwarder::new(&config.watch_patterns)?;
    let acquisition = acquirer.acquire(config.server_path.as_deref());
    let resolved = match acquisition.outcome {
        AcquireOutcome::Resolved(resolved) => resolved,
        AcquireOutcome::Cancelled => return Ok(None),
        AcquireOutcome::Failed(err) => {
            return Err(err).context("failed to acquire flatbuffers-language-server");
        }
    };

    let session = launcher.launch(&ServerCommand::new(&resolved.path))?;
    Ok(Some(ClientHandle {
        resolved,
        session,
        forwarder,
        update_check: acquisition.update_check,
    }))
}

/// Shuts the session down, then waits for a pending update check so an
/// install in progress is never cut off by process exit.
pub fn stop_client(handle: ClientHandle) -> Result<Option<UpdateCheckOutcome>> {
    let ClientHandle {
        session,
        update_check,
        ..
    } = handle;
    session.shutdown()?;

    let Some(check) = update_check else {
        return Ok(None);
    };
    if !check.is_finished() {
        info!("waiting for background update check to finish");
    }
    Ok(check.wait())
}
