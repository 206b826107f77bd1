//! Per-service process runner
//!
//! A [`Runner`] owns at most one child process. It is generic over the
//! process family: the [`FamilyStrategy`] supplies the executable, arguments
//! and output rules, while spawning, cleanup, termination and event emission
//! are shared.
//!
//! Events leave the runner on three bounded channels. Emission never waits:
//! when a channel is full the event is dropped so a slow consumer can not
//! stall the child's output pumps.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use launchpad_process::{
    signal_group, ExecutableResolver, GroupSignal, ManagedChild, OsSignaller, ProcessConfig,
    ProcessSearch, Signaller, SystemProcessSearch,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{Classified, OutputClassifier};
use crate::error::{Result, SupervisorError};
use crate::family::{FamilyStrategy, LaunchMode};
use crate::settings::SupervisorSettings;
use crate::types::{LogEntry, LogLevel, OutputStream, ServiceEnv, ServiceStatus};

/// How long the exit watcher waits for the pumps to flush trailing output
const PUMP_DRAIN: Duration = Duration::from_millis(500);

/// Quiet period after which the record being assembled is scanned for a URL
const IDLE_URL_SCAN: Duration = Duration::from_millis(300);

/// Upper bound on waiting for the watcher after a forced kill
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Collaborators shared by every runner
#[derive(Clone)]
pub struct RunnerContext {
    pub resolver: ExecutableResolver,
    pub search: Arc<dyn ProcessSearch>,
    pub signaller: Arc<dyn Signaller>,
    pub settings: SupervisorSettings,
}

impl RunnerContext {
    /// Context backed by the real operating system
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            resolver: ExecutableResolver::new(),
            search: Arc::new(SystemProcessSearch::new()),
            signaller: Arc::new(OsSignaller),
            settings,
        }
    }

    pub fn with_resolver(mut self, resolver: ExecutableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn ProcessSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }
}

impl Default for RunnerContext {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Receiving ends of a runner's event channels
#[derive(Debug)]
pub struct RunnerChannels {
    pub logs: mpsc::Receiver<LogEntry>,
    pub urls: mpsc::Receiver<String>,
    pub statuses: mpsc::Receiver<ServiceStatus>,
}

/// Non-blocking sending ends, cloned into every background task
#[derive(Debug, Clone)]
struct Emitter {
    logs: mpsc::Sender<LogEntry>,
    urls: mpsc::Sender<String>,
    statuses: mpsc::Sender<ServiceStatus>,
}

impl Emitter {
    fn log(&self, entry: LogEntry) {
        if self.logs.try_send(entry).is_err() {
            trace!("Log channel full or closed, dropping entry");
        }
    }

    fn supervisor(&self, level: LogLevel, message: impl Into<String>) {
        self.log(LogEntry::supervisor(level, message));
    }

    fn url(&self, url: String) {
        if self.urls.try_send(url).is_err() {
            trace!("URL channel full or closed, dropping url");
        }
    }

    fn status(&self, status: ServiceStatus) {
        if self.statuses.try_send(status).is_err() {
            trace!(status = %status, "Status channel full or closed, dropping status");
        }
    }

    fn classified(&self, item: Classified) {
        match item {
            Classified::Log(entry) => self.log(entry),
            Classified::Url(url) => self.url(url),
        }
    }
}

/// Bookkeeping for the child currently owned by a runner
#[derive(Debug)]
struct ActiveChild {
    pid: u32,
    /// Set before `stop` signals the child so the watcher stays quiet
    stopping: Arc<AtomicBool>,
    /// Flips to `true` once the watcher has reaped the child
    exited: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
}

impl ActiveChild {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

/// Owner of one child process for one service
#[derive(Debug)]
pub struct Runner {
    family: Arc<dyn FamilyStrategy>,
    path: PathBuf,
    env: ServiceEnv,
    context: Arc<RunnerContext>,
    emitter: Emitter,
    active: Option<ActiveChild>,
}

impl Runner {
    /// Create an idle runner and the receivers for its events
    ///
    /// `env` is the already-merged service environment.
    pub fn new(
        family: Arc<dyn FamilyStrategy>,
        path: impl Into<PathBuf>,
        env: ServiceEnv,
        context: Arc<RunnerContext>,
    ) -> (Self, RunnerChannels) {
        let settings = &context.settings;
        let (logs_tx, logs) = mpsc::channel(settings.log_channel_capacity.max(1));
        let (urls_tx, urls) = mpsc::channel(settings.url_channel_capacity.max(1));
        let (statuses_tx, statuses) = mpsc::channel(settings.status_channel_capacity.max(1));

        let runner = Self {
            family,
            path: path.into(),
            env,
            context,
            emitter: Emitter {
                logs: logs_tx,
                urls: urls_tx,
                statuses: statuses_tx,
            },
            active: None,
        };
        (runner, RunnerChannels { logs, urls, statuses })
    }

    pub fn family(&self) -> &Arc<dyn FamilyStrategy> {
        &self.family
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a child is owned and has not exited
    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.has_exited())
    }

    /// Pid of the owned child, if it is still running
    pub fn pid(&self) -> Option<u32> {
        self.active
            .as_ref()
            .filter(|a| !a.has_exited())
            .map(|a| a.pid)
    }

    /// Replace the working directory and environment used by the next start
    pub fn update_config(&mut self, path: impl Into<PathBuf>, env: ServiceEnv) {
        self.path = path.into();
        self.env = env;
    }

    /// Clean up stale processes, then spawn the child
    ///
    /// Emits `Starting`, then `Initializing` on success or `Error` plus an
    /// Error-level log entry when the executable can not be resolved or
    /// spawned.
    pub async fn start(&mut self, mode: LaunchMode) -> Result<()> {
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.active = None;

        self.emitter.status(ServiceStatus::Starting);
        self.cleanup().await;

        match self.spawn(mode) {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to start service");
                self.emitter.supervisor(LogLevel::Error, e.to_string());
                self.emitter.status(ServiceStatus::Error);
                Err(e)
            }
        }
    }

    /// Interrupt the child's process group, then force-kill it after the grace period
    ///
    /// Stopping a runner without a live child emits `Stopped` and succeeds.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take().filter(|a| !a.has_exited()) else {
            self.emitter.status(ServiceStatus::Stopped);
            return Ok(());
        };

        active.stopping.store(true, Ordering::SeqCst);
        self.emitter.status(ServiceStatus::Stopping);
        debug!(pid = %active.pid, "Stopping service process group");

        if let Err(e) = signal_group(active.pid, GroupSignal::Interrupt) {
            debug!(pid = %active.pid, error = %e, "Interrupt failed, escalating");
        }

        let grace = self.context.settings.stop_grace();
        let exited_in_grace = tokio::time::timeout(grace, active.exited.wait_for(|done| *done))
            .await
            .is_ok();

        // Descendants may outlive the leader, so the group is killed regardless.
        if let Err(e) = signal_group(active.pid, GroupSignal::Kill) {
            error!(pid = %active.pid, error = %e, "Failed to kill process group");
            self.emitter
                .supervisor(LogLevel::Error, format!("Failed to kill process {}: {e}", active.pid));
            active.stopping.store(false, Ordering::SeqCst);
            self.active = Some(active);
            return Err(SupervisorError::kill(e));
        }

        if !exited_in_grace
            && tokio::time::timeout(EXIT_WAIT, active.exited.wait_for(|done| *done))
                .await
                .is_err()
        {
            warn!(pid = %active.pid, "Process did not exit after kill");
            active.watcher.abort();
        }

        info!(pid = %active.pid, "Service process stopped");
        self.emitter.status(ServiceStatus::Stopped);
        Ok(())
    }

    /// Terminate processes left behind in the working directory
    ///
    /// Best effort: failures are logged and startup proceeds.
    async fn cleanup(&self) {
        let found = match self.context.search.find_by_working_directory(&self.path).await {
            Ok(found) => found,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Process search failed");
                self.emitter
                    .supervisor(LogLevel::Error, format!("Process search error: {e}"));
                return;
            }
        };

        for process in found {
            info!(pid = %process.pid, command = %process.command, "Terminating stale process");
            match self.reap(process.pid).await {
                Ok(()) => self.emitter.supervisor(
                    LogLevel::Info,
                    format!("Terminated stale process {} ({})", process.pid, process.command),
                ),
                Err(e) => {
                    warn!(pid = %process.pid, error = %e, "Failed to terminate stale process");
                    self.emitter.supervisor(
                        LogLevel::Error,
                        format!("Failed to kill process {}: {e}", process.pid),
                    );
                }
            }
        }
    }

    async fn reap(&self, pid: u32) -> launchpad_process::Result<()> {
        let signaller = &self.context.signaller;
        signaller.terminate(pid)?;
        tokio::time::sleep(self.context.settings.reap_wait()).await;
        if signaller.is_alive(pid) {
            debug!(pid = %pid, "Still alive after terminate, forcing");
            signaller.force_kill(pid)?;
        }
        Ok(())
    }

    fn spawn(&self, mode: LaunchMode) -> Result<ActiveChild> {
        let executable = self
            .context
            .resolver
            .resolve(self.family.executable())
            .map_err(SupervisorError::spawn)?;
        self.emitter.supervisor(
            LogLevel::Info,
            format!("Using {} at: {}", self.family.executable(), executable.display()),
        );

        let mut env = self.env.clone();
        self.family.prepare_env(&executable, &mut env);

        let config = ProcessConfig::new(&executable)
            .args(self.family.args(mode))
            .working_dir(&self.path)
            .envs(env);
        let mut child = ManagedChild::spawn(&config).map_err(SupervisorError::spawn)?;
        let pid = child.pid();

        // Initializing goes out before any task can report an exit.
        self.emitter.status(ServiceStatus::Initializing);

        let rules = self.family.rules();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout() {
            let classifier = OutputClassifier::new(rules.clone(), OutputStream::Stdout);
            pumps.push(tokio::spawn(pump(stdout, classifier, self.emitter.clone())));
        }
        if let Some(stderr) = child.stderr() {
            let classifier = OutputClassifier::new(rules, OutputStream::Stderr);
            pumps.push(tokio::spawn(pump(stderr, classifier, self.emitter.clone())));
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited) = watch::channel(false);
        let watcher = tokio::spawn(watch_exit(
            child,
            pumps,
            stopping.clone(),
            exited_tx,
            self.emitter.clone(),
        ));

        Ok(ActiveChild {
            pid,
            stopping,
            exited,
            watcher,
        })
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            if !active.has_exited() {
                active.stopping.store(true, Ordering::SeqCst);
                let _ = signal_group(active.pid, GroupSignal::Kill);
            }
            active.watcher.abort();
        }
    }
}

/// Read one pipe line by line into the classifier until it closes
///
/// Records are only completed by the classifier itself. When the pipe goes
/// quiet for [`IDLE_URL_SCAN`] the buffered record is scanned for a listening
/// URL, so a server that idles right after its banner still reports it.
async fn pump<R>(reader: R, mut classifier: OutputClassifier, emitter: Emitter)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        // Partial reads stay in `buf` when the timeout fires.
        match tokio::time::timeout(IDLE_URL_SCAN, reader.read_until(b'\n', &mut buf)).await {
            Err(_) => {
                for item in classifier.pending_urls() {
                    emitter.classified(item);
                }
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                push_line(&mut classifier, &buf, &emitter);
                buf.clear();
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }

    if !buf.is_empty() {
        push_line(&mut classifier, &buf, &emitter);
    }
    for item in classifier.finish() {
        emitter.classified(item);
    }
}

fn push_line(classifier: &mut OutputClassifier, raw: &[u8], emitter: &Emitter) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    for item in classifier.push_line(line) {
        emitter.classified(item);
    }
}

/// Wait for the child, let the pumps flush, then report how it ended
async fn watch_exit(
    mut child: ManagedChild,
    pumps: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
    exited: watch::Sender<bool>,
    emitter: Emitter,
) {
    let pid = child.pid();
    let outcome = child.wait().await;

    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout(PUMP_DRAIN, pump).await.is_err() {
            // A descendant outside the group still holds the pipe open.
            abort.abort();
        }
    }

    if !stopping.load(Ordering::SeqCst) {
        match exit_failure(&outcome) {
            None => {
                info!(pid = %pid, "Service process exited");
                emitter.status(ServiceStatus::Stopped);
            }
            Some(reason) => {
                warn!(pid = %pid, reason = %reason, "Service process exited abnormally");
                emitter.supervisor(LogLevel::Error, reason);
                emitter.status(ServiceStatus::Error);
            }
        }
    }

    let _ = exited.send(true);
}

fn exit_failure(outcome: &launchpad_process::Result<ExitStatus>) -> Option<String> {
    match outcome {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("Process exited with {status}")),
        Err(e) => Some(format!("Failed to wait for process: {e}")),
    }
}
