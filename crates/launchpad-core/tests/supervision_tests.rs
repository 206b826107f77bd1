//! End-to-end supervision tests driving real `/bin/sh` children
#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use launchpad_core::classifier::{DotnetRules, OutputRules};
use launchpad_core::{
    EventPayload, FamilyStrategy, InMemoryEventPublisher, LaunchMode, LogEntry, LogLevel, Runner,
    RunnerChannels, RunnerContext, Service, ServiceConfig, ServiceEnv, ServiceStatus,
    SupervisorError, SupervisorSettings,
};
use launchpad_process::{ProcessError, ProcessInfo, ProcessSearch, Signaller};
use parking_lot::Mutex;

/// Runs a shell script instead of a dev server
#[derive(Debug)]
struct ShellFamily {
    script: String,
}

impl ShellFamily {
    fn new(script: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: script.into(),
        })
    }
}

impl FamilyStrategy for ShellFamily {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn executable(&self) -> &str {
        "sh"
    }

    fn args(&self, _mode: LaunchMode) -> Vec<String> {
        vec!["-c".to_string(), self.script.clone()]
    }

    fn rules(&self) -> Arc<dyn OutputRules> {
        Arc::new(DotnetRules)
    }
}

/// Search returning a fixed list of stale processes
#[derive(Default)]
struct StaleProcesses {
    found: Vec<ProcessInfo>,
    calls: AtomicUsize,
}

impl StaleProcesses {
    fn with_pid(pid: u32) -> Arc<Self> {
        Arc::new(Self {
            found: vec![ProcessInfo {
                pid,
                command: "node vite".to_string(),
                cwd: None,
            }],
            calls: AtomicUsize::new(0),
        })
    }

    fn none() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ProcessSearch for StaleProcesses {
    async fn find_by_working_directory(
        &self,
        _path: &Path,
    ) -> launchpad_process::Result<Vec<ProcessInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.found.clone())
    }
}

/// Records every signalling call instead of touching real processes
#[derive(Default)]
struct RecordingSignaller {
    calls: Mutex<Vec<String>>,
    survives_terminate: bool,
    refuses_terminate: bool,
}

impl RecordingSignaller {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Signaller for RecordingSignaller {
    fn terminate(&self, pid: u32) -> launchpad_process::Result<()> {
        self.calls.lock().push(format!("terminate {pid}"));
        if self.refuses_terminate {
            return Err(ProcessError::KillFailed {
                pid,
                reason: "Operation not permitted".to_string(),
            });
        }
        Ok(())
    }

    fn force_kill(&self, pid: u32) -> launchpad_process::Result<()> {
        self.calls.lock().push(format!("force_kill {pid}"));
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.calls.lock().push(format!("is_alive {pid}"));
        self.survives_terminate
    }
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        stop_grace_ms: 100,
        reap_wait_ms: 10,
        log_channel_capacity: 1000,
        ..SupervisorSettings::default()
    }
}

fn context(search: Arc<dyn ProcessSearch>, signaller: Arc<dyn Signaller>) -> Arc<RunnerContext> {
    Arc::new(
        RunnerContext::new(settings())
            .with_search(search)
            .with_signaller(signaller),
    )
}

fn runner(script: &str, context: Arc<RunnerContext>) -> (Runner, RunnerChannels) {
    let dir = std::env::temp_dir();
    Runner::new(ShellFamily::new(script), dir, ServiceEnv::new(), context)
}

fn service(
    script: &str,
    inherited: ServiceEnv,
    env: ServiceEnv,
    publisher: Arc<InMemoryEventPublisher>,
) -> Service {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::new("shell", dir.into_path(), "shell").with_env(env);
    Service::with_family(
        launchpad_core::generate_id(),
        config,
        inherited,
        ShellFamily::new(script),
        context(StaleProcesses::none(), Arc::new(RecordingSignaller::default())),
        publisher,
    )
}

fn env(pairs: &[(&str, &str)]) -> ServiceEnv {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn drain_logs(channels: &mut RunnerChannels) -> Vec<LogEntry> {
    let mut logs = Vec::new();
    while let Ok(entry) = channels.logs.try_recv() {
        logs.push(entry);
    }
    logs
}

fn drain_statuses(channels: &mut RunnerChannels) -> Vec<ServiceStatus> {
    let mut statuses = Vec::new();
    while let Ok(status) = channels.statuses.try_recv() {
        statuses.push(status);
    }
    statuses
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition met within timeout");
}

fn published_statuses(publisher: &InMemoryEventPublisher) -> Vec<ServiceStatus> {
    publisher
        .events()
        .into_iter()
        .filter_map(|event| match event.payload {
            EventPayload::StatusUpdate { status, .. } => Some(status),
            EventPayload::NewLog { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn stale_process_is_terminated_and_rechecked_before_spawn() {
    let signaller = Arc::new(RecordingSignaller::default());
    let (mut runner, mut channels) = runner(
        "sleep 30",
        context(StaleProcesses::with_pid(4242), signaller.clone()),
    );

    runner.start(LaunchMode::Standard).await.unwrap();

    assert_eq!(signaller.calls(), vec!["terminate 4242", "is_alive 4242"]);

    let logs = drain_logs(&mut channels);
    let reaped: Vec<&LogEntry> = logs
        .iter()
        .filter(|e| e.level == LogLevel::Info && e.message.contains("4242"))
        .collect();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].message, "Terminated stale process 4242 (node vite)");

    let reaped_at = logs.iter().position(|e| e.message.contains("4242")).unwrap();
    let spawned_at = logs
        .iter()
        .position(|e| e.message.starts_with("Using sh at: "))
        .unwrap();
    assert!(reaped_at < spawned_at);

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn surviving_stale_process_is_force_killed() {
    let signaller = Arc::new(RecordingSignaller {
        survives_terminate: true,
        ..RecordingSignaller::default()
    });
    let (mut runner, _channels) = runner(
        "sleep 30",
        context(StaleProcesses::with_pid(4242), signaller.clone()),
    );

    runner.start(LaunchMode::Standard).await.unwrap();
    assert_eq!(
        signaller.calls(),
        vec!["terminate 4242", "is_alive 4242", "force_kill 4242"]
    );

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn failed_cleanup_kill_is_logged_and_start_proceeds() {
    let signaller = Arc::new(RecordingSignaller {
        refuses_terminate: true,
        ..RecordingSignaller::default()
    });
    let (mut runner, mut channels) = runner(
        "sleep 30",
        context(StaleProcesses::with_pid(4242), signaller.clone()),
    );

    runner.start(LaunchMode::Standard).await.unwrap();
    assert!(runner.is_running());
    assert_eq!(signaller.calls(), vec!["terminate 4242"]);

    let logs = drain_logs(&mut channels);
    let failure = logs
        .iter()
        .find(|e| e.message.starts_with("Failed to kill process 4242"))
        .expect("kill failure logged");
    assert_eq!(failure.level, LogLevel::Error);

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn start_while_running_is_rejected_without_side_effects() {
    let search = StaleProcesses::none();
    let (mut runner, mut channels) = runner(
        "sleep 30",
        context(search.clone(), Arc::new(RecordingSignaller::default())),
    );

    runner.start(LaunchMode::Standard).await.unwrap();
    let pid = runner.pid();
    drain_statuses(&mut channels);
    drain_logs(&mut channels);

    let err = runner.start(LaunchMode::Standard).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(runner.pid(), pid);
    assert!(drain_statuses(&mut channels).is_empty());
    assert!(drain_logs(&mut channels).is_empty());

    runner.stop().await.unwrap();
}

#[tokio::test]
async fn stop_without_child_is_idempotent() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service("true", ServiceEnv::new(), ServiceEnv::new(), publisher.clone());

    service.stop().await.unwrap();
    service.stop().await.unwrap();

    wait_until(|| published_statuses(&publisher).len() == 2).await;
    assert_eq!(service.status(), ServiceStatus::Stopped);
    assert_eq!(
        published_statuses(&publisher),
        vec![ServiceStatus::Stopped, ServiceStatus::Stopped]
    );
}

#[tokio::test]
async fn running_is_only_reached_through_initializing() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service("sleep 30", ServiceEnv::new(), ServiceEnv::new(), publisher.clone());

    service.start().await.unwrap();
    wait_until(|| service.status() == ServiceStatus::Running).await;
    service.stop().await.unwrap();
    wait_until(|| published_statuses(&publisher).len() == 4).await;

    let statuses = published_statuses(&publisher);
    assert_eq!(
        statuses,
        vec![
            ServiceStatus::Starting,
            ServiceStatus::Running,
            ServiceStatus::Stopping,
            ServiceStatus::Stopped,
        ]
    );
    assert!(!statuses.contains(&ServiceStatus::Initializing));
}

#[tokio::test]
async fn abnormal_exit_drives_error_status() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service(
        "echo 'fatal: config missing' >&2; exit 2",
        ServiceEnv::new(),
        ServiceEnv::new(),
        publisher.clone(),
    );

    service.start().await.unwrap();
    wait_until(|| service.status() == ServiceStatus::Error).await;

    let info = service.info();
    assert_eq!(info.url, None);
    let stderr = info
        .logs
        .iter()
        .find(|e| e.raw == "fatal: config missing")
        .expect("stderr line captured");
    assert_eq!(stderr.level, LogLevel::Error);
    assert!(info
        .logs
        .iter()
        .any(|e| e.level == LogLevel::Error && e.message.starts_with("Process exited with")));
}

#[tokio::test]
async fn spawn_failure_publishes_error_status_and_log() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = Service::with_family(
        launchpad_core::generate_id(),
        ServiceConfig::new("shell", "/nonexistent/launchpad/service", "shell"),
        ServiceEnv::new(),
        ShellFamily::new("true"),
        context(StaleProcesses::none(), Arc::new(RecordingSignaller::default())),
        publisher.clone(),
    );

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn(_)));

    wait_until(|| {
        service.status() == ServiceStatus::Error
            && service.info().logs.iter().any(|e| e.level == LogLevel::Error)
    })
    .await;

    let logged = service
        .info()
        .logs
        .into_iter()
        .find(|e| e.level == LogLevel::Error)
        .expect("spawn failure logged");
    assert_eq!(logged.message, err.to_string());
    let statuses = published_statuses(&publisher);
    assert!(statuses.contains(&ServiceStatus::Error));
    assert!(!statuses.contains(&ServiceStatus::Initializing));
}

#[tokio::test]
async fn child_sees_merged_environment() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service(
        "echo \"A=$LAUNCHPAD_IT_A B=${LAUNCHPAD_IT_B:-unset} C=$LAUNCHPAD_IT_C\"",
        env(&[("LAUNCHPAD_IT_A", "1"), ("LAUNCHPAD_IT_B", "2")]),
        env(&[("LAUNCHPAD_IT_B", ""), ("LAUNCHPAD_IT_C", "3")]),
        publisher,
    );

    service.start().await.unwrap();

    wait_until(|| {
        service
            .info()
            .logs
            .iter()
            .any(|e| e.raw == "A=1 B=unset C=3")
    })
    .await;
}

#[tokio::test]
async fn update_config_applies_on_next_start() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service(
        "echo \"V=$LAUNCHPAD_IT_V\"",
        ServiceEnv::new(),
        env(&[("LAUNCHPAD_IT_V", "old")]),
        publisher,
    );

    let mut config = service.config();
    config.env = env(&[("LAUNCHPAD_IT_V", "new")]);
    service.update_config(config, ServiceEnv::new()).await;

    service.start().await.unwrap();
    wait_until(|| service.info().logs.iter().any(|e| e.raw.starts_with("V="))).await;

    let logs = service.info().logs;
    assert!(logs.iter().any(|e| e.raw == "V=new"));
    assert!(!logs.iter().any(|e| e.raw == "V=old"));
}

#[tokio::test]
async fn log_buffer_keeps_the_newest_entries() {
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let service = service(
        "i=1; while [ $i -le 150 ]; do echo \"info: line $i\"; i=$((i+1)); done",
        ServiceEnv::new(),
        ServiceEnv::new(),
        publisher,
    );

    service.start().await.unwrap();
    wait_until(|| {
        service
            .info()
            .logs
            .last()
            .is_some_and(|e| e.raw == "info: line 150")
    })
    .await;

    let logs = service.info().logs;
    assert_eq!(logs.len(), 100);
    assert_eq!(logs.last().map(|e| e.raw.as_str()), Some("info: line 150"));
    assert!(!logs.iter().any(|e| e.raw == "info: line 1"));
}
