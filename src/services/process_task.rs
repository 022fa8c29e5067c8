//! Process Task
//!
//! Lifecycle wrapper around one external media process. A task always owns
//! one slot permit, and that permit is given back exactly once no matter
//! which path ends the process: explicit stop, natural exit or
//! cancellation of the scope the task was spawned under.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command as TokioCommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::defaults::DEFAULT_STOP_TIMEOUT_SECS;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::services::slot_pool::{SlotClass, SlotPermit, SlotPool};

/// Program and arguments for an external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// How long `stop` waits for the process to go away
    pub stop_timeout: Duration,
}

impl ProcessCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failed { code: Option<i32> },
    /// Killed because its scope was cancelled
    Killed,
    WaitError(String),
}

impl ProcessExit {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exited successfully"),
            Self::Failed { code: Some(code) } => write!(f, "exited with status {code}"),
            Self::Failed { code: None } => write!(f, "terminated by signal"),
            Self::Killed => write!(f, "killed"),
            Self::WaitError(e) => write!(f, "wait failed: {e}"),
        }
    }
}

/// One running (or finished) external process
pub struct ProcessTask {
    id: Uuid,
    owner_key: String,
    class: SlotClass,
    program: String,
    pid: Option<u32>,
    started: Instant,
    started_at: DateTime<Utc>,
    stop_timeout: Duration,
    scope: CancellationToken,
    permit: SlotPermit,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl fmt::Debug for ProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTask")
            .field("id", &self.id)
            .field("owner_key", &self.owner_key)
            .field("class", &self.class)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ProcessTask {
    /// Acquire a slot from `pool` and launch `command` under a child of `scope`.
    ///
    /// Fails with `SlotExhausted` when the pool is full and with
    /// `ProcessLaunchFailed` when the OS refuses the spawn; in both cases no
    /// slot is left held.
    pub fn spawn(
        pool: &SlotPool,
        scope: &CancellationToken,
        owner_key: impl Into<String>,
        command: ProcessCommand,
        output_dir: Option<&Path>,
    ) -> SchedulerResult<Arc<Self>> {
        let owner_key = owner_key.into();
        let class = pool.class();
        let metrics = pool.metrics().clone();
        let task_scope = scope.child_token();
        let permit = pool.acquire(&task_scope)?;

        if let Some(dir) = output_dir
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            permit.release();
            task_scope.cancel();
            return Err(SchedulerError::launch_failed(
                &command.program,
                format!("cannot create output directory {}: {e}", dir.display()),
            ));
        }

        debug!(
            "owner={} class={} status=spawning command=\"{}\"",
            owner_key, class, command
        );

        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                permit.release();
                task_scope.cancel();
                metrics.record_launch_failure(class);
                warn!(
                    "owner={} class={} status=launch_failed program={} error={}",
                    owner_key, class, command.program, e
                );
                return Err(SchedulerError::launch_failed(&command.program, e.to_string()));
            }
        };

        let id = Uuid::new_v4();
        let pid = child.id();
        metrics.record_process_start(class);
        info!(
            "owner={} class={} pid={:?} status=started program={}",
            owner_key, class, pid, command.program
        );

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr, owner_key.clone());
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let waiter_scope = task_scope.clone();
        let waiter_permit = permit.clone();
        let waiter_owner = owner_key.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => ProcessExit::Success,
                    Ok(status) => ProcessExit::Failed { code: status.code() },
                    Err(e) => ProcessExit::WaitError(e.to_string()),
                },
                _ = waiter_scope.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("owner={} status=kill_failed error={}", waiter_owner, e);
                    }
                    ProcessExit::Killed
                }
            };

            debug!("owner={} pid={:?} status=exited outcome=\"{}\"", waiter_owner, pid, outcome);
            metrics.record_process_exit(class, outcome.is_success());
            exit_tx.send_replace(Some(outcome));
            waiter_permit.release();
        });

        Ok(Arc::new(Self {
            id,
            owner_key,
            class,
            program: command.program,
            pid,
            started: Instant::now(),
            started_at: Utc::now(),
            stop_timeout: command.stop_timeout,
            scope: task_scope,
            permit,
            exit: exit_rx,
        }))
    }

    /// True while the process has not exited and has not been asked to stop
    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none() && !self.scope.is_cancelled()
    }

    /// Cancel the process, give its slot back and wait (bounded) for it to exit.
    ///
    /// Returns the exit outcome, or `None` if the process did not report one
    /// within the stop timeout.
    pub async fn stop(&self) -> Option<ProcessExit> {
        self.scope.cancel();
        self.permit.release();

        match tokio::time::timeout(self.stop_timeout, self.wait()).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                warn!(
                    "owner={} pid={:?} status=stop_timeout timeout={:?}",
                    self.owner_key, self.pid, self.stop_timeout
                );
                None
            }
        }
    }

    /// Wait for the process to end
    pub async fn wait(&self) -> ProcessExit {
        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| ProcessExit::WaitError("no exit recorded".to_string())),
            Err(_) => ProcessExit::WaitError("process waiter ended unexpectedly".to_string()),
        }
    }

    /// Exit outcome if the process has already ended
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn class(&self) -> SlotClass {
        self.class
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn slot_released(&self) -> bool {
        self.permit.is_released()
    }
}

impl Drop for ProcessTask {
    fn drop(&mut self) {
        // Last handle gone: nobody can stop the process any more
        self.scope.cancel();
    }
}

fn forward_stderr(stderr: ChildStderr, owner_key: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let lower = line.to_lowercase();
            if lower.contains("error") || lower.contains("fatal") {
                warn!("owner={} stderr=\"{}\"", owner_key, line);
            } else {
                debug!("owner={} stderr=\"{}\"", owner_key, line);
            }
        }
    });
}
