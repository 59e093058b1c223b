//! Contract of the workflow engine backing the durable dispatcher.
//!
//! The engine delivers signals at least once, starts at most one execution
//! per workflow ID at a time and tracks activities with heartbeats and
//! cooperative cancellation. [`LocalWorkflowEngine`] implements the contract
//! with tokio tasks.

mod activities;
mod job;
mod local;

pub use activities::*;
pub use job::*;
pub use local::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::IntegratedServiceError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow execution not found: {0}")]
    NotFound(String),

    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("signal channel {0} closed")]
    SignalChannelClosed(String),

    #[error("{0}")]
    Activity(#[from] ActivityError),

    #[error("workflow engine is shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    ScheduleToStart,
    StartToClose,
    Heartbeat,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::ScheduleToStart => f.write_str("schedule-to-start"),
            TimeoutKind::StartToClose => f.write_str("start-to-close"),
            TimeoutKind::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("activity {0} was cancelled")]
    Cancelled(String),

    #[error("activity {name} timed out ({kind})")]
    Timeout { name: String, kind: TimeoutKind },

    #[error("activity {name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("activity {name} panicked: {message}")]
    Panicked { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub schedule_to_start_timeout: Duration,
    pub start_to_close_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_start_timeout: Duration::from_secs(10 * 60),
            start_to_close_timeout: Duration::from_secs(60 * 60),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// Upper bound for a whole execution. `None` means unbounded.
    pub execution_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SignalWithStartRequest {
    pub workflow_id: String,
    pub signal_name: String,
    pub signal: Value,
    pub options: StartOptions,
    pub workflow_type: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub workflow_id: String,
    pub workflow_type: String,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
}

impl ExecutionInfo {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Deliver `signal` to the execution identified by `workflow_id`,
    /// starting a new execution of `workflow_type` first if none is open.
    async fn signal_with_start(
        &self,
        request: SignalWithStartRequest,
    ) -> Result<(), WorkflowError>;

    async fn describe_execution(
        &self,
        workflow_id: &str,
    ) -> Result<ExecutionInfo, WorkflowError>;
}

#[async_trait]
pub trait Workflow: Send + Sync {
    async fn run(
        &self,
        ctx: WorkflowContext,
        input: Value,
    ) -> Result<(), WorkflowError>;
}

type Channel = (flume::Sender<Value>, flume::Receiver<Value>);

/// Per-execution signal queues, one per signal name.
#[derive(Clone, Default)]
pub(crate) struct Mailbox {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl Mailbox {
    fn channel(&self, name: &str) -> Channel {
        let mut channels =
            self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(name.to_string())
            .or_insert_with(flume::unbounded)
            .clone()
    }

    pub(crate) fn deliver(&self, name: &str, signal: Value) {
        let (tx, _) = self.channel(name);
        // the mailbox keeps a receiver alive, so this cannot disconnect
        let _ = tx.send(signal);
    }

    pub(crate) fn has_pending(&self) -> bool {
        let channels =
            self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.values().any(|(_, rx)| !rx.is_empty())
    }
}

pub struct SignalChannel {
    name: String,
    rx: flume::Receiver<Value>,
}

impl SignalChannel {
    /// Wait for the next signal.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        let value = self.recv_value().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Wait for a signal, then drain the queue and keep only the newest one.
    pub async fn receive_latest<T: DeserializeOwned>(
        &self,
    ) -> Result<T, WorkflowError> {
        let first = self.recv_value().await?;
        Ok(serde_json::from_value(self.drain_from(first))?)
    }

    /// Non-blocking variant of [`Self::receive_latest`].
    pub fn try_latest<T: DeserializeOwned>(
        &self,
    ) -> Result<Option<T>, WorkflowError> {
        match self.rx.try_recv() {
            Ok(first) => Ok(Some(serde_json::from_value(self.drain_from(first))?)),
            Err(_) => Ok(None),
        }
    }

    async fn recv_value(&self) -> Result<Value, WorkflowError> {
        self.rx
            .recv_async()
            .await
            .map_err(|_| WorkflowError::SignalChannelClosed(self.name.clone()))
    }

    fn drain_from(&self, mut latest: Value) -> Value {
        let mut dropped = 0usize;
        while let Ok(next) = self.rx.try_recv() {
            latest = next;
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(signal = %self.name, dropped, "superseded queued signals");
        }
        latest
    }
}

pub struct WorkflowContext {
    workflow_id: String,
    mailbox: Mailbox,
    slots: Arc<Semaphore>,
    root: CancellationToken,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_id: String,
        mailbox: Mailbox,
        slots: Arc<Semaphore>,
        root: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            mailbox,
            slots,
            root,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn signal_channel(&self, name: &str) -> SignalChannel {
        let (_, rx) = self.mailbox.channel(name);
        SignalChannel {
            name: name.to_string(),
            rx,
        }
    }

    /// Schedule an activity. The returned handle can be awaited or cancelled;
    /// cancellation is cooperative and the activity decides when to stop.
    pub fn execute_activity<T, F, Fut>(
        &self,
        name: &str,
        options: &ActivityOptions,
        activity: F,
    ) -> ActivityHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(ActivityContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, IntegratedServiceError>> + Send + 'static,
    {
        let token = self.root.child_token();
        let (beat_tx, beat_rx) = watch::channel(Instant::now());
        let ctx = ActivityContext {
            token: token.clone(),
            heartbeat: Arc::new(beat_tx),
        };
        let slots = self.slots.clone();
        let options = options.clone();
        let activity_name = name.to_string();
        let join = tokio::spawn(async move {
            // cancellation also applies while queued for a slot
            let acquire = async {
                tokio::select! {
                    permit = slots.acquire_owned() => permit.ok(),
                    _ = ctx.cancelled() => None,
                }
            };
            let _permit = match tokio::time::timeout(options.schedule_to_start_timeout, acquire)
                .await
            {
                Ok(Some(permit)) => permit,
                Ok(None) => return Err(ActivityError::Cancelled(activity_name)),
                Err(_) => {
                    return Err(ActivityError::Timeout {
                        name: activity_name,
                        kind: TimeoutKind::ScheduleToStart,
                    });
                }
            };
            let run = activity(ctx.clone());
            supervise(activity_name, ctx, beat_rx, options, run).await
        });
        ActivityHandle {
            name: name.to_string(),
            token,
            join,
        }
    }
}

async fn supervise<T, Fut>(
    name: String,
    ctx: ActivityContext,
    beats: watch::Receiver<Instant>,
    options: ActivityOptions,
    run: Fut,
) -> Result<T, ActivityError>
where
    Fut: Future<Output = Result<T, IntegratedServiceError>>,
{
    tokio::pin!(run);
    let expired = tokio::select! {
        result = &mut run => {
            return match result {
                Ok(value) => Ok(value),
                Err(_) if ctx.is_cancelled() => Err(ActivityError::Cancelled(name)),
                Err(e) => Err(ActivityError::Failed { name, message: e.to_string() }),
            };
        }
        _ = tokio::time::sleep(options.start_to_close_timeout) => TimeoutKind::StartToClose,
        _ = heartbeat_expired(beats, options.heartbeat_timeout) => TimeoutKind::Heartbeat,
    };
    warn!(activity = %name, kind = %expired, "activity timed out, requesting cancellation");
    ctx.token.cancel();
    let _ = run.await;
    Err(ActivityError::Timeout {
        name,
        kind: expired,
    })
}

async fn heartbeat_expired(mut beats: watch::Receiver<Instant>, timeout: Duration) {
    loop {
        match tokio::time::timeout(timeout, beats.changed()).await {
            Ok(Ok(())) => continue,
            // all senders gone: the activity finished, the other branch wins
            Ok(Err(_)) => std::future::pending::<()>().await,
            Err(_) => return,
        }
    }
}

/// Handed to every activity invocation.
#[derive(Clone)]
pub struct ActivityContext {
    token: CancellationToken,
    heartbeat: Arc<watch::Sender<Instant>>,
}

impl ActivityContext {
    /// A context outside any engine, cancelled through `token`.
    pub fn new(token: CancellationToken) -> Self {
        let (beat_tx, _) = watch::channel(Instant::now());
        Self {
            token,
            heartbeat: Arc::new(beat_tx),
        }
    }

    /// Report progress so the engine does not time the activity out.
    pub fn heartbeat(&self) {
        self.heartbeat.send_replace(Instant::now());
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

pub struct ActivityHandle<T> {
    name: String,
    token: CancellationToken,
    join: JoinHandle<Result<T, ActivityError>>,
}

impl<T> ActivityHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the activity outcome. Must not be called again once it has
    /// returned.
    pub async fn wait(&mut self) -> Result<T, ActivityError> {
        match (&mut self.join).await {
            Ok(result) => result,
            Err(e) => Err(ActivityError::Panicked {
                name: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}
