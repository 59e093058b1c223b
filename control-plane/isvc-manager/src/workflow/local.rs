use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ExecutionInfo, ExecutionStatus, Mailbox, SignalWithStartRequest, StartOptions,
    Workflow, WorkflowContext, WorkflowEngine, WorkflowError,
};

struct Execution {
    workflow_type: String,
    started_at: chrono::DateTime<Utc>,
    closed_at: Option<chrono::DateTime<Utc>>,
    status: ExecutionStatus,
    mailbox: Mailbox,
}

struct EngineState {
    executions: Mutex<HashMap<String, Execution>>,
    slots: Arc<Semaphore>,
    root: CancellationToken,
}

/// In-process workflow engine.
///
/// Executions live in tokio tasks and are lost on restart; closed executions
/// stay queryable until the engine is dropped.
pub struct LocalWorkflowEngine {
    workflows: HashMap<String, Arc<dyn Workflow>>,
    state: Arc<EngineState>,
}

impl LocalWorkflowEngine {
    pub fn new(max_concurrent_activities: usize) -> Self {
        Self {
            workflows: HashMap::new(),
            state: Arc::new(EngineState {
                executions: Mutex::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(max_concurrent_activities)),
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn register(&mut self, workflow_type: &str, workflow: Arc<dyn Workflow>) {
        debug!(workflow_type, "registering workflow");
        self.workflows.insert(workflow_type.to_string(), workflow);
    }

    /// Cancel every running activity and refuse new executions.
    pub fn shutdown(&self) {
        info!("shutting down workflow engine");
        self.state.root.cancel();
        self.state.slots.close();
    }
}

#[async_trait]
impl WorkflowEngine for LocalWorkflowEngine {
    async fn signal_with_start(
        &self,
        request: SignalWithStartRequest,
    ) -> Result<(), WorkflowError> {
        if self.state.root.is_cancelled() {
            return Err(WorkflowError::ShutDown);
        }
        let workflow = self
            .workflows
            .get(&request.workflow_type)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::UnknownWorkflowType(request.workflow_type.clone())
            })?;

        let mut executions = self.state.executions.lock().await;
        if let Some(execution) = executions.get(&request.workflow_id) {
            if execution.closed_at.is_none() {
                debug!(
                    workflow_id = %request.workflow_id,
                    signal = %request.signal_name,
                    "signalling running execution"
                );
                execution.mailbox.deliver(&request.signal_name, request.signal);
                return Ok(());
            }
        }

        let mailbox = Mailbox::default();
        mailbox.deliver(&request.signal_name, request.signal);
        executions.insert(
            request.workflow_id.clone(),
            Execution {
                workflow_type: request.workflow_type.clone(),
                started_at: Utc::now(),
                closed_at: None,
                status: ExecutionStatus::Running,
                mailbox: mailbox.clone(),
            },
        );
        info!(
            workflow_id = %request.workflow_id,
            workflow_type = %request.workflow_type,
            "starting workflow execution"
        );
        tokio::spawn(run_execution(
            self.state.clone(),
            request.workflow_id,
            workflow,
            request.input,
            request.options,
            mailbox,
        ));
        Ok(())
    }

    async fn describe_execution(
        &self,
        workflow_id: &str,
    ) -> Result<ExecutionInfo, WorkflowError> {
        let executions = self.state.executions.lock().await;
        executions
            .get(workflow_id)
            .map(|execution| ExecutionInfo {
                workflow_id: workflow_id.to_string(),
                workflow_type: execution.workflow_type.clone(),
                started_at: execution.started_at,
                closed_at: execution.closed_at,
                status: execution.status.clone(),
            })
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }
}

async fn run_execution(
    state: Arc<EngineState>,
    workflow_id: String,
    workflow: Arc<dyn Workflow>,
    input: Value,
    options: StartOptions,
    mailbox: Mailbox,
) {
    loop {
        let status = run_once(&state, &workflow_id, &workflow, &input, &options, &mailbox).await;

        // signals that landed while the run was winding down start a fresh
        // run with the same ID instead of being lost
        let mut executions = state.executions.lock().await;
        if mailbox.has_pending() && !state.root.is_cancelled() {
            debug!(%workflow_id, "signals pending at close, continuing as new");
            continue;
        }
        match &status {
            ExecutionStatus::Failed(reason) => {
                warn!(%workflow_id, %reason, "workflow execution failed")
            }
            ExecutionStatus::TimedOut => warn!(%workflow_id, "workflow execution timed out"),
            _ => info!(%workflow_id, "workflow execution completed"),
        }
        if let Some(execution) = executions.get_mut(&workflow_id) {
            execution.closed_at = Some(Utc::now());
            execution.status = status;
        }
        return;
    }
}

async fn run_once(
    state: &Arc<EngineState>,
    workflow_id: &str,
    workflow: &Arc<dyn Workflow>,
    input: &Value,
    options: &StartOptions,
    mailbox: &Mailbox,
) -> ExecutionStatus {
    let ctx = WorkflowContext::new(
        workflow_id.to_string(),
        mailbox.clone(),
        state.slots.clone(),
        state.root.clone(),
    );
    let workflow = workflow.clone();
    let input = input.clone();
    let mut run = tokio::spawn(async move { workflow.run(ctx, input).await });

    let outcome = match options.execution_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                run.abort();
                return ExecutionStatus::TimedOut;
            }
        },
        None => run.await,
    };
    match outcome {
        Ok(Ok(())) => ExecutionStatus::Completed,
        Ok(Err(e)) => ExecutionStatus::Failed(e.to_string()),
        Err(e) => ExecutionStatus::Failed(format!("workflow task aborted: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records every signal it receives, then completes.
    struct Recorder {
        seen: Arc<std::sync::Mutex<Vec<i64>>>,
        runs: AtomicUsize,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Workflow for Recorder {
        async fn run(&self, ctx: WorkflowContext, _input: Value) -> Result<(), WorkflowError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let signals = ctx.signal_channel("sig");
            let value: i64 = signals.receive().await?;
            self.seen.lock().unwrap().push(value);
            self.gate.notified().await;
            Ok(())
        }
    }

    fn request(id: &str, value: i64) -> SignalWithStartRequest {
        SignalWithStartRequest {
            workflow_id: id.into(),
            signal_name: "sig".into(),
            signal: json!(value),
            options: StartOptions::default(),
            workflow_type: "recorder".into(),
            input: Value::Null,
        }
    }

    async fn wait_closed(engine: &LocalWorkflowEngine, id: &str) -> ExecutionInfo {
        for _ in 0..200 {
            let info = engine.describe_execution(id).await.unwrap();
            if !info.is_open() {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {id} did not close");
    }

    #[tokio::test]
    async fn signal_after_close_starts_a_new_execution() {
        let recorder = Arc::new(Recorder {
            seen: Default::default(),
            runs: AtomicUsize::new(0),
            gate: Arc::new(tokio::sync::Notify::new()),
        });
        recorder.gate.notify_one();
        let mut engine = LocalWorkflowEngine::new(4);
        engine.register("recorder", recorder.clone());

        engine.signal_with_start(request("wf", 1)).await.unwrap();
        let info = wait_closed(&engine, "wf").await;
        assert_eq!(info.status, ExecutionStatus::Completed);

        recorder.gate.notify_one();
        engine.signal_with_start(request("wf", 2)).await.unwrap();
        wait_closed(&engine, "wf").await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(recorder.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pending_signals_continue_as_new() {
        let recorder = Arc::new(Recorder {
            seen: Default::default(),
            runs: AtomicUsize::new(0),
            gate: Arc::new(tokio::sync::Notify::new()),
        });
        let mut engine = LocalWorkflowEngine::new(4);
        engine.register("recorder", recorder.clone());

        engine.signal_with_start(request("wf", 1)).await.unwrap();
        // the first run only consumes one signal, the second is still queued
        engine.signal_with_start(request("wf", 2)).await.unwrap();
        assert!(engine.describe_execution("wf").await.unwrap().is_open());

        recorder.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        recorder.gate.notify_one();
        wait_closed(&engine, "wf").await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn unknown_ids_and_types_are_reported() {
        let engine = LocalWorkflowEngine::new(1);
        assert!(matches!(
            engine.describe_execution("missing").await,
            Err(WorkflowError::NotFound(_))
        ));
        assert!(matches!(
            engine.signal_with_start(request("wf", 1)).await,
            Err(WorkflowError::UnknownWorkflowType(_))
        ));
    }

    #[tokio::test]
    async fn shut_down_engine_refuses_signals() {
        let mut engine = LocalWorkflowEngine::new(1);
        engine.register(
            "recorder",
            Arc::new(Recorder {
                seen: Default::default(),
                runs: AtomicUsize::new(0),
                gate: Arc::new(tokio::sync::Notify::new()),
            }),
        );
        engine.shutdown();
        assert!(matches!(
            engine.signal_with_start(request("wf", 1)).await,
            Err(WorkflowError::ShutDown)
        ));
    }
}
