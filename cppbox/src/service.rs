use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time;
use tracing::{debug, info};
use uuid::Uuid;

use crate::diagnostics::parse_diagnostics;
use crate::error::Error;
use crate::registry::ExecutionRegistry;
use crate::supervisor::ProcessSupervisor;
use crate::toolchain::Toolchain;
use crate::types::{CompileFailure, CompileOnly, CompileRequest, ExecutionResult, RunOutcome};
use crate::workspace::{WorkUnit, WorkspaceManager};

/// Deadlines and concurrency bounds for request handling. Compile and run
/// deadlines apply independently, each measured from the moment its
/// process spawns.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    /// Pause before scratch files of a finished run are removed, so nothing
    /// still flushing in the OS is pulled out from underneath
    pub cleanup_grace: Duration,
    /// Maximum in-flight executions
    pub max_concurrent: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(30),
            cleanup_grace: Duration::from_secs(5),
            max_concurrent: 10,
        }
    }
}

/// Composes workspace, toolchain, supervisor, and registry into the request
/// lifecycle: exactly one response per request, eventual cleanup on every
/// path.
#[derive(Clone)]
pub struct CompileRunService {
    toolchain: Toolchain,
    workspace: WorkspaceManager,
    registry: ExecutionRegistry,
    supervisor: ProcessSupervisor,
    semaphore: Arc<Semaphore>,
    limits: ServiceLimits,
}

impl CompileRunService {
    pub fn new(toolchain: Toolchain, workspace: WorkspaceManager, limits: ServiceLimits) -> Self {
        Self {
            toolchain,
            workspace,
            registry: ExecutionRegistry::new(),
            supervisor: ProcessSupervisor::new(),
            semaphore: Arc::new(Semaphore::new(limits.max_concurrent)),
            limits,
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Full pipeline: validate, materialize, compile, run, clean up.
    pub async fn compile_and_run(&self, request: CompileRequest) -> Result<RunOutcome, Error> {
        request.validate()?;
        let _permit = self.acquire_slot().await?;

        let unit = self.workspace.materialize(&request.code).await?;
        match self.compile_unit(&unit).await? {
            Some(failure) => {
                self.workspace.release(&unit).await;
                Ok(RunOutcome::CompileFailed(failure))
            }
            None => {
                let result = self
                    .supervisor
                    .run(
                        &unit.id,
                        &unit.artifact_path,
                        request.input.as_deref(),
                        self.limits.run_timeout,
                        &self.registry,
                    )
                    .await;
                // scheduled even when the run errored out
                self.release_after_grace(unit);
                Ok(RunOutcome::Executed(result?))
            }
        }
    }

    /// Compile without running; a successful artifact is left on disk for a
    /// later `run_artifact` call.
    pub async fn compile_only(&self, request: CompileRequest) -> Result<CompileOnly, Error> {
        request.validate()?;
        let _permit = self.acquire_slot().await?;

        let unit = self.workspace.materialize(&request.code).await?;
        match self.compile_unit(&unit).await? {
            Some(failure) => {
                self.workspace.release(&unit).await;
                Ok(CompileOnly::CompileFailed(failure))
            }
            None => {
                info!(id = %unit.id, "artifact compiled and retained");
                let executable = unit.artifact_file_name();
                unit.disarm();
                Ok(CompileOnly::Compiled { executable })
            }
        }
    }

    /// Run a previously compiled artifact by its public name. Each run gets
    /// a fresh execution id; the artifact and its sibling source are removed
    /// after the grace window.
    pub async fn run_artifact(
        &self,
        executable: &str,
        input: Option<&str>,
    ) -> Result<ExecutionResult, Error> {
        let _permit = self.acquire_slot().await?;

        let unit = self
            .workspace
            .claim_artifact(executable)
            .await
            .ok_or_else(|| Error::NotFound(format!("executable {executable}")))?;

        let run_id = Uuid::new_v4().to_string();
        let result = self
            .supervisor
            .run(
                &run_id,
                &unit.artifact_path,
                input,
                self.limits.run_timeout,
                &self.registry,
            )
            .await;
        self.release_after_grace(unit);
        result
    }

    /// Best-effort cancellation of a live execution. The original caller
    /// still receives its result through the single-fulfillment path.
    pub fn stop(&self, id: &str) -> bool {
        self.registry.cancel(id)
    }

    /// Toolchain probe for operator visibility.
    pub async fn toolchain_health(&self) -> Result<String, Error> {
        self.toolchain.probe().await
    }

    async fn compile_unit(&self, unit: &WorkUnit) -> Result<Option<CompileFailure>, Error> {
        let outcome = self
            .toolchain
            .compile(
                &unit.source_path,
                &unit.artifact_path,
                self.limits.compile_timeout,
            )
            .await?;
        if outcome.success {
            return Ok(None);
        }

        let diagnostics = parse_diagnostics(&outcome.stderr, unit.source_file_name());
        debug!(
            id = %unit.id,
            markers = diagnostics.len(),
            timed_out = outcome.timed_out,
            "compilation failed"
        );
        Ok(Some(CompileFailure {
            diagnostics,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            timed_out: outcome.timed_out,
        }))
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>, Error> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("execution slot unavailable: {e}")))
    }

    /// Detached cleanup after the grace window. The unit's drop guard runs
    /// inside the task, so the files go away even if release itself fails;
    /// the sweep covers the case where the task never runs at all.
    fn release_after_grace(&self, unit: WorkUnit) {
        let workspace = self.workspace.clone();
        let grace = self.limits.cleanup_grace;
        tokio::spawn(async move {
            time::sleep(grace).await;
            workspace.release(&unit).await;
        });
    }
}
