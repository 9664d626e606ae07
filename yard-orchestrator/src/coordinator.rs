use crate::error::{CoordinatorError, Result};
use crate::gate::{EnvResolution, GateOutcome};
use crate::in_flight::{InFlight, InFlightGuard};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use yard_core::{
    parse_dotenv, render_dotenv, ContainerStatus, EnvMap, EnvVarDiff, IntentOp, IntentState,
    IntentTable, TemplateStatus, Workspace, WorkspaceStateUpdate,
};
use yard_provider::{ContainerDriver, ContainerSpec, TemplateHost};
use yard_store::{
    NewWorkspace, Operation, OperationStatus, OperationType, Store, WorkspaceFilters,
};
use yard_sync::Synchronizer;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a deploy or redeploy may wait for a terminal status before it is reported stalled.
    pub intent_timeout: Duration,
    pub watchdog_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            intent_timeout: Duration::from_secs(600),
            watchdog_interval: Duration::from_secs(30),
        }
    }
}

/// Handed back as soon as an operation is accepted. The outcome arrives as
/// workspace updates and in the operation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTicket {
    pub operation_id: String,
    pub workspace_id: String,
    pub operation_type: OperationType,
}

/// Extra state an agent reports along with its heartbeat.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    #[serde(default)]
    pub has_uncommitted_changes: Option<bool>,
}

/// Serializes lifecycle operations per workspace and drives the container driver.
#[derive(Clone)]
pub struct Coordinator {
    store: Store,
    sync: Synchronizer,
    driver: Arc<dyn ContainerDriver>,
    in_flight: InFlight,
    intents: Arc<Mutex<IntentTable>>,
    config: Arc<CoordinatorConfig>,
}

impl Coordinator {
    pub fn new(
        store: Store,
        sync: Synchronizer,
        driver: Arc<dyn ContainerDriver>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            sync,
            driver,
            in_flight: InFlight::default(),
            intents: Arc::new(Mutex::new(IntentTable::new())),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    fn intents(&self) -> MutexGuard<'_, IntentTable> {
        self.intents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the synchronizer with every persisted workspace.
    pub async fn restore_state(&self) -> Result<usize> {
        let workspaces = self.store.list_workspaces(&WorkspaceFilters::default()).await?;
        let count = workspaces.len();
        for workspace in workspaces {
            self.sync.track(workspace);
        }
        Ok(count)
    }

    #[instrument(skip(self, req), fields(repository_id = %req.repository_id, branch = %req.branch_name))]
    pub async fn create_workspace(&self, req: &NewWorkspace) -> Result<Workspace> {
        if req.name.trim().is_empty() || req.branch_name.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "name and branchName must not be empty".to_string(),
            ));
        }

        let workspace = self.store.create_workspace(req).await?;
        self.sync.track(workspace.clone());
        info!(workspace_id = %workspace.id, "workspace created");
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        Ok(self.store.get_workspace(id).await?)
    }

    pub async fn list_workspaces(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        Ok(self.store.list_workspaces(filters).await?)
    }

    pub async fn list_operations(&self, workspace_id: Option<&str>) -> Result<Vec<Operation>> {
        Ok(self.store.list_operations(workspace_id).await?)
    }

    pub fn intent(&self, workspace_id: &str) -> IntentState {
        self.intents().get(workspace_id)
    }

    /// Forget a resolved intent once its outcome has been shown.
    pub fn acknowledge_intent(&self, workspace_id: &str) {
        self.intents().acknowledge(workspace_id);
    }

    pub fn in_flight_operation(&self, workspace_id: &str) -> Option<OperationType> {
        self.in_flight.current(workspace_id)
    }

    fn claim(&self, workspace_id: &str, operation: OperationType) -> Result<InFlightGuard> {
        self.in_flight
            .claim(workspace_id, operation)
            .map_err(|running| CoordinatorError::OperationInProgress {
                workspace_id: workspace_id.to_string(),
                operation: running,
            })
    }

    /// Claim the workspace, then load it. Loading after the claim sees
    /// everything the previous operation on it wrote.
    async fn claim_loaded(
        &self,
        workspace_id: &str,
        operation: OperationType,
    ) -> Result<(InFlightGuard, Workspace)> {
        let guard = self.claim(workspace_id, operation)?;
        let workspace = self.store.get_workspace(workspace_id).await?;
        Ok((guard, workspace))
    }

    /// Fold a state change into the synchronizer, persist it and let it
    /// resolve a pending intent.
    async fn apply(&self, update: WorkspaceStateUpdate) -> Result<Workspace> {
        let reports_status = update.container_status.is_some();
        let (workspace, outcome) = self.sync.publish(update)?;

        if outcome.changed {
            self.store.save_container_state(&workspace).await?;
        }

        if reports_status {
            let resolved = self
                .intents()
                .observe(&workspace.id, workspace.container_status);
            if let Some(outcome) = resolved {
                info!(workspace_id = %workspace.id, ?outcome, "intent resolved");
            }
        }

        Ok(workspace)
    }

    /// Accept a state push from a driver.
    pub async fn ingest(&self, update: WorkspaceStateUpdate) -> Result<Workspace> {
        let workspace_id = update.workspace_id.clone();
        let workspace = self.apply(update).await?;
        info!(workspace_id = %workspace_id, status = %workspace.container_status, "driver push applied");
        Ok(workspace)
    }

    /// Record an agent heartbeat. The first heartbeat from a container that is
    /// still being created marks it running.
    pub async fn agent_heartbeat(&self, workspace_id: &str, report: AgentReport) -> Result<Workspace> {
        let workspace = self.store.get_workspace(workspace_id).await?;

        if let Some(dirty) = report.has_uncommitted_changes {
            if dirty != workspace.has_uncommitted_changes {
                self.store.set_uncommitted_changes(workspace_id, dirty).await?;
            }
        }

        if workspace.container_status == ContainerStatus::Creating && workspace.has_container() {
            self.apply(
                WorkspaceStateUpdate::new(workspace_id)
                    .status(ContainerStatus::Running)
                    .agent(true),
            )
            .await?;
        } else if self.sync.heartbeat(workspace_id, Utc::now())? {
            if let Some(snapshot) = self.sync.snapshot(workspace_id) {
                self.store.save_container_state(&snapshot).await?;
            }
        }

        Ok(self.store.get_workspace(workspace_id).await?)
    }

    /// Downgrade agents that have been silent past the heartbeat timeout and
    /// persist the downgrade, so a re-fetch agrees with what was pushed.
    pub async fn sweep_stale_agents(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.sync.config().heartbeat_timeout;
        let downgraded = self.sync.sweep_stale(now, timeout);

        for workspace_id in &downgraded {
            warn!(workspace_id = %workspace_id, "agent heartbeat lost");
            let Some(snapshot) = self.sync.snapshot(workspace_id) else {
                continue;
            };
            if let Err(e) = self.store.save_container_state(&snapshot).await {
                error!(workspace_id = %workspace_id, error = %e, "failed to persist agent downgrade");
            }
        }
        downgraded
    }

    /// Run [`Coordinator::sweep_stale_agents`] on the synchronizer's sweep interval.
    pub fn spawn_heartbeat_monitor(&self) -> JoinHandle<()> {
        let this = self.clone();
        let period = this
            .sync
            .config()
            .sweep_interval
            .max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                timeout_secs = this.sync.config().heartbeat_timeout.as_secs(),
                "heartbeat monitor started"
            );
            loop {
                interval.tick().await;
                this.sweep_stale_agents(Utc::now()).await;
            }
        })
    }

    async fn live_env(&self, workspace: &Workspace) -> Result<EnvMap> {
        let container_id = workspace
            .container_id
            .as_deref()
            .ok_or_else(|| CoordinatorError::NoContainer(workspace.id.clone()))?;
        let contents = self.driver.read_env(container_id).await?;
        Ok(parse_dotenv(&contents)?)
    }

    pub async fn read_live_env(&self, workspace_id: &str) -> Result<EnvMap> {
        let workspace = self.store.get_workspace(workspace_id).await?;
        self.live_env(&workspace).await
    }

    pub async fn write_live_env(&self, workspace_id: &str, env: &EnvMap) -> Result<()> {
        let workspace = self.store.get_workspace(workspace_id).await?;
        let container_id = workspace
            .container_id
            .as_deref()
            .ok_or_else(|| CoordinatorError::NoContainer(workspace.id.clone()))?;
        self.driver
            .write_env(container_id, &render_dotenv(env))
            .await?;
        Ok(())
    }

    /// Live environment and its divergence from the repository configuration.
    /// A workspace without a container has nothing to lose.
    async fn compare_env(&self, workspace: &Workspace) -> Result<(EnvMap, EnvVarDiff)> {
        if !workspace.has_container() {
            return Ok((EnvMap::new(), EnvVarDiff::default()));
        }

        let blocked = |message: String| CoordinatorError::EnvDiff {
            workspace_id: workspace.id.clone(),
            message,
        };
        let live = self
            .live_env(workspace)
            .await
            .map_err(|e| blocked(e.to_string()))?;
        let stored = self
            .store
            .get_repository_env(&workspace.repository_id)
            .await
            .map_err(|e| blocked(e.to_string()))?;

        let diff = EnvVarDiff::compute(&live, &stored);
        Ok((live, diff))
    }

    pub async fn env_diff(&self, workspace_id: &str) -> Result<EnvVarDiff> {
        let workspace = self.store.get_workspace(workspace_id).await?;
        Ok(self.compare_env(&workspace).await?.1)
    }

    /// Decide whether a destructive operation may go ahead. `Some` stops it.
    async fn gate(
        &self,
        workspace: &Workspace,
        resolution: Option<EnvResolution>,
    ) -> Result<Option<GateOutcome>> {
        let (live, diff) = self.compare_env(workspace).await?;

        if resolution == Some(EnvResolution::Cancel) {
            return Ok(Some(GateOutcome::Cancelled));
        }
        if diff.is_empty() {
            return Ok(None);
        }

        match resolution {
            None => Ok(Some(GateOutcome::NeedsResolution(diff))),
            Some(EnvResolution::SyncThenProceed) => {
                self.store
                    .set_repository_env(&workspace.repository_id, &live)
                    .await?;
                info!(
                    workspace_id = %workspace.id,
                    repository_id = %workspace.repository_id,
                    keys = diff.len(),
                    "live environment synced to repository"
                );
                Ok(None)
            }
            Some(EnvResolution::ProceedWithoutSync) => {
                warn!(workspace_id = %workspace.id, keys = diff.len(), "discarding live environment changes");
                Ok(None)
            }
            Some(EnvResolution::Cancel) => Ok(Some(GateOutcome::Cancelled)),
        }
    }

    /// Run the gate and, if it lets the operation through, record it.
    async fn gate_and_open(
        &self,
        workspace: &Workspace,
        resolution: Option<EnvResolution>,
        operation_type: OperationType,
    ) -> Result<GateOutcome> {
        if let Some(stopped) = self.gate(workspace, resolution).await? {
            return Ok(stopped);
        }
        let ticket = self.open_operation(&workspace.id, operation_type).await?;
        Ok(GateOutcome::Proceeded(ticket))
    }

    /// Put back the intent a redeploy replaced, unless something has already
    /// moved the redeploy's own intent on.
    fn restore_intent(&self, workspace_id: &str, ours: IntentState, previous: IntentState) {
        let mut intents = self.intents();
        if intents.get(workspace_id) == ours {
            intents.restore(workspace_id, previous);
        }
    }

    async fn open_operation(
        &self,
        workspace_id: &str,
        operation_type: OperationType,
    ) -> Result<OperationTicket> {
        let operation_id = self
            .store
            .record_operation(workspace_id, operation_type, OperationStatus::Running)
            .await?;
        info!(workspace_id, operation = %operation_type, operation_id = %operation_id, "operation started");
        Ok(OperationTicket {
            operation_id,
            workspace_id: workspace_id.to_string(),
            operation_type,
        })
    }

    /// Run the driver side of an accepted operation in the background. The
    /// workspace stays claimed until it finishes.
    fn spawn_operation<F, Fut>(&self, guard: InFlightGuard, ticket: OperationTicket, work: F)
    where
        F: FnOnce(Coordinator) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let result = work(this.clone()).await;

            let (status, message) = match result {
                Ok(()) => {
                    info!(
                        workspace_id = %ticket.workspace_id,
                        operation = %ticket.operation_type,
                        "operation finished"
                    );
                    (OperationStatus::Success, None)
                }
                Err(e) => {
                    error!(
                        workspace_id = %ticket.workspace_id,
                        operation = %ticket.operation_type,
                        error = %e,
                        "operation failed"
                    );
                    this.mark_failed(&ticket.workspace_id).await;
                    (OperationStatus::Failed, Some(e.to_string()))
                }
            };

            if let Err(e) = this
                .store
                .complete_operation(&ticket.operation_id, status, message)
                .await
            {
                error!(operation_id = %ticket.operation_id, error = %e, "failed to record operation result");
            }
        });
    }

    async fn mark_failed(&self, workspace_id: &str) {
        if !self.sync.is_tracked(workspace_id) {
            return;
        }
        let update = WorkspaceStateUpdate::new(workspace_id).status(ContainerStatus::Error);
        if let Err(e) = self.apply(update).await {
            error!(workspace_id, error = %e, "failed to record container error");
        }
    }

    fn require_container(
        workspace: &Workspace,
        operation: OperationType,
        allowed: &[ContainerStatus],
    ) -> Result<String> {
        match &workspace.container_id {
            Some(id) if allowed.contains(&workspace.container_status) => Ok(id.clone()),
            _ => Err(CoordinatorError::InvalidState {
                workspace_id: workspace.id.clone(),
                operation,
                status: workspace.container_status,
            }),
        }
    }

    fn begin_intent(&self, workspace_id: &str, op: IntentOp) -> Result<()> {
        self.intents().begin(workspace_id, op, Utc::now())?;
        Ok(())
    }

    /// Issue an operation that tracks an intent, rolling the intent back if it
    /// could not even be recorded.
    async fn open_with_intent(
        &self,
        workspace_id: &str,
        op: IntentOp,
        operation_type: OperationType,
    ) -> Result<OperationTicket> {
        self.begin_intent(workspace_id, op)?;
        match self.open_operation(workspace_id, operation_type).await {
            Ok(ticket) => Ok(ticket),
            Err(e) => {
                self.intents().rollback(workspace_id);
                Err(e)
            }
        }
    }

    /// Image to create workspace containers from: the default template when it is ready.
    async fn default_template_host(&self) -> Option<TemplateHost> {
        match self.store.default_template().await {
            Ok(Some(template)) if template.status == TemplateStatus::Ready => {
                match (template.vmid, template.node) {
                    (Some(vmid), Some(node)) => Some(TemplateHost { vmid, node }),
                    _ => None,
                }
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "could not load default template, using driver image");
                None
            }
        }
    }

    async fn run_deploy(&self, workspace: &Workspace) -> Result<()> {
        self.apply(WorkspaceStateUpdate::new(&workspace.id).status(ContainerStatus::Creating))
            .await?;

        let spec = ContainerSpec {
            workspace_id: workspace.id.clone(),
            name: workspace.name.clone(),
            branch_name: workspace.branch_name.clone(),
            template: self.default_template_host().await,
            env: self
                .store
                .get_repository_env(&workspace.repository_id)
                .await?,
        };
        let handle = self.driver.create(&spec).await?;

        // Stays `creating` until the agent checks in.
        self.apply(
            WorkspaceStateUpdate::new(&workspace.id).container(handle.container_id, handle.ip),
        )
        .await?;
        Ok(())
    }

    async fn tear_down(&self, workspace_id: &str, container_id: &str) -> Result<()> {
        self.driver.destroy(container_id).await?;
        self.apply(WorkspaceStateUpdate::new(workspace_id).removed())
            .await?;
        Ok(())
    }

    /// Create a container for a workspace that has none.
    #[instrument(skip(self))]
    pub async fn deploy(&self, workspace_id: &str) -> Result<OperationTicket> {
        let (guard, workspace) = self.claim_loaded(workspace_id, OperationType::Deploy).await?;

        if workspace.has_container() {
            return Err(CoordinatorError::InvalidState {
                workspace_id: workspace_id.to_string(),
                operation: OperationType::Deploy,
                status: workspace.container_status,
            });
        }

        let ticket = self
            .open_with_intent(workspace_id, IntentOp::Deploy, OperationType::Deploy)
            .await?;
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            this.run_deploy(&workspace).await
        });
        Ok(ticket)
    }

    /// Destroy the container, if any, and create a fresh one.
    #[instrument(skip(self))]
    pub async fn redeploy(
        &self,
        workspace_id: &str,
        resolution: Option<EnvResolution>,
    ) -> Result<GateOutcome> {
        let (guard, workspace) = self
            .claim_loaded(workspace_id, OperationType::Redeploy)
            .await?;

        // Replaces a deploy or redeploy still waiting for its agent, so a stuck
        // container can always be rebuilt. Taken before the gate so the live
        // environment is never synced for a redeploy that is then refused.
        let started = Utc::now();
        let previous = self
            .intents()
            .supersede(workspace_id, IntentOp::Redeploy, started);
        let ours = IntentState::Pending {
            op: IntentOp::Redeploy,
            since: started,
        };

        let ticket = match self
            .gate_and_open(&workspace, resolution, OperationType::Redeploy)
            .await
        {
            Ok(GateOutcome::Proceeded(ticket)) => ticket,
            stopped => {
                self.restore_intent(workspace_id, ours, previous);
                return stopped;
            }
        };
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            if let Some(container_id) = &workspace.container_id {
                this.tear_down(&workspace.id, container_id).await?;
            }
            this.run_deploy(&workspace).await
        });
        Ok(GateOutcome::Proceeded(ticket))
    }

    #[instrument(skip(self))]
    pub async fn start(&self, workspace_id: &str) -> Result<OperationTicket> {
        let (guard, workspace) = self.claim_loaded(workspace_id, OperationType::Start).await?;
        let container_id = Self::require_container(
            &workspace,
            OperationType::Start,
            &[
                ContainerStatus::Exited,
                ContainerStatus::Dead,
                ContainerStatus::Error,
            ],
        )?;

        let ticket = self
            .open_operation(workspace_id, OperationType::Start)
            .await?;
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            this.driver.start(&container_id).await?;
            this.apply(WorkspaceStateUpdate::new(&workspace.id).status(ContainerStatus::Running))
                .await?;
            Ok(())
        });
        Ok(ticket)
    }

    #[instrument(skip(self))]
    pub async fn restart(&self, workspace_id: &str) -> Result<OperationTicket> {
        let (guard, workspace) = self.claim_loaded(workspace_id, OperationType::Restart).await?;
        let container_id = Self::require_container(
            &workspace,
            OperationType::Restart,
            &[ContainerStatus::Running, ContainerStatus::Error],
        )?;

        let ticket = self
            .open_operation(workspace_id, OperationType::Restart)
            .await?;
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            this.driver.restart(&container_id).await?;
            this.apply(WorkspaceStateUpdate::new(&workspace.id).status(ContainerStatus::Running))
                .await?;
            Ok(())
        });
        Ok(ticket)
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self, workspace_id: &str) -> Result<OperationTicket> {
        let (guard, workspace) = self.claim_loaded(workspace_id, OperationType::Shutdown).await?;
        let container_id = Self::require_container(
            &workspace,
            OperationType::Shutdown,
            &[ContainerStatus::Running, ContainerStatus::Creating],
        )?;

        let ticket = self
            .open_operation(workspace_id, OperationType::Shutdown)
            .await?;
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            this.driver.stop(&container_id).await?;
            this.apply(
                WorkspaceStateUpdate::new(&workspace.id)
                    .status(ContainerStatus::Exited)
                    .agent(false),
            )
            .await?;
            Ok(())
        });
        Ok(ticket)
    }

    /// Destroy the container but keep the workspace.
    #[instrument(skip(self))]
    pub async fn destroy(
        &self,
        workspace_id: &str,
        resolution: Option<EnvResolution>,
    ) -> Result<GateOutcome> {
        let (guard, workspace) = self.claim_loaded(workspace_id, OperationType::Destroy).await?;
        let container_id = workspace
            .container_id
            .clone()
            .ok_or_else(|| CoordinatorError::NoContainer(workspace_id.to_string()))?;

        let ticket = match self
            .gate_and_open(&workspace, resolution, OperationType::Destroy)
            .await?
        {
            GateOutcome::Proceeded(ticket) => ticket,
            stopped => return Ok(stopped),
        };
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            this.tear_down(&workspace.id, &container_id).await?;
            // A deploy that was still waiting for its container is moot now.
            this.intents().rollback(&workspace.id);
            Ok(())
        });
        Ok(GateOutcome::Proceeded(ticket))
    }

    /// Destroy the container, if any, and remove the workspace record.
    #[instrument(skip(self))]
    pub async fn delete_workspace(
        &self,
        workspace_id: &str,
        resolution: Option<EnvResolution>,
    ) -> Result<GateOutcome> {
        let (guard, workspace) = self
            .claim_loaded(workspace_id, OperationType::Delete)
            .await?;

        let ticket = match self
            .gate_and_open(&workspace, resolution, OperationType::Delete)
            .await?
        {
            GateOutcome::Proceeded(ticket) => ticket,
            stopped => return Ok(stopped),
        };
        self.spawn_operation(guard, ticket.clone(), move |this| async move {
            if let Some(container_id) = &workspace.container_id {
                this.tear_down(&workspace.id, container_id).await?;
            }
            this.store.delete_workspace(&workspace.id).await?;
            this.sync.forget(&workspace.id);
            this.intents().remove(&workspace.id);
            info!(workspace_id = %workspace.id, "workspace deleted");
            Ok(())
        });
        Ok(GateOutcome::Proceeded(ticket))
    }

    /// Resolve intents that have waited longer than the configured timeout as stalled.
    pub fn expire_intents(&self, now: DateTime<Utc>) -> Vec<(String, IntentOp)> {
        let limit = chrono::Duration::from_std(self.config.intent_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let stalled = self.intents().expire(now, limit);
        for (workspace_id, op) in &stalled {
            warn!(workspace_id = %workspace_id, %op, "no terminal status arrived, intent stalled");
        }
        stalled
    }

    pub fn spawn_intent_watchdog(&self) -> JoinHandle<()> {
        let this = self.clone();
        let period = this.config.watchdog_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                timeout_secs = this.config.intent_timeout.as_secs(),
                "intent watchdog started"
            );
            loop {
                interval.tick().await;
                this.expire_intents(Utc::now());
            }
        })
    }
}
