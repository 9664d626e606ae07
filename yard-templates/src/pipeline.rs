use crate::error::{PipelineError, Result};
use crate::events::{ProvisionEvent, ProvisionPhase};
use crate::registry::{JobHandle, JobKind, JobProgress, JobRegistry, JobReporter};
use crate::stack::StackCatalog;
use chrono::Utc;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use yard_core::{Template, TemplateSource, TemplateStatus};
use yard_provider::{CloneSource, TemplateDriver, TemplateHost};
use yard_store::Store;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOptions {
    /// Stop before conversion and leave the container running for manual work.
    #[serde(default)]
    pub staging: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub name: String,
    #[serde(flatten)]
    pub source: TemplateSource,
    #[serde(default)]
    pub tech_stacks: Vec<String>,
    #[serde(default)]
    pub auto_provision: bool,
    #[serde(default)]
    pub staging: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneTemplate {
    pub name: String,
    #[serde(default)]
    pub tech_stacks: Vec<String>,
    #[serde(default)]
    pub auto_provision: bool,
    #[serde(default)]
    pub staging: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackChanges {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Builds template images in the background, one job per template at a time.
#[derive(Clone)]
pub struct Pipeline {
    store: Store,
    driver: Arc<dyn TemplateDriver>,
    catalog: Arc<StackCatalog>,
    jobs: JobRegistry,
}

impl Pipeline {
    pub fn new(store: Store, driver: Arc<dyn TemplateDriver>, catalog: StackCatalog) -> Self {
        Self {
            store,
            driver,
            catalog: Arc::new(catalog),
            jobs: JobRegistry::new(),
        }
    }

    pub fn catalog(&self) -> &StackCatalog {
        &self.catalog
    }

    pub async fn get(&self, id: &str) -> Result<Template> {
        Ok(self.store.get_template(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Template>> {
        Ok(self.store.list_templates().await?)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.jobs.is_active(id)
    }

    pub fn progress(&self, id: &str) -> Option<JobProgress> {
        self.jobs.progress(id)
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.jobs.last_error(id)
    }

    /// Events of the running job, starting from its latest progress. `None` when idle.
    pub fn subscribe(&self, id: &str) -> Option<BoxStream<'static, ProvisionEvent>> {
        self.jobs.watch(id)
    }

    fn claim(&self, id: &str, kind: JobKind) -> Result<JobReporter> {
        self.jobs
            .try_begin(id, kind)
            .ok_or_else(|| PipelineError::JobActive(id.to_string()))
    }

    /// Mark templates whose job died with the previous process as failed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for template in self.store.list_templates().await? {
            if template.status == TemplateStatus::Provisioning && !self.jobs.is_active(&template.id)
            {
                warn!(template_id = %template.id, "provisioning was interrupted");
                self.store
                    .set_template_status(
                        &template.id,
                        TemplateStatus::Error,
                        Some("provisioning interrupted by a restart"),
                    )
                    .await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(&self, req: NewTemplate) -> Result<Template> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(PipelineError::Validation("name must not be empty".to_string()));
        }

        let inherited = match &req.source {
            TemplateSource::Base { base_ct_template } => {
                if base_ct_template.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "baseCtTemplate must not be empty".to_string(),
                    ));
                }
                BTreeSet::new()
            }
            TemplateSource::Parent { parent_template_id } => {
                let parent = self.store.get_template(parent_template_id).await?;
                if parent.status != TemplateStatus::Ready {
                    return Err(PipelineError::invalid_state(
                        parent.id,
                        parent.status,
                        "only a ready template can be cloned",
                    ));
                }
                parent.effective_tech_stacks()
            }
        };

        let mut own = BTreeSet::new();
        for stack in &req.tech_stacks {
            self.catalog.select(&mut own, &inherited, stack)?;
        }

        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: TemplateStatus::Pending,
            vmid: None,
            node: None,
            source: req.source,
            tech_stacks: own,
            inherited_tech_stacks: inherited,
            is_default: false,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let template = self.store.insert_template(&template).await?;
        info!(template_id = %template.id, stacks = template.tech_stacks.len(), "template created");

        if req.auto_provision {
            self.start_provision(&template.id, ProvisionOptions { staging: req.staging })
                .await?;
            return self.get(&template.id).await;
        }

        Ok(template)
    }

    /// Create a child template whose image starts from `parent_id`.
    pub async fn clone_template(&self, parent_id: &str, req: CloneTemplate) -> Result<Template> {
        self.create(NewTemplate {
            name: req.name,
            source: TemplateSource::parent(parent_id),
            tech_stacks: req.tech_stacks,
            auto_provision: req.auto_provision,
            staging: req.staging,
        })
        .await
    }

    /// Start the first build of a `pending` template.
    #[instrument(skip(self))]
    pub async fn start_provision(&self, id: &str, options: ProvisionOptions) -> Result<()> {
        let reporter = self.claim(id, JobKind::Provision)?;
        match self.prepare_provision(id).await {
            Ok(template) => {
                self.spawn_provision(template, reporter, options);
                Ok(())
            }
            Err(e) => {
                reporter.discard();
                Err(e)
            }
        }
    }

    async fn prepare_provision(&self, id: &str) -> Result<Template> {
        let template = self.store.get_template(id).await?;
        if template.status != TemplateStatus::Pending {
            return Err(PipelineError::invalid_state(
                id,
                template.status,
                "use recreate to build it again",
            ));
        }
        self.store
            .set_template_status(id, TemplateStatus::Provisioning, None)
            .await?;
        Ok(template)
    }

    /// Throw away whatever the template has and build it again from scratch.
    #[instrument(skip(self))]
    pub async fn start_recreate(&self, id: &str, options: ProvisionOptions) -> Result<()> {
        let reporter = self.claim(id, JobKind::Recreate)?;
        match self.prepare_recreate(id).await {
            Ok(template) => {
                self.spawn_provision(template, reporter, options);
                Ok(())
            }
            Err(e) => {
                reporter.discard();
                Err(e)
            }
        }
    }

    async fn prepare_recreate(&self, id: &str) -> Result<Template> {
        let template = self.store.get_template(id).await?;

        if let Ok(host) = host_of(&template) {
            if let Err(e) = self.driver.destroy_host(&host).await {
                warn!(template_id = id, vmid = host.vmid, error = %e, "failed to destroy previous template container");
            }
        }

        self.store.set_template_host(id, None, None).await?;
        self.store
            .set_template_status(id, TemplateStatus::Pending, None)
            .await?;
        self.store
            .set_template_status(id, TemplateStatus::Provisioning, None)
            .await?;
        Ok(self.store.get_template(id).await?)
    }

    fn spawn_provision(&self, template: Template, reporter: JobReporter, options: ProvisionOptions) {
        self.spawn_job(reporter, move |pipeline, handle| async move {
            pipeline.execute(&template, &handle, options).await
        });
    }

    /// Run `work` in its own task while this one keeps the reporter. A
    /// failure, or a panic in `work`, is written to the template before the
    /// terminal event goes out and the slot is released.
    fn spawn_job<F, Fut>(&self, reporter: JobReporter, work: F)
    where
        F: FnOnce(Pipeline, JobHandle) -> Fut,
        Fut: Future<Output = Result<TemplateStatus>> + Send + 'static,
    {
        let pipeline = self.clone();
        let template_id = reporter.template_id().to_string();
        let job = tokio::spawn(work(self.clone(), reporter.handle()));

        tokio::spawn(async move {
            let message = match job.await {
                Ok(Ok(status)) => {
                    info!(template_id = %template_id, %status, "template job finished");
                    reporter.complete(status);
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => {
                    error!(template_id = %template_id, error = %e, "template job task aborted");
                    "provisioning job aborted".to_string()
                }
            };

            error!(template_id = %template_id, error = %message, "template job failed");
            if let Err(e) = pipeline
                .store
                .set_template_status(&template_id, TemplateStatus::Error, Some(&message))
                .await
            {
                error!(template_id = %template_id, error = %e, "failed to record job error");
            }
            reporter.fail(message);
        });
    }

    async fn execute(
        &self,
        template: &Template,
        reporter: &JobHandle,
        options: ProvisionOptions,
    ) -> Result<TemplateStatus> {
        let source = match &template.source {
            TemplateSource::Base { base_ct_template } => {
                reporter.progress(
                    ProvisionPhase::Clone,
                    1,
                    1,
                    format!("Cloning base image {base_ct_template}"),
                );
                CloneSource::BaseImage(base_ct_template.clone())
            }
            TemplateSource::Parent { parent_template_id } => {
                let parent = self.store.get_template(parent_template_id).await?;
                reporter.progress(
                    ProvisionPhase::Clone,
                    1,
                    1,
                    format!("Cloning parent template {}", parent.name),
                );
                CloneSource::Template(host_of(&parent)?)
            }
        };
        let host = self.driver.clone_source(&template.id, &source).await?;
        self.store
            .set_template_host(&template.id, Some(host.vmid), Some(&host.node))
            .await?;

        let stacks = self.catalog.install_order(&template.tech_stacks)?;
        let steps: Vec<_> = stacks
            .iter()
            .copied()
            .flat_map(|stack| stack.install.iter().map(move |cmd| (&stack.name, cmd)))
            .collect();
        let total = steps.len();
        for (i, (stack, command)) in steps.into_iter().enumerate() {
            reporter.progress(
                ProvisionPhase::Install,
                i + 1,
                total,
                format!("{stack}: {command}"),
            );
            self.driver.run_step(&host, command).await?;
        }

        reporter.progress(ProvisionPhase::Agent, 1, 1, "Configuring workspace agent");
        self.driver.configure_agent(&host).await?;

        if options.staging {
            self.store
                .set_template_status(&template.id, TemplateStatus::Staging, None)
                .await?;
            return Ok(TemplateStatus::Staging);
        }

        self.convert(&template.id, &host, reporter).await?;
        Ok(TemplateStatus::Ready)
    }

    async fn convert(&self, id: &str, host: &TemplateHost, reporter: &JobHandle) -> Result<()> {
        reporter.progress(ProvisionPhase::Finalize, 1, 1, "Converting container to template");
        self.driver.convert_to_template(host).await?;
        self.store
            .set_template_status(id, TemplateStatus::Ready, None)
            .await?;
        Ok(())
    }

    /// Commit a staging template's live container as its final image.
    ///
    /// Returns as soon as the conversion has started, with the template still
    /// `staging`; the outcome arrives on the job's event stream.
    #[instrument(skip(self))]
    pub async fn finalize(&self, id: &str) -> Result<Template> {
        let reporter = self.claim(id, JobKind::Finalize)?;

        let host = match self.prepare_finalize(id).await {
            Ok(host) => host,
            Err(e) => {
                reporter.discard();
                return Err(e);
            }
        };

        let template_id = id.to_string();
        self.spawn_job(reporter, move |pipeline, handle| async move {
            pipeline.convert(&template_id, &host, &handle).await?;
            Ok(TemplateStatus::Ready)
        });

        self.get(id).await
    }

    async fn prepare_finalize(&self, id: &str) -> Result<TemplateHost> {
        let template = self.store.get_template(id).await?;
        if template.status != TemplateStatus::Staging {
            return Err(PipelineError::invalid_state(
                id,
                template.status,
                "only a staging template can be finalized",
            ));
        }
        host_of(&template)
    }

    /// Delete a template and, best effort, its backing container.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let reporter = self.claim(id, JobKind::Maintenance)?;
        let result = self.delete_claimed(id).await;
        reporter.discard();
        result
    }

    async fn delete_claimed(&self, id: &str) -> Result<()> {
        let template = self.store.get_template(id).await?;

        let children = self.store.child_templates(id).await?;
        if !children.is_empty() {
            return Err(PipelineError::HasChildren {
                id: id.to_string(),
                children: children.into_iter().map(|c| c.name).collect(),
            });
        }

        if let Ok(host) = host_of(&template) {
            if let Err(e) = self.driver.destroy_host(&host).await {
                warn!(template_id = id, vmid = host.vmid, error = %e, "failed to destroy template container");
            }
        }

        self.store.delete_template(id).await?;
        info!(template_id = id, "template deleted");
        Ok(())
    }

    /// Make a ready template the one new workspaces are created from.
    pub async fn set_default(&self, id: &str) -> Result<Template> {
        let template = self.store.get_template(id).await?;
        if template.status != TemplateStatus::Ready {
            return Err(PipelineError::invalid_state(
                id,
                template.status,
                "only a ready template can be the default",
            ));
        }
        self.store.set_default_template(id).await?;
        self.get(id).await
    }

    /// Edit a pending template's own stack selection. Removals apply first.
    pub async fn update_stacks(&self, id: &str, changes: StackChanges) -> Result<Template> {
        let reporter = self.claim(id, JobKind::Maintenance)?;
        let result = self.update_stacks_claimed(id, &changes).await;
        reporter.discard();
        result
    }

    async fn update_stacks_claimed(&self, id: &str, changes: &StackChanges) -> Result<Template> {
        let template = self.store.get_template(id).await?;
        if template.status != TemplateStatus::Pending {
            return Err(PipelineError::invalid_state(
                id,
                template.status,
                "tech stacks can only change before provisioning",
            ));
        }

        let mut own = template.tech_stacks.clone();
        for stack in &changes.remove {
            self.catalog
                .deselect(&mut own, &template.inherited_tech_stacks, stack)?;
        }
        for stack in &changes.add {
            self.catalog
                .select(&mut own, &template.inherited_tech_stacks, stack)?;
        }

        self.store.set_template_stacks(id, &own).await?;
        self.get(id).await
    }
}

fn host_of(template: &Template) -> Result<TemplateHost> {
    match (template.vmid, &template.node) {
        (Some(vmid), Some(node)) => Ok(TemplateHost {
            vmid,
            node: node.clone(),
        }),
        _ => Err(PipelineError::Validation(format!(
            "template {} has no backing container",
            template.id
        ))),
    }
}
