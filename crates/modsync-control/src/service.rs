//! Module service implementation.
//!
//! This module provides the `ModuleControl` trait and `ModuleService`
//! implementation that coordinates module records, template rendering and
//! cluster writes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use modsync_cluster::{ClusterResource, ClusterStore};
use modsync_core::{ContentDigest, ModuleName, ResourceIdentity};
use modsync_store::{Module, ModuleSpec, ModuleStatus, ReconcilePhase, Store, StoreError};

use crate::cancel::CancelSignal;
use crate::diff::{self, ResourcePartition};
use crate::error::{ControlError, Result};
use crate::guard;
use crate::identity::{self, DesiredResource};
use crate::lifecycle::ReconcileRun;
use crate::ownership;
use crate::render::{self, RenderContext, Renderer, ValuesRenderer};
use crate::templates::TemplateStore;
use crate::types::{
    validate_spec, ApplyProgress, ControlConfig, CreateModuleRequest, ReconcilePlan,
    ReconcileReport, RenderedSet, ResourceState, TemplatePreview, TrackedResource,
    UpdateModuleRequest, ValidationReport,
};

/// Trait defining the module operations.
///
/// This trait is the boundary the gateway talks to. Every call runs to
/// completion before returning; nothing is reconciled in the background.
#[async_trait]
pub trait ModuleControl: Send + Sync {
    // =========================================================================
    // Module records
    // =========================================================================

    /// Get a module with its last reconcile status.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ModuleNotFound` if the module doesn't exist.
    async fn get_module(&self, name: &ModuleName) -> Result<Module>;

    /// List all modules ordered by name.
    async fn list_modules(&self) -> Result<Vec<Module>>;

    /// Create a module.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` for a malformed request, or
    /// `ControlError::AlreadyExists` if the name is taken.
    async fn create_module(&self, request: CreateModuleRequest) -> Result<Module>;

    /// Replace a module's spec.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Conflict` if the request's token is stale.
    async fn update_module(&self, name: &ModuleName, request: UpdateModuleRequest) -> Result<Module>;

    /// Delete a module and every resource it owns.
    ///
    /// If any owned resource cannot be deleted, the module record is kept.
    async fn delete_module(&self, name: &ModuleName) -> Result<()>;

    // =========================================================================
    // Owned resources
    // =========================================================================

    /// Delete a single resource the module owns.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotOwned` if the resource exists but does not
    /// carry this module's ownership marker.
    async fn delete_owned_resource(&self, name: &ModuleName, identity: &ResourceIdentity)
        -> Result<()>;

    /// Owned resources annotated against the current render, plus rendered
    /// resources that are missing from the cluster.
    async fn list_resources(&self, name: &ModuleName) -> Result<Vec<TrackedResource>>;

    // =========================================================================
    // Rendering and reconciliation
    // =========================================================================

    /// Render the stored spec and, if given, a proposed spec side by side.
    async fn preview_template(
        &self,
        name: &ModuleName,
        proposed: Option<ModuleSpec>,
    ) -> Result<TemplatePreview>;

    /// Compute what a reconcile would do, without changing anything.
    async fn plan_module(&self, name: &ModuleName) -> Result<ReconcilePlan>;

    /// Bring the cluster in line with the module's render.
    ///
    /// Creates and updates are applied before deletes.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::PartialApply` or `ControlError::Cancelled` with
    /// the progress made if the apply stops partway.
    async fn reconcile_module(&self, name: &ModuleName, cancel: CancelSignal)
        -> Result<ReconcileReport>;

    /// Check that the stored spec renders to well-formed manifests.
    async fn validate_module(&self, name: &ModuleName) -> Result<ValidationReport>;
}

/// A single cluster write.
enum Step<'a> {
    Create(&'a DesiredResource),
    Update(&'a DesiredResource),
    Delete(&'a ResourceIdentity),
}

impl Step<'_> {
    fn identity(&self) -> &ResourceIdentity {
        match self {
            Self::Create(desired) | Self::Update(desired) => &desired.identity,
            Self::Delete(identity) => identity,
        }
    }
}

/// What a step actually did once it saw the live object.
enum Applied {
    Created,
    Updated,
    Deleted,
}

/// The main module service implementation.
pub struct ModuleService<S: Store> {
    store: Arc<S>,
    cluster: Arc<dyn ClusterStore>,
    templates: Arc<dyn TemplateStore>,
    renderer: Arc<dyn Renderer>,
    config: ControlConfig,
}

impl<S: Store> ModuleService<S> {
    /// Create a new module service using the built-in values renderer.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        cluster: Arc<dyn ClusterStore>,
        templates: Arc<dyn TemplateStore>,
        config: ControlConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            templates,
            renderer: Arc::new(ValuesRenderer::new()),
            config,
        }
    }

    /// Replace the renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    fn load(&self, name: &ModuleName) -> Result<Module> {
        self.store
            .get_module(name)?
            .ok_or_else(|| ControlError::ModuleNotFound(name.clone()))
    }

    async fn render(
        &self,
        name: &ModuleName,
        namespace: &str,
        spec: &ModuleSpec,
    ) -> Result<Vec<DesiredResource>> {
        let template = self.templates.fetch(&spec.template_ref).await?;
        let ctx = RenderContext {
            name,
            namespace,
            spec,
        };
        let manifests = self.renderer.render(&ctx, &template)?;
        let scopes = identity::discover_scopes(self.cluster.as_ref(), &manifests).await;
        identity::resolve_all(manifests, name, namespace, &scopes)
    }

    /// Owned resources, keyed the way `desired` addresses them.
    async fn owned_for(
        &self,
        name: &ModuleName,
        desired: &[DesiredResource],
    ) -> Result<Vec<ClusterResource>> {
        let owned = ownership::list_owned(self.cluster.as_ref(), name).await?;
        Ok(diff::align_versions(desired, owned))
    }

    async fn plan(&self, module: &Module) -> Result<ReconcilePlan> {
        let desired = self
            .render(&module.name, &module.namespace, &module.spec)
            .await?;
        let owned = self.owned_for(&module.name, &desired).await?;
        Ok(Self::plan_from(module, desired, &owned))
    }

    fn plan_from(
        module: &Module,
        desired: Vec<DesiredResource>,
        owned: &[ClusterResource],
    ) -> ReconcilePlan {
        let partition = diff::diff_resources(&desired, owned);
        ReconcilePlan {
            module: module.name.clone(),
            generation: module.generation,
            digest: digest_of(&desired),
            partition,
            desired,
        }
    }

    /// Create everything in `to_create` and replace everything in
    /// `to_update`.
    ///
    /// A `to_create` identity that already exists is replaced only if this
    /// module owns it; a `to_update` identity is re-read and must still be
    /// owned.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Cancelled` or `ControlError::PartialApply`
    /// carrying `progress` if the apply stops partway.
    pub async fn apply_upserts(
        &self,
        plan: &ReconcilePlan,
        cancel: &mut CancelSignal,
        progress: &mut ApplyProgress,
    ) -> Result<()> {
        let by_id: BTreeMap<&ResourceIdentity, &DesiredResource> =
            plan.desired.iter().map(|d| (&d.identity, d)).collect();

        let mut steps = Vec::with_capacity(plan.partition.to_create.len() + plan.partition.to_update.len());
        for id in &plan.partition.to_create {
            steps.push(Step::Create(desired_for(&by_id, id)?));
        }
        for id in &plan.partition.to_update {
            steps.push(Step::Update(desired_for(&by_id, id)?));
        }

        self.run_steps(&plan.module, steps, cancel, progress).await
    }

    /// Delete everything in `to_delete`. Resources already gone count as
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Cancelled` or `ControlError::PartialApply`
    /// carrying `progress` if the apply stops partway.
    pub async fn apply_deletes(
        &self,
        plan: &ReconcilePlan,
        cancel: &mut CancelSignal,
        progress: &mut ApplyProgress,
    ) -> Result<()> {
        let steps = plan.partition.to_delete.iter().map(Step::Delete).collect();
        self.run_steps(&plan.module, steps, cancel, progress).await
    }

    async fn run_steps(
        &self,
        module: &ModuleName,
        steps: Vec<Step<'_>>,
        cancel: &mut CancelSignal,
        progress: &mut ApplyProgress,
    ) -> Result<()> {
        for step in steps {
            if cancel.is_cancelled() {
                return Err(ControlError::Cancelled(std::mem::take(progress)));
            }

            let id = step.identity().clone();
            if let Some(pos) = progress.pending.iter().position(|p| *p == id) {
                progress.pending.remove(pos);
            }
            progress.in_flight = Some(id.clone());

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::warn!(module = %module, identity = %id, "Apply cancelled during write");
                    return Err(ControlError::Cancelled(std::mem::take(progress)));
                }
                outcome = self.apply_step(module, &step) => outcome,
            };

            // A failed write keeps its identity in flight
            match outcome {
                Ok(applied) => {
                    progress.in_flight = None;
                    match applied {
                        Applied::Created => progress.created.push(id),
                        Applied::Updated => progress.updated.push(id),
                        Applied::Deleted => progress.deleted.push(id),
                    }
                }
                Err(e) => {
                    tracing::warn!(module = %module, identity = %id, error = %e, "Apply step failed");
                    return Err(ControlError::PartialApply {
                        progress: std::mem::take(progress),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(())
    }

    async fn apply_step(&self, module: &ModuleName, step: &Step<'_>) -> Result<Applied> {
        let id = step.identity();
        let existing = self.cluster.get(id).await?;

        match (step, existing) {
            (Step::Create(desired) | Step::Update(desired), None) => {
                self.cluster.create(&desired.manifest).await?;
                tracing::debug!(module = %module, identity = %id, "Created resource");
                Ok(Applied::Created)
            }
            (Step::Create(desired) | Step::Update(desired), Some(live))
                if ownership::is_owned_by(&live, module) =>
            {
                self.cluster.replace(&desired.manifest).await?;
                tracing::debug!(module = %module, identity = %id, "Replaced resource");
                Ok(Applied::Updated)
            }
            (Step::Delete(_), None) => {
                tracing::debug!(module = %module, identity = %id, "Resource already gone");
                Ok(Applied::Deleted)
            }
            (Step::Delete(_), Some(live)) if ownership::is_owned_by(&live, module) => {
                if self.cluster.delete(id).await? {
                    tracing::debug!(module = %module, identity = %id, "Deleted resource");
                } else {
                    tracing::debug!(module = %module, identity = %id, "Resource already gone");
                }
                Ok(Applied::Deleted)
            }
            (_, Some(_)) => {
                tracing::warn!(module = %module, identity = %id, "Refusing to touch unowned resource");
                Err(ControlError::NotOwned {
                    module: module.clone(),
                    identity: id.clone(),
                })
            }
        }
    }

    async fn reconcile(
        &self,
        module: &Module,
        run: &mut ReconcileRun,
        cancel: &mut CancelSignal,
    ) -> Result<ReconcileReport> {
        let desired = self
            .render(&module.name, &module.namespace, &module.spec)
            .await?;

        run.advance(ReconcilePhase::Diffing)?;
        let owned = self.owned_for(&module.name, &desired).await?;
        let plan = Self::plan_from(module, desired, &owned);

        run.advance(ReconcilePhase::Applying)?;
        let partition = &plan.partition;
        let mut progress = ApplyProgress {
            pending: partition
                .to_create
                .iter()
                .chain(&partition.to_update)
                .chain(&partition.to_delete)
                .cloned()
                .collect(),
            ..ApplyProgress::default()
        };
        self.apply_upserts(&plan, cancel, &mut progress).await?;
        self.apply_deletes(&plan, cancel, &mut progress).await?;

        run.advance(ReconcilePhase::Settled)?;
        Ok(ReconcileReport {
            module: module.name.clone(),
            generation: module.generation,
            phase: run.phase(),
            created: progress.created,
            updated: progress.updated,
            deleted: progress.deleted,
            digest: plan.digest,
        })
    }

    fn record_status(
        &self,
        module: &Module,
        phase: ReconcilePhase,
        message: Option<String>,
        progress: &ApplyProgress,
    ) {
        let status = ModuleStatus {
            phase,
            message,
            observed_generation: module.generation,
            created: count(&progress.created),
            updated: count(&progress.updated),
            deleted: count(&progress.deleted),
            reconciled_at: Utc::now(),
        };

        if let Err(e) = self.store.put_status(&module.name, &status) {
            tracing::warn!(module = %module.name, error = %e, "Failed to record reconcile status");
        }
    }
}

#[async_trait]
impl<S: Store + 'static> ModuleControl for ModuleService<S> {
    // =========================================================================
    // Module records
    // =========================================================================

    async fn get_module(&self, name: &ModuleName) -> Result<Module> {
        self.load(name)
    }

    async fn list_modules(&self) -> Result<Vec<Module>> {
        Ok(self.store.list_modules()?)
    }

    async fn create_module(&self, request: CreateModuleRequest) -> Result<Module> {
        let new = request.validate(&self.config)?;
        let module = self.store.insert_module(new)?;

        tracing::info!(
            module = %module.name,
            namespace = %module.namespace,
            template = %module.spec.template_ref,
            "Module created"
        );

        Ok(module)
    }

    async fn update_module(&self, name: &ModuleName, request: UpdateModuleRequest) -> Result<Module> {
        let spec = request.validate_spec(&self.config)?;
        let current = self.load(name)?;
        guard::ensure_namespace_unchanged(&current, request.namespace.as_deref())?;

        let module = guard::update_module(self.store.as_ref(), name, spec, &request.version_token)?;

        tracing::info!(
            module = %module.name,
            generation = module.generation,
            template = %module.spec.template_ref,
            "Module updated"
        );

        Ok(module)
    }

    async fn delete_module(&self, name: &ModuleName) -> Result<()> {
        let module = self.load(name)?;
        let owned = ownership::list_owned(self.cluster.as_ref(), &module.name).await?;

        for resource in &owned {
            if let Err(e) = self.cluster.delete(&resource.identity).await {
                tracing::error!(
                    module = %name,
                    identity = %resource.identity,
                    error = %e,
                    "Cascading delete failed, keeping module"
                );
                return Err(e.into());
            }
        }

        match self.store.delete_module(name) {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(ControlError::ModuleNotFound(name.clone())),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(module = %name, resources = owned.len(), "Module deleted");
        Ok(())
    }

    // =========================================================================
    // Owned resources
    // =========================================================================

    async fn delete_owned_resource(
        &self,
        name: &ModuleName,
        identity: &ResourceIdentity,
    ) -> Result<()> {
        self.load(name)?;

        let live = self
            .cluster
            .get(identity)
            .await
            .map_err(ControlError::Lookup)?
            .ok_or_else(|| ControlError::ResourceNotFound(identity.clone()))?;

        if !ownership::is_owned_by(&live, name) {
            tracing::warn!(module = %name, identity = %identity, "Refusing to delete unowned resource");
            return Err(ControlError::NotOwned {
                module: name.clone(),
                identity: identity.clone(),
            });
        }

        if self.cluster.delete(identity).await? {
            tracing::info!(module = %name, identity = %identity, "Owned resource deleted");
        } else {
            tracing::debug!(module = %name, identity = %identity, "Resource already gone");
        }
        Ok(())
    }

    async fn list_resources(&self, name: &ModuleName) -> Result<Vec<TrackedResource>> {
        let module = self.load(name)?;
        let desired = self
            .render(&module.name, &module.namespace, &module.spec)
            .await?;
        let owned = self.owned_for(name, &desired).await?;

        let wanted: BTreeSet<&ResourceIdentity> = desired.iter().map(|d| &d.identity).collect();
        let present: BTreeSet<&ResourceIdentity> = owned.iter().map(|r| &r.identity).collect();

        let mut tracked: Vec<TrackedResource> = owned
            .iter()
            .map(|resource| TrackedResource {
                identity: resource.identity.clone(),
                state: if wanted.contains(&resource.identity) {
                    ResourceState::Live
                } else {
                    ResourceState::Deleted
                },
                manifest: resource.manifest.clone(),
            })
            .collect();

        tracked.extend(
            desired
                .iter()
                .filter(|d| !present.contains(&d.identity))
                .map(|d| TrackedResource {
                    identity: d.identity.clone(),
                    state: ResourceState::Missing,
                    manifest: d.manifest.clone(),
                }),
        );
        tracked.sort_by(|a, b| a.identity.cmp(&b.identity));

        Ok(tracked)
    }

    // =========================================================================
    // Rendering and reconciliation
    // =========================================================================

    async fn preview_template(
        &self,
        name: &ModuleName,
        proposed: Option<ModuleSpec>,
    ) -> Result<TemplatePreview> {
        let module = self.load(name)?;
        let proposed = proposed
            .map(|spec| validate_spec(spec.template_ref, spec.values, &self.config))
            .transpose()?;

        let current = self
            .render(&module.name, &module.namespace, &module.spec)
            .await?;
        let next = match &proposed {
            Some(spec) => self.render(&module.name, &module.namespace, spec).await?,
            None => current.clone(),
        };

        let current = rendered_set(current);
        let proposed = rendered_set(next);
        let changes = compare_renders(&current, &proposed);

        Ok(TemplatePreview {
            current,
            proposed,
            changes,
        })
    }

    async fn plan_module(&self, name: &ModuleName) -> Result<ReconcilePlan> {
        let module = self.load(name)?;
        let plan = self.plan(&module).await?;

        tracing::debug!(
            module = %name,
            create = plan.partition.to_create.len(),
            update = plan.partition.to_update.len(),
            delete = plan.partition.to_delete.len(),
            "Planned reconcile"
        );

        Ok(plan)
    }

    async fn reconcile_module(
        &self,
        name: &ModuleName,
        mut cancel: CancelSignal,
    ) -> Result<ReconcileReport> {
        let module = self.load(name)?;
        let mut run = ReconcileRun::start(module.name.clone());

        match self.reconcile(&module, &mut run, &mut cancel).await {
            Ok(report) => {
                let progress = ApplyProgress {
                    created: report.created.clone(),
                    updated: report.updated.clone(),
                    deleted: report.deleted.clone(),
                    ..ApplyProgress::default()
                };
                self.record_status(&module, ReconcilePhase::Settled, None, &progress);

                tracing::info!(
                    module = %name,
                    generation = module.generation,
                    created = report.created.len(),
                    updated = report.updated.len(),
                    deleted = report.deleted.len(),
                    "Module reconciled"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(transition) = run.fail() {
                    tracing::error!(module = %name, error = %transition, "Reconcile state machine error");
                }
                self.record_status(
                    &module,
                    ReconcilePhase::Failed,
                    Some(e.to_string()),
                    &progress_of(&e),
                );

                tracing::error!(module = %name, error = %e, "Reconcile failed");
                Err(e)
            }
        }
    }

    async fn validate_module(&self, name: &ModuleName) -> Result<ValidationReport> {
        let module = self.load(name)?;
        let desired = self
            .render(&module.name, &module.namespace, &module.spec)
            .await?;

        Ok(ValidationReport {
            module: module.name,
            digest: digest_of(&desired),
            resources: desired.into_iter().map(|d| d.identity).collect(),
        })
    }
}

fn desired_for<'a>(
    by_id: &BTreeMap<&ResourceIdentity, &'a DesiredResource>,
    id: &ResourceIdentity,
) -> Result<&'a DesiredResource> {
    by_id
        .get(id)
        .copied()
        .ok_or_else(|| ControlError::Internal(format!("planned resource {id} is missing from the render")))
}

fn digest_of(desired: &[DesiredResource]) -> ContentDigest {
    let manifests: Vec<_> = desired.iter().map(|d| d.manifest.clone()).collect();
    render::digest(&manifests)
}

fn rendered_set(desired: Vec<DesiredResource>) -> RenderedSet {
    let digest = digest_of(&desired);
    let (identities, manifests) = desired.into_iter().map(|d| (d.identity, d.manifest)).unzip();
    RenderedSet {
        manifests,
        identities,
        digest,
    }
}

fn progress_of(err: &ControlError) -> ApplyProgress {
    match err {
        ControlError::PartialApply { progress, .. } | ControlError::Cancelled(progress) => {
            progress.clone()
        }
        _ => ApplyProgress::default(),
    }
}

fn count(ids: &[ResourceIdentity]) -> u32 {
    u32::try_from(ids.len()).unwrap_or(u32::MAX)
}

/// Identity changes going from one render to another.
#[must_use]
pub fn compare_renders(current: &RenderedSet, proposed: &RenderedSet) -> ResourcePartition {
    diff::diff(
        &proposed.identities.iter().cloned().collect(),
        &current.identities.iter().cloned().collect(),
    )
}
