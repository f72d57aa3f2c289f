//! Converges CloudWatch alarms with the stored alarm definitions.
//!
//! The reconciler is stateless: everything durable lives in the definition
//! table and in CloudWatch itself, and every call it makes is idempotent, so
//! duplicate or concurrent invocations converge to the same alarm set.

use std::collections::HashMap;
use std::future::Future;

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cloud_watch_alarm_client::AlarmClient;
use crate::config::Config;
use crate::definition::{DefinitionSet, Profile};
use crate::dynamo_definition_store::{DefinitionStore, Item};
use crate::ec2_instance_client::DescribeTags;
use crate::error::ReconcilerError;
use crate::event::{
    ChangeKind, CustomResourceEvent, LifecycleDetail, LifecycleEvent, LifecycleTransition,
    ReconcileOutput, ReconcilerEvent, RequestType, StreamEvent, StreamRecord, AUTOSCALING_SOURCE,
};
use crate::lifecycle_client::{LifecycleActionResult, LifecycleActions};
use crate::plan::{group_by_instance, plan_instance, AlarmPlan};
use crate::retry::{bounded, with_retries, RetryPolicy};
use crate::seed::{default_catalog, physical_resource_id, seed_item, seed_profile};
use crate::sns_notifier::{FailureReport, Notifier};

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileResolution {
    /// The marker tag is absent; the instance is not ours to manage.
    Unmanaged,
    /// The marker tag is present but these profile tags are not.
    MissingProfile(Vec<String>),
    Managed(Profile),
}

pub fn resolve_profile(tags: &HashMap<String, String>, config: &Config) -> ProfileResolution {
    if !tags.contains_key(&config.marker_tag) {
        return ProfileResolution::Unmanaged;
    }
    let value = |key: &str| {
        tags.get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };
    match (value(config.name_tag.as_str()), value(config.type_tag.as_str())) {
        (Some(name), Some(kind)) => ProfileResolution::Managed(Profile::new(name, kind)),
        (name, kind) => {
            let mut missing = vec![];
            if name.is_none() {
                missing.push(config.name_tag.clone());
            }
            if kind.is_none() {
                missing.push(config.type_tag.clone());
            }
            ProfileResolution::MissingProfile(missing)
        }
    }
}

/// The last change of one profile within a stream batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileChange<'a> {
    pub profile: Profile,
    pub kind: ChangeKind,
    pub new_image: Option<&'a Item>,
}

/// Collapses a batch to the latest change per profile.
///
/// Records arrive in stream order per key, so the last one carries the
/// current definitions; earlier ones for the same profile are superseded.
/// Profiles keep the order in which they first appeared.
pub fn latest_changes<'a>(
    records: &'a [StreamRecord],
    report: &mut FailureReport,
) -> Vec<ProfileChange<'a>> {
    let mut changes: Vec<ProfileChange<'a>> = vec![];
    let mut positions: HashMap<Profile, usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let change = &record.dynamodb;
        let profile = Profile::from_key(&change.keys)
            .or_else(|| change.new_image.as_ref().and_then(Profile::from_key))
            .or_else(|| change.old_image.as_ref().and_then(Profile::from_key));
        let profile = match profile {
            Some(profile) => profile,
            None => {
                let id = record
                    .event_id
                    .clone()
                    .unwrap_or_else(|| format!("record #{}", index));
                warn!(record = %id, "stream record without Name/Type key skipped");
                report.push(id, "record has no Name/Type key");
                continue;
            }
        };

        let latest = ProfileChange {
            profile: profile.clone(),
            kind: record.event_name,
            new_image: change.new_image.as_ref(),
        };
        match positions.get(&profile) {
            Some(&position) => changes[position] = latest,
            None => {
                positions.insert(profile, changes.len());
                changes.push(latest);
            }
        }
    }
    changes
}

fn report_malformed(profile: &Profile, definitions: &DefinitionSet, report: &mut FailureReport) {
    for malformed in &definitions.malformed {
        warn!(%profile, definition = %malformed.key, reason = %malformed.reason, "skipping malformed definition");
        report.push(format!("{}/{}", profile, malformed.key), &malformed.reason);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Applied {
    put: usize,
    deleted: usize,
}

pub struct Reconciler<S, A, T, L, N> {
    store: S,
    alarms: A,
    tags: T,
    lifecycle: L,
    notifier: N,
    config: Config,
    retry: RetryPolicy,
}

impl<S, A, T, L, N> Reconciler<S, A, T, L, N>
where
    S: DefinitionStore,
    A: AlarmClient,
    T: DescribeTags,
    L: LifecycleActions,
    N: Notifier,
{
    pub fn new(store: S, alarms: A, tags: T, lifecycle: L, notifier: N, config: Config) -> Self {
        let retry = RetryPolicy::new(config.store_max_attempts);
        Reconciler {
            store,
            alarms,
            tags,
            lifecycle,
            notifier,
            config,
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Entry point for every invocation; dispatches on the payload's shape.
    pub async fn handle(&self, payload: Value) -> Result<ReconcileOutput, ReconcilerError> {
        let event = match ReconcilerEvent::deserialize(&payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, event = %payload, "unsupported event structure");
                return Ok(ReconcileOutput::message("unsupported event ignored"));
            }
        };

        match event {
            ReconcilerEvent::Lifecycle(event) => self.handle_lifecycle(&event).await,
            ReconcilerEvent::DefinitionChange(event) => self.handle_definition_changes(&event).await,
            ReconcilerEvent::Bootstrap(event) => self.handle_bootstrap(&event).await,
        }
    }

    /// Runs one external call with the per-call timeout and the retry budget.
    async fn call<R, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<R, ReconcilerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, ReconcilerError>>,
    {
        let limit = self.config.call_timeout;
        with_retries(operation, &self.retry, || bounded(operation, limit, call())).await
    }

    async fn report(&self, report: FailureReport) {
        if report.is_empty() {
            return;
        }
        let published = bounded(
            "Publish",
            self.config.call_timeout,
            self.notifier.publish(&report),
        )
        .await;
        if let Err(error) = published {
            error!(%error, failures = report.failures.len(), "could not publish failure report");
        }
    }

    async fn apply(&self, plan: &AlarmPlan, report: &mut FailureReport) -> Applied {
        let mut applied = Applied::default();
        for spec in &plan.puts {
            match self.call("PutMetricAlarm", || self.alarms.put_alarm(spec)).await {
                Ok(()) => applied.put += 1,
                Err(error) => {
                    error!(alarm = %spec.alarm_name, %error, "failed to put alarm");
                    report.push(spec.alarm_name.clone(), &error);
                }
            }
        }
        if !plan.deletes.is_empty() {
            match self
                .call("DeleteAlarms", || self.alarms.delete_alarms(&plan.deletes))
                .await
            {
                Ok(()) => applied.deleted += plan.deletes.len(),
                Err(error) => {
                    error!(alarms = ?plan.deletes, %error, "failed to delete alarms");
                    for name in &plan.deletes {
                        report.push(name.clone(), &error);
                    }
                }
            }
        }
        applied
    }

    // Lifecycle actions

    pub async fn handle_lifecycle(
        &self,
        event: &LifecycleEvent,
    ) -> Result<ReconcileOutput, ReconcilerError> {
        if event.source != AUTOSCALING_SOURCE {
            warn!(source = %event.source, "lifecycle event from unexpected source ignored");
            return Ok(ReconcileOutput::message("unexpected source ignored"));
        }
        let detail = &event.detail;
        if detail.lifecycle_transition == LifecycleTransition::Other {
            info!(
                instance_id = %detail.instance_id,
                detail_type = %event.detail_type,
                "lifecycle transition not handled"
            );
            return Ok(ReconcileOutput::message("lifecycle transition ignored"));
        }

        let outcome = self.reconcile_lifecycle(detail).await;
        let result = match outcome {
            Ok(_) => LifecycleActionResult::Continue,
            Err(_) => LifecycleActionResult::Abandon,
        };
        let completion = self
            .call("CompleteLifecycleAction", || {
                self.lifecycle.complete(detail, result)
            })
            .await;

        match (outcome, completion) {
            (Ok(message), Ok(())) => Ok(ReconcileOutput::message(message)),
            (Ok(_), Err(error)) => {
                error!(instance_id = %detail.instance_id, %error, "could not complete lifecycle action");
                Err(error)
            }
            (Err(error), completion) => {
                error!(instance_id = %detail.instance_id, %error, "abandoning lifecycle action");
                let mut report = FailureReport::new("lifecycle action").with_instance(&detail.instance_id);
                report.push(detail.instance_id.clone(), &error);
                if let Err(completion_error) = completion {
                    error!(instance_id = %detail.instance_id, %completion_error, "could not abandon lifecycle action");
                    report.push(detail.lifecycle_hook_name.clone(), &completion_error);
                }
                self.report(report).await;
                Err(error)
            }
        }
    }

    async fn reconcile_lifecycle(&self, detail: &LifecycleDetail) -> Result<String, ReconcilerError> {
        let instance_id = detail.instance_id.as_str();
        let tags = self
            .call("DescribeInstances", || self.tags.instance_tags(instance_id))
            .await?;

        let profile = match resolve_profile(&tags, &self.config) {
            ProfileResolution::Unmanaged => {
                info!(
                    instance_id,
                    marker = %self.config.marker_tag,
                    "marker tag not found, skipping CloudWatch alarm management"
                );
                return Ok(format!("{} is not managed", instance_id));
            }
            ProfileResolution::MissingProfile(missing) => {
                warn!(instance_id, ?missing, "marker tag present but profile tags missing");
                let mut report = FailureReport::new("lifecycle action").with_instance(instance_id);
                report.push(instance_id, format!("missing tags: {}", missing.join(", ")));
                self.report(report).await;
                return Ok(format!("{} has no alarm profile", instance_id));
            }
            ProfileResolution::Managed(profile) => profile,
        };

        match detail.lifecycle_transition {
            LifecycleTransition::Launching => self.launch(&profile, instance_id).await,
            LifecycleTransition::Terminating => self.terminate(&profile, instance_id).await,
            LifecycleTransition::Other => Ok(format!("{}: nothing to do", instance_id)),
        }
    }

    async fn launch(&self, profile: &Profile, instance_id: &str) -> Result<String, ReconcilerError> {
        let mut report = FailureReport::new("instance launch")
            .with_profile(profile)
            .with_instance(instance_id);

        let item = self
            .call("GetItem", || self.store.get_definitions(profile))
            .await?;
        let definitions = match item.as_ref().map(DefinitionSet::from_item) {
            Some(Ok(definitions)) => definitions,
            Some(Err(malformed)) => {
                warn!(%profile, reason = %malformed.reason, "alarm definitions unreadable");
                report.push(profile.to_string(), &malformed);
                self.report(report).await;
                return Ok(format!("{}: definitions of {} are unreadable", instance_id, profile));
            }
            None => {
                warn!(%profile, "no alarm definitions for profile");
                return Ok(format!("{}: no definitions for {}", instance_id, profile));
            }
        };
        report_malformed(profile, &definitions, &mut report);

        let prefix = profile.instance_prefix(instance_id);
        let existing = match self
            .call("DescribeAlarms", || self.alarms.describe_alarms(&prefix))
            .await
        {
            Ok(existing) => existing,
            Err(error) => {
                warn!(%prefix, %error, "could not list existing alarms, only creating");
                report.push(prefix.clone(), &error);
                vec![]
            }
        };

        let plan = plan_instance(
            profile,
            instance_id,
            &definitions,
            &existing,
            &self.config.alarm_actions(),
        );
        let applied = self.apply(&plan, &mut report).await;
        info!(%profile, instance_id, put = applied.put, deleted = applied.deleted, "instance launched");
        self.report(report).await;

        Ok(format!(
            "{}: {} alarm(s) put, {} deleted",
            instance_id, applied.put, applied.deleted
        ))
    }

    async fn terminate(&self, profile: &Profile, instance_id: &str) -> Result<String, ReconcilerError> {
        let prefix = profile.instance_prefix(instance_id);
        let existing = self
            .call("DescribeAlarms", || self.alarms.describe_alarms(&prefix))
            .await?;
        if existing.is_empty() {
            info!(%prefix, "no alarms left to delete");
            return Ok(format!("{}: no alarms to delete", instance_id));
        }

        let mut report = FailureReport::new("instance termination")
            .with_profile(profile)
            .with_instance(instance_id);
        let plan = AlarmPlan {
            puts: vec![],
            deletes: existing,
        };
        let applied = self.apply(&plan, &mut report).await;
        info!(%profile, instance_id, deleted = applied.deleted, "instance terminated");
        self.report(report).await;

        Ok(format!("{}: {} alarm(s) deleted", instance_id, applied.deleted))
    }

    // Definition changes

    pub async fn handle_definition_changes(
        &self,
        event: &StreamEvent,
    ) -> Result<ReconcileOutput, ReconcilerError> {
        let mut report = FailureReport::new("definition change");
        let changes = latest_changes(&event.records, &mut report);
        let mut instances = 0;

        for change in &changes {
            let desired = match self.desired_definitions(change, &mut report) {
                Some(desired) => desired,
                None => continue,
            };
            match self
                .reconcile_profile(&change.profile, &desired, &mut report)
                .await
            {
                Ok(count) => instances += count,
                Err(error) => {
                    error!(profile = %change.profile, %error, "definition change not applied");
                    self.report(report).await;
                    return Err(error);
                }
            }
        }
        self.report(report).await;

        Ok(ReconcileOutput::message(format!(
            "{} profile(s) reconciled across {} instance(s)",
            changes.len(),
            instances
        )))
    }

    fn desired_definitions(
        &self,
        change: &ProfileChange,
        report: &mut FailureReport,
    ) -> Option<DefinitionSet> {
        let profile = &change.profile;
        if change.kind == ChangeKind::Remove {
            info!(%profile, "profile removed, deleting its alarms");
            return Some(DefinitionSet::default());
        }
        let image = match change.new_image {
            Some(image) => image,
            None => {
                warn!(%profile, "change without new image skipped; stream must carry new images");
                report.push(profile.to_string(), "change has no new image");
                return None;
            }
        };
        match DefinitionSet::from_item(image) {
            Ok(definitions) => {
                report_malformed(profile, &definitions, report);
                Some(definitions)
            }
            Err(malformed) => {
                warn!(%profile, reason = %malformed.reason, "changed item unreadable, skipped");
                report.push(profile.to_string(), &malformed);
                None
            }
        }
    }

    /// Re-applies `desired` to every instance that currently has alarms of
    /// `profile`, returning how many instances were touched.
    async fn reconcile_profile(
        &self,
        profile: &Profile,
        desired: &DefinitionSet,
        report: &mut FailureReport,
    ) -> Result<usize, ReconcilerError> {
        let prefix = profile.prefix();
        let existing = self
            .call("DescribeAlarms", || self.alarms.describe_alarms(&prefix))
            .await?;
        let instances = group_by_instance(profile, &existing);
        if instances.is_empty() {
            info!(%profile, "no instances with alarms for profile");
        }

        let actions = self.config.alarm_actions();
        for (instance_id, names) in &instances {
            let plan = plan_instance(profile, instance_id, desired, names, &actions);
            if plan.is_empty() {
                continue;
            }
            let applied = self.apply(&plan, report).await;
            info!(
                %profile,
                instance_id = %instance_id,
                put = applied.put,
                deleted = applied.deleted,
                "instance reconciled"
            );
        }
        Ok(instances.len())
    }

    // Seeding

    pub async fn handle_bootstrap(
        &self,
        event: &CustomResourceEvent,
    ) -> Result<ReconcileOutput, ReconcilerError> {
        let profile = seed_profile(&self.config.default_profile, &event.resource_properties);
        match event.request_type {
            RequestType::Delete => {
                info!(%profile, "stack deleted, leaving alarm definitions in place");
                Ok(ReconcileOutput {
                    message: "nothing to delete".to_string(),
                    physical_resource_id: event
                        .physical_resource_id
                        .clone()
                        .or_else(|| Some(physical_resource_id(&profile))),
                })
            }
            RequestType::Create | RequestType::Update => {
                let message = match self.seed(&profile).await? {
                    Some(count) => format!("seeded {} definition(s) for {}", count, profile),
                    None => format!("definitions for {} already present", profile),
                };
                Ok(ReconcileOutput {
                    message,
                    physical_resource_id: Some(physical_resource_id(&profile)),
                })
            }
        }
    }

    /// Writes the bundled catalog under `profile` unless the profile already
    /// has definitions, returning how many were seeded.
    pub async fn seed(&self, profile: &Profile) -> Result<Option<usize>, ReconcilerError> {
        let catalog = default_catalog()?;
        for malformed in &catalog.malformed {
            warn!(definition = %malformed.key, reason = %malformed.reason, "catalog entry skipped");
        }
        let item = seed_item(profile, catalog);
        let inserted = self
            .call("PutItem", || self.store.insert_definitions(item.clone()))
            .await?;
        if !inserted {
            info!(%profile, "profile already has definitions, not seeding");
            return Ok(None);
        }
        info!(%profile, definitions = catalog.len(), "seeded default alarm definitions");
        Ok(Some(catalog.len()))
    }
}
