//! Transfer executor
//!
//! A run has three stages:
//!
//! 1. **Plan**: every source repository is connected, its tags resolved, manifests
//!    fetched and filtered, and each destination checked for what it already has.
//!    Source repositories are planned concurrently; the results are folded into one
//!    [`Plan`] afterwards.
//! 2. **Transfer**: copy units are packed into conflict-free phases and run phase by
//!    phase, units of a phase in parallel. Every blob is re-checked right before it is
//!    written, then mounted when possible and uploaded otherwise.
//! 3. **Push**: manifests are pushed to each destination once every blob they reference
//!    is confirmed there; children of a list go before the list.
//!
//! Failures are attributed to their (source, destination) pair and never stop sibling
//! work.

use crate::destination::{Destination, DestinationKind, format_reference};
use crate::error::{AggregateError, MappingFailure, MirrorError, Result};
use crate::image::{Descriptor, DigestUtils, Manifest, ManifestPayload, RepositoryKey};
use crate::mirror::context::{MirrorContext, RunSummary};
use crate::mirror::mapping::Mapping;
use crate::mirror::plan::{BlobCopyUnit, Plan, PlannedManifest, RepositoryPlan};
use crate::mirror::scheduler::schedule;
use crate::mirror::tree::{DestinationSet, SourceUnit, TargetTree};
use crate::registry::{MountOutcome, Repository};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tokio::sync::Semaphore;

/// One successfully pushed destination reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedReference {
    pub digest: String,
    pub reference: String,
}

impl fmt::Display for PushedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.digest, self.reference)
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Default)]
pub struct MirrorReport {
    pub pushed: Vec<PushedReference>,
    pub failures: Vec<MappingFailure>,
    pub stats: RunSummary,
    pub phases: usize,
}

impl MirrorReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The report when nothing failed, otherwise every failure as one error
    pub fn into_result(self) -> std::result::Result<Self, AggregateError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(AggregateError::new(self.failures))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobOutcome {
    Present,
    Mounted,
    Uploaded(u64),
}

/// Manifests read from one source digest, after platform filtering
struct SourceContent {
    top: ManifestPayload,
    /// Image manifests to copy with the blobs they reference
    images: Vec<(ManifestPayload, Vec<Descriptor>)>,
    is_list: bool,
}

/// What one source repository needs from one destination repository
struct DestinationIntent {
    kind: DestinationKind,
    destination: RepositoryKey,
    blobs: Vec<(String, bool)>,
    manifests: Vec<PlannedManifest>,
    tags: Vec<(String, Vec<String>)>,
    digest_only: Vec<(String, bool)>,
}

impl DestinationIntent {
    fn new(kind: DestinationKind, destination: RepositoryKey) -> Self {
        Self {
            kind,
            destination,
            blobs: Vec::new(),
            manifests: Vec::new(),
            tags: Vec::new(),
            digest_only: Vec::new(),
        }
    }
}

/// Planning result of one source repository
struct SourcePlan {
    source: RepositoryKey,
    intents: Vec<DestinationIntent>,
    /// Failures, with the destination repository they belong to when known
    failures: Vec<(Option<(DestinationKind, RepositoryKey)>, MappingFailure)>,
}

impl SourcePlan {
    fn new(source: RepositoryKey) -> Self {
        Self {
            source,
            intents: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Attribute `cause` to every destination of a source reference
    fn fail_all(&mut self, source: &str, destinations: &DestinationSet, cause: MirrorError) {
        for (kind, key, tags) in destinations.iter() {
            self.failures.push((
                Some((kind, key.clone())),
                MappingFailure::new(source, describe(kind, key, tags), cause.clone()),
            ));
        }
    }

    fn apply(self, plan: &mut Plan) {
        for intent in self.intents {
            let repository = plan.repository_mut(intent.kind, &intent.destination);
            for (digest, exists) in intent.blobs {
                repository.record_blob(&self.source, &digest, exists);
            }
            for manifest in intent.manifests {
                repository.manifests.add(manifest);
            }
            for (digest, tags) in intent.tags {
                repository.manifests.add_tags(&digest, tags);
            }
            for (digest, reported) in intent.digest_only {
                repository.manifests.add_digest_only(&digest, reported);
            }
        }
        for (destination, failure) in self.failures {
            match destination {
                Some((kind, key)) => plan.repository_mut(kind, &key).errors.push(failure),
                None => plan.record_failure(failure),
            }
        }
    }
}

/// Destination reference with every requested tag, for failure reports
fn describe<'a>(kind: DestinationKind, key: &RepositoryKey, tags: impl IntoIterator<Item = &'a String>) -> String {
    let tags: Vec<&str> = tags.into_iter().map(String::as_str).collect();
    if tags.is_empty() {
        format_reference(kind, key, None)
    } else {
        format_reference(kind, key, Some(&tags.join(",")))
    }
}

/// Mirror every mapping and report the result
pub async fn run(context: &MirrorContext, mappings: &[Mapping]) -> MirrorReport {
    let output = &context.output;
    let tree = TargetTree::build(mappings);
    let workers = Semaphore::new(context.options.limits.max_registry);

    output.section("Planning");
    output.info(&format!(
        "{} mapping(s) from {} source repositories",
        mappings.len(),
        tree.len()
    ));

    let planned = join_all(tree.units().map(|unit| {
        let workers = &workers;
        async move {
            let _permit = workers.acquire().await;
            plan_source(context, unit).await
        }
    }))
    .await;

    let mut plan = Plan::new();
    for source_plan in planned {
        source_plan.apply(&mut plan);
    }
    plan.finalize(&context.cache.blob_snapshot().await);

    let units = plan.copy_units();
    let phases = schedule(&units);
    let mut report = MirrorReport {
        phases: phases.len(),
        failures: plan.failures(),
        ..MirrorReport::default()
    };

    if context.options.dry_run {
        plan.print(output, phases.len());
        report.stats = context.stats.snapshot();
        return report;
    }

    output.section("Transferring blobs");
    let mut confirmed: HashMap<(DestinationKind, RepositoryKey), HashSet<String>> = plan
        .repositories()
        .map(|repository| {
            (
                (repository.kind, repository.key.clone()),
                repository.existing_blobs.iter().cloned().collect(),
            )
        })
        .collect();

    for (index, phase) in phases.iter().enumerate() {
        output.notify_phase_start(index, phases.len(), phase.len());
        let results = join_all(phase.units.iter().map(|scheduled| {
            let workers = &workers;
            let unit = &units[scheduled.index];
            async move {
                let _permit = workers.acquire().await;
                transfer_unit(context, unit).await
            }
        }))
        .await;

        for (scheduled, outcomes) in phase.units.iter().zip(results) {
            let unit = &units[scheduled.index];
            let present = confirmed
                .entry((unit.kind, unit.destination.clone()))
                .or_default();
            for (digest, outcome) in outcomes {
                match outcome {
                    Ok(()) => {
                        present.insert(digest);
                    }
                    Err(e) => {
                        context.stats.blob_failed();
                        output.error(&format!(
                            "Blob {} to {} failed: {}",
                            output.short_digest(&digest),
                            unit.destination,
                            e
                        ));
                        report.failures.push(MappingFailure::new(
                            unit.source.to_string(),
                            format_reference(unit.kind, &unit.destination, Some(&digest)),
                            e.in_stage(MirrorError::BlobTransfer),
                        ));
                    }
                }
            }
        }
    }

    output.section("Pushing manifests");
    let repositories: Vec<&RepositoryPlan> = plan
        .repositories()
        .filter(|repository| !repository.manifests.is_empty())
        .collect();
    let pushes = join_all(repositories.into_iter().map(|repository| {
        let workers = &workers;
        let present = confirmed.get(&(repository.kind, repository.key.clone()));
        async move {
            let _permit = workers.acquire().await;
            push_manifests(context, repository, present).await
        }
    }))
    .await;
    for (pushed, failures) in pushes {
        report.pushed.extend(pushed);
        report.failures.extend(failures);
    }

    report.stats = context.stats.snapshot();
    print_summary(context, &report);
    report
}

async fn plan_source(context: &MirrorContext, unit: &SourceUnit) -> SourcePlan {
    let output = &context.output;
    let mut result = SourcePlan::new(unit.source.clone());
    output.step(&format!(
        "Planning {} ({} destination(s))",
        unit.source,
        unit.destination_count()
    ));

    let source = match context.source(&unit.source).await {
        Ok(source) => source,
        Err(e) => {
            output.error(&format!("Unable to connect to {}: {}", unit.source, e));
            for (tag, destinations) in &unit.tags {
                result.fail_all(&unit.reference(tag), destinations, e.clone());
            }
            for (digest, destinations) in &unit.digests {
                result.fail_all(&unit.reference(digest), destinations, e.clone());
            }
            return result;
        }
    };

    // digest → (source reference, merged destinations)
    let mut resolved: BTreeMap<String, (String, DestinationSet)> = BTreeMap::new();
    for (tag, destinations) in &unit.tags {
        let reference = unit.reference(tag);
        match context.guard(source.resolve_tag(tag)).await {
            Ok(descriptor) => {
                output.detail(&format!("{} resolved to {}", reference, descriptor.digest));
                resolved
                    .entry(descriptor.digest)
                    .or_insert_with(|| (reference, DestinationSet::default()))
                    .1
                    .merge(destinations);
            }
            Err(e) if e.is_not_found() && context.options.skip_missing => {
                output.warning(&format!("Skipping missing tag {}", reference));
            }
            Err(e) => result.fail_all(&reference, destinations, e.in_stage(MirrorError::Resolution)),
        }
    }
    for (digest, destinations) in &unit.digests {
        resolved
            .entry(digest.clone())
            .or_insert_with(|| (unit.reference(digest), DestinationSet::default()))
            .1
            .merge(destinations);
    }

    for (digest, (reference, destinations)) in &resolved {
        let content = match load_content(context, source.as_ref(), digest).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                output.warning(&format!(
                    "No manifests in {} match the platform filter, skipping",
                    reference
                ));
                continue;
            }
            Err(e) => {
                result.fail_all(reference, destinations, e.in_stage(MirrorError::Manifest));
                continue;
            }
        };

        for (kind, key, tags) in destinations.iter() {
            match plan_destination(context, &unit.source, reference, &content, kind, key, tags).await {
                Ok(intent) => result.intents.push(intent),
                Err(e) => result.failures.push((
                    Some((kind, key.clone())),
                    MappingFailure::new(reference.as_str(), describe(kind, key, tags), e),
                )),
            }
        }
    }
    result
}

async fn load_manifest(context: &MirrorContext, source: &dyn Repository, digest: &str) -> Result<ManifestPayload> {
    if let Some(payload) = context.cache.manifest(digest).await {
        return Ok(payload);
    }
    let payload = context
        .guard(source.get_manifest(digest))
        .await
        .map_err(|e| e.in_stage(MirrorError::Manifest))?;
    DigestUtils::verify_data_integrity(&payload.bytes, digest)?;
    context.cache.record_manifest(&payload).await;
    Ok(payload)
}

/// Fetch the manifest behind `digest`, filtering lists down to the selected platforms.
/// `None` when the filter removed every child.
async fn load_content(context: &MirrorContext, source: &dyn Repository, digest: &str) -> Result<Option<SourceContent>> {
    let payload = load_manifest(context, source, digest).await?;
    let image = match payload.decode()? {
        Manifest::Image(image) => image,
        Manifest::List(_) => return load_list(context, source, payload).await,
    };

    let mut blobs = Vec::new();
    for blob in Manifest::Image(image).blobs() {
        blobs.push(context.cache.record_blob(&blob).await);
    }
    Ok(Some(SourceContent {
        top: payload.clone(),
        images: vec![(payload, blobs)],
        is_list: false,
    }))
}

async fn load_list(context: &MirrorContext, source: &dyn Repository, payload: ManifestPayload) -> Result<Option<SourceContent>> {
    let output = &context.output;
    let Some(filtered) = payload.filter_list(|child| context.filter.matches(child))? else {
        return Ok(None);
    };
    if filtered.digest != payload.digest {
        output.verbose(&format!(
            "Filtered manifest list {} is now {}",
            output.short_digest(&payload.digest),
            output.short_digest(&filtered.digest)
        ));
        context.cache.record_manifest(&filtered).await;
    }

    let children = match filtered.decode()? {
        Manifest::List(list) => list.manifests,
        Manifest::Image(_) => {
            return Err(MirrorError::Manifest(format!(
                "{} is not a manifest list",
                filtered.digest
            )));
        }
    };

    let mut images = Vec::with_capacity(children.len());
    for child in children {
        let child_payload = load_manifest(context, source, &child.digest).await?;
        let manifest = child_payload.decode()?;
        if manifest.is_list() {
            return Err(MirrorError::Manifest(format!(
                "nested manifest list {} is not supported",
                child.digest
            )));
        }
        let mut blobs = Vec::new();
        for blob in manifest.blobs() {
            blobs.push(context.cache.record_blob(&blob).await);
        }
        images.push((child_payload, blobs));
    }

    Ok(Some(SourceContent {
        top: filtered,
        images,
        is_list: true,
    }))
}

async fn manifest_present(context: &MirrorContext, destination: &dyn Destination, digest: &str) -> bool {
    matches!(
        context.guard(destination.manifest_exists(digest)).await,
        Ok(true)
    )
}

/// Whether `destination` already holds `digest`. A failed lookup counts as absent.
async fn blob_exists(context: &MirrorContext, destination: &dyn Destination, digest: &str) -> Result<bool> {
    let output = &context.output;
    let _permit = context.registry_permit(&destination.key().registry).await?;
    match context.guard(destination.stat_blob(digest)).await {
        Ok(found) => Ok(found.is_some()),
        Err(MirrorError::Cancelled) => Err(MirrorError::Cancelled),
        Err(e) => {
            output.verbose(&format!(
                "Unable to check {} in {}: {}",
                output.short_digest(digest),
                destination.key(),
                e
            ));
            Ok(false)
        }
    }
}

async fn plan_destination(
    context: &MirrorContext,
    source: &RepositoryKey,
    reference: &str,
    content: &SourceContent,
    kind: DestinationKind,
    key: &RepositoryKey,
    tags: &BTreeSet<String>,
) -> Result<DestinationIntent> {
    let output = &context.output;
    let destination = context.destination(kind, key).await?;
    let force = context.options.force;
    let top = &content.top.digest;

    let same_repository = kind == DestinationKind::Registry && key == source;
    let top_present = manifest_present(context, destination.as_ref(), top).await;
    let copy_content = force || !(same_repository || top_present);
    if !copy_content {
        output.detail(&format!(
            "{} already has {}, skipping blob copy",
            key,
            output.short_digest(top)
        ));
    }

    let mut intent = DestinationIntent::new(kind, key.clone());
    let mut children = Vec::new();
    if copy_content {
        for (payload, blobs) in &content.images {
            if content.is_list && !force && manifest_present(context, destination.as_ref(), &payload.digest).await {
                continue;
            }

            let mut required: Vec<String> = Vec::with_capacity(blobs.len());
            for blob in blobs {
                if !required.contains(&blob.digest) {
                    required.push(blob.digest.clone());
                }
            }
            let checks = join_all(
                required
                    .iter()
                    .map(|digest| blob_exists(context, destination.as_ref(), digest)),
            )
            .await;
            for (digest, exists) in required.iter().zip(checks) {
                intent.blobs.push((digest.clone(), exists?));
            }

            intent.manifests.push(PlannedManifest {
                payload: payload.clone(),
                source: reference.to_string(),
                blobs: required,
                children: Vec::new(),
            });
            if content.is_list {
                intent.digest_only.push((payload.digest.clone(), false));
                children.push(payload.digest.clone());
            }
        }
    }

    if content.is_list || !copy_content {
        intent.manifests.push(PlannedManifest {
            payload: content.top.clone(),
            source: reference.to_string(),
            blobs: Vec::new(),
            children,
        });
    }

    if tags.is_empty() {
        if force || !top_present {
            intent.digest_only.push((top.clone(), true));
        } else {
            context.stats.manifest_skipped();
        }
        return Ok(intent);
    }

    let mut needed = Vec::with_capacity(tags.len());
    for tag in tags {
        let current = context.guard(destination.resolve_tag(tag)).await;
        if !force && matches!(&current, Ok(Some(digest)) if digest == top) {
            output.detail(&format!("{} already points at {}", destination.display_reference(tag), top));
            context.stats.manifest_skipped();
            continue;
        }
        needed.push(tag.clone());
    }
    intent.tags.push((top.clone(), needed));
    Ok(intent)
}

/// Copy every pending blob of a unit; one outcome per digest
async fn transfer_unit(context: &MirrorContext, unit: &BlobCopyUnit) -> Vec<(String, Result<()>)> {
    let opened = async {
        let source = context.source(&unit.source).await?;
        let destination = context.destination(unit.kind, &unit.destination).await?;
        Ok::<_, MirrorError>((source, destination))
    };
    let (source, destination) = match opened.await {
        Ok(opened) => opened,
        Err(e) => {
            return unit
                .pending
                .iter()
                .map(|digest| (digest.clone(), Err(e.clone())))
                .collect();
        }
    };

    let copies = unit.pending.iter().map(|digest| {
        let source = source.as_ref();
        let destination = destination.as_ref();
        async move {
            let outcome = copy_blob(context, source, destination, digest).await;
            match outcome {
                Ok(BlobOutcome::Present) => context.stats.blob_present(),
                Ok(BlobOutcome::Mounted) => context.stats.blob_mounted(),
                Ok(BlobOutcome::Uploaded(size)) => context.stats.blob_uploaded(size),
                Err(_) => {}
            }
            (digest.clone(), outcome.map(|_| ()))
        }
    });
    join_all(copies).await
}

async fn copy_blob(
    context: &MirrorContext,
    source: &dyn Repository,
    destination: &dyn Destination,
    digest: &str,
) -> Result<BlobOutcome> {
    let output = &context.output;
    let target = destination.key();
    let _in_flight = context.lock_blob(target, digest).await;
    let _permit = context.registry_permit(&target.registry).await?;

    // the destination may have gained the blob since planning
    if let Ok(Some(_)) = context.guard(destination.stat_blob(digest)).await {
        output.detail(&format!("Blob {} already in {}", output.short_digest(digest), target));
        context.mounts.record(target, digest).await;
        return Ok(BlobOutcome::Present);
    }

    if !context.options.skip_mount && destination.kind() == DestinationKind::Registry {
        let from = if source.key().registry == target.registry && source.key() != target {
            Some(source.key().clone())
        } else {
            context.mounts.candidate(target, digest).await
        };
        if let Some(from) = from {
            match context.guard(destination.mount_blob(digest, &from)).await {
                Ok(MountOutcome::Mounted(mounted)) if mounted.digest != digest => {
                    return Err(MirrorError::DigestMismatch {
                        expected: digest.to_string(),
                        actual: mounted.digest,
                    });
                }
                Ok(MountOutcome::Mounted(_)) => {
                    output.detail(&format!(
                        "Mounted {} from {} into {}",
                        output.short_digest(digest),
                        from,
                        target
                    ));
                    context.mounts.record(target, digest).await;
                    return Ok(BlobOutcome::Mounted);
                }
                Err(e) if e.is_already_exists() => return Ok(BlobOutcome::Present),
                Err(e @ (MirrorError::DigestMismatch { .. } | MirrorError::Cancelled)) => return Err(e),
                Ok(MountOutcome::NotMounted) => {
                    output.detail(&format!("Mount of {} declined, uploading", output.short_digest(digest)));
                }
                Err(e) => {
                    output.detail(&format!("Mount of {} failed ({}), uploading", output.short_digest(digest), e));
                }
            }
        }
    }

    let descriptor = context
        .cache
        .blob(digest)
        .await
        .unwrap_or_else(|| Descriptor::placeholder(digest));
    match context.guard(destination.create_blob(&descriptor, source)).await {
        Ok(created) => {
            if created.digest != digest {
                return Err(MirrorError::DigestMismatch {
                    expected: digest.to_string(),
                    actual: created.digest,
                });
            }
            output.detail(&format!(
                "Copied {} ({}) to {}",
                output.short_digest(digest),
                output.format_size(descriptor.size),
                target
            ));
            if destination.kind() == DestinationKind::Registry {
                context.mounts.record(target, digest).await;
            }
            Ok(BlobOutcome::Uploaded(descriptor.size))
        }
        Err(e) if e.is_already_exists() => Ok(BlobOutcome::Present),
        Err(e) => Err(e.in_stage(MirrorError::BlobTransfer)),
    }
}

/// Push every blob-complete manifest of one destination repository
async fn push_manifests(
    context: &MirrorContext,
    repository: &RepositoryPlan,
    present: Option<&HashSet<String>>,
) -> (Vec<PushedReference>, Vec<MappingFailure>) {
    let output = &context.output;
    let mut pushed = Vec::new();
    let mut failures = Vec::new();

    let order = repository.manifests.push_order();
    let destination = match context.destination(repository.kind, &repository.key).await {
        Ok(destination) => destination,
        Err(e) => {
            for manifest in order {
                let tags = repository.manifests.tags(&manifest.payload.digest);
                failures.push(MappingFailure::new(
                    manifest.source.clone(),
                    describe(repository.kind, &repository.key, &tags),
                    e.clone(),
                ));
            }
            return (pushed, failures);
        }
    };

    let mut pushed_digests: HashSet<&str> = HashSet::new();
    for manifest in order {
        let digest = manifest.payload.digest.as_str();
        let tags = repository.manifests.tags(digest);
        let target = describe(repository.kind, &repository.key, &tags);

        let missing = manifest
            .blobs
            .iter()
            .filter(|blob| !present.is_some_and(|present| present.contains(*blob)))
            .count();
        if missing > 0 {
            output.warning(&format!("Not pushing {}: {} blob(s) missing", target, missing));
            failures.push(MappingFailure::new(
                manifest.source.clone(),
                target,
                MirrorError::ManifestPush(format!(
                    "{} referenced blob(s) of {} are not present",
                    missing, digest
                )),
            ));
            continue;
        }
        if let Some(child) = manifest
            .children
            .iter()
            .find(|child| !pushed_digests.contains(child.as_str()))
        {
            output.warning(&format!("Not pushing {}: child {} was not pushed", target, child));
            failures.push(MappingFailure::new(
                manifest.source.clone(),
                target,
                MirrorError::ManifestPush(format!("child manifest {} was not pushed", child)),
            ));
            continue;
        }

        match context.guard(destination.put_manifest(&manifest.payload, &tags)).await {
            Ok(_) => {
                context.stats.manifest_pushed();
                pushed_digests.insert(digest);
                for tag in &tags {
                    pushed.push(PushedReference {
                        digest: digest.to_string(),
                        reference: destination.display_reference(tag),
                    });
                }
                if repository.manifests.is_reported_by_digest(digest) {
                    pushed.push(PushedReference {
                        digest: digest.to_string(),
                        reference: destination.display_reference(digest),
                    });
                }
                output.success(&format!("Pushed {} to {}", output.short_digest(digest), target));
            }
            Err(e) => {
                output.error(&format!("Failed to push {}: {}", target, e));
                failures.push(MappingFailure::new(
                    manifest.source.clone(),
                    target,
                    e.in_stage(MirrorError::ManifestPush),
                ));
            }
        }
    }
    (pushed, failures)
}

fn print_summary(context: &MirrorContext, report: &MirrorReport) {
    let output = &context.output;
    let stats = &report.stats;
    output.summary_kv(
        "Mirror summary",
        &[
            ("Phases", report.phases.to_string()),
            ("Blobs uploaded", stats.blobs_uploaded.to_string()),
            ("Blobs mounted", stats.blobs_mounted.to_string()),
            ("Blobs already present", stats.blobs_present.to_string()),
            ("Bytes uploaded", output.format_size(stats.bytes_uploaded)),
            ("Manifests pushed", stats.manifests_pushed.to_string()),
            ("Up to date", stats.manifests_skipped.to_string()),
            ("Failures", report.failures.len().to_string()),
            ("Elapsed", output.format_duration(output.elapsed())),
        ],
    );
}
