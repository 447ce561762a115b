//! Release extraction orchestrator.
//!
//! [`ReleaseExtractor`] runs one of three mutually exclusive modes chosen by
//! [`ExtractOptions::mode`]:
//! - **Manifests**: write the release manifests to a directory and enforce the
//!   content-verification policy.
//! - **File**: stream one file from the release manifests to stdout.
//! - **Git**: check out the source commit of every component repository, at most
//!   `max_parallel` at a time. One repository failing does not stop the others;
//!   each failure is reported as it happens and the run ends with
//!   [`ExtractError::AlreadyReported`].

use crate::error::ExtractError;
use crate::extracted_image::{ContentMetadata, ExtractEvent, ExtractedImage, Mapping};
use crate::git::{CheckedOutRepo, GitCheckout, SourceCheckout};
use crate::image_ref::ImageReference;
use crate::notifier::Notifier;
use crate::outcome::RunOutcome;
use crate::plan::{plan_checkouts, CheckoutTask};
use crate::release::{ImageReleaseLoader, ReleaseLoader};
use crate::verifier::Verifier;
use crate::work_queue::{CancelToken, WorkQueue, DEFAULT_PARALLELISM};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Settings for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Release image reference (see [`ImageReference`]).
    pub from: String,
    /// Where manifests are written in manifests mode.
    pub directory: PathBuf,
    /// Single file to print instead of writing the manifests.
    pub file: Option<String>,
    /// Root under which component sources are checked out.
    pub git_dir: Option<PathBuf>,
    /// Downgrade a failed content verification to a warning.
    pub skip_verification: bool,
    pub max_parallel: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            from: String::new(),
            directory: PathBuf::from("."),
            file: None,
            git_dir: None,
            skip_verification: false,
            max_parallel: DEFAULT_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Manifests,
    File(String),
    Git(PathBuf),
}

impl ExtractOptions {
    /// Validates the option combination and picks the mode it selects.
    pub fn mode(&self) -> Result<Mode> {
        let file = self.file.as_deref().filter(|f| !f.is_empty());
        let git_dir = self.git_dir.as_ref().filter(|d| !d.as_os_str().is_empty());

        if file.is_some() && git_dir.is_some() {
            return Err(ExtractError::ConflictingModes.into());
        }
        if self.from.is_empty() {
            return Err(ExtractError::MissingImage.into());
        }
        if file.is_some() && self.directory != Path::new(".") {
            return Err(ExtractError::ConflictingOutput.into());
        }
        if self.max_parallel == 0 {
            bail!("--max-parallel must be at least 1");
        }

        Ok(match (file, git_dir) {
            (_, Some(dir)) => Mode::Git(dir.clone()),
            (Some(file), None) => Mode::File(file.to_string()),
            (None, None) => Mode::Manifests,
        })
    }
}

pub struct ReleaseExtractor<L = ImageReleaseLoader, G = GitCheckout> {
    loader: L,
    checkout: G,
    cancel: CancelToken,
}

impl ReleaseExtractor {
    pub fn new(cancel: CancelToken) -> Self {
        Self::with_collaborators(ImageReleaseLoader::new(), GitCheckout::new(), cancel)
    }
}

impl<L: ReleaseLoader, G: SourceCheckout> ReleaseExtractor<L, G> {
    pub fn with_collaborators(loader: L, checkout: G, cancel: CancelToken) -> Self {
        Self {
            loader,
            checkout,
            cancel,
        }
    }

    pub fn run(&self, options: &ExtractOptions, notifier: &Notifier) -> Result<()> {
        match options.mode()? {
            Mode::Git(dir) => self.extract_git(options, &dir, notifier),
            Mode::File(file) => self.extract_file(options, &file, notifier),
            Mode::Manifests => self.extract_manifests(options, notifier),
        }
    }

    /// Writes the release manifests to `options.directory`, then applies the
    /// verification policy.
    pub fn extract_manifests(&self, options: &ExtractOptions, notifier: &Notifier) -> Result<()> {
        let dir = &options.directory;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let reference: ImageReference = options.from.parse()?;
        let image = ExtractedImage::open(&reference)?;
        notifier.info(&format!("Extracting release manifests to {}", dir.display()));

        let mut verifier = Verifier::new();
        let mut observed = None;
        for event in image.extract(&Mapping::release_manifests(dir), None)? {
            if let ExtractEvent::MetadataObserved(metadata) = event {
                verifier.verify(&metadata.declared, &metadata.computed);
                observed = Some(metadata);
            }
        }

        if !verifier.verified() {
            if let Some((declared, computed)) = verifier.last_observed() {
                notifier.info(&format!(
                    "Release image declares {} but its manifest hashes to {}",
                    declared, computed
                ));
            }
            let err = ExtractError::ContentVerification;
            if !options.skip_verification {
                return Err(err.into());
            }
            notifier.warning(&err.to_string());
        }

        if let Some(metadata) = observed {
            notifier.status(&payload_summary(&reference, &metadata));
        }
        Ok(())
    }

    /// Copies one file of the release manifests to stdout.
    pub fn extract_file(&self, options: &ExtractOptions, file: &str, notifier: &Notifier) -> Result<()> {
        let reference: ImageReference = options.from.parse()?;
        let image = ExtractedImage::open(&reference)?;

        for event in image.extract(&Mapping::release_manifests(&options.directory), Some(file))? {
            match event {
                ExtractEvent::FileFound(contents) => {
                    notifier.write_raw(&contents);
                    return Ok(());
                }
                ExtractEvent::MetadataObserved(metadata) => notifier.debug(&format!(
                    "Release image manifest {} (declared {})",
                    metadata.computed, metadata.declared
                )),
                ExtractEvent::NotFound => break,
            }
        }
        Err(ExtractError::FileNotFound(file.to_string()).into())
    }

    /// Checks out the source of every component under `dir`.
    pub fn extract_git(&self, options: &ExtractOptions, dir: &Path, notifier: &Notifier) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let release = self.loader.load_release_info(&options.from, false)?;
        notifier.info(&format!(
            "Checking out sources of release {} ({})",
            release.name, release.digest
        ));

        let plan = plan_checkouts(&release.references);
        for name in &plan.without_source {
            notifier.info(&format!("Tag {} has no source info", name));
        }
        for repository in &plan.conflicts {
            notifier.warning(&format!(
                "Repo {} referenced more than once with different commits, only checking out the first reference",
                repository
            ));
        }

        for task in &plan.tasks {
            notifier.trace(&format!("Planned {} at {}", task.repository, task.commit));
        }

        let outcome = RunOutcome::new();
        let queue = WorkQueue::new(options.max_parallel, self.cancel.clone())?;
        let progress = notifier.create_progress_bar(plan.tasks.len() as u64, "Checking out sources");

        let finished = AtomicUsize::new(0);
        let checkout = &self.checkout;
        queue.batch(|batch| {
            for task in &plan.tasks {
                let outcome = &outcome;
                let finished = &finished;
                let progress = progress.as_ref();
                batch.submit(move || {
                    checkout_source(checkout, dir, task, notifier, outcome);
                    finished.fetch_add(1, Ordering::Relaxed);
                    if let Some(progress) = progress {
                        progress.inc(1);
                    }
                });
            }
        });

        if let Some(progress) = progress {
            progress.finish_and_clear();
        }
        let skipped = plan.tasks.len() - finished.into_inner();
        if skipped > 0 {
            notifier.warning(&format!(
                "cancelled before {} of {} repositories were checked out",
                skipped,
                plan.tasks.len()
            ));
            outcome.fail("cancelled");
        }
        if outcome.had_errors() {
            notifier.debug(&format!(
                "{} checkout failures reported for {} repositories",
                outcome.messages().len(),
                plan.tasks.len()
            ));
            return Err(ExtractError::AlreadyReported.into());
        }
        Ok(())
    }
}

/// Clones and checks out one repository, reporting any failure with the git output
/// captured for this task alone.
fn checkout_source<G: SourceCheckout>(
    checkout: &G,
    root: &Path,
    task: &CheckoutTask,
    notifier: &Notifier,
    outcome: &RunOutcome,
) {
    let mut output = Vec::new();
    let repo = match checkout.ensure_clone(root, &task.repository, &mut output) {
        Ok(repo) => repo,
        Err(err) => {
            report_failure(
                notifier,
                outcome,
                format!("cloning {}: {:#}", task.repository, err),
                &output,
            );
            return;
        }
    };

    notifier.debug(&format!("Checkout {} from {} ...", task.commit, task.repository));
    output.clear();
    if let Err(err) = repo.checkout_commit(&task.repository, &task.commit, &mut output) {
        report_failure(
            notifier,
            outcome,
            format!("checking out commit for {}: {:#}", task.repository, err),
            &output,
        );
        return;
    }

    notifier.status(&repo.path().display().to_string());
}

fn report_failure(notifier: &Notifier, outcome: &RunOutcome, message: String, output: &[u8]) {
    let output = String::from_utf8_lossy(output);
    let output = output.trim_end();
    if output.is_empty() {
        notifier.error(&message);
    } else {
        notifier.error(&format!("{}\n{}", message, output));
    }
    outcome.fail(message);
}

fn payload_summary(reference: &ImageReference, metadata: &ContentMetadata) -> String {
    let created = metadata
        .created()
        .map(|created| match DateTime::parse_from_rfc3339(created) {
            Ok(created) => created.to_rfc3339_opts(SecondsFormat::Secs, true),
            Err(_) => created.to_string(),
        })
        .unwrap_or_else(|| "an unknown time".to_string());

    if reference.is_pinned() {
        format!("Extracted release payload created at {}", created)
    } else {
        format!(
            "Extracted release payload from digest {} created at {}",
            metadata.declared, created
        )
    }
}
