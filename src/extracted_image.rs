//! Open a release image (OCI image layout) into a typed, queryable structure.
//!
//! [`ExtractedImage`] resolves an [`ImageReference`] into:
//! - [`ContentMetadata`]: the declared manifest digest (the reference pin, or the
//!   `index.json` descriptor), the digest computed from the manifest bytes actually
//!   on disk, and the parsed image configuration.
//! - The ordered layer blobs (base → top) listed by the manifest.
//!
//! Key behavior:
//! - Accepts a layout directory as-is, or unpacks a plain/gzip tarball of one into a
//!   temporary directory scoped to the instance lifetime via `tempfile::TempDir`.
//! - Requires `index.json`; the first manifest it lists is the release payload.
//! - [`ExtractedImage::extract`] walks the layers through a [`Mapping`] and reports
//!   what it saw as [`ExtractEvent`]s instead of invoking callbacks.

use crate::digest::Digest;
use crate::image_ref::ImageReference;
use crate::tar_extractor::{self, Flow};
use anyhow::{anyhow, Context, Result};
use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Directory inside the release image holding the payload manifests.
pub const RELEASE_MANIFESTS: &str = "release-manifests/";

/// Which part of the image to materialize, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Directory prefix inside the image's layers.
    pub from: String,
    /// Local directory receiving the entries found under `from`.
    pub to: PathBuf,
}

impl Mapping {
    pub fn new(from: impl Into<String>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Maps the release manifests directory onto `to`.
    pub fn release_manifests(to: impl Into<PathBuf>) -> Self {
        Self::new(RELEASE_MANIFESTS, to)
    }
}

#[derive(Debug, Clone)]
pub struct ContentMetadata {
    pub declared: Digest,
    pub computed: Digest,
    pub config: ImageConfiguration,
}

impl ContentMetadata {
    pub fn created(&self) -> Option<&str> {
        self.config.created().as_deref()
    }
}

/// What an extraction observed.
#[derive(Debug, Clone)]
pub enum ExtractEvent {
    MetadataObserved(ContentMetadata),
    /// Contents of the single file that was asked for.
    FileFound(Vec<u8>),
    /// The single file that was asked for is not in the image.
    NotFound,
}

pub struct ExtractedImage {
    root: PathBuf,
    _temp_dir: Option<tempfile::TempDir>,
    metadata: ContentMetadata,
    layers: Vec<PathBuf>,
}

impl ExtractedImage {
    pub fn open(reference: &ImageReference) -> Result<Self> {
        reference.ensure_exists()?;

        let (root, temp_dir) = if reference.path.is_dir() {
            (reference.path.clone(), None)
        } else {
            log::debug!("Unpacking image archive {}", reference.path.display());
            let temp_dir = tempfile::tempdir().context("Failed to create temporary directory")?;
            let root = temp_dir.path().join("layout");
            tar_extractor::unpack_archive(&reference.path, &root)?;
            (root, Some(temp_dir))
        };

        let index_path = root.join("index.json");
        if !index_path.exists() {
            return Err(anyhow!(
                "Invalid release image: index.json not found. {} does not appear to be an OCI image layout.",
                reference.path.display()
            ));
        }
        let index: ImageIndex = serde_json::from_slice(
            &fs::read(&index_path).context("Failed to read index.json")?,
        )
        .context("Failed to parse index.json")?;

        let descriptor = index
            .manifests()
            .first()
            .ok_or_else(|| anyhow!("index.json does not list any manifests"))?;
        let listed: Digest = descriptor.digest().to_string().parse()?;

        let manifest_bytes = read_blob(&root, &listed).context("Failed to read image manifest")?;
        let computed = Digest::compute(listed.algorithm(), &manifest_bytes)?;
        let declared = reference.digest.clone().unwrap_or(listed);

        let manifest: ImageManifest =
            serde_json::from_slice(&manifest_bytes).context("Failed to parse image manifest")?;

        let config_digest: Digest = manifest.config().digest().to_string().parse()?;
        let config: ImageConfiguration = serde_json::from_slice(
            &read_blob(&root, &config_digest).context("Failed to read image configuration")?,
        )
        .context("Failed to parse image configuration")?;

        let layers = manifest
            .layers()
            .iter()
            .map(|layer| {
                let digest: Digest = layer.digest().to_string().parse()?;
                Ok(root.join(digest.blob_path()))
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "Opened release image {} with {} layers (manifest {})",
            reference,
            layers.len(),
            computed
        );

        Ok(Self {
            root,
            _temp_dir: temp_dir,
            metadata: ContentMetadata {
                declared,
                computed,
                config,
            },
            layers,
        })
    }

    pub fn content_metadata(&self) -> &ContentMetadata {
        &self.metadata
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the layers (base → top) through `mapping`.
    ///
    /// With `file == None`, every regular file under `mapping.from` is written below
    /// `mapping.to`. With `Some(name)`, nothing is written: the first entry whose path
    /// relative to `mapping.from` equals `name` is read into [`ExtractEvent::FileFound`]
    /// and scanning stops; [`ExtractEvent::NotFound`] otherwise.
    ///
    /// The first event is always [`ExtractEvent::MetadataObserved`].
    pub fn extract(&self, mapping: &Mapping, file: Option<&str>) -> Result<Vec<ExtractEvent>> {
        let mut events = vec![ExtractEvent::MetadataObserved(self.metadata.clone())];
        let prefix = tar_extractor::normalize_tar_path(Path::new(&mapping.from));
        let wanted = file.map(|name| tar_extractor::normalize_tar_path(Path::new(name)));
        let mut found = None;

        for layer in &self.layers {
            log::debug!("Scanning layer {}", layer.display());
            let flow = tar_extractor::for_each_entry(layer, |path, entry| {
                let Ok(rel_path) = path.strip_prefix(&prefix) else {
                    return Ok(Flow::Continue);
                };
                if rel_path.as_os_str().is_empty() {
                    return Ok(Flow::Continue);
                }

                match &wanted {
                    Some(wanted) => {
                        if rel_path != wanted || !entry.header().entry_type().is_file() {
                            return Ok(Flow::Continue);
                        }
                        let mut contents = Vec::new();
                        entry
                            .read_to_end(&mut contents)
                            .with_context(|| format!("Failed to read {}", path.display()))?;
                        found = Some(contents);
                        Ok(Flow::Stop)
                    }
                    None => {
                        tar_extractor::apply_entry(entry, rel_path, &mapping.to)?;
                        Ok(Flow::Continue)
                    }
                }
            })
            .with_context(|| format!("Failed to extract layer {}", layer.display()))?;

            if flow == Flow::Stop {
                break;
            }
        }

        if wanted.is_some() {
            events.push(match found {
                Some(contents) => ExtractEvent::FileFound(contents),
                None => ExtractEvent::NotFound,
            });
        }
        Ok(events)
    }
}

fn read_blob(root: &Path, digest: &Digest) -> Result<Vec<u8>> {
    let path = root.join(digest.blob_path());
    fs::read(&path).with_context(|| format!("Failed to read blob {}", path.display()))
}
