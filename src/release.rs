//! Release metadata: which components make up a release and where their source lives.
//!
//! A release image carries `release-manifests/image-references`, an ImageStream
//! document whose `spec.tags` name every component image. Source provenance is
//! recorded as annotations on each tag.

use crate::digest::Digest;
use crate::error::ExtractError;
use crate::extracted_image::{ExtractEvent, ExtractedImage, Mapping};
use crate::image_ref::ImageReference;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

pub const IMAGE_REFERENCES: &str = "image-references";
pub const ANNOTATION_SOURCE_LOCATION: &str = "io.openshift.build.source-location";
pub const ANNOTATION_SOURCE_COMMIT: &str = "io.openshift.build.commit.id";

/// One named component of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReference {
    pub name: String,
    pub source_repository: Option<String>,
    pub source_commit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    /// The image the release was read from.
    pub image: String,
    /// Manifest digest the release image declared.
    pub digest: Digest,
    /// Release name, usually its version.
    pub name: String,
    /// Components in the order the release lists them.
    pub references: Vec<ReleaseReference>,
}

/// Loads release metadata for an image reference.
pub trait ReleaseLoader {
    /// With `verify`, a release image whose content does not match its declared
    /// digest is rejected with [`ExtractError::ContentVerification`].
    fn load_release_info(&self, reference: &str, verify: bool) -> Result<ReleaseInfo>;
}

#[derive(Debug, Deserialize)]
struct ImageStream {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ImageStreamSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ImageStreamSpec {
    #[serde(default)]
    tags: Vec<TagReference>,
}

#[derive(Debug, Deserialize)]
struct TagReference {
    name: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

impl TagReference {
    fn annotation(&self, key: &str) -> Option<String> {
        self.annotations
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl From<TagReference> for ReleaseReference {
    fn from(tag: TagReference) -> Self {
        Self {
            source_repository: tag.annotation(ANNOTATION_SOURCE_LOCATION),
            source_commit: tag.annotation(ANNOTATION_SOURCE_COMMIT),
            name: tag.name,
        }
    }
}

/// Parses an `image-references` document into the release's components.
pub fn parse_image_references(bytes: &[u8]) -> Result<(String, Vec<ReleaseReference>)> {
    let stream: ImageStream =
        serde_json::from_slice(bytes).context("unable to parse release image-references")?;
    let references = stream
        .spec
        .tags
        .into_iter()
        .map(ReleaseReference::from)
        .collect();
    Ok((stream.metadata.name, references))
}

/// Reads release metadata out of a local release image.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageReleaseLoader;

impl ImageReleaseLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ReleaseLoader for ImageReleaseLoader {
    fn load_release_info(&self, reference: &str, verify: bool) -> Result<ReleaseInfo> {
        let image_ref: ImageReference = reference
            .parse()
            .with_context(|| format!("invalid release image reference {:?}", reference))?;
        let image = ExtractedImage::open(&image_ref)
            .with_context(|| format!("unable to read release image {}", image_ref))?;

        let metadata = image.content_metadata();
        if metadata.declared != metadata.computed {
            if verify {
                return Err(ExtractError::ContentVerification.into());
            }
            log::warn!(
                "Release image {} declares {} but its content hashes to {}",
                image_ref,
                metadata.declared,
                metadata.computed
            );
        }
        let digest = metadata.declared.clone();

        let mapping = Mapping::release_manifests(image.root());
        let contents = image
            .extract(&mapping, Some(IMAGE_REFERENCES))?
            .into_iter()
            .find_map(|event| match event {
                ExtractEvent::FileFound(contents) => Some(contents),
                _ => None,
            })
            .ok_or_else(|| {
                anyhow!(
                    "release image {} does not contain {}",
                    image_ref,
                    IMAGE_REFERENCES
                )
            })?;

        let (name, references) = parse_image_references(&contents)?;
        log::info!(
            "Loaded release {} with {} references from {}",
            name,
            references.len(),
            image_ref
        );

        Ok(ReleaseInfo {
            image: image_ref.to_string(),
            digest,
            name,
            references,
        })
    }
}
