use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::digest::Digest;

const LAYOUT_PREFIX: &str = "oci:";

/// A locally available release image: an OCI layout directory or a tar
/// archive of one, optionally pinned to a manifest digest.
///
/// Accepted forms: `path`, `oci:path`, and either of those followed by
/// `@<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub path: PathBuf,
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// True when the reference names an exact manifest digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Fails unless the referenced layout directory or archive exists.
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(anyhow!(
                "Release image does not exist: {}",
                self.path.display()
            ));
        }
        if self.path.is_file() {
            let extension = self
                .path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("");
            if !matches!(extension, "tar" | "gz" | "tgz") {
                log::warn!(
                    "{} does not have a .tar extension, proceeding anyway",
                    self.path.display()
                );
            }
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix(LAYOUT_PREFIX).unwrap_or(s);

        // Only treat the suffix after the last '@' as a pin when it parses as a digest,
        // so paths that happen to contain '@' still work.
        let (path, digest) = match s.rsplit_once('@') {
            Some((path, pin)) if pin.contains(':') => (path, Some(pin.parse::<Digest>()?)),
            _ => (s, None),
        };

        if path.is_empty() {
            return Err(anyhow!("image reference {:?} has no path", s));
        }

        Ok(Self {
            path: PathBuf::from(path),
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
