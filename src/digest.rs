//! Content digests in the OCI `<algorithm>:<hex>` form.
//!
//! This module provides [`Digest`], which:
//! - Parses and validates digest strings (`sha256:…`, `sha512:…`).
//! - Computes digests of raw bytes for the supported algorithms.
//! - Maps a digest to its blob location inside an OCI image layout
//!   (`blobs/<algorithm>/<hex>`).

use anyhow::{anyhow, bail, Result};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const SHA256: &str = "sha256";
pub const SHA512: &str = "sha512";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hex: format!("{:x}", Sha256::digest(bytes)),
        }
    }

    /// Hashes `bytes` with the named algorithm.
    pub fn compute(algorithm: &str, bytes: &[u8]) -> Result<Self> {
        match algorithm {
            SHA256 => Ok(Self::sha256(bytes)),
            SHA512 => Ok(Self {
                algorithm: SHA512.to_string(),
                hex: format!("{:x}", Sha512::digest(bytes)),
            }),
            other => Err(anyhow!("unsupported digest algorithm: {}", other)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Relative location of this blob inside an OCI image layout.
    pub fn blob_path(&self) -> PathBuf {
        Path::new("blobs").join(&self.algorithm).join(&self.hex)
    }

    fn expected_len(algorithm: &str) -> Option<usize> {
        match algorithm {
            SHA256 => Some(64),
            SHA512 => Some(128),
            _ => None,
        }
    }
}

impl FromStr for Digest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid digest {:?}: expected <algorithm>:<hex>", s))?;

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
        {
            bail!("invalid digest {:?}: bad algorithm", s);
        }
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            bail!("invalid digest {:?}: encoded part must be lowercase hex", s);
        }
        if let Some(len) = Self::expected_len(algorithm) {
            if hex.len() != len {
                bail!(
                    "invalid digest {:?}: {} requires {} hex characters",
                    s,
                    algorithm,
                    len
                );
            }
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}
