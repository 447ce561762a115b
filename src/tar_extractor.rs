use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

/// Whether a scan over tar entries should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Normalizes a path from a tar archive to be safe for extraction
/// Removes any attempts to escape the root directory
pub fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => { /* skip "." */ }
            Component::ParentDir => {
                // Don't allow escaping the root
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            // Ignore absolute paths and Windows prefixes
            Component::RootDir | Component::Prefix(_) => { /* ignore */ }
        }
    }

    out
}

/// Opens a plain or gzipped tar archive, detected by magic bytes.
pub fn open_archive(tar_path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(tar_path)
        .with_context(|| format!("Failed to open tar file: {}", tar_path.display()))?;

    let mut buf_reader = BufReader::new(file);
    let mut magic_bytes = [0u8; 2];
    let is_gzip = match buf_reader.read_exact(&mut magic_bytes) {
        Ok(()) => magic_bytes == [0x1f, 0x8b],
        // Shorter than two bytes: let the tar reader report it
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => {
            return Err(e).context("Failed to read magic bytes from tar file");
        }
    };

    // Reopen the file since we consumed some bytes
    let file = File::open(tar_path)?;

    Ok(if is_gzip {
        tar::Archive::new(Box::new(GzDecoder::new(file)))
    } else {
        tar::Archive::new(Box::new(file))
    })
}

/// Unpacks a whole archive into `dest`.
pub fn unpack_archive(tar_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    open_archive(tar_path)?
        .unpack(dest)
        .with_context(|| format!("Failed to unpack {}", tar_path.display()))
}

/// Calls `visit` with the normalized path of each entry until it returns [`Flow::Stop`].
pub fn for_each_entry<F>(tar_path: &Path, mut visit: F) -> Result<Flow>
where
    F: FnMut(&Path, &mut tar::Entry<'_, Box<dyn Read>>) -> Result<Flow>,
{
    let mut archive = open_archive(tar_path)?;
    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read entries of {}", tar_path.display()))?;

    for entry_result in entries {
        let mut entry = entry_result.context("Failed to read tar entry")?;
        let path = normalize_tar_path(&entry.path().context("Failed to get entry path")?);
        if visit(&path, &mut entry)? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }

    Ok(Flow::Continue)
}

/// Applies one layer entry at `rel_path` under `extract_dir`.
///
/// Regular files are written (replacing what an earlier layer left there) and
/// whiteout markers delete their target. Everything else is skipped; parent
/// directories are created as files need them.
pub fn apply_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    rel_path: &Path,
    extract_dir: &Path,
) -> Result<()> {
    // Check for whiteout files (overlay filesystem markers)
    if let Some(file_name) = rel_path.file_name().and_then(|n| n.to_str()) {
        if file_name == ".wh..wh..opq" {
            // Opaque directory marker - remove all contents of parent directory
            if let Some(parent) = rel_path.parent() {
                let opaque_dir = extract_dir.join(parent);
                if opaque_dir.is_dir() {
                    log::debug!("Found opaque directory marker, clearing: {}", opaque_dir.display());
                    for child in fs::read_dir(&opaque_dir)? {
                        remove_path(&child?.path());
                    }
                }
            }
            return Ok(());
        } else if let Some(deleted_name) = file_name.strip_prefix(".wh.") {
            // Whiteout marker - delete the target file/directory
            if let Some(parent) = rel_path.parent() {
                let deleted_path = extract_dir.join(parent).join(deleted_name);
                log::debug!("Found whiteout marker, deleting: {}", deleted_path.display());
                remove_path(&deleted_path);
            }
            return Ok(());
        }
    }

    let entry_type = entry.header().entry_type();
    if !entry_type.is_file() {
        log::trace!("Skipping {:?} entry: {}", entry_type, rel_path.display());
        return Ok(());
    }

    write_file(entry, &extract_dir.join(rel_path))
}

fn write_file<R: Read>(entry: &mut tar::Entry<'_, R>, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Get mode before consuming entry
    #[cfg(unix)]
    let mode = entry.header().mode().ok();

    // Delete existing entry (overlay behavior); symlink_metadata also sees broken symlinks
    if fs::symlink_metadata(dest).is_ok() {
        remove_path(dest);
    }

    log::debug!("Creating file: {}", dest.display());
    let mut out_file = File::create(dest)
        .with_context(|| format!("Failed to create file: {}", dest.display()))?;
    io::copy(entry, &mut out_file)
        .with_context(|| format!("Failed to write file: {}", dest.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            // Keep the file readable by its owner whatever the layer says
            let _ = fs::set_permissions(dest, fs::Permissions::from_mode(mode | 0o400));
        }
    }

    Ok(())
}

fn remove_path(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(e) = result {
        log::warn!("Failed to remove {}: {}", path.display(), e);
    }
}
