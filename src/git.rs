use anyhow::{anyhow, bail, Context, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Commit, Cred, CredentialType, FetchOptions, Oid, RemoteCallbacks, Repository};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

const GIT_OID_HEX_LEN: usize = 40;

const FETCH_REFSPECS: [&str; 2] = ["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"];

/// Clones repositories below a root directory.
///
/// Diagnostic output from the underlying git operations is appended to the
/// caller's buffer, so concurrent tasks can report it without interleaving.
pub trait SourceCheckout: Sync {
    type Repo: CheckedOutRepo;

    /// Returns the clone of `repo_url` under `root`, cloning it first if absent.
    fn ensure_clone(&self, root: &Path, repo_url: &str, output: &mut Vec<u8>)
        -> Result<Self::Repo>;
}

pub trait CheckedOutRepo {
    fn path(&self) -> &Path;

    /// Checks out `commit` without discarding local changes, fetching from
    /// `repo_url` when the commit is not available locally.
    fn checkout_commit(&self, repo_url: &str, commit: &str, output: &mut Vec<u8>) -> Result<()>;
}

/// Location of a repository's clone: `<root>/<host>/<path>` with any `.git` suffix dropped.
///
/// Accepts `scheme://` URLs and scp-style `user@host:path`.
pub fn clone_path(root: &Path, repo_url: &str) -> Result<PathBuf> {
    Ok(root.join(relative_clone_path(repo_url)?))
}

/// Identity of the repository behind `repo_url`: URLs that clone into the same
/// directory share a key. Falls back to the URL itself when it cannot be parsed.
pub fn repository_key(repo_url: &str) -> String {
    match relative_clone_path(repo_url) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => repo_url.to_string(),
    }
}

fn relative_clone_path(repo_url: &str) -> Result<PathBuf> {
    let url = parse_source_url(repo_url)?;

    let mut path = PathBuf::new();
    if let Some(host) = url.host_str() {
        path.push(host);
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
                .collect()
        })
        .unwrap_or_default();
    let Some((last, parents)) = segments.split_last() else {
        bail!("repository URL {} has no path", repo_url);
    };
    for segment in parents {
        path.push(segment);
    }
    path.push(last.strip_suffix(".git").unwrap_or(last));

    Ok(path)
}

fn parse_source_url(repo_url: &str) -> Result<Url> {
    match Url::parse(repo_url) {
        Ok(url) if url.has_host() || url.scheme() == "file" => Ok(url),
        _ => {
            let (authority, path) = repo_url
                .split_once(':')
                .filter(|(authority, _)| !authority.is_empty() && !authority.contains('/'))
                .ok_or_else(|| anyhow!("unrecognized repository URL: {}", repo_url))?;
            Url::parse(&format!("ssh://{}/{}", authority, path.trim_start_matches('/')))
                .with_context(|| format!("unrecognized repository URL: {}", repo_url))
        }
    }
}

fn fetch_options(output: &mut Vec<u8>) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.sideband_progress(move |data| {
        output.extend_from_slice(data);
        true
    });
    callbacks.credentials(|_url, username, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(username) = username {
                return Cred::ssh_key_from_agent(username);
            }
        }
        Cred::default()
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

/// `git2`-backed [`SourceCheckout`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCheckout;

impl GitCheckout {
    pub fn new() -> Self {
        Self
    }
}

impl SourceCheckout for GitCheckout {
    type Repo = SourceRepo;

    fn ensure_clone(&self, root: &Path, repo_url: &str, output: &mut Vec<u8>) -> Result<SourceRepo> {
        let path = clone_path(root, repo_url)?;

        if path.join(".git").exists() {
            let repo = Repository::open(&path)
                .with_context(|| format!("Failed to open existing clone at {}", path.display()))?;
            let clone = SourceRepo { repo, path };
            writeln!(
                output,
                "Using existing clone at {} (HEAD {})",
                clone.path.display(),
                clone.head_commit().as_deref().unwrap_or("unborn")
            )?;
            return Ok(clone);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        log::debug!("Cloning {} into {}", repo_url, path.display());
        let repo = {
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fetch_options(output));
            builder
                .clone(repo_url, &path)
                .with_context(|| format!("git clone {} {}", repo_url, path.display()))?
        };
        writeln!(output, "Cloned {} into {}", repo_url, path.display())?;

        Ok(SourceRepo { repo, path })
    }
}

/// A local clone managed by [`GitCheckout`].
pub struct SourceRepo {
    repo: Repository,
    path: PathBuf,
}

impl SourceRepo {
    /// Commit currently checked out, if HEAD resolves to one.
    pub fn head_commit(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        Some(head.peel_to_commit().ok()?.id().to_string())
    }

    /// Looks up a commit by its full id or an unambiguous hex prefix.
    fn find_commit(&self, commit: &str) -> Option<Commit<'_>> {
        if commit.len() == GIT_OID_HEX_LEN {
            let oid = Oid::from_str(commit).ok()?;
            return self.repo.find_commit(oid).ok();
        }
        self.repo.find_commit_by_prefix(commit).ok()
    }

    fn fetch(&self, repo_url: &str, output: &mut Vec<u8>) -> Result<()> {
        let mut remote = match self.repo.find_remote("origin") {
            Ok(remote) if remote.url() == Some(repo_url) => remote,
            _ => self
                .repo
                .remote_anonymous(repo_url)
                .with_context(|| format!("Failed to create remote for {}", repo_url))?,
        };
        remote
            .fetch(&FETCH_REFSPECS, Some(&mut fetch_options(output)), None)
            .with_context(|| format!("git fetch {}", repo_url))
    }
}

impl CheckedOutRepo for SourceRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn checkout_commit(&self, repo_url: &str, commit: &str, output: &mut Vec<u8>) -> Result<()> {
        if commit.is_empty()
            || commit.len() > GIT_OID_HEX_LEN
            || !commit.chars().all(|c| c.is_ascii_hexdigit())
        {
            bail!("{:?} is not a commit id", commit);
        }

        let target = match self.find_commit(commit) {
            Some(target) => target,
            None => {
                writeln!(output, "Commit {} not present locally, fetching {}", commit, repo_url)?;
                self.fetch(repo_url, output)?;
                self.find_commit(commit)
                    .ok_or_else(|| anyhow!("commit {} not found in {}", commit, repo_url))?
            }
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(target.as_object(), Some(&mut checkout))
            .with_context(|| format!("git checkout {}", commit))?;
        self.repo
            .set_head_detached(target.id())
            .context("Failed to update HEAD")?;

        let id = target.id().to_string();
        writeln!(output, "HEAD is now at {}", &id[..id.len().min(12)])?;
        Ok(())
    }
}
