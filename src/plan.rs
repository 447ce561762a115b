//! Turns release references into the set of checkouts to run.
//!
//! Planning happens on one thread before any checkout starts, so the
//! repository → commit map needs no locking and never reaches the workers.
//! Repositories are keyed by [`repository_key`], so different spellings of one
//! URL never schedule two checkouts into the same directory.

use crate::git::repository_key;
use crate::release::ReleaseReference;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Outcome of offering a repository/commit pair to a [`CheckoutDedup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer<'a> {
    Accepted,
    /// The repository was already scheduled, at `prior_commit`.
    Rejected { prior_commit: &'a str },
}

/// Keeps the first commit seen for each repository key.
#[derive(Debug, Default)]
pub struct CheckoutDedup {
    accepted: HashMap<String, String>,
}

impl CheckoutDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, key: &str, commit: &str) -> Offer<'_> {
        match self.accepted.entry(key.to_string()) {
            Entry::Occupied(entry) => Offer::Rejected {
                prior_commit: entry.into_mut().as_str(),
            },
            Entry::Vacant(entry) => {
                entry.insert(commit.to_string());
                Offer::Accepted
            }
        }
    }
}

/// One repository to check out at one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutTask {
    pub repository: String,
    pub commit: String,
}

#[derive(Debug, Default)]
pub struct CheckoutPlan {
    /// Tasks in the order their repositories were first referenced.
    pub tasks: Vec<CheckoutTask>,
    /// Names of references lacking a repository or commit.
    pub without_source: Vec<String>,
    /// Repositories referenced again with a different commit.
    pub conflicts: Vec<String>,
}

pub fn plan_checkouts(references: &[ReleaseReference]) -> CheckoutPlan {
    let mut dedup = CheckoutDedup::new();
    let mut plan = CheckoutPlan::default();

    for reference in references {
        let (Some(repository), Some(commit)) = (
            reference.source_repository.as_deref(),
            reference.source_commit.as_deref(),
        ) else {
            plan.without_source.push(reference.name.clone());
            continue;
        };

        match dedup.offer(&repository_key(repository), commit) {
            Offer::Accepted => plan.tasks.push(CheckoutTask {
                repository: repository.to_string(),
                commit: commit.to_string(),
            }),
            Offer::Rejected { prior_commit } => {
                if prior_commit != commit {
                    plan.conflicts.push(repository.to_string());
                }
            }
        }
    }

    plan
}
