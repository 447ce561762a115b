//! Content-integrity check for extracted payloads.
//!
//! [`Verifier`] records whether the digest an image declares ever matched the
//! digest computed from its content. A mismatch is a recorded fact, not an
//! error; the caller decides whether that is fatal.

use crate::digest::Digest;

#[derive(Debug, Default)]
pub struct Verifier {
    verified: bool,
    last: Option<(Digest, Digest)>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one declared/computed pair. Callers serialize access.
    pub fn verify(&mut self, declared: &Digest, computed: &Digest) {
        let matched = declared == computed;
        if !matched {
            log::debug!(
                "content digest mismatch: declared {} but computed {}",
                declared,
                computed
            );
        }
        self.verified |= matched;
        self.last = Some((declared.clone(), computed.clone()));
    }

    /// True once any recorded pair matched.
    pub fn verified(&self) -> bool {
        self.verified
    }

    /// The most recent declared/computed pair, if any was recorded.
    pub fn last_observed(&self) -> Option<(&Digest, &Digest)> {
        self.last.as_ref().map(|(d, c)| (d, c))
    }
}
