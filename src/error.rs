use thiserror::Error;

/// Outcomes of an extraction run that callers need to tell apart.
///
/// Everything else travels as a plain [`anyhow::Error`] with context attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("only one of --file or --git may be specified")]
    ConflictingModes,

    #[error("must specify an image containing a release payload with --from")]
    MissingImage,

    #[error("you may only specify a single image via --from or argument")]
    AmbiguousImage,

    #[error("only one of --to and --file may be set")]
    ConflictingOutput,

    #[error("image did not contain {0}")]
    FileNotFound(String),

    #[error("the release image failed content verification and may have been tampered with")]
    ContentVerification,

    /// Per-task failures were already printed; exit non-zero without another message.
    #[error("one or more errors were reported above")]
    AlreadyReported,
}

impl ExtractError {
    /// True when the error has already been shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, ExtractError::AlreadyReported)
    }
}

/// Checks whether an error chain ends the run without printing anything new.
pub fn is_silent_exit(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExtractError>()
        .is_some_and(ExtractError::is_silent)
}
