pub mod digest;
pub mod error;
pub mod extract;
pub mod extracted_image;
pub mod git;
pub mod image_ref;
pub mod notifier;
pub mod outcome;
pub mod plan;
pub mod release;
pub mod tar_extractor;
pub mod verifier;
pub mod work_queue;

// Re-exports for easy access
pub use digest::Digest;
pub use error::{is_silent_exit, ExtractError};
pub use extract::{ExtractOptions, Mode, ReleaseExtractor};
pub use extracted_image::{ContentMetadata, ExtractEvent, ExtractedImage, Mapping};
pub use git::{CheckedOutRepo, GitCheckout, SourceCheckout};
pub use image_ref::ImageReference;
pub use notifier::Notifier;
pub use release::{ImageReleaseLoader, ReleaseInfo, ReleaseLoader, ReleaseReference};
pub use work_queue::{CancelToken, WorkQueue};
