//! Release manifest extraction tests

use crate::integration::common::{captured_notifier, ReleaseImage, CREATED};
use release_extract::{CancelToken, Digest, ExtractError, ExtractOptions, ReleaseExtractor};
use std::fs;
use std::path::Path;
use tar_rs as tar;
use tempfile::TempDir;

const MANIFESTS: &[(&str, &str)] = &[
    ("0000_00_cluster-version-operator_01_namespace.yaml", "kind: Namespace\n"),
    ("0000_50_console_deployment.yaml", "kind: Deployment\n"),
    ("image-references", r#"{"kind":"ImageStream","metadata":{"name":"4.15.0"}}"#),
];

fn manifest_options(image: String, to: &Path) -> ExtractOptions {
    ExtractOptions {
        from: image,
        directory: to.to_path_buf(),
        ..ExtractOptions::default()
    }
}

fn extract_error(err: &anyhow::Error) -> Option<&ExtractError> {
    err.downcast_ref::<ExtractError>()
}

#[test]
fn test_extracts_release_manifests() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let to = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    ReleaseExtractor::new(CancelToken::new())
        .run(&manifest_options(release.reference(), to.path()), &notifier)
        .unwrap();

    for (name, content) in MANIFESTS {
        assert_eq!(fs::read_to_string(to.path().join(name)).unwrap(), *content);
    }
    assert!(!to.path().join("usr").exists());
    assert_eq!(
        out.lines(),
        vec![format!(
            "Extracted release payload from digest {} created at {}",
            release.manifest_digest, CREATED
        )]
    );
    assert_eq!(err.text(), "");
}

#[test]
fn test_pinned_reference_matching_digest() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let to = TempDir::new().unwrap();
    let (notifier, out, _) = captured_notifier();

    let image = release.pinned_reference(&release.manifest_digest);
    ReleaseExtractor::new(CancelToken::new())
        .run(&manifest_options(image, to.path()), &notifier)
        .unwrap();

    assert_eq!(
        out.lines(),
        vec![format!("Extracted release payload created at {}", CREATED)]
    );
}

#[test]
fn test_digest_mismatch_fails_verification() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let to = TempDir::new().unwrap();
    let (notifier, out, _) = captured_notifier();

    let image = release.pinned_reference(&Digest::sha256(b"tampered"));
    let err = ReleaseExtractor::new(CancelToken::new())
        .run(&manifest_options(image, to.path()), &notifier)
        .unwrap_err();

    assert_eq!(extract_error(&err), Some(&ExtractError::ContentVerification));
    assert_eq!(out.text(), "", "no success message after a failed verification");
}

#[test]
fn test_skip_verification_downgrades_to_warning() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let to = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    let mut options = manifest_options(
        release.pinned_reference(&Digest::sha256(b"tampered")),
        to.path(),
    );
    options.skip_verification = true;
    ReleaseExtractor::new(CancelToken::new())
        .run(&options, &notifier)
        .unwrap();

    assert!(to.path().join("image-references").is_file());
    assert_eq!(
        err.lines(),
        vec![format!("warning: {}", ExtractError::ContentVerification)]
    );
    assert_eq!(
        out.lines(),
        vec![format!("Extracted release payload created at {}", CREATED)]
    );
}

#[test]
fn test_creates_missing_output_directory() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let parent = TempDir::new().unwrap();
    let to = parent.path().join("nested/out");
    let (notifier, _, _) = captured_notifier();

    ReleaseExtractor::new(CancelToken::new())
        .run(&manifest_options(release.reference(), &to), &notifier)
        .unwrap();
    assert!(to.join("0000_50_console_deployment.yaml").is_file());
}

#[test]
fn test_extracts_from_layout_archive() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let archive_dir = TempDir::new().unwrap();
    let archive = archive_dir.path().join("release.tar");
    let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
    builder.append_dir_all(".", release.path()).unwrap();
    builder.finish().unwrap();
    drop(builder);

    let to = TempDir::new().unwrap();
    let (notifier, out, _) = captured_notifier();
    ReleaseExtractor::new(CancelToken::new())
        .run(
            &manifest_options(archive.to_str().unwrap().to_string(), to.path()),
            &notifier,
        )
        .unwrap();

    assert!(to.path().join("image-references").is_file());
    assert_eq!(out.lines().len(), 1);
}

#[test]
fn test_file_mode_prints_contents() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let (notifier, out, err) = captured_notifier();

    let options = ExtractOptions {
        from: release.reference(),
        file: Some("image-references".to_string()),
        ..ExtractOptions::default()
    };
    ReleaseExtractor::new(CancelToken::new())
        .run(&options, &notifier)
        .unwrap();

    assert_eq!(out.bytes(), MANIFESTS[2].1.as_bytes());
    assert_eq!(err.text(), "");
}

#[test]
fn test_file_mode_missing_file() {
    let release = ReleaseImage::with_manifests(MANIFESTS);
    let (notifier, out, _) = captured_notifier();

    let options = ExtractOptions {
        from: release.reference(),
        file: Some("release-metadata".to_string()),
        ..ExtractOptions::default()
    };
    let err = ReleaseExtractor::new(CancelToken::new())
        .run(&options, &notifier)
        .unwrap_err();

    assert_eq!(
        extract_error(&err),
        Some(&ExtractError::FileNotFound("release-metadata".to_string()))
    );
    assert_eq!(err.to_string(), "image did not contain release-metadata");
    assert!(out.bytes().is_empty());
}

#[test]
fn test_missing_image_is_rejected() {
    let to = TempDir::new().unwrap();
    let (notifier, _, _) = captured_notifier();

    let err = ReleaseExtractor::new(CancelToken::new())
        .run(&manifest_options(String::new(), to.path()), &notifier)
        .unwrap_err();
    assert_eq!(extract_error(&err), Some(&ExtractError::MissingImage));

    let err = ReleaseExtractor::new(CancelToken::new())
        .run(
            &manifest_options("/nonexistent/release".to_string(), to.path()),
            &notifier,
        )
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}
