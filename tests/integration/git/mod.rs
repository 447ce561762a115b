//! Source checkout tests
//!
//! The first group runs the whole pipeline: release metadata is read out of a
//! real release image and every component is cloned from a local upstream. The
//! rest swap in test doubles to observe scheduling.

use crate::integration::common::{
    captured_notifier, head_commit, image_references, MockCheckout, MockLoader, ReleaseImage,
    Upstream,
};
use release_extract::{
    is_silent_exit, CancelToken, ExtractError, ExtractOptions, GitCheckout, ImageReleaseLoader,
    ReleaseExtractor,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn git_options(image: &str, root: &Path) -> ExtractOptions {
    ExtractOptions {
        from: image.to_string(),
        git_dir: Some(root.to_path_buf()),
        ..ExtractOptions::default()
    }
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

#[test]
fn test_checks_out_each_repository_once() {
    let cli = Upstream::new(&["cli v1", "cli v2"]);
    let pod = Upstream::new(&["pod v1"]);
    let release = ReleaseImage::with_manifests(&[(
        "image-references",
        &image_references(
            "4.15.0",
            &[
                ("cli", Some(cli.url.as_str()), Some(cli.commits[0].as_str())),
                ("cli-artifacts", Some(cli.url.as_str()), Some(cli.commits[0].as_str())),
                ("pod", Some(pod.url.as_str()), Some(pod.commits[0].as_str())),
                ("must-gather", None, None),
            ],
        ),
    )]);
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    ReleaseExtractor::new(CancelToken::new())
        .run(&git_options(&release.reference(), root.path()), &notifier)
        .unwrap();

    let cli_dir = cli.clone_dir(root.path());
    let pod_dir = pod.clone_dir(root.path());
    assert_eq!(
        sorted(out.lines()),
        sorted(vec![
            cli_dir.display().to_string(),
            pod_dir.display().to_string()
        ])
    );
    assert_eq!(err.text(), "", "tags without source info are not reported in quiet mode");

    assert_eq!(head_commit(&cli_dir), cli.commits[0]);
    assert_eq!(fs::read_to_string(cli_dir.join("README")).unwrap(), "cli v1");
    assert_eq!(head_commit(&pod_dir), pod.commits[0]);
}

#[test]
fn test_failed_checkout_does_not_stop_others() {
    let good = Upstream::new(&["good"]);
    let bad = Upstream::new(&["bad"]);
    let missing_commit = "0123456789abcdef0123456789abcdef01234567";
    let release = ReleaseImage::with_manifests(&[(
        "image-references",
        &image_references(
            "4.15.0",
            &[
                ("good", Some(good.url.as_str()), Some(good.commits[0].as_str())),
                ("bad", Some(bad.url.as_str()), Some(missing_commit)),
            ],
        ),
    )]);
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    let result = ReleaseExtractor::new(CancelToken::new())
        .run(&git_options(&release.reference(), root.path()), &notifier);

    let err_value = result.unwrap_err();
    assert!(is_silent_exit(&err_value));
    assert_eq!(out.lines(), vec![good.clone_dir(root.path()).display().to_string()]);

    let errors: Vec<_> = err
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("error: "))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with(&format!("error: checking out commit for {}", bad.url)));
    assert!(errors[0].contains(missing_commit));
}

#[test]
fn test_conflicting_commits_keep_first_reference() {
    let upstream = Upstream::new(&["first", "second"]);
    let release = ReleaseImage::with_manifests(&[(
        "image-references",
        &image_references(
            "4.15.0",
            &[
                ("a", Some(upstream.url.as_str()), Some(upstream.commits[0].as_str())),
                ("b", Some(upstream.url.as_str()), Some(upstream.commits[1].as_str())),
                ("c", Some(upstream.url.as_str()), Some(upstream.commits[1].as_str())),
            ],
        ),
    )]);
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    ReleaseExtractor::new(CancelToken::new())
        .run(&git_options(&release.reference(), root.path()), &notifier)
        .unwrap();

    let clone_dir = upstream.clone_dir(root.path());
    assert_eq!(out.lines(), vec![clone_dir.display().to_string()]);
    assert_eq!(
        err.lines(),
        vec![format!(
            "warning: Repo {} referenced more than once with different commits, only checking out the first reference",
            upstream.url
        )]
    );
    assert_eq!(head_commit(&clone_dir), upstream.commits[0]);
}

#[test]
fn test_existing_clone_is_updated_in_place() {
    let upstream = Upstream::new(&["one", "two"]);
    let root = TempDir::new().unwrap();

    for commit in [&upstream.commits[0], &upstream.commits[1]] {
        let release = ReleaseImage::with_manifests(&[(
            "image-references",
            &image_references("4.15.0", &[("a", Some(upstream.url.as_str()), Some(commit.as_str()))]),
        )]);
        let (notifier, _, _) = captured_notifier();
        ReleaseExtractor::new(CancelToken::new())
            .run(&git_options(&release.reference(), root.path()), &notifier)
            .unwrap();
        assert_eq!(&head_commit(&upstream.clone_dir(root.path())), commit);
    }
}

#[test]
fn test_source_checkout_ignores_digest_mismatch() {
    let upstream = Upstream::new(&["one"]);
    let release = ReleaseImage::with_manifests(&[(
        "image-references",
        &image_references(
            "4.15.0",
            &[("a", Some(upstream.url.as_str()), Some(upstream.commits[0].as_str()))],
        ),
    )]);
    let wrong = release_extract::Digest::sha256(b"some other release");
    let root = TempDir::new().unwrap();
    let (notifier, out, _) = captured_notifier();

    ReleaseExtractor::with_collaborators(ImageReleaseLoader::new(), GitCheckout::new(), CancelToken::new())
        .run(&git_options(&release.pinned_reference(&wrong), root.path()), &notifier)
        .unwrap();
    assert_eq!(out.lines().len(), 1);
}

#[test]
fn test_parallelism_is_bounded() {
    let tags: Vec<_> = (0..12)
        .map(|i| {
            (
                format!("component-{}", i),
                format!("https://github.com/org/repo-{}", i),
                format!("{:040x}", i),
            )
        })
        .collect();
    let tag_refs: Vec<_> = tags
        .iter()
        .map(|(tag, repo, commit)| (tag.as_str(), repo.as_str(), commit.as_str()))
        .collect();

    let checkout = MockCheckout {
        delay: Duration::from_millis(20),
        ..MockCheckout::default()
    };
    let stats = checkout.stats.clone();
    let extractor = ReleaseExtractor::with_collaborators(
        MockLoader::new(&tag_refs),
        checkout,
        CancelToken::new(),
    );
    let root = TempDir::new().unwrap();
    let (notifier, out, _) = captured_notifier();

    let mut options = git_options("release", root.path());
    options.max_parallel = 3;
    extractor.run(&options, &notifier).unwrap();

    assert_eq!(out.lines().len(), 12);
    assert_eq!(stats.checkouts.lock().unwrap().len(), 12);
    let peak = stats.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeds the limit", peak);
    assert!(peak >= 1);
}

#[test]
fn test_failure_output_follows_error_line() {
    let checkout = MockCheckout {
        failing: vec!["https://github.com/org/broken".to_string()],
        ..MockCheckout::default()
    };
    let extractor = ReleaseExtractor::with_collaborators(
        MockLoader::new(&[
            ("ok", "https://github.com/org/ok", "aaaa"),
            ("broken", "https://github.com/org/broken", "bbbb"),
        ]),
        checkout,
        CancelToken::new(),
    );
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    let result = extractor.run(&git_options("release", root.path()), &notifier);

    assert!(is_silent_exit(&result.unwrap_err()));
    assert_eq!(
        out.lines(),
        vec![root.path().join("github.com/org/ok").display().to_string()]
    );
    assert_eq!(
        err.lines(),
        vec![
            "error: checking out commit for https://github.com/org/broken: commit bbbb not found"
                .to_string(),
            "fatal: reference is not a tree: bbbb".to_string(),
        ]
    );
}

#[test]
fn test_cancelled_run_starts_nothing() {
    let checkout = MockCheckout::default();
    let stats = checkout.stats.clone();
    let cancel = CancelToken::new();
    cancel.cancel();
    let extractor = ReleaseExtractor::with_collaborators(
        MockLoader::new(&[("a", "https://github.com/org/a", "aaaa")]),
        checkout,
        cancel,
    );
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    let result = extractor.run(&git_options("release", root.path()), &notifier);

    assert!(is_silent_exit(&result.unwrap_err()));
    assert!(stats.checkouts.lock().unwrap().is_empty());
    assert_eq!(out.text(), "");
    assert!(err.text().starts_with("warning: cancelled before 1 of 1"));
}

#[test]
fn test_git_mode_rejects_file_option() {
    let root = TempDir::new().unwrap();
    let (notifier, _, _) = captured_notifier();
    let mut options = git_options("release", root.path());
    options.file = Some("image-references".to_string());

    let err = ReleaseExtractor::new(CancelToken::new())
        .run(&options, &notifier)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ExtractError>(),
        Some(&ExtractError::ConflictingModes)
    );
}

#[test]
fn test_url_aliases_share_one_checkout() {
    let upstream = Upstream::new(&["first", "second"]);
    let alias = format!("{}.git", upstream.url);
    let release = ReleaseImage::with_manifests(&[(
        "image-references",
        &image_references(
            "4.15.0",
            &[
                ("a", Some(upstream.url.as_str()), Some(upstream.commits[0].as_str())),
                ("b", Some(alias.as_str()), Some(upstream.commits[0].as_str())),
                ("c", Some(alias.as_str()), Some(upstream.commits[1].as_str())),
            ],
        ),
    )]);
    let root = TempDir::new().unwrap();
    let (notifier, out, err) = captured_notifier();

    ReleaseExtractor::new(CancelToken::new())
        .run(&git_options(&release.reference(), root.path()), &notifier)
        .unwrap();

    let clone_dir = upstream.clone_dir(root.path());
    assert_eq!(out.lines(), vec![clone_dir.display().to_string()]);
    assert_eq!(
        err.lines(),
        vec![format!(
            "warning: Repo {} referenced more than once with different commits, only checking out the first reference",
            alias
        )]
    );
    assert_eq!(head_commit(&clone_dir), upstream.commits[0]);
}
