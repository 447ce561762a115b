use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use release_extract::notifier::VerbosityLevel;
use release_extract::work_queue::DEFAULT_PARALLELISM;
use release_extract::{
    is_silent_exit, CancelToken, ExtractError, ExtractOptions, Notifier, ReleaseExtractor,
};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Extract the contents of a release image",
    long_about = "Extract the release manifests of a release image to a directory, print a \
                  single manifest file, or check out the source of every component at the \
                  commit it was built from."
)]
struct Cli {
    #[arg(help = "Release image: an OCI layout directory or archive, optionally @<digest>")]
    image: Option<String>,

    #[arg(long, help = "Release image to extract from (alternative to the argument)")]
    from: Option<String>,

    #[arg(
        long = "to",
        default_value = ".",
        help = "Directory to write the release manifests to"
    )]
    directory: PathBuf,

    #[arg(long, help = "Print a single file from the release manifests to stdout")]
    file: Option<String>,

    #[arg(
        long = "git",
        value_name = "DIR",
        help = "Check out the source of each component under DIR"
    )]
    git_dir: Option<PathBuf>,

    #[arg(
        long,
        help = "Warn instead of failing when the release image does not match its digest"
    )]
    skip_verification: bool,

    #[arg(
        long,
        default_value_t = DEFAULT_PARALLELISM,
        help = "Maximum number of repositories checked out at once"
    )]
    max_parallel: usize,

    #[arg(
        long,
        value_name = "SECS",
        help = "Stop starting new checkouts after this many seconds"
    )]
    timeout: Option<u64>,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

impl Cli {
    fn into_options(self) -> Result<ExtractOptions> {
        let from = match (self.image, self.from) {
            (Some(_), Some(_)) => return Err(ExtractError::AmbiguousImage.into()),
            (Some(image), None) | (None, Some(image)) => image,
            (None, None) => String::new(),
        };
        Ok(ExtractOptions {
            from,
            directory: self.directory,
            file: self.file,
            git_dir: self.git_dir,
            skip_verification: self.skip_verification,
            max_parallel: self.max_parallel,
        })
    }
}

fn run(cli: Cli, notifier: &Notifier) -> Result<()> {
    let cancel = CancelToken::new();
    if let Some(secs) = cli.timeout {
        cancel.cancel_after(Duration::from_secs(secs));
    }

    let options = cli.into_options()?;
    info!("Starting release-extract with image: {}", options.from);
    debug!("Options: {:?}", options);

    ReleaseExtractor::new(cancel).run(&options, notifier)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity level
    let verbosity = VerbosityLevel::from(cli.verbose);
    env_logger::Builder::from_env(Env::default())
        .filter_level(verbosity.to_log_level())
        .init();

    let notifier = Notifier::new(cli.verbose);
    debug!("Beautiful progress: {}", notifier.use_beautiful_progress());

    match run(cli, &notifier) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_silent_exit(&err) => ExitCode::FAILURE,
        Err(err) => {
            notifier.error(&format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}
