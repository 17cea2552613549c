use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flagrefs::{Delimiters, Options, RepoType, ScanError};

/// Scan a checked-out repository for feature-flag code references and send
/// them to your flag-management service.
#[derive(Parser, Debug)]
#[command(name = "flagrefs", version, about)]
struct Opts {
    /// Personal access token with write-level access
    #[arg(short = 't', long, env = "LD_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Service base URI
    #[arg(short = 'U', long, env = "LD_BASE_URI", default_value = "https://app.launchdarkly.com")]
    base_uri: String,

    /// Project key
    #[arg(short = 'p', long, env = "LD_PROJ_KEY")]
    proj_key: String,

    /// Path to the existing checkout of the repository
    #[arg(short = 'd', long)]
    dir: PathBuf,

    /// The currently checked out branch. Provide this when CI leaves the
    /// repository in a detached HEAD state
    #[arg(short = 'b', long)]
    branch: Option<String>,

    /// The git default branch, advertised to the service UI
    #[arg(short = 'B', long, default_value = "master")]
    default_branch: String,

    /// Repo service provider: github|bitbucket|custom
    #[arg(short = 'T', long, default_value = "custom")]
    repo_type: RepoType,

    /// Repo name as displayed by the service. Letters, numbers, '.', '_'
    /// and '-' only
    #[arg(short = 'r', long)]
    repo_name: String,

    /// Display URL for the repository
    #[arg(short = 'u', long)]
    repo_url: Option<String>,

    /// Link template for commits. Allowed variables: ${sha}, ${branchName}
    #[arg(long)]
    commit_url_template: Option<String>,

    /// Link template for code references. Allowed variables: ${sha},
    /// ${filePath}, ${lineNumber}
    #[arg(long)]
    hunk_url_template: Option<String>,

    /// Context lines sent with each reference. -1 sends no source, 0 only
    /// the matching lines, up to a maximum of 5
    #[arg(short = 'c', long, default_value_t = 2, allow_hyphen_values = true)]
    context_lines: i32,

    /// Extra single-character delimiter; repeatable
    #[arg(short = 'D', long = "delimiters")]
    delimiters: Vec<String>,

    /// Drop the default `"`, `'` and backtick delimiters
    #[arg(long)]
    disable_default_delimiters: bool,

    /// Version number for this submission; data is only updated when it is
    /// greater than the previously stored one. Negative means unset
    #[arg(short = 's', long, default_value_t = -1, allow_hyphen_values = true)]
    update_sequence_id: i64,

    /// Run the scan without sending anything to the service
    #[arg(long)]
    dry_run: bool,

    /// Write a CSV of all code references to this directory
    #[arg(short = 'o', long)]
    out_dir: Option<PathBuf>,

    /// Exit with code 0 when the service is unreachable or misbehaving
    #[arg(short = 'i', long)]
    ignore_service_errors: bool,

    /// Verbose debug logging
    #[arg(long)]
    debug: bool,
}

impl Opts {
    fn into_options(self) -> Options {
        Options {
            access_token: self.access_token,
            base_uri: self.base_uri,
            proj_key: self.proj_key,
            dir: self.dir,
            branch: self.branch,
            default_branch: self.default_branch,
            repo_type: self.repo_type,
            repo_name: self.repo_name,
            repo_url: self.repo_url,
            commit_url_template: self.commit_url_template,
            hunk_url_template: self.hunk_url_template,
            context_lines: self.context_lines,
            delimiters: Delimiters {
                disable_defaults: self.disable_default_delimiters,
                additional: self.delimiters,
            },
            update_sequence_id: self.update_sequence_id,
            dry_run: self.dry_run,
            out_dir: self.out_dir,
            ignore_service_errors: self.ignore_service_errors,
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    let default_filter = if opts.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = opts.into_options();
    if let Err(err) = flagrefs::scan::run(&options).await {
        if err.is_transient() && options.ignore_service_errors {
            tracing::warn!(error = %err, "ignoring transient service error");
            return;
        }
        let hint = if err.is_transient() {
            "\n Pass --ignore-service-errors to ignore this error"
        } else {
            ""
        };
        eprintln!("error: {}{}", err, hint);
        std::process::exit(1);
    }
}
