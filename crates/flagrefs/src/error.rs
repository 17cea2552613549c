use std::error::Error;
use std::fmt::{self, Display};

/// Typed errors surfaced by the scan pipeline.
///
/// Only three cases are recovered internally: a `409` on repository creation
/// (concurrent runner), [`ScanError::UpdateSequenceConflict`] on branch
/// submission, and pruning failures. Everything else propagates to the
/// binary, which prints one line and exits non-zero.
#[derive(Debug)]
pub enum ScanError {
    /// Option parsing, YAML validation, regex compilation, or an invalid
    /// alias spec. Raised before any network use.
    Config(String),
    /// A required external tool (git) is absent.
    EnvironmentMissing(String),
    /// git failed while resolving the branch or head SHA.
    RepoInspection(String),
    /// An alias spec failed to produce aliases (command failure, bad JSON,
    /// unreadable file).
    AliasGeneration(String),
    /// The search driver failed reading the working tree.
    Search(String),
    /// Search results arrived out of (path, line) order; the hunker cannot
    /// work around this.
    SortOrderViolation(String),
    /// 5xx / connect / timeout after the client exhausted its retries.
    ServiceTransient(String),
    /// An unexpected 4xx from the service.
    ServiceClient { status: u16, message: String },
    /// 409 on branch submission: the submitted updateSequenceId is not
    /// greater than the stored one. Benign under concurrent runs.
    UpdateSequenceConflict,
    /// 413 on branch submission.
    EntityTooLarge,
}

impl ScanError {
    /// Transient service errors may be downgraded to a warning when the run
    /// was started with `--ignore-service-errors`.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::ServiceTransient(_))
    }
}

impl Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Config(s) => write!(f, "invalid configuration: {}", s),
            ScanError::EnvironmentMissing(s) => write!(f, "missing required tool: {}", s),
            ScanError::RepoInspection(s) => write!(f, "could not inspect repository: {}", s),
            ScanError::AliasGeneration(s) => write!(f, "failed to generate aliases: {}", s),
            ScanError::Search(s) => write!(f, "search failed: {}", s),
            ScanError::SortOrderViolation(s) => {
                write!(f, "search results returned out of order: {}", s)
            }
            ScanError::ServiceTransient(s) => write!(f, "service unavailable: {}", s),
            ScanError::ServiceClient { status, message } => {
                write!(f, "service rejected request ({}): {}", status, message)
            }
            ScanError::UpdateSequenceConflict => write!(
                f,
                "updateSequenceId must be greater than the previously submitted updateSequenceId"
            ),
            ScanError::EntityTooLarge => write!(
                f,
                "code reference payload too large for the service - consider excluding more files with .ldignore"
            ),
        }
    }
}

impl Error for ScanError {}

impl From<regex::Error> for ScanError {
    fn from(e: regex::Error) -> Self {
        ScanError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(e: serde_yaml::Error) -> Self {
        ScanError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::ServiceTransient(e.to_string())
    }
}
