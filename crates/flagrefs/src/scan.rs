//! The orchestrator: one scan run from option validation through pruning.

use crate::aliases;
use crate::config::{self, Options};
use crate::error::ScanError;
use crate::git::GitClient;
use crate::hunker;
use crate::report;
use crate::search::SearchDriver;
use crate::service::{stale_branches, ApiClient, ApiOptions};
use crate::types::RepoParams;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Very short flag keys produce large numbers of false positives, so keys
/// below this length are not searched for.
pub const MIN_FLAG_KEY_LEN: usize = 3;
/// Project keys longer than this smell like a pasted credential.
const MAX_PROJ_KEY_LEN: usize = 20;
/// Extra attempts for transient service failures.
const RETRY_MAX: u32 = 2;

/// Execute one scan run. Phases are strictly ordered: upsert before submit,
/// submit before prune.
pub async fn run(opts: &Options) -> Result<(), ScanError> {
    opts.validate()?;
    debug!(
        access_token = %report::mask_access_token(&opts.access_token),
        proj_key = %opts.proj_key,
        repo = %opts.repo_name,
        "starting code reference scan"
    );

    let dir = opts
        .dir
        .canonicalize()
        .map_err(|e| ScanError::Config(format!("could not resolve dir: {}", e)))?;
    info!(path = %dir.display(), "scanning repository");

    let git = GitClient::new(&dir, opts.branch.as_deref())?;

    if opts.proj_key.len() > MAX_PROJ_KEY_LEN {
        if opts.proj_key.starts_with("sdk-") {
            warn!("provided projKey (sdk-xxxx) appears to be an SDK key");
        } else if opts.proj_key.starts_with("api-") {
            warn!("provided projKey (api-xxxx) appears to be an API access token");
        }
    }

    let api = ApiClient::new(ApiOptions {
        access_token: opts.access_token.clone(),
        base_uri: opts.normalized_base_uri(),
        proj_key: opts.proj_key.clone(),
        user_agent: format!("FlagRefs/{}", env!("CARGO_PKG_VERSION")),
        retry_max: RETRY_MAX,
    })?;

    let repo_params = RepoParams {
        repo_type: opts.repo_type.as_str().to_string(),
        name: opts.repo_name.clone(),
        url: opts.repo_url.clone(),
        commit_url_template: opts.commit_url_template.clone(),
        hunk_url_template: opts.hunk_url_template.clone(),
        default_branch: opts.default_branch.clone(),
    };

    if !opts.dry_run {
        api.maybe_upsert_repository(&repo_params).await?;
    }

    let flags = api.get_flag_keys().await?;
    if flags.is_empty() {
        info!(proj_key = %opts.proj_key, "no flag keys found for project, exiting early");
        return Ok(());
    }
    let (filtered, omitted) = filter_short_flag_keys(flags);
    if filtered.is_empty() {
        info!(
            minimum = MIN_FLAG_KEY_LEN,
            "no flag keys at or above the minimum length, exiting early"
        );
        return Ok(());
    }
    if !omitted.is_empty() {
        warn!(
            omitted = omitted.len(),
            minimum = MIN_FLAG_KEY_LEN,
            "omitting flags with keys shorter than the minimum length"
        );
    }

    let specs = config::load_yaml_config(&dir)?.unwrap_or_default().aliases;
    let alias_map = aliases::generate_aliases(&specs, &filtered, &dir).await?;

    let driver = SearchDriver::new(
        &alias_map,
        &opts.delimiters.delimiter_string(),
        opts.context_lines,
    )?;
    let scan_dir = dir.clone();
    let results = tokio::task::spawn_blocking(move || driver.scan(&scan_dir))
        .await
        .map_err(|e| ScanError::Search(e.to_string()))??;

    let references = hunker::make_reference_hunks(results, &opts.proj_key, opts.context_lines)?;
    let branch_rep = report::make_branch_rep(
        &git.branch,
        &git.head_sha,
        opts.update_sequence_id(),
        references,
    );

    if let Some(out_dir) = &opts.out_dir {
        let path = report::write_csv(&branch_rep, out_dir, &opts.proj_key, &opts.repo_name)?;
        info!(path = %path.display(), "wrote code references to csv");
    }
    if opts.debug {
        report::log_reference_count_table(&branch_rep);
    }

    if opts.dry_run {
        info!(
            references = branch_rep.total_hunk_count(),
            flags = filtered.len(),
            files = branch_rep.references.len(),
            "dry run found code references, nothing submitted"
        );
        return Ok(());
    }

    info!(
        references = branch_rep.total_hunk_count(),
        flags = filtered.len(),
        files = branch_rep.references.len(),
        proj_key = %opts.proj_key,
        "sending code references to the service"
    );
    match api.put_branch(&opts.repo_name, &branch_rep).await {
        Ok(()) => {}
        Err(err @ ScanError::UpdateSequenceConflict) => {
            warn!(update_sequence_id = ?branch_rep.update_sequence_id, "{}", err);
        }
        Err(e) => return Err(e),
    }

    info!("attempting to prune stale code reference branches");
    match git.remote_branches() {
        Err(e) => {
            warn!(error = %e, "unable to retrieve the remote branch list, skipping pruning")
        }
        Ok(remote) => {
            if let Err(e) = prune(&api, &opts.repo_name, &remote).await {
                warn!(error = %e, "failed to mark stale branches for pruning");
            }
        }
    }
    Ok(())
}

/// Partition flags into (searchable, omitted-as-too-short).
pub fn filter_short_flag_keys(flags: Vec<String>) -> (Vec<String>, Vec<String>) {
    flags
        .into_iter()
        .partition(|flag| flag.len() >= MIN_FLAG_KEY_LEN)
}

async fn prune(
    api: &ApiClient,
    repo_name: &str,
    remote: &HashSet<String>,
) -> Result<(), ScanError> {
    let known = api.get_branch_names(repo_name).await?;
    let stale = stale_branches(&known, remote);
    info!(stale = stale.len(), "found stale branches to be marked for pruning");
    if !stale.is_empty() {
        debug!(branches = ?stale, "marking stale branches for pruning");
        api.post_delete_branches_task(repo_name, &stale).await?;
    }
    Ok(())
}
