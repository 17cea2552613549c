//! HTTP client for the flag-management service's code-references API.
//!
//! All mutating calls are idempotent from the scanner's point of view: a 409
//! on repository creation means another runner got there first, and a 409 on
//! branch submission means a newer update-sequence id is already stored.
//! Transient failures (5xx, connect, timeout) retry with a linear backoff
//! inside this module; callers only observe final outcomes.

use crate::error::ScanError;
use crate::types::{BranchRep, RepoParams};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ApiOptions {
    pub access_token: String,
    pub base_uri: String,
    pub proj_key: String,
    pub user_agent: String,
    /// Additional attempts after the first for transient failures.
    pub retry_max: u32,
}

pub struct ApiClient {
    http: Client,
    opts: ApiOptions,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct FlagItem {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct BranchItem {
    name: String,
}

impl ApiClient {
    pub fn new(opts: ApiOptions) -> Result<Self, ScanError> {
        let http = Client::builder()
            .user_agent(opts.user_agent.clone())
            .build()
            .map_err(|e| ScanError::Config(format!("could not build http client: {}", e)))?;
        Ok(Self { http, opts })
    }

    fn repos_uri(&self) -> String {
        format!("{}/api/v2/code-refs/repositories", self.opts.base_uri)
    }

    /// Fetch every flag key in the project.
    pub async fn get_flag_keys(&self) -> Result<Vec<String>, ScanError> {
        let url = format!(
            "{}/api/v2/flags/{}?summary=true",
            self.opts.base_uri, self.opts.proj_key
        );
        let res = self.send_with_retry(|| self.http.get(&url)).await?;
        let res = self.expect_success(res).await?;
        let flags: ItemsResponse<FlagItem> = res.json().await?;
        Ok(flags.items.into_iter().map(|f| f.key).collect())
    }

    /// Make sure the repository exists on the service with the desired
    /// metadata: create it when absent, patch it when its link templates or
    /// default branch drifted.
    pub async fn maybe_upsert_repository(&self, params: &RepoParams) -> Result<(), ScanError> {
        let url = format!("{}/{}", self.repos_uri(), params.name);
        let res = self.send_with_retry(|| self.http.get(&url)).await?;
        match res.status() {
            StatusCode::NOT_FOUND => {
                debug!(repo = %params.name, "repository not found, creating it");
                self.post_repository(params).await
            }
            s if s.is_success() => {
                let existing: RepoParams = res.json().await?;
                if existing.url != params.url
                    || existing.commit_url_template != params.commit_url_template
                    || existing.hunk_url_template != params.hunk_url_template
                    || existing.default_branch != params.default_branch
                {
                    debug!(repo = %params.name, "repository metadata drifted, patching it");
                    self.patch_repository(params).await
                } else {
                    Ok(())
                }
            }
            _ => Err(self.unexpected_status(res).await),
        }
    }

    async fn post_repository(&self, params: &RepoParams) -> Result<(), ScanError> {
        let url = self.repos_uri();
        let res = self
            .send_with_retry(|| self.http.post(&url).json(params))
            .await?;
        match res.status() {
            StatusCode::CONFLICT => {
                // Another runner created the repository concurrently.
                debug!(repo = %params.name, "repository already exists");
                Ok(())
            }
            s if s.is_success() => Ok(()),
            _ => Err(self.unexpected_status(res).await),
        }
    }

    async fn patch_repository(&self, params: &RepoParams) -> Result<(), ScanError> {
        let url = format!("{}/{}", self.repos_uri(), params.name);
        let res = self
            .send_with_retry(|| self.http.patch(&url).json(params))
            .await?;
        self.expect_success(res).await.map(|_| ())
    }

    /// Submit the branch report. 409 and 413 get their dedicated error
    /// variants; the caller decides how to react.
    pub async fn put_branch(&self, repo_name: &str, branch: &BranchRep) -> Result<(), ScanError> {
        let url = format!(
            "{}/{}/branches/{}",
            self.repos_uri(),
            repo_name,
            urlencoding::encode(&branch.name)
        );
        let res = self
            .send_with_retry(|| self.http.put(&url).json(branch))
            .await?;
        match res.status() {
            StatusCode::CONFLICT => Err(ScanError::UpdateSequenceConflict),
            StatusCode::PAYLOAD_TOO_LARGE => Err(ScanError::EntityTooLarge),
            s if s.is_success() => Ok(()),
            _ => Err(self.unexpected_status(res).await),
        }
    }

    /// Branch names the service currently knows for this repository.
    pub async fn get_branch_names(&self, repo_name: &str) -> Result<Vec<String>, ScanError> {
        let url = format!("{}/{}/branches", self.repos_uri(), repo_name);
        let res = self.send_with_retry(|| self.http.get(&url)).await?;
        let res = self.expect_success(res).await?;
        let branches: ItemsResponse<BranchItem> = res.json().await?;
        Ok(branches.items.into_iter().map(|b| b.name).collect())
    }

    /// Queue a prune task retiring the given branches.
    pub async fn post_delete_branches_task(
        &self,
        repo_name: &str,
        branches: &[String],
    ) -> Result<(), ScanError> {
        let url = format!("{}/{}/branch-delete-tasks", self.repos_uri(), repo_name);
        let body = serde_json::json!({ "branches": branches });
        let res = self
            .send_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        self.expect_success(res).await.map(|_| ())
    }

    /// Send a request, retrying transient failures (connect errors, timeouts,
    /// 5xx responses) up to `retry_max` extra attempts with linear backoff.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, ScanError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            // `.json()` on the builder already set Content-Type for bodied
            // requests.
            let outcome = build()
                .header("Authorization", &self.opts.access_token)
                .send()
                .await;
            match outcome {
                Ok(res) if res.status().is_server_error() && attempt < self.opts.retry_max => {
                    warn!(
                        status = res.status().as_u16(),
                        attempt = attempt + 1,
                        "service returned a server error, retrying"
                    );
                }
                Ok(res) => return Ok(res),
                Err(e) if attempt < self.opts.retry_max => {
                    warn!(error = %e, attempt = attempt + 1, "request failed, retrying");
                }
                Err(e) => return Err(ScanError::ServiceTransient(e.to_string())),
            }
            attempt += 1;
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }

    /// Map a non-success response to the error taxonomy: 5xx is transient,
    /// anything else lands in ServiceClient.
    async fn expect_success(&self, res: Response) -> Result<Response, ScanError> {
        if res.status().is_success() {
            return Ok(res);
        }
        Err(self.unexpected_status(res).await)
    }

    async fn unexpected_status(&self, res: Response) -> ScanError {
        let status = res.status();
        let mut message = res.text().await.unwrap_or_default();
        if message.chars().count() > 200 {
            message = message.chars().take(200).collect::<String>() + "…";
        }
        if status.is_server_error() {
            ScanError::ServiceTransient(format!("{}: {}", status, message))
        } else {
            ScanError::ServiceClient {
                status: status.as_u16(),
                message,
            }
        }
    }
}

/// Branches the service knows that are gone from the remote.
pub fn stale_branches(known: &[String], remote: &std::collections::HashSet<String>) -> Vec<String> {
    known
        .iter()
        .filter(|name| !remote.contains(name.as_str()))
        .cloned()
        .collect()
}
