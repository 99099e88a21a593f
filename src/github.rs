use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::Credentials;
use crate::model::{CommitDetail, CommitPage, CommitSummary, RepoId};
use crate::retry::{Cancelled, RetryPolicy, Service, TransientError};

pub const USER_AGENT: &str = concat!("commit-watchbot/", env!("CARGO_PKG_VERSION"));

/// Largest page size the listing endpoint accepts.
pub const PER_PAGE: u32 = 100;
/// Stop following `next` links after this many pages.
const MAX_PAGES: usize = 100;

/// Single-attempt access to the commit API. Failures are reported, not retried.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Fetch one listing page: the first one when `page` is `None`, otherwise
    /// the `next` URL returned with the previous page.
    async fn list_commits(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        page: Option<&str>,
    ) -> Result<CommitPage, TransientError>;

    async fn get_commit(&self, repo: &RepoId, sha: &str) -> Result<CommitDetail, TransientError>;
}

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

/// `since` query value: ISO-8601, UTC, whole seconds.
pub fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl GitHubClient {
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid GitHub API base URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, repo: &RepoId, tail: &str) -> String {
        format!("{}repos/{}/{}/commits{}", self.base_url, repo.owner, repo.repo, tail)
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("Time-Zone", "Etc/UTC");
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.username, Some(&creds.token)),
            None => builder,
        }
    }

    pub fn build_list_request(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
    ) -> Result<reqwest::Request, reqwest::Error> {
        self.get(self.endpoint(repo, ""))
            .query(&[("since", format_since(since)), ("per_page", PER_PAGE.to_string())])
            .build()
    }

    pub fn build_page_request(&self, next: &str) -> Result<reqwest::Request, reqwest::Error> {
        self.get(next.to_string()).build()
    }

    pub fn build_detail_request(
        &self,
        repo: &RepoId,
        sha: &str,
    ) -> Result<reqwest::Request, reqwest::Error> {
        self.get(self.endpoint(repo, &format!("/{sha}"))).build()
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::Request,
    ) -> Result<(T, Option<String>), TransientError> {
        debug!(url = %request.url(), "GitHub request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        let next = res
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|h| h.to_str().ok())
            .and_then(next_link);
        let body = res.text().await?;
        if status != StatusCode::OK {
            return Err(TransientError::Status { status, body });
        }
        let value = serde_json::from_str(&body).map_err(TransientError::Malformed)?;
        Ok((value, next))
    }
}

/// URL tagged `rel="next"` in a `Link` header.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let url = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        url.strip_prefix('<')
            .and_then(|u| u.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn list_commits(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        page: Option<&str>,
    ) -> Result<CommitPage, TransientError> {
        let request = match page {
            Some(next) => self.build_page_request(next)?,
            None => self.build_list_request(repo, since)?,
        };
        let (commits, next) = self.execute(request).await?;
        Ok(CommitPage { commits, next })
    }

    async fn get_commit(&self, repo: &RepoId, sha: &str) -> Result<CommitDetail, TransientError> {
        let request = self.build_detail_request(repo, sha)?;
        let (detail, _) = self.execute(request).await?;
        Ok(detail)
    }
}

/// Upstream client: a [`CommitSource`] whose calls block, retrying, until they
/// succeed or the watch is cancelled.
#[derive(Clone)]
pub struct Upstream {
    source: Arc<dyn CommitSource>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Upstream {
    pub fn new(source: Arc<dyn CommitSource>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            source,
            policy,
            cancel,
        }
    }

    #[instrument(skip_all, fields(repo = %repo, since = %format_since(since)))]
    pub async fn list_since(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitSummary>, Cancelled> {
        let mut commits = Vec::new();
        let mut next: Option<String> = None;
        for pages in 1..=MAX_PAGES {
            let cursor = next.as_deref();
            let page = self
                .policy
                .run(Service::GitHub, "list commits", &self.cancel, move || {
                    self.source.list_commits(repo, since, cursor)
                })
                .await?;
            commits.extend(page.commits);
            match page.next {
                Some(url) => next = Some(url),
                None => return Ok(commits),
            }
            if pages == MAX_PAGES {
                warn!(pages, listed = commits.len(), "listing still has more pages; stopping here");
            }
        }
        Ok(commits)
    }

    #[instrument(skip_all, fields(repo = %repo, sha = %sha))]
    pub async fn fetch_detail(&self, repo: &RepoId, sha: &str) -> Result<CommitDetail, Cancelled> {
        self.policy
            .run(Service::GitHub, "get commit", &self.cancel, move || {
                self.source.get_commit(repo, sha)
            })
            .await
    }
}
