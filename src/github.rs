//! GitHub API client for fetching open issues
//!
//! Authentication is optional: with a token (config or `GITHUB_TOKEN`) the
//! API allows 5000 requests/hour, without one only 60.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::source::{ExternalIssueRecord, ExternalLabel, IssueSource, SourceError, MAX_PAGE_SIZE};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Minimum remaining requests before we start warning
const RATE_LIMIT_THRESHOLD: u32 = 100;

const USER_AGENT: &str = concat!("devvault/", env!("CARGO_PKG_VERSION"));

/// Rate limit information from GitHub API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
    pub used: u32,
}

impl RateLimitInfo {
    /// Check if we're running low on API calls
    pub fn is_low(&self) -> bool {
        self.remaining < RATE_LIMIT_THRESHOLD
    }

    /// Seconds until rate limit resets
    pub fn seconds_until_reset(&self) -> i64 {
        let now = Utc::now().timestamp();
        (self.reset - now).max(0)
    }

    /// Read the `x-ratelimit-*` headers GitHub attaches to every response
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.parse().ok() };
        let remaining = read("x-ratelimit-remaining")?;
        let reset = read("x-ratelimit-reset")?;
        Some(Self {
            limit: read("x-ratelimit-limit").unwrap_or(0).max(0) as u32,
            remaining: remaining.max(0) as u32,
            reset,
            used: read("x-ratelimit-used").unwrap_or(0).max(0) as u32,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubIssue {
    id: u64,
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    user: Option<GitHubUser>,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    created_at: DateTime<Utc>,
    html_url: String,
    /// Present only on pull requests
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubLabel {
    name: String,
    color: Option<String>,
}

impl From<GitHubIssue> for ExternalIssueRecord {
    fn from(issue: GitHubIssue) -> Self {
        ExternalIssueRecord {
            external_id: issue.id.to_string(),
            number: issue.number,
            title: issue.title,
            body: issue.body,
            state: issue.state,
            html_url: issue.html_url,
            created_at: issue.created_at,
            labels: issue
                .labels
                .into_iter()
                .map(|l| ExternalLabel {
                    name: l.name,
                    color: l.color,
                })
                .collect(),
            reporter: issue.user.map(|u| u.login),
            is_pull_request: issue.pull_request.is_some(),
        }
    }
}

/// Decode one page of the `/repos/{owner}/{repo}/issues` listing
pub fn parse_issue_page(body: &str) -> Result<Vec<ExternalIssueRecord>, SourceError> {
    let issues: Vec<GitHubIssue> =
        serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(issues.into_iter().map(ExternalIssueRecord::from).collect())
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    page_size: u32,
}

impl GitHubClient {
    pub fn new(
        api_base: impl Into<String>,
        token: Option<String>,
        page_size: u32,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        if token.is_some() {
            info!("GitHub client initialized with authentication token");
        } else {
            warn!(
                "GitHub client initialized WITHOUT token - rate limits will be very low (60/hour)"
            );
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Check if authenticated
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        req
    }

    /// Check GitHub API rate limit status
    pub async fn check_rate_limit(&self) -> Result<RateLimitInfo, SourceError> {
        let url = format!("{}/rate_limit", self.api_base);
        let response = self.build_request(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        #[derive(Deserialize)]
        struct RateLimitResponse {
            rate: RateLimitInfo,
        }

        let body = response.text().await?;
        let data: RateLimitResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(data.rate)
    }
}

#[async_trait]
impl IssueSource for GitHubClient {
    async fn fetch_open_issues(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<ExternalIssueRecord>, SourceError> {
        let url = format!(
            "{}/repos/{}/{}/issues?state=open&per_page={}&page={}",
            self.api_base,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            self.page_size,
            page
        );
        debug!("Fetching open issues page {}: {}", page, url);

        let response = self.build_request(&url).send().await?;
        let status = response.status();
        let rate = RateLimitInfo::from_headers(response.headers());

        if let Some(rate) = &rate {
            let exhausted = rate.remaining == 0 && (status.as_u16() == 403 || status.as_u16() == 429);
            if exhausted {
                return Err(SourceError::RateLimited {
                    reset_in_secs: rate.seconds_until_reset(),
                });
            }
            if rate.is_low() {
                warn!(
                    "GitHub rate limit low: {}/{} remaining, resets in {}s",
                    rate.remaining,
                    rate.limit,
                    rate.seconds_until_reset()
                );
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("GitHub API error {} for {}/{}: {}", status, owner, repo, body);
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let records = parse_issue_page(&body)?;
        debug!("{}/{} page {}: {} records", owner, repo, page, records.len());
        Ok(records)
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const PAGE: &str = r#"[
        {
            "id": 1296269,
            "number": 1347,
            "title": "Found a bug",
            "body": "I'm having a problem with this.",
            "state": "open",
            "user": {"login": "octocat", "id": 1},
            "labels": [
                {"id": 208045946, "name": "bug", "color": "f29513"},
                {"id": 208045947, "name": "good first issue", "color": "7057ff"}
            ],
            "created_at": "2011-04-22T13:33:48Z",
            "updated_at": "2011-04-22T13:33:48Z",
            "html_url": "https://github.com/octocat/Hello-World/issues/1347"
        },
        {
            "id": 1296270,
            "number": 1348,
            "title": "Fix the bug",
            "body": null,
            "state": "open",
            "user": {"login": "hubot", "id": 2},
            "labels": [],
            "created_at": "2011-04-23T10:00:00Z",
            "html_url": "https://github.com/octocat/Hello-World/pull/1348",
            "pull_request": {"url": "https://api.github.com/repos/octocat/Hello-World/pulls/1348"}
        }
    ]"#;

    #[test]
    fn test_parse_issue_page() {
        let records = parse_issue_page(PAGE).unwrap();
        assert_eq!(records.len(), 2);

        let issue = &records[0];
        assert_eq!(issue.external_id, "1296269");
        assert_eq!(issue.number, 1347);
        assert_eq!(issue.reporter.as_deref(), Some("octocat"));
        assert_eq!(
            issue.label_names(),
            vec!["bug".to_string(), "good first issue".to_string()]
        );
        assert_eq!(issue.labels[0].color.as_deref(), Some("f29513"));
        assert!(!issue.is_pull_request);

        let pr = &records[1];
        assert!(pr.is_pull_request);
        assert_eq!(pr.body, None);
    }

    #[test]
    fn test_parse_rejects_malformed_page() {
        let err = parse_issue_page(r#"{"message": "Not Found"}"#).unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_rate_limit_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5000"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("42"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-used", HeaderValue::from_static("4958"));

        let rate = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(rate.limit, 5000);
        assert_eq!(rate.remaining, 42);
        assert!(rate.is_low());
        assert_eq!(rate.seconds_until_reset(), 0);

        assert!(RateLimitInfo::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let client =
            GitHubClient::new(GITHUB_API_BASE, None, 500, Duration::from_secs(5)).unwrap();
        assert_eq!(client.page_size(), MAX_PAGE_SIZE);
        assert!(!client.is_authenticated());
    }
}
