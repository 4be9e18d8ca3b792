//! Interact with the GitHub REST API.

use std::fmt::Display;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum ApiError {
    Reqwest(reqwest::Error),
    Json(serde_json::Error),
    UnexpectedResponse(String),
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Reqwest(e) => Some(e),
            ApiError::Json(e) => Some(e),
            ApiError::UnexpectedResponse(_) => None,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Reqwest(e) => write!(f, "Network error: {:?}", e),
            ApiError::Json(e) => write!(f, "JSON ser/de error: {:?}", e),
            ApiError::UnexpectedResponse(e) => write!(f, "Unexpected response: {}", e),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        ApiError::Reqwest(value)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::Json(value)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A GitHub API client authenticated with a personal or installation token.
pub struct GitHub {
    auth: String,
    base: String,
    req: reqwest::Client,
}

impl GitHub {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, "https://api.github.com")
    }

    /// Point the client at another API root. Tests use this to talk to a
    /// local mock server.
    pub fn with_base(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            auth: token.into(),
            base: base.into(),
            req: reqwest::Client::new(),
        }
    }

    fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.req.get(self.url(url)))
    }

    fn put(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.req.put(self.url(url)))
    }

    fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.req.post(self.url(url)))
    }

    fn with_headers(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.auth)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "install-app-action")
    }

    fn url<S: AsRef<str>>(&self, path: S) -> String {
        let u = format!("{}/{}", self.base.trim_end_matches('/'), path.as_ref());
        debug!("API URL: {}", u);
        u
    }

    /// Send a request, transparently retrying once when the primary rate
    /// limit is exhausted. A secondary (abuse) limit is only logged; the
    /// response surfaces to the caller unchanged.
    async fn send(&self, req: RequestBuilder) -> ApiResult<Response> {
        let request = req.build()?;
        let retry = request.try_clone();
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.req.execute(request).await?;
        match RateLimit::of(&response) {
            None => Ok(response),
            Some(RateLimit::Primary { retry_after }) => {
                warn!("Request quota exhausted for request {} {}", method, url);
                let Some(request) = retry else {
                    return Ok(response);
                };
                info!("Retrying after {} seconds", retry_after.as_secs());
                tokio::time::sleep(retry_after).await;
                Ok(self.req.execute(request).await?)
            }
            Some(RateLimit::Secondary) => {
                warn!("Abuse detected for request {} {}", method, url);
                Ok(response)
            }
        }
    }

    async fn expect(response: Response, status: StatusCode) -> ApiResult<Response> {
        if response.status() == status {
            return Ok(response);
        }
        let got = response.status();
        Err(ApiError::UnexpectedResponse(format!(
            "{}: {}",
            got,
            response.text().await?
        )))
    }

    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, owner: &str, repo: &str, issue_number: &str) -> ApiResult<Issue> {
        let response = self
            .send(self.get(format!("repos/{owner}/{repo}/issues/{issue_number}")))
            .await?;
        Self::expect(response, StatusCode::OK)
            .await?
            .parse_json()
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn collaborator_permission(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
    ) -> ApiResult<PermissionLevel> {
        let response = self
            .send(self.get(format!(
                "repos/{owner}/{repo}/collaborators/{username}/permission"
            )))
            .await?;
        let payload: CollaboratorPermission = Self::expect(response, StatusCode::OK)
            .await?
            .parse_json()
            .await?;
        Ok(payload.permissions)
    }

    #[tracing::instrument(skip(self))]
    pub async fn repository(&self, owner: &str, repo: &str) -> ApiResult<Repository> {
        let response = self.send(self.get(format!("repos/{owner}/{repo}"))).await?;
        Self::expect(response, StatusCode::OK)
            .await?
            .parse_json()
            .await
    }

    /// Add a repository to an app installation. The path takes the
    /// installation id; the action passes the app id there, as the original
    /// workflow did.
    #[tracing::instrument(skip(self))]
    pub async fn install_app(&self, installation_id: &str, repository_id: u64) -> ApiResult<()> {
        let response = self
            .send(self.put(format!(
                "user/installations/{installation_id}/repositories/{repository_id}"
            )))
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(ApiError::UnexpectedResponse(format!(
                "{}: {}",
                status,
                response.text().await?
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: &str,
        body: &str,
    ) -> ApiResult<Comment> {
        let response = self
            .send(
                self.post(format!("repos/{owner}/{repo}/issues/{issue_number}/comments"))
                    .json(&serde_json::json!({ "body": body })),
            )
            .await?;
        let comment: Comment = Self::expect(response, StatusCode::CREATED)
            .await?
            .parse_json()
            .await?;
        debug!("Created comment {}", comment.id);
        Ok(comment)
    }
}

enum RateLimit {
    Primary { retry_after: Duration },
    Secondary,
}

impl RateLimit {
    fn of(response: &Response) -> Option<Self> {
        if response.status() != StatusCode::FORBIDDEN
            && response.status() != StatusCode::TOO_MANY_REQUESTS
        {
            return None;
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let retry_after = header("retry-after").and_then(|v| v.parse::<u64>().ok());

        if header("x-ratelimit-remaining").as_deref() == Some("0") {
            // No retry-after on primary limits; fall back to the quota reset
            // timestamp.
            let delay = retry_after.unwrap_or_else(|| {
                header("x-ratelimit-reset")
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|reset| {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs();
                        reset.saturating_sub(now)
                    })
                    .unwrap_or(60)
            });
            Some(RateLimit::Primary {
                retry_after: Duration::from_secs(delay),
            })
        } else if retry_after.is_some() {
            Some(RateLimit::Secondary)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub user: Account,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Admin,
    Write,
    Read,
    None,
}

#[derive(Debug, Deserialize)]
struct CollaboratorPermission {
    permissions: PermissionLevel,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    pub id: u64,
}

trait JsonExt {
    async fn parse_json<T: for<'a> Deserialize<'a>>(self) -> Result<T, ApiError>;
}

impl JsonExt for Response {
    async fn parse_json<T: for<'a> Deserialize<'a>>(self) -> Result<T, ApiError> {
        let bytes = self.bytes().await?;

        debug!(
            "Parsing JSON: {}",
            std::str::from_utf8(&bytes).unwrap_or("[INVALID UTF8]")
        );

        Ok(serde_json::from_slice(&bytes)?)
    }
}
