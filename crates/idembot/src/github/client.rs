//! GitHub REST client.
//!
//! A thin typed layer over [`HttpTransport`]: it builds URLs, attaches the
//! auth and preview headers, records the quota counters of every response and
//! maps non-2xx answers to [`GitHubError::Api`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::error::{GitHubError, extract_message};
use super::types::{
    CardContentType, CombinedStatus, IssueState, ListIssuesParams, ListPullsParams, MergeOptions,
    MergeResult, ProjectCard, ProjectColumn, RateLimitInfo, RawComment, RawCommit, RawIssue,
    RawLabel, RawPullFile, RawPullRequest, RawReview, RawUser,
};
use crate::entity::RepoRef;
use crate::http::{
    HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    header_get,
};

/// Public GitHub API root.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Page size for every list request.
pub const PAGE_SIZE: u32 = 100;

const USER_AGENT: &str = "idembot";
const ACCEPT_JSON: &str = "application/vnd.github+json";
/// Projects (classic) were only served under this preview media type.
const ACCEPT_PROJECTS: &str = "application/vnd.github.inertia-preview+json";

#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    token: String,
    rate_limit: Arc<Mutex<Option<RateLimitInfo>>>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a client for api.github.com with a 30 second request timeout.
    pub fn new(token: &str) -> Result<Self, GitHubError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| GitHubError::Http(e.to_string()))?;
        Self::new_with_transport(GITHUB_API_URL, token, Arc::new(transport))
    }

    pub fn new_with_transport(
        base_url: &str,
        token: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, GitHubError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        Ok(Self {
            transport,
            base_url,
            token: token.to_string(),
            rate_limit: Arc::new(Mutex::new(None)),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Quota counters from the most recent response that carried them.
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        *self
            .rate_limit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_rate_limit_headers(headers: &HttpHeaders) -> Option<RateLimitInfo> {
        let limit = header_get(headers, "x-ratelimit-limit")?.parse().ok()?;
        let remaining = header_get(headers, "x-ratelimit-remaining")?
            .parse()
            .ok()?;
        let reset_at = header_get(headers, "x-ratelimit-reset")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0));
        Some(RateLimitInfo {
            limit,
            remaining,
            reset_at,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_query(mut url: Url, pairs: &[(&str, String)]) -> Url {
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn execute(
        &self,
        method: HttpMethod,
        url: Url,
        accept: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, GitHubError> {
        let mut headers: HttpHeaders = vec![
            ("Accept".to_string(), accept.to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("Authorization".to_string(), format!("token {}", self.token)),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        let path = url.path().to_string();
        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body: body.unwrap_or_default(),
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| GitHubError::Http(e.to_string()))?;

        if let Some(info) = Self::parse_rate_limit_headers(&response.headers) {
            tracing::debug!(
                method = method.as_str(),
                path = %path,
                status = response.status,
                "[{} / {}]",
                info.remaining,
                info.limit
            );
            *self
                .rate_limit
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(info);
        } else {
            tracing::debug!(method = method.as_str(), path = %path, status = response.status, "request");
        }

        if !response.is_success() {
            return Err(GitHubError::Api {
                status: response.status,
                method: method.as_str(),
                path,
                message: extract_message(&response.body),
            });
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, accept: &str) -> Result<T, GitHubError> {
        let response = self.execute(HttpMethod::Get, url, accept, None).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        url: Url,
        accept: &str,
        body: &B,
    ) -> Result<HttpResponse, GitHubError> {
        let body = serde_json::to_vec(body)?;
        self.execute(method, url, accept, Some(body)).await
    }

    /// Fetch every page of a list endpoint, stopping on the first short page.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        accept: &str,
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let url = Self::with_query(
                self.endpoint(segments)?,
                &[
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ],
            );
            let batch: Vec<T> = self.get(url, accept).await?;
            let len = batch.len();
            items.extend(batch);
            if len < PAGE_SIZE as usize {
                return Ok(items);
            }
            page += 1;
        }
    }

    // ---------- users ----------

    /// The account the token belongs to.
    pub async fn get_authenticated_user(&self) -> Result<RawUser, GitHubError> {
        self.get(self.endpoint(&["user"])?, ACCEPT_JSON).await
    }

    pub async fn get_user(&self, login: &str) -> Result<RawUser, GitHubError> {
        self.get(self.endpoint(&["users", login])?, ACCEPT_JSON)
            .await
    }

    // ---------- issues and pull requests ----------

    pub async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<RawIssue, GitHubError> {
        let url = self.endpoint(&["repos", &repo.owner, &repo.name, "issues", &number.to_string()])?;
        self.get(url, ACCEPT_JSON).await
    }

    pub async fn get_pull(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<RawPullRequest, GitHubError> {
        let url = self.endpoint(&["repos", &repo.owner, &repo.name, "pulls", &number.to_string()])?;
        self.get(url, ACCEPT_JSON).await
    }

    /// One page of `/repos/{o}/{r}/issues`, which includes pull requests.
    pub async fn list_issues(
        &self,
        repo: &RepoRef,
        params: &ListIssuesParams,
    ) -> Result<Vec<RawIssue>, GitHubError> {
        let mut query = vec![
            ("sort", params.sort.as_str().to_string()),
            ("direction", params.direction.as_str().to_string()),
            ("filter", "all".to_string()),
            ("state", params.state.as_str().to_string()),
        ];
        if !params.labels.is_empty() {
            query.push(("labels", params.labels.join(",")));
        }
        query.push(("per_page", PAGE_SIZE.to_string()));
        query.push(("page", params.page.to_string()));

        let url = Self::with_query(
            self.endpoint(&["repos", &repo.owner, &repo.name, "issues"])?,
            &query,
        );
        self.get(url, ACCEPT_JSON).await
    }

    /// One page of `/repos/{o}/{r}/pulls`.
    pub async fn list_pulls(
        &self,
        repo: &RepoRef,
        params: &ListPullsParams,
    ) -> Result<Vec<RawPullRequest>, GitHubError> {
        let url = Self::with_query(
            self.endpoint(&["repos", &repo.owner, &repo.name, "pulls"])?,
            &[
                ("sort", params.sort.as_str().to_string()),
                ("state", params.state.as_str().to_string()),
                ("direction", params.direction.as_str().to_string()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", params.page.to_string()),
            ],
        );
        self.get(url, ACCEPT_JSON).await
    }

    /// Set the issue state, returning the updated issue.
    pub async fn set_state(
        &self,
        repo: &RepoRef,
        number: u64,
        state: IssueState,
    ) -> Result<RawIssue, GitHubError> {
        let url = self.endpoint(&["repos", &repo.owner, &repo.name, "issues", &number.to_string()])?;
        let body = serde_json::json!({ "state": state.as_str() });
        let response = self
            .send_json(HttpMethod::Patch, url, ACCEPT_JSON, &body)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn lock(&self, repo: &RepoRef, number: u64) -> Result<(), GitHubError> {
        let url = self.lock_url(repo, number)?;
        self.execute(HttpMethod::Put, url, ACCEPT_JSON, None).await?;
        Ok(())
    }

    pub async fn unlock(&self, repo: &RepoRef, number: u64) -> Result<(), GitHubError> {
        let url = self.lock_url(repo, number)?;
        self.execute(HttpMethod::Delete, url, ACCEPT_JSON, None)
            .await?;
        Ok(())
    }

    fn lock_url(&self, repo: &RepoRef, number: u64) -> Result<Url, GitHubError> {
        self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &number.to_string(),
            "lock",
        ])
    }

    // ---------- labels ----------

    /// Add labels, returning the issue's full label set afterwards.
    pub async fn add_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<Vec<RawLabel>, GitHubError> {
        let url = self.labels_url(repo, number)?;
        let body = serde_json::json!({ "labels": labels });
        let response = self
            .send_json(HttpMethod::Post, url, ACCEPT_JSON, &body)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Remove one label, returning the labels that remain.
    pub async fn remove_label(
        &self,
        repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<Vec<RawLabel>, GitHubError> {
        let url = self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &number.to_string(),
            "labels",
            label,
        ])?;
        let response = self
            .execute(HttpMethod::Delete, url, ACCEPT_JSON, None)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Replace the label set wholesale.
    pub async fn set_labels(
        &self,
        repo: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<Vec<RawLabel>, GitHubError> {
        let url = self.labels_url(repo, number)?;
        let body = serde_json::json!({ "labels": labels });
        let response = self
            .send_json(HttpMethod::Put, url, ACCEPT_JSON, &body)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn labels_url(&self, repo: &RepoRef, number: u64) -> Result<Url, GitHubError> {
        self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &number.to_string(),
            "labels",
        ])
    }

    // ---------- comments ----------

    pub async fn list_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawComment>, GitHubError> {
        self.get_all_pages(
            &[
                "repos",
                &repo.owner,
                &repo.name,
                "issues",
                &number.to_string(),
                "comments",
            ],
            ACCEPT_JSON,
        )
        .await
    }

    pub async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<RawComment, GitHubError> {
        let url = self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &number.to_string(),
            "comments",
        ])?;
        let payload = serde_json::json!({ "body": body });
        let response = self
            .send_json(HttpMethod::Post, url, ACCEPT_JSON, &payload)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn edit_comment(
        &self,
        repo: &RepoRef,
        comment_id: u64,
        body: &str,
    ) -> Result<RawComment, GitHubError> {
        let url = self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            "comments",
            &comment_id.to_string(),
        ])?;
        let payload = serde_json::json!({ "body": body });
        let response = self
            .send_json(HttpMethod::Patch, url, ACCEPT_JSON, &payload)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    // ---------- project boards ----------

    pub async fn list_project_columns(
        &self,
        project_id: u64,
    ) -> Result<Vec<ProjectColumn>, GitHubError> {
        self.get_all_pages(&["projects", &project_id.to_string(), "columns"], ACCEPT_PROJECTS)
            .await
    }

    pub async fn list_column_cards(&self, column_id: u64) -> Result<Vec<ProjectCard>, GitHubError> {
        self.get_all_pages(
            &["projects", "columns", &column_id.to_string(), "cards"],
            ACCEPT_PROJECTS,
        )
        .await
    }

    pub async fn create_card(
        &self,
        column_id: u64,
        content_id: u64,
        content_type: CardContentType,
    ) -> Result<ProjectCard, GitHubError> {
        let url = self.endpoint(&["projects", "columns", &column_id.to_string(), "cards"])?;
        let body = serde_json::json!({
            "content_id": content_id,
            "content_type": content_type,
        });
        let response = self
            .send_json(HttpMethod::Post, url, ACCEPT_PROJECTS, &body)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Move a card to the bottom of another column.
    pub async fn move_card(&self, card_id: u64, column_id: u64) -> Result<(), GitHubError> {
        let url = self.endpoint(&[
            "projects",
            "columns",
            "cards",
            &card_id.to_string(),
            "moves",
        ])?;
        let body = serde_json::json!({ "position": "bottom", "column_id": column_id });
        self.send_json(HttpMethod::Post, url, ACCEPT_PROJECTS, &body)
            .await?;
        Ok(())
    }

    pub async fn delete_card(&self, card_id: u64) -> Result<(), GitHubError> {
        let url = self.endpoint(&["projects", "columns", "cards", &card_id.to_string()])?;
        self.execute(HttpMethod::Delete, url, ACCEPT_PROJECTS, None)
            .await?;
        Ok(())
    }

    // ---------- pull request extras ----------

    pub async fn merge_pull(
        &self,
        repo: &RepoRef,
        number: u64,
        options: &MergeOptions,
    ) -> Result<MergeResult, GitHubError> {
        let url = self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "pulls",
            &number.to_string(),
            "merge",
        ])?;
        let response = self
            .send_json(HttpMethod::Put, url, ACCEPT_JSON, options)
            .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Reviews on a pull request. A 404 means no reviews exist yet.
    pub async fn list_reviews(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawReview>, GitHubError> {
        let result = self
            .get_all_pages(
                &[
                    "repos",
                    &repo.owner,
                    &repo.name,
                    "pulls",
                    &number.to_string(),
                    "reviews",
                ],
                ACCEPT_JSON,
            )
            .await;
        match result {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    pub async fn list_pull_commits(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawCommit>, GitHubError> {
        self.get_all_pages(
            &[
                "repos",
                &repo.owner,
                &repo.name,
                "pulls",
                &number.to_string(),
                "commits",
            ],
            ACCEPT_JSON,
        )
        .await
    }

    pub async fn list_pull_files(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<RawPullFile>, GitHubError> {
        self.get_all_pages(
            &[
                "repos",
                &repo.owner,
                &repo.name,
                "pulls",
                &number.to_string(),
                "files",
            ],
            ACCEPT_JSON,
        )
        .await
    }

    /// Combined commit status for a ref (usually the head SHA).
    pub async fn get_combined_status(
        &self,
        repo: &RepoRef,
        git_ref: &str,
    ) -> Result<CombinedStatus, GitHubError> {
        let url = self.endpoint(&[
            "repos",
            &repo.owner,
            &repo.name,
            "commits",
            git_ref,
            "status",
        ])?;
        self.get(url, ACCEPT_JSON).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{Direction, IssueSort, StateFilter};
    use crate::http::MockTransport;

    const BASE: &str = "https://api.test";

    fn client(transport: &MockTransport) -> GitHubClient {
        GitHubClient::new_with_transport(BASE, "t0ken", Arc::new(transport.clone()))
            .expect("client")
    }

    fn repo() -> RepoRef {
        RepoRef::new("octo", "bot")
    }

    #[tokio::test]
    async fn records_rate_limit_and_sends_auth_headers() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            "https://api.test/user",
            HttpResponse {
                status: 200,
                headers: vec![
                    ("X-RateLimit-Limit".to_string(), "5000".to_string()),
                    ("X-RateLimit-Remaining".to_string(), "4999".to_string()),
                    ("X-RateLimit-Reset".to_string(), "1700000000".to_string()),
                ],
                body: br#"{"login":"idembot"}"#.to_vec(),
            },
        );

        let client = client(&transport);
        assert!(client.rate_limit().is_none());
        let me = client.get_authenticated_user().await.expect("user");
        assert_eq!(me.login, "idembot");

        let info = client.rate_limit().expect("rate limit recorded");
        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 4999);
        assert!(info.reset_at.is_some());

        let sent = &transport.requests()[0];
        assert_eq!(header_get(&sent.headers, "authorization"), Some("token t0ken"));
        assert_eq!(header_get(&sent.headers, "user-agent"), Some("idembot"));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_api_error() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/issues/9",
            404,
            serde_json::json!({"message": "Not Found"}),
        );

        let err = client(&transport)
            .get_issue(&repo(), 9)
            .await
            .expect_err("404");
        match err {
            GitHubError::Api {
                status,
                method,
                path,
                message,
            } => {
                assert_eq!(status, 404);
                assert_eq!(method, "GET");
                assert_eq!(path, "/repos/octo/bot/issues/9");
                assert_eq!(message, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_issues_encodes_sort_and_paging() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/issues?sort=updated&direction=desc&filter=all&state=all&per_page=100&page=1",
            200,
            serde_json::json!([]),
        );
        let params = ListIssuesParams {
            sort: IssueSort::Updated,
            direction: Direction::Desc,
            state: StateFilter::All,
            labels: Vec::new(),
            page: 1,
        };
        let page = client(&transport)
            .list_issues(&repo(), &params)
            .await
            .expect("page");
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn comment_listing_follows_full_pages() {
        let transport = MockTransport::new();
        let full: Vec<_> = (1..=100)
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "body": "x",
                    "user": {"login": "a"},
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z"
                })
            })
            .collect();
        transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/issues/3/comments?per_page=100&page=1",
            200,
            serde_json::Value::Array(full),
        );
        transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/issues/3/comments?per_page=100&page=2",
            200,
            serde_json::json!([{
                "id": 101,
                "body": "last",
                "user": {"login": "b"},
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }]),
        );

        let comments = client(&transport)
            .list_comments(&repo(), 3)
            .await
            .expect("comments");
        assert_eq!(comments.len(), 101);
        assert_eq!(comments[100].body, "last");
    }

    #[tokio::test]
    async fn missing_reviews_are_empty() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            "https://api.test/repos/octo/bot/pulls/4/reviews?per_page=100&page=1",
            404,
            serde_json::json!({"message": "Not Found"}),
        );
        let reviews = client(&transport)
            .list_reviews(&repo(), 4)
            .await
            .expect("reviews");
        assert!(reviews.is_empty());
    }

    #[tokio::test]
    async fn project_requests_use_preview_media_type() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            "https://api.test/projects/columns/cards/55/moves",
            201,
            serde_json::json!({}),
        );
        client(&transport).move_card(55, 12).await.expect("move");

        let sent = &transport.requests()[0];
        assert_eq!(
            header_get(&sent.headers, "accept"),
            Some("application/vnd.github.inertia-preview+json")
        );
        let body: serde_json::Value = serde_json::from_slice(&sent.body).expect("json body");
        assert_eq!(body, serde_json::json!({"position": "bottom", "column_id": 12}));
    }

    #[tokio::test]
    async fn label_names_are_path_encoded() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Delete,
            "https://api.test/repos/octo/bot/issues/2/labels/needs%20triage",
            200,
            serde_json::json!([]),
        );
        let remaining = client(&transport)
            .remove_label(&repo(), 2, "needs triage")
            .await
            .expect("remove");
        assert!(remaining.is_empty());
    }
}
