//! The typed GitHub surface consumed by the rest of the automation core.
//!
//! Every operation reserves from the rate budget before issuing a call,
//! refreshes the budget from GitHub's own rate-limit snapshot afterward,
//! and persists a `RateLimitSample` so the budget can be rehydrated across
//! restarts. Errors are normalized to [`GatewayError`]'s three-way
//! classification (`RateLimited`, `Transient`, `Permanent`) rather than
//! leaking raw HTTP status codes to callers.

use std::time::Instant;

use chrono::{DateTime, Utc};
use issuectl_core::rate_budget::RateBudget;
use issuectl_core::store::Store;
use issuectl_core::types::{IssueSnapshot, IssueStatus, RateLimitBucket, RateLimitSample};
use uuid::Uuid;

use crate::client::GitHubClient;
use crate::error::{classify_octocrab_error, GatewayError, Result};
use crate::types::{CommitReference, GitHubResponse, IssueComment, IssueTimelineEvent};

pub struct Gateway {
    client: GitHubClient,
    rate_budget: std::sync::Arc<RateBudget>,
    store: std::sync::Arc<Store>,
}

impl Gateway {
    pub fn new(
        client: GitHubClient,
        rate_budget: std::sync::Arc<RateBudget>,
        store: std::sync::Arc<Store>,
    ) -> Self {
        Self { client, rate_budget, store }
    }

    /// Rehydrate every bucket from the most recently persisted sample, so
    /// this process does not start out assuming a fully-reset budget.
    pub async fn rehydrate_rate_budget(&self) -> Result<()> {
        for bucket in [
            RateLimitBucket::Core,
            RateLimitBucket::Search,
            RateLimitBucket::Graphql,
            RateLimitBucket::IntegrationManifest,
        ] {
            if let Ok(Some(sample)) = self.store.latest_rate_limit_sample(bucket).await {
                let reset_at = DateTime::from_timestamp(sample.reset_timestamp, 0).unwrap_or_else(Utc::now);
                self.rate_budget.rehydrate(bucket, sample.limit, sample.remaining, reset_at);
            }
        }
        Ok(())
    }

    async fn reserve(&self, bucket: RateLimitBucket) -> Result<()> {
        let reservation = self.rate_budget.reserve(bucket, 1);
        if !reservation.granted {
            return Err(GatewayError::RateLimited {
                reset_at: Utc::now() + reservation.wait_hint,
            });
        }
        Ok(())
    }

    /// Refresh the rate budget from GitHub's own `/rate_limit` snapshot and
    /// persist a sample for each bucket, keyed to the endpoint that was
    /// just called.
    async fn observe(&self, endpoint: &str, bucket: RateLimitBucket, status: u16, started: Instant) -> Result<()> {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let rl = self
            .client
            .inner()
            .ratelimit()
            .get()
            .await
            .map_err(classify_octocrab_error)?;

        let buckets = [
            (RateLimitBucket::Core, &rl.resources.core),
            (RateLimitBucket::Search, &rl.resources.search),
        ];

        for (b, rate) in buckets {
            let reset_at = DateTime::from_timestamp(rate.reset as i64, 0).unwrap_or_else(Utc::now);
            self.rate_budget.observe(b, rate.limit as i64, rate.remaining as i64, reset_at);

            if b == bucket {
                let sample = RateLimitSample {
                    id: Uuid::new_v4(),
                    api_endpoint: endpoint.to_string(),
                    rate_limit_type: b,
                    limit: rate.limit as i64,
                    remaining: rate.remaining as i64,
                    reset_timestamp: rate.reset as i64,
                    used: rate.used as i64,
                    request_url: endpoint.to_string(),
                    response_status: status as i32,
                    request_duration_ms: duration_ms,
                    recorded_at: Utc::now(),
                };
                let _ = self.store.record_rate_limit_sample(&sample).await;
            }
        }
        Ok(())
    }

    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<IssueSnapshot> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let issue = self
            .client
            .inner()
            .issues(owner, repo)
            .get(number)
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("GET /issues/:number", RateLimitBucket::Core, 200, started).await?;
        Ok(octocrab_issue_to_snapshot(owner, repo, issue))
    }

    /// Page through a repository's issues, updated since `since` when
    /// given. Returns every page fetched (pagination terminates when
    /// octocrab reports no further page).
    pub async fn list_repository_issues(
        &self,
        owner: &str,
        repo: &str,
        since: Option<DateTime<Utc>>,
        per_page: u8,
    ) -> Result<Vec<IssueSnapshot>> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();

        let issue_handler = self.client.inner().issues(owner, repo);
        let mut builder = issue_handler
            .list()
            .state(octocrab::params::State::All)
            .per_page(per_page)
            .sort(octocrab::params::issues::Sort::Updated)
            .direction(octocrab::params::Direction::Descending);

        if let Some(since) = since {
            builder = builder.since(since);
        }

        let mut page = builder.send().await.map_err(classify_octocrab_error)?;
        self.observe("GET /issues", RateLimitBucket::Core, 200, started).await?;

        let mut out: Vec<IssueSnapshot> = page
            .items
            .drain(..)
            .map(|i| octocrab_issue_to_snapshot(owner, repo, i))
            .collect();

        while let Some(mut next) = self
            .client
            .inner()
            .get_page(&page.next)
            .await
            .map_err(classify_octocrab_error)?
        {
            self.reserve(RateLimitBucket::Core).await?;
            let started = Instant::now();
            out.extend(next.items.drain(..).map(|i| octocrab_issue_to_snapshot(owner, repo, i)));
            self.observe("GET /issues", RateLimitBucket::Core, 200, started).await?;
            page = next;
        }

        Ok(out)
    }

    pub async fn close_issue(&self, owner: &str, repo: &str, number: u64) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let issue = self
            .client
            .inner()
            .issues(owner, repo)
            .update(number)
            .state(octocrab::models::IssueState::Closed)
            .send()
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("PATCH /issues/:number", RateLimitBucket::Core, 200, started).await?;
        Ok(GitHubResponse::ok(200, serde_json::json!({ "number": issue.number, "state": "closed" })))
    }

    /// For rollback: reopen an issue this process previously closed.
    pub async fn reopen_issue(&self, owner: &str, repo: &str, number: u64) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let issue = self
            .client
            .inner()
            .issues(owner, repo)
            .update(number)
            .state(octocrab::models::IssueState::Open)
            .send()
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("PATCH /issues/:number", RateLimitBucket::Core, 200, started).await?;
        Ok(GitHubResponse::ok(200, serde_json::json!({ "number": issue.number, "state": "open" })))
    }

    pub async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let applied = self
            .client
            .inner()
            .issues(owner, repo)
            .add_labels(number, labels)
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("POST /issues/:number/labels", RateLimitBucket::Core, 200, started).await?;
        let names: Vec<String> = applied.into_iter().map(|l| l.name).collect();
        Ok(GitHubResponse::ok(200, serde_json::json!({ "labels": names })))
    }

    /// For rollback: remove labels this process previously applied.
    pub async fn remove_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        for label in labels {
            self.client
                .inner()
                .issues(owner, repo)
                .remove_label(number, label)
                .await
                .map_err(classify_octocrab_error)?;
        }
        self.observe("DELETE /issues/:number/labels/:name", RateLimitBucket::Core, 200, started).await?;
        Ok(GitHubResponse::ok(200, serde_json::json!({ "removed": labels })))
    }

    pub async fn add_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let comment = self
            .client
            .inner()
            .issues(owner, repo)
            .create_comment(number, body)
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("POST /issues/:number/comments", RateLimitBucket::Core, 201, started).await?;
        Ok(GitHubResponse::ok(201, serde_json::json!({ "id": comment.id.0 })).with_comment_id(comment.id.0 as i64))
    }

    /// For rollback: delete a comment this process previously created.
    pub async fn delete_comment(&self, owner: &str, repo: &str, comment_id: i64) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        self.client
            .inner()
            .issues(owner, repo)
            .delete_comment(octocrab::models::CommentId(comment_id as u64))
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("DELETE /issues/comments/:id", RateLimitBucket::Core, 204, started).await?;
        Ok(GitHubResponse::ok(204, serde_json::json!({})))
    }

    pub async fn set_assignees(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        assignees: &[String],
    ) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let issue = self
            .client
            .inner()
            .issues(owner, repo)
            .update(number)
            .assignees(assignees)
            .send()
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("PATCH /issues/:number", RateLimitBucket::Core, 200, started).await?;
        let names: Vec<String> = issue.assignees.iter().map(|a| a.login.clone()).collect();
        Ok(GitHubResponse::ok(200, serde_json::json!({ "assignees": names })))
    }

    /// Comments on an issue, newest-first as GitHub returns them, for the
    /// detector's dispute/hold lexicon matching.
    pub async fn list_issue_comments(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<IssueComment>> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let page = self
            .client
            .inner()
            .issues(owner, repo)
            .list_comments(number)
            .send()
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("GET /issues/:number/comments", RateLimitBucket::Core, 200, started).await?;
        Ok(page
            .items
            .into_iter()
            .map(|c| IssueComment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    /// Commits whose message references `#{issue_number}` in this
    /// repository, via GitHub's commit-search endpoint. Deliberately
    /// reserves against the `search` bucket, which has a far tighter
    /// quota than `core`.
    pub async fn search_commits_referencing(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        max_results: usize,
    ) -> Result<Vec<CommitReference>> {
        self.reserve(RateLimitBucket::Search).await?;
        let started = Instant::now();

        #[derive(serde::Serialize)]
        struct SearchCommitsQuery<'a> {
            q: &'a str,
            per_page: usize,
        }

        let query = format!("repo:{owner}/{repo} #{issue_number}");
        let params = SearchCommitsQuery { q: &query, per_page: max_results.clamp(1, 100) };

        let response: serde_json::Value = self
            .client
            .inner()
            .get("/search/commits", Some(&params))
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("GET /search/commits", RateLimitBucket::Search, 200, started).await?;

        let items = response.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let sha = item.get("sha")?.as_str()?.to_string();
                let commit = item.get("commit")?;
                let message = commit.get("message")?.as_str()?.to_string();
                let authored_at = commit
                    .get("author")?
                    .get("date")?
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))?;
                Some(CommitReference { sha, message, authored_at })
            })
            .take(max_results)
            .collect())
    }

    /// Paths touched by a single commit, for the `files_touched` evidence
    /// the scoring model weighs against `expected_files`.
    pub async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<String>> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let route = format!("/repos/{owner}/{repo}/commits/{sha}");
        let commit: serde_json::Value = self
            .client
            .inner()
            .get(route, None::<&()>)
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("GET /repos/:owner/:repo/commits/:sha", RateLimitBucket::Core, 200, started).await?;

        let files = commit.get("files").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        Ok(files
            .into_iter()
            .filter_map(|f| f.get("filename").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }

    /// Timeline events for an issue (`reopened`, `closed`, ...), used to
    /// detect a recent reopen beyond what the current snapshot carries.
    pub async fn list_issue_events(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<IssueTimelineEvent>> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let route = format!("/repos/{owner}/{repo}/issues/{number}/events");
        let events: Vec<serde_json::Value> = self
            .client
            .inner()
            .get(route, None::<&()>)
            .await
            .map_err(classify_octocrab_error)?;
        self.observe("GET /issues/:number/events", RateLimitBucket::Core, 200, started).await?;

        Ok(events
            .into_iter()
            .filter_map(|e| {
                let event = e.get("event")?.as_str()?.to_string();
                let created_at = e
                    .get("created_at")?
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))?;
                let actor = e
                    .get("actor")
                    .and_then(|a| a.get("login"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Some(IssueTimelineEvent { event, actor, created_at })
            })
            .collect())
    }

    pub async fn set_milestone(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        milestone_number: Option<u64>,
    ) -> Result<GitHubResponse> {
        self.reserve(RateLimitBucket::Core).await?;
        let started = Instant::now();
        let mut builder = self.client.inner().issues(owner, repo).update(number);
        builder = match milestone_number {
            Some(m) => builder.milestone(&m),
            None => builder.remove_milestone(),
        };
        let issue = builder.send().await.map_err(classify_octocrab_error)?;
        self.observe("PATCH /issues/:number", RateLimitBucket::Core, 200, started).await?;
        Ok(GitHubResponse::ok(
            200,
            serde_json::json!({ "milestone": issue.milestone.map(|m| m.number) }),
        ))
    }
}

/// Build an `IssueSnapshot` from the `issue` object embedded in a GitHub
/// webhook payload, without any network call. GitHub's webhook issue
/// payload shares its schema with the REST API's issue representation, so
/// this reuses the same octocrab model and mapping the gateway's own
/// `list_repository_issues`/`get_issue` calls produce.
pub fn issue_snapshot_from_webhook_payload(
    owner: &str,
    repo: &str,
    issue_json: &serde_json::Value,
) -> Result<IssueSnapshot> {
    let issue: octocrab::models::issues::Issue = serde_json::from_value(issue_json.clone())
        .map_err(|e| GatewayError::Transient(format!("malformed webhook issue payload: {e}")))?;
    Ok(octocrab_issue_to_snapshot(owner, repo, issue))
}

fn octocrab_issue_to_snapshot(owner: &str, repo: &str, issue: octocrab::models::issues::Issue) -> IssueSnapshot {
    let status = match issue.state {
        octocrab::models::IssueState::Open => IssueStatus::Open,
        octocrab::models::IssueState::Closed => IssueStatus::Closed,
        _ => IssueStatus::Open,
    };

    IssueSnapshot {
        number: issue.number as i64,
        github_id: issue.id.0 as i64,
        repo_owner: owner.to_string(),
        repo_name: repo.to_string(),
        title: issue.title,
        body: issue.body,
        status,
        author: issue.user.login,
        assignees: issue.assignees.iter().map(|a| a.login.clone()).collect(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        milestone: issue.milestone.map(|m| m.title),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        closed_at: issue.closed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_closed_octocrab_state_to_issue_status() {
        assert_eq!(
            match octocrab::models::IssueState::Closed {
                octocrab::models::IssueState::Open => IssueStatus::Open,
                octocrab::models::IssueState::Closed => IssueStatus::Closed,
                _ => IssueStatus::Open,
            },
            IssueStatus::Closed
        );
    }
}
