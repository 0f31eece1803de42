//! Repository-metadata fetcher: a thin GitHub REST client that hands back
//! opaque JSON for the parameter snapshot.

use anyhow::{bail, Context, Result};
use serde_json::Value;

const API_ROOT: &str = "https://api.github.com";

pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("buildflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            token: token.to_string(),
        })
    }

    pub async fn get_pr(&self, owner: &str, repo: &str, number: i64) -> Result<Value> {
        self.get(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await
    }

    pub async fn list_pr_files(&self, owner: &str, repo: &str, number: i64) -> Result<Value> {
        self.get(&format!("/repos/{owner}/{repo}/pulls/{number}/files"))
            .await
    }

    /// Locate the pull request associated with a commit, if any.
    pub async fn find_pr_for_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<Value>> {
        let prs = self
            .get(&format!("/repos/{owner}/{repo}/commits/{sha}/pulls"))
            .await?;
        match prs {
            Value::Array(mut items) if !items.is_empty() => Ok(Some(items.remove(0))),
            _ => Ok(None),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let mut request = self
            .client
            .get(format!("{API_ROOT}{path}"))
            .header("Accept", "application/vnd.github+json");
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await.with_context(|| format!("GET {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {path} returned {status}");
        }
        response
            .json()
            .await
            .with_context(|| format!("decoding response of GET {path}"))
    }
}
