//! Uploads to a GitHub repository through the contents API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::{ArtifactStore, PersistedArtifact};
use crate::{Error, Result};

const GITHUB_API: &str = "https://api.github.com";

/// A content store addressed by path, where updates need the current revision marker.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// The revision marker (`sha`) of the entry at `path`, if one exists.
    async fn current_revision(&self, path: &str) -> Result<Option<String>>;

    /// Creates `path`, or updates it when `revision` is given.
    async fn put_content(
        &self,
        path: &str,
        content_b64: String,
        revision: Option<String>,
        message: &str,
    ) -> Result<()>;
}

/// Aggregate size of the remote store.
#[async_trait]
pub trait StorageUsage: Send + Sync {
    async fn repository_size_kb(&self) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct GitHubRepo {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    repo: GitHubRepo,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    /// Kilobytes.
    size: u64,
}

#[derive(Debug, Serialize)]
struct PutContent<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

impl GitHubClient {
    pub fn new(repo: GitHubRepo) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", repo.token))
            .map_err(|_| Error::Config("GITHUB_TOKEN is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(concat!("daypics/", env!("CARGO_PKG_VERSION"))));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            repo,
            api_base: GITHUB_API.to_string(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            self.repo.owner,
            self.repo.repo,
            path.trim_start_matches('/')
        )
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repo.owner, self.repo.repo)
    }
}

fn status_error(url: &str, status: StatusCode) -> Error {
    Error::HttpStatus {
        url: url.to_string(),
        status,
    }
}

#[async_trait]
impl ContentApi for GitHubClient {
    async fn current_revision(&self, path: &str) -> Result<Option<String>> {
        let url = self.contents_url(path);
        let mut req = self.client.get(&url);
        if let Some(branch) = &self.repo.branch {
            req = req.query(&[("ref", branch)]);
        }
        let res = req.send().await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(res.json::<ContentEntry>().await?.sha)),
            s => Err(status_error(&url, s)),
        }
    }

    async fn put_content(
        &self,
        path: &str,
        content_b64: String,
        revision: Option<String>,
        message: &str,
    ) -> Result<()> {
        let url = self.contents_url(path);
        let body = PutContent {
            message,
            content: content_b64,
            sha: revision,
            branch: self.repo.branch.as_deref(),
        };
        let res = self.client.put(&url).json(&body).send().await?;
        if !res.status().is_success() {
            return Err(status_error(&url, res.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageUsage for GitHubClient {
    async fn repository_size_kb(&self) -> Result<u64> {
        let url = self.repo_url();
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(status_error(&url, res.status()));
        }
        Ok(res.json::<RepoInfo>().await?.size)
    }
}

/// Uploads under `<prefix>/<date>/<name>`, overwriting any existing entry.
#[derive(Debug)]
pub struct RemoteStore<A> {
    api: A,
    folder: String,
}

impl<A: ContentApi> RemoteStore<A> {
    pub fn new(api: A, prefix: &str, date: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let folder = if prefix.is_empty() {
            date.to_string()
        } else {
            format!("{prefix}/{date}")
        };
        Self { api, folder }
    }

    pub fn path_for(&self, name: &str) -> String {
        format!("{}/{name}", self.folder)
    }
}

#[async_trait]
impl<A: ContentApi> ArtifactStore for RemoteStore<A> {
    async fn save(&mut self, name: &str, bytes: &[u8]) -> Result<PersistedArtifact> {
        let path = self.path_for(name);
        let revision = self.api.current_revision(&path).await?;
        debug!(%path, ?revision, "resolved remote entry");

        let message = match revision {
            Some(_) => format!("Update {name}"),
            None => format!("Add {name}"),
        };
        self.api
            .put_content(&path, STANDARD.encode(bytes), revision, &message)
            .await?;
        info!(%path, bytes = bytes.len(), "uploaded");

        Ok(PersistedArtifact {
            location: path,
            bytes: bytes.len(),
        })
    }
}
