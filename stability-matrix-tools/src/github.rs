use crate::http::{check, sensitive};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Client, RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{env, fmt, fs, path::Path};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// An `owner/name` GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Accepts `owner/name` or a `https://github.com/owner/name` URL, with or without extra path
    /// segments after the repo name.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not contain an owner and a name.
    pub fn parse(value: &str) -> Result<Self> {
        let path = if value.contains("://") {
            let url = Url::parse(value).with_context(|| format!("`{value}` is not a valid URL"))?;
            url.path().to_string()
        } else {
            value.to_string()
        };
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) => Ok(Self {
                owner: owner.to_string(),
                name: name.trim_end_matches(".git").to_string(),
            }),
            _ => Err(anyhow!(
                "could not find a GitHub `owner/name` in `{value}`"
            )),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    commit: Commit,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewPull {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    pub upload_url: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// The fields sent when creating or updating a release.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct NewRelease {
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_commitish: Option<String>,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

#[derive(Debug)]
pub struct GitHub {
    client: Client,
    api_base: Url,
    token: Option<String>,
}

impl GitHub {
    /// If no token is given, the `GITHUB_TOKEN` environment variable is used if it is set.
    ///
    /// # Errors
    ///
    /// Returns an error if `api_base` is not a valid URL.
    pub fn new(client: &Client, api_base: &str, token: Option<String>) -> Result<Self> {
        let mut token = token.filter(|t| !t.is_empty());
        if token.is_none() {
            token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
            if token.is_some() {
                debug!("Using GitHub token from the GITHUB_TOKEN environment variable.");
            }
        }

        Ok(Self {
            client: client.clone(),
            api_base: Url::parse(api_base)
                .with_context(|| format!("`{api_base}` is not a valid GitHub API URL"))?,
            token,
        })
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Returns the login of the user the token belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, for example because the token is invalid.
    pub async fn current_user(&self) -> Result<String> {
        let user: User = self
            .send_json(self.client.get(self.api_url(&["user"])?), "Could not get the GitHub user")
            .await?;
        Ok(user.login)
    }

    /// Returns the SHA of the commit at the head of a branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the branch does not exist.
    pub async fn branch_head(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let url = self.repo_url(repo, &["branches", branch])?;
        let branch: Branch = self
            .send_json(
                self.client.get(url),
                &format!("Could not get branch `{branch}` of {repo}"),
            )
            .await?;
        Ok(branch.commit.sha)
    }

    /// # Errors
    ///
    /// Returns an error if the request fails or the branch already exists.
    pub async fn create_branch(&self, repo: &RepoRef, name: &str, sha: &str) -> Result<()> {
        info!("creating branch {repo}/{name} at {sha}");
        let url = self.repo_url(repo, &["git", "refs"])?;
        let _: serde_json::Value = self
            .send_json(
                self.client
                    .post(url)
                    .json(&json!({ "ref": format!("refs/heads/{name}"), "sha": sha })),
                &format!("Could not create branch `{name}` in {repo}"),
            )
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_pull(&self, repo: &RepoRef, pull: &NewPull) -> Result<PullRequest> {
        info!(
            "creating PR {repo}/{} -> {repo}/{}",
            pull.head, pull.base
        );
        let url = self.repo_url(repo, &["pulls"])?;
        self.send_json(
            self.client.post(url).json(pull),
            &format!("Could not create a pull request in {repo}"),
        )
        .await
    }

    /// Returns the release for a tag, or `None` if there is no such release.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails with any status other than 404.
    pub async fn release_by_tag(&self, repo: &RepoRef, tag: &str) -> Result<Option<Release>> {
        let url = self.repo_url(repo, &["releases", "tags", tag])?;
        debug!("Getting release info from `{url}`");
        let resp = self
            .prepare(self.client.get(url))?
            .send()
            .await
            .context("Could not connect to GitHub")?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("no release for tag {tag} in {repo}");
            return Ok(None);
        }
        let release = check(resp, &format!("Could not get the {tag} release of {repo}"))
            .await?
            .json::<Release>()
            .await?;
        Ok(Some(release))
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_release(&self, repo: &RepoRef, release: &NewRelease) -> Result<Release> {
        info!("creating release {} in {repo}", release.tag_name);
        let url = self.repo_url(repo, &["releases"])?;
        self.send_json(
            self.client.post(url).json(release),
            &format!("Could not create release {} in {repo}", release.tag_name),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn update_release(
        &self,
        repo: &RepoRef,
        id: u64,
        release: &NewRelease,
    ) -> Result<Release> {
        info!("updating release {} in {repo}", release.tag_name);
        let id = id.to_string();
        let url = self.repo_url(repo, &["releases", id.as_str()])?;
        self.send_json(
            self.client.patch(url).json(release),
            &format!("Could not update release {} in {repo}", release.tag_name),
        )
        .await
    }

    /// Uploads a file as an asset of `release`, using the release's `upload_url` template.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the upload fails.
    pub async fn upload_release_asset(
        &self,
        release: &Release,
        path: &Path,
        name: &str,
    ) -> Result<ReleaseAsset> {
        let template = release.upload_url.as_str();
        let base = template.split_once('{').map_or(template, |(base, _)| base);
        let mut url = Url::parse(base)
            .with_context(|| format!("`{base}` is not a valid release upload URL"))?;
        url.query_pairs_mut().append_pair("name", name);

        let bytes =
            fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        info!("uploading {} as release asset {name}", path.display());
        self.send_json(
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
            &format!("Could not upload release asset {name}"),
        )
        .await
    }

    /// Opens a PR to merge `from` into `to`. The PR's head is a new branch created at `from`'s
    /// current commit, so that later pushes to `from` don't change the PR.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the underlying requests fail.
    pub async fn open_merge_pr(&self, repo: &RepoRef, from: &str, to: &str) -> Result<PullRequest> {
        let sha = self.branch_head(repo, from).await?;
        let short = sha.get(..7).unwrap_or(&sha);
        let branch = format!("merge-{from}-to-{to}-{short}");

        info!("creating branch {repo}/{branch} from {repo}/{from} @ {short}");
        self.create_branch(repo, &branch, &sha).await?;
        self.create_pull(
            repo,
            &NewPull {
                title: format!("Merge {from} to {to}"),
                body: String::new(),
                head: branch,
                base: to.to_string(),
            },
        )
        .await
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("`{}` cannot be used as an API base URL", self.api_base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_url(&self, repo: &RepoRef, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(rest);
        self.api_url(&segments)
    }

    fn prepare(&self, req_builder: RequestBuilder) -> Result<RequestBuilder> {
        let req_builder = req_builder
            .header(ACCEPT, HeaderValue::from_static("application/vnd.github+json"))
            .header("X-GitHub-Api-Version", API_VERSION);
        self.maybe_add_token_header(req_builder)
    }

    fn maybe_add_token_header(&self, mut req_builder: RequestBuilder) -> Result<RequestBuilder> {
        if let Some(token) = self.token.as_deref() {
            debug!("Adding GitHub token to GitHub request.");
            req_builder = req_builder.header(AUTHORIZATION, sensitive(&format!("Bearer {token}"))?);
        } else {
            debug!("No token given.");
        }
        Ok(req_builder)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req_builder: RequestBuilder,
        failure: &str,
    ) -> Result<T> {
        let resp = self
            .prepare(req_builder)?
            .send()
            .await
            .context("Could not connect to GitHub")?;
        check(resp, failure)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("{failure}: unexpected response"))
    }
}
