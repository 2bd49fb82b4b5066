//! GitHub REST collaborator: discovers project files with code search, reads them through
//! the contents API, and submits each change set as a branch plus pull request built from
//! the git data API (tree, commit, ref).

use crate::agents::project_scanner::{MANIFEST_EXTENSIONS, is_manifest_path};
use crate::agents::update::{ChangeSet, SubmissionOutcome};
use crate::error::{NugradeError, Result};
use crate::source::{ManifestLoad, RepositorySource};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const SEARCH_PAGE_SIZE: usize = 100;
/// Code search never returns more than 1000 results.
const MAX_SEARCH_PAGES: usize = 10;
const BLOB_MODE: &str = "100644";

#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub token: String,
    pub reviewers: Vec<String>,
    pub request_timeout: Duration,
}

pub struct GithubSource {
    client: Client,
    api_base: Url,
    owner: String,
    repo: String,
    base_branch: String,
    reviewers: Vec<String>,
}

impl GithubSource {
    pub fn new(settings: GithubSettings) -> Result<Self> {
        Self::with_api_base(settings, DEFAULT_API_BASE)
    }

    pub fn with_api_base(settings: GithubSettings, api_base: &str) -> Result<Self> {
        for (label, value) in [("owner", &settings.owner), ("repo", &settings.repo)] {
            if !is_valid_name(value) {
                return Err(NugradeError::Config(format!(
                    "Invalid GitHub {label}: '{value}'"
                )));
            }
        }

        if settings.token.trim().is_empty() {
            return Err(NugradeError::Config("GitHub token is empty".to_string()));
        }

        let api_base = Url::parse(api_base)
            .map_err(|e| NugradeError::Config(format!("Invalid GitHub API URL: {e}")))?;

        Ok(Self {
            client: build_client(&settings.token, settings.request_timeout)?,
            api_base,
            owner: settings.owner,
            repo: settings.repo,
            base_branch: settings.base_branch,
            reviewers: settings.reviewers,
        })
    }

    /// Paths of every project file code search reports for the repository, across all
    /// manifest extensions.
    pub fn find_project_files(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for extension in MANIFEST_EXTENSIONS {
            self.search_extension(extension, &mut paths)?;
        }

        paths.sort();
        paths.dedup();
        debug!(count = paths.len(), "Discovered project files");
        Ok(paths)
    }

    fn search_extension(&self, extension: &str, paths: &mut Vec<String>) -> Result<()> {
        let url = self.api_url(&["search", "code"])?;
        let query = format!("extension:{} repo:{}/{}", extension, self.owner, self.repo);
        let per_page = SEARCH_PAGE_SIZE.to_string();

        for page in 1..=MAX_SEARCH_PAGES {
            let page_number = page.to_string();
            let request = self.client.get(url.clone()).query(&[
                ("q", query.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page_number.as_str()),
            ]);
            let results: SearchResults = read_json(send(request)?)?;
            let received = results.items.len();

            paths.extend(
                results
                    .items
                    .into_iter()
                    .map(|item| item.path)
                    .filter(|path| is_manifest_path(path)),
            );

            if received == 0 || page * SEARCH_PAGE_SIZE >= results.total_count {
                break;
            }
        }

        Ok(())
    }

    pub fn fetch_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.repo_url(&segments)?;

        let request = self
            .client
            .get(url)
            .query(&[("ref", self.base_branch.as_str())]);
        let contents: FileContents = read_json(send(request)?)?;

        if contents.encoding != "base64" {
            return Err(NugradeError::Source(format!(
                "Unsupported content encoding '{}' for {path}",
                contents.encoding
            )));
        }

        let cleaned: String = contents
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| NugradeError::Source(format!("Invalid base64 content for {path}: {e}")))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let mut segments = vec!["git", "ref", "heads"];
        segments.extend(branch.split('/'));
        let response = send(self.client.get(self.repo_url(&segments)?))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(NugradeError::Source(format!(
                "HTTP {status} checking branch '{branch}'"
            ))),
        }
    }

    fn create_pull_request(&self, change_set: &ChangeSet) -> Result<PullRequest> {
        let branch = change_set.short_branch_name();

        let mut segments = vec!["git", "ref", "heads"];
        segments.extend(self.base_branch.split('/'));
        let base: GitRef = read_json(send(self.client.get(self.repo_url(&segments)?))?)?;

        let base_commit: GitCommit = read_json(send(
            self.client
                .get(self.repo_url(&["git", "commits", base.object.sha.as_str()])?),
        )?)?;

        debug!(branch, "Posting tree");
        let tree = NewTree {
            base_tree: &base_commit.tree.sha,
            tree: change_set
                .changes
                .iter()
                .map(|change| TreeEntry {
                    path: &change.file_path,
                    mode: BLOB_MODE,
                    kind: "blob",
                    content: &change.contents,
                })
                .collect(),
        };
        let tree: Sha = self.post(&["git", "trees"], &tree)?;

        debug!(branch, "Creating commit");
        let commit: Sha = self.post(
            &["git", "commits"],
            &NewCommit {
                message: &change_set.message,
                tree: &tree.sha,
                parents: vec![base.object.sha.as_str()],
            },
        )?;

        debug!(branch, "Creating branch");
        let _: GitRef = self.post(
            &["git", "refs"],
            &NewRef {
                reference: &change_set.branch_name,
                sha: &commit.sha,
            },
        )?;

        let body = change_set.body();
        let head = format!("{}:{}", self.owner, branch);
        self.post(
            &["pulls"],
            &NewPullRequest {
                title: change_set.title(),
                body: &body,
                head: &head,
                base: &self.base_branch,
            },
        )
    }

    fn request_reviewers(&self, pull: &PullRequest) {
        if self.reviewers.is_empty() {
            return;
        }

        let number = pull.number.to_string();
        let result: Result<serde_json::Value> = self.post(
            &["pulls", number.as_str(), "requested_reviewers"],
            &ReviewRequest {
                reviewers: &self.reviewers,
            },
        );
        if let Err(e) = result {
            warn!(pull = pull.number, error = %e, "Failed to request reviewers");
        }
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T> {
        let request = self.client.post(self.repo_url(segments)?).json(body);
        read_json(send(request)?)
    }

    fn repo_url(&self, segments: &[&str]) -> Result<Url> {
        let mut all = vec!["repos", self.owner.as_str(), self.repo.as_str()];
        all.extend_from_slice(segments);
        self.api_url(&all)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| NugradeError::Config("GitHub API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl RepositorySource for GithubSource {
    fn describe(&self) -> String {
        format!("{}/{}@{}", self.owner, self.repo, self.base_branch)
    }

    fn load_manifests(&self) -> Result<ManifestLoad> {
        let mut load = ManifestLoad::default();
        for path in self.find_project_files()? {
            debug!(path = %path, "Fetching project file");
            match self.fetch_file(&path) {
                Ok(raw) => load.add(&path, raw, true),
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping unreadable project file");
                    load.failures.push((path, e.to_string()));
                }
            }
        }
        Ok(load)
    }

    fn submit(&self, change_set: &ChangeSet) -> Result<SubmissionOutcome> {
        if change_set.is_empty() {
            return Ok(SubmissionOutcome::NoChanges);
        }

        if self.branch_exists(change_set.short_branch_name())? {
            info!(branch = change_set.short_branch_name(), "Branch already exists; skipping");
            return Ok(SubmissionOutcome::BranchExists);
        }

        let pull = self.create_pull_request(change_set)?;
        self.request_reviewers(&pull);
        Ok(SubmissionOutcome::Submitted(pull.html_url))
    }
}

fn build_client(token: &str, request_timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|_| NugradeError::Config("GitHub token contains invalid characters".into()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

    Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!("nugrade/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()
        .map_err(|e| NugradeError::Source(e.to_string()))
}

fn send(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .map_err(|e| NugradeError::Source(format!("GitHub request failed: {e}")))
}

fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let url = response.url().path().to_string();
    let text = response
        .text()
        .map_err(|e| NugradeError::Source(format!("{url}: {e}")))?;

    if !status.is_success() {
        return Err(NugradeError::Source(format!("HTTP {status} from {url}: {text}")));
    }

    Ok(serde_json::from_str(&text)?)
}

fn is_valid_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileContents {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: Sha,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: Sha,
}

#[derive(Debug, Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct NewTree<'a> {
    base_tree: &'a str,
    tree: Vec<TreeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    reviewers: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::update::Change;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn settings(reviewers: &[&str]) -> GithubSettings {
        GithubSettings {
            owner: "acme".into(),
            repo: "shop".into(),
            base_branch: "main".into(),
            token: "test-token".into(),
            reviewers: reviewers.iter().map(|r| r.to_string()).collect(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn change_set() -> ChangeSet {
        ChangeSet {
            group: "Serilog".into(),
            file_group: None,
            branch_name: "refs/heads/auto-nuget-update/serilog".into(),
            message: "Auto-update for packages related to 'Serilog'\n\nUpdates package 'Serilog' to version '3.1.1'".into(),
            candidates: Vec::new(),
            changes: vec![Change {
                file_path: "src/App/App.csproj".into(),
                contents: "<Project />".into(),
            }],
        }
    }

    #[test]
    fn rejects_invalid_repository_names() {
        let mut bad = settings(&[]);
        bad.owner = "acme/evil".into();
        assert!(GithubSource::new(bad).is_err());

        let mut no_token = settings(&[]);
        no_token.token = " ".into();
        assert!(GithubSource::new(no_token).is_err());
    }

    fn search_mock(
        server: &mut mockito::ServerGuard,
        extension: &str,
        paths: &[&str],
    ) -> mockito::Mock {
        let items: Vec<_> = paths.iter().map(|path| json!({ "path": path })).collect();
        server
            .mock("GET", "/search/code")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), format!("extension:{extension} repo:acme/shop")),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .with_header("content-type", "application/json")
            .with_body(json!({ "total_count": items.len(), "items": items }).to_string())
            .create()
    }

    #[test]
    fn discovers_project_files_from_code_search() {
        let mut server = Server::new();
        let csharp = search_mock(
            &mut server,
            "csproj",
            &["src/Web/Web.csproj", "src/App/App.csproj", "docs/csproj-notes.md"],
        );
        let fsharp = search_mock(&mut server, "fsproj", &["src/Core/Core.fsproj"]);
        let basic = search_mock(&mut server, "vbproj", &[]);

        let source = GithubSource::with_api_base(settings(&[]), &server.url()).unwrap();
        let files = source.find_project_files().unwrap();

        csharp.assert();
        fsharp.assert();
        basic.assert();
        assert_eq!(
            files,
            vec!["src/App/App.csproj", "src/Core/Core.fsproj", "src/Web/Web.csproj"]
        );
    }

    #[test]
    fn decodes_file_contents_with_bom() {
        let mut server = Server::new();
        let raw = b"\xEF\xBB\xBF<Project />".to_vec();
        let mut encoded = STANDARD.encode(&raw);
        encoded.insert(8, '\n');

        let _contents = server
            .mock("GET", "/repos/acme/shop/contents/src/App/App.csproj")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_body(json!({"content": encoded, "encoding": "base64"}).to_string())
            .create();

        let source = GithubSource::with_api_base(settings(&[]), &server.url()).unwrap();
        assert_eq!(source.fetch_file("src/App/App.csproj").unwrap(), raw);
    }

    #[test]
    fn existing_branch_is_skipped() {
        let mut server = Server::new();
        let _existing = server
            .mock("GET", "/repos/acme/shop/git/ref/heads/auto-nuget-update/serilog")
            .with_body(json!({"object": {"sha": "abc"}}).to_string())
            .create();

        let source = GithubSource::with_api_base(settings(&[]), &server.url()).unwrap();
        assert_eq!(
            source.submit(&change_set()).unwrap(),
            SubmissionOutcome::BranchExists
        );
    }

    #[test]
    fn submits_change_set_as_pull_request() {
        let mut server = Server::new();
        let _missing = server
            .mock("GET", "/repos/acme/shop/git/ref/heads/auto-nuget-update/serilog")
            .with_status(404)
            .create();
        let _base = server
            .mock("GET", "/repos/acme/shop/git/ref/heads/main")
            .with_body(json!({"object": {"sha": "base-sha"}}).to_string())
            .create();
        let _commit = server
            .mock("GET", "/repos/acme/shop/git/commits/base-sha")
            .with_body(json!({"sha": "base-sha", "tree": {"sha": "base-tree"}}).to_string())
            .create();
        let tree = server
            .mock("POST", "/repos/acme/shop/git/trees")
            .match_body(Matcher::PartialJson(json!({
                "base_tree": "base-tree",
                "tree": [{"path": "src/App/App.csproj", "mode": "100644", "type": "blob", "content": "<Project />"}]
            })))
            .with_status(201)
            .with_body(json!({"sha": "new-tree"}).to_string())
            .create();
        let commit = server
            .mock("POST", "/repos/acme/shop/git/commits")
            .match_body(Matcher::PartialJson(json!({"tree": "new-tree", "parents": ["base-sha"]})))
            .with_status(201)
            .with_body(json!({"sha": "new-commit"}).to_string())
            .create();
        let reference = server
            .mock("POST", "/repos/acme/shop/git/refs")
            .match_body(Matcher::PartialJson(json!({
                "ref": "refs/heads/auto-nuget-update/serilog",
                "sha": "new-commit"
            })))
            .with_status(201)
            .with_body(json!({"object": {"sha": "new-commit"}}).to_string())
            .create();
        let pull = server
            .mock("POST", "/repos/acme/shop/pulls")
            .match_body(Matcher::PartialJson(json!({
                "title": "Auto-update for packages related to 'Serilog'",
                "body": "Updates package 'Serilog' to version '3.1.1'",
                "head": "acme:auto-nuget-update/serilog",
                "base": "main"
            })))
            .with_status(201)
            .with_body(json!({"number": 7, "html_url": "https://github.com/acme/shop/pull/7"}).to_string())
            .create();
        let reviewers = server
            .mock("POST", "/repos/acme/shop/pulls/7/requested_reviewers")
            .match_body(Matcher::PartialJson(json!({"reviewers": ["octocat"]})))
            .with_status(201)
            .with_body("{}")
            .create();

        let source = GithubSource::with_api_base(settings(&["octocat"]), &server.url()).unwrap();
        let outcome = source.submit(&change_set()).unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::Submitted("https://github.com/acme/shop/pull/7".into())
        );
        tree.assert();
        commit.assert();
        reference.assert();
        pull.assert();
        reviewers.assert();
    }

    #[test]
    fn failed_pull_request_is_an_error() {
        let mut server = Server::new();
        let _missing = server
            .mock("GET", "/repos/acme/shop/git/ref/heads/auto-nuget-update/serilog")
            .with_status(404)
            .create();
        let _base = server
            .mock("GET", "/repos/acme/shop/git/ref/heads/main")
            .with_status(500)
            .create();

        let source = GithubSource::with_api_base(settings(&[]), &server.url()).unwrap();
        assert!(matches!(
            source.submit(&change_set()),
            Err(NugradeError::Source(_))
        ));
    }
}
