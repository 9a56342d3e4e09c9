//! Azure DevOps work-item-tracking client
//!
//! Blocking REST client implementing [`WorkTrackingApi`]. Authenticates with a
//! personal access token (basic auth, empty user name).

use crate::config::{Credentials, RemoteConfig};
use crate::remote::{
    ClassificationNodePayload, CommentPayload, RemoteError, Result, RevisionPayload,
    StructureGroup, WorkItemPayload, WorkTrackingApi, MAX_BULK_IDS,
};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Page size for the revisions endpoint (service maximum)
const REVISION_PAGE: usize = 200;

/// Body excerpts kept in error messages
const ERROR_BODY_LIMIT: usize = 500;

/// Query enumerating every work item of a team project, newest first
pub fn default_query(project: &str) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{}' ORDER BY [System.CreatedDate] DESC",
        project.replace('\'', "''")
    )
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WiqlReference>,
}

#[derive(Deserialize)]
struct WiqlReference {
    id: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPage {
    #[serde(default)]
    comments: Vec<CommentPayload>,
    #[serde(default)]
    continuation_token: Option<String>,
}

/// Work-item-tracking client for one organization/project
pub struct AzureDevOpsClient {
    http: Client,
    base: Url,
    organization: String,
    project: String,
    token: String,
    api_version: String,
}

impl AzureDevOpsClient {
    pub fn new(credentials: &Credentials, remote: &RemoteConfig) -> Result<Self> {
        let base = Url::parse(&remote.base_url)
            .map_err(|e| RemoteError::Parse(format!("invalid base_url '{}': {}", remote.base_url, e)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(remote.timeout_secs))
            .user_agent(concat!("ticketlog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            organization: credentials.organization.clone(),
            project: credentials.project.clone(),
            token: credentials.token.clone(),
            api_version: remote.api_version.clone(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// `{base}/{org}/{project}/_apis/wit/{segments...}?{params}&api-version=..`
    fn endpoint(&self, segments: &[&str], params: &[(&str, String)], api_version: &str) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Parse(format!("base_url cannot be a base: {}", self.base)))?;
            path.pop_if_empty()
                .push(&self.organization)
                .push(&self.project)
                .push("_apis")
                .push("wit");
            for segment in segments {
                path.push(segment);
            }
        }

        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("api-version", api_version.to_string()));
        let encoded = serde_urlencoded::to_string(&query)
            .map_err(|e| RemoteError::Parse(format!("query encoding failed: {}", e)))?;
        url.set_query(Some(&encoded));
        Ok(url)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T> {
        let response = request.basic_auth("", Some(&self.token)).send()?;
        let status = response.status();
        if !status.is_success() || status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, url.as_str(), &body));
        }
        let text = response.text()?;
        serde_json::from_str(&text).map_err(|e| {
            RemoteError::Parse(format!("{} from {}", e, url))
        })
    }

    fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::trace!(%url, "GET");
        self.send(self.http.get(url.clone()), &url)
    }

    fn post<T: DeserializeOwned>(&self, url: Url, body: serde_json::Value) -> Result<T> {
        tracing::trace!(%url, "POST");
        self.send(self.http.post(url.clone()).json(&body), &url)
    }
}

/// Map a failed response onto the error taxonomy
fn classify_status(status: StatusCode, url: &str, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::NON_AUTHORITATIVE_INFORMATION => RemoteError::NotAuthenticated,
        StatusCode::NOT_FOUND => RemoteError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
        _ => RemoteError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        },
    }
}

impl WorkTrackingApi for AzureDevOpsClient {
    fn query_ids(&self, query: &str) -> Result<Vec<i32>> {
        let url = self.endpoint(&["wiql"], &[], &self.api_version)?;
        let response: WiqlResponse = self.post(url, json!({ "query": query }))?;
        Ok(response.work_items.into_iter().map(|r| r.id).collect())
    }

    fn fetch_bulk(&self, ids: &[i32]) -> Result<Vec<WorkItemPayload>> {
        if ids.len() > MAX_BULK_IDS {
            return Err(RemoteError::ChunkTooLarge {
                count: ids.len(),
                max: MAX_BULK_IDS,
            });
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        let url = self.endpoint(
            &["workitems"],
            &[
                ("ids", joined),
                ("$expand", "All".to_string()),
                ("errorPolicy", "Omit".to_string()),
            ],
            &self.api_version,
        )?;
        // Omitted ids come back as nulls
        let response: ListResponse<Option<WorkItemPayload>> = self.get(url)?;
        Ok(response.value.into_iter().flatten().collect())
    }

    fn fetch_detail(&self, id: i32) -> Result<WorkItemPayload> {
        let url = self.endpoint(
            &["workitems", &id.to_string()],
            &[("$expand", "All".to_string())],
            &self.api_version,
        )?;
        self.get(url)
    }

    fn fetch_revisions(&self, id: i32) -> Result<Vec<RevisionPayload>> {
        let id_segment = id.to_string();
        let mut revisions = Vec::new();
        loop {
            let url = self.endpoint(
                &["workitems", &id_segment, "revisions"],
                &[
                    ("$top", REVISION_PAGE.to_string()),
                    ("$skip", revisions.len().to_string()),
                    ("$expand", "All".to_string()),
                ],
                &self.api_version,
            )?;
            let page: ListResponse<RevisionPayload> = self.get(url)?;
            let fetched = page.value.len();
            revisions.extend(page.value);
            if fetched < REVISION_PAGE {
                break;
            }
        }
        Ok(revisions)
    }

    fn fetch_comments(&self, id: i32) -> Result<Vec<CommentPayload>> {
        let id_segment = id.to_string();
        let api_version = format!("{}-preview.4", self.api_version);
        let mut comments = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut params = Vec::new();
            if let Some(token) = &continuation {
                params.push(("continuationToken", token.clone()));
            }
            let url = self.endpoint(&["workItems", &id_segment, "comments"], &params, &api_version)?;
            let page: CommentPage = self.get(url)?;
            comments.extend(page.comments);
            match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(comments)
    }

    fn fetch_classification_tree(
        &self,
        group: StructureGroup,
        path: &str,
        depth: u32,
    ) -> Result<ClassificationNodePayload> {
        let mut segments = vec!["classificationnodes", group.as_str()];
        segments.extend(path.split(['/', '\\']).filter(|s| !s.is_empty()));
        let url = self.endpoint(&segments, &[("$depth", depth.to_string())], &self.api_version)?;
        self.get(url)
    }
}
