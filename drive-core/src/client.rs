use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::types::{About, File, FileList};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILES_PATH: &str = "/drive/v3/files";
const ABOUT_PATH: &str = "/drive/v3/about";
const RESOURCE_KEYS_HEADER: &str = "X-Goog-Drive-Resource-Keys";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments")]
    CannotBeABase,
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    NotFound,
    Transient,
    Permanent,
}

/// First entry of the `error.errors` array the API attaches to failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Parameters of one `files.list` page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub q: Option<String>,
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub fields: Option<String>,
    pub spaces: Option<String>,
    /// Comma separated `id/resourceKey` pairs.
    pub resource_keys: Option<String>,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Prefix used to build media download links (`<prefix>files/<id>?alt=media`).
    pub fn base_path(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/drive/v3/")
    }

    pub async fn get_file(&self, id: &str, fields: Option<&str>) -> Result<File, DriveError> {
        let mut url = self.endpoint(FILES_PATH)?;
        url.path_segments_mut()
            .map_err(|_| DriveError::CannotBeABase)?
            .push(id);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("supportsAllDrives", "true");
            if let Some(fields) = fields.filter(|f| !f.is_empty()) {
                query.append_pair("fields", fields);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_files(&self, request: &ListQuery) -> Result<FileList, DriveError> {
        let mut url = self.endpoint(FILES_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(q) = request.q.as_deref().filter(|q| !q.is_empty()) {
                query.append_pair("q", q);
            }
            if let Some(page_size) = request.page_size {
                query.append_pair("pageSize", &page_size.to_string());
            }
            if let Some(token) = request.page_token.as_deref().filter(|t| !t.is_empty()) {
                query.append_pair("pageToken", token);
            }
            if let Some(fields) = request.fields.as_deref().filter(|f| !f.is_empty()) {
                query.append_pair("fields", fields);
            }
            if let Some(spaces) = request.spaces.as_deref() {
                query.append_pair("spaces", spaces);
            }
            query
                .append_pair("supportsAllDrives", "true")
                .append_pair("includeItemsFromAllDrives", "true");
        }
        let mut builder = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value());
        if let Some(keys) = request.resource_keys.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.header(RESOURCE_KEYS_HEADER, keys);
        }
        let response = builder.send().await?;
        Self::handle_response(response).await
    }

    pub async fn get_about(&self, fields: &str) -> Result<About, DriveError> {
        let mut url = self.endpoint(ABOUT_PATH)?;
        url.query_pairs_mut().append_pair("fields", fields);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DriveError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Reason and message of the first structured error in the response body.
    pub fn detail(&self) -> Option<ApiErrorDetail> {
        let DriveError::Api { body, .. } = self else {
            return None;
        };
        let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
        envelope.error.errors.into_iter().next()
    }

    pub fn reason(&self) -> Option<String> {
        self.detail().map(|detail| detail.reason)
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => {
                Some(classify_api_status(*status, self.reason().as_deref()))
            }
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Connection-level failures and throttling/5xx answers are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode, reason: Option<&str>) -> ApiErrorClass {
    let rate_limited = matches!(
        reason,
        Some("rateLimitExceeded" | "userRateLimitExceeded")
    );
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && rate_limited)
    {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}
