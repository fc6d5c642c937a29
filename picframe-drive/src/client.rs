use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const IMAGE_LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, modifiedTime)";
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Chunked body of a file download.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriveError>> + Send>>;

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
    Transient,
    Permanent,
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
        Self::with_http(Client::new(), base_url, token)
    }

    /// Uses a preconfigured HTTP client, e.g. one carrying a request timeout.
    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, DriveError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_about(&self) -> Result<About, DriveError> {
        let mut url = self.endpoint("/drive/v3/about")?;
        url.query_pairs_mut()
            .append_pair("fields", "user(displayName,emailAddress)");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_files(
        &self,
        query: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
        fields: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("spaces", "drive");
            if let Some(page_size) = page_size {
                pairs.append_pair("pageSize", &page_size.to_string());
            }
            if let Some(page_token) = page_token {
                pairs.append_pair("pageToken", page_token);
            }
            if let Some(fields) = fields.filter(|f| !f.is_empty()) {
                pairs.append_pair("fields", fields);
            }
        }
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Lists every non-trashed image directly inside `folder_id`, following pagination.
    pub async fn list_folder_images(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let query = folder_images_query(folder_id);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_files(
                    &query,
                    Some(DEFAULT_PAGE_SIZE),
                    page_token.as_deref(),
                    Some(IMAGE_LIST_FIELDS),
                )
                .await?;
            files.extend(page.files);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) if page_token.as_deref() != Some(next.as_str()) => {
                    page_token = Some(next)
                }
                _ => break,
            }
        }
        Ok(files)
    }

    /// Starts a media download; the body is consumed chunk by chunk from the returned stream.
    pub async fn download(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        let mut url = self.file_endpoint(file_id)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DriveError::from));
        Ok(Box::pin(stream))
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_endpoint(&self, file_id: &str) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.path_segments_mut()
            .map_err(|_| DriveError::CannotBeABase)?
            .push(file_id);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> DriveError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        DriveError::Api { status, body }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Builds the `q` expression selecting images in a folder.
pub fn folder_images_query(folder_id: &str) -> String {
    format!(
        "'{}' in parents and mimeType contains 'image/' and trashed = false",
        escape_query_literal(folder_id)
    )
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Deserialize, Serialize)]
pub struct About {
    #[serde(default)]
    pub user: Option<DriveUser>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    // Drive encodes int64 fields as JSON strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFile {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|raw| raw.trim().parse().ok())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
