use std::path::Path;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_TOKEN_BASE_URL: &str = "https://oauth2.googleapis.com";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Read-only access is all the frame needs.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to read client secrets: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed client secrets: {0}")]
    Secrets(#[from] serde_json::Error),
    #[error("client secrets contain neither an `installed` nor a `web` section")]
    MissingSecretsSection,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Self::with_base_url(DEFAULT_TOKEN_BASE_URL, client_id, client_secret)
    }

    pub fn with_base_url(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn from_secrets(secrets: &ClientSecrets) -> Result<Self, OAuthError> {
        Self::new(&secrets.client_id, &secrets.client_secret)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Consent page URL. Requests offline access so a refresh token is issued.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: &str,
        state: Option<&str>,
    ) -> Result<Url, OAuthError> {
        let mut url = Url::parse(AUTHORIZE_URL)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("scope", scope);
            query.append_pair("access_type", "offline");
            query.append_pair("prompt", "consent");
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let url = self.base_url.join("/token")?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        Self::token_response(response).await
    }

    /// Google keeps the original grant's scope, so none is sent here.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let url = self.base_url.join("/token")?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await?;
        Self::token_response(response).await
    }

    async fn token_response(response: reqwest::Response) -> Result<OAuthToken, OAuthError> {
        if response.status().is_success() {
            Ok(response.json::<OAuthToken>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(OAuthError::Api { status, body })
        }
    }
}

impl OAuthError {
    /// The token endpoint refused the grant itself: the refresh token was revoked or expired,
    /// and only a new consent can recover.
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            OAuthError::Api { status, body } if *status == StatusCode::BAD_REQUEST => {
                serde_json::from_str::<TokenErrorBody>(body)
                    .map(|parsed| parsed.error == "invalid_grant")
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client id/secret pair as downloaded from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_json(raw: &str) -> Result<Self, OAuthError> {
        let file: ClientSecretsFile = serde_json::from_str(raw)?;
        file.installed
            .or(file.web)
            .ok_or(OAuthError::MissingSecretsSection)
    }

    pub fn load(path: &Path) -> Result<Self, OAuthError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_installed_client_secrets() {
        let raw = r#"{"installed":{"client_id":"id-1","project_id":"p","client_secret":"s-1",
            "redirect_uris":["http://localhost"]}}"#;
        let secrets = ClientSecrets::from_json(raw).unwrap();
        assert_eq!(secrets.client_id, "id-1");
        assert_eq!(secrets.client_secret, "s-1");
    }

    #[test]
    fn falls_back_to_web_section() {
        let raw = r#"{"web":{"client_id":"id-2","client_secret":"s-2"}}"#;
        assert_eq!(ClientSecrets::from_json(raw).unwrap().client_id, "id-2");
    }

    #[test]
    fn rejects_secrets_without_known_section() {
        let err = ClientSecrets::from_json(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err, OAuthError::MissingSecretsSection));
    }

    #[test]
    fn recognises_revoked_grant() {
        let revoked = OAuthError::Api {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error":"invalid_grant","error_description":"Token revoked."}"#.into(),
        };
        assert!(revoked.is_invalid_grant());

        let other_client_error = OAuthError::Api {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error":"invalid_request"}"#.into(),
        };
        assert!(!other_client_error.is_invalid_grant());

        let server_error = OAuthError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "invalid_grant".into(),
        };
        assert!(!server_error.is_invalid_grant());
    }

    #[test]
    fn authorize_url_requests_offline_access() {
        let client = OAuthClient::new("client-id", "secret").unwrap();
        let url = client
            .authorize_url("http://127.0.0.1:9876/callback", DRIVE_READONLY_SCOPE, None)
            .unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(query.get("scope").map(String::as_str), Some(DRIVE_READONLY_SCOPE));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("http://127.0.0.1:9876/callback")
        );
    }
}
