use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use picframe_drive::{ApiErrorClass, DriveClient, DriveError, DriveFile, OAuthClient};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::credentials::{Credentials, CredentialsError};
use crate::storage::{TokenStore, now_unix};

const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not authenticated; run `picframed --login` first")]
    NotAuthenticated,
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("drive api error: {0}")]
    Api(#[from] DriveError),
    #[error("transfer interrupted: {0}")]
    Interrupted(String),
}

pub type RemoteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    pub id: String,
    pub name: String,
    pub mime_type: Option<String>,
    /// Zero when the listing did not declare a size.
    pub size_bytes: u64,
    pub modified_time: Option<OffsetDateTime>,
}

impl RemoteImage {
    pub fn from_drive_file(file: DriveFile) -> Self {
        let size_bytes = file.size_bytes().unwrap_or(0);
        let modified_time = file
            .modified_time
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
        Self {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size_bytes,
            modified_time,
        }
    }
}

/// Source of images for a sync pass.
pub trait RemoteDrive: Send + Sync {
    fn authenticate(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn list_images(
        &self,
        folder_id: &str,
    ) -> impl Future<Output = Result<Vec<RemoteImage>, RemoteError>> + Send;

    fn open_download(
        &self,
        file_id: &str,
    ) -> impl Future<Output = Result<RemoteStream, RemoteError>> + Send;
}

struct Session {
    credentials: Credentials,
    client: DriveClient,
}

/// Google Drive backed remote using the stored OAuth token.
pub struct DriveRemote {
    http: reqwest::Client,
    base_url: String,
    store: TokenStore,
    oauth: Option<OAuthClient>,
    session: Mutex<Option<Session>>,
}

impl DriveRemote {
    pub fn new(http: reqwest::Client, store: TokenStore, oauth: Option<OAuthClient>) -> Self {
        Self::with_base_url(http, DEFAULT_DRIVE_BASE_URL, store, oauth)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: &str,
        store: TokenStore,
        oauth: Option<OAuthClient>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            store,
            oauth,
            session: Mutex::new(None),
        }
    }

    fn client_for(&self, token: String) -> Result<DriveClient, RemoteError> {
        Ok(DriveClient::with_http(self.http.clone(), &self.base_url, token)?)
    }

    async fn current_client(&self) -> Result<DriveClient, RemoteError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(RemoteError::NotAuthenticated)
    }

    async fn establish(&self, previous: Option<Session>) -> Result<Session, RemoteError> {
        let mut credentials = match previous {
            Some(session) => session.credentials,
            None => Credentials::load(&self.store, self.oauth.clone())?
                .ok_or(RemoteError::NotAuthenticated)?,
        };

        let mut client = self.client_for(credentials.bearer(now_unix()).await?)?;
        let about = match client.get_about().await {
            Ok(about) => about,
            Err(err) if err.classification() == Some(ApiErrorClass::Auth) => {
                warn!(error = %err, "access token rejected, renewing");
                client = self.client_for(credentials.renew().await?)?;
                client.get_about().await?
            }
            Err(err) => return Err(err.into()),
        };

        if credentials.persist(&self.store)? {
            debug!("persisted renewed token");
        }
        if let Some(user) = about.user {
            info!(
                account = user.email_address.as_deref().unwrap_or("unknown"),
                "authenticated with drive"
            );
        }
        Ok(Session {
            credentials,
            client,
        })
    }
}

impl RemoteDrive for DriveRemote {
    async fn authenticate(&self) -> Result<(), RemoteError> {
        let mut guard = self.session.lock().await;
        let session = self.establish(guard.take()).await?;
        *guard = Some(session);
        Ok(())
    }

    async fn list_images(&self, folder_id: &str) -> Result<Vec<RemoteImage>, RemoteError> {
        let client = self.current_client().await?;
        let files = client.list_folder_images(folder_id).await?;
        Ok(files.into_iter().map(RemoteImage::from_drive_file).collect())
    }

    async fn open_download(&self, file_id: &str) -> Result<RemoteStream, RemoteError> {
        let client = self.current_client().await?;
        let body = client.download(file_id).await?;
        Ok(Box::pin(body.map(|chunk| chunk.map_err(RemoteError::from))))
    }
}
