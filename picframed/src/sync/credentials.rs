use picframe_drive::{OAuthClient, OAuthError};
use thiserror::Error;
use tracing::debug;

use crate::storage::{OAuthState, TokenStore, TokenStoreError};

/// Seconds before the recorded expiry at which a token counts as expired.
const EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("access token expired and no oauth client is configured to renew it")]
    NoOAuthClient,
    #[error("access token expired and no refresh token was issued; run `picframed --login`")]
    NoRefreshToken,
    #[error("refresh token revoked or expired; run `picframed --login`")]
    Revoked,
    #[error("token endpoint error: {0}")]
    OAuth(OAuthError),
    #[error("token storage error: {0}")]
    Store(#[from] TokenStoreError),
}

impl From<OAuthError> for CredentialsError {
    fn from(err: OAuthError) -> Self {
        if err.is_invalid_grant() {
            CredentialsError::Revoked
        } else {
            CredentialsError::OAuth(err)
        }
    }
}

/// The saved Google grant for the frame account.
///
/// Renewals stay in memory until [`Credentials::persist`] writes them back.
pub(crate) struct Credentials {
    state: OAuthState,
    oauth: Option<OAuthClient>,
    renewed: bool,
}

impl Credentials {
    /// `Ok(None)` means nobody has logged in yet.
    pub(crate) fn load(
        store: &TokenStore,
        oauth: Option<OAuthClient>,
    ) -> Result<Option<Self>, CredentialsError> {
        match store.load() {
            Ok(state) => Ok(Some(Self::new(state, oauth))),
            Err(TokenStoreError::TokenNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn new(state: OAuthState, oauth: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth,
            renewed: false,
        }
    }

    /// Tokens without a recorded expiry are trusted until the API rejects them.
    pub(crate) fn expires_within(&self, now_unix: i64, leeway_secs: i64) -> bool {
        self.state
            .expires_at
            .is_some_and(|expires_at| expires_at <= now_unix.saturating_add(leeway_secs))
    }

    /// Current bearer token, renewed first when it is about to expire.
    pub(crate) async fn bearer(&mut self, now_unix: i64) -> Result<String, CredentialsError> {
        if self.expires_within(now_unix, EXPIRY_LEEWAY_SECS) {
            debug!("access token about to expire, renewing");
            self.renew().await?;
        }
        Ok(self.state.access_token.clone())
    }

    /// Exchanges the refresh token for a new access token regardless of the recorded expiry.
    pub(crate) async fn renew(&mut self) -> Result<String, CredentialsError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(CredentialsError::NoRefreshToken)?;
        let oauth = self.oauth.as_ref().ok_or(CredentialsError::NoOAuthClient)?;
        let token = oauth.refresh_token(&refresh_token).await?;

        let mut next = OAuthState::from_oauth_token(&token);
        // Google only returns a refresh token on the first consent.
        next.refresh_token.get_or_insert(refresh_token);
        if next.scope.is_none() {
            next.scope = self.state.scope.take();
        }
        self.state = next;
        self.renewed = true;
        Ok(self.state.access_token.clone())
    }

    /// Writes a renewed grant back to disk. Returns whether anything was written.
    pub(crate) fn persist(&mut self, store: &TokenStore) -> Result<bool, CredentialsError> {
        if !self.renewed {
            return Ok(false);
        }
        store.save(&self.state)?;
        self.renewed = false;
        Ok(true)
    }
}
