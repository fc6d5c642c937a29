use std::time::Duration;

use picframe_drive::{DRIVE_READONLY_SCOPE, OAuthClient, OAuthToken};
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] picframe_drive::OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization code missing in redirect")]
    MissingCode,
    #[error("redirect carried an unexpected state parameter")]
    StateMismatch,
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("authorization timed out")]
    Timeout,
}

/// Installed-app consent flow: the user opens the printed URL on any browser that can reach
/// this machine's loopback address and the redirect is captured on a local port.
pub struct OAuthFlow {
    client: OAuthClient,
    timeout: Duration,
}

impl OAuthFlow {
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn authenticate(&self) -> Result<OAuthToken, OAuthFlowError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let redirect_uri = format!("http://127.0.0.1:{}/callback", listener.local_addr()?.port());
        let state = format!("{:016x}", rand::thread_rng().r#gen::<u64>());
        let url = self
            .client
            .authorize_url(&redirect_uri, DRIVE_READONLY_SCOPE, Some(&state))?;

        println!("Open this URL in your browser to grant access:\n{url}");
        info!(%redirect_uri, "waiting for oauth redirect");

        let code = receive_code(&listener, &state, self.timeout).await?;
        Ok(self.client.exchange_code(&code, &redirect_uri).await?)
    }
}

async fn receive_code(
    listener: &TcpListener,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, OAuthFlowError> {
    let (mut stream, _) = tokio::time::timeout(timeout, listener.accept())
        .await
        .map_err(|_| OAuthFlowError::Timeout)??;

    let mut request = vec![0u8; 8192];
    let read = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut request))
        .await
        .map_err(|_| OAuthFlowError::Timeout)??;
    let request_text = String::from_utf8_lossy(&request[..read]);

    let result = code_from_callback(&request_text, expected_state);
    let page: &[u8] = if result.is_ok() {
        b"HTTP/1.1 200 OK\r\n\
        Content-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
        <html><body><h2>Picture frame connected</h2><p>You can close this page.</p></body></html>"
    } else {
        b"HTTP/1.1 400 Bad Request\r\n\
        Content-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
        <html><body><h2>Authorization failed</h2><p>Run the login again.</p></body></html>"
    };
    let _ = stream.write_all(page).await;
    let _ = stream.shutdown().await;
    result
}

fn code_from_callback(request: &str, expected_state: &str) -> Result<String, OAuthFlowError> {
    if let Some(error) = callback_param(request, "error") {
        return Err(OAuthFlowError::Denied(error));
    }
    if callback_param(request, "state").as_deref() != Some(expected_state) {
        return Err(OAuthFlowError::StateMismatch);
    }
    extract_code_from_http_request(request).ok_or(OAuthFlowError::MissingCode)
}

fn extract_code_from_http_request(request: &str) -> Option<String> {
    callback_param(request, "code")
}

fn callback_param(request: &str, key: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let request_url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target).ok()?
    } else {
        Url::parse(&format!("http://127.0.0.1{target}")).ok()?
    };
    request_url
        .query_pairs()
        .find_map(|(name, value)| (name == key && !value.is_empty()).then(|| value.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn extracts_code_from_request_line() {
        let req = "GET /callback?code=abc123&state=xyz HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        assert_eq!(
            extract_code_from_http_request(req).as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn returns_none_when_code_missing() {
        let req = "GET /callback?state=xyz HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        assert!(extract_code_from_http_request(req).is_none());
    }

    #[test]
    fn rejects_foreign_state() {
        let req = "GET /callback?code=abc&state=other HTTP/1.1\r\n\r\n";
        assert!(matches!(
            code_from_callback(req, "mine"),
            Err(OAuthFlowError::StateMismatch)
        ));
    }

    #[test]
    fn reports_consent_denial() {
        let req = "GET /callback?error=access_denied&state=mine HTTP/1.1\r\n\r\n";
        match code_from_callback(req, "mine") {
            Err(OAuthFlowError::Denied(reason)) => assert_eq!(reason, "access_denied"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn captures_code_from_loopback_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = b"GET /callback?code=4%2Fabc&state=s1 HTTP/1.1\r\n\
                Host: 127.0.0.1\r\n\r\n";
            stream.write_all(request).await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let code = receive_code(&listener, "s1", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(code, "4/abc");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_no_redirect_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = receive_code(&listener, "s1", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthFlowError::Timeout));
    }
}
