fn build_http_client(config: &FrameConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")
}

fn oauth_client_from_config(config: &FrameConfig) -> anyhow::Result<Option<OAuthClient>> {
    let secrets = config.client_secrets().with_context(|| {
        format!(
            "failed to read client credentials from {}",
            config.credentials_path.display()
        )
    })?;
    secrets
        .map(|secrets| OAuthClient::from_secrets(&secrets).context("invalid oauth config"))
        .transpose()
}

/// Runs the consent flow and stores the resulting token.
pub async fn login(config: &FrameConfig) -> anyhow::Result<OAuthState> {
    let client = oauth_client_from_config(config)?.context(
        "no oauth client credentials: set PICFRAME_CLIENT_ID and PICFRAME_CLIENT_SECRET \
         or provide credentials.json",
    )?;
    let token = OAuthFlow::new(client).authenticate().await?;
    let state = OAuthState::from_oauth_token(&token);
    if state.refresh_token.is_none() {
        warn!("no refresh token issued; the login will have to be repeated when it expires");
    }
    let store = TokenStore::new(config.token_path.clone());
    store.save(&state).context("failed to save token")?;
    info!(path = %store.path().display(), "token saved");
    Ok(state)
}

pub fn logout(config: &FrameConfig) -> anyhow::Result<()> {
    let store = TokenStore::new(config.token_path.clone());
    store.delete().context("failed to remove saved token")?;
    info!(path = %store.path().display(), "saved token removed");
    Ok(())
}

async fn refresh_catalog(catalog: &Arc<ImageCatalog>) {
    let catalog = Arc::clone(catalog);
    match tokio::task::spawn_blocking(move || catalog.refresh()).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!(error = %err, "catalog refresh failed, keeping previous images"),
        Err(err) => warn!(error = %err, "catalog refresh task failed"),
    }
}

async fn read_key_commands(commands: mpsc::UnboundedSender<Command>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Command::from_key(&line) {
                Some(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                None => debug!(key = %line.trim(), "unknown key"),
            },
            Ok(None) => {
                debug!("stdin closed, keyboard control disabled");
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                break;
            }
        }
    }
}
