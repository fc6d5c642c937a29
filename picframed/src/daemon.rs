use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use picframe_drive::OAuthClient;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::ImageCatalog;
use crate::config::FrameConfig;
use crate::oauth_flow::OAuthFlow;
use crate::scheduler::PeriodicTask;
use crate::slideshow::{Command, Presenter, SYNCING, Slideshow, sync_status_text};
use crate::storage::{OAuthState, StorageBudget, TokenStore};
use crate::sync::{DriveRemote, SyncEngine, SyncOutcome};

pub type FrameEngine = SyncEngine<DriveRemote>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncEvent {
    Started,
    Finished(SyncOutcome),
}

pub struct FrameRuntime {
    config: FrameConfig,
    engine: Arc<FrameEngine>,
    catalog: Arc<ImageCatalog>,
}

impl FrameRuntime {
    pub async fn bootstrap(config: FrameConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.images_dir)
            .await
            .with_context(|| format!("failed to create images dir at {:?}", config.images_dir))?;

        let http = build_http_client(&config)?;
        let oauth = oauth_client_from_config(&config)?;
        if oauth.is_none() {
            warn!("no oauth client credentials configured; expired tokens cannot be refreshed");
        }
        let remote = DriveRemote::new(http, TokenStore::new(config.token_path.clone()), oauth);
        let budget = StorageBudget::new(
            config.images_dir.clone(),
            config.extensions.clone(),
            config.max_storage_percent,
        )
        .with_eviction_margin(config.eviction_margin_percent);
        let engine = Arc::new(SyncEngine::new(remote, budget, config.folder_id.clone()));

        let catalog = Arc::new(ImageCatalog::new(
            config.images_dir.clone(),
            config.extensions.clone(),
        ));
        refresh_catalog(&catalog).await;

        Ok(Self {
            config,
            engine,
            catalog,
        })
    }

    pub fn engine(&self) -> &Arc<FrameEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Arc<ImageCatalog> {
        &self.catalog
    }

    /// One full pass followed by a catalog refresh.
    pub async fn sync_once(&self) -> SyncOutcome {
        let outcome = self.engine.run_sync().await;
        refresh_catalog(&self.catalog).await;
        outcome
    }

    /// Runs until Ctrl-C or a `q` on stdin.
    pub async fn run<P: Presenter>(self, presenter: &mut P) -> anyhow::Result<()> {
        let (key_tx, key_rx) = mpsc::unbounded_channel();
        let key_handle = tokio::spawn(read_key_commands(key_tx));
        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received"),
                Err(err) => {
                    warn!(error = %err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        };

        self.drive(presenter, key_rx, shutdown).await;
        key_handle.abort();
        Ok(())
    }

    async fn drive<P, S>(
        self,
        presenter: &mut P,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: S,
    ) where
        P: Presenter,
        S: Future<Output = ()>,
    {
        info!(
            images_dir = %self.config.images_dir.display(),
            folder = %self.config.folder_id,
            sync_interval_secs = self.config.sync_interval.as_secs(),
            "picture frame started"
        );

        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel();
        let engine = Arc::clone(&self.engine);
        let catalog = Arc::clone(&self.catalog);
        let sync_task = PeriodicTask::spawn(
            "drive-sync",
            self.config.sync_interval,
            true,
            move || {
                let engine = Arc::clone(&engine);
                let catalog = Arc::clone(&catalog);
                let sync_tx = sync_tx.clone();
                async move {
                    let _ = sync_tx.send(SyncEvent::Started);
                    let Some(outcome) = engine.try_run_sync().await else {
                        debug!("previous sync still running");
                        return;
                    };
                    // Scanned on the sync task, off the display loop.
                    refresh_catalog(&catalog).await;
                    let _ = sync_tx.send(SyncEvent::Finished(outcome));
                }
            },
        );

        let mut slideshow = Slideshow::new(Arc::clone(&self.catalog));
        let period = self.config.slideshow_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        presenter.show(&slideshow.current_frame());
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = sync_rx.recv() => match event {
                    SyncEvent::Started => presenter.status(SYNCING),
                    SyncEvent::Finished(outcome) => {
                        // Eviction may have removed the image on screen.
                        presenter.show(&slideshow.current_frame());
                        presenter.status(&sync_status_text(&outcome));
                    }
                },
                Some(command) = commands.recv() => {
                    if command == Command::Quit {
                        info!("quit requested");
                        break;
                    }
                    if let Some(frame) = slideshow.apply(command) {
                        presenter.show(&frame);
                    } else {
                        debug!(?command, playing = slideshow.is_playing(), "slideshow command");
                    }
                }
                _ = ticker.tick() => {
                    if let Some(frame) = slideshow.tick() {
                        presenter.show(&frame);
                    }
                }
            }
        }

        sync_task.stop().await;
        info!("picture frame stopped");
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
