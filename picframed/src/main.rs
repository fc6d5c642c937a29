use anyhow::Context;
use picframed::config::FrameConfig;
use picframed::daemon::{self, FrameRuntime};
use picframed::logging;
use picframed::slideshow::{LogPresenter, sync_status_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Login,
    Logout,
    SyncOnce,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--login" => mode = CliMode::Login,
            "--logout" => mode = CliMode::Logout,
            "--sync-once" => mode = CliMode::SyncOnce,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn print_usage() {
    println!("Usage: picframed [--login | --logout | --sync-once | --help]");
    println!("  --login      Authorize access to Google Drive and save the token");
    println!("  --logout     Remove saved OAuth token and exit");
    println!("  --sync-once  Run a single sync pass and exit");
    println!();
    println!("Keys while running: n/right/space next, p/left previous, r random,");
    println!("                    s toggle slideshow, esc stop slideshow, q quit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let config = FrameConfig::from_env().context("invalid configuration")?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    match mode {
        CliMode::Login => {
            daemon::login(&config).await?;
            println!("Login successful.");
            Ok(())
        }
        CliMode::Logout => daemon::logout(&config),
        CliMode::SyncOnce => {
            let runtime = FrameRuntime::bootstrap(config).await?;
            let outcome = runtime.sync_once().await;
            println!("{}", sync_status_text(&outcome));
            Ok(())
        }
        CliMode::Run => {
            let runtime = FrameRuntime::bootstrap(config).await?;
            runtime.run(&mut LogPresenter).await
        }
        CliMode::Help => Ok(()),
    }
}
