use std::io::Write;

use clap::Args;
use pomosync_core::storage::Backend;
use pomosync_core::{
    ClockEngine, Config, MemoryStore, Projection, RemoteStore, SessionDriver, SqliteStore,
    SystemClock,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Args)]
pub struct WatchArgs {
    /// Start the timer once the instance is up
    #[arg(long)]
    start: bool,
    /// Print every event as a JSON line instead of a countdown
    #[arg(long)]
    json: bool,
}

pub async fn run(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    match config.sync.backend {
        Backend::Sqlite => {
            let store = SqliteStore::open_default()?.with_poll_interval(config.poll_interval());
            run_session(store, &config, args).await
        }
        Backend::Memory => run_session(MemoryStore::new(), &config, args).await,
    }
}

async fn run_session<S: RemoteStore>(
    store: S,
    config: &Config,
    args: WatchArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = ClockEngine::new(store, SystemClock, config.engine_options()?);
    if let Some(hook) = config.completion_hook() {
        engine = engine.with_completion_hook(hook);
    }
    let (driver, handle) = SessionDriver::new(engine, config.session_options());
    let task = driver.spawn();

    let mut projection = handle.projection();
    let mut events = handle.subscribe_events();
    // Wait for the first snapshot so --start acts on the stored state.
    let snapshot = handle.snapshot().await?;
    if args.json {
        println!("{}", serde_json::to_string(&snapshot)?);
    }
    if args.start {
        handle.start().await?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = projection.changed() => {
                if changed.is_err() {
                    break;
                }
                if !args.json {
                    print_countdown(&projection.borrow_and_update());
                }
            }
            event = events.recv() => match event {
                Ok(event) if args.json => println!("{}", serde_json::to_string(&event)?),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if !args.json {
        println!();
    }
    // The driver may already be gone if the store failed hard.
    let _ = handle.shutdown().await;
    task.await?;
    Ok(())
}

fn print_countdown(p: &Projection) {
    let minutes = p.time_remaining / 60;
    let seconds = p.time_remaining % 60;
    let state = if p.is_running { "running" } else { "paused" };
    print!(
        "\r{:<11} {minutes:02}:{seconds:02}  {state:<7}  sessions {}",
        p.mode.as_str(),
        p.sessions_completed
    );
    let _ = std::io::stdout().flush();
}
