use clap::Subcommand;
use pomosync_core::{ClockEngine, Config, Mode, SqliteStore, SystemClock};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start (or resume) the current interval
    Start,
    /// Pause the running interval
    Pause,
    /// Restore the full duration of the current mode
    Reset,
    /// Move on to the next mode
    Skip,
    /// Print current timer state as JSON
    Status,
    /// Switch mode (work, short-break, long-break); refused while running
    Mode {
        mode: Mode,
    },
    /// Change durations, in seconds; omitted values are kept
    Durations {
        #[arg(long, allow_hyphen_values = true)]
        work: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        short_break: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        long_break: Option<i64>,
    },
}

type Engine = ClockEngine<SqliteStore, SystemClock>;

async fn open_engine() -> Result<Engine, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = SqliteStore::open_default()?;
    let mut engine = ClockEngine::new(store, SystemClock, config.engine_options()?);
    engine.initialize().await?;
    Ok(engine)
}

pub async fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = open_engine().await?;

    let event = match action {
        TimerAction::Start => engine.start().await,
        TimerAction::Pause => engine.pause().await,
        TimerAction::Reset => engine.reset().await,
        TimerAction::Skip => engine.skip().await,
        TimerAction::Status => None,
        TimerAction::Mode { mode } => {
            if engine.is_running() {
                return Err("cannot change mode while the timer is running".into());
            }
            engine.change_mode(mode).await
        }
        TimerAction::Durations {
            work,
            short_break,
            long_break,
        } => {
            let current = engine.projection().durations;
            engine
                .update_durations(
                    work.unwrap_or(current.work() as i64),
                    short_break.unwrap_or(current.short_break() as i64),
                    long_break.unwrap_or(current.long_break() as i64),
                )
                .await?
        }
    };

    if !engine.flush_if_dirty().await {
        eprintln!("warning: state could not be saved");
    }

    // No-ops print the current state, like `status`.
    let output = event.unwrap_or_else(|| engine.snapshot());
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
