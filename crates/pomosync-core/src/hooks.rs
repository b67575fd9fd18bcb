//! Side-effect boundaries: completion notification and background keepalive.

use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::timer::Mode;

/// Something that tells the user an interval ran out. `notify` may block
/// until the notification has played; it runs off the session task.
pub trait CompletionNotifier: Send + Sync {
    fn notify(&self, mode: Mode) -> io::Result<()>;
}

/// Primary notifier with a fallback used when the primary fails.
///
/// The engine calls [`fire`](Self::fire) once per expiry.
#[derive(Clone)]
pub struct CompletionHook {
    primary: Arc<dyn CompletionNotifier>,
    fallback: Option<Arc<dyn CompletionNotifier>>,
    fired: Arc<AtomicU64>,
}

impl CompletionHook {
    pub fn new(primary: impl CompletionNotifier + 'static) -> Self {
        Self {
            primary: Arc::new(primary),
            fallback: None,
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_fallback(mut self, fallback: impl CompletionNotifier + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Built from the `[notifications]` config: the configured command if
    /// any, else the terminal bell; the bell is always the fallback.
    pub fn from_command(command: Option<&str>) -> Self {
        match command.map(str::trim).filter(|c| !c.is_empty()) {
            Some(cmd) => Self::new(CommandNotifier::new(cmd)).with_fallback(BellNotifier),
            None => Self::new(BellNotifier).with_fallback(LogNotifier),
        }
    }

    /// Notify on a detached thread: the primary first, the fallback if the
    /// primary fails. The handle may be dropped; tests join it.
    pub fn fire(&self, mode: Mode) -> Option<JoinHandle<()>> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        let primary = Arc::clone(&self.primary);
        let fallback = self.fallback.clone();
        let spawned = thread::Builder::new()
            .name("pomosync-notify".into())
            .spawn(move || notify_with_fallback(primary.as_ref(), fallback.as_deref(), mode));
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "notifier thread unavailable; notifying inline");
                notify_with_fallback(self.primary.as_ref(), self.fallback.as_deref(), mode);
                None
            }
        }
    }

    /// Times [`fire`](Self::fire) has been called (shared across clones).
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

fn notify_with_fallback(
    primary: &dyn CompletionNotifier,
    fallback: Option<&dyn CompletionNotifier>,
    mode: Mode,
) {
    let Err(e) = primary.notify(mode) else {
        return;
    };
    warn!(error = %e, %mode, "completion notifier failed; using fallback");
    if let Some(fallback) = fallback {
        if let Err(e) = fallback.notify(mode) {
            warn!(error = %e, %mode, "fallback notifier failed");
        }
    }
}

impl Default for CompletionHook {
    fn default() -> Self {
        Self::new(LogNotifier)
    }
}

/// Runs a shell command (e.g. a sound player) and waits for it. The mode is
/// passed in `POMOSYNC_MODE`. A non-zero exit, including the shell's 127
/// for a missing program, is a failure.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl CompletionNotifier for CommandNotifier {
    fn notify(&self, mode: Mode) -> io::Result<()> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.command);
            c
        };
        let mut child = cmd
            .env("POMOSYNC_MODE", mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(pid = child.id(), command = %self.command, "completion command spawned");
        let status = child.wait()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "`{}` exited with {status}",
                self.command
            )));
        }
        Ok(())
    }
}

/// Writes the terminal bell to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct BellNotifier;

impl CompletionNotifier for BellNotifier {
    fn notify(&self, _mode: Mode) -> io::Result<()> {
        let mut stderr = io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn notify(&self, mode: Mode) -> io::Result<()> {
        info!(%mode, "interval complete");
        Ok(())
    }
}

/// Keeps the host from suspending the process while an interval runs
/// (wake lock, power assertion, ...). The driver pairs every `acquire`
/// with one `release`.
pub trait Keepalive: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKeepalive;

impl Keepalive for NoopKeepalive {
    fn acquire(&self) {}
    fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<Mutex<Vec<Mode>>>,
        fail: bool,
    }

    impl CompletionNotifier for Recording {
        fn notify(&self, mode: Mode) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("no audio device"));
            }
            self.seen.lock().unwrap().push(mode);
            Ok(())
        }
    }

    #[test]
    fn fallback_runs_only_when_primary_fails() {
        let primary = Recording::default();
        let fallback = Recording::default();
        let hook = CompletionHook::new(primary.clone()).with_fallback(fallback.clone());
        hook.fire(Mode::Work).unwrap().join().unwrap();
        assert_eq!(*primary.seen.lock().unwrap(), vec![Mode::Work]);
        assert!(fallback.seen.lock().unwrap().is_empty());

        let broken = Recording {
            fail: true,
            ..Default::default()
        };
        let hook = CompletionHook::new(broken).with_fallback(fallback.clone());
        hook.fire(Mode::LongBreak).unwrap().join().unwrap();
        assert_eq!(*fallback.seen.lock().unwrap(), vec![Mode::LongBreak]);
        assert_eq!(hook.fired(), 1);
    }

    #[test]
    fn fire_count_is_shared_between_clones() {
        let hook = CompletionHook::default();
        let clone = hook.clone();
        clone.fire(Mode::Work).unwrap().join().unwrap();
        clone.fire(Mode::ShortBreak).unwrap().join().unwrap();
        assert_eq!(hook.fired(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn command_notifier_reports_exit_status() {
        assert!(CommandNotifier::new("true").notify(Mode::Work).is_ok());
        assert!(CommandNotifier::new("exit 3").notify(Mode::Work).is_err());
        assert!(CommandNotifier::new("test \"$POMOSYNC_MODE\" = shortBreak")
            .notify(Mode::ShortBreak)
            .is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn missing_player_falls_back_once() {
        let fallback = Recording::default();
        let hook = CompletionHook::new(CommandNotifier::new("pomosync-no-such-player /no/such.wav"))
            .with_fallback(fallback.clone());
        hook.fire(Mode::Work).unwrap().join().unwrap();
        assert_eq!(*fallback.seen.lock().unwrap(), vec![Mode::Work]);
    }
}
