use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::{Command, Reply};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::timer::{Mode, Projection};

/// Cloneable front of a running [`SessionDriver`](super::SessionDriver).
///
/// Every call is queued to the driver task and resolves once the driver has
/// applied it. After the driver has stopped, calls fail with
/// [`CoreError::SessionClosed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(super) commands: mpsc::Sender<Command>,
    pub(super) projection: watch::Receiver<Projection>,
    pub(super) events: broadcast::Sender<Event>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<Option<Event>> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<Option<Event>> {
        self.request(Command::Pause).await
    }

    pub async fn reset(&self) -> Result<Option<Event>> {
        self.request(Command::Reset).await
    }

    pub async fn skip(&self) -> Result<Option<Event>> {
        self.request(Command::Skip).await
    }

    pub async fn change_mode(&self, mode: Mode) -> Result<Option<Event>> {
        self.request(|reply| Command::ChangeMode(mode, reply)).await
    }

    pub async fn update_durations(
        &self,
        work: i64,
        short_break: i64,
        long_break: i64,
    ) -> Result<Option<Event>> {
        let outcome = self
            .request(|reply| Command::UpdateDurations {
                work,
                short_break,
                long_break,
                reply,
            })
            .await?;
        Ok(outcome?)
    }

    pub async fn snapshot(&self) -> Result<Event> {
        self.request(Command::Snapshot).await
    }

    /// Recompute immediately (e.g. the host came back from sleep or the
    /// window regained focus).
    pub async fn wake(&self) -> Result<()> {
        self.request(Command::Wake).await
    }

    /// Stop the driver and wait for it to release its resources.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// Latest projection.
    pub fn current(&self) -> Projection {
        self.projection.borrow().clone()
    }

    /// Projection updates, for the presentation layer.
    pub fn projection(&self) -> watch::Receiver<Projection> {
        self.projection.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CoreError::SessionClosed)?;
        rx.await.map_err(|_| CoreError::SessionClosed)
    }
}
