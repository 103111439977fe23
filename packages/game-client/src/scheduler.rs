use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Returned by a tick to keep the task alive or end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

/// A spawned timer loop owned by its handle. Dropping the handle cancels the
/// task at its next suspension point.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `tick` every `period`, first after one period.
    pub fn every<F, Fut>(period: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        Self::adaptive(move || period, tick)
    }

    /// Runs `tick` repeatedly, asking `next_delay` for the wait before each
    /// run.
    pub fn adaptive<D, F, Fut>(mut next_delay: D, mut tick: F) -> Self
    where
        D: FnMut() -> Duration + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TaskControl> + Send + 'static,
    {
        Self::spawn(move |token| async move {
            loop {
                let delay = next_delay();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tick().await == TaskControl::Stop {
                    break;
                }
            }
        })
    }

    /// Spawns a long-running task that is expected to watch `token`.
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        ScheduledTask { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
