//! Debounced reaction to document mutations.
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Coalesce bursts from `rx` into single calls of `on_quiet`.
///
/// The first event arms a timer of length `window`; every further event
/// re-arms it. When the timer expires `on_quiet` runs once. Returns when the
/// channel closes (a pending timer is dropped, not fired) or when `on_quiet`
/// breaks.
pub async fn debounce<T, F, Fut>(mut rx: UnboundedReceiver<T>, window: Duration, mut on_quiet: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    while rx.recv().await.is_some() {
        let timer = sleep(window);
        tokio::pin!(timer);
        let mut batched = 1usize;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(_) => {
                        batched += 1;
                        timer.as_mut().reset(Instant::now() + window);
                    }
                    None => return,
                },
                () = &mut timer => break,
            }
        }

        tracing::trace!(batched, "Mutations settled");
        if on_quiet().await.is_break() {
            return;
        }
    }
}

/// Background task running [`debounce`] over a mutation stream.
///
/// The task is aborted when the watcher is dropped.
pub struct MutationWatcher {
    handle: JoinHandle<()>,
}

impl MutationWatcher {
    pub fn spawn<T, F, Fut>(rx: UnboundedReceiver<T>, window: Duration, on_quiet: F) -> Self
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        let handle = tokio::spawn(async move {
            debounce(rx, window, on_quiet).await;
            tracing::debug!("Mutation watcher stopped");
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for MutationWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
