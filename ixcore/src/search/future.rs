//! Waiting for a search's result size to become known

use crate::search::context::{SearchResultContext, SearchStatus, StatusListener};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

/// One-shot listener released by the first settled status
struct DeterminedLatch {
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

impl DeterminedLatch {
    fn release(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(());
        }
    }
}

impl StatusListener for DeterminedLatch {
    fn on_status_change(&self, new_status: SearchStatus, _old_status: SearchStatus) {
        if new_status.is_settled() {
            self.release();
        }
    }
}

/// Completes once the context is `Determined`, `Done` or `Failed`.
///
/// Created through [`SearchResultContext::determined_future`]. The future
/// unregisters itself from the context when it completes or is dropped.
pub struct DeterminedFuture {
    context: Arc<SearchResultContext>,
    latch: Option<Arc<dyn StatusListener>>,
    receiver: oneshot::Receiver<()>,
}

impl DeterminedFuture {
    pub(crate) fn new(context: Arc<SearchResultContext>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let latch = Arc::new(DeterminedLatch {
            sender: Mutex::new(Some(sender)),
        });
        let listener: Arc<dyn StatusListener> = latch.clone();
        context.add_listener(&listener);

        // the status may have settled before the listener was in place
        if context.is_determined() {
            latch.release();
        }

        Self {
            context,
            latch: Some(listener),
            receiver,
        }
    }

    pub fn context(&self) -> &Arc<SearchResultContext> {
        &self.context
    }

    /// Block the current thread until the size is known. Must not be called
    /// from inside an async runtime.
    pub fn wait(self) {
        futures::executor::block_on(self)
    }

    /// Wait at most `timeout`; `true` when the size became known in time
    pub async fn wait_for(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self).await.is_ok()
    }

    fn unregister(&mut self) {
        if let Some(latch) = self.latch.take() {
            self.context.remove_listener(&latch);
        }
    }
}

impl Future for DeterminedFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match Pin::new(&mut self.receiver).poll(cx) {
            // a dropped sender means the latch is gone, nothing left to wait for
            Poll::Ready(_) => {
                self.unregister();
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for DeterminedFuture {
    fn drop(&mut self) {
        self.unregister();
    }
}
