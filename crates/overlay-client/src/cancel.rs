//! Cooperative cancellation.
//!
//! A [`CancelToken`] is passed explicitly into every long-running call. Tokens
//! form a tree: cancelling a token cancels every token derived from it, while
//! cancelling a derived token leaves its ancestors untouched. That lets one
//! process-wide token (fired on Ctrl-C) abort a search and a download at once
//! without one operation being able to abort an unrelated sibling.

use std::future::Future;
use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct CancelToken {
    trigger: Arc<watch::Sender<bool>>,
    /// Own receiver first, then every ancestor's.
    chain: Vec<watch::Receiver<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            trigger: Arc::new(tx),
            chain: vec![rx],
        }
    }

    /// A token that fires when `self` fires, and can also be fired on its own.
    pub fn child(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut chain = Vec::with_capacity(1 + self.chain.len());
        chain.push(rx);
        chain.extend(self.chain.iter().cloned());
        Self {
            trigger: Arc::new(tx),
            chain,
        }
    }

    pub fn cancel(&self) {
        self.trigger.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.chain.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once this token or any ancestor has been cancelled.
    pub async fn cancelled(&self) {
        let waits = self.chain.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                // A dropped trigger can never fire.
                if rx.wait_for(|fired| *fired).await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }

    /// Run `fut` unless the token fires first. `None` means cancelled; the
    /// future is dropped without being polled again.
    pub async fn run<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}
