//! Process-wide shutdown signal handling.

use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::signal::unix::{Signal, SignalKind};
use tracing::debug;

/// A future that resolves when the process receives SIGINT or SIGTERM.
pub struct ShutdownSignal {
    ctrl_c: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    term_signal: Signal,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Install the signal handlers.
    ///
    /// # Panics
    /// Panics when the SIGTERM handler cannot be installed, which only
    /// happens outside a Tokio runtime.
    pub fn new() -> Self {
        let ctrl_c = Box::pin(tokio::signal::ctrl_c());
        let term_signal = tokio::signal::unix::signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        Self { ctrl_c, term_signal }
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.ctrl_c.poll_unpin(cx).is_ready() {
            debug!("received SIGINT");
            return Poll::Ready(());
        }

        if this.term_signal.poll_recv(cx).is_ready() {
            debug!("received SIGTERM");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

/// Drive `fut` until it completes or a shutdown signal arrives. On
/// shutdown the callback runs and the process exits cleanly; the watcher
/// loops never complete on their own, so exiting here is the normal way
/// down.
pub async fn run_until_shutdown<F, O, C>(fut: F, shutdown: ShutdownSignal, on_shutdown: C) -> O
where
    F: Future<Output = O>,
    C: FnOnce(),
{
    tokio::select! {
        // Boxed so the combined future state machine stays off the stack.
        result = Box::pin(fut) => result,
        _ = shutdown => {
            on_shutdown();
            std::process::exit(0);
        }
    }
}
