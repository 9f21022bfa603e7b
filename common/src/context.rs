use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;

/// Why a context stopped being valid.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CancelReason {
    /// The parent context was canceled.
    Parent,
    /// The deadline passed.
    Deadline,
    /// The handler was canceled explicitly.
    Cancel,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parent => write!(f, "Parent"),
            Self::Deadline => write!(f, "Deadline"),
            Self::Cancel => write!(f, "Cancel"),
        }
    }
}

struct CtxInner {
    // Dropped when the context (and all its clones) goes away, which is what
    // wakes up `Handler::done`.
    _alive: oneshot::Sender<()>,
    deadline: Option<Instant>,
    parent: Option<Context>,
    cancel_recv: broadcast::Receiver<()>,
}

impl CtxInner {
    fn done(&self) -> Pin<Box<dyn Future<Output = CancelReason> + '_ + Send>> {
        let mut cancel = self.cancel_recv.resubscribe();

        Box::pin(async move {
            let deadline = async {
                match self.deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let parent = async {
                match &self.parent {
                    Some(parent) => {
                        parent.done().await;
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = parent => CancelReason::Parent,
                _ = deadline => CancelReason::Deadline,
                _ = cancel.recv() => CancelReason::Cancel,
            }
        })
    }
}

/// The other half of a [`Context`]. Dropping or canceling the handler cancels
/// the context; `done` resolves once every clone of the context is dropped.
pub struct Handler {
    recv: oneshot::Receiver<()>,
    cancel_send: broadcast::Sender<()>,
}

impl Handler {
    /// Waits for all clones of the context to be dropped.
    pub async fn done(&mut self) {
        let _ = (&mut self.recv).await;
    }

    /// Cancels the context and waits for all clones to be dropped.
    pub async fn cancel(self) {
        drop(self.cancel_send);

        let _ = self.recv.await;
    }
}

/// A cancellation context in the style of Go's `context.Context`: cheap to
/// clone, optionally carries a deadline, and may inherit cancellation from a
/// parent.
#[derive(Clone)]
pub struct Context(Arc<CtxInner>);

impl Context {
    #[must_use]
    pub fn new() -> (Self, Handler) {
        Self::build(None, None)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> (Self, Handler) {
        Self::build(None, Some(deadline))
    }

    #[must_use]
    pub fn with_timeout(timeout: std::time::Duration) -> (Self, Handler) {
        Self::with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_parent(parent: Context, deadline: Option<Instant>) -> (Self, Handler) {
        Self::build(Some(parent), deadline)
    }

    fn build(parent: Option<Context>, deadline: Option<Instant>) -> (Self, Handler) {
        let (alive, recv) = oneshot::channel();
        let (cancel_send, cancel_recv) = broadcast::channel(1);

        (
            Self(Arc::new(CtxInner {
                _alive: alive,
                deadline,
                parent,
                cancel_recv,
            })),
            Handler { recv, cancel_send },
        )
    }

    /// The deadline of this context, if any. Does not consult the parent.
    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    /// Resolves when the context is canceled, reporting why.
    pub async fn done(&self) -> CancelReason {
        self.0.done().await
    }
}
