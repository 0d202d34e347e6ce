//! Command handlers and the replaceable slot each command dispatches through.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::BoxFuture;

use super::types::{CallArgs, Interaction};

type AsyncFn<A> = dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;
type BlockingFn<A> = dyn Fn(A) -> anyhow::Result<()> + Send + Sync;

/// A callable the host can run with an argument of type `A`.
///
/// The host accepts both flavours for command handlers. Blocking callables
/// run inline on the runtime thread.
pub enum Callback<A> {
    /// Returns a future that the host awaits.
    Async(Arc<AsyncFn<A>>),
    /// Runs to completion when called.
    Blocking(Arc<BlockingFn<A>>),
}

/// Handler installed in a command's slot.
pub type CommandHandler = Callback<CallArgs>;

/// Fallback run with the interaction while a command is tripped.
pub type TripCallback = Callback<Interaction>;

impl<A: Send + 'static> Callback<A> {
    /// Wraps an async function.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |arg: A| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(arg)) },
        ))
    }

    /// Wraps a blocking function.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    /// Runs the callable.
    pub async fn call(&self, arg: A) -> anyhow::Result<()> {
        match self {
            Self::Async(f) => f(arg).await,
            Self::Blocking(f) => f(arg),
        }
    }
}

impl<A> Callback<A> {
    /// Whether the callable is asynchronous.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Async(f) => Self::Async(Arc::clone(f)),
            Self::Blocking(f) => Self::Blocking(Arc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Callback::Async(..)"),
            Self::Blocking(_) => f.write_str("Callback::Blocking(..)"),
        }
    }
}

/// The active handler of a command.
///
/// Every dispatch loads the handler from here, so swapping it takes effect
/// on the next invocation without touching the command's metadata.
pub struct HandlerSlot {
    active: ArcSwap<CommandHandler>,
}

impl HandlerSlot {
    /// Creates a slot holding `handler`.
    #[must_use]
    pub fn new(handler: CommandHandler) -> Self {
        Self {
            active: ArcSwap::from_pointee(handler),
        }
    }

    /// Returns the active handler.
    #[must_use]
    pub fn load(&self) -> Arc<CommandHandler> {
        self.active.load_full()
    }

    /// Installs `handler`, returning the one it replaced.
    pub fn swap(&self, handler: Arc<CommandHandler>) -> Arc<CommandHandler> {
        self.active.swap(handler)
    }

    /// Installs `handler`.
    pub fn store(&self, handler: Arc<CommandHandler>) {
        self.active.store(handler);
    }

    /// Whether `handler` is the active one.
    #[must_use]
    pub fn is_active(&self, handler: &Arc<CommandHandler>) -> bool {
        Arc::ptr_eq(&self.active.load(), handler)
    }
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("active", &*self.active.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_async_and_blocking_callbacks_run() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let asynchronous = Callback::<u32>::from_async(move |n| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n as usize, Ordering::SeqCst);
                Ok(())
            }
        });

        let counter = Arc::clone(&calls);
        let blocking = Callback::<u32>::from_blocking(move |n| {
            counter.fetch_add(n as usize, Ordering::SeqCst);
            Ok(())
        });

        assert!(asynchronous.is_async());
        assert!(!blocking.is_async());

        asynchronous.call(2).await.unwrap();
        blocking.call(3).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_slot_swap_returns_previous() {
        let first: Arc<CommandHandler> = Arc::new(Callback::from_blocking(|_| Ok(())));
        let second: Arc<CommandHandler> =
            Arc::new(Callback::from_blocking(|_| Err(anyhow::anyhow!("boom"))));

        let slot = HandlerSlot::new((*first).clone());
        let original = slot.swap(Arc::clone(&second));
        assert!(slot.is_active(&second));
        assert!(slot.load().call(CallArgs::new()).await.is_err());

        slot.store(original);
        assert!(slot.load().call(CallArgs::new()).await.is_ok());
    }
}
