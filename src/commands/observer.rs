//! Error notification surfaces.
//!
//! The host reports every failed command to the chain of the matching
//! surface. Observers run one after another in registration order.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::error;

use super::tree::{Command, CommandError};
use super::types::{CommandKey, Interaction};

/// The host entry point a failure is reported through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    /// Failures of application commands.
    Application,
    /// Failures of hybrid commands, whether invoked by text or interaction.
    Hybrid,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => f.write_str("application"),
            Self::Hybrid => f.write_str("hybrid"),
        }
    }
}

/// What the host knows about a failed invocation.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// Surface the failure was reported through.
    pub surface: Surface,

    /// The command that failed, when the invocation could be resolved to one.
    pub command: Option<Arc<Command>>,

    /// The interaction that triggered the invocation, if any.
    pub interaction: Option<Interaction>,
}

impl FailureContext {
    /// Key of the failed command.
    #[must_use]
    pub fn command_key(&self) -> Option<&CommandKey> {
        self.command.as_ref().map(|command| command.key())
    }
}

/// Logs a failure no observer handled. This is the host's default
/// unhandled-error path.
pub fn report_unhandled(surface: Surface, error: &CommandError) {
    error!("Unhandled {} command error: {}", surface, error);
}

/// Something that wants to hear about command failures.
pub trait ErrorObserver: Send + Sync {
    fn on_error<'a>(
        &'a self,
        ctx: &'a FailureContext,
        error: &'a CommandError,
    ) -> BoxFuture<'a, ()>;
}

/// Ordered list of observers for one surface.
pub struct ErrorChain {
    surface: Surface,
    observers: RwLock<Vec<Arc<dyn ErrorObserver>>>,
}

impl ErrorChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// The surface this chain serves.
    #[must_use]
    pub const fn surface(&self) -> Surface {
        self.surface
    }

    /// Appends an observer.
    pub fn register(&self, observer: Arc<dyn ErrorObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Replaces every registered observer with the one built by `wrap`,
    /// which receives the observers it replaces.
    ///
    /// Runs under the chain's write lock, so no registration can slip in
    /// between taking the old observers and installing the new one.
    pub fn take_over<F>(&self, wrap: F)
    where
        F: FnOnce(Vec<Arc<dyn ErrorObserver>>) -> Arc<dyn ErrorObserver>,
    {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::take(&mut *observers);
        observers.push(wrap(previous));
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports a failure to every observer, in order.
    ///
    /// With no observers the failure is logged, which is the host's
    /// unhandled-error path.
    pub async fn notify(&self, ctx: &FailureContext, error: &CommandError) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if observers.is_empty() {
            report_unhandled(self.surface, error);
            return;
        }

        for observer in &observers {
            observer.on_error(ctx, error).await;
        }
    }
}

impl fmt::Debug for ErrorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChain")
            .field("surface", &self.surface)
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io;
    use std::sync::Mutex;

    use tracing::subscriber::DefaultGuard;

    use super::*;

    /// Log output collected by [`capture_logs`].
    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sends this thread's log output to a buffer until the guard drops.
    pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    /// Observer that records the command key of every failure it sees.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub label: &'static str,
        pub seen: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingObserver {
        pub fn new(label: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                seen: Arc::clone(seen),
            }
        }
    }

    impl ErrorObserver for RecordingObserver {
        fn on_error<'a>(
            &'a self,
            ctx: &'a FailureContext,
            _error: &'a CommandError,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let key = ctx
                    .command_key()
                    .map_or_else(|| "-".to_owned(), ToString::to_string);
                self.seen.lock().unwrap().push(format!("{}:{}", self.label, key));
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{RecordingObserver, capture_logs};
    use super::*;

    fn failure() -> (FailureContext, CommandError) {
        let ctx = FailureContext {
            surface: Surface::Application,
            command: None,
            interaction: None,
        };
        (ctx, CommandError::UnknownCommand("gone".to_owned()))
    }

    #[tokio::test]
    async fn test_observers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = ErrorChain::new(Surface::Application);
        chain.register(Arc::new(RecordingObserver::new("first", &seen)));
        chain.register(Arc::new(RecordingObserver::new("second", &seen)));

        let (ctx, error) = failure();
        chain.notify(&ctx, &error).await;

        assert_eq!(*seen.lock().unwrap(), vec!["first:-", "second:-"]);
    }

    #[tokio::test]
    async fn test_take_over_hands_previous_observers_to_wrapper() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = ErrorChain::new(Surface::Hybrid);
        chain.register(Arc::new(RecordingObserver::new("old", &seen)));

        let mut handed = 0;
        chain.take_over(|previous| {
            handed = previous.len();
            Arc::new(RecordingObserver::new("new", &seen))
        });

        assert_eq!(handed, 1);
        assert_eq!(chain.len(), 1);

        let (ctx, error) = failure();
        chain.notify(&ctx, &error).await;
        assert_eq!(*seen.lock().unwrap(), vec!["new:-"]);
    }

    #[tokio::test]
    async fn test_empty_chain_logs_unhandled_error() {
        let (logs, _guard) = capture_logs();
        let chain = ErrorChain::new(Surface::Application);
        assert!(chain.is_empty());

        let (ctx, error) = failure();
        chain.notify(&ctx, &error).await;

        let output = logs.contents();
        assert!(output.contains("Unhandled application command error"));
        assert!(output.contains("gone"));
    }
}
