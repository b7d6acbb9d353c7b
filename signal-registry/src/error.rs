use std::io;

use thiserror::Error;

use super::Signal;

/// Errors reported by the registry when it is asked to manage a signal.
#[derive(Error, Debug)]
pub enum Error {
    /// The number does not name a signal on this platform.
    #[error("invalid signal number: {0}")]
    InvalidSignal(Signal),

    /// The signal exists but cannot be handled by deferred callbacks.
    #[error("signal {0} cannot be handled by registered callbacks")]
    Forbidden(Signal),

    /// No signal backend is available on this platform.
    #[error("signal handling is not supported on this platform")]
    Unsupported,

    /// The OS refused to install our handler.
    #[error("failed to install handler for signal {signal}: {source}")]
    Install {
        signal: Signal,
        #[source]
        source: io::Error,
    },

    /// The dispatcher thread could not be started.
    #[error("failed to start signal dispatcher: {0}")]
    Dispatcher(#[source] io::Error),
}
