//! A process-wide registry of signal callbacks.
//!
//! Each signal number maps to an ordered list of callbacks. The first time a
//! signal is given a callback, a single C-level handler is installed for it.
//! Deliveries are handed to a dispatcher thread, which invokes every callback
//! in the list, first to last.
//!
//! Besides appending callbacks, the registry lets its owner read and overwrite
//! the entire signal → callbacks mapping in one step, see
//! [`SignalRegistry::handlers`] and [`SignalRegistry::set_handlers`].

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::ReentrantMutexGuard;

mod backend;
#[cfg(unix)]
mod dispatch;
mod error;
mod ledger;
mod signal_safe;

pub use error::Error;

/// A signal number.
pub type Signal = libc::c_int;

/// One past the largest signal number the registry will accept.
#[cfg(target_os = "linux")]
pub const NSIG: Signal = 65;
#[cfg(not(target_os = "linux"))]
pub const NSIG: Signal = 33;

/// Implemented for every function that can be called with a delivered signal.
pub trait Handler: Fn(Signal) + Send + Sync {}
impl<T: Fn(Signal) + Send + Sync> Handler for T {}

/// A shareable signal callback.
///
/// Callbacks are compared by identity: clones of one callback are equal,
/// while two separately created callbacks never are.
#[derive(Clone)]
pub struct Callback(Arc<dyn Handler>);

impl Callback {
    pub fn new<H: Handler + 'static>(handler: H) -> Self {
        Self(Arc::new(handler))
    }
    pub fn call(&self, signum: Signal) {
        (self.0)(signum)
    }
}

impl From<Arc<dyn Handler>> for Callback {
    fn from(handler: Arc<dyn Handler>) -> Self {
        Self(handler)
    }
}

impl Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

impl Eq for Callback {}
impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        // Comparing wide pointers has unpredictable results, so compare thin pointers.
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

/// The signal → callbacks mapping.
pub type Handlers = HashMap<Signal, Vec<Callback>>;

/// Checks that `signum` is a signal whose delivery can be routed to callbacks.
pub fn validate(signum: Signal) -> Result<(), Error> {
    if signum <= 0 || signum >= NSIG {
        return Err(Error::InvalidSignal(signum));
    }
    #[cfg(unix)]
    {
        // Uncatchable, or synchronous faults that cannot wait for another thread.
        if matches!(
            signum,
            libc::SIGKILL | libc::SIGSTOP | libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE
        ) {
            return Err(Error::Forbidden(signum));
        }
    }
    Ok(())
}

/// The signal every platform with signal support defines, if this one does.
pub fn baseline_signal() -> Option<Signal> {
    #[cfg(unix)]
    {
        Some(libc::SIGINT)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Handle to the process-wide registry.
///
/// The registry itself is global, so every handle observes the same state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalRegistry {
    _private: (),
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the platform lets the registry take over signals at all.
    pub fn is_supported() -> bool {
        ledger::is_supported()
    }

    /// Appends `callback` to the list for `signum`.
    pub fn register(&self, signum: Signal, callback: Callback) -> Result<(), Error> {
        ledger::register(signum, callback)
    }

    /// A copy of the current mapping. Signals without an entry are absent.
    pub fn handlers(&self) -> Handlers {
        ledger::export()
    }

    /// Replaces the whole mapping.
    ///
    /// Signals missing from `handlers` lose their entry; deliveries of those
    /// signals fall through to whatever the process had installed before the
    /// registry.
    pub fn set_handlers(&self, handlers: Handlers) -> Result<(), Error> {
        ledger::import(handlers)
    }

    /// A callback forwarding to the process's own handler for `signum`, as it
    /// was before the registry took the signal over.
    ///
    /// Returns `None` for the default and ignore dispositions, and for
    /// handlers that need kernel-supplied signal information.
    pub fn previous_handler(&self, signum: Signal) -> Option<Callback> {
        ledger::previous_handler(signum)
    }

    /// Blocks other threads from changing the registry until the guard is
    /// dropped. The holding thread may keep using the registry.
    pub fn lock(&self) -> ReentrantMutexGuard<'static, ()> {
        ledger::lock()
    }
}
