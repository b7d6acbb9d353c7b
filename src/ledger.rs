use std::fmt::Debug;
use std::sync::Arc;

use signal_registry::{Callback, Handlers, Signal, SignalRegistry};

/// Access to a signal → callbacks table owned by someone else.
///
/// Besides appending a callback the way any user of the table would,
/// implementors expose the whole table for reading and overwriting, which is
/// what makes a [`Session`](crate::Session) reversible.
pub trait Ledger {
    type Error: Debug;

    /// Appends `callback` to the list for `signum`.
    fn register(&self, signum: Signal, callback: Callback) -> Result<(), Self::Error>;

    /// A copy of the whole table.
    fn export(&self) -> Handlers;

    /// Overwrites the whole table in one write.
    fn import(&self, handlers: Handlers) -> Result<(), Self::Error>;

    /// A handler the process already had for `signum` outside of this table.
    fn existing_handler(&self, _signum: Signal) -> Option<Callback> {
        None
    }

    /// Runs `f` with other threads kept away from the table.
    fn exclusive<R, F: FnOnce() -> R>(&self, f: F) -> R {
        f()
    }
}

impl Ledger for SignalRegistry {
    type Error = signal_registry::Error;

    fn register(&self, signum: Signal, callback: Callback) -> Result<(), Self::Error> {
        SignalRegistry::register(self, signum, callback)
    }
    fn export(&self) -> Handlers {
        self.handlers()
    }
    fn import(&self, handlers: Handlers) -> Result<(), Self::Error> {
        self.set_handlers(handlers)
    }
    fn existing_handler(&self, signum: Signal) -> Option<Callback> {
        self.previous_handler(signum)
    }
    fn exclusive<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let _guard = self.lock();
        f()
    }
}

impl<'a, L: Ledger + ?Sized> Ledger for &'a L {
    type Error = L::Error;

    fn register(&self, signum: Signal, callback: Callback) -> Result<(), Self::Error> {
        (**self).register(signum, callback)
    }
    fn export(&self) -> Handlers {
        (**self).export()
    }
    fn import(&self, handlers: Handlers) -> Result<(), Self::Error> {
        (**self).import(handlers)
    }
    fn existing_handler(&self, signum: Signal) -> Option<Callback> {
        (**self).existing_handler(signum)
    }
    fn exclusive<R, F: FnOnce() -> R>(&self, f: F) -> R {
        (**self).exclusive(f)
    }
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    type Error = L::Error;

    fn register(&self, signum: Signal, callback: Callback) -> Result<(), Self::Error> {
        (**self).register(signum, callback)
    }
    fn export(&self) -> Handlers {
        (**self).export()
    }
    fn import(&self, handlers: Handlers) -> Result<(), Self::Error> {
        (**self).import(handlers)
    }
    fn existing_handler(&self, signum: Signal) -> Option<Callback> {
        (**self).existing_handler(signum)
    }
    fn exclusive<R, F: FnOnce() -> R>(&self, f: F) -> R {
        (**self).exclusive(f)
    }
}
