use parking_lot::Mutex;
use signal_registry::{validate, Callback, Error, Handlers, Signal};

use super::Ledger;

/// A [`Ledger`] that lives entirely in memory.
///
/// Signals are never installed with the OS; call [`MemoryLedger::deliver`] to
/// simulate one arriving. Signal numbers are validated the same way the
/// process-wide registry validates them.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    handlers: Mutex<Handlers>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: Handlers) -> Self {
        Self {
            handlers: Mutex::new(handlers),
        }
    }

    /// The callbacks for `signum`, or `None` if it has no entry.
    pub fn callbacks(&self, signum: Signal) -> Option<Vec<Callback>> {
        self.handlers.lock().get(&signum).cloned()
    }

    /// Invokes every callback for `signum`, first to last. Returns how many ran.
    pub fn deliver(&self, signum: Signal) -> usize {
        // Not under the lock: a callback may well use the ledger itself.
        let callbacks = self.callbacks(signum).unwrap_or_default();
        for callback in &callbacks {
            callback.call(signum);
        }
        callbacks.len()
    }
}

impl Ledger for MemoryLedger {
    type Error = Error;

    fn register(&self, signum: Signal, callback: Callback) -> Result<(), Error> {
        validate(signum)?;
        self.handlers
            .lock()
            .entry(signum)
            .or_insert_with(Vec::new)
            .push(callback);
        Ok(())
    }

    fn export(&self) -> Handlers {
        self.handlers.lock().clone()
    }

    fn import(&self, handlers: Handlers) -> Result<(), Error> {
        for &signum in handlers.keys() {
            validate(signum)?;
        }
        *self.handlers.lock() = handlers;
        Ok(())
    }
}
