use std::collections::HashSet;
use std::mem;
use std::sync::mpsc;

use parking_lot::Mutex;
use signal_registry::{Callback, Handler, Handlers, Signal};

#[cfg(feature = "futures")]
use futures::channel::mpsc as async_mpsc;

use super::default_handler::initial_entry;
use super::Ledger;

/// One owner's use of a shared signal ledger.
///
/// Creating a session records the ledger as it is. Callbacks registered
/// through the session run before anything already handling the signal, and
/// [`Session::unregister`] puts the recorded ledger back, discarding every
/// change made since, by this session or anyone else.
///
/// Sessions over the same ledger may be nested as long as they are torn down
/// in reverse order of creation.
pub struct Session<L: Ledger> {
    ledger: L,
    snapshot: Handlers,
    /// Signals with no entry at capture time that were filled in since.
    backfilled: HashSet<Signal>,
    active: bool,
}

impl<L: Ledger> Session<L> {
    pub fn new(ledger: L) -> Self {
        let snapshot = ledger.export();
        log::debug!(
            "captured signal handlers for {} signal(s)",
            snapshot.len()
        );
        Self {
            ledger,
            snapshot,
            backfilled: HashSet::new(),
            active: true,
        }
    }

    /// The ledger as it was when the session was created, plus the initial
    /// entries of signals the session has taken over since.
    pub fn snapshot(&self) -> &Handlers {
        &self.snapshot
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn register<H: Handler + 'static>(
        &mut self,
        signum: Signal,
        handler: H,
    ) -> Result<(), L::Error> {
        self.register_callback(signum, Callback::new(handler))
    }

    /// Puts `callback` at the front of the list for `signum`.
    ///
    /// A signal with no entry first gets one holding the process's existing
    /// handler, or the default handler, so that this entry always ends up
    /// last in the list.
    pub fn register_callback(&mut self, signum: Signal, callback: Callback) -> Result<(), L::Error> {
        let ledger = &self.ledger;
        let snapshot = &mut self.snapshot;
        let backfilled = &mut self.backfilled;

        ledger.exclusive(|| {
            let initial = snapshot
                .entry(signum)
                .or_insert_with(|| {
                    backfilled.insert(signum);
                    initial_entry(ledger, signum)
                })
                .clone();

            let mut handlers = ledger.export();
            if !handlers.contains_key(&signum) {
                handlers.insert(signum, initial);
                ledger.import(handlers)?;
            }

            ledger.register(signum, callback)?;

            let mut handlers = ledger.export();
            if let Some(callbacks) = handlers.get_mut(&signum) {
                if let Some(newest) = callbacks.pop() {
                    callbacks.insert(0, newest);
                }
            }
            ledger.import(handlers)
        })?;

        log::debug!("registered signal handler for signal {}", signum);
        Ok(())
    }

    /// Registers a handler that forwards deliveries of `signum` to a channel.
    pub fn register_channel(&mut self, signum: Signal) -> Result<mpsc::Receiver<Signal>, L::Error> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        self.register(signum, move |s| {
            let _ = tx.lock().send(s);
        })?;
        Ok(rx)
    }

    #[cfg(feature = "futures")]
    pub fn register_stream(
        &mut self,
        signum: Signal,
    ) -> Result<async_mpsc::UnboundedReceiver<Signal>, L::Error> {
        let (tx, rx) = async_mpsc::unbounded();
        let tx = Mutex::new(tx);
        self.register(signum, move |s| {
            let _ = tx.lock().unbounded_send(s);
        })?;
        Ok(rx)
    }

    /// Restores the ledger recorded when the session was created.
    pub fn unregister(mut self) -> Result<(), L::Error> {
        self.restore()
    }

    /// Ends the session without restoring anything.
    pub fn forget(mut self) {
        self.active = false;
    }

    fn restore(&mut self) -> Result<(), L::Error> {
        self.active = false;
        let mut handlers = mem::take(&mut self.snapshot);
        // Absent at capture time, so absent again.
        for signum in self.backfilled.drain() {
            handlers.remove(&signum);
        }
        log::debug!(
            "restoring signal handlers for {} signal(s)",
            handlers.len()
        );
        let ledger = &self.ledger;
        ledger.exclusive(|| ledger.import(handlers))
    }
}

impl<L: Ledger> Drop for Session<L> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.restore() {
                log::warn!("failed to restore signal handlers: {:?}", e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{default_handler, MemoryLedger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use libc::{SIGHUP, SIGINT, SIGKILL, SIGTERM, SIGUSR1, SIGUSR2};
    use signal_registry::Error;

    fn noop() -> Callback {
        Callback::new(|_| {})
    }

    fn entry(ledger: &MemoryLedger, signum: Signal) -> Option<Vec<Callback>> {
        ledger.callbacks(signum)
    }

    #[test]
    fn construction_does_not_touch_the_ledger() {
        let existing = noop();
        let mut handlers = Handlers::new();
        handlers.insert(SIGTERM, vec![existing.clone()]);
        let ledger = MemoryLedger::with_handlers(handlers.clone());

        let session = Session::new(&ledger);
        assert_eq!(session.snapshot(), &handlers);
        assert_eq!(ledger.export(), handlers);
        session.forget();
    }

    #[test]
    fn first_registration_puts_default_last() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        let log_a = noop();

        session.register_callback(SIGINT, log_a.clone()).unwrap();

        let live = entry(&ledger, SIGINT).unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(live[0], log_a);
        assert_eq!(session.snapshot()[&SIGINT], vec![live[1].clone()]);

        session.unregister().unwrap();
        assert_eq!(entry(&ledger, SIGINT), None);
        assert!(ledger.export().is_empty());
    }

    #[test]
    fn existing_handler_stays_last_and_is_restored() {
        let existing = noop();
        let mut handlers = Handlers::new();
        handlers.insert(SIGTERM, vec![existing.clone()]);
        let ledger = MemoryLedger::with_handlers(handlers);
        let mut session = Session::new(&ledger);
        let cleanup = noop();

        session.register_callback(SIGTERM, cleanup.clone()).unwrap();
        assert_eq!(
            entry(&ledger, SIGTERM),
            Some(vec![cleanup, existing.clone()])
        );

        session.unregister().unwrap();
        assert_eq!(entry(&ledger, SIGTERM), Some(vec![existing]));
    }

    #[test]
    fn newest_registration_runs_first() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        let a = noop();
        let b = noop();

        session.register_callback(SIGHUP, a.clone()).unwrap();
        session.register_callback(SIGHUP, b.clone()).unwrap();

        let default = session.snapshot()[&SIGHUP][0].clone();
        assert_eq!(entry(&ledger, SIGHUP), Some(vec![b, a, default]));
    }

    #[test]
    fn default_is_synthesized_once() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        for _ in 0..3 {
            session.register_callback(SIGUSR1, noop()).unwrap();
        }

        let snapshot = &session.snapshot()[&SIGUSR1];
        assert_eq!(snapshot.len(), 1);
        let live = entry(&ledger, SIGUSR1).unwrap();
        assert_eq!(live.len(), 4);
        assert_eq!(live.iter().filter(|c| **c == snapshot[0]).count(), 1);
        assert_eq!(live[3], snapshot[0]);
    }

    #[test]
    fn untouched_signals_stay_absent() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        session.register_callback(SIGINT, noop()).unwrap();

        session.unregister().unwrap();
        assert_eq!(entry(&ledger, SIGHUP), None);
        assert!(!ledger.export().contains_key(&SIGHUP));
    }

    #[test]
    fn teardown_restores_order_across_signals() {
        let (first, second, third) = (noop(), noop(), noop());
        let mut handlers = Handlers::new();
        handlers.insert(SIGTERM, vec![first.clone(), second.clone()]);
        handlers.insert(SIGHUP, vec![third.clone()]);
        handlers.insert(SIGUSR2, Vec::new());
        let ledger = MemoryLedger::with_handlers(handlers.clone());

        let mut session = Session::new(&ledger);
        session.register_callback(SIGTERM, noop()).unwrap();
        session.register_callback(SIGINT, noop()).unwrap();
        session.register_callback(SIGTERM, noop()).unwrap();
        session.register_callback(SIGUSR2, noop()).unwrap();
        ledger.register(SIGHUP, noop()).unwrap();

        session.unregister().unwrap();
        assert_eq!(ledger.export(), handlers);
        assert_eq!(entry(&ledger, SIGUSR2), Some(Vec::new()));
    }

    #[test]
    fn teardown_discards_foreign_changes() {
        let ledger = MemoryLedger::new();
        let session = Session::new(&ledger);
        ledger.register(SIGTERM, noop()).unwrap();

        session.unregister().unwrap();
        assert!(ledger.export().is_empty());
    }

    #[test]
    fn delivery_runs_newest_first() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in vec!["a", "b"] {
            let order = order.clone();
            session
                .register(SIGUSR2, move |_| order.lock().push(tag))
                .unwrap();
        }

        // The default handler at the end ignores SIGUSR2.
        assert_eq!(ledger.deliver(SIGUSR2), 3);
        assert_eq!(*order.lock(), vec!["b", "a"]);
    }

    #[test]
    fn ledger_errors_propagate_unchanged() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);

        let err = session.register_callback(SIGKILL, noop()).unwrap_err();
        assert!(matches!(err, Error::Forbidden(SIGKILL)));

        let err = session.register_callback(0, noop()).unwrap_err();
        assert!(matches!(err, Error::InvalidSignal(0)));

        session.unregister().unwrap();
        assert!(ledger.export().is_empty());
    }

    #[test]
    fn sequential_sessions_restore_their_own_capture() {
        let ledger = MemoryLedger::new();

        let mut outer = Session::new(&ledger);
        outer.register_callback(SIGTERM, noop()).unwrap();
        let after_outer = ledger.export();

        let mut inner = Session::new(&ledger);
        inner.register_callback(SIGTERM, noop()).unwrap();
        inner.register_callback(SIGINT, noop()).unwrap();
        inner.unregister().unwrap();
        assert_eq!(ledger.export(), after_outer);

        outer.unregister().unwrap();
        assert!(ledger.export().is_empty());
    }

    #[test]
    fn nested_session_keeps_outer_default_last() {
        let ledger = MemoryLedger::new();
        let mut outer = Session::new(&ledger);
        outer.register_callback(SIGTERM, noop()).unwrap();
        let default = outer.snapshot()[&SIGTERM][0].clone();

        let mut inner = Session::new(&ledger);
        let late = noop();
        inner.register_callback(SIGTERM, late.clone()).unwrap();
        let live = entry(&ledger, SIGTERM).unwrap();
        assert_eq!(live.first(), Some(&late));
        assert_eq!(live.last(), Some(&default));

        inner.unregister().unwrap();
        outer.unregister().unwrap();
    }

    #[test]
    fn drop_restores_and_forget_does_not() {
        let ledger = MemoryLedger::new();
        {
            let mut session = Session::new(&ledger);
            session.register_callback(SIGINT, noop()).unwrap();
        }
        assert!(ledger.export().is_empty());

        let mut session = Session::new(&ledger);
        session.register_callback(SIGINT, noop()).unwrap();
        session.forget();
        assert_eq!(entry(&ledger, SIGINT).map(|c| c.len()), Some(2));
    }

    #[test]
    fn channel_receives_deliveries() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        let rx = session.register_channel(SIGUSR1).unwrap();

        ledger.deliver(SIGUSR1);
        assert_eq!(rx.try_recv(), Ok(SIGUSR1));
        assert!(rx.try_recv().is_err());
    }

    #[cfg(feature = "futures")]
    #[test]
    fn stream_receives_deliveries() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        let mut rx = session.register_stream(SIGUSR1).unwrap();

        ledger.deliver(SIGUSR1);
        assert_eq!(rx.try_next().unwrap(), Some(SIGUSR1));
        assert!(rx.try_next().is_err());

        session.unregister().unwrap();
    }

    struct AdoptingLedger {
        inner: MemoryLedger,
        existing: Callback,
    }

    impl Ledger for AdoptingLedger {
        type Error = Error;

        fn register(&self, signum: Signal, callback: Callback) -> Result<(), Error> {
            self.inner.register(signum, callback)
        }
        fn export(&self) -> Handlers {
            self.inner.export()
        }
        fn import(&self, handlers: Handlers) -> Result<(), Error> {
            self.inner.import(handlers)
        }
        fn existing_handler(&self, signum: Signal) -> Option<Callback> {
            if signum == SIGTERM {
                Some(self.existing.clone())
            } else {
                None
            }
        }
    }

    #[test]
    fn adopts_existing_process_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let ledger = AdoptingLedger {
            inner: MemoryLedger::new(),
            existing: Callback::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        };
        let existing = ledger.existing.clone();
        let mut session = Session::new(&ledger);
        let cleanup = noop();

        session.register_callback(SIGTERM, cleanup.clone()).unwrap();
        assert_eq!(
            ledger.inner.callbacks(SIGTERM),
            Some(vec![cleanup, existing])
        );
        ledger.inner.deliver(SIGTERM);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        session.unregister().unwrap();
        assert_eq!(ledger.inner.callbacks(SIGTERM), None);
    }

    #[test]
    fn synthesized_entry_is_a_fresh_default() {
        let ledger = MemoryLedger::new();
        let mut session = Session::new(&ledger);
        session.register_callback(SIGUSR2, noop()).unwrap();
        assert_ne!(session.snapshot()[&SIGUSR2][0], default_handler());
    }
}
