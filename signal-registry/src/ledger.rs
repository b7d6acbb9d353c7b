use std::collections::HashMap;
use std::mem;

use parking_lot::lock_api::{GetThreadId, RawMutex};
use parking_lot::{RawThreadId, ReentrantMutex, ReentrantMutexGuard};

use super::backend::{PlatformSigData, PlatformSigHandler, SigHandler};
use super::signal_safe::DoubleBuffer;
use super::{validate, Callback, Error, Handlers, Signal};

#[derive(Clone)]
struct Slot {
    /// `None` when the signal has no entry in the ledger, even though our
    /// handler stays installed for it.
    callbacks: Option<Vec<Callback>>,
    /// What was installed before us.
    prev: PlatformSigHandler,
}

type Slots = HashMap<Signal, Slot>;

static SLOTS: DoubleBuffer<Option<Slots>> = DoubleBuffer::const_new(None, None);

// Serializes multi-step changes to the ledger. Re-entrant so that a caller
// holding it can still use `register`, `export` and `import`.
static EXCLUSIVE: ReentrantMutex<()> =
    ReentrantMutex::const_new(RawMutex::INIT, RawThreadId::INIT, ());

pub(crate) fn lock() -> ReentrantMutexGuard<'static, ()> {
    EXCLUSIVE.lock()
}

#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn on_signal(signum: Signal, data: PlatformSigData) {
    let slots = SLOTS.read();
    if let Some(slot) = slots.as_ref().and_then(|slots| slots.get(&signum)) {
        if slot.callbacks.is_some() {
            notify(signum);
        } else {
            unsafe {
                slot.prev.delegate(signum, data);
            }
        }
    }
}

#[cfg(unix)]
fn notify(signum: Signal) {
    super::dispatch::notify(signum);
}

#[cfg(not(unix))]
#[allow(dead_code)]
fn notify(_signum: Signal) {}

#[cfg(unix)]
fn start_dispatcher() -> Result<(), Error> {
    super::dispatch::start()
}

#[cfg(not(unix))]
fn start_dispatcher() -> Result<(), Error> {
    Err(Error::Unsupported)
}

pub(crate) fn callbacks(signum: Signal) -> Option<Vec<Callback>> {
    SLOTS
        .read()
        .as_ref()
        .and_then(|slots| slots.get(&signum))
        .and_then(|slot| slot.callbacks.clone())
}

pub(crate) fn register(signum: Signal, callback: Callback) -> Result<(), Error> {
    validate(signum)?;
    let _guard = lock();
    let (pending, _stale) = SLOTS.update(|slots| {
        match slots
            .get_or_insert_with(Default::default)
            .get_mut(&signum)
        {
            Some(slot) => {
                slot.callbacks
                    .get_or_insert_with(Vec::new)
                    .push(callback);
                None
            }
            None => Some(callback),
        }
    });
    if let Some(callback) = pending {
        install(signum, vec![callback])?;
    }
    Ok(())
}

pub(crate) fn export() -> Handlers {
    SLOTS
        .read()
        .iter()
        .flatten()
        .filter_map(|(&signum, slot)| Some((signum, slot.callbacks.clone()?)))
        .collect()
}

pub(crate) fn import(mut handlers: Handlers) -> Result<(), Error> {
    for &signum in handlers.keys() {
        validate(signum)?;
    }
    let _guard = lock();
    // Displaced callbacks are dropped only after the update has let go of the
    // store, since dropping one may run code that uses the registry again.
    let ((missing, displaced), stale) = SLOTS.update(|slots| {
        let mut displaced = Vec::new();
        for (signum, slot) in slots.get_or_insert_with(Default::default).iter_mut() {
            let replaced = mem::replace(&mut slot.callbacks, handlers.remove(signum));
            displaced.extend(replaced);
        }
        let missing: Vec<_> = handlers.drain().collect();
        (missing, displaced)
    });
    drop(displaced);
    drop(stale);
    for (signum, callbacks) in missing {
        install(signum, callbacks)?;
    }
    Ok(())
}

/// A callback forwarding to the handler the process had for `signum` before
/// the registry took it over, if that handler can be called directly.
pub(crate) fn previous_handler(signum: Signal) -> Option<Callback> {
    let installed = SLOTS
        .read()
        .as_ref()
        .and_then(|slots| slots.get(&signum))
        .map(|slot| slot.prev.clone());
    match installed {
        Some(prev) => prev.forwarder(),
        None => PlatformSigHandler::detect(signum).ok()?.forwarder(),
    }
}

pub(crate) fn is_supported() -> bool {
    PlatformSigHandler::probe()
}

fn install(signum: Signal, callbacks: Vec<Callback>) -> Result<(), Error> {
    start_dispatcher()?;
    let detected =
        PlatformSigHandler::detect(signum).map_err(|source| Error::Install { signal: signum, source })?;

    // The slot must exist before our handler does, or early deliveries would be lost.
    let (replaced, _stale) = SLOTS.update(|slots| {
        slots.get_or_insert_with(Default::default).insert(
            signum,
            Slot {
                callbacks: Some(callbacks),
                prev: detected,
            },
        )
    });
    drop(replaced);

    match PlatformSigHandler::ours().install(signum) {
        Ok(prev) => {
            let _ = SLOTS.update(|slots| {
                if let Some(slot) = slots.as_mut().and_then(|slots| slots.get_mut(&signum)) {
                    slot.prev = prev;
                }
            });
            log::debug!("installed handler for signal {}", signum);
            Ok(())
        }
        Err(source) => {
            let (removed, _stale) = SLOTS.update(|slots| {
                slots.as_mut().and_then(|slots| slots.remove(&signum))
            });
            drop(removed);
            Err(Error::Install {
                signal: signum,
                source,
            })
        }
    }
}
