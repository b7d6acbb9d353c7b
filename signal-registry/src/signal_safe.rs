use std::ops::Deref;

use parking_lot::lock_api::RawMutex;
use parking_lot::Mutex;

/// A value that can be read from inside a signal handler.
///
/// Two copies of the value are kept. Writers are serialized by a mutex and
/// only ever hold a lock on one copy at a time, so a reader (possibly one that
/// interrupted a writer on the same thread) always finds a copy it can lock
/// without waiting.
pub struct DoubleBuffer<T> {
    copies: [spin::RwLock<T>; 2],
    writer: Mutex<()>,
}

impl<T> DoubleBuffer<T> {
    pub const fn const_new(primary: T, secondary: T) -> Self {
        Self {
            copies: [spin::RwLock::new(primary), spin::RwLock::new(secondary)],
            writer: Mutex::const_new(RawMutex::INIT, ()),
        }
    }

    pub fn read(&self) -> Snapshot<'_, T> {
        loop {
            for copy in &self.copies {
                if let Some(inner) = copy.try_read() {
                    return Snapshot { inner };
                }
            }
        }
    }
}

impl<T: Clone> DoubleBuffer<T> {
    /// Applies `f` to the value and publishes the result to both copies.
    ///
    /// Returns the result of `f` together with the displaced value, which the
    /// caller drops once the writer lock has been released. Anything `f`
    /// replaces in place is dropped under the lock, so `f` should hand such
    /// values back through its result instead.
    ///
    /// Must not be called from a signal handler.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> (R, T) {
        let _writer = self.writer.lock();
        let (result, committed) = {
            let mut staging = self.copies[1].write();
            let result = f(&mut staging);
            // A panicking `clone` leaves the primary copy untouched.
            (result, staging.clone())
        };
        // Upgrade from an upgradeable read so that readers cannot starve us.
        let stale = std::mem::replace(&mut *self.copies[0].upgradeable_read().upgrade(), committed);
        (result, stale)
    }
}

pub struct Snapshot<'a, T> {
    inner: spin::RwLockReadGuard<'a, T>,
}

impl<'a, T> Deref for Snapshot<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}
