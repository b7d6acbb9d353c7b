//! Process-wide decision on whether signal handling should be used at all.

use std::sync::Arc;

use parking_lot::lock_api::RawMutex;
use parking_lot::Mutex;

use super::config::Environment;

type Resolver = Arc<dyn Fn() -> bool + Send + Sync>;

static RESOLVER: Mutex<Option<Resolver>> = Mutex::const_new(RawMutex::INIT, None);

/// Replaces the process-wide availability check.
pub fn resolve_availability_using<F>(resolver: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    *RESOLVER.lock() = Some(Arc::new(resolver));
}

/// Goes back to [`default_resolver`].
pub fn reset_availability_resolver() {
    RESOLVER.lock().take();
}

/// The check used when none has been installed: an interactive console, not
/// under automated tests, on a platform where the registry can take over
/// signals.
pub fn default_resolver() -> bool {
    Environment::detect().signals_available()
}

/// Asks the installed resolver, or [`default_resolver`].
pub fn is_available() -> bool {
    // Called outside the lock, so a resolver may install another one.
    let resolver = RESOLVER.lock().clone();
    match resolver {
        Some(resolver) => resolver(),
        None => default_resolver(),
    }
}

/// Runs `callback` if signal handling is available. Returns whether it ran.
pub fn when_available<F: FnOnce()>(callback: F) -> bool {
    let available = is_available();
    if available {
        callback();
    } else {
        log::trace!("signal handling unavailable, skipping");
    }
    available
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    #[serial]
    fn skips_callback_when_unavailable() {
        resolve_availability_using(|| false);
        let mut calls = 0;
        assert!(!when_available(|| calls += 1));
        assert_eq!(calls, 0);
        reset_availability_resolver();
    }

    #[test]
    #[serial]
    fn runs_callback_once_when_available() {
        resolve_availability_using(|| true);
        let mut calls = 0;
        assert!(when_available(|| calls += 1));
        assert_eq!(calls, 1);
        reset_availability_resolver();
    }

    #[test]
    #[serial]
    fn resolver_is_consulted_each_time() {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = asked.clone();
        resolve_availability_using(move || counter.fetch_add(1, Ordering::SeqCst) % 2 == 0);

        assert!(is_available());
        assert!(!is_available());
        assert!(is_available());
        assert_eq!(asked.load(Ordering::SeqCst), 3);
        reset_availability_resolver();
    }

    #[test]
    #[serial]
    fn environment_resolver_can_be_installed() {
        resolve_availability_using(
            Environment {
                interactive: false,
                running_tests: false,
            }
            .resolver(),
        );
        assert!(!when_available(|| panic!("should not run")));
        reset_availability_resolver();
    }

    #[test]
    #[serial]
    fn default_resolver_respects_test_override() {
        reset_availability_resolver();
        std::env::set_var(crate::config::TESTING_VAR, "1");
        assert!(!is_available());
        std::env::remove_var(crate::config::TESTING_VAR);
    }
}
