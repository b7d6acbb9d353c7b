use signal_registry::{Callback, Signal};

use super::Ledger;

/// What the synthesized handler does with a delivered signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DefaultAction {
    /// Exit the process with a success status.
    Exit,
    /// Carry on as if nothing happened.
    Ignore,
}

impl DefaultAction {
    pub fn for_signal(signum: Signal) -> Self {
        if is_user_signal(signum) {
            DefaultAction::Ignore
        } else {
            DefaultAction::Exit
        }
    }
}

#[cfg(unix)]
fn is_user_signal(signum: Signal) -> bool {
    signum == libc::SIGUSR1 || signum == libc::SIGUSR2
}

#[cfg(not(unix))]
fn is_user_signal(_signum: Signal) -> bool {
    false
}

/// The handler used for signals nobody handled before.
///
/// Exits the process with status 0, except for `SIGUSR1` and `SIGUSR2`, which
/// are ignored.
pub fn default_handler() -> Callback {
    Callback::new(|signum| match DefaultAction::for_signal(signum) {
        DefaultAction::Exit => {
            log::debug!("exiting on unhandled signal {}", signum);
            std::process::exit(0);
        }
        DefaultAction::Ignore => {}
    })
}

/// The entry a signal starts out with once a session takes it over: the
/// process's existing handler if there is one, or else [`default_handler`].
pub(crate) fn initial_entry<L: Ledger>(ledger: &L, signum: Signal) -> Vec<Callback> {
    vec![ledger
        .existing_handler(signum)
        .unwrap_or_else(default_handler)]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn user_signals_are_ignored() {
        assert_eq!(DefaultAction::for_signal(libc::SIGUSR1), DefaultAction::Ignore);
        assert_eq!(DefaultAction::for_signal(libc::SIGUSR2), DefaultAction::Ignore);
    }

    #[test]
    fn other_signals_exit() {
        for &signum in &[libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT] {
            assert_eq!(DefaultAction::for_signal(signum), DefaultAction::Exit);
        }
    }

    #[test]
    fn default_handler_returns_for_user_signals() {
        let handler = default_handler();
        handler.call(libc::SIGUSR1);
        handler.call(libc::SIGUSR2);
    }

    #[test]
    fn each_default_handler_is_distinct() {
        assert_ne!(default_handler(), default_handler());
    }
}
