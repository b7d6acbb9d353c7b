use std::io;

use libc::c_int;

use super::Callback;

/// A process-level disposition for one signal number.
pub trait SigHandler: Clone + Send + Sync {
    type Data;

    /// The disposition which routes the signal into the registry.
    fn ours() -> Self;
    /// Performs whatever this disposition would have done for `signum`.
    ///
    /// Must be async-signal-safe.
    unsafe fn delegate(&self, signum: c_int, data: Self::Data);
    /// Installs this disposition, returning the one it replaced.
    fn install(&self, signum: c_int) -> io::Result<Self>;
    /// Reads the currently installed disposition.
    fn detect(signum: c_int) -> io::Result<Self>;
    /// Whether the platform lets us inspect and install dispositions at all.
    fn probe() -> bool;
    /// A callback which forwards to this disposition, if it is a foreign
    /// handler that can be called outside of signal context.
    fn forwarder(&self) -> Option<Callback>;
}

#[cfg(unix)]
use super::ledger::on_signal;
pub use handler_impl::PlatformSigHandler;
pub type PlatformSigData = <PlatformSigHandler as SigHandler>::Data;

#[cfg(not(unix))]
mod handler_impl {
    use super::*;

    #[derive(Clone)]
    pub struct PlatformSigHandler;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "signals are not supported")
    }

    impl SigHandler for PlatformSigHandler {
        type Data = ();

        fn ours() -> Self {
            Self
        }

        unsafe fn delegate(&self, _signum: c_int, _data: Self::Data) {}

        fn install(&self, _signum: c_int) -> io::Result<Self> {
            Err(unsupported())
        }

        fn detect(_signum: c_int) -> io::Result<Self> {
            Err(unsupported())
        }

        fn probe() -> bool {
            false
        }

        fn forwarder(&self) -> Option<Callback> {
            None
        }
    }
}

#[cfg(unix)]
mod handler_impl {
    use super::*;
    use libc::c_void;
    use std::mem;

    type SigHandlerPtr = extern "C" fn(c_int);
    type SigActionPtr = extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void);

    extern "C" fn handler_thunk(signum: c_int, info: *mut libc::siginfo_t, ucontext: *mut c_void) {
        on_signal(signum, (info, ucontext));
    }

    #[derive(Clone)]
    pub struct PlatformSigHandler(libc::sigaction);

    // The raw action only holds function pointers and plain flags.
    unsafe impl Send for PlatformSigHandler {}
    unsafe impl Sync for PlatformSigHandler {}

    impl PlatformSigHandler {
        fn is_ours(&self) -> bool {
            self.0.sa_sigaction == handler_thunk as SigActionPtr as libc::sighandler_t
        }
    }

    impl SigHandler for PlatformSigHandler {
        type Data = (*mut libc::siginfo_t, *mut c_void);

        fn ours() -> Self {
            Self(unsafe {
                let mut res: libc::sigaction = mem::zeroed();
                res.sa_sigaction = handler_thunk as SigActionPtr as libc::sighandler_t;
                res.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
                libc::sigfillset(&mut res.sa_mask);
                res
            })
        }

        unsafe fn delegate(&self, signum: c_int, data: Self::Data) {
            if self.0.sa_sigaction == libc::SIG_DFL {
                // Replicate the default action where we know it, rather than
                // racing to reinstall SIG_DFL and re-raise.
                // https://en.wikipedia.org/wiki/Signal_(IPC)#Default_action
                match signum {
                    libc::SIGCHLD | libc::SIGCONT | libc::SIGURG | libc::SIGWINCH => {}
                    libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU => {
                        libc::raise(libc::SIGSTOP);
                    }
                    libc::SIGABRT | libc::SIGQUIT | libc::SIGSYS | libc::SIGTRAP
                    | libc::SIGXCPU | libc::SIGXFSZ => libc::abort(),
                    _ => {
                        // Terminate, reporting the signal like the OS would.
                        libc::_exit(128 + signum);
                    }
                }
            } else if self.0.sa_sigaction != libc::SIG_IGN && !self.is_ours() {
                if self.0.sa_flags & libc::SA_SIGINFO != 0 {
                    mem::transmute::<libc::sighandler_t, SigActionPtr>(self.0.sa_sigaction)(
                        signum, data.0, data.1,
                    );
                } else {
                    mem::transmute::<libc::sighandler_t, SigHandlerPtr>(self.0.sa_sigaction)(
                        signum,
                    );
                }
            }
        }

        fn install(&self, signum: c_int) -> io::Result<Self> {
            unsafe {
                let mut res = mem::zeroed();
                if libc::sigaction(signum, &self.0, &mut res) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(Self(res))
            }
        }

        fn detect(signum: c_int) -> io::Result<Self> {
            unsafe {
                let mut res = mem::zeroed();
                if libc::sigaction(signum, std::ptr::null(), &mut res) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(Self(res))
            }
        }

        fn probe() -> bool {
            unsafe {
                let mut mask: libc::sigset_t = mem::zeroed();
                libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut mask) == 0
            }
        }

        fn forwarder(&self) -> Option<Callback> {
            let action = self.0.sa_sigaction;
            // `SA_SIGINFO` handlers expect a real `siginfo_t`, which only the
            // kernel can provide.
            if action == libc::SIG_DFL
                || action == libc::SIG_IGN
                || self.is_ours()
                || self.0.sa_flags & libc::SA_SIGINFO != 0
            {
                return None;
            }
            Some(Callback::new(move |signum| unsafe {
                mem::transmute::<libc::sighandler_t, SigHandlerPtr>(action)(signum)
            }))
        }
    }
}
