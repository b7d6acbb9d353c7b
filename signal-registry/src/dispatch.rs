//! Moves signal delivery off the signal handler.
//!
//! The C-level handler only bumps a per-signal counter and writes a byte to a
//! pipe. A background thread reads from that pipe and runs the registered
//! callbacks, so callbacks are free to allocate, lock and log.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::thread;

use libc::{c_int, c_void};
use parking_lot::lock_api::RawMutex;
use parking_lot::Mutex;

use super::{ledger, Error, Signal, NSIG};

#[allow(clippy::declare_interior_mutable_const)]
const NOT_PENDING: AtomicUsize = AtomicUsize::new(0);

static PENDING: [AtomicUsize; NSIG as usize] = [NOT_PENDING; NSIG as usize];
// Write end of the wakeup pipe, or -1 before the dispatcher has started.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static STARTED: Mutex<bool> = Mutex::const_new(RawMutex::INIT, false);

/// Starts the dispatcher thread if it is not already running.
pub(crate) fn start() -> Result<(), Error> {
    let mut started = STARTED.lock();
    if *started {
        return Ok(());
    }
    let (read_fd, write_fd) = wake_pipe().map_err(Error::Dispatcher)?;
    if let Err(e) = thread::Builder::new()
        .name("signal-dispatch".into())
        .spawn(move || dispatcher_thread(read_fd))
    {
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(Error::Dispatcher(e));
    }
    WAKE_FD.store(write_fd, Ordering::Release);
    log::debug!("started signal dispatcher thread");
    *started = true;
    Ok(())
}

fn wake_pipe() -> io::Result<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        for &fd in &fds {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
        // A full pipe already guarantees a pending wakeup, so the signal
        // handler must never block on it.
        let flags = libc::fcntl(fds[1], libc::F_GETFL);
        if flags < 0 || libc::fcntl(fds[1], libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fds[0]);
            libc::close(fds[1]);
            return Err(err);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Records a delivery of `signum`. Async-signal-safe.
pub(crate) fn notify(signum: Signal) {
    if let Some(counter) = PENDING.get(signum as usize) {
        counter.fetch_add(1, Ordering::Relaxed);
        let fd = WAKE_FD.load(Ordering::Acquire);
        if fd >= 0 {
            let errno = errno::get();
            let byte = 1u8;
            unsafe {
                libc::write(fd, &byte as *const u8 as *const c_void, 1);
            }
            errno::set(errno);
        }
    }
}

fn dispatcher_thread(read_fd: c_int) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("signal dispatcher stopped: {}", err);
            return;
        }
        for (signum, counter) in PENDING.iter().enumerate() {
            for _ in 0..counter.swap(0, Ordering::Relaxed) {
                deliver(signum as Signal);
            }
        }
    }
}

fn deliver(signum: Signal) {
    let callbacks = match ledger::callbacks(signum) {
        Some(callbacks) => callbacks,
        None => {
            log::trace!("signal {} arrived after its callbacks were removed", signum);
            return;
        }
    };
    log::trace!("dispatching signal {} to {} callback(s)", signum, callbacks.len());
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback.call(signum))).is_err() {
            log::error!("callback for signal {} panicked", signum);
        }
    }
}

// The interrupted code may be about to inspect `errno`, so a failed `write`
// must not leave its own value behind.
mod errno {
    use libc::c_int;

    #[cfg(any(target_os = "linux", target_os = "emscripten"))]
    unsafe fn location() -> *mut c_int {
        libc::__errno_location()
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    unsafe fn location() -> *mut c_int {
        libc::__error()
    }

    #[cfg(any(target_os = "android", target_os = "openbsd", target_os = "netbsd"))]
    unsafe fn location() -> *mut c_int {
        libc::__errno()
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "emscripten",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )))]
    unsafe fn location() -> *mut c_int {
        std::ptr::null_mut()
    }

    pub(super) fn get() -> c_int {
        unsafe {
            let ptr = location();
            if ptr.is_null() {
                0
            } else {
                *ptr
            }
        }
    }

    pub(super) fn set(value: c_int) {
        unsafe {
            let ptr = location();
            if !ptr.is_null() {
                *ptr = value;
            }
        }
    }
}
