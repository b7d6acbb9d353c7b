//! Cooperative, reversible signal handling.
//!
//! A [`Session`] records a signal ledger (a table from signal number to an
//! ordered list of callbacks) when it is created. Handlers registered through
//! it run before whatever already handled the signal, and tearing the session
//! down puts the recorded table back exactly as it was.
//!
//! ```no_run
//! use signal_session::{when_available, Session, SignalRegistry};
//!
//! when_available(|| {
//!     let mut session = Session::new(SignalRegistry::new());
//!     session
//!         .register(libc::SIGTERM, |_| println!("cleaning up"))
//!         .expect("install SIGTERM handler");
//!     // ... run the application ...
//!     session.unregister().expect("restore signal handlers");
//! });
//! ```

mod availability;
pub mod config;
mod default_handler;
mod ledger;
mod memory;
mod session;

pub use availability::{
    default_resolver, is_available, reset_availability_resolver, resolve_availability_using,
    when_available,
};
pub use default_handler::{default_handler, DefaultAction};
pub use ledger::Ledger;
pub use memory::MemoryLedger;
pub use session::Session;
pub use signal_registry::{Callback, Error, Handler, Handlers, Signal, SignalRegistry};
