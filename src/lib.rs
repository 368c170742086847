//! A user-mode debugger engine built on the NT native debug subsystem
//! (`NtCreateDebugObject`/`DbgUiWaitStateChange`/`NtDebugContinue`), scoped
//! to 32-bit x86 targets.
//!
//! The entry point is [`Dispatcher`]: it owns the debug object and every
//! attached [`Process`], and drives the event loop via
//! [`Dispatcher::wait_event`]. A host implements [`HostHandler`] to receive
//! typed callbacks for process/thread/module lifecycle events and
//! exceptions; every method defaults to a no-op, so only the events a host
//! cares about need an override.
//!
//! ```no_run
//! use ntdbg::{Config, Continuation, Dispatcher, ExceptionInfo, HostHandler, Process, Thread};
//!
//! struct Printer;
//!
//! impl HostHandler for Printer {
//!     fn on_exception(
//!         &mut self,
//!         _process: &Process,
//!         _thread: &Thread,
//!         info: &ExceptionInfo,
//!         _first_chance: bool,
//!     ) -> ntdbg::Result<Continuation> {
//!         println!("exception {:#x} at {:#010x}", info.code, info.address);
//!         Ok(Continuation::NotHandled)
//!     }
//! }
//!
//! # fn main() -> ntdbg::Result<()> {
//! let mut dispatcher = Dispatcher::with_config(Config::default())?;
//! dispatcher.spawn("C:\\Windows\\System32\\notepad.exe")?;
//! let mut handler = Printer;
//! while dispatcher.wait_event_default(&mut handler)? {}
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod dispatcher;
mod error;
mod exception;
mod memory;
mod module;
mod nt;
mod process;
mod thread;

pub use config::{Config, ConfigBuilder, SectionNameResolution};
pub use context::{CpuContext, EFlags, Register};
pub use dispatcher::{Continuation, Dispatcher, HostHandler};
pub use error::{Error, Result};
pub use exception::{AccessKind, AccessViolationInfo, ExceptionInfo};
pub use memory::{MemoryView, PageProtection};
pub use module::Module;
pub use nt::{ClientId, MemoryRegion, MemoryState, MemoryType, NtStatus};
pub use process::Process;
pub use thread::Thread;
