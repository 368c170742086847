//! The engine's error taxonomy.
//!
//! Three variants are kept deliberately distinct (spec.md/SPEC_FULL.md §7) so
//! a host can discriminate a native-call failure from a Win32 failure from an
//! internal invariant violation, the way the teacher keeps
//! `Error::Probe`/`Error::Arm`/`Error::Riscv` apart instead of collapsing
//! them into one opaque string.

use crate::nt::NtStatus;

/// The overarching error type returned by every fallible operation in this
/// crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A native (`Nt*`) call returned a non-success status.
    #[error("{status} at {origin}")]
    NtStatus {
        /// The raw 32-bit status value, preserved verbatim.
        status: NtStatus,
        /// `file:line` of the call site, for diagnostics.
        origin: &'static str,
    },

    /// A top-level Win32 call failed (`CreateProcessW` is the main source).
    #[error("Win32 error {code:#010x} at {origin}")]
    Win32 {
        /// The value returned by `GetLastError`.
        code: u32,
        /// `file:line` of the call site.
        origin: &'static str,
    },

    /// A type mismatch in host-supplied data, or an internal invariant
    /// violation that should never happen if the dispatcher's bookkeeping is
    /// correct.
    #[error("engine error: {0}")]
    Engine(String),

    /// Required `ntdll.dll` entry points could not be resolved. Construction
    /// of a [`crate::Dispatcher`] fails with this before any partial state
    /// exists.
    #[error("this platform does not provide the NT debug subsystem")]
    PlatformUnsupported,

    /// Catch-all for errors that don't fit the taxonomy above, e.g. failures
    /// surfaced from a host callback.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build an [`Error::NtStatus`] from a raw status and a call-site origin.
    pub fn nt_status(status: i32, origin: &'static str) -> Self {
        Error::NtStatus {
            status: NtStatus(status),
            origin,
        }
    }

    /// Build an [`Error::Win32`] from `GetLastError`'s return value and a
    /// call-site origin.
    pub fn win32(code: u32, origin: &'static str) -> Self {
        Error::Win32 { code, origin }
    }

    /// Build an [`Error::Engine`] from a message.
    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }
}

/// Shorthand for `Result<T, Error>`, the return type of nearly every public
/// method in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Captures `file:line` at the call site. Used to fill in the `origin` field
/// of [`Error::NtStatus`] and [`Error::Win32`] without threading it through
/// every call manually.
#[macro_export]
macro_rules! origin {
    () => {
        concat!(file!(), ":", line!())
    };
}
