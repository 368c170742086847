//! Thin typed facade over the NT native calls the engine needs.
//!
//! Grounded in `original_source/winternals.c`/`dbgui.h` (the `GETPROC`
//! lazy-resolution pattern and the exact `DBGUI_WAIT_STATE_CHANGE` layout)
//! and structured the way the teacher wraps a single external transport
//! behind a typed interface (`probe-rs`'s `probe/debug_probe.rs`:
//! `DebugProbeError`, `DAPAccess`).
//!
//! None of the functions used here (`NtCreateDebugObject`,
//! `DbgUiWaitStateChange`, `NtDebugContinue`, `NtRemoveProcessDebug`,
//! `NtQueryInformationThread(ThreadQuerySetWin32StartAddress)`,
//! `NtQueryVirtualMemory(MemorySectionName)`) are part of the public Win32
//! metadata `windows-sys` is generated from, so they are resolved by name
//! from `ntdll.dll` at first use, exactly as the original does with its
//! `GETPROC` macro (spec.md §4.1: "no partial operation mode" on resolution
//! failure).

mod bindings;
mod types;

pub use bindings::NtDll;
pub(crate) use bindings::{RawContext, CONTEXT_CONTROL_MASK, CONTEXT_FULL_MASK};
pub use types::*;

use std::fmt;

/// A raw 32-bit NT status code, preserved verbatim so callers can compare
/// against well-known constants (`STATUS_ACCESS_VIOLATION`, ...) without the
/// engine reinterpreting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NtStatus(pub i32);

impl NtStatus {
    /// `NT_SUCCESS(status)`: true for the `STATUS_SUCCESS` family (high two
    /// bits of the severity field are not `11`).
    pub fn is_success(self) -> bool {
        (self.0 as u32) < 0x8000_0000
    }

    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const ALERTED: NtStatus = NtStatus(0x0000_0101);
    pub const USER_APC: NtStatus = NtStatus(0x0000_00C0);
    pub const TIMEOUT: NtStatus = NtStatus(0x0000_0102_u32 as i32);
    pub const ACCESS_VIOLATION: NtStatus = NtStatus(0xC000_0005_u32 as i32);
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NTSTATUS {:#010x}", self.0 as u32)
    }
}
