//! Plain, `#[repr(C)]` mirrors of the NT structures the engine consumes.
//!
//! Layouts follow `original_source/dbgui.h` and `winternals.c`. Pointer-sized
//! kernel fields that point into the *target's* address space (start
//! addresses, image bases, exception addresses) are narrowed to `u32` here:
//! this engine's `CpuContext` (§4.3) is explicitly scoped to 32-bit x86
//! targets, so every address the dispatcher hands to a host is a 32-bit
//! value. Kernel `HANDLE` fields stay native-pointer-width (`RawHandle`)
//! since a handle is never interpreted as a target address.

use std::fmt;

/// A native handle, opaque outside this module except for the entities that
/// own one and close it on drop.
pub type RawHandle = isize;

/// `(process id, thread id)` pair used to route a continuation reply to the
/// correct target (spec.md Glossary: "Client id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub process_id: u32,
    pub thread_id: u32,
}

/// `DBG_STATE`, the kind tag on a `DBGUI_WAIT_STATE_CHANGE` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DbgState {
    Idle = 0,
    ReplyPending = 1,
    CreateThread = 2,
    CreateProcess = 3,
    ExitThread = 4,
    ExitProcess = 5,
    Exception = 6,
    Breakpoint = 7,
    SingleStep = 8,
    LoadDll = 9,
    UnloadDll = 10,
}

impl DbgState {
    pub(crate) fn from_raw(value: i32) -> Option<Self> {
        Some(match value {
            0 => DbgState::Idle,
            1 => DbgState::ReplyPending,
            2 => DbgState::CreateThread,
            3 => DbgState::CreateProcess,
            4 => DbgState::ExitThread,
            5 => DbgState::ExitProcess,
            6 => DbgState::Exception,
            7 => DbgState::Breakpoint,
            8 => DbgState::SingleStep,
            9 => DbgState::LoadDll,
            10 => DbgState::UnloadDll,
            _ => return None,
        })
    }
}

/// Raw mirror of `EXCEPTION_RECORD`, including the (local, not remote)
/// chain pointer to a nested record. The chain lives in the event buffer
/// that the kernel filled in, so following `exception_record` here never
/// touches the target's memory (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct RawExceptionRecord {
    pub exception_code: u32,
    pub exception_flags: u32,
    pub nested: Option<Box<RawExceptionRecord>>,
    pub exception_address: u32,
    pub parameters: Vec<u32>,
}

/// `DBGKM_CREATE_THREAD`.
#[derive(Debug, Clone, Copy)]
pub struct CreateThreadInfo {
    pub handle: RawHandle,
    pub start_address: u32,
}

/// `DBGKM_CREATE_PROCESS`.
#[derive(Debug, Clone, Copy)]
pub struct CreateProcessInfo {
    pub process_handle: RawHandle,
    pub thread_handle: RawHandle,
    pub base_of_image: u32,
    pub initial_thread_start_address: u32,
}

/// `DBGKM_EXIT_THREAD` / `DBGKM_EXIT_PROCESS` share this shape.
#[derive(Debug, Clone, Copy)]
pub struct ExitInfo {
    pub exit_status: i32,
}

/// `DBGKM_LOAD_DLL`. `name_pointer` is a *remote* address into the target
/// and is deliberately not dereferenced here: the engine resolves a human
/// name lazily via `query_section_name` instead (spec.md §4.5), which is
/// reliable even when the debug-info name hint is absent or garbage.
#[derive(Debug, Clone, Copy)]
pub struct LoadDllInfo {
    pub base_of_dll: u32,
}

/// `DBGKM_UNLOAD_DLL`.
#[derive(Debug, Clone, Copy)]
pub struct UnloadDllInfo {
    pub base_address: u32,
}

/// The per-kind payload of a `DBGUI_WAIT_STATE_CHANGE`, already unpacked
/// out of the kernel's C union into a safe Rust enum.
#[derive(Debug, Clone)]
pub enum StateInfo {
    Idle,
    ReplyPending,
    CreateThread(CreateThreadInfo),
    CreateProcess(CreateProcessInfo),
    ExitThread(ExitInfo),
    ExitProcess(ExitInfo),
    Exception {
        record: RawExceptionRecord,
        first_chance: bool,
    },
    Breakpoint,
    SingleStep,
    LoadDll(LoadDllInfo),
    UnloadDll(UnloadDllInfo),
}

/// A fully unpacked `DBGUI_WAIT_STATE_CHANGE`: the kind, the routing id, and
/// the kind-specific payload.
#[derive(Debug, Clone)]
pub struct WaitStateChange {
    pub client_id: ClientId,
    pub info: StateInfo,
}

/// `PROCESS_BASIC_INFORMATION`, trimmed to the one field this engine needs.
#[derive(Debug, Clone, Copy)]
pub struct ProcessBasicInformation {
    pub peb_base_address: u32,
}

/// `THREAD_BASIC_INFORMATION`, trimmed likewise.
#[derive(Debug, Clone, Copy)]
pub struct ThreadBasicInformation {
    pub teb_base_address: u32,
}

/// `MEMORY_BASIC_INFORMATION`'s `State` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MemoryState {
    Reserved,
    Commit,
    Free,
}

/// `MEMORY_BASIC_INFORMATION`'s `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MemoryType {
    Private,
    Mapped,
    Image,
}

/// The result of [`crate::memory::MemoryView::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryRegion {
    pub allocation_base: u32,
    pub region_size: u32,
    pub allocation_protect: u32,
    pub current_protect: u32,
    pub state: MemoryState,
    pub kind: MemoryType,
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.process_id, self.thread_id)
    }
}
