//! A debuggee thread (spec.md §4.4).
//!
//! Grounded in `original_source/process.c`'s `_PyBones_Process_AddThread`
//! bookkeeping and `thread.c`'s handle-and-id ownership, with the
//! `Rc<RefCell<dyn CoreInterface>>` back-reference shape replaced by a plain
//! process id per spec.md §9's "avoid reference cycles" design note: a
//! `Thread` never borrows its owning [`crate::process::Process`] directly,
//! it is looked up through [`crate::Dispatcher`] by id when needed.

use crate::context::CpuContext;
use crate::error::Result;
use crate::nt::{NtDll, RawHandle};
use std::sync::Arc;

/// One thread inside a debuggee process.
pub struct Thread {
    id: u32,
    process_id: u32,
    handle: RawHandle,
    start_address: u32,
    teb_address: u32,
    exit_status: Option<i32>,
    nt: Arc<NtDll>,
}

impl Thread {
    pub(crate) fn new(nt: Arc<NtDll>, process_id: u32, id: u32, handle: RawHandle, start_address: u32) -> Self {
        let teb_address = nt
            .query_thread_basic_information(handle)
            .map(|info| info.teb_base_address)
            .unwrap_or(0);
        Thread {
            id,
            process_id,
            handle,
            start_address,
            teb_address,
            exit_status: None,
            nt,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub(crate) fn handle(&self) -> RawHandle {
        self.handle
    }

    /// The address passed to `CreateThread`/the process's entry point, as
    /// reported by `DBGKM_CREATE_THREAD`/`DBGKM_CREATE_PROCESS`. For the
    /// initial thread this is frequently `ntdll!LdrInitializeThunk`, not the
    /// image's real entry point — see
    /// [`Thread::query_win32_start_address`] (spec.md §4.7).
    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    pub fn teb_address(&self) -> u32 {
        self.teb_address
    }

    /// `ExitStatus` once the thread's `DBGKM_EXIT_THREAD` has been observed,
    /// `None` while the thread is still live.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub(crate) fn set_exit_status(&mut self, status: i32) {
        self.exit_status = Some(status);
    }

    /// `NtQueryInformationThread(ThreadQuerySetWin32StartAddress)`. Reports
    /// the true Win32 entry point once the loader has run, correcting for
    /// the quirk where the initial `DBGKM_CREATE_PROCESS`'s start address is
    /// the loader thunk rather than the image entry point.
    pub fn query_win32_start_address(&self) -> Result<u32> {
        self.nt.query_win32_start_address(self.handle)
    }

    /// Reads the full register file (spec.md §4.3).
    pub fn context(&self) -> Result<CpuContext> {
        CpuContext::fetch(&self.nt, self.handle)
    }

    /// Writes the full register file back.
    pub fn set_context(&self, context: &CpuContext) -> Result<()> {
        context.store(&self.nt, self.handle)
    }

    /// Arms a one-shot single-step: the next time this thread runs, it will
    /// trap after the next instruction (spec.md §4.3, §4.7).
    pub fn set_single_step(&self) -> Result<()> {
        CpuContext::set_single_step(&self.nt, self.handle)
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.nt.close_handle(self.handle);
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process_id", &self.process_id)
            .field("start_address", &format_args!("{:#010x}", self.start_address))
            .field("exit_status", &self.exit_status)
            .finish()
    }
}
