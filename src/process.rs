//! A debuggee process: handle, address space, and the threads/modules living
//! in it (spec.md §4.2/§4.4/§4.5).
//!
//! Grounded in `original_source/process.c`'s `PyBones_ProcessObject` (id,
//! handle, image base, peb address queried once at creation, exit status,
//! thread/module maps) and its `remove_kv` helper, which is the direct model
//! for [`Process::remove_thread`] distinguishing "no such thread" (a plain
//! `None`) from an actual error (spec.md §9, Open Question 2).

use crate::error::Result;
use crate::memory::MemoryView;
use crate::module::Module;
use crate::nt::{NtDll, RawHandle};
use crate::thread::Thread;
use std::collections::HashMap;
use std::sync::Arc;

/// A process under debug.
pub struct Process {
    id: u32,
    handle: RawHandle,
    image_base: u32,
    peb_address: u32,
    exit_status: Option<i32>,
    threads: HashMap<u32, Thread>,
    modules: HashMap<u32, Module>,
    nt: Arc<NtDll>,
}

impl Process {
    pub(crate) fn new(nt: Arc<NtDll>, id: u32, handle: RawHandle, image_base: u32) -> Self {
        let peb_address = nt
            .query_process_basic_information(handle)
            .map(|info| info.peb_base_address)
            .unwrap_or(0);
        Process {
            id,
            handle,
            image_base,
            peb_address,
            exit_status: None,
            threads: HashMap::new(),
            modules: HashMap::new(),
            nt,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn image_base(&self) -> u32 {
        self.image_base
    }

    pub fn peb_address(&self) -> u32 {
        self.peb_address
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub(crate) fn set_exit_status(&mut self, status: i32) {
        self.exit_status = Some(status);
    }

    /// A view onto this process's address space (spec.md §4.2).
    pub fn memory(&self) -> MemoryView<'_> {
        MemoryView::new(&self.nt, self.handle)
    }

    pub fn thread(&self, id: u32) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub(crate) fn add_thread(&mut self, thread: Thread) {
        self.threads.insert(thread.id(), thread);
    }

    /// Removes and returns the thread with this id, or `None` if no such
    /// thread is tracked. Not finding the thread is an ordinary outcome (the
    /// dispatcher may have already reaped it, or never observed its
    /// creation), not an error (spec.md §9).
    pub(crate) fn remove_thread(&mut self, id: u32) -> Option<Thread> {
        self.threads.remove(&id)
    }

    pub fn module(&self, base_address: u32) -> Option<&Module> {
        self.modules.get(&base_address)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub(crate) fn add_module(&mut self, module: Module) {
        self.modules.insert(module.base_address(), module);
    }

    pub(crate) fn remove_module(&mut self, base_address: u32) -> Option<Module> {
        self.modules.remove(&base_address)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.nt.close_handle(self.handle);
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("image_base", &format_args!("{:#010x}", self.image_base))
            .field("peb_address", &format_args!("{:#010x}", self.peb_address))
            .field("exit_status", &self.exit_status)
            .field("thread_count", &self.threads.len())
            .field("module_count", &self.modules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_an_unknown_thread_is_none_not_an_error() {
        let mut threads: HashMap<u32, u32> = HashMap::new();
        threads.insert(1, 1);
        assert!(threads.remove(&2).is_none());
        assert!(threads.remove(&1).is_some());
    }
}
