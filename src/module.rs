//! A loaded module (EXE or DLL) inside a debuggee process (spec.md §4.5).
//!
//! Grounded in `original_source/module.c`'s `PyBones_ModuleObject` (base
//! address, lazily-resolved path, cached after first resolution) and the
//! teacher's lazy-field pattern. `DBGKM_LOAD_DLL.NamePointer` is a hint into
//! the target's memory that is frequently null or stale, so — matching the
//! original's `get_path` — the name is instead resolved on demand through
//! `NtQueryVirtualMemory(MemorySectionName)`, which is reliable for any
//! mapped image.

use crate::error::Result;
use crate::memory::MemoryView;
use crate::nt::{NtDll, RawHandle};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// A module mapped into a process's address space.
pub struct Module {
    process_id: u32,
    base_address: u32,
    process_handle: RawHandle,
    nt: Arc<NtDll>,
    path: OnceCell<String>,
}

impl Module {
    /// `eager` mirrors [`crate::config::SectionNameResolution::Eager`]:
    /// resolve the path immediately instead of on first
    /// [`Module::path`] call. A resolution failure at construction is
    /// swallowed, not propagated — the path simply stays unresolved and a
    /// later [`Module::path`] call will try again and report the error then.
    pub(crate) fn new(nt: Arc<NtDll>, process_id: u32, process_handle: RawHandle, base_address: u32, eager: bool) -> Self {
        let module = Module {
            process_id,
            base_address,
            process_handle,
            nt,
            path: OnceCell::new(),
        };
        if eager {
            let _ = module.path();
        }
        module
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// The backing file's path, resolved and cached on first access
    /// (spec.md §4.5). Resolution failure (the module has since unloaded,
    /// or the mapping is not a named section) is reported every call rather
    /// than cached, since a later call might succeed once the race settles.
    pub fn path(&self) -> Result<&str> {
        if let Some(path) = self.path.get() {
            return Ok(path);
        }
        let resolved = self.nt.query_section_name(self.process_handle, self.base_address)?;
        Ok(self.path.get_or_init(|| resolved))
    }

    /// The file name portion of [`Module::path`], e.g. `"ntdll.dll"`.
    pub fn name(&self) -> Result<&str> {
        let path = self.path()?;
        Ok(path.rsplit(['\\', '/']).next().unwrap_or(path))
    }

    /// Reads the image's entry point out of its PE headers: the DOS header's
    /// `e_lfanew` locates the NT headers, whose optional header carries
    /// `AddressOfEntryPoint` as an RVA from `base_address`.
    pub fn entry_point(&self) -> Result<u32> {
        let view = MemoryView::new(&self.nt, self.process_handle);
        let mut e_lfanew = [0u8; 4];
        view.read_exact(self.base_address + 0x3c, &mut e_lfanew)?;
        let nt_headers = self.base_address + u32::from_le_bytes(e_lfanew);

        // AddressOfEntryPoint sits at offset 0x10 into IMAGE_OPTIONAL_HEADER,
        // which itself starts after the 4-byte signature + 20-byte
        // IMAGE_FILE_HEADER.
        let optional_header = nt_headers + 4 + 20;
        let mut rva = [0u8; 4];
        view.read_exact(optional_header + 0x10, &mut rva)?;
        Ok(self.base_address + u32::from_le_bytes(rva))
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("process_id", &self.process_id)
            .field("base_address", &format_args!("{:#010x}", self.base_address))
            .field("path", &self.path.get())
            .finish()
    }
}
