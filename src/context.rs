//! The 32-bit x86 register file: [`CpuContext`], [`EFlags`], and the
//! single-step primitive (spec.md §4.3).
//!
//! Grounded in `original_source/context.c`'s getset table (`eax`..`gs`,
//! `dr0`..`dr7`) and in the teacher's register-enum redesign note (SPEC_FULL
//! §9 / spec.md §9: "raw-register attribute table... re-architect as an enum
//! of register ids with a total function from id to a typed accessor"),
//! modeled on `probe-rs`'s `RegisterId`/`RegisterValue` pair in `core.rs`.

use crate::error::Result;
use crate::nt::{NtDll, RawContext, CONTEXT_CONTROL_MASK, CONTEXT_FULL_MASK};
use std::fmt;

bitflags::bitflags! {
    /// EFLAGS as a bitfield view over the raw 32-bit value. Round-trips
    /// losslessly through the underlying integer (spec.md §3, §8).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct EFlags: u32 {
        /// Carry flag.
        const CF = 1 << 0;
        /// Parity flag.
        const PF = 1 << 2;
        /// Auxiliary carry flag.
        const AF = 1 << 4;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag — the single-step enable (spec.md §4.3, §6).
        const TF = 1 << 8;
        /// Interrupt enable flag.
        const IF = 1 << 9;
        /// Direction flag.
        const DF = 1 << 10;
        /// Overflow flag.
        const OF = 1 << 11;
    }
}

impl EFlags {
    /// Named boolean accessors, matching spec.md §6's EFLAGS bit layout.
    pub fn cf(self) -> bool {
        self.contains(EFlags::CF)
    }
    pub fn pf(self) -> bool {
        self.contains(EFlags::PF)
    }
    pub fn af(self) -> bool {
        self.contains(EFlags::AF)
    }
    pub fn zf(self) -> bool {
        self.contains(EFlags::ZF)
    }
    pub fn sf(self) -> bool {
        self.contains(EFlags::SF)
    }
    pub fn tf(self) -> bool {
        self.contains(EFlags::TF)
    }
    pub fn if_(self) -> bool {
        self.contains(EFlags::IF)
    }
    pub fn df(self) -> bool {
        self.contains(EFlags::DF)
    }
    pub fn of(self) -> bool {
        self.contains(EFlags::OF)
    }

    /// Sets or clears `flag`, preserving every other bit (spec.md §4.3: "all
    /// other bits" preserved across a flag flip).
    pub fn set_flag(&mut self, flag: EFlags, value: bool) {
        self.set(flag, value);
    }

    /// The reserved/unnamed bits plus the named flags above, rendered as the
    /// letters used in the string form of [`CpuContext`] (spec.md §4.3).
    fn decoded_letters(self) -> String {
        let pairs = [
            (EFlags::OF, "OF"),
            (EFlags::DF, "DF"),
            (EFlags::IF, "IF"),
            (EFlags::TF, "TF"),
            (EFlags::SF, "SF"),
            (EFlags::ZF, "ZF"),
            (EFlags::AF, "AF"),
            (EFlags::PF, "PF"),
            (EFlags::CF, "CF"),
        ];
        pairs
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<u32> for EFlags {
    fn from(value: u32) -> Self {
        // `from_bits_retain` instead of `from_bits`: unnamed bits (reserved,
        // or IOPL/NT/RF/VM/AC/VIF/VIP) must survive the round trip even
        // though this type only exposes the nine named flags.
        EFlags::from_bits_retain(value)
    }
}

impl From<EFlags> for u32 {
    fn from(value: EFlags) -> Self {
        value.bits()
    }
}

/// The fixed, total set of accessible register names (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    Ebp,
    Esp,
    Eip,
    EFlags,
    Cs,
    Ds,
    Es,
    Fs,
    Gs,
    Ss,
    Dr0,
    Dr1,
    Dr2,
    Dr3,
    Dr6,
    Dr7,
}

impl Register {
    /// All register names, in the order spec.md §4.3 fixes for string
    /// rendering: GPRs, then eip/esp/ebp/efl, then segments, then debug
    /// registers.
    pub const ALL: [Register; 22] = [
        Register::Eax,
        Register::Ebx,
        Register::Ecx,
        Register::Edx,
        Register::Esi,
        Register::Edi,
        Register::Ebp,
        Register::Esp,
        Register::Eip,
        Register::EFlags,
        Register::Cs,
        Register::Ds,
        Register::Es,
        Register::Fs,
        Register::Gs,
        Register::Ss,
        Register::Dr0,
        Register::Dr1,
        Register::Dr2,
        Register::Dr3,
        Register::Dr6,
        Register::Dr7,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ebx => "ebx",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
            Register::Esi => "esi",
            Register::Edi => "edi",
            Register::Ebp => "ebp",
            Register::Esp => "esp",
            Register::Eip => "eip",
            Register::EFlags => "eflags",
            Register::Cs => "cs",
            Register::Ds => "ds",
            Register::Es => "es",
            Register::Fs => "fs",
            Register::Gs => "gs",
            Register::Ss => "ss",
            Register::Dr0 => "dr0",
            Register::Dr1 => "dr1",
            Register::Dr2 => "dr2",
            Register::Dr3 => "dr3",
            Register::Dr6 => "dr6",
            Register::Dr7 => "dr7",
        }
    }
}

/// A structured snapshot of a thread's 32-bit x86 register file (spec.md
/// §3/§4.3). Materialized by [`CpuContext::fetch`]; mutated in place; written
/// back with [`CpuContext::store`]. No aliasing between two contexts for the
/// same thread: each `fetch` produces an independent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CpuContext {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: EFlags,
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub ss: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
}

impl CpuContext {
    /// Reads the full context (control + integer + segment + debug-register
    /// sets) of `thread_handle` (spec.md §4.3).
    pub(crate) fn fetch(nt: &NtDll, thread_handle: isize) -> Result<Self> {
        let raw = nt.get_context_thread(thread_handle, CONTEXT_FULL_MASK)?;
        Ok(Self::from_raw(&raw))
    }

    /// Writes this context back to `thread_handle` (spec.md §4.3).
    pub(crate) fn store(&self, nt: &NtDll, thread_handle: isize) -> Result<()> {
        let raw = self.to_raw(CONTEXT_FULL_MASK);
        nt.set_context_thread(thread_handle, &raw)
    }

    /// Gets a register's value by name, unified behind the total
    /// `Register -> u32` function the redesign note calls for (spec.md §9).
    pub fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
            Register::Esi => self.esi,
            Register::Edi => self.edi,
            Register::Ebp => self.ebp,
            Register::Esp => self.esp,
            Register::Eip => self.eip,
            Register::EFlags => self.eflags.bits(),
            Register::Cs => self.cs,
            Register::Ds => self.ds,
            Register::Es => self.es,
            Register::Fs => self.fs,
            Register::Gs => self.gs,
            Register::Ss => self.ss,
            Register::Dr0 => self.dr0,
            Register::Dr1 => self.dr1,
            Register::Dr2 => self.dr2,
            Register::Dr3 => self.dr3,
            Register::Dr6 => self.dr6,
            Register::Dr7 => self.dr7,
        }
    }

    /// Sets a register's value by name. Lossless for every 32-bit integer
    /// register; `eflags` goes through [`EFlags::from`] so unnamed bits are
    /// preserved (spec.md §4.3).
    pub fn set(&mut self, reg: Register, value: u32) {
        match reg {
            Register::Eax => self.eax = value,
            Register::Ebx => self.ebx = value,
            Register::Ecx => self.ecx = value,
            Register::Edx => self.edx = value,
            Register::Esi => self.esi = value,
            Register::Edi => self.edi = value,
            Register::Ebp => self.ebp = value,
            Register::Esp => self.esp = value,
            Register::Eip => self.eip = value,
            Register::EFlags => self.eflags = EFlags::from(value),
            Register::Cs => self.cs = value,
            Register::Ds => self.ds = value,
            Register::Es => self.es = value,
            Register::Fs => self.fs = value,
            Register::Gs => self.gs = value,
            Register::Ss => self.ss = value,
            Register::Dr0 => self.dr0 = value,
            Register::Dr1 => self.dr1 = value,
            Register::Dr2 => self.dr2 = value,
            Register::Dr3 => self.dr3 = value,
            Register::Dr6 => self.dr6 = value,
            Register::Dr7 => self.dr7 = value,
        }
    }

    fn from_raw(raw: &RawContext) -> Self {
        CpuContext {
            eax: raw.eax,
            ebx: raw.ebx,
            ecx: raw.ecx,
            edx: raw.edx,
            esi: raw.esi,
            edi: raw.edi,
            ebp: raw.ebp,
            esp: raw.esp,
            eip: raw.eip,
            eflags: EFlags::from(raw.eflags),
            cs: raw.seg_cs,
            ds: raw.seg_ds,
            es: raw.seg_es,
            fs: raw.seg_fs,
            gs: raw.seg_gs,
            ss: raw.seg_ss,
            dr0: raw.dr0,
            dr1: raw.dr1,
            dr2: raw.dr2,
            dr3: raw.dr3,
            dr6: raw.dr6,
            dr7: raw.dr7,
        }
    }

    fn to_raw(&self, context_flags: u32) -> RawContext {
        RawContext {
            context_flags,
            dr0: self.dr0,
            dr1: self.dr1,
            dr2: self.dr2,
            dr3: self.dr3,
            dr6: self.dr6,
            dr7: self.dr7,
            seg_gs: self.gs,
            seg_fs: self.fs,
            seg_es: self.es,
            seg_ds: self.ds,
            edi: self.edi,
            esi: self.esi,
            ebx: self.ebx,
            edx: self.edx,
            ecx: self.ecx,
            eax: self.eax,
            ebp: self.ebp,
            eip: self.eip,
            seg_cs: self.cs,
            eflags: self.eflags.bits(),
            esp: self.esp,
            seg_ss: self.ss,
            ..Default::default()
        }
    }

    /// Enables single-step on `thread_handle`: reads the control-flags
    /// subset, sets the trap flag, writes it back using a minimal context
    /// mask so debug registers are never disturbed (spec.md §4.3).
    ///
    /// Active until the next single-step exception; not sticky. Calling this
    /// twice with no intervening resume is idempotent (spec.md §8): the trap
    /// flag is already set after the first call, so the second is a no-op
    /// store of the same bit.
    pub(crate) fn set_single_step(nt: &NtDll, thread_handle: isize) -> Result<()> {
        let mut raw = nt.get_context_thread(thread_handle, CONTEXT_CONTROL_MASK)?;
        raw.eflags |= EFlags::TF.bits();
        raw.context_flags = CONTEXT_CONTROL_MASK;
        nt.set_context_thread(thread_handle, &raw)
    }
}

impl fmt::Display for CpuContext {
    /// A stable, deterministic multi-line rendering used by tests and dumps
    /// (spec.md §4.3): six GPRs per line, then eip/esp/ebp/efl with decoded
    /// flag letters, then segment selectors.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "eax={:08x} ebx={:08x} ecx={:08x} edx={:08x} esi={:08x} edi={:08x}",
            self.eax, self.ebx, self.ecx, self.edx, self.esi, self.edi
        )?;
        writeln!(
            f,
            "eip={:08x} esp={:08x} ebp={:08x} efl={:08x} [{}]",
            self.eip,
            self.esp,
            self.ebp,
            self.eflags.bits(),
            self.eflags.decoded_letters()
        )?;
        write!(
            f,
            "cs={:04x} ds={:04x} es={:04x} fs={:04x} gs={:04x} ss={:04x}",
            self.cs, self.ds, self.es, self.fs, self.gs, self.ss
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn eflags_round_trip_for_every_bit_pattern() {
        for v in [0u32, 1, 0xFFFF_FFFF, 0x8000_0000, 0x0000_0246, 0xDEAD_BEEF] {
            let flags = EFlags::from(v);
            assert_eq!(u32::from(flags), v);
        }
    }

    #[test]
    fn eflags_setting_current_value_is_idempotent() {
        let mut flags = EFlags::from(0x0000_0246);
        let was_zf = flags.zf();
        flags.set_flag(EFlags::ZF, was_zf);
        assert_eq!(flags.zf(), was_zf);
        assert_eq!(u32::from(flags), 0x0000_0246);
    }

    #[test]
    fn eflags_preserves_unnamed_bits() {
        let flags = EFlags::from(0xFFFF_FFFF);
        assert_eq!(u32::from(flags), 0xFFFF_FFFF);
    }

    #[test]
    fn register_get_set_round_trip() {
        let mut ctx = CpuContext {
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            esp: 0,
            eip: 0,
            eflags: EFlags::from(0),
            cs: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
            ss: 0,
            dr0: 0,
            dr1: 0,
            dr2: 0,
            dr3: 0,
            dr6: 0,
            dr7: 0,
        };
        ctx.set(Register::Eax, 0xCAFE_BABE);
        assert_eq!(ctx.get(Register::Eax), 0xCAFE_BABE);
        assert_eq!(format!("{ctx}").lines().next().unwrap().contains("eax=cafebabe"), true);
    }

    #[test]
    fn display_contains_expected_eax_rendering() {
        let mut ctx = CpuContext {
            eax: 0xCAFE_BABE,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            esp: 0,
            eip: 0,
            eflags: EFlags::from(0x246),
            cs: 0x1b,
            ds: 0x23,
            es: 0x23,
            fs: 0x3b,
            gs: 0,
            ss: 0x23,
            dr0: 0,
            dr1: 0,
            dr2: 0,
            dr3: 0,
            dr6: 0,
            dr7: 0,
        };
        ctx.eax = 0xCAFE_BABE;
        let rendered = ctx.to_string();
        assert!(rendered.contains("eax=cafebabe"));
    }
}
