//! Translates a raw `EXCEPTION_RECORD` chain into a typed, host-facing
//! exception description (spec.md §4.6).
//!
//! Grounded in `original_source/_bones/exinfo.c`'s
//! `PyBones_ExceptionInfoObject`/`PyBones_AccessViolationInfoObject`: the
//! base `code`/`noncontinuable`/`address`/`nested` fields, specialized for
//! access violations with an `access_type` (0=read, 1=write, 8=DEP-as-
//! execute) and `data_address` drawn from the exception's first two
//! parameters.

use std::fmt;

const STATUS_ACCESS_VIOLATION: u32 = 0xC000_0005;
const EXCEPTION_NONCONTINUABLE: u32 = 0x0000_0001;

/// The kind of access that triggered an access-violation exception. The
/// kernel reports "execute" as `8` (hardware DEP), not `2`, which is why this
/// is a real enum rather than a raw integer — it documents that surprise at
/// the type level instead of leaving it for a reader of raw parameter dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
    /// A value the kernel has never been observed to emit; preserved
    /// verbatim rather than discarded so callers can still inspect it.
    Unknown(u32),
}

impl AccessKind {
    fn from_raw(value: u32) -> Self {
        match value {
            0 => AccessKind::Read,
            1 => AccessKind::Write,
            8 => AccessKind::Execute,
            other => AccessKind::Unknown(other),
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
            AccessKind::Execute => write!(f, "execute"),
            AccessKind::Unknown(v) => write!(f, "unknown({v})"),
        }
    }
}

/// An access-violation exception's extra detail (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccessViolationInfo {
    pub access: AccessKind,
    pub data_address: u32,
}

/// A translated exception, with any nested records translated recursively.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExceptionInfo {
    pub code: u32,
    pub noncontinuable: bool,
    pub address: u32,
    pub access_violation: Option<AccessViolationInfo>,
    pub nested: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn is_access_violation(&self) -> bool {
        self.code == STATUS_ACCESS_VIOLATION
    }
}

/// Translates a raw exception record (and its chain, if any) into
/// [`ExceptionInfo`].
///
/// A chain of length N produces a nested chain of depth N (spec.md §8). If
/// translating a nested record were ever to fail, the whole translation
/// fails — but nothing in this function is actually fallible today, since
/// every field it reads is already a plain integer unpacked by
/// [`crate::nt::NtDll`]; the signature is `Result`-free to reflect that, and
/// a future caller that does need fallibility (e.g. one that re-derives
/// `access_violation` from remote memory) can wrap this call instead of
/// changing it.
pub fn translate(record: &crate::nt::RawExceptionRecord) -> ExceptionInfo {
    let access_violation = if record.exception_code == STATUS_ACCESS_VIOLATION && record.parameters.len() >= 2 {
        Some(AccessViolationInfo {
            access: AccessKind::from_raw(record.parameters[0]),
            data_address: record.parameters[1],
        })
    } else {
        None
    };

    ExceptionInfo {
        code: record.exception_code,
        noncontinuable: record.exception_flags & EXCEPTION_NONCONTINUABLE != 0,
        address: record.exception_address,
        access_violation,
        nested: record.nested.as_deref().map(translate).map(Box::new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nt::RawExceptionRecord;
    use test_case::test_case;

    fn record(code: u32, parameters: Vec<u32>, nested: Option<Box<RawExceptionRecord>>) -> RawExceptionRecord {
        RawExceptionRecord {
            exception_code: code,
            exception_flags: 0,
            nested,
            exception_address: 0x1000,
            parameters,
        }
    }

    #[test_case(0, AccessKind::Read)]
    #[test_case(1, AccessKind::Write)]
    #[test_case(8, AccessKind::Execute)]
    fn access_violation_decodes_read_write_and_dep_execute(raw: u32, expected: AccessKind) {
        let r = record(STATUS_ACCESS_VIOLATION, vec![raw, 0xDEAD], None);
        let info = translate(&r);
        let av = info.access_violation.expect("access violation info");
        assert_eq!(av.access, expected);
        assert_eq!(av.data_address, 0xDEAD);
    }

    #[test]
    fn non_access_violation_has_no_access_violation_info() {
        let r = record(0x8000_0003, vec![], None); // STATUS_BREAKPOINT
        let info = translate(&r);
        assert!(info.access_violation.is_none());
        assert!(!info.is_access_violation());
    }

    #[test]
    fn chain_of_length_three_translates_to_depth_three() {
        let innermost = record(STATUS_ACCESS_VIOLATION, vec![0, 0], None);
        let middle = record(0x8000_0003, vec![], Some(Box::new(innermost)));
        let outer = record(0x8000_0003, vec![], Some(Box::new(middle)));

        let info = translate(&outer);
        let depth1 = info.nested.expect("depth 1");
        let depth2 = depth1.nested.expect("depth 2");
        assert!(depth2.is_access_violation());
        assert!(depth2.nested.is_none());
    }

    #[test]
    fn display_names_execute_for_the_dep_access_kind() {
        assert_eq!(AccessKind::Execute.to_string(), "execute");
    }
}
