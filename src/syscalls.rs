//! Syscall catch policy and id ⇄ name translation.
//!
//! The policy is consulted on every syscall stop: `None` means syscalls are
//! not traced at all (plain `PTRACE_CONT`), `All` stops at every entry and
//! exit, and `Some` lists the syscall numbers worth stopping for — the
//! engine transparently resumes past the rest.

use std::str::FromStr;

use syscalls::Sysno;

/// Which syscalls stop the inferior.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyscallCatchPolicy {
    #[default]
    None,
    All,
    Some(Vec<u16>),
}

impl SyscallCatchPolicy {
    /// Whether resume should use the syscall-stopping continue request.
    pub fn traces_syscalls(&self) -> bool {
        !matches!(self, SyscallCatchPolicy::None)
    }

    /// Whether a stop for the given syscall id should reach the user.
    pub fn should_stop_for(&self, id: u16) -> bool {
        match self {
            SyscallCatchPolicy::Some(ids) => ids.contains(&id),
            _ => true,
        }
    }
}

/// The name of a syscall, if the id is known on x86-64.
pub fn syscall_id_to_name(id: u16) -> Option<&'static str> {
    Sysno::new(usize::from(id)).map(|sysno| sysno.name())
}

/// The syscall id for a name like `write`.
pub fn syscall_name_to_id(name: &str) -> Option<u16> {
    Sysno::from_str(name).ok().map(|sysno| sysno.id() as u16)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_syscall_mapping() {
        assert_eq!(syscall_id_to_name(0), Some("read"));
        assert_eq!(syscall_name_to_id("read"), Some(0));
        assert_eq!(syscall_id_to_name(62), Some("kill"));
        assert_eq!(syscall_name_to_id("kill"), Some(62));
        assert_eq!(syscall_name_to_id("not_a_syscall"), None);
    }

    #[test]
    fn test_policy() {
        assert!(!SyscallCatchPolicy::None.traces_syscalls());
        assert!(SyscallCatchPolicy::All.traces_syscalls());
        let some = SyscallCatchPolicy::Some(vec![1]);
        assert!(some.traces_syscalls());
        assert!(some.should_stop_for(1));
        assert!(!some.should_stop_for(2));
        assert!(SyscallCatchPolicy::All.should_stop_for(2));
    }
}
