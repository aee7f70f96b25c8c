//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! All fallible operations in lodeminer return [`DebuggerError`] through the
//! [`Result`] alias. The variants are flat and stable: front ends match on
//! them to decide what to print, and the tests assert on them directly.
//! Kernel-call sites wrap their errno with a short static context string.

use thiserror::Error;

/// Type alias for Results returned by lodeminer functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Comprehensive error type for the lodeminer debugger
///
/// Every error a core operation can surface is one of these variants.
/// Teardown paths ([`Drop`] impls) swallow errors instead of raising them.
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Launch failed: {0}")]
    LaunchFailed(String),
    #[error("Could not attach: {0}")]
    AttachFailed(String),
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
    #[error("{context}: {source}")]
    MemoryAccess {
        context: &'static str,
        source: nix::Error,
    },
    #[error("{context}: {source}")]
    Ptrace {
        context: &'static str,
        source: nix::Error,
    },
    #[error("No remaining hardware debug registers")]
    NoFreeDebugRegister,
    #[error("Watchpoint address {addr:#x} is not aligned to size {size}")]
    Alignment { addr: u64, size: usize },
    #[error("Unknown register: {0}")]
    UnknownRegister(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("No stoppoint matches {0}")]
    NotFound(String),
    #[error("ELF error: {0}")]
    ElfError(String),
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Error while working with the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("Error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
}

impl DebuggerError {
    /// Wraps a nix error from a ptrace call site with a short prefix.
    pub(crate) fn ptrace(context: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| DebuggerError::Ptrace { context, source }
    }

    /// Wraps a nix error from a memory access with a short prefix.
    pub(crate) fn memory(context: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| DebuggerError::MemoryAccess { context, source }
    }
}
