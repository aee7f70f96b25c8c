//! The process controller: owns the inferior's lifecycle under ptrace.
//!
//! Everything that touches the kernel tracing interface funnels through
//! here. The controller launches or attaches, resumes and single-steps,
//! demultiplexes SIGTRAPs in [`Process::wait_on_signal`], arbitrates the
//! four hardware debug registers, and performs memory I/O against the
//! stopped inferior.
//!
//! The tracer is single-threaded: every state-mutating operation runs
//! against a stopped inferior, and `wait_on_signal` is the only suspension
//! point.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::os::fd::OwnedFd;
use std::path::Path;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, setpgid, ForkResult, Pid};
use tracing::{debug, trace, warn};

use crate::addr::VirtAddr;
use crate::breakpoint::BreakpointSite;
use crate::consts::{SI_KERNEL, TRAP_BRKPT, TRAP_HWBKPT, TRAP_TRACE};
use crate::errors::{DebuggerError, Result};
use crate::pipe::Pipe;
use crate::register_info::{RegisterId, DEBUG_REGISTER_IDS, SYSCALL_ARG_REGISTER_IDS};
use crate::registers::{RegisterValue, Registers};
use crate::stoppoint::{Stoppoint, StoppointCollection, StoppointMode};
use crate::syscalls::SyscallCatchPolicy;
use crate::watchpoint::WatchpointSite;

const PAGE_SIZE: u64 = 0x1000;

/// Lifecycle state of the inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Running,
    Exited,
    Terminated,
}

impl ProcessState {
    fn name(self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::Terminated => "terminated",
        }
    }
}

/// Why a SIGTRAP stopped the inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    SingleStep,
    SoftwareBreak,
    HardwareBreak,
    Syscall,
    Unknown,
}

/// Arguments or result of the syscall a catchpoint stopped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallData {
    Args([u64; 6]),
    Ret(i64),
}

/// Decoded syscall stop: number plus entry arguments or exit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallInfo {
    pub id: u16,
    pub entry: bool,
    pub data: SyscallData,
}

/// What `wait_on_signal` observed.
#[derive(Debug, Clone, Copy)]
pub struct StopReason {
    pub state: ProcessState,
    /// Exit code for `Exited`, signal number otherwise.
    pub info: u8,
    pub trap: Option<TrapKind>,
    pub syscall: Option<SyscallInfo>,
}

/// Which kind of hardware stoppoint resolved from DR6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStoppoint {
    Breakpoint(i32),
    Watchpoint(i32),
}

/// Wraps one traced inferior process.
pub struct Process {
    pid: Pid,
    state: ProcessState,
    is_attached: bool,
    terminate_on_end: bool,
    registers: Registers,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<WatchpointSite>,
    syscall_catch_policy: SyscallCatchPolicy,
    expecting_syscall_exit: bool,
    next_breakpoint_id: i32,
    next_watchpoint_id: i32,
}

fn set_ptrace_options(pid: Pid) -> Result<()> {
    // Bit 7 of the trap signal distinguishes syscall stops from the rest.
    ptrace::setoptions(pid, ptrace::Options::PTRACE_O_TRACESYSGOOD)
        .map_err(DebuggerError::ptrace("ptrace set options with TRACESYSGOOD failed"))
}

fn encode_hardware_stoppoint_mode(mode: StoppointMode) -> u64 {
    match mode {
        StoppointMode::Execute => 0b00,
        StoppointMode::Write => 0b01,
        StoppointMode::ReadWrite => 0b11,
    }
}

fn encode_hardware_stoppoint_size(size: usize) -> Result<u64> {
    match size {
        1 => Ok(0b00),
        2 => Ok(0b01),
        4 => Ok(0b11),
        8 => Ok(0b10),
        _ => Err(DebuggerError::InvalidFormat(format!(
            "invalid hardware stoppoint size {size}"
        ))),
    }
}

fn find_free_stoppoint_register(control: u64) -> Result<usize> {
    for i in 0..4 {
        if control & (0b11 << (i * 2)) == 0 {
            return Ok(i);
        }
    }
    Err(DebuggerError::NoFreeDebugRegister)
}

/// Installs a hardware stoppoint into a free DR0-DR3 slot and returns the
/// slot index. DR7 is read-modify-written so other slots are untouched.
pub(crate) fn set_hardware_stoppoint(
    regs: &mut Registers,
    address: VirtAddr,
    mode: StoppointMode,
    size: usize,
) -> Result<i32> {
    let control = regs.read_as_u64(RegisterId::dr7);
    let free_slot = find_free_stoppoint_register(control)?;

    regs.write_by_id(
        DEBUG_REGISTER_IDS[free_slot],
        RegisterValue::U64(address.u64()),
    )?;

    let mode_flag = encode_hardware_stoppoint_mode(mode);
    let size_flag = encode_hardware_stoppoint_size(size)?;

    let enable_bit = 1u64 << (free_slot * 2);
    let mode_bits = mode_flag << (free_slot * 4 + 16);
    let size_bits = size_flag << (free_slot * 4 + 18);
    let clear_mask = (0b11u64 << (free_slot * 2)) | (0b1111u64 << (free_slot * 4 + 16));

    let masked = (control & !clear_mask) | enable_bit | mode_bits | size_bits;
    regs.write_by_id(RegisterId::dr7, RegisterValue::U64(masked))?;

    Ok(free_slot as i32)
}

/// Clears the DR slot at `index` and releases its DR7 bits.
pub(crate) fn clear_hardware_stoppoint(regs: &mut Registers, index: i32) -> Result<()> {
    let slot = usize::try_from(index)
        .ok()
        .filter(|i| *i < 4)
        .ok_or_else(|| DebuggerError::NotFound(format!("debug register slot {index}")))?;

    regs.write_by_id(DEBUG_REGISTER_IDS[slot], RegisterValue::U64(0))?;

    let control = regs.read_as_u64(RegisterId::dr7);
    let clear_mask = (0b11u64 << (slot * 2)) | (0b1111u64 << (slot * 4 + 16));
    regs.write_by_id(RegisterId::dr7, RegisterValue::U64(control & !clear_mask))
}

impl Process {
    /// Forks and execs `path`, optionally under trace with stdout replaced.
    ///
    /// The child reports pre-exec failures through a close-on-exec pipe; a
    /// non-empty read on the parent side means the child never reached
    /// `execvp` and launch fails with the child's message.
    pub fn launch(
        path: impl AsRef<Path>,
        args: &[String],
        debug: bool,
        stdout_replacement: Option<OwnedFd>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut channel = Pipe::new(true)?;

        let fork_result = unsafe { fork() }
            .map_err(|e| DebuggerError::LaunchFailed(format!("fork failed: {e}")))?;

        match fork_result {
            ForkResult::Child => {
                channel.close_read();

                if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
                    exit_with_error(&mut channel, format!("Could not set pgid: {e}"));
                }
                // A fixed address space keeps entry-point math stable
                // across runs.
                match personality::get() {
                    Ok(persona) => {
                        if let Err(e) = personality::set(persona | Persona::ADDR_NO_RANDOMIZE) {
                            exit_with_error(
                                &mut channel,
                                format!("Could not disable ASLR: {e}"),
                            );
                        }
                    }
                    Err(e) => {
                        exit_with_error(&mut channel, format!("Could not read personality: {e}"))
                    }
                }

                if let Some(fd) = stdout_replacement {
                    if let Err(e) = nix::unistd::dup2_stdout(&fd) {
                        exit_with_error(
                            &mut channel,
                            format!("stdout replacement failed: {e}"),
                        );
                    }
                }

                if debug {
                    if let Err(e) = ptrace::traceme() {
                        exit_with_error(&mut channel, format!("Tracing failed: {e}"));
                    }
                }

                let c_path = match CString::new(path.to_string_lossy().as_bytes()) {
                    Ok(p) => p,
                    Err(e) => exit_with_error(&mut channel, format!("Bad path: {e}")),
                };
                let mut argv = vec![c_path.clone()];
                for arg in args {
                    match CString::new(arg.as_bytes()) {
                        Ok(a) => argv.push(a),
                        Err(e) => exit_with_error(&mut channel, format!("Bad argument: {e}")),
                    }
                }

                match execvp(&c_path, &argv) {
                    Err(e) => exit_with_error(&mut channel, format!("Exec failed: {e}")),
                    Ok(infallible) => match infallible {},
                }
            }
            ForkResult::Parent { child } => {
                channel.close_write();
                let data = channel.read()?;
                channel.close_read();

                if !data.is_empty() {
                    let _ = waitpid(child, None);
                    return Err(DebuggerError::LaunchFailed(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }

                debug!("launched {} as pid {child}", path.display());
                let mut process = Process {
                    pid: child,
                    state: if debug {
                        ProcessState::Stopped
                    } else {
                        ProcessState::Running
                    },
                    is_attached: debug,
                    terminate_on_end: true,
                    registers: Registers::new(child),
                    breakpoint_sites: StoppointCollection::new(),
                    watchpoints: StoppointCollection::new(),
                    syscall_catch_policy: SyscallCatchPolicy::None,
                    expecting_syscall_exit: false,
                    next_breakpoint_id: 0,
                    next_watchpoint_id: 0,
                };

                if debug {
                    // The kernel raises a SIGTRAP when the traced child
                    // execs; consume it so the caller sees a stopped
                    // inferior.
                    process.wait_on_signal()?;
                    set_ptrace_options(child)?;
                }

                Ok(process)
            }
        }
    }

    /// Attaches to a running process by pid.
    pub fn attach(pid: Pid) -> Result<Self> {
        if pid.as_raw() == 0 {
            return Err(DebuggerError::AttachFailed("invalid PID 0".into()));
        }

        ptrace::attach(pid).map_err(|e| DebuggerError::AttachFailed(format!("pid {pid}: {e}")))?;

        let mut process = Process {
            pid,
            state: ProcessState::Stopped,
            is_attached: true,
            terminate_on_end: false,
            registers: Registers::new(pid),
            breakpoint_sites: StoppointCollection::new(),
            watchpoints: StoppointCollection::new(),
            syscall_catch_policy: SyscallCatchPolicy::None,
            expecting_syscall_exit: false,
            next_breakpoint_id: 0,
            next_watchpoint_id: 0,
        };
        process.wait_on_signal()?;
        set_ptrace_options(pid)?;
        Ok(process)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    pub fn watchpoints(&self) -> &StoppointCollection<WatchpointSite> {
        &self.watchpoints
    }

    pub fn set_syscall_catch_policy(&mut self, policy: SyscallCatchPolicy) {
        self.syscall_catch_policy = policy;
    }

    pub fn get_pc(&self) -> VirtAddr {
        VirtAddr::from(self.registers.read_as_u64(RegisterId::rip))
    }

    pub fn set_pc(&mut self, address: VirtAddr) -> Result<()> {
        self.registers
            .write_by_id(RegisterId::rip, RegisterValue::U64(address.u64()))
    }

    fn expect_stopped(&self, operation: &'static str) -> Result<()> {
        if self.state == ProcessState::Stopped {
            Ok(())
        } else {
            warn!("{operation} requested while {}", self.state.name());
            Err(DebuggerError::IllegalState(self.state.name()))
        }
    }

    /// Resumes the inferior.
    ///
    /// A software breakpoint under the instruction pointer is stepped over
    /// first: disable, single-step, re-enable. The continue request stops
    /// at syscalls when the catch policy asks for them.
    pub fn resume(&mut self) -> Result<()> {
        self.expect_stopped("resume")?;

        let pc = self.get_pc();
        if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            trace!("stepping over breakpoint at {pc}");
            let site = self
                .breakpoint_sites
                .get_by_address_mut(pc)
                .expect("checked above");
            site.disable(&mut self.registers)?;
            ptrace::step(self.pid, None).map_err(DebuggerError::ptrace("Could not single step"))?;
            waitpid(self.pid, None).map_err(DebuggerError::ptrace("waitpid failed"))?;
            site.enable(&mut self.registers)?;
        }

        if self.syscall_catch_policy.traces_syscalls() {
            ptrace::syscall(self.pid, None)
                .map_err(DebuggerError::ptrace("Could not resume to syscall"))?;
        } else {
            ptrace::cont(self.pid, None).map_err(DebuggerError::ptrace("Could not resume"))?;
        }
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Executes exactly one instruction and returns the resulting stop.
    ///
    /// A software breakpoint sitting at the instruction pointer is disabled
    /// around the step and re-enabled after.
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        self.expect_stopped("step")?;

        let pc = self.get_pc();
        let to_reenable = if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            let site = self
                .breakpoint_sites
                .get_by_address_mut(pc)
                .expect("checked above");
            site.disable(&mut self.registers)?;
            Some(site.id())
        } else {
            None
        };

        ptrace::step(self.pid, None).map_err(DebuggerError::ptrace("Could not single step"))?;
        let reason = self.wait_on_signal()?;

        if let Some(id) = to_reenable {
            if let Some(site) = self.breakpoint_sites.get_by_id_mut(id) {
                site.enable(&mut self.registers)?;
            }
        }
        Ok(reason)
    }

    /// Blocks until the inferior changes state and decodes why.
    ///
    /// On a stop the entire register file is refreshed before anything else
    /// is decided. Software-breakpoint traps roll the pc back onto the trap
    /// address; hardware traps that resolve to a watchpoint refresh its
    /// old/new values; syscall stops the catch policy filters out are
    /// transparently resumed.
    pub fn wait_on_signal(&mut self) -> Result<StopReason> {
        let status =
            waitpid(self.pid, None).map_err(DebuggerError::ptrace("waitpid failed"))?;

        match status {
            WaitStatus::Exited(_, exit_code) => {
                self.state = ProcessState::Exited;
                Ok(StopReason {
                    state: ProcessState::Exited,
                    info: exit_code as u8,
                    trap: None,
                    syscall: None,
                })
            }
            WaitStatus::Signaled(_, signal, _) => {
                debug!("inferior terminated by signal {signal}");
                self.state = ProcessState::Terminated;
                Ok(StopReason {
                    state: ProcessState::Terminated,
                    info: signal as u8,
                    trap: None,
                    syscall: None,
                })
            }
            WaitStatus::Stopped(_, signal) => {
                self.state = ProcessState::Stopped;
                let mut reason = StopReason {
                    state: ProcessState::Stopped,
                    info: signal as u8,
                    trap: None,
                    syscall: None,
                };

                if !self.is_attached {
                    return Ok(reason);
                }
                self.registers.read_all()?;
                // Not a syscall stop, whatever else it is.
                self.expecting_syscall_exit = false;

                if signal == Signal::SIGTRAP {
                    reason.trap = Some(self.classify_trap()?);

                    let instruction_begin = self.get_pc() - 1i64;
                    if reason.trap == Some(TrapKind::SoftwareBreak)
                        && self
                            .breakpoint_sites
                            .enabled_stoppoint_at_address(instruction_begin)
                    {
                        // The trap byte has already executed; the user
                        // wants to see the breakpoint's own address.
                        self.set_pc(instruction_begin)?;
                    } else if reason.trap == Some(TrapKind::HardwareBreak) {
                        if let HardwareStoppoint::Watchpoint(id) =
                            self.get_current_hardware_stoppoint()?
                        {
                            self.refresh_watchpoint_data(id)?;
                        }
                    }
                }
                Ok(reason)
            }
            WaitStatus::PtraceSyscall(_) => {
                self.state = ProcessState::Stopped;
                self.registers.read_all()?;

                let info = self.decode_syscall_stop();
                let reason = StopReason {
                    state: ProcessState::Stopped,
                    info: Signal::SIGTRAP as u8,
                    trap: Some(TrapKind::Syscall),
                    syscall: Some(info),
                };

                if !self.syscall_catch_policy.should_stop_for(info.id) {
                    trace!("resuming past uncaught syscall {}", info.id);
                    self.resume()?;
                    return self.wait_on_signal();
                }
                Ok(reason)
            }
            other => {
                warn!("unexpected wait status: {other:?}");
                Ok(StopReason {
                    state: self.state,
                    info: 0,
                    trap: None,
                    syscall: None,
                })
            }
        }
    }

    /// Classifies a SIGTRAP via the kernel's signal info.
    fn classify_trap(&self) -> Result<TrapKind> {
        let info = ptrace::getsiginfo(self.pid)
            .map_err(DebuggerError::ptrace("Failed to get signal info"))?;
        Ok(match info.si_code {
            TRAP_TRACE => TrapKind::SingleStep,
            TRAP_BRKPT | SI_KERNEL => TrapKind::SoftwareBreak,
            TRAP_HWBKPT => TrapKind::HardwareBreak,
            code => {
                trace!("strange SIGTRAP code: {code}");
                TrapKind::Unknown
            }
        })
    }

    /// Builds the syscall decode for the current syscall stop, flipping the
    /// entry/exit expectation.
    fn decode_syscall_stop(&mut self) -> SyscallInfo {
        let id = self.registers.read_as_u64(RegisterId::orig_rax) as u16;
        if self.expecting_syscall_exit {
            self.expecting_syscall_exit = false;
            SyscallInfo {
                id,
                entry: false,
                data: SyscallData::Ret(self.registers.read_as_u64(RegisterId::rax) as i64),
            }
        } else {
            self.expecting_syscall_exit = true;
            let mut args = [0u64; 6];
            for (slot, reg) in args.iter_mut().zip(SYSCALL_ARG_REGISTER_IDS) {
                *slot = self.registers.read_as_u64(reg);
            }
            SyscallInfo {
                id,
                entry: true,
                data: SyscallData::Args(args),
            }
        }
    }

    /// Decodes DR6 to find which hardware stoppoint fired.
    pub fn get_current_hardware_stoppoint(&self) -> Result<HardwareStoppoint> {
        let status = self.registers.read_as_u64(RegisterId::dr6);
        if status & 0b1111 == 0 {
            return Err(DebuggerError::NotFound("fired hardware stoppoint".into()));
        }

        let slot = status.trailing_zeros() as usize;
        let address = VirtAddr::from(self.registers.read_as_u64(DEBUG_REGISTER_IDS[slot]));

        if let Some(site) = self.breakpoint_sites.get_by_address(address) {
            if site.is_hardware() {
                return Ok(HardwareStoppoint::Breakpoint(site.id()));
            }
        }
        self.watchpoints
            .get_by_address(address)
            .map(|watch| HardwareStoppoint::Watchpoint(watch.id()))
            .ok_or_else(|| {
                DebuggerError::NotFound(format!("hardware stoppoint at {address}"))
            })
    }

    fn refresh_watchpoint_data(&mut self, id: i32) -> Result<()> {
        let (address, size) = match self.watchpoints.get_by_id(id) {
            Some(watch) => (watch.address(), watch.size()),
            None => return Ok(()),
        };
        let memory = self.read_memory(address, size)?;
        if let Some(watch) = self.watchpoints.get_by_id_mut(id) {
            watch.update_data(&memory);
        }
        Ok(())
    }

    /// Sends the inferior a soft stop and waits for it.
    pub fn stop(&mut self) -> Result<StopReason> {
        if self.state != ProcessState::Running {
            return Err(DebuggerError::IllegalState(self.state.name()));
        }
        kill(self.pid, Signal::SIGSTOP).map_err(DebuggerError::ptrace("Could not stop"))?;
        self.wait_on_signal()
    }

    /// Registers a breakpoint site. The site starts disabled.
    pub fn create_breakpoint_site(
        &mut self,
        address: VirtAddr,
        hardware: bool,
        internal: bool,
    ) -> Result<&mut BreakpointSite> {
        if self.breakpoint_sites.contains_address(address) {
            return Err(DebuggerError::IllegalState(
                "breakpoint site already created at that address",
            ));
        }
        if !internal {
            self.next_breakpoint_id += 1;
        }
        let site = BreakpointSite::new(self.next_breakpoint_id, address, internal, hardware);
        Ok(self.breakpoint_sites.push(site))
    }

    /// Registers a watchpoint. The site starts disabled.
    pub fn create_watchpoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<&mut WatchpointSite> {
        if self.watchpoints.contains_address(address) {
            return Err(DebuggerError::IllegalState(
                "watchpoint already created at that address",
            ));
        }
        self.next_watchpoint_id += 1;
        let watch = WatchpointSite::new(self.next_watchpoint_id, address, mode, size)?;
        Ok(self.watchpoints.push(watch))
    }

    pub fn enable_breakpoint_by_id(&mut self, id: i32) -> Result<()> {
        let site = self
            .breakpoint_sites
            .get_by_id_mut(id)
            .ok_or_else(|| DebuggerError::NotFound(format!("breakpoint {id}")))?;
        site.enable(&mut self.registers)
    }

    pub fn disable_breakpoint_by_id(&mut self, id: i32) -> Result<()> {
        let site = self
            .breakpoint_sites
            .get_by_id_mut(id)
            .ok_or_else(|| DebuggerError::NotFound(format!("breakpoint {id}")))?;
        site.disable(&mut self.registers)
    }

    pub fn enable_breakpoint_at_address(&mut self, address: VirtAddr) -> Result<()> {
        let site = self
            .breakpoint_sites
            .get_by_address_mut(address)
            .ok_or_else(|| DebuggerError::NotFound(format!("breakpoint at {address}")))?;
        site.enable(&mut self.registers)
    }

    /// Removes a breakpoint site, disabling it first so neither a trap byte
    /// nor a debug-register reservation outlives the removal.
    pub fn remove_breakpoint_by_id(&mut self, id: i32) -> Result<()> {
        self.disable_breakpoint_by_id(id)?;
        self.breakpoint_sites.remove_by_id(id);
        Ok(())
    }

    pub fn remove_breakpoint_by_address(&mut self, address: VirtAddr) -> Result<()> {
        let id = self
            .breakpoint_sites
            .get_by_address(address)
            .map(|site| site.id())
            .ok_or_else(|| DebuggerError::NotFound(format!("breakpoint at {address}")))?;
        self.remove_breakpoint_by_id(id)
    }

    pub fn enable_watchpoint_by_id(&mut self, id: i32) -> Result<()> {
        let watch = self
            .watchpoints
            .get_by_id_mut(id)
            .ok_or_else(|| DebuggerError::NotFound(format!("watchpoint {id}")))?;
        watch.enable(&mut self.registers)?;
        self.refresh_watchpoint_data(id)
    }

    pub fn disable_watchpoint_by_id(&mut self, id: i32) -> Result<()> {
        let watch = self
            .watchpoints
            .get_by_id_mut(id)
            .ok_or_else(|| DebuggerError::NotFound(format!("watchpoint {id}")))?;
        watch.disable(&mut self.registers)
    }

    pub fn remove_watchpoint_by_id(&mut self, id: i32) -> Result<()> {
        self.disable_watchpoint_by_id(id)?;
        self.watchpoints.remove_by_id(id);
        Ok(())
    }

    /// Reads `amount` bytes of inferior memory starting at `address`.
    ///
    /// The read is split at page boundaries into one vectored
    /// `process_vm_readv` call.
    pub fn read_memory(&self, address: VirtAddr, amount: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; amount];

        let mut remote_iovs = Vec::new();
        let mut current = address;
        let mut remaining = amount;
        while remaining > 0 {
            let up_to_next_page = (PAGE_SIZE - (current.u64() & (PAGE_SIZE - 1))) as usize;
            let chunk = remaining.min(up_to_next_page);
            remote_iovs.push(RemoteIoVec {
                base: current.usize(),
                len: chunk,
            });
            remaining -= chunk;
            current += chunk;
        }

        let read = process_vm_readv(
            self.pid,
            &mut [std::io::IoSliceMut::new(&mut buffer)],
            &remote_iovs,
        )
        .map_err(DebuggerError::memory("Could not read process memory"))?;
        buffer.truncate(read);
        Ok(buffer)
    }

    /// Like [`Process::read_memory`], but with every enabled software
    /// breakpoint's trap byte replaced by the instruction byte it saved.
    pub fn read_memory_without_traps(&self, address: VirtAddr, amount: usize) -> Result<Vec<u8>> {
        let mut memory = self.read_memory(address, amount)?;

        for site in self
            .breakpoint_sites
            .get_in_region(address, address + amount)
        {
            if !site.is_enabled() || site.is_hardware() {
                continue;
            }
            if let Some(saved) = site.saved_byte() {
                let offset = (site.address() - address) as usize;
                if offset < memory.len() {
                    memory[offset] = saved;
                }
            }
        }
        Ok(memory)
    }

    /// Reads a little-endian value of type `T` from inferior memory.
    pub fn read_memory_as<T: FromBytes>(&self, address: VirtAddr) -> Result<T> {
        let data = self.read_memory(address, std::mem::size_of::<T>())?;
        T::from_le_byte_slice(&data).ok_or_else(|| {
            DebuggerError::InvalidFormat(format!("short read at {address}"))
        })
    }

    /// Writes bytes into inferior memory in 8-byte pokes.
    ///
    /// Sub-word tails merge with the existing memory so only the requested
    /// bytes change.
    pub fn write_memory(&self, address: VirtAddr, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let remaining = &data[written..];
            let word = if remaining.len() >= 8 {
                let mut chunk = [0u8; 8];
                chunk.copy_from_slice(&remaining[..8]);
                chunk
            } else {
                let existing = self.read_memory(address + written, 8)?;
                if existing.len() < 8 {
                    return Err(DebuggerError::InvalidFormat(format!(
                        "short read while merging a partial write at {address}"
                    )));
                }
                let mut chunk = [0u8; 8];
                chunk.copy_from_slice(&existing[..8]);
                chunk[..remaining.len()].copy_from_slice(remaining);
                chunk
            };

            ptrace::write(
                self.pid,
                (address + written).u64() as ptrace::AddressType,
                i64::from_le_bytes(word),
            )
            .map_err(DebuggerError::memory("Failed to write virtual memory"))?;
            written += 8;
        }
        Ok(())
    }

    /// Parses `/proc/<pid>/auxv` into an id -> value map.
    pub fn get_auxv(&self) -> Result<HashMap<u64, u64>> {
        const AT_NULL: u64 = 0;
        let raw = fs::read(format!("/proc/{}/auxv", self.pid))?;

        let mut auxv = HashMap::new();
        for entry in raw.chunks_exact(16) {
            let id = u64::from_le_bytes(entry[..8].try_into().unwrap());
            if id == AT_NULL {
                break;
            }
            let value = u64::from_le_bytes(entry[8..].try_into().unwrap());
            auxv.insert(id, value);
        }
        Ok(auxv)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.pid.as_raw() == 0 {
            return;
        }
        if self.is_attached {
            if self.state == ProcessState::Running {
                let _ = kill(self.pid, Signal::SIGSTOP);
                let _ = waitpid(self.pid, None);
            }
            let _ = ptrace::detach(self.pid, None);
            let _ = kill(self.pid, Signal::SIGCONT);
        }
        if self.terminate_on_end {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

fn exit_with_error(channel: &mut Pipe, message: String) -> ! {
    let _ = channel.write(message.as_bytes());
    std::process::exit(-1)
}

/// Plain-old-data types readable straight out of inferior memory.
pub trait FromBytes: Sized {
    fn from_le_byte_slice(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_from_bytes {
    ($($ty:ty),*) => {
        $(impl FromBytes for $ty {
            fn from_le_byte_slice(bytes: &[u8]) -> Option<Self> {
                Some(<$ty>::from_le_bytes(bytes.try_into().ok()?))
            }
        })*
    };
}

impl_from_bytes!(u8, u16, u32, u64, i8, i16, i32, i64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_free_stoppoint_register() {
        assert_eq!(find_free_stoppoint_register(0).unwrap(), 0);
        assert_eq!(find_free_stoppoint_register(0b01).unwrap(), 1);
        assert_eq!(find_free_stoppoint_register(0b0101).unwrap(), 2);
        assert_eq!(find_free_stoppoint_register(0b010101).unwrap(), 3);
        assert!(matches!(
            find_free_stoppoint_register(0b01010101),
            Err(DebuggerError::NoFreeDebugRegister)
        ));
    }

    #[test]
    fn test_hardware_stoppoint_encoding() {
        assert_eq!(encode_hardware_stoppoint_mode(StoppointMode::Execute), 0b00);
        assert_eq!(encode_hardware_stoppoint_mode(StoppointMode::Write), 0b01);
        assert_eq!(
            encode_hardware_stoppoint_mode(StoppointMode::ReadWrite),
            0b11
        );

        assert_eq!(encode_hardware_stoppoint_size(1).unwrap(), 0b00);
        assert_eq!(encode_hardware_stoppoint_size(2).unwrap(), 0b01);
        assert_eq!(encode_hardware_stoppoint_size(4).unwrap(), 0b11);
        assert_eq!(encode_hardware_stoppoint_size(8).unwrap(), 0b10);
        assert!(encode_hardware_stoppoint_size(3).is_err());
    }

    #[test]
    fn test_page_chunking_math() {
        // A read that crosses a page boundary must split into two chunks.
        let address = VirtAddr::from(PAGE_SIZE - 8);
        let first_chunk = (PAGE_SIZE - (address.u64() & (PAGE_SIZE - 1))) as usize;
        assert_eq!(first_chunk, 8);
    }
}
