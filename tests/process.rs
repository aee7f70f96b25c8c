//! Integration tests driving real inferiors under ptrace.
//!
//! These use binaries every Linux system ships (`true`, `yes`, `echo`) so
//! no fixture compilation is needed. Entry points are recovered from the
//! ELF header plus the load bias the target computes from the auxiliary
//! vector.

use std::fs;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use lodeminer::addr::VirtAddr;
use lodeminer::errors::DebuggerError;
use lodeminer::pipe::Pipe;
use lodeminer::process::{
    HardwareStoppoint, Process, ProcessState, SyscallData, TrapKind,
};
use lodeminer::register_info::RegisterId;
use lodeminer::registers::{f80_bytes_to_f64, RegisterValue};
use lodeminer::stoppoint::{Stoppoint, StoppointMode};
use lodeminer::syscalls::{syscall_name_to_id, SyscallCatchPolicy};
use lodeminer::target::Target;

fn find_in_path(name: &str) -> PathBuf {
    std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .map(|dir| PathBuf::from(dir).join(name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| panic!("{name} not found in PATH"))
}

fn process_exists(pid: Pid) -> bool {
    nix::sys::signal::kill(pid, None).is_ok()
}

fn process_status(pid: Pid) -> char {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).expect("no /proc entry");
    let after_comm = stat.rfind(')').expect("malformed stat line") + 2;
    stat.chars().nth(after_comm).expect("malformed stat line")
}

#[test]
fn launch_success() {
    let proc = Process::launch("sleep", &["30".into()], true, None).unwrap();
    assert!(process_exists(proc.pid()));
    assert_eq!(proc.state(), ProcessState::Stopped);
}

#[test]
fn launch_no_such_program() {
    let result = Process::launch("you_do_not_have_to_be_good", &[], true, None);
    assert!(matches!(result, Err(DebuggerError::LaunchFailed(_))));
}

#[test]
fn attach_success() {
    let inferior = Process::launch("sleep", &["30".into()], false, None).unwrap();
    let attached = Process::attach(inferior.pid()).unwrap();
    assert_eq!(process_status(attached.pid()), 't');
}

#[test]
fn attach_invalid_pid() {
    let result = Process::attach(Pid::from_raw(0));
    assert!(matches!(result, Err(DebuggerError::AttachFailed(_))));
}

#[test]
fn resume_success() {
    let mut proc = Process::launch("sleep", &["30".into()], true, None).unwrap();
    proc.resume().unwrap();
    let status = process_status(proc.pid());
    assert!(status == 'R' || status == 'S');
}

#[test]
fn resume_already_exited() {
    let mut proc = Process::launch("true", &[], true, None).unwrap();
    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Exited);
    assert_eq!(reason.info, 0);
    assert!(matches!(
        proc.resume(),
        Err(DebuggerError::IllegalState(_))
    ));
}

#[test]
fn step_reports_single_step() {
    let mut proc = Process::launch("true", &[], true, None).unwrap();
    let reason = proc.step_instruction().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.trap, Some(TrapKind::SingleStep));
}

#[test]
fn breakpoint_site_ids_increase() {
    let mut proc = Process::launch("sleep", &["30".into()], true, None).unwrap();
    let first = proc
        .create_breakpoint_site(VirtAddr::from(42u64), false, false)
        .unwrap()
        .id();
    for (offset, addr) in [(1, 43u64), (2, 44), (3, 45)] {
        let id = proc
            .create_breakpoint_site(VirtAddr::from(addr), false, false)
            .unwrap()
            .id();
        assert_eq!(id, first + offset);
    }
}

#[test]
fn breakpoint_site_lookup_and_removal() {
    let mut proc = Process::launch("sleep", &["30".into()], true, None).unwrap();
    for addr in [42u64, 43, 44, 45] {
        proc.create_breakpoint_site(VirtAddr::from(addr), false, false)
            .unwrap();
    }
    assert_eq!(proc.breakpoint_sites().len(), 4);

    let site = proc
        .breakpoint_sites()
        .get_by_address(VirtAddr::from(44u64))
        .unwrap();
    assert_eq!(site.address(), VirtAddr::from(44u64));
    let id = site.id();
    assert!(proc.breakpoint_sites().contains_id(id));
    assert!(!proc.breakpoint_sites().contains_id(id + 100));

    // Duplicate addresses are rejected.
    assert!(proc
        .create_breakpoint_site(VirtAddr::from(44u64), false, false)
        .is_err());

    proc.remove_breakpoint_by_id(id).unwrap();
    proc.remove_breakpoint_by_address(VirtAddr::from(42u64)).unwrap();
    assert_eq!(proc.breakpoint_sites().len(), 2);
    assert!(matches!(
        proc.remove_breakpoint_by_id(id),
        Err(DebuggerError::NotFound(_))
    ));
}

#[test]
fn software_breakpoint_at_entry() {
    let mut channel = Pipe::new(false).unwrap();
    let stdout = channel.release_write().unwrap();

    let echo = find_in_path("echo");
    let mut target = Target::launch(&echo, &["Hello, lodeminer!".into()], Some(stdout)).unwrap();
    let entry = target.entry_point();

    let id = {
        let process = target.process_mut();
        let id = process.create_breakpoint_site(entry, false, false).unwrap().id();
        process.enable_breakpoint_by_id(id).unwrap();
        id
    };

    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.info, Signal::SIGTRAP as u8);
    assert_eq!(reason.trap, Some(TrapKind::SoftwareBreak));
    assert_eq!(target.process().get_pc(), entry);

    target.process_mut().remove_breakpoint_by_id(id).unwrap();
    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Exited);
    assert_eq!(reason.info, 0);

    let output = channel.read().unwrap();
    assert_eq!(String::from_utf8_lossy(&output), "Hello, lodeminer!\n");
}

#[test]
fn memory_reads_hide_trap_bytes() {
    let echo = find_in_path("echo");
    let mut target = Target::launch(&echo, &["hi".into()], None).unwrap();
    let entry = target.entry_point();

    let clean = target.process().read_memory(entry, 8).unwrap();

    let id = target
        .process_mut()
        .create_breakpoint_site(entry, false, false)
        .unwrap()
        .id();
    target.process_mut().enable_breakpoint_by_id(id).unwrap();

    let patched = target.process().read_memory(entry, 8).unwrap();
    assert_eq!(patched[0], 0xcc);
    assert_eq!(&patched[1..], &clean[1..]);

    let hidden = target.process().read_memory_without_traps(entry, 8).unwrap();
    assert_eq!(hidden, clean);
}

#[test]
fn memory_write_round_trip() {
    let mut proc = Process::launch("true", &[], true, None).unwrap();
    let rsp = VirtAddr::from(proc.registers().read_as_u64(RegisterId::rsp));

    let pattern = [0xca, 0xfe, 0xca, 0xfe, 0xba, 0x5e, 0xba, 0x11, 0x42, 0x17];
    proc.write_memory(rsp, &pattern).unwrap();
    let read_back = proc.read_memory(rsp, pattern.len()).unwrap();
    assert_eq!(read_back, pattern);

    let as_u64: u64 = proc.read_memory_as(rsp).unwrap();
    assert_eq!(as_u64, u64::from_le_bytes(pattern[..8].try_into().unwrap()));

    // A sub-word write must leave the surrounding bytes alone.
    proc.write_memory(rsp, &[0x01]).unwrap();
    let merged = proc.read_memory(rsp, pattern.len()).unwrap();
    assert_eq!(merged[0], 0x01);
    assert_eq!(&merged[1..], &pattern[1..]);
}

#[test]
fn register_writes_survive_a_step() {
    let mut proc = Process::launch("true", &[], true, None).unwrap();

    proc.registers_mut()
        .write_by_id(RegisterId::rsi, RegisterValue::U64(0xcafecafe))
        .unwrap();
    proc.registers_mut()
        .write_by_id(RegisterId::mm0, RegisterValue::U64(0xba5eba11))
        .unwrap();
    proc.registers_mut()
        .write_by_id(RegisterId::xmm0, RegisterValue::F64(42.24))
        .unwrap();

    // The early instructions of _start clobber none of these; a single
    // step forces a full re-read from the kernel.
    proc.step_instruction().unwrap();

    assert_eq!(proc.registers().read_as_u64(RegisterId::rsi), 0xcafecafe);
    assert_eq!(
        proc.registers().read_by_id(RegisterId::mm0),
        RegisterValue::Byte64(0xba5eba11u64.to_le_bytes())
    );
    match proc.registers().read_by_id(RegisterId::xmm0) {
        RegisterValue::Byte128(bytes) => {
            assert_eq!(f64::from_le_bytes(bytes[..8].try_into().unwrap()), 42.24);
        }
        other => panic!("unexpected xmm0 value: {other:?}"),
    }

    // st0 shares its slot with mm0, so the x87 write gets its own round.
    proc.registers_mut()
        .write_by_id(RegisterId::st0, RegisterValue::F64(42.24))
        .unwrap();
    proc.registers_mut()
        .write_by_id(RegisterId::fsw, RegisterValue::U16(0b0011100000000000))
        .unwrap();
    proc.registers_mut()
        .write_by_id(RegisterId::ftw, RegisterValue::U16(0b0011111111111111))
        .unwrap();

    proc.step_instruction().unwrap();

    match proc.registers().read_by_id(RegisterId::st0) {
        RegisterValue::LongDouble(raw) => assert_eq!(f80_bytes_to_f64(raw), 42.24),
        other => panic!("unexpected st0 value: {other:?}"),
    }
}

#[test]
fn hardware_breakpoint_at_entry() {
    let echo = find_in_path("echo");
    let mut target = Target::launch(&echo, &["hi".into()], None).unwrap();
    let entry = target.entry_point();

    let id = target
        .process_mut()
        .create_breakpoint_site(entry, true, false)
        .unwrap()
        .id();
    target.process_mut().enable_breakpoint_by_id(id).unwrap();

    // No trap byte in memory for a hardware site.
    let code = target.process().read_memory(entry, 1).unwrap();
    assert_ne!(code[0], 0xcc);

    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.trap, Some(TrapKind::HardwareBreak));
    assert_eq!(target.process().get_pc(), entry);
    assert_eq!(
        target.process().get_current_hardware_stoppoint().unwrap(),
        HardwareStoppoint::Breakpoint(id)
    );

    target.process_mut().remove_breakpoint_by_id(id).unwrap();
    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Exited);
}

#[test]
fn hardware_slots_are_finite() {
    let mut proc = Process::launch("sleep", &["30".into()], true, None).unwrap();
    let stack = VirtAddr::from(proc.registers().read_as_u64(RegisterId::rsp) & !0b111);
    for slot in 0..4usize {
        let id = proc
            .create_watchpoint(stack + 8 * slot, StoppointMode::Write, 8)
            .unwrap()
            .id();
        proc.enable_watchpoint_by_id(id).unwrap();
    }

    let id = proc
        .create_watchpoint(stack + 32usize, StoppointMode::Write, 8)
        .unwrap()
        .id();
    assert!(matches!(
        proc.enable_watchpoint_by_id(id),
        Err(DebuggerError::NoFreeDebugRegister)
    ));
}

#[test]
fn watchpoint_detects_reads() {
    let echo = find_in_path("echo");
    let mut target = Target::launch(&echo, &["bamboozle".into()], None).unwrap();

    // At entry the stack holds argc, argv[0], argv[1]; echo must read the
    // argv[1] string to print it.
    let rsp = VirtAddr::from(target.process().registers().read_as_u64(RegisterId::rsp));
    let argv1: u64 = target.process().read_memory_as(rsp + 16usize).unwrap();
    assert_ne!(argv1, 0);

    let id = target
        .process_mut()
        .create_watchpoint(VirtAddr::from(argv1), StoppointMode::ReadWrite, 1)
        .unwrap()
        .id();
    target.process_mut().enable_watchpoint_by_id(id).unwrap();

    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.info, Signal::SIGTRAP as u8);
    assert_eq!(reason.trap, Some(TrapKind::HardwareBreak));
    assert_eq!(
        target.process().get_current_hardware_stoppoint().unwrap(),
        HardwareStoppoint::Watchpoint(id)
    );

    // The fire refreshed the watched value: first byte of "bamboozle".
    let watch = target.process().watchpoints().get_by_id(id).unwrap();
    assert_eq!(watch.data() & 0xff, u64::from(b'b'));

    target.process_mut().remove_watchpoint_by_id(id).unwrap();
    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Exited);
}

#[test]
fn load_bias_matches_process_maps() {
    let echo = find_in_path("echo");
    let target = Target::launch(&echo, &["hi".into()], None).unwrap();

    // The auxv-derived entry point must land in an executable mapping of
    // the inferior.
    let entry = target.entry_point();
    let maps = proc_maps::get_process_maps(target.process().pid().as_raw()).unwrap();
    let covering = maps
        .iter()
        .find(|map| map.start() <= entry.usize() && entry.usize() < map.start() + map.size())
        .expect("entry point is not mapped");
    assert!(covering.is_exec());
}

#[test]
fn syscall_catchpoint_pairs_entry_and_exit() {
    let devnull = std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .unwrap();

    let echo = find_in_path("echo");
    let mut target = Target::launch(&echo, &["hi".into()], Some(devnull.into())).unwrap();

    let write_id = syscall_name_to_id("write").unwrap();
    target
        .process_mut()
        .set_syscall_catch_policy(SyscallCatchPolicy::Some(vec![write_id]));

    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.info, Signal::SIGTRAP as u8);
    assert_eq!(reason.trap, Some(TrapKind::Syscall));
    let entry_info = reason.syscall.unwrap();
    assert_eq!(entry_info.id, write_id);
    assert!(entry_info.entry);
    assert!(matches!(entry_info.data, SyscallData::Args(_)));

    target.process_mut().resume().unwrap();
    let reason = target.process_mut().wait_on_signal().unwrap();
    assert_eq!(reason.trap, Some(TrapKind::Syscall));
    let exit_info = reason.syscall.unwrap();
    assert_eq!(exit_info.id, write_id);
    assert!(!exit_info.entry);
    assert!(matches!(exit_info.data, SyscallData::Ret(_)));
}

#[test]
fn catch_all_syscalls_stops_immediately() {
    let mut proc = Process::launch("true", &[], true, None).unwrap();
    proc.set_syscall_catch_policy(SyscallCatchPolicy::All);

    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();
    assert_eq!(reason.trap, Some(TrapKind::Syscall));
    let entry_info = reason.syscall.unwrap();
    assert!(entry_info.entry);

    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();
    let exit_info = reason.syscall.unwrap();
    assert!(!exit_info.entry);
    assert_eq!(exit_info.id, entry_info.id);
}
