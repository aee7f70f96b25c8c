use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};

use clap::Parser;
use dialoguer::BasicHistory;
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, warn};

use lodeminer::addr::VirtAddr;
use lodeminer::errors::{DebuggerError, Result};
use lodeminer::parse::{parse_byte_vector, parse_hex, parse_register_value};
use lodeminer::process::{ProcessState, StopReason, SyscallData, TrapKind};
use lodeminer::register_info::{register_info_by_name, RegisterType, REGISTER_INFOS};
use lodeminer::stoppoint::{Stoppoint, StoppointMode};
use lodeminer::syscalls::{syscall_id_to_name, syscall_name_to_id, SyscallCatchPolicy};
use lodeminer::target::Target;

/// Launch or attach the lodeminer debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as inferior
    #[clap(short, long)]
    run: Option<PathBuf>,

    /// Arguments for the launched program
    #[clap(requires = "run")]
    args: Vec<String>,

    /// Attach to an already running process instead
    #[clap(short, long, conflicts_with = "run")]
    attach: Option<i32>,
}

static INFERIOR_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_sigint(_: i32) {
    // Relay an interactive interrupt to the inferior as a soft stop.
    let pid = INFERIOR_PID.load(Ordering::Relaxed);
    if pid != 0 {
        let _ = kill(Pid::from_raw(pid), Signal::SIGSTOP);
    }
}

fn main() -> Result<()> {
    setup_logger();

    let args = Args::parse();
    let mut target = match (&args.run, args.attach) {
        (Some(path), None) => Target::launch(path, &args.args, None)?,
        (None, Some(pid)) => Target::attach(Pid::from_raw(pid))?,
        _ => {
            error!("pass either --run PROGRAM or --attach PID");
            std::process::exit(1);
        }
    };

    INFERIOR_PID.store(target.process().pid().as_raw(), Ordering::Relaxed);
    unsafe { signal(Signal::SIGINT, SigHandler::Handler(handle_sigint)) }?;

    println!(
        "inferior pid {} at entry {}",
        target.process().pid(),
        target.entry_point()
    );

    let mut history = BasicHistory::new();
    loop {
        let line: String = dialoguer::Input::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .history_with(&mut history)
            .interact_text()?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match handle_command(&mut target, &words) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => error!("{e}"),
        }
    }

    Ok(())
}

fn setup_logger() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}

/// Dispatches one REPL line. Returns `Ok(true)` to quit.
fn handle_command(target: &mut Target, words: &[&str]) -> Result<bool> {
    match words[0] {
        "continue" | "cont" | "c" => {
            target.process_mut().resume()?;
            let reason = target.process_mut().wait_on_signal()?;
            print_stop(target, &reason);
        }
        "step" | "stepi" | "s" => {
            let reason = target.process_mut().step_instruction()?;
            print_stop(target, &reason);
        }
        "register" | "reg" => handle_register_command(target, &words[1..])?,
        "memory" | "mem" => handle_memory_command(target, &words[1..])?,
        "breakpoint" | "bp" => handle_breakpoint_command(target, &words[1..])?,
        "watchpoint" | "wp" => handle_watchpoint_command(target, &words[1..])?,
        "catchpoint" | "catch" => handle_catchpoint_command(target, &words[1..])?,
        "disassemble" | "dis" => handle_disassemble_command(target, &words[1..])?,
        "quit" | "exit" | "q" => return Ok(true),
        command => error!("unknown command: {command}"),
    }
    Ok(false)
}

fn print_stop(target: &Target, reason: &StopReason) {
    match reason.state {
        ProcessState::Exited => {
            println!("inferior exited with status {}", reason.info);
            return;
        }
        ProcessState::Terminated => {
            println!("inferior terminated by signal {}", reason.info);
            return;
        }
        ProcessState::Running | ProcessState::Stopped => {}
    }

    let pc = target.process().get_pc();
    let location = match target.function_name_at(pc) {
        Some(name) => format!("{pc} ({name})"),
        None => format!("{pc}"),
    };
    println!("inferior stopped at {location}");

    match reason.trap {
        Some(TrapKind::SingleStep) => println!("  (single step)"),
        Some(TrapKind::SoftwareBreak) => println!("  (software breakpoint)"),
        Some(TrapKind::HardwareBreak) => println!("  (hardware breakpoint or watchpoint)"),
        Some(TrapKind::Syscall) => {
            if let Some(info) = &reason.syscall {
                let name = syscall_id_to_name(info.id).unwrap_or("unknown");
                match info.data {
                    SyscallData::Args(args) => {
                        let rendered: Vec<String> =
                            args.iter().map(|a| format!("{a:#x}")).collect();
                        println!("  syscall entry: {name}({})", rendered.join(","));
                    }
                    SyscallData::Ret(ret) => {
                        println!("  syscall exit: {name} returned {ret:#x}");
                    }
                }
            }
        }
        Some(TrapKind::Unknown) | None => {
            debug!("stop without a trap classification: signal {}", reason.info);
        }
    }
}

fn handle_register_command(target: &mut Target, words: &[&str]) -> Result<()> {
    match words {
        ["read"] | [] => print_registers(target, false),
        ["read", "all"] => print_registers(target, true),
        ["read", name] => {
            let info = register_info_by_name(name)
                .ok_or_else(|| DebuggerError::UnknownRegister((*name).to_string()))?;
            println!("{:<10}{}", info.name, target.process().registers().read(info));
        }
        ["write", name, value] => {
            let info = register_info_by_name(name)
                .ok_or_else(|| DebuggerError::UnknownRegister((*name).to_string()))?;
            let value = parse_register_value(info, value)?;
            target.process_mut().registers_mut().write(info, value)?;
        }
        _ => error!("usage: register read [NAME|all] | register write NAME VALUE"),
    }
    Ok(())
}

fn print_registers(target: &Target, all: bool) {
    for info in REGISTER_INFOS {
        let wanted = match info.reg_type {
            RegisterType::Gpr => true,
            RegisterType::Fpr | RegisterType::Dr => all,
            RegisterType::SubGpr => false,
        };
        if !wanted {
            continue;
        }
        println!("{:<10}{}", info.name, target.process().registers().read(info));
    }
}

fn handle_memory_command(target: &mut Target, words: &[&str]) -> Result<()> {
    match words {
        ["read", addr] => print_memory(target, parse_hex(addr)?.into(), 32),
        ["read", addr, amount] => {
            let amount = amount
                .parse::<usize>()
                .map_err(|_| DebuggerError::InvalidFormat(format!("bad byte count: {amount}")))?;
            print_memory(target, parse_hex(addr)?.into(), amount)
        }
        ["write", addr, data] => {
            let bytes = parse_byte_vector(data)?;
            target
                .process()
                .write_memory(parse_hex(addr)?.into(), &bytes)
        }
        _ => {
            error!("usage: memory read ADDR [N] | memory write ADDR [0xHH,..]");
            Ok(())
        }
    }
}

fn print_memory(target: &Target, address: VirtAddr, amount: usize) -> Result<()> {
    let data = target.process().read_memory(address, amount)?;
    for (i, row) in data.chunks(16).enumerate() {
        let rendered: Vec<String> = row.iter().map(|byte| format!("{byte:02x}")).collect();
        println!("{}: {}", address + i * 16, rendered.join(" "));
    }
    Ok(())
}

fn handle_breakpoint_command(target: &mut Target, words: &[&str]) -> Result<()> {
    let process = target.process_mut();
    match words {
        ["list"] => {
            for site in process.breakpoint_sites().iter() {
                if site.is_internal() {
                    continue;
                }
                println!(
                    "{}: address = {}, {}{}",
                    site.id(),
                    site.address(),
                    if site.is_enabled() { "enabled" } else { "disabled" },
                    if site.is_hardware() { " (hardware)" } else { "" },
                );
            }
        }
        ["set", addr] | ["set", addr, "-h"] => {
            let hardware = words.last() == Some(&"-h");
            let address = VirtAddr::from(parse_hex(addr)?);
            let id = process.create_breakpoint_site(address, hardware, false)?.id();
            process.enable_breakpoint_by_id(id)?;
            println!("breakpoint {id} set at {address}");
        }
        ["enable", id] => process.enable_breakpoint_by_id(parse_id(id)?)?,
        ["disable", id] => process.disable_breakpoint_by_id(parse_id(id)?)?,
        ["delete", id] => process.remove_breakpoint_by_id(parse_id(id)?)?,
        _ => error!("usage: breakpoint set ADDR [-h] | breakpoint list|enable|disable|delete [ID]"),
    }
    Ok(())
}

fn handle_watchpoint_command(target: &mut Target, words: &[&str]) -> Result<()> {
    let process = target.process_mut();
    match words {
        ["list"] => {
            for watch in process.watchpoints().iter() {
                println!(
                    "{}: address = {}, mode = {:?}, size = {}, {}",
                    watch.id(),
                    watch.address(),
                    watch.mode(),
                    watch.size(),
                    if watch.is_enabled() { "enabled" } else { "disabled" },
                );
            }
        }
        ["set", addr, mode, size] => {
            let address = VirtAddr::from(parse_hex(addr)?);
            let mode = match *mode {
                "write" => StoppointMode::Write,
                "rw" => StoppointMode::ReadWrite,
                "execute" => StoppointMode::Execute,
                other => {
                    return Err(DebuggerError::InvalidFormat(format!(
                        "bad watchpoint mode: {other}"
                    )))
                }
            };
            let size = size
                .parse::<usize>()
                .map_err(|_| DebuggerError::InvalidFormat(format!("bad size: {size}")))?;
            let id = process.create_watchpoint(address, mode, size)?.id();
            process.enable_watchpoint_by_id(id)?;
            println!("watchpoint {id} set at {address}");
        }
        ["enable", id] => process.enable_watchpoint_by_id(parse_id(id)?)?,
        ["disable", id] => process.disable_watchpoint_by_id(parse_id(id)?)?,
        ["delete", id] => process.remove_watchpoint_by_id(parse_id(id)?)?,
        _ => error!(
            "usage: watchpoint set ADDR write|rw|execute 1|2|4|8 | watchpoint list|enable|disable|delete [ID]"
        ),
    }
    Ok(())
}

fn handle_catchpoint_command(target: &mut Target, words: &[&str]) -> Result<()> {
    let policy = match words {
        ["syscall"] => SyscallCatchPolicy::All,
        ["syscall", "none"] => SyscallCatchPolicy::None,
        ["syscall", list] => {
            let mut ids = Vec::new();
            for entry in list.split(',') {
                let id = entry
                    .parse::<u16>()
                    .ok()
                    .or_else(|| syscall_name_to_id(entry))
                    .ok_or_else(|| {
                        DebuggerError::InvalidFormat(format!("unknown syscall: {entry}"))
                    })?;
                ids.push(id);
            }
            SyscallCatchPolicy::Some(ids)
        }
        _ => {
            error!("usage: catchpoint syscall [none|ID-or-name,..]");
            return Ok(());
        }
    };
    target.process_mut().set_syscall_catch_policy(policy);
    Ok(())
}

fn handle_disassemble_command(target: &mut Target, words: &[&str]) -> Result<()> {
    let mut count = 5usize;
    let mut address = None;

    let mut iter = words.iter();
    while let Some(word) = iter.next() {
        match *word {
            "-c" => {
                let value = iter.next().ok_or_else(|| {
                    DebuggerError::InvalidFormat("-c needs an instruction count".into())
                })?;
                count = value.parse::<usize>().map_err(|_| {
                    DebuggerError::InvalidFormat(format!("bad instruction count: {value}"))
                })?;
            }
            "-a" => {
                let value = iter.next().ok_or_else(|| {
                    DebuggerError::InvalidFormat("-a needs an address".into())
                })?;
                address = Some(VirtAddr::from(parse_hex(value)?));
            }
            other => {
                warn!("ignoring stray disassemble argument: {other}");
            }
        }
    }

    for instruction in target.disassemble(count, address)? {
        println!("{}: {}", instruction.address, instruction.text);
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<i32> {
    raw.parse::<i32>()
        .map_err(|_| DebuggerError::InvalidFormat(format!("bad stoppoint id: {raw}")))
}
