//! Scans `.text` for uses of syscalls removed from under glibc's feet, by statically
//! recovering the syscall number loaded into `$a7` ahead of each `syscall` instruction.

use colored::Colorize;
use std::cell::Cell;

use crate::ldso::is_clobbering_rd;

const A7: u32 = 11;
const MAX_REVERSE_SEARCH_WINDOW: usize = 20;

fn is_syscall(insn: u32) -> bool {
    (insn & 0xffff_7000) == 0x002b_0000
}

/// Recognizes `addi.w`/`addi.d`/`ori  $a7, $zero, imm` and returns the 12-bit immediate;
/// any other instruction (or a non-zero source register) yields `None`.
fn maybe_pull_out_syscall_nr(insn: u32) -> Option<u32> {
    let opcode = insn & 0xffc0_0000;
    match opcode {
        0x0280_0000 | 0x02c0_0000 | 0x0380_0000 => {
            let rd = insn & 0x1f;
            let rj = (insn >> 5) & 0x1f;
            if rd != A7 || rj != 0 {
                return None;
            }
            Some((insn >> 10) & 0xfff)
        }
        _ => None,
    }
}

fn removed_syscall_name(nr: u32) -> Option<&'static str> {
    match nr {
        79 => Some("newfstatat"),
        80 => Some("fstat"),
        163 => Some("getrlimit"),
        164 => Some("setrlimit"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallHit {
    pub name: &'static str,
    pub text_offset: usize,
}

/// Scans one `.text` data buffer and returns every removed-syscall usage found in it.
pub fn scan_for_removed_syscalls(text: &[u8]) -> Vec<SyscallHit> {
    let mut hits = Vec::new();
    let word_count = text.len() / 4;

    let word = |i: usize| u32::from_le_bytes(text[i * 4..i * 4 + 4].try_into().unwrap());

    for i in 0..word_count {
        if !is_syscall(word(i)) {
            continue;
        }
        if i == 0 {
            continue;
        }

        let window = i.min(MAX_REVERSE_SEARCH_WINDOW);
        let mut syscall_nr = None;

        for back in 1..=window {
            let j = i - back;
            let insn = word(j);

            if let Some(nr) = maybe_pull_out_syscall_nr(insn) {
                syscall_nr = Some(nr);
                break;
            }
            if is_clobbering_rd(insn, A7) {
                break;
            }
        }

        let Some(nr) = syscall_nr else { continue };
        let Some(name) = removed_syscall_name(nr) else {
            continue;
        };

        hits.push(SyscallHit {
            name,
            text_offset: i * 4,
        });
    }

    hits
}

/// Process-wide record of whether any file scanned this run used a removed syscall.
///
/// Modeled as a thread-local `Cell` rather than true global mutable state so tests in this
/// module (and any future multi-threaded caller) don't trample each other; the crate only
/// ever drives this from a single thread, so the observable behavior matches a plain global.
thread_local! {
    static HAS_PROBLEMS: Cell<bool> = const { Cell::new(false) };
}

pub fn report_hit(path: &str, hit: &SyscallHit) {
    HAS_PROBLEMS.with(|c| c.set(true));
    println!(
        "{path}: usage of removed syscall `{}` at .text+{:#x}",
        hit.name, hit.text_offset
    );
}

pub fn has_problems() -> bool {
    HAS_PROBLEMS.with(|c| c.get())
}

pub fn print_final_report() {
    if has_problems() {
        println!(
            "{}",
            "\nYou need to UPGRADE YOUR LIBC, before you reboot into a kernel without these syscalls.\n\
             If other non-libc programs are shown above, they should be rebuilt after the libc upgrade as well.\n\
             You can run this tool with --check-syscall-abi again, after you have upgraded the libc, if unsure.\n"
                .red()
                .bold()
        );
        return;
    }

    println!(
        "{}",
        "\nNo deprecated syscall usage was found on your system!\n"
            .green()
            .bold()
    );
}
