//! Patches specific to the dynamic linker itself: hard-coded version strings in `.rodata`
//! and the compiled-in hash immediates in `.text`.

use crate::section::SectionBuf;

pub const INTERP_BASENAME: &str = "ld-linux-loongarch-lp64d.so.1";

const PATTERN_LEN: usize = 10;
const PATTERN_PREFIX: &[u8] = b"\0GLIBC_2.3";

/// Scans `.rodata` for `"\0GLIBC_2.3"` runs whose following NUL-terminated string is exactly
/// ten bytes, and overwrites any that don't already equal `to_ver`.
pub fn patch_rodata(rodata: &mut SectionBuf, to_ver: &str, dry_run: bool) {
    let mut start = 0usize;

    loop {
        let data = rodata.data();
        if start >= data.len() {
            break;
        }

        let Some(rel) = find_pattern(&data[start..], PATTERN_PREFIX) else {
            break;
        };
        let match_pos = start + rel;
        let tag_pos = match_pos + 1;

        // Candidate must be NUL-terminated with total length exactly 10.
        let tag_len = data[tag_pos..]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(data.len() - tag_pos);

        if tag_len != PATTERN_LEN {
            start = match_pos + PATTERN_LEN;
            continue;
        }

        let tag = &data[tag_pos..tag_pos + PATTERN_LEN];
        if tag == to_ver.as_bytes() {
            // Idempotence.
            start = match_pos + PATTERN_LEN;
            continue;
        }

        if dry_run {
            println!(
                "hard-coded symbol version in .rodata at offset {tag_pos} needs patching"
            );
        } else {
            rodata.data_mut()[tag_pos..tag_pos + PATTERN_LEN].copy_from_slice(to_ver.as_bytes());
            rodata.mark_data_dirty();
        }

        start = match_pos + PATTERN_LEN;
    }
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// `lu12i.w` with the 20-bit immediate `imm`, any destination register.
fn is_lu12i_w_with_imm(insn: u32, imm: u32) -> bool {
    let want = 0x1400_0000 | ((imm & 0xf_ffff) << 5);
    (insn & 0xffff_ffe0) == want
}

/// `ori rd, rj, imm`, exact match on both source/dest registers and the immediate.
fn is_ori_exact(insn: u32, rd: u32, rj: u32, imm: u32) -> bool {
    let want = 0x0380_0000 | ((imm & 0xfff) << 10) | (rj << 5) | rd;
    insn == want
}

/// Approximation of "this instruction's destination register is `rd`"; correct for most
/// arithmetic/logical/load encodings, wrong for stores, branches, and a handful of others.
/// This is deliberate (see module docs) and must not be tightened.
pub fn is_clobbering_rd(insn: u32, rd: u32) -> bool {
    (insn & 0x1f) == rd
}

fn patch_dsj20_imm(old_insn: u32, new_imm: u32) -> u32 {
    (old_insn & 0xfe00_001f) | ((new_imm & 0xf_ffff) << 5)
}

fn patch_djuk12_imm(old_insn: u32, new_imm: u32) -> u32 {
    (old_insn & 0xffc0_03ff) | ((new_imm & 0xfff) << 10)
}

/// Scans `.text` as a stream of 32-bit little-endian instructions for a `lu12i.w` + `ori`
/// pair materializing `from_hash`, and rewrites both to materialize `to_hash` instead.
pub fn patch_text_hashes(text: &mut SectionBuf, from_hash: u32, to_hash: u32, dry_run: bool) {
    let from_hi20 = from_hash >> 12;
    let from_lo12 = from_hash & 0xfff;
    let to_hi20 = to_hash >> 12;
    let to_lo12 = to_hash & 0xfff;

    let len = text.data().len();
    let word_count = len / 4;

    let mut hi20_pos: Option<usize> = None;
    let mut reg: u32 = 0;

    let mut i = 0;
    while i < word_count {
        let off = i * 4;
        let insn = u32::from_le_bytes(text.data()[off..off + 4].try_into().unwrap());

        match hi20_pos {
            None => {
                if is_lu12i_w_with_imm(insn, from_hi20) {
                    hi20_pos = Some(off);
                    reg = insn & 0x1f;
                }
            }
            Some(lu_off) => {
                if is_ori_exact(insn, reg, reg, from_lo12) {
                    if dry_run {
                        println!(
                            "old hash in .text needs patching: lu12i.w offset {lu_off}, ori offset {off}"
                        );
                    } else {
                        let lu_insn =
                            u32::from_le_bytes(text.data()[lu_off..lu_off + 4].try_into().unwrap());
                        let new_lu = patch_dsj20_imm(lu_insn, to_hi20);
                        let new_ori = patch_djuk12_imm(insn, to_lo12);

                        text.data_mut()[lu_off..lu_off + 4].copy_from_slice(&new_lu.to_le_bytes());
                        text.data_mut()[off..off + 4].copy_from_slice(&new_ori.to_le_bytes());
                        text.mark_data_dirty();
                    }

                    hi20_pos = None;
                    reg = 0;
                } else if is_clobbering_rd(insn, reg) {
                    hi20_pos = None;
                    reg = 0;
                }
            }
        }

        i += 1;
    }
}
