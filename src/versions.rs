//! Walks `.gnu.version_d` and `.gnu.version_r`, renaming interesting auxiliary entries and
//! keeping their precomputed hashes in sync.

use snafu::prelude::*;

use crate::dynstr::{self, is_interesting_version, StrtabEditor};
use crate::section::SectionBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to patch dynstr entry: {}", source))]
    PatchDynstr { source: dynstr::Error },

    #[snafu(display("{} record at offset {} runs past the end of the section", what, offset))]
    Truncated { what: &'static str, offset: usize },
}

type Result<T, E = Error> = std::result::Result<T, E>;

const VERDEF_SIZE: usize = 20;
const VERDAUX_SIZE: usize = 8;
const VERNEED_SIZE: usize = 16;
const VERNAUX_SIZE: usize = 16;

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

/// Walks `.gnu.version_d`: `n` records chained by `vd_next`, `n` taken from the section
/// header's `sh_info`. Only the first aux of each definition (its name) is inspected.
pub fn rewrite_version_d(
    version_d: &mut SectionBuf,
    dynstr: &mut SectionBuf,
    n: usize,
    to_ver: &str,
    to_hash: u32,
    verbose: bool,
    dry_run: bool,
) -> Result<()> {
    let mut pos: usize = 0;

    for i in 0..n {
        let data = version_d.data();
        if pos + VERDEF_SIZE > data.len() {
            return TruncatedSnafu {
                what: "verdef",
                offset: pos,
            }
            .fail();
        }

        let vd_aux = read_u32(data, pos + 12) as usize;
        let vd_next = read_u32(data, pos + 16) as usize;

        let aux_pos = pos + vd_aux;
        if aux_pos + VERDAUX_SIZE > data.len() {
            return TruncatedSnafu {
                what: "verdaux",
                offset: aux_pos,
            }
            .fail();
        }
        let vda_name = read_u32(data, aux_pos) as usize;

        let name = {
            let mut editor = StrtabEditor::new(dynstr);
            editor.get(vda_name).context(PatchDynstrSnafu)?.to_string()
        };

        if verbose {
            println!("verdef {i}: {name}");
        }

        if is_interesting_version(&name, to_ver) {
            if dry_run {
                println!("verdef {i}: {name} needs patching");
            } else {
                {
                    let mut editor = StrtabEditor::new(dynstr);
                    editor
                        .patch_by_idx(vda_name, to_ver)
                        .context(PatchDynstrSnafu)?;
                }

                let data = version_d.data();
                let vd_hash = read_u32(data, pos + 8);
                if vd_hash != to_hash {
                    write_u32(version_d.data_mut(), pos + 8, to_hash);
                    version_d.mark_data_dirty();
                }
            }
        }

        // Bounded purely by `n` (from `sh_info`): some producers use a zero `vd_next` to
        // mean end-of-chain, but that would truncate a well-formed chain early if trusted
        // as the loop condition instead of as a side observation.
        pos += vd_next;
    }

    Ok(())
}

/// Walks `.gnu.version_r`: `n` outer `Verneed` records chained by `vn_next`, each pointing
/// at `vn_cnt` `Vernaux` records chained by `vna_next`.
pub fn rewrite_version_r(
    version_r: &mut SectionBuf,
    dynstr: &mut SectionBuf,
    n: usize,
    to_ver: &str,
    to_hash: u32,
    verbose: bool,
    dry_run: bool,
) -> Result<()> {
    let mut pos: usize = 0;

    for i in 0..n {
        let data = version_r.data();
        if pos + VERNEED_SIZE > data.len() {
            return TruncatedSnafu {
                what: "verneed",
                offset: pos,
            }
            .fail();
        }

        let vn_cnt = read_u16(data, pos + 2) as usize;
        let vn_aux = read_u32(data, pos + 8) as usize;
        let vn_next = read_u32(data, pos + 12) as usize;

        let mut aux_pos = pos + vn_aux;
        for j in 0..vn_cnt {
            let data = version_r.data();
            if aux_pos + VERNAUX_SIZE > data.len() {
                return TruncatedSnafu {
                    what: "vernaux",
                    offset: aux_pos,
                }
                .fail();
            }

            let vna_name = read_u32(data, aux_pos + 8) as usize;
            let vna_next = read_u32(data, aux_pos + 12) as usize;

            let name = {
                let mut editor = StrtabEditor::new(dynstr);
                editor.get(vna_name).context(PatchDynstrSnafu)?.to_string()
            };

            if verbose {
                println!("verneed {i}: aux {j} name {name}");
            }

            if is_interesting_version(&name, to_ver) {
                if dry_run {
                    println!("verneed {i}: aux {j} name {name} needs patching");
                } else {
                    {
                        let mut editor = StrtabEditor::new(dynstr);
                        editor
                            .patch_by_off(vna_name, to_ver)
                            .context(PatchDynstrSnafu)?;
                    }

                    let data = version_r.data();
                    let vna_hash = read_u32(data, aux_pos);
                    if vna_hash != to_hash {
                        write_u32(version_r.data_mut(), aux_pos, to_hash);
                        version_r.mark_data_dirty();
                        version_r.mark_section_dirty();
                    }
                }
            }

            // Bounded by `vn_cnt`, not by `vna_next` being nonzero; see the comment in
            // `rewrite_version_d` for why.
            aux_pos += vna_next;
        }

        pos += vn_next;
    }

    Ok(())
}
