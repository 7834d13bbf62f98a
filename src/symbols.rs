//! Walks `.dynsym` looking for version-label pseudo-symbols and renames them.

use snafu::prelude::*;

use crate::dynstr::{self, is_interesting_version, StrtabEditor};
use crate::section::SectionBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to patch dynstr entry: {}", source))]
    PatchDynstr { source: dynstr::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

const SYM_SIZE: usize = 24;
const STT_OBJECT: u8 = 1;
const SHN_ABS: u16 = 0xfff1;

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

/// A record is a version-label candidate iff its type is `STT_OBJECT` and its section index
/// is `SHN_ABS` (that's how these pseudo-symbols are emitted).
fn is_candidate(st_info: u8, st_shndx: u16) -> bool {
    (st_info & 0xf) == STT_OBJECT && st_shndx == SHN_ABS
}

pub fn rewrite_dynsym(
    dynsym: &[u8],
    dynstr: &mut SectionBuf,
    to_ver: &str,
    verbose: bool,
    dry_run: bool,
) -> Result<()> {
    let n = dynsym.len() / SYM_SIZE;

    for i in 0..n {
        let rec = &dynsym[i * SYM_SIZE..i * SYM_SIZE + SYM_SIZE];
        let st_name = read_u32(rec, 0) as usize;
        let st_info = rec[4];
        let st_shndx = read_u16(rec, 6);

        if !is_candidate(st_info, st_shndx) {
            continue;
        }

        let name = {
            let editor = StrtabEditor::new(dynstr);
            editor.get(st_name).context(PatchDynstrSnafu)?.to_string()
        };

        if verbose {
            println!("announced symbol version {name} at idx {i}");
        }

        if !is_interesting_version(&name, to_ver) {
            continue;
        }

        if dry_run {
            println!("symbol version {name} at idx {i} needs patching");
            continue;
        }

        println!("patching symbol version {name} at idx {i} -> {to_ver}");
        let mut editor = StrtabEditor::new(dynstr);
        editor
            .patch_by_idx(st_name, to_ver)
            .context(PatchDynstrSnafu)?;
    }

    Ok(())
}
