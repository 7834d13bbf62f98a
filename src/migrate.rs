//! The ELF file driver: per file, open, filter, enumerate sections, dispatch to the
//! rewriters, and request a layout-preserving write-back if anything got dirtied.

use std::fs;
use std::path::Path;

use elf::endian::AnyEndian;
use elf::file::Class;
use elf::ElfBytes;
use snafu::prelude::*;

use crate::ldso::{self, INTERP_BASENAME};
use crate::opts::Config;
use crate::section::SectionBuf;
use crate::symbols;
use crate::syscall_abi::{self, scan_for_removed_syscalls};
use crate::versions::{self, rewrite_version_d, rewrite_version_r};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read {}: {}", path, source))]
    ReadFile { path: String, source: std::io::Error },

    #[snafu(display("failed to write {}: {}", path, source))]
    WriteFile { path: String, source: std::io::Error },

    #[snafu(display("{}: failed to parse ELF: {}", path, source))]
    ParseElf {
        path: String,
        source: elf::ParseError,
    },

    #[snafu(display("{}: missing .dynstr section", path))]
    NoDynstr { path: String },

    #[snafu(display("{}: section {} runs past the end of the file", path, name))]
    BadSectionGeometry { path: String, name: String },

    #[snafu(display("{}: {}", path, source))]
    VersionD { path: String, source: versions::Error },

    #[snafu(display("{}: {}", path, source))]
    VersionR { path: String, source: versions::Error },

    #[snafu(display("{}: {}", path, source))]
    Dynsym { path: String, source: symbols::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The machine ID for LoongArch64, per the ELF ABI (not yet universally exposed by every
/// `elf`-crate version, so named locally rather than pulled from `elf::abi`).
const EM_LOONGARCH: u16 = 258;

/// Outcome of processing one file, for the walker/CLI layer to report on.
pub enum Outcome {
    /// Not a file this tool cares about (wrong class/endianness/machine).
    Skipped { reason: &'static str },
    /// ABI-check mode found these removed-syscall usages.
    SyscallHits(Vec<syscall_abi::SyscallHit>),
    /// Processed; `true` if the file was (or, in dry-run, would have been) rewritten.
    Processed { dirty: bool },
}

struct Sections {
    dynstr_off: usize,
    dynstr: Vec<u8>,
    dynsym: Option<(usize, Vec<u8>)>,
    version_d: Option<(usize, Vec<u8>, usize)>, // offset, data, sh_info count
    version_r: Option<(usize, Vec<u8>, usize)>,
    rodata: Option<(usize, Vec<u8>)>,
    text: Option<(usize, Vec<u8>)>,
}

/// Looks up a section by name and, if present, slices its raw bytes straight out of the
/// file buffer (rather than through an intermediate crate-owned copy) since `sh_offset`
/// and `sh_size` from the header are all that's needed.
fn named_section<'d>(
    elf_object: &ElfBytes<'d, AnyEndian>,
    raw: &[u8],
    path: &str,
    name: &str,
) -> Result<Option<(usize, usize, Vec<u8>)>> {
    let Some(shdr) = elf_object
        .section_header_by_name(name)
        .context(ParseElfSnafu { path })?
    else {
        return Ok(None);
    };

    let off = shdr.sh_offset as usize;
    let size = shdr.sh_size as usize;
    let info = shdr.sh_info as usize;

    if off + size > raw.len() {
        return BadSectionGeometrySnafu { path, name }.fail();
    }

    Ok(Some((off, info, raw[off..off + size].to_vec())))
}

fn gather_sections<'d>(
    elf_object: &ElfBytes<'d, AnyEndian>,
    raw: &[u8],
    path: &str,
    is_ldso: bool,
) -> Result<Sections> {
    let (dynstr_off, _, dynstr) = named_section(elf_object, raw, path, ".dynstr")?
        .context(NoDynstrSnafu { path })?;

    let dynsym = named_section(elf_object, raw, path, ".dynsym")?
        .map(|(off, _, data)| (off, data));
    let version_d = named_section(elf_object, raw, path, ".gnu.version_d")?
        .map(|(off, info, data)| (off, data, info));
    let version_r = named_section(elf_object, raw, path, ".gnu.version_r")?
        .map(|(off, info, data)| (off, data, info));
    let rodata = if is_ldso {
        named_section(elf_object, raw, path, ".rodata")?.map(|(off, _, data)| (off, data))
    } else {
        None
    };
    let text = named_section(elf_object, raw, path, ".text")?.map(|(off, _, data)| (off, data));

    Ok(Sections {
        dynstr_off,
        dynstr,
        dynsym,
        version_d,
        version_r,
        rodata,
        text,
    })
}

fn is_dynamic_linker(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n == INTERP_BASENAME)
        .unwrap_or(false)
}

/// Processes one candidate file (already confirmed regular, large enough, and
/// ELF-magic-prefixed by the walker).
pub fn migrate_file(path: &Path, cfg: &Config) -> Result<Outcome> {
    let path_str = path.to_string_lossy().into_owned();
    let mut raw = fs::read(path).context(ReadFileSnafu { path: path_str.clone() })?;

    let elf_object = ElfBytes::<AnyEndian>::minimal_parse(&raw)
        .context(ParseElfSnafu { path: path_str.clone() })?;

    if elf_object.ehdr.class != Class::ELF64 {
        return Ok(Outcome::Skipped {
            reason: "not ELF64",
        });
    }
    if elf_object.ehdr.endianness != AnyEndian::Little {
        return Ok(Outcome::Skipped {
            reason: "not little-endian",
        });
    }

    // e_machine lives at a fixed offset regardless of class; read it directly now that
    // endianness is confirmed little-endian.
    if raw.len() < 20 {
        return Ok(Outcome::Skipped { reason: "too small" });
    }
    let e_machine = u16::from_le_bytes([raw[18], raw[19]]);
    if e_machine != EM_LOONGARCH {
        return Ok(Outcome::Skipped {
            reason: "not LoongArch",
        });
    }

    let is_ldso = is_dynamic_linker(path);

    if cfg.verbose {
        println!("{path_str}: processing (ld.so: {is_ldso})");
    }

    let sections = gather_sections(&elf_object, &raw, &path_str, is_ldso)?;

    if cfg.check_syscall_abi {
        let hits = sections
            .text
            .as_ref()
            .map(|(_, data)| scan_for_removed_syscalls(data))
            .unwrap_or_default();
        return Ok(Outcome::SyscallHits(hits));
    }

    let mut dynstr_buf = SectionBuf::new(sections.dynstr_off, sections.dynstr);
    let mut dirty = false;

    if let Some((off, data, n)) = sections.version_d {
        let mut version_d_buf = SectionBuf::new(off, data);
        rewrite_version_d(
            &mut version_d_buf,
            &mut dynstr_buf,
            n,
            &cfg.to_ver,
            cfg.to_hash,
            cfg.verbose,
            cfg.dry_run,
        )
        .context(VersionDSnafu {
            path: path_str.clone(),
        })?;
        if version_d_buf.data_dirty() {
            dirty = true;
            if !cfg.dry_run {
                splice(&mut raw, version_d_buf.sh_offset(), version_d_buf.data());
            }
        }
    }

    if let Some((off, data, n)) = sections.version_r {
        let mut version_r_buf = SectionBuf::new(off, data);
        rewrite_version_r(
            &mut version_r_buf,
            &mut dynstr_buf,
            n,
            &cfg.to_ver,
            cfg.to_hash,
            cfg.verbose,
            cfg.dry_run,
        )
        .context(VersionRSnafu {
            path: path_str.clone(),
        })?;
        if version_r_buf.data_dirty() {
            dirty = true;
            if !cfg.dry_run {
                splice(&mut raw, version_r_buf.sh_offset(), version_r_buf.data());
            }
        }
    }

    if let Some((_, data)) = &sections.dynsym {
        symbols::rewrite_dynsym(data, &mut dynstr_buf, &cfg.to_ver, cfg.verbose, cfg.dry_run)
            .context(DynsymSnafu {
                path: path_str.clone(),
            })?;
    }

    if is_ldso {
        if let Some((off, data)) = sections.rodata {
            let mut rodata_buf = SectionBuf::new(off, data);
            ldso::patch_rodata(&mut rodata_buf, &cfg.to_ver, cfg.dry_run);
            if rodata_buf.data_dirty() {
                dirty = true;
                if !cfg.dry_run {
                    splice(&mut raw, rodata_buf.sh_offset(), rodata_buf.data());
                }
            }
        }

        if let Some((off, data)) = sections.text {
            let mut text_buf = SectionBuf::new(off, data);
            ldso::patch_text_hashes(&mut text_buf, cfg.from_hash, cfg.to_hash, cfg.dry_run);
            if text_buf.data_dirty() {
                dirty = true;
                if !cfg.dry_run {
                    splice(&mut raw, text_buf.sh_offset(), text_buf.data());
                }
            }
        }
    }

    if dynstr_buf.data_dirty() {
        dirty = true;
        if !cfg.dry_run {
            splice(&mut raw, dynstr_buf.sh_offset(), dynstr_buf.data());
        }
    }

    if dirty && !cfg.dry_run {
        fs::write(path, &raw).context(WriteFileSnafu {
            path: path_str.clone(),
        })?;
    }

    Ok(Outcome::Processed { dirty })
}

fn splice(raw: &mut [u8], offset: usize, data: &[u8]) {
    raw[offset..offset + data.len()].copy_from_slice(data);
}
