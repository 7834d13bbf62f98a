use std::path::PathBuf;

use colored::Colorize;
use snafu::prelude::*;
use structopt::StructOpt;

use crate::hash::bfd_elf_hash;

const DEFAULT_FROM: &str = "GLIBC_2.35";
const DEFAULT_TO: &str = "GLIBC_2.36";

#[derive(StructOpt, Clone)]
#[structopt(about = "Migrate a LoongArch64 sysroot between glibc symbol-version tags")]
pub struct Opts {
    /// Root directories to walk
    #[structopt(required = true, parse(from_os_str))]
    pub roots: Vec<PathBuf>,

    /// Produce more (debugging) output
    #[structopt(short, long)]
    pub verbose: bool,

    /// Don't actually patch the files
    #[structopt(short = "p", long = "pretend")]
    pub dry_run: bool,

    /// Migrate from this glibc symbol version
    #[structopt(short = "f", long = "from-ver", default_value = DEFAULT_FROM)]
    pub from_ver: String,

    /// Migrate to this glibc symbol version
    #[structopt(short = "t", long = "to-ver", default_value = DEFAULT_TO)]
    pub to_ver: String,

    /// Only scan for removed-syscall usage; implies --pretend
    #[structopt(short = "a", long = "check-syscall-abi")]
    pub check_syscall_abi: bool,
}

impl Opts {
    pub fn print(&self) {
        println!("{}: {:?}", "roots".color(colored::Color::Cyan), self.roots);
        println!(
            "{}: {} -> {}",
            "migrating".color(colored::Color::Yellow),
            self.from_ver,
            self.to_ver
        );
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "from-ver and to-ver must have equal length ('{}' is {} bytes, '{}' is {} bytes)",
        from_ver,
        from_ver.len(),
        to_ver,
        to_ver.len()
    ))]
    VersionLengthMismatch { from_ver: String, to_ver: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Process-lifetime, immutable configuration derived from [`Opts`].
#[derive(Debug)]
pub struct Config {
    pub from_ver: String,
    pub to_ver: String,
    pub from_hash: u32,
    pub to_hash: u32,
    pub verbose: bool,
    pub dry_run: bool,
    pub check_syscall_abi: bool,
}

impl Config {
    pub fn from_opts(opts: &Opts) -> Result<Self> {
        ensure!(
            opts.from_ver.len() == opts.to_ver.len(),
            VersionLengthMismatchSnafu {
                from_ver: opts.from_ver.clone(),
                to_ver: opts.to_ver.clone(),
            }
        );

        Ok(Self {
            from_hash: bfd_elf_hash(&opts.from_ver),
            to_hash: bfd_elf_hash(&opts.to_ver),
            from_ver: opts.from_ver.clone(),
            to_ver: opts.to_ver.clone(),
            verbose: opts.verbose,
            // --check-syscall-abi implies dry-run: it never mutates anything.
            dry_run: opts.dry_run || opts.check_syscall_abi,
            check_syscall_abi: opts.check_syscall_abi,
        })
    }
}
