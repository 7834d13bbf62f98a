pub mod dynstr;
pub mod hash;
pub mod ldso;
pub mod migrate;
pub mod opts;
pub mod section;
pub mod symbols;
pub mod syscall_abi;
pub mod versions;
pub mod walk;

use snafu::prelude::*;

use opts::{Config, Opts};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{}", source))]
    BadOpts { source: opts::Error },

    #[snafu(display("{}", source))]
    Walk { source: walk::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Runs one migration (or, with `--check-syscall-abi`, one scan) over every root named in
/// `opts`. The first file that fails to migrate aborts the walk of its root, and that
/// error propagates out of `run` without visiting any remaining roots.
pub fn run(opts: Opts) -> Result<()> {
    opts.print();
    let cfg = Config::from_opts(&opts).context(BadOptsSnafu)?;

    for root in &opts.roots {
        walk::walk_root(root, |path| match migrate::migrate_file(path, &cfg) {
            Ok(migrate::Outcome::Skipped { reason }) => {
                if cfg.verbose {
                    println!("{}: skipped ({reason})", path.display());
                }
                Ok(())
            }
            Ok(migrate::Outcome::SyscallHits(hits)) => {
                for hit in &hits {
                    syscall_abi::report_hit(&path.display().to_string(), hit);
                }
                Ok(())
            }
            Ok(migrate::Outcome::Processed { dirty }) => {
                if dirty {
                    let verb = if cfg.dry_run { "would patch" } else { "patched" };
                    println!("{}: {verb}", path.display());
                }
                Ok(())
            }
            Err(e) => Err(e),
        })
        .context(WalkSnafu)?;
    }

    if cfg.check_syscall_abi {
        syscall_abi::print_final_report();
    }

    Ok(())
}
