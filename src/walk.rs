//! Walks one or more root directories, handing every plausible ELF file to the caller.

use std::path::Path;

use snafu::prelude::*;
use walkdir::WalkDir;

use crate::migrate;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
/// Size of a 64-bit ELF header; anything smaller can't possibly be one.
const MIN_ELF_SIZE: u64 = 64;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to walk {}: {}", root.display(), source))]
    Walk {
        root: std::path::PathBuf,
        source: walkdir::Error,
    },

    #[snafu(display("failed to read header of {}: {}", path.display(), source))]
    Peek {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{}", source))]
    Visit { source: migrate::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn looks_like_elf(path: &Path) -> Result<bool> {
    use std::io::Read;

    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    if !meta.is_file() || meta.len() < MIN_ELF_SIZE {
        return Ok(false);
    }

    let mut f = std::fs::File::open(path).context(PeekSnafu { path })?;
    let mut magic = [0u8; 4];
    match f.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ELF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(source) => Err(Error::Peek {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Walks `root`, calling `visit` for every regular file that is large enough to hold an
/// ELF header and starts with the ELF magic.
///
/// The walk stops at the first error, whether it comes from the walk machinery itself (a
/// directory that can't be read, a header that can't be peeked at) or from `visit` — a
/// file that fails to migrate aborts the rest of the walk rather than being skipped.
pub fn walk_root(
    root: &Path,
    mut visit: impl FnMut(&Path) -> std::result::Result<(), migrate::Error>,
) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.context(WalkSnafu { root })?;
        let path = entry.path();

        if !looks_like_elf(path)? {
            continue;
        }

        visit(path).context(VisitSnafu)?;
    }

    Ok(())
}
