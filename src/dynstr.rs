//! Idempotent fixed-length editing of `.dynstr` entries.

use snafu::prelude::*;

use crate::section::SectionBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "cannot patch string with unequal lengths at offset {}: '{}' -> '{}'",
        offset,
        old,
        new
    ))]
    LengthMismatch {
        offset: usize,
        old: String,
        new: String,
    },

    #[snafu(display("dynstr offset {} is out of bounds (size {})", offset, size))]
    OutOfBounds { offset: usize, size: usize },

    #[snafu(display("dynstr entry at offset {} is not NUL-terminated", offset))]
    Unterminated { offset: usize },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A version tag is interesting iff it begins with `GLIBC_2.` and is not already `to_ver`.
///
/// The second clause is what makes a run over an already-migrated file a no-op.
pub fn is_interesting_version(tag: &str, to_ver: &str) -> bool {
    tag.starts_with("GLIBC_2.") && tag != to_ver
}

fn nul_terminated_len(buf: &[u8], offset: usize) -> Result<usize> {
    if offset >= buf.len() {
        return OutOfBoundsSnafu {
            offset,
            size: buf.len(),
        }
        .fail();
    }

    buf[offset..]
        .iter()
        .position(|&b| b == 0)
        .context(UnterminatedSnafu { offset })
}

/// Resolves a `.dynstr` entry, reads it as a string, and owns the patching logic that the
/// rest of the rewriters (symbol table, version records) call into.
pub struct StrtabEditor<'a> {
    dynstr: &'a mut SectionBuf,
}

impl<'a> StrtabEditor<'a> {
    pub fn new(dynstr: &'a mut SectionBuf) -> Self {
        Self { dynstr }
    }

    pub fn get(&self, offset: usize) -> Result<&str> {
        let len = nul_terminated_len(self.dynstr.data(), offset)?;
        std::str::from_utf8(&self.dynstr.data()[offset..offset + len])
            .ok()
            .context(UnterminatedSnafu { offset })
    }

    /// Overwrites the NUL-terminated string at `offset` with `new`, in place.
    ///
    /// Returns `Ok(true)` if bytes were changed, `Ok(false)` if `new` already matched (the
    /// idempotent no-op case).
    pub fn patch_by_off(&mut self, offset: usize, new: &str) -> Result<bool> {
        let len = nul_terminated_len(self.dynstr.data(), offset)?;
        let old_bytes = &self.dynstr.data()[offset..offset + len];

        if old_bytes.len() != new.len() {
            let old = String::from_utf8_lossy(old_bytes).into_owned();
            return LengthMismatchSnafu {
                offset,
                old,
                new: new.to_string(),
            }
            .fail();
        }

        if old_bytes == new.as_bytes() {
            return Ok(false);
        }

        self.dynstr.data_mut()[offset..offset + len].copy_from_slice(new.as_bytes());
        self.dynstr.mark_data_dirty();

        Ok(true)
    }

    /// Resolves `idx` (a `.dynstr` logical index, which for this string table is itself a
    /// byte offset) through the string-lookup service and delegates to [`patch_by_off`].
    ///
    /// [`patch_by_off`]: Self::patch_by_off
    pub fn patch_by_idx(&mut self, idx: usize, new: &str) -> Result<bool> {
        // Resolving through `get` first mirrors the original's pointer-then-offset dance
        // and catches an out-of-bounds/unterminated index before any mutation is attempted.
        let _ = self.get(idx)?;
        self.patch_by_off(idx, new)
    }
}
