//! A stand-in for the host ELF access library's section data descriptors.
//!
//! The real host library hands out a pointer into a memory-mapped file and a separate
//! dirty flag that must be set for an edit to survive the eventual write-back. This crate
//! has no such library to call into, so [`SectionBuf`] models the same contract directly:
//! it owns a copy of one section's bytes (taken from the file buffer at `sh_offset`) plus
//! two independent dirty bits, and the driver in `migrate.rs` is the only thing that
//! splices a dirty buffer back into the file.
pub struct SectionBuf {
    sh_offset: usize,
    data: Vec<u8>,
    data_dirty: bool,
    section_dirty: bool,
}

impl SectionBuf {
    pub fn new(sh_offset: usize, data: Vec<u8>) -> Self {
        Self {
            sh_offset,
            data,
            data_dirty: false,
            section_dirty: false,
        }
    }

    #[cfg(test)]
    pub fn for_test(data: Vec<u8>) -> Self {
        Self::new(0, data)
    }

    pub fn sh_offset(&self) -> usize {
        self.sh_offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn mark_data_dirty(&mut self) {
        self.data_dirty = true;
    }

    pub fn mark_section_dirty(&mut self) {
        self.section_dirty = true;
    }

    pub fn data_dirty(&self) -> bool {
        self.data_dirty
    }

    pub fn section_dirty(&self) -> bool {
        self.section_dirty
    }
}
