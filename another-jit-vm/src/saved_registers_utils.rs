use std::collections::HashMap;

use itertools::Itertools;

use crate::{Arch, Fpr, Gpr, WORD_SIZE};
use crate::arch::{ArchDescription, FrameConstants};
use crate::stack::{MemoryFault, WordMemory};

/// Where the floating point region sits relative to the general purpose region.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FprPlacement {
    /// fprs occupy the lowest slots, gpr offsets shift when fpu state is elided
    BelowGprs,
    /// gprs occupy the lowest slots, gpr offsets do not depend on the fpu flag
    AboveGprs,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum SavedRegister {
    Gpr(Gpr),
    Fpr(Fpr),
    /// the caller's frame pointer, stored by frame entry
    Link,
    ReturnAddress,
}

/// Layout of a register save area, in words from the stack pointer after the save.
///
/// The top two words are always the saved frame pointer and the return address, so that
/// a save area is also a walkable frame. Everything that stores, reloads or describes a
/// saved register must go through [`RegisterSaveLayout::offset_of`].
#[derive(Clone, Debug)]
pub struct RegisterSaveLayout {
    arch: Arch,
    save_fpu: bool,
    saved_gprs: &'static [Gpr],
    saved_fprs: &'static [Fpr],
    gpr_base: usize,
    fpr_base: Option<usize>,
    padding_words: usize,
    size_words: usize,
    frame: FrameConstants,
}

impl RegisterSaveLayout {
    pub fn new(arch: &ArchDescription, save_fpu: bool) -> Self {
        let gpr_words = arch.saved_gprs.len();
        let fpr_words = if save_fpu { arch.saved_fprs.len() } else { 0 };
        let (gpr_base, fpr_base) = match arch.fpr_placement {
            FprPlacement::BelowGprs => (fpr_words, save_fpu.then_some(0)),
            FprPlacement::AboveGprs => (0, save_fpu.then_some(gpr_words)),
        };
        let unpadded = gpr_words + fpr_words + 2;
        let align = arch.stack_alignment_words;
        let padding_words = (align - unpadded % align) % align;
        Self {
            arch: arch.arch,
            save_fpu,
            saved_gprs: arch.saved_gprs,
            saved_fprs: arch.saved_fprs,
            gpr_base,
            fpr_base,
            padding_words,
            size_words: unpadded + padding_words,
            frame: arch.frame,
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn includes_fpu(&self) -> bool {
        self.save_fpu
    }

    /// Total words, including padding, the saved frame pointer and the return address.
    pub fn save_area_size(&self) -> usize {
        self.size_words
    }

    pub fn save_area_size_in_bytes(&self) -> usize {
        self.size_words * WORD_SIZE
    }

    /// Words to allocate below the frame pointer pair after frame entry.
    pub fn body_words(&self) -> usize {
        self.size_words - 2
    }

    pub fn padding_words(&self) -> usize {
        self.padding_words
    }

    pub fn link_offset(&self) -> usize {
        self.size_words - 2
    }

    pub fn return_address_offset(&self) -> usize {
        self.size_words - 1
    }

    /// Word distance from the save area's stack pointer to the frame pointer of the save frame.
    pub fn fp_offset(&self) -> usize {
        (self.link_offset() as i32 - self.frame.link_offset) as usize
    }

    pub fn offset_of(&self, register: SavedRegister) -> Option<usize> {
        match register {
            SavedRegister::Gpr(gpr) => self.gpr_offset(gpr),
            SavedRegister::Fpr(fpr) => self.fpr_offset(fpr),
            SavedRegister::Link => Some(self.link_offset()),
            SavedRegister::ReturnAddress => Some(self.return_address_offset()),
        }
    }

    pub fn gpr_offset(&self, gpr: Gpr) -> Option<usize> {
        self.saved_gprs.iter().position(|saved| *saved == gpr).map(|index| self.gpr_base + index)
    }

    pub fn fpr_offset(&self, fpr: Fpr) -> Option<usize> {
        let fpr_base = self.fpr_base?;
        self.saved_fprs.iter().position(|saved| *saved == fpr).map(|index| fpr_base + index)
    }

    pub fn gpr_byte_offset(&self, gpr: Gpr) -> Option<i32> {
        self.gpr_offset(gpr).map(|words| (words * WORD_SIZE) as i32)
    }

    pub fn fpr_byte_offset(&self, fpr: Fpr) -> Option<i32> {
        self.fpr_offset(fpr).map(|words| (words * WORD_SIZE) as i32)
    }

    pub fn saved_gprs(&self) -> &'static [Gpr] {
        self.saved_gprs
    }

    pub fn saved_fprs(&self) -> &'static [Fpr] {
        if self.save_fpu {
            self.saved_fprs
        } else {
            &[]
        }
    }

    /// Every slot with its word offset, ascending.
    pub fn slots(&self) -> Vec<(SavedRegister, usize)> {
        let gprs = self.saved_gprs().iter().map(|gpr| SavedRegister::Gpr(*gpr));
        let fprs = self.saved_fprs().iter().map(|fpr| SavedRegister::Fpr(*fpr));
        gprs.chain(fprs)
            .chain([SavedRegister::Link, SavedRegister::ReturnAddress])
            .filter_map(|register| Some((register, self.offset_of(register)?)))
            .sorted_by_key(|(_, offset)| *offset)
            .collect()
    }

    pub fn read_area(&self, memory: &dyn WordMemory, sp: u64) -> Result<SavedRegisterValues, MemoryFault> {
        let mut values = HashMap::new();
        for (register, offset) in self.slots() {
            values.insert(register, memory.read_word(sp + (offset * WORD_SIZE) as u64)?);
        }
        Ok(SavedRegisterValues { values })
    }
}

/// Register values decoded out of a save area in memory.
#[derive(Clone, Debug)]
pub struct SavedRegisterValues {
    values: HashMap<SavedRegister, u64>,
}

impl SavedRegisterValues {
    pub fn get(&self, register: SavedRegister) -> Option<u64> {
        self.values.get(&register).copied()
    }

    pub fn gpr(&self, gpr: Gpr) -> Option<u64> {
        self.get(SavedRegister::Gpr(gpr))
    }

    pub fn fpr(&self, fpr: Fpr) -> Option<u64> {
        self.get(SavedRegister::Fpr(fpr))
    }

    pub fn return_address(&self) -> Option<u64> {
        self.get(SavedRegister::ReturnAddress)
    }
}
