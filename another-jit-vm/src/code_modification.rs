use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::WORD_SIZE;

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum PatchError {
    #[error("patch location {0:#x} is not word aligned")]
    Misaligned(u64),
    #[error("expected {expected:#x} at patch location but found {found:#x}")]
    UnexpectedContents { expected: u64, found: u64 },
    #[error("instruction of {len} bytes at offset {offset} does not fit a two word patch window")]
    BadWindow { offset: usize, len: usize },
}

/// Held while code is being modified. Dropping it serializes the instruction stream.
pub struct CodeModificationHandle<'l>(MutexGuard<'l, ()>);

impl Drop for CodeModificationHandle<'_> {
    fn drop(&mut self) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::x86_64::__cpuid_count(0, 0);
        }
        #[cfg(not(target_arch = "x86_64"))]
        std::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Writers of code serialize on this lock. Threads executing the code never take it.
pub struct GlobalCodeEditingLock(Mutex<()>);

impl GlobalCodeEditingLock {
    pub fn new() -> Self {
        Self(Mutex::new(()))
    }

    pub fn acquire(&self) -> CodeModificationHandle {
        CodeModificationHandle(self.0.lock())
    }
}

impl Default for GlobalCodeEditingLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace one aligned word of code in a single atomic store.
#[derive(Copy, Clone, Debug)]
pub struct EditAction {
    pub from: Option<u64>,
    pub to: u64,
    pub location: *const AtomicU64,
}

impl EditAction {
    pub fn do_edit(&self, handle: &CodeModificationHandle) -> Result<u64, PatchError> {
        let EditAction { from, to, location } = *self;
        if location as usize % WORD_SIZE != 0 {
            return Err(PatchError::Misaligned(location as u64));
        }
        let word = unsafe { &*location };
        handle.edit_word(word, to, from)
    }
}

impl CodeModificationHandle<'_> {
    pub fn edit_word(&self, word: &AtomicU64, new_val: u64, expected: Option<u64>) -> Result<u64, PatchError> {
        let old = match expected {
            None => word.swap(new_val, Ordering::AcqRel),
            Some(expected) => {
                word.compare_exchange(expected, new_val, Ordering::AcqRel, Ordering::Acquire)
                    .map_err(|found| PatchError::UnexpectedContents { expected, found })?
            }
        };
        log::trace!("patched code word {:p}: {:#x} -> {:#x}", word as *const AtomicU64, old, new_val);
        Ok(old)
    }
}

/// Self branch, any thread fetching it spins until the head is rewritten.
pub const SPIN_PATTERN: [u8; 2] = [0xEB, 0xFE];

/// An instruction that straddles two aligned code words and is rewritten with the
/// spin-then-patch sequence: spin head, new tail, new head.
pub struct SpinPatchSite<'a> {
    words: &'a [AtomicU64; 2],
    offset: usize,
    len: usize,
}

impl<'a> SpinPatchSite<'a> {
    pub fn new(words: &'a [AtomicU64; 2], offset: usize, len: usize) -> Result<Self, PatchError> {
        if offset + SPIN_PATTERN.len() > WORD_SIZE || offset + len > 2 * WORD_SIZE || len < SPIN_PATTERN.len() {
            return Err(PatchError::BadWindow { offset, len });
        }
        Ok(Self { words, offset, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn splice(&self, head: u64, tail: u64, instruction: &[u8]) -> (u64, u64) {
        let mut bytes = [0u8; 2 * WORD_SIZE];
        bytes[..WORD_SIZE].copy_from_slice(&head.to_le_bytes());
        bytes[WORD_SIZE..].copy_from_slice(&tail.to_le_bytes());
        bytes[self.offset..self.offset + instruction.len()].copy_from_slice(instruction);
        let mut head_bytes = [0u8; WORD_SIZE];
        let mut tail_bytes = [0u8; WORD_SIZE];
        head_bytes.copy_from_slice(&bytes[..WORD_SIZE]);
        tail_bytes.copy_from_slice(&bytes[WORD_SIZE..]);
        (u64::from_le_bytes(head_bytes), u64::from_le_bytes(tail_bytes))
    }

    fn extract(&self, head: u64, tail: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * WORD_SIZE);
        bytes.extend_from_slice(&head.to_le_bytes());
        bytes.extend_from_slice(&tail.to_le_bytes());
        bytes[self.offset..self.offset + self.len].to_vec()
    }

    fn head_is_spinning(&self, head: u64) -> bool {
        let head_bytes = head.to_le_bytes();
        head_bytes[self.offset..self.offset + SPIN_PATTERN.len()] == SPIN_PATTERN
    }

    pub fn patch(&self, _handle: &CodeModificationHandle, instruction: &[u8]) -> Result<(), PatchError> {
        if instruction.len() != self.len {
            return Err(PatchError::BadWindow { offset: self.offset, len: instruction.len() });
        }
        let old_head = self.words[0].load(Ordering::Acquire);
        let old_tail = self.words[1].load(Ordering::Acquire);
        let (spin_head, _) = self.splice(old_head, old_tail, &SPIN_PATTERN);
        self.words[0].store(spin_head, Ordering::Release);
        let (new_head, new_tail) = self.splice(old_head, old_tail, instruction);
        self.words[1].store(new_tail, Ordering::Release);
        self.words[0].store(new_head, Ordering::Release);
        log::trace!("spin patched {} byte instruction at offset {}", self.len, self.offset);
        Ok(())
    }

    /// Fetch the instruction the way an executing thread would see it: never a mix of two versions.
    pub fn fetch(&self) -> Vec<u8> {
        loop {
            let head = self.words[0].load(Ordering::Acquire);
            if self.head_is_spinning(head) {
                std::hint::spin_loop();
                continue;
            }
            let tail = self.words[1].load(Ordering::Acquire);
            if self.words[0].load(Ordering::Acquire) != head {
                continue;
            }
            return self.extract(head, tail);
        }
    }
}

/// Encode a rel32 call at `site` targeting `target`.
pub fn encode_call_rel32(site: u64, target: u64) -> [u8; 5] {
    let rel = target.wrapping_sub(site + 5) as i64 as i32;
    let rel_bytes = rel.to_le_bytes();
    [0xE8, rel_bytes[0], rel_bytes[1], rel_bytes[2], rel_bytes[3]]
}

pub fn decode_call_rel32(site: u64, instruction: &[u8]) -> Option<u64> {
    match instruction {
        [0xE8, b0, b1, b2, b3] => {
            let rel = i32::from_le_bytes([*b0, *b1, *b2, *b3]);
            Some((site + 5).wrapping_add(rel as i64 as u64))
        }
        _ => None,
    }
}
