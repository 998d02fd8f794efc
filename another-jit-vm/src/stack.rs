use std::ffi::c_void;
use std::num::NonZeroUsize;

use nix::sys::mman::{mmap, mprotect, munmap, MapFlags, ProtFlags};
use thiserror::Error;

use crate::WORD_SIZE;

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("memory fault at {address:#x}")]
pub struct MemoryFault {
    pub address: u64,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("stack overflow: touching {touched:#x} with usable stack ending at {limit:#x}")]
pub struct StackOverflow {
    pub touched: u64,
    pub limit: u64,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum StackBangError {
    #[error(transparent)]
    Overflow(#[from] StackOverflow),
    #[error("stack bang with a page size of zero")]
    ZeroPageSize,
}

/// Word granular memory that generated code and stack walkers read and write.
pub trait WordMemory {
    fn read_word(&self, address: u64) -> Result<u64, MemoryFault>;
    fn write_word(&mut self, address: u64, value: u64) -> Result<(), MemoryFault>;
}

/// Bounds of one thread's stack. Stacks grow down from `base`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StackBounds {
    pub base: u64,
    pub size: u64,
    pub guard_size: u64,
}

impl StackBounds {
    pub fn end(&self) -> u64 {
        self.base - self.size
    }

    /// Lowest address usable by frames, the guard zone starts below it.
    pub fn usable_end(&self) -> u64 {
        self.end() + self.guard_size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.end() && address < self.base
    }

    pub fn contains_usable(&self, address: u64) -> bool {
        address >= self.usable_end() && address < self.base
    }

    /// Like [`StackBounds::contains_usable`] but also admits the address one past the top,
    /// which is where the stack pointer sits on an empty stack.
    pub fn contains_usable_inclusive(&self, address: u64) -> bool {
        address >= self.usable_end() && address <= self.base
    }

    /// Check that every page touched while growing the stack by `bytes` from `sp` is usable,
    /// plus `shadow_pages` of slack for runtime calls made from the new frames. A growth that
    /// does not fit in the address space overflows.
    pub fn check_bang(&self, sp: u64, bytes: u64, shadow_pages: u64, page_size: u64) -> Result<(), StackBangError> {
        if page_size == 0 {
            return Err(StackBangError::ZeroPageSize);
        }
        let limit = self.usable_end();
        let deepest = shadow_pages.checked_mul(page_size)
            .and_then(|shadow| bytes.checked_add(shadow))
            .and_then(|growth| sp.checked_sub(growth))
            .ok_or(StackOverflow { touched: 0, limit })?;
        let mut touched = sp;
        while touched > deepest {
            touched = touched.saturating_sub(page_size).max(deepest);
            if !self.contains_usable(touched) {
                return Err(StackOverflow { touched, limit }.into());
            }
        }
        Ok(())
    }
}

pub struct OwnedNativeStack {
    pub mmaped_top: *mut c_void,
    pub(crate) mmaped_bottom: *mut c_void,
    pub max_stack: usize,
    pub guard_size: usize,
}

impl OwnedNativeStack {
    pub fn new(max_stack: usize, guard_pages: usize) -> Result<Self, nix::Error> {
        let page_size = page_size();
        let guard_size = guard_pages * page_size;
        let len = NonZeroUsize::new(max_stack + guard_size).ok_or(nix::Error::EINVAL)?;
        let mmaped_bottom = unsafe {
            mmap(None, len, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE, MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS, -1, 0)?
        };
        if guard_size != 0 {
            unsafe { mprotect(mmaped_bottom, guard_size, ProtFlags::PROT_NONE)?; }
        }
        let mmaped_top = unsafe { mmaped_bottom.add(max_stack + guard_size) };
        Ok(Self {
            mmaped_top,
            mmaped_bottom,
            max_stack,
            guard_size,
        })
    }

    pub fn bounds(&self) -> StackBounds {
        StackBounds {
            base: self.mmaped_top as u64,
            size: (self.max_stack + self.guard_size) as u64,
            guard_size: self.guard_size as u64,
        }
    }

    pub fn memory(&self) -> RawStackMemory {
        RawStackMemory { bounds: self.bounds() }
    }
}

impl Drop for OwnedNativeStack {
    fn drop(&mut self) {
        let len = self.max_stack + self.guard_size;
        if let Err(err) = unsafe { munmap(self.mmaped_bottom, len) } {
            log::error!("failed to unmap native stack at {:?}: {}", self.mmaped_bottom, err);
        }
    }
}

pub fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Direct access to a live stack, every access is checked against the usable bounds.
pub struct RawStackMemory {
    pub bounds: StackBounds,
}

impl RawStackMemory {
    fn check(&self, address: u64) -> Result<*mut u64, MemoryFault> {
        let in_bounds = self.bounds.contains_usable(address) && self.bounds.contains_usable(address + WORD_SIZE as u64 - 1);
        if !in_bounds || address % WORD_SIZE as u64 != 0 {
            return Err(MemoryFault { address });
        }
        Ok(address as *mut u64)
    }
}

impl WordMemory for RawStackMemory {
    fn read_word(&self, address: u64) -> Result<u64, MemoryFault> {
        let ptr = self.check(address)?;
        Ok(unsafe { ptr.read_volatile() })
    }

    fn write_word(&mut self, address: u64, value: u64) -> Result<(), MemoryFault> {
        let ptr = self.check(address)?;
        unsafe { ptr.write_volatile(value) };
        Ok(())
    }
}
