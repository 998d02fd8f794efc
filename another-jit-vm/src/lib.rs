// machine level layer for runtime stubs:
// registers and their roles per architecture, the register save area layout,
// native stack bounds, thread local state read by generated code, and code patching.
// nothing in here knows about stub ids or the ir.

use std::fmt::{Debug, Formatter};

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

pub use arch::{ArchDescription, DeoptTemps, FrameConstants, InterpreterFrameOffsets, RegisterRoles, ReturnAddressStyle};

pub mod arch;
pub mod saved_registers_utils;
pub mod stack;
pub mod code_modification;
pub mod thread_context;

pub const WORD_SIZE: usize = 8;

/// General purpose register, identified by its architectural encoding.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Gpr(pub u8);

impl Debug for Gpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gpr{}", self.0)
    }
}

/// Floating point register, identified by its architectural encoding.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Fpr(pub u8);

impl Debug for Fpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "fpr{}", self.0)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, EnumIter, EnumString, IntoStaticStr, Display)]
pub enum Arch {
    #[strum(serialize = "x86_64")]
    X86_64,
    #[strum(serialize = "riscv64")]
    Riscv64,
}

impl Arch {
    pub fn description(&self) -> &'static ArchDescription {
        match self {
            Arch::X86_64 => &arch::x86_64::X86_64,
            Arch::Riscv64 => &arch::riscv64::RISCV64,
        }
    }

    #[cfg(target_arch = "x86_64")]
    pub fn host() -> Option<Arch> {
        Some(Arch::X86_64)
    }

    #[cfg(target_arch = "riscv64")]
    pub fn host() -> Option<Arch> {
        Some(Arch::Riscv64)
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "riscv64")))]
    pub fn host() -> Option<Arch> {
        None
    }
}

/// Byte offset relative to a frame pointer, positive values grow towards the caller.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FramePointerOffset(pub i32);

impl FramePointerOffset {
    pub fn from_words(words: i32) -> Self {
        Self(words * WORD_SIZE as i32)
    }
}

/// Start address of a block of generated code.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct BaseAddress(pub u64);

#[cfg(test)]
pub mod tests;
