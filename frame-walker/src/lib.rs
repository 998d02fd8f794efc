// walks the stacks generated code leaves behind: classifies frames by pc, computes senders,
// decides whether a frame seen at an arbitrary pc can be trusted, and samples stacks
// for profilers.

use thiserror::Error;

use another_jit_vm::stack::MemoryFault;

pub use frame::{Frame, FrameKind, RegisterMap};
pub use sampling::{RegisterSnapshot, sample_stack, StackSample};
pub use walker::{deoptimize_frame, FrameWalker};

pub mod frame;
pub mod walker;
pub mod sampling;
#[cfg(test)]
pub mod tests;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum FrameError {
    #[error("frame at sp {sp:#x} pc {pc:#x} is not safe to walk")]
    Unsafe { sp: u64, pc: u64 },
    #[error("entry frame has no java caller")]
    FirstFrame,
    #[error("pc {0:#x} is not in the interpreter or any code blob")]
    UnknownPc(u64),
    #[error("pc {0:#x} is in frameless code")]
    Frameless(u64),
    #[error("frame cannot be deoptimized: {0}")]
    NotDeoptimizable(&'static str),
    #[error(transparent)]
    Memory(#[from] MemoryFault),
}
