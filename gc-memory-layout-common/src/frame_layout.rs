use static_assertions::const_assert_eq;

use another_jit_vm::{ArchDescription, FramePointerOffset, WORD_SIZE};

/// A monitor in an interpreter frame is the displaced header plus the locked object.
pub const MONITOR_SIZE_WORDS: usize = 2;

const_assert_eq!(MONITOR_SIZE_WORDS * WORD_SIZE, 16);

/// The parts of a method the interpreter sizes its frames from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MethodShape {
    pub max_locals: usize,
    pub max_stack: usize,
    pub size_of_parameters: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InterpreterFrameSlot {
    SenderSp,
    LastSp,
    Method,
    Mirror,
    Mdp,
    Cache,
    Locals,
    Bcp,
    InitialSp,
}

impl InterpreterFrameSlot {
    pub fn word_offset(&self, arch: &ArchDescription) -> i32 {
        let offsets = &arch.interpreter;
        match self {
            InterpreterFrameSlot::SenderSp => offsets.sender_sp,
            InterpreterFrameSlot::LastSp => offsets.last_sp,
            InterpreterFrameSlot::Method => offsets.method,
            InterpreterFrameSlot::Mirror => offsets.mirror,
            InterpreterFrameSlot::Mdp => offsets.mdp,
            InterpreterFrameSlot::Cache => offsets.cache,
            InterpreterFrameSlot::Locals => offsets.locals,
            InterpreterFrameSlot::Bcp => offsets.bcp,
            InterpreterFrameSlot::InitialSp => offsets.initial_sp,
        }
    }

    pub fn offset(&self, arch: &ArchDescription) -> FramePointerOffset {
        FramePointerOffset::from_words(self.word_offset(arch))
    }

    pub fn address(&self, arch: &ArchDescription, fp: u64) -> u64 {
        fp.wrapping_add(self.offset(arch).0 as i64 as u64)
    }
}

/// Words between the top of an interpreter frame and its sender sp, return address and saved fp
/// included.
///
/// The top frame gets room for its whole expression stack, other frames only for the `temps`
/// live at their call site. `extra_args` covers arguments pushed for the callee beyond its declared
/// parameters. Locals beyond the callee's parameters are part of the caller's frame; a callee with
/// fewer locals than parameters adds none.
pub fn size_activation(arch: &ArchDescription, max_stack: usize, temps: usize, extra_args: usize, monitors: usize,
                       callee_params: usize, callee_locals: usize, is_top_frame: bool) -> usize {
    let overhead = arch.interpreter.overhead_words(&arch.frame);
    let stack = if is_top_frame { max_stack } else { temps };
    let size = overhead + last_frame_adjust(callee_params, callee_locals) + monitors * MONITOR_SIZE_WORDS + stack + extra_args;
    align_words(size, arch.stack_alignment_words)
}

/// Extra words the caller of the outermost rebuilt frame must grow by, so that the
/// non parameter locals of that frame fit below the arguments the caller already pushed.
pub fn last_frame_adjust(callee_params: usize, callee_locals: usize) -> usize {
    callee_locals.saturating_sub(callee_params)
}

pub fn align_words(words: usize, alignment: usize) -> usize {
    (words + alignment - 1) / alignment * alignment
}
