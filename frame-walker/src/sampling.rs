use log::trace;

use another_jit_vm::thread_context::JavaThreadContext;

use crate::{Frame, FrameError, FrameWalker, RegisterMap};

/// Registers of a thread stopped at an arbitrary instruction, as a signal handler sees them.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RegisterSnapshot {
    pub sp: u64,
    pub fp: u64,
    pub pc: u64,
}

#[derive(Clone, Debug)]
pub enum StackSample {
    /// stopped in generated code, frames start at the snapshot
    InJava { frames: Vec<Frame> },
    /// stopped in the runtime, frames start at the last java frame
    InVm { frames: Vec<Frame> },
    /// mid transition or mid prologue, no sample
    NotWalkable,
}

impl StackSample {
    pub fn frames(&self) -> &[Frame] {
        match self {
            StackSample::InJava { frames } | StackSample::InVm { frames } => frames,
            StackSample::NotWalkable => &[],
        }
    }
}

/// Sample the stack of a stopped thread. Any frame that fails the safety check discards the
/// whole sample rather than report a guess.
pub fn sample_stack(walker: &FrameWalker, snapshot: RegisterSnapshot, thread: &JavaThreadContext, max_depth: usize) -> StackSample {
    let in_java = walker.code_cache().contains(snapshot.pc);
    let top = if in_java {
        walker.frame_at(snapshot.sp, snapshot.fp, snapshot.pc)
    } else if thread.anchor.has_last_java_frame() {
        walker.frame_from_anchor(&thread.anchor)
    } else {
        trace!("no sample: pc {:#x} outside java code and no last java frame", snapshot.pc);
        return StackSample::NotWalkable;
    };
    let frames = top.and_then(|top| walker.walk(top, &mut RegisterMap::new(false), max_depth));
    match frames {
        Ok(frames) if in_java => StackSample::InJava { frames },
        Ok(frames) => StackSample::InVm { frames },
        Err(err) => {
            if !matches!(err, FrameError::Unsafe { .. }) {
                trace!("no sample: {}", err);
            }
            StackSample::NotWalkable
        }
    }
}
