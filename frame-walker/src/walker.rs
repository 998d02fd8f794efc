use std::sync::Arc;

use log::trace;

use another_jit_vm::{Arch, ArchDescription, WORD_SIZE};
use another_jit_vm::stack::{StackBounds, WordMemory};
use another_jit_vm::thread_context::{JavaCallWrapper, LastJavaFrameAnchor};
use gc_memory_layout_common::code_blob::{CodeBlob, CodeBlobKind};
use gc_memory_layout_common::code_cache::CodeCache;
use gc_memory_layout_common::frame_layout::InterpreterFrameSlot;
use gc_memory_layout_common::oop_map::VMReg;

use crate::{Frame, FrameError, FrameKind, RegisterMap};

const WORD: u64 = WORD_SIZE as u64;

fn offset(address: u64, words: i32) -> u64 {
    address.wrapping_add((words as i64 * WORD_SIZE as i64) as u64)
}

/// Walks one thread's stack. Frames are read through `memory` and their pcs resolved through
/// `code_cache`; nothing outside `stack` is trusted.
pub struct FrameWalker<'l> {
    arch: &'static ArchDescription,
    code_cache: &'l CodeCache,
    memory: &'l dyn WordMemory,
    stack: StackBounds,
}

impl<'l> FrameWalker<'l> {
    pub fn new(arch: Arch, code_cache: &'l CodeCache, memory: &'l dyn WordMemory, stack: StackBounds) -> Self {
        Self {
            arch: arch.description(),
            code_cache,
            memory,
            stack,
        }
    }

    pub fn stack(&self) -> StackBounds {
        self.stack
    }

    pub fn code_cache(&self) -> &CodeCache {
        self.code_cache
    }

    /// Classify the frame executing at `pc`.
    pub fn frame_at(&self, sp: u64, fp: u64, pc: u64) -> Result<Frame, FrameError> {
        self.frame_with_unextended_sp(sp, sp, fp, pc)
    }

    pub fn frame_with_unextended_sp(&self, sp: u64, unextended_sp: u64, fp: u64, pc: u64) -> Result<Frame, FrameError> {
        if self.code_cache.is_interpreter_pc(pc) {
            return Ok(Frame { sp, unextended_sp, fp, pc, kind: FrameKind::Interpreted, original_pc: None, blob: None });
        }
        let blob = self.code_cache.find_blob(pc).ok_or(FrameError::UnknownPc(pc))?.clone();
        let (kind, original_pc) = match blob.kind {
            CodeBlobKind::BufferBlob => return Err(FrameError::Frameless(pc)),
            CodeBlobKind::CallStub => (FrameKind::Entry, None),
            CodeBlobKind::NativeWrapper => (FrameKind::Native, None),
            CodeBlobKind::RuntimeStub | CodeBlobKind::DeoptimizationBlob | CodeBlobKind::UncommonTrapBlob => (FrameKind::Stub, None),
            CodeBlobKind::Compiled => {
                if blob.is_deopt_handler_pc(pc) {
                    (FrameKind::Deoptimized, Some(self.original_pc(&blob, unextended_sp)?))
                } else {
                    (FrameKind::Compiled, None)
                }
            }
        };
        Ok(Frame { sp, unextended_sp, fp, pc, kind, original_pc, blob: Some(blob) })
    }

    fn original_pc(&self, blob: &CodeBlob, unextended_sp: u64) -> Result<u64, FrameError> {
        let orig_pc_offset = blob.orig_pc_offset.ok_or(FrameError::NotDeoptimizable("blob keeps no original pc"))?;
        Ok(self.memory.read_word(unextended_sp.wrapping_add(orig_pc_offset as i64 as u64))?)
    }

    /// The most recent java frame of a thread that is in the runtime. When the anchor has no pc
    /// the return address is the word just below the anchor's sp.
    pub fn frame_from_anchor(&self, anchor: &LastJavaFrameAnchor) -> Result<Frame, FrameError> {
        if !anchor.has_last_java_frame() {
            return Err(FrameError::FirstFrame);
        }
        let pc = if anchor.last_java_pc != 0 {
            anchor.last_java_pc
        } else {
            let return_address = anchor.last_java_sp.checked_sub(WORD)
                .ok_or(FrameError::Unsafe { sp: anchor.last_java_sp, pc: 0 })?;
            self.memory.read_word(return_address)?
        };
        self.frame_at(anchor.last_java_sp, anchor.last_java_fp, pc)
    }

    /// Whether a frame built from an arbitrary register snapshot can be trusted: sp and fp in the
    /// usable stack with fp above sp, and a pc inside a known blob past its prologue.
    pub fn is_frame_safe(&self, frame: &Frame) -> bool {
        let reject = |reason: &str| {
            trace!("rejecting frame sp={:#x} fp={:#x} pc={:#x}: {}", frame.sp, frame.fp, frame.pc, reason);
            false
        };
        if !self.stack.contains_usable_inclusive(frame.sp) {
            return reject("sp outside the usable stack");
        }
        if !self.stack.contains_usable_inclusive(frame.unextended_sp) {
            return reject("unextended sp outside the usable stack");
        }
        if !self.stack.contains_usable_inclusive(frame.fp) {
            return reject("fp outside the usable stack");
        }
        if frame.fp <= frame.sp {
            return reject("fp not above sp");
        }
        match &frame.blob {
            None if frame.kind == FrameKind::Interpreted => true,
            None => reject("no code blob"),
            Some(blob) => {
                if !blob.contains(frame.pc) {
                    reject("pc outside its blob")
                } else if blob.is_frameless() {
                    reject("frameless blob")
                } else if !blob.frame_complete_at(frame.pc) {
                    reject("frame not complete")
                } else {
                    true
                }
            }
        }
    }

    /// The caller of `frame`. Callee saved register locations found on the way are recorded in `map`.
    pub fn sender(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame, FrameError> {
        if map.update_map() {
            map.set_include_argument_oops(false);
        }
        match frame.kind {
            FrameKind::Entry => self.sender_for_entry_frame(frame, map),
            FrameKind::Interpreted => self.sender_for_interpreter_frame(frame, map),
            FrameKind::Compiled | FrameKind::Native | FrameKind::Deoptimized | FrameKind::Stub => self.sender_for_compiled_frame(frame, map),
        }
    }

    fn sender_for_entry_frame(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame, FrameError> {
        let wrapper_address = self.memory.read_word(offset(frame.fp, self.arch.frame.entry_frame_call_wrapper_offset))?;
        let wrapper = JavaCallWrapper::load(self.memory, wrapper_address)?;
        map.clear();
        self.frame_from_anchor(&wrapper.anchor)
    }

    fn update_map_with_saved_link(&self, map: &mut RegisterMap, link_address: u64) {
        if map.update_map() {
            map.set_location(VMReg::Register(self.arch.roles.fp), link_address);
        }
    }

    fn sender_for_interpreter_frame(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame, FrameError> {
        let frame_constants = &self.arch.frame;
        let sender_sp = offset(frame.fp, frame_constants.sender_sp_offset);
        let unextended_sp = self.memory.read_word(InterpreterFrameSlot::SenderSp.address(self.arch, frame.fp))?;
        let link_address = offset(frame.fp, frame_constants.link_offset);
        let sender_fp = self.memory.read_word(link_address)?;
        let sender_pc = self.memory.read_word(offset(frame.fp, frame_constants.return_addr_offset))?;
        self.update_map_with_saved_link(map, link_address);
        self.frame_with_unextended_sp(sender_sp, unextended_sp, sender_fp, sender_pc)
    }

    fn sender_for_compiled_frame(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame, FrameError> {
        let blob: &Arc<CodeBlob> = frame.blob.as_ref().ok_or(FrameError::UnknownPc(frame.pc))?;
        let frame_size = blob.frame_size_words.ok_or(FrameError::Frameless(frame.pc))?;
        // return address and link sit in the two words below the sender sp
        let sender_sp = frame_size.checked_mul(WORD_SIZE)
            .and_then(|bytes| frame.unextended_sp.checked_add(bytes as u64))
            .filter(|sender_sp| *sender_sp >= 2 * WORD)
            .ok_or(FrameError::Unsafe { sp: frame.sp, pc: frame.pc })?;
        let sender_pc = self.memory.read_word(sender_sp - WORD)?;
        let link_address = sender_sp - 2 * WORD;
        let sender_fp = self.memory.read_word(link_address)?;
        if map.update_map() {
            map.set_include_argument_oops(blob.caller_must_gc_arguments);
            if let Some(oop_map) = blob.oop_map_for_return_pc(frame.real_pc()) {
                for (register, slot) in oop_map.callee_saved_slots() {
                    map.set_location(register, frame.unextended_sp.wrapping_add(slot as u64 * WORD));
                }
            }
            self.update_map_with_saved_link(map, link_address);
        }
        self.frame_at(sender_sp, sender_fp, sender_pc)
    }

    /// Walk from `frame` to the first frame, stopping at `max_depth` frames.
    pub fn walk(&self, frame: Frame, map: &mut RegisterMap, max_depth: usize) -> Result<Vec<Frame>, FrameError> {
        let mut frames = vec![];
        let mut current = frame;
        while frames.len() < max_depth {
            if !self.is_frame_safe(&current) {
                return Err(FrameError::Unsafe { sp: current.sp, pc: current.pc });
            }
            let next = match self.sender(&current, map) {
                Ok(next) => Some(next),
                Err(FrameError::FirstFrame) => None,
                Err(err) => return Err(err),
            };
            frames.push(current);
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(frames)
    }
}

/// Make `frame` return into its blob's deopt handler. The real return pc is kept at the
/// blob's original pc offset, where the walker finds it again.
pub fn deoptimize_frame(frame: &Frame, memory: &mut dyn WordMemory) -> Result<(), FrameError> {
    if frame.kind != FrameKind::Compiled {
        return Err(FrameError::NotDeoptimizable("not a compiled frame"));
    }
    let blob = frame.blob.as_ref().ok_or(FrameError::NotDeoptimizable("no code blob"))?;
    let handler = blob.deopt_handler_pc().ok_or(FrameError::NotDeoptimizable("blob has no deopt handler"))?;
    let orig_pc_offset = blob.orig_pc_offset.ok_or(FrameError::NotDeoptimizable("blob keeps no original pc"))?;
    memory.write_word(frame.unextended_sp.wrapping_add(orig_pc_offset as i64 as u64), frame.pc)?;
    let return_address = frame.sp.checked_sub(WORD).ok_or(FrameError::Unsafe { sp: frame.sp, pc: frame.pc })?;
    memory.write_word(return_address, handler)?;
    Ok(())
}
