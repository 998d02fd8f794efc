use memoffset::offset_of;
use static_assertions::const_assert_eq;

use crate::stack::{MemoryFault, StackBounds, WordMemory};

/// Most recent Java frame of a thread that is currently running runtime or native code.
/// An sp of zero means the thread has no walkable Java frame.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LastJavaFrameAnchor {
    pub last_java_sp: u64,
    pub last_java_fp: u64,
    pub last_java_pc: u64,
}

impl LastJavaFrameAnchor {
    pub fn has_last_java_frame(&self) -> bool {
        self.last_java_sp != 0
    }
}

/// Thread local state read and written by generated code through the thread register.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct JavaThreadContext {
    pub pending_exception: u64,
    pub exception_oop: u64,
    pub exception_pc: u64,
    pub exception_handler_pc: u64,
    pub is_method_handle_return: u64,
    pub vm_result: u64,
    pub vm_result_2: u64,
    pub anchor: LastJavaFrameAnchor,
    pub pending_deoptimization: i64,
    pub jvmci_implicit_exception_pc: u64,
    pub stack_base: u64,
    pub stack_size: u64,
    pub stack_guard_size: u64,
}

pub const PENDING_EXCEPTION_OFFSET: i32 = offset_of!(JavaThreadContext, pending_exception) as i32;
pub const EXCEPTION_OOP_OFFSET: i32 = offset_of!(JavaThreadContext, exception_oop) as i32;
pub const EXCEPTION_PC_OFFSET: i32 = offset_of!(JavaThreadContext, exception_pc) as i32;
pub const EXCEPTION_HANDLER_PC_OFFSET: i32 = offset_of!(JavaThreadContext, exception_handler_pc) as i32;
pub const IS_METHOD_HANDLE_RETURN_OFFSET: i32 = offset_of!(JavaThreadContext, is_method_handle_return) as i32;
pub const VM_RESULT_OFFSET: i32 = offset_of!(JavaThreadContext, vm_result) as i32;
pub const VM_RESULT_2_OFFSET: i32 = offset_of!(JavaThreadContext, vm_result_2) as i32;
pub const LAST_JAVA_SP_OFFSET: i32 = (offset_of!(JavaThreadContext, anchor) + offset_of!(LastJavaFrameAnchor, last_java_sp)) as i32;
pub const LAST_JAVA_FP_OFFSET: i32 = (offset_of!(JavaThreadContext, anchor) + offset_of!(LastJavaFrameAnchor, last_java_fp)) as i32;
pub const LAST_JAVA_PC_OFFSET: i32 = (offset_of!(JavaThreadContext, anchor) + offset_of!(LastJavaFrameAnchor, last_java_pc)) as i32;
pub const PENDING_DEOPTIMIZATION_OFFSET: i32 = offset_of!(JavaThreadContext, pending_deoptimization) as i32;
pub const JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET: i32 = offset_of!(JavaThreadContext, jvmci_implicit_exception_pc) as i32;
pub const STACK_BASE_OFFSET: i32 = offset_of!(JavaThreadContext, stack_base) as i32;
pub const STACK_SIZE_OFFSET: i32 = offset_of!(JavaThreadContext, stack_size) as i32;
pub const STACK_GUARD_SIZE_OFFSET: i32 = offset_of!(JavaThreadContext, stack_guard_size) as i32;
pub const JAVA_THREAD_CONTEXT_SIZE: usize = std::mem::size_of::<JavaThreadContext>();

const_assert_eq!(JAVA_THREAD_CONTEXT_SIZE % 8, 0);

/// No uncommon trap is pending.
pub const NO_PENDING_DEOPTIMIZATION: i64 = -1;

impl JavaThreadContext {
    pub fn new(stack: StackBounds) -> Self {
        Self {
            pending_deoptimization: NO_PENDING_DEOPTIMIZATION,
            stack_base: stack.base,
            stack_size: stack.size,
            stack_guard_size: stack.guard_size,
            ..Default::default()
        }
    }

    pub fn stack_bounds(&self) -> StackBounds {
        StackBounds {
            base: self.stack_base,
            size: self.stack_size,
            guard_size: self.stack_guard_size,
        }
    }

    pub fn words(&self) -> [(i32, u64); 15] {
        [
            (PENDING_EXCEPTION_OFFSET, self.pending_exception),
            (EXCEPTION_OOP_OFFSET, self.exception_oop),
            (EXCEPTION_PC_OFFSET, self.exception_pc),
            (EXCEPTION_HANDLER_PC_OFFSET, self.exception_handler_pc),
            (IS_METHOD_HANDLE_RETURN_OFFSET, self.is_method_handle_return),
            (VM_RESULT_OFFSET, self.vm_result),
            (VM_RESULT_2_OFFSET, self.vm_result_2),
            (LAST_JAVA_SP_OFFSET, self.anchor.last_java_sp),
            (LAST_JAVA_FP_OFFSET, self.anchor.last_java_fp),
            (LAST_JAVA_PC_OFFSET, self.anchor.last_java_pc),
            (PENDING_DEOPTIMIZATION_OFFSET, self.pending_deoptimization as u64),
            (JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET, self.jvmci_implicit_exception_pc),
            (STACK_BASE_OFFSET, self.stack_base),
            (STACK_SIZE_OFFSET, self.stack_size),
            (STACK_GUARD_SIZE_OFFSET, self.stack_guard_size),
        ]
    }

    /// Copy into word memory at `base`, the layout generated code sees through the thread register.
    pub fn store(&self, memory: &mut dyn WordMemory, base: u64) -> Result<(), MemoryFault> {
        for (offset, value) in self.words() {
            memory.write_word(base + offset as u64, value)?;
        }
        Ok(())
    }

    pub fn load(memory: &dyn WordMemory, base: u64) -> Result<Self, MemoryFault> {
        let read = |offset: i32| memory.read_word(base + offset as u64);
        Ok(Self {
            pending_exception: read(PENDING_EXCEPTION_OFFSET)?,
            exception_oop: read(EXCEPTION_OOP_OFFSET)?,
            exception_pc: read(EXCEPTION_PC_OFFSET)?,
            exception_handler_pc: read(EXCEPTION_HANDLER_PC_OFFSET)?,
            is_method_handle_return: read(IS_METHOD_HANDLE_RETURN_OFFSET)?,
            vm_result: read(VM_RESULT_OFFSET)?,
            vm_result_2: read(VM_RESULT_2_OFFSET)?,
            anchor: LastJavaFrameAnchor {
                last_java_sp: read(LAST_JAVA_SP_OFFSET)?,
                last_java_fp: read(LAST_JAVA_FP_OFFSET)?,
                last_java_pc: read(LAST_JAVA_PC_OFFSET)?,
            },
            pending_deoptimization: read(PENDING_DEOPTIMIZATION_OFFSET)? as i64,
            jvmci_implicit_exception_pc: read(JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET)?,
            stack_base: read(STACK_BASE_OFFSET)?,
            stack_size: read(STACK_SIZE_OFFSET)?,
            stack_guard_size: read(STACK_GUARD_SIZE_OFFSET)?,
        })
    }
}

/// Written by the call stub when native code enters Java. An entry frame finds its Java
/// caller, if there is one, through the anchor saved here.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct JavaCallWrapper {
    pub anchor: LastJavaFrameAnchor,
    pub thread: u64,
}

pub const CALL_WRAPPER_LAST_JAVA_SP_OFFSET: i32 = (offset_of!(JavaCallWrapper, anchor) + offset_of!(LastJavaFrameAnchor, last_java_sp)) as i32;
pub const CALL_WRAPPER_LAST_JAVA_FP_OFFSET: i32 = (offset_of!(JavaCallWrapper, anchor) + offset_of!(LastJavaFrameAnchor, last_java_fp)) as i32;
pub const CALL_WRAPPER_LAST_JAVA_PC_OFFSET: i32 = (offset_of!(JavaCallWrapper, anchor) + offset_of!(LastJavaFrameAnchor, last_java_pc)) as i32;

impl JavaCallWrapper {
    pub fn load(memory: &dyn WordMemory, base: u64) -> Result<Self, MemoryFault> {
        Ok(Self {
            anchor: LastJavaFrameAnchor {
                last_java_sp: memory.read_word(base + CALL_WRAPPER_LAST_JAVA_SP_OFFSET as u64)?,
                last_java_fp: memory.read_word(base + CALL_WRAPPER_LAST_JAVA_FP_OFFSET as u64)?,
                last_java_pc: memory.read_word(base + CALL_WRAPPER_LAST_JAVA_PC_OFFSET as u64)?,
            },
            thread: memory.read_word(base + offset_of!(JavaCallWrapper, thread) as u64)?,
        })
    }

    pub fn store(&self, memory: &mut dyn WordMemory, base: u64) -> Result<(), MemoryFault> {
        memory.write_word(base + CALL_WRAPPER_LAST_JAVA_SP_OFFSET as u64, self.anchor.last_java_sp)?;
        memory.write_word(base + CALL_WRAPPER_LAST_JAVA_FP_OFFSET as u64, self.anchor.last_java_fp)?;
        memory.write_word(base + CALL_WRAPPER_LAST_JAVA_PC_OFFSET as u64, self.anchor.last_java_pc)?;
        memory.write_word(base + offset_of!(JavaCallWrapper, thread) as u64, self.thread)
    }
}
