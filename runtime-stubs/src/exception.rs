use another_jit_vm::thread_context::{EXCEPTION_OOP_OFFSET, EXCEPTION_PC_OFFSET, IS_METHOD_HANDLE_RETURN_OFFSET, PENDING_EXCEPTION_OFFSET, VM_RESULT_2_OFFSET, VM_RESULT_OFFSET};
use another_jit_vm_ir::{IRInstr, RuntimeEntry, StubAssembler, StubCode, StubGenConfig, StubGenError};
use gc_memory_layout_common::oop_map::OopMap;
use stub_ids::{EntryId, StubId};

use crate::{saved_slot, spare_callee_saved};

/// What is live when an exception stub is entered.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EntryStyle {
    /// the stub that jumped here already saved every register
    AlreadySaved,
    /// any register may be live
    Full,
    /// only the exception oop and pc registers are live
    CalleeOnly,
}

#[derive(Copy, Clone, Debug)]
pub struct FlavorOptions {
    pub includes_fpu: bool,
    pub entry_style: EntryStyle,
}

/// The tier-1 exception dispatch stubs. They share one generator and differ only in
/// [`FlavorOptions`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ExceptionStubFlavor {
    /// entered with a pending exception and the registers saved by the stub that saw it
    ForwardException,
    HandleException,
    HandleExceptionNoFpu,
    /// entered right after a call returned an exception in the exception registers
    HandleExceptionFromCallee,
}

impl ExceptionStubFlavor {
    pub const ALL: [ExceptionStubFlavor; 4] = [
        ExceptionStubFlavor::ForwardException,
        ExceptionStubFlavor::HandleException,
        ExceptionStubFlavor::HandleExceptionNoFpu,
        ExceptionStubFlavor::HandleExceptionFromCallee,
    ];

    pub fn options(&self) -> FlavorOptions {
        match self {
            ExceptionStubFlavor::ForwardException => FlavorOptions { includes_fpu: true, entry_style: EntryStyle::AlreadySaved },
            ExceptionStubFlavor::HandleException => FlavorOptions { includes_fpu: true, entry_style: EntryStyle::Full },
            ExceptionStubFlavor::HandleExceptionNoFpu => FlavorOptions { includes_fpu: false, entry_style: EntryStyle::Full },
            ExceptionStubFlavor::HandleExceptionFromCallee => FlavorOptions { includes_fpu: false, entry_style: EntryStyle::CalleeOnly },
        }
    }

    pub fn stub_id(&self) -> StubId {
        match self {
            ExceptionStubFlavor::ForwardException => StubId::C1ForwardException,
            ExceptionStubFlavor::HandleException => StubId::C1HandleException,
            ExceptionStubFlavor::HandleExceptionNoFpu => StubId::C1HandleExceptionNoFpu,
            ExceptionStubFlavor::HandleExceptionFromCallee => StubId::C1HandleExceptionFromCallee,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        match self {
            ExceptionStubFlavor::ForwardException => EntryId::C1ForwardException,
            ExceptionStubFlavor::HandleException => EntryId::C1HandleException,
            ExceptionStubFlavor::HandleExceptionNoFpu => EntryId::C1HandleExceptionNoFpu,
            ExceptionStubFlavor::HandleExceptionFromCallee => EntryId::C1HandleExceptionFromCallee,
        }
    }
}

/// Find the handler for the exception in the exception registers and continue there.
///
/// The throwing pc replaces the stub's return address before the lookup, so a walk during
/// the lookup sees the throw site. The handler found replaces it afterwards. Full and already
/// saved flavors return into the handler with every register restored and the exception
/// registers reloaded from the thread. The callee flavor has no registers to restore: it pops
/// the handler address and jumps, restoring sp from the method handle save register when the
/// throwing call site was a method handle invoke.
pub fn generate_handle_exception(config: StubGenConfig, flavor: ExceptionStubFlavor) -> Result<StubCode, StubGenError> {
    let options = flavor.options();
    let stub_id = flavor.stub_id();
    let mut masm = StubAssembler::new(config, stub_id.name(), Some(stub_id));
    let roles = *masm.roles();
    let layout = masm.arch().save_layout(options.includes_fpu);
    let return_address = masm.return_address_offset();

    masm.entry(flavor.entry_id());
    let oop_map = match options.entry_style {
        EntryStyle::AlreadySaved => {
            masm.set_frame_size(layout.save_area_size());
            masm.load(roles.exception_oop, roles.thread, PENDING_EXCEPTION_OFFSET);
            masm.store_const(0, roles.thread, PENDING_EXCEPTION_OFFSET);
            masm.load(roles.exception_pc, roles.fp, return_address);
            masm.store_const(0, roles.thread, VM_RESULT_OFFSET);
            masm.store_const(0, roles.thread, VM_RESULT_2_OFFSET);
            OopMap::from_save_layout(&layout, 0)
        }
        EntryStyle::Full => masm.save_live_registers(&layout, 0),
        EntryStyle::CalleeOnly => {
            masm.emit(IRInstr::EnterFrame);
            masm.set_frame_size(2);
            masm.set_frame_complete();
            OopMap::new(2, 0)
        }
    };

    if config.debug_checks {
        let has_exception = masm.new_label();
        masm.emit(IRInstr::BranchNotZero { a: roles.exception_oop, label: has_exception });
        masm.stop("exception stub entered without an exception");
        masm.bind(has_exception);
    }
    masm.store(roles.exception_oop, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.store(roles.exception_pc, roles.thread, EXCEPTION_PC_OFFSET);
    masm.store(roles.exception_pc, roles.fp, return_address);

    let call = masm.call_rt(RuntimeEntry::ExceptionHandlerForPc, &[], None, None);
    masm.add_oop_map(call, oop_map);
    masm.store(roles.result, roles.fp, return_address);

    match options.entry_style {
        EntryStyle::AlreadySaved | EntryStyle::Full => {
            masm.load(roles.scratch1, roles.thread, EXCEPTION_OOP_OFFSET);
            masm.store(roles.scratch1, roles.sp, saved_slot(&layout, roles.exception_oop)?);
            masm.load(roles.scratch1, roles.thread, EXCEPTION_PC_OFFSET);
            masm.store(roles.scratch1, roles.sp, saved_slot(&layout, roles.exception_pc)?);
            masm.restore_live_registers(&layout);
            masm.emit(IRInstr::LeaveFrame);
            masm.emit(IRInstr::Return);
        }
        EntryStyle::CalleeOnly => {
            let handler = roles.scratch2;
            masm.emit(IRInstr::LeaveFrame);
            masm.emit(IRInstr::PopReturnAddress { to: handler });
            let not_method_handle = masm.new_label();
            masm.load(roles.scratch1, roles.thread, IS_METHOD_HANDLE_RETURN_OFFSET);
            masm.emit(IRInstr::BranchZero { a: roles.scratch1, label: not_method_handle });
            masm.mov(roles.sp, roles.mh_sp_save);
            masm.bind(not_method_handle);
            masm.load(roles.exception_oop, roles.thread, EXCEPTION_OOP_OFFSET);
            masm.load(roles.exception_pc, roles.thread, EXCEPTION_PC_OFFSET);
            masm.emit(IRInstr::JumpRegister { target: handler });
        }
    }
    masm.finish()
}

/// Continue unwinding in the caller of a compiled frame that has already been removed.
/// Entered with the exception registers live and the return address into the caller
/// still on the stack (or in the link register).
pub fn generate_unwind_exception(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::C1UnwindException.name(), Some(StubId::C1UnwindException));
    let roles = *masm.roles();
    let mut spare = spare_callee_saved(&roles);
    let oop_keep = spare.next().ok_or(StubGenError::NotSaved("spare callee saved register"))?;
    let pc_keep = spare.next().ok_or(StubGenError::NotSaved("spare callee saved register"))?;

    masm.entry(EntryId::C1UnwindException);
    masm.store_const(0, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.store_const(0, roles.thread, EXCEPTION_PC_OFFSET);
    masm.mov(oop_keep, roles.exception_oop);
    masm.emit(IRInstr::PopReturnAddress { to: pc_keep });
    masm.call_rt_leaf(RuntimeEntry::ExceptionHandlerForReturnAddress, &[pc_keep]);
    masm.mov(roles.scratch2, roles.result);
    masm.mov(roles.exception_oop, oop_keep);
    masm.mov(roles.exception_pc, pc_keep);
    masm.emit(IRInstr::JumpRegister { target: roles.scratch2 });
    masm.finish()
}

/// The shared forward exception stub. Frameless stubs tail jump here after a runtime call
/// left an exception pending, with their return address as the only trace of the caller.
pub fn generate_forward_exception(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::StubGenForwardException.name(), Some(StubId::StubGenForwardException));
    let roles = *masm.roles();
    let return_address = masm.return_address_offset();

    masm.entry(EntryId::StubGenForwardException);
    masm.emit(IRInstr::EnterFrame);
    masm.set_frame_size(2);
    masm.set_frame_complete();
    if config.debug_checks {
        let pending = masm.new_label();
        masm.load(roles.scratch1, roles.thread, PENDING_EXCEPTION_OFFSET);
        masm.emit(IRInstr::BranchNotZero { a: roles.scratch1, label: pending });
        masm.stop("forward_exception entered without a pending exception");
        masm.bind(pending);
    }
    masm.load(roles.scratch2, roles.fp, return_address);
    masm.call_rt_leaf(RuntimeEntry::ExceptionHandlerForReturnAddress, &[roles.scratch2]);
    masm.mov(roles.scratch2, roles.result);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::PopReturnAddress { to: roles.exception_pc });
    masm.load(roles.exception_oop, roles.thread, PENDING_EXCEPTION_OFFSET);
    masm.store_const(0, roles.thread, PENDING_EXCEPTION_OFFSET);
    masm.emit(IRInstr::JumpRegister { target: roles.scratch2 });
    masm.finish()
}
