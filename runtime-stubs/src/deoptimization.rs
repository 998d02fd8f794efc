use another_jit_vm::WORD_SIZE;
use another_jit_vm::saved_registers_utils::RegisterSaveLayout;
use another_jit_vm::thread_context::{EXCEPTION_OOP_OFFSET, EXCEPTION_PC_OFFSET, JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET, LAST_JAVA_FP_OFFSET, NO_PENDING_DEOPTIMIZATION, PENDING_DEOPTIMIZATION_OFFSET};
use another_jit_vm_ir::{Address, IRInstr, POISON, RuntimeEntry, StubAssembler, StubCode, StubGenConfig, StubGenError};
use gc_memory_layout_common::oop_map::OopMap;
use stub_ids::{EntryId, StubId};

use crate::saved_slot;
use crate::unroll_block::{CALLER_ADJUSTMENT_OFFSET, FRAME_PCS_OFFSET, FRAME_SIZES_OFFSET, INITIAL_FP_OFFSET, NUMBER_OF_FRAMES_OFFSET, SIZE_OF_DEOPTIMIZED_FRAME_OFFSET, TOTAL_FRAME_SIZES_OFFSET, UNPACK_KIND_OFFSET, UnpackKind};

const WORD: i32 = WORD_SIZE as i32;

fn set_unpack_kind(masm: &mut StubAssembler, kind: UnpackKind) {
    let to = masm.roles().unpack_kind;
    masm.emit(IRInstr::Const64bit { to, const_: kind as i32 as u64 });
}

/// Replace the deoptimized frame by the interpreter frames of the unroll block.
///
/// Expects the unroll block in its deopt temp and sp at the deoptimized frame's sp. Leaves a
/// bridge frame of `frame_size_words` on top of the new frames, with the last frame pc as its
/// return address. Nothing between popping the deoptimized frame and the end of the loop may
/// fault, so the stack is banged for the whole plan first.
fn push_interpreter_frames(masm: &mut StubAssembler, frame_size_words: usize) {
    let config = *masm.config();
    let roles = *masm.roles();
    let interpreter = masm.arch().interpreter;
    let temps = roles.deopt_temps;

    masm.load(temps.frame_size, temps.unroll_block, SIZE_OF_DEOPTIMIZED_FRAME_OFFSET);
    masm.emit(IRInstr::Add { res: roles.sp, a: temps.frame_size });
    masm.load(roles.fp, temps.unroll_block, INITIAL_FP_OFFSET);

    if config.bang_stack_in_unroll {
        masm.load(temps.frame_size, temps.unroll_block, TOTAL_FRAME_SIZES_OFFSET);
        masm.emit(IRInstr::BangStack {
            bytes: temps.frame_size,
            scratch: roles.scratch1,
            shadow_pages: config.stack_shadow_pages,
            page_size: config.page_size,
        });
    }

    masm.mov(temps.sender_sp, roles.sp);
    masm.load(temps.frame_size, temps.unroll_block, CALLER_ADJUSTMENT_OFFSET);
    masm.emit(IRInstr::Sub { res: roles.sp, to_subtract: temps.frame_size });

    masm.load(temps.frame_sizes, temps.unroll_block, FRAME_SIZES_OFFSET);
    masm.load(temps.frame_pcs, temps.unroll_block, FRAME_PCS_OFFSET);
    masm.load(temps.counter, temps.unroll_block, NUMBER_OF_FRAMES_OFFSET);

    if config.poison_unroll_registers {
        masm.emit(IRInstr::Const64bit { to: roles.scratch1, const_: POISON });
        masm.emit(IRInstr::Const64bit { to: roles.scratch2, const_: POISON });
    }
    if config.debug_checks {
        let has_frames = masm.new_label();
        masm.emit(IRInstr::BranchNotZero { a: temps.counter, label: has_frames });
        masm.stop("unroll block without frames");
        masm.bind(has_frames);
    }

    let push_frame = masm.bind_new_label();
    masm.load(temps.frame_size, temps.frame_sizes, 0);
    masm.load(roles.scratch1, temps.frame_pcs, 0);
    masm.emit(IRInstr::PushReturnAddress { from: roles.scratch1 });
    masm.emit(IRInstr::EnterFrame);
    masm.emit(IRInstr::AddConst { res: temps.frame_size, const_: -2 * WORD });
    masm.emit(IRInstr::Sub { res: roles.sp, to_subtract: temps.frame_size });
    masm.store_const(0, roles.fp, interpreter.last_sp * WORD);
    masm.store(temps.sender_sp, roles.fp, interpreter.sender_sp * WORD);
    masm.mov(temps.sender_sp, roles.sp);
    masm.emit(IRInstr::AddConst { res: temps.frame_sizes, const_: WORD });
    masm.emit(IRInstr::AddConst { res: temps.frame_pcs, const_: WORD });
    masm.emit(IRInstr::AddConst { res: temps.counter, const_: -1 });
    masm.emit(IRInstr::BranchNotZero { a: temps.counter, label: push_frame });

    masm.load(roles.scratch1, temps.frame_pcs, 0);
    masm.emit(IRInstr::PushReturnAddress { from: roles.scratch1 });
    masm.emit(IRInstr::EnterFrame);
    if frame_size_words > 2 {
        masm.add_sp(-(((frame_size_words - 2) * WORD_SIZE) as i32));
    }
}

/// Call unpack_frames from the bridge frame and return into the top interpreter frame.
/// With a save layout the result registers are kept in their save area slots across the call.
fn unpack_frames_and_return(masm: &mut StubAssembler, layout: Option<&RegisterSaveLayout>, frame_size_words: usize) -> Result<(), StubGenError> {
    let roles = *masm.roles();
    let result_slots = match layout {
        Some(layout) => Some((saved_slot(layout, roles.result)?, layout.fpr_byte_offset(roles.fp_result))),
        None => None,
    };
    if let Some((result_slot, fp_result_slot)) = result_slots {
        masm.store(roles.result, roles.sp, result_slot);
        if let Some(fp_result_slot) = fp_result_slot {
            masm.emit(IRInstr::StoreFloat { from: roles.fp_result, to: Address::new(roles.sp, fp_result_slot) });
        }
    }
    let call = masm.call_rt_leaf_with_anchor(RuntimeEntry::UnpackFrames, &[roles.unpack_kind]);
    masm.add_oop_map(call, OopMap::new(frame_size_words, 0));
    if let Some((result_slot, fp_result_slot)) = result_slots {
        if let Some(fp_result_slot) = fp_result_slot {
            masm.emit(IRInstr::LoadFloat { to: roles.fp_result, from: Address::new(roles.sp, fp_result_slot) });
        }
        masm.load(roles.result, roles.sp, result_slot);
    }
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    Ok(())
}

/// The deoptimization blob. Every entry is reached with the return address into the
/// deoptimized frame on the stack, saves all registers and records its unpack kind, then
/// fetches the unroll block and rebuilds the frame as interpreter frames.
///
/// The exception entries deliver the exception in the result register of the top frame. The
/// uncommon trap entries exist only for compilers that trap through the blob and take the trap
/// request from the thread instead of a register.
pub fn generate_deopt_blob(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::Deoptimization.name(), Some(StubId::Deoptimization));
    let roles = *masm.roles();
    let temps = roles.deopt_temps;
    let layout = masm.arch().save_layout(true);
    let frame_size_words = layout.save_area_size();
    let return_address = masm.return_address_offset();
    let cont = masm.new_label();
    let fetched = masm.new_label();

    masm.entry(EntryId::DeoptUnpack);
    let oop_map = masm.save_live_registers(&layout, 0);
    set_unpack_kind(&mut masm, UnpackKind::Deopt);
    masm.emit(IRInstr::BranchToLabel { label: cont });

    masm.entry(EntryId::DeoptUnpackWithReexecution);
    masm.save_live_registers(&layout, 0);
    set_unpack_kind(&mut masm, UnpackKind::Reexecute);
    masm.emit(IRInstr::BranchToLabel { label: cont });

    if config.jvmci_uncommon_trap_entries {
        masm.entry(EntryId::DeoptImplicitExceptionUncommonTrap);
        masm.load(roles.scratch1, roles.thread, JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET);
        masm.emit(IRInstr::PushReturnAddress { from: roles.scratch1 });
        masm.store_const(0, roles.thread, JVMCI_IMPLICIT_EXCEPTION_PC_OFFSET);

        masm.entry(EntryId::DeoptUncommonTrap);
        masm.save_live_registers(&layout, 0);
        set_unpack_kind(&mut masm, UnpackKind::Reexecute);
        masm.load(roles.scratch2, roles.thread, PENDING_DEOPTIMIZATION_OFFSET);
        masm.store_const(NO_PENDING_DEOPTIMIZATION as i32, roles.thread, PENDING_DEOPTIMIZATION_OFFSET);
        let call = masm.call_rt_leaf_with_anchor(RuntimeEntry::UncommonTrap, &[roles.scratch2, roles.unpack_kind]);
        masm.add_oop_map(call, oop_map.clone());
        masm.emit(IRInstr::BranchToLabel { label: fetched });
    }

    masm.entry(EntryId::DeoptUnpackWithException);
    masm.store(roles.exception_oop, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.store(roles.exception_pc, roles.thread, EXCEPTION_PC_OFFSET);

    masm.entry(EntryId::DeoptUnpackWithExceptionInTls);
    // the throwing pc becomes the return address once the registers are saved
    masm.emit(IRInstr::Const64bit { to: roles.scratch1, const_: 0 });
    masm.emit(IRInstr::PushReturnAddress { from: roles.scratch1 });
    masm.save_live_registers(&layout, 0);
    set_unpack_kind(&mut masm, UnpackKind::Exception);
    masm.load(roles.scratch1, roles.thread, EXCEPTION_PC_OFFSET);
    masm.store(roles.scratch1, roles.fp, return_address);
    masm.store_const(0, roles.thread, EXCEPTION_PC_OFFSET);

    masm.bind(cont);
    if config.debug_checks {
        let cleared = masm.new_label();
        masm.load(roles.scratch1, roles.thread, LAST_JAVA_FP_OFFSET);
        masm.emit(IRInstr::BranchZero { a: roles.scratch1, label: cleared });
        masm.stop("last_java_fp not cleared before deoptimization");
        masm.bind(cleared);
    }
    let call = masm.call_rt_leaf_with_anchor(RuntimeEntry::FetchUnrollInfo, &[roles.unpack_kind]);
    masm.add_oop_map(call, oop_map);

    masm.bind(fetched);
    masm.mov(temps.unroll_block, roles.result);
    // the runtime may have found a pending exception and changed the kind
    masm.load(roles.unpack_kind, temps.unroll_block, UNPACK_KIND_OFFSET);

    let no_exception = masm.new_label();
    masm.emit(IRInstr::BranchNotEqualConst { a: roles.unpack_kind, const_: UnpackKind::Exception as i32, label: no_exception });
    masm.load(roles.scratch1, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.store(roles.scratch1, roles.sp, saved_slot(&layout, roles.result)?);
    masm.load(roles.scratch1, roles.thread, EXCEPTION_PC_OFFSET);
    masm.store(roles.scratch1, roles.sp, saved_slot(&layout, roles.exception_pc)?);
    masm.store_const(0, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.store_const(0, roles.thread, EXCEPTION_PC_OFFSET);
    masm.bind(no_exception);

    masm.restore_result_registers(&layout);
    push_interpreter_frames(&mut masm, frame_size_words);
    unpack_frames_and_return(&mut masm, Some(&layout), frame_size_words)?;
    masm.finish()
}

/// The tier-2 uncommon trap blob. Compiled code calls it with the trap request in the first
/// java argument register. The blob has no register save area: nothing the compiled frame
/// holds in registers survives an uncommon trap.
pub fn generate_uncommon_trap_blob(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::C2UncommonTrap.name(), Some(StubId::C2UncommonTrap));
    let roles = *masm.roles();
    let temps = roles.deopt_temps;
    let frame_size_words = 2;

    masm.entry(EntryId::C2UncommonTrap);
    masm.emit(IRInstr::EnterFrame);
    masm.set_frame_size(frame_size_words);
    masm.set_frame_complete();
    set_unpack_kind(&mut masm, UnpackKind::UncommonTrap);
    let call = masm.call_rt_leaf_with_anchor(RuntimeEntry::UncommonTrap, &[roles.java_args[0], roles.unpack_kind]);
    masm.add_oop_map(call, OopMap::new(frame_size_words, 0));
    masm.mov(temps.unroll_block, roles.result);

    if config.debug_checks {
        let expected = masm.new_label();
        masm.load(roles.scratch1, temps.unroll_block, UNPACK_KIND_OFFSET);
        masm.emit(IRInstr::BranchEqualConst { a: roles.scratch1, const_: UnpackKind::UncommonTrap as i32, label: expected });
        masm.stop("uncommon trap returned an unroll block of another kind");
        masm.bind(expected);
    }

    // pop the self frame without restoring fp, the unroll block has the fp to use
    masm.add_sp((frame_size_words * WORD_SIZE) as i32);
    push_interpreter_frames(&mut masm, frame_size_words);
    unpack_frames_and_return(&mut masm, None, frame_size_words)?;
    masm.finish()
}
