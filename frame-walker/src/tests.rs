use another_jit_vm::{Arch, ArchDescription, Gpr, WORD_SIZE};
use another_jit_vm::stack::{StackBounds, WordMemory};
use another_jit_vm::thread_context::{JavaCallWrapper, JavaThreadContext, LastJavaFrameAnchor};
use another_jit_vm_ir::simulator::SimMemory;
use gc_memory_layout_common::code_blob::{CodeBlob, CodeBlobKind};
use gc_memory_layout_common::code_cache::CodeCache;
use gc_memory_layout_common::frame_layout::InterpreterFrameSlot;
use gc_memory_layout_common::oop_map::{OopMap, VMReg};

use crate::{deoptimize_frame, FrameError, FrameKind, FrameWalker, RegisterMap, RegisterSnapshot, sample_stack, StackSample};

const STACK: StackBounds = StackBounds { base: 0x10_0000, size: 0x1_0000, guard_size: 0x1000 };
const WRAPPER: u64 = 0x60_0000;

const INTERPRETER: u64 = 0x1000_0000;
const CALL_STUB: u64 = 0x2000_0000;
const COMPILED: u64 = 0x3000_0000;
const STUB: u64 = 0x4000_0000;
const BUFFER: u64 = 0x5000_0000;
const HUGE_FRAME: u64 = 0x6000_0000;

const CALL_STUB_RETURN: u64 = CALL_STUB + 0x40;
const INTERPRETER_RETURN: u64 = INTERPRETER + 0x100;
const COMPILED_RETURN: u64 = COMPILED + 0x40;
const DEOPT_HANDLER_OFFSET: u32 = 0x800;
const STUB_PC: u64 = STUB + 0x30;
const CALLEE_SAVED: Gpr = Gpr(3);

fn code_cache() -> CodeCache {
    let mut cache = CodeCache::new();
    cache.set_interpreter_range(INTERPRETER..INTERPRETER + 0x1_0000).unwrap();

    let mut call_stub = CodeBlob::new("call_stub", CodeBlobKind::CallStub, CALL_STUB, 0x100);
    call_stub.frame_size_words = Some(16);
    call_stub.frame_complete_offset = Some(0x10);
    cache.register(call_stub).unwrap();

    let mut compiled = CodeBlob::new("compiled", CodeBlobKind::Compiled, COMPILED, 0x1000);
    compiled.frame_size_words = Some(4);
    compiled.deopt_handler_offset = Some(DEOPT_HANDLER_OFFSET);
    compiled.orig_pc_offset = Some(WORD_SIZE as i32);
    let mut map = OopMap::new(4, 0);
    map.set_callee_saved(VMReg::Stack(0), VMReg::Register(CALLEE_SAVED)).unwrap();
    compiled.oop_maps.add_gc_map(0x40, map).unwrap();
    cache.register(compiled).unwrap();

    let mut stub = CodeBlob::new("runtime_stub", CodeBlobKind::RuntimeStub, STUB, 0x100);
    stub.frame_size_words = Some(4);
    stub.frame_complete_offset = Some(0x20);
    stub.caller_must_gc_arguments = true;
    cache.register(stub).unwrap();

    cache.register(CodeBlob::new("buffer", CodeBlobKind::BufferBlob, BUFFER, 0x100)).unwrap();
    cache
}

/// Addresses of the synthetic stack: entry frame at the top, then an interpreted frame,
/// a compiled frame and a runtime stub frame.
struct SyntheticStack {
    memory: SimMemory,
    entry: (u64, u64),
    interpreted: (u64, u64),
    compiled: (u64, u64),
    stub: (u64, u64),
}

fn fp_for_sender_sp(arch: &ArchDescription, sender_sp: u64) -> u64 {
    sender_sp - (arch.frame.sender_sp_offset as i64 * WORD_SIZE as i64) as u64
}

fn link_frame(memory: &mut SimMemory, sender_sp: u64, return_pc: u64, link: u64) {
    memory.write_word(sender_sp - 8, return_pc).unwrap();
    memory.write_word(sender_sp - 16, link).unwrap();
}

fn synthetic_stack(arch: Arch) -> SyntheticStack {
    let description = arch.description();
    let mut memory = SimMemory::new();
    memory.map_stack(STACK);
    memory.map(WRAPPER..WRAPPER + 0x100);
    JavaCallWrapper::default().store(&mut memory, WRAPPER).unwrap();

    let entry_sp = STACK.base - 0x200;
    let entry_fp = entry_sp + 0x80;
    let wrapper_slot = entry_fp.wrapping_add((description.frame.entry_frame_call_wrapper_offset as i64 * 8) as u64);
    memory.write_word(wrapper_slot, WRAPPER).unwrap();

    let interpreted_fp = fp_for_sender_sp(description, entry_sp);
    link_frame(&mut memory, entry_sp, CALL_STUB_RETURN, entry_fp);
    memory.write_word(InterpreterFrameSlot::SenderSp.address(description, interpreted_fp), entry_sp).unwrap();
    let interpreted_sp = entry_sp - 0x100;

    link_frame(&mut memory, interpreted_sp, INTERPRETER_RETURN, interpreted_fp);
    let compiled_sp = interpreted_sp - 32;
    let compiled_fp = fp_for_sender_sp(description, interpreted_sp);

    link_frame(&mut memory, compiled_sp, COMPILED_RETURN, compiled_fp);
    let stub_sp = compiled_sp - 32;
    let stub_fp = fp_for_sender_sp(description, compiled_sp);

    SyntheticStack {
        memory,
        entry: (entry_sp, entry_fp),
        interpreted: (interpreted_sp, interpreted_fp),
        compiled: (compiled_sp, compiled_fp),
        stub: (stub_sp, stub_fp),
    }
}

#[test]
fn walks_stub_compiled_interpreted_and_entry_frames() {
    let cache = code_cache();
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let stack = synthetic_stack(arch);
        let walker = FrameWalker::new(arch, &cache, &stack.memory, STACK);
        let top = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
        assert_eq!(top.kind(), FrameKind::Stub);
        let frames = walker.walk(top, &mut RegisterMap::new(false), 16).unwrap();
        let kinds = frames.iter().map(|frame| frame.kind()).collect::<Vec<_>>();
        assert_eq!(kinds, vec![FrameKind::Stub, FrameKind::Compiled, FrameKind::Interpreted, FrameKind::Entry], "{}", arch);
        assert_eq!((frames[1].sp(), frames[1].fp(), frames[1].pc()), (stack.compiled.0, stack.compiled.1, COMPILED_RETURN));
        assert_eq!((frames[2].sp(), frames[2].fp(), frames[2].pc()), (stack.interpreted.0, stack.interpreted.1, INTERPRETER_RETURN));
        assert_eq!((frames[3].sp(), frames[3].fp(), frames[3].pc()), (stack.entry.0, stack.entry.1, CALL_STUB_RETURN));
        assert_eq!(frames[3].unextended_sp(), stack.entry.0);
    }
}

#[test]
fn walk_stops_at_depth() {
    let cache = code_cache();
    let stack = synthetic_stack(Arch::X86_64);
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let top = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
    assert_eq!(walker.walk(top, &mut RegisterMap::new(false), 2).unwrap().len(), 2);
}

#[test]
fn entry_frame_continues_at_the_wrapper_anchor() {
    let cache = code_cache();
    let mut stack = synthetic_stack(Arch::X86_64);
    let outer_sp = STACK.base - 0x40;
    let outer_fp = outer_sp + 0x20;
    let wrapper = JavaCallWrapper {
        anchor: LastJavaFrameAnchor { last_java_sp: outer_sp, last_java_fp: outer_fp, last_java_pc: INTERPRETER + 0x200 },
        thread: 0,
    };
    wrapper.store(&mut stack.memory, WRAPPER).unwrap();
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let entry = walker.frame_at(stack.entry.0, stack.entry.1, CALL_STUB_RETURN).unwrap();
    let mut map = RegisterMap::new(true);
    map.set_location(VMReg::Register(CALLEE_SAVED), 0x1234);
    let sender = walker.sender(&entry, &mut map).unwrap();
    assert_eq!(sender.kind(), FrameKind::Interpreted);
    assert_eq!((sender.sp(), sender.fp(), sender.pc()), (outer_sp, outer_fp, INTERPRETER + 0x200));
    assert!(map.is_empty());
}

#[test]
fn first_entry_frame_has_no_sender() {
    let cache = code_cache();
    let stack = synthetic_stack(Arch::Riscv64);
    let walker = FrameWalker::new(Arch::Riscv64, &cache, &stack.memory, STACK);
    let entry = walker.frame_at(stack.entry.0, stack.entry.1, CALL_STUB_RETURN).unwrap();
    assert_eq!(walker.sender(&entry, &mut RegisterMap::new(false)).unwrap_err(), FrameError::FirstFrame);
}

#[test]
fn register_map_tracks_callee_saved_registers_and_argument_oops() {
    let cache = code_cache();
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let stack = synthetic_stack(arch);
        let walker = FrameWalker::new(arch, &cache, &stack.memory, STACK);
        let mut map = RegisterMap::new(true);
        let stub = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
        let compiled = walker.sender(&stub, &mut map).unwrap();
        assert!(map.include_argument_oops());
        assert_eq!(map.location(VMReg::Register(arch.description().roles.fp)), Some(stack.stub.0 + 16));

        walker.sender(&compiled, &mut map).unwrap();
        assert!(!map.include_argument_oops());
        assert_eq!(map.location(VMReg::Register(CALLEE_SAVED)), Some(stack.compiled.0));
        assert_eq!(map.location(VMReg::Register(arch.description().roles.fp)), Some(stack.compiled.0 + 16));
    }
}

#[test]
fn unsafe_frames_are_rejected() {
    let cache = code_cache();
    let stack = synthetic_stack(Arch::X86_64);
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let (sp, fp) = stack.stub;
    assert!(walker.is_frame_safe(&walker.frame_at(sp, fp, STUB_PC).unwrap()));

    // one past the top of the stack
    let past_top = walker.frame_at(STACK.base + 1, STACK.base + 0x10, STUB_PC).unwrap();
    assert!(!walker.is_frame_safe(&past_top));
    // the top itself is where an empty stack's sp sits
    let at_top = walker.frame_at(STACK.base - 0x10, STACK.base, STUB_PC).unwrap();
    assert!(walker.is_frame_safe(&at_top));

    assert!(!walker.is_frame_safe(&walker.frame_at(sp, sp, STUB_PC).unwrap()));
    assert!(!walker.is_frame_safe(&walker.frame_at(sp, sp - 8, STUB_PC).unwrap()));

    let in_guard = STACK.usable_end() - 0x100;
    assert!(!walker.is_frame_safe(&walker.frame_at(in_guard, in_guard + 0x20, STUB_PC).unwrap()));

    // inside the prologue
    assert!(!walker.is_frame_safe(&walker.frame_at(sp, fp, STUB + 0x10).unwrap()));
    assert!(walker.is_frame_safe(&walker.frame_at(sp, fp, STUB + 0x20).unwrap()));

    assert_eq!(walker.frame_at(sp, fp, 0x9999_0000).unwrap_err(), FrameError::UnknownPc(0x9999_0000));
    assert_eq!(walker.frame_at(sp, fp, BUFFER + 4).unwrap_err(), FrameError::Frameless(BUFFER + 4));
}

#[test]
fn walk_fails_on_an_unsafe_sender() {
    let cache = code_cache();
    let mut stack = synthetic_stack(Arch::X86_64);
    // the compiled frame's saved fp now points below its sp
    stack.memory.write_word(stack.compiled.0 - 16, stack.compiled.0 - 0x100).unwrap();
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let top = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
    assert!(matches!(walker.walk(top, &mut RegisterMap::new(false), 16), Err(FrameError::Unsafe { .. })));
}

#[test]
fn corrupt_anchors_and_frame_sizes_are_errors() {
    let mut cache = code_cache();
    let mut huge = CodeBlob::new("huge_frame", CodeBlobKind::RuntimeStub, HUGE_FRAME, 0x100);
    huge.frame_size_words = Some(usize::MAX / 2);
    cache.register(huge).unwrap();
    let stack = synthetic_stack(Arch::X86_64);
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let mut map = RegisterMap::new(true);
    let (sp, fp) = stack.stub;

    let huge_frame = walker.frame_at(sp, fp, HUGE_FRAME).unwrap();
    assert_eq!(walker.sender(&huge_frame, &mut map).unwrap_err(), FrameError::Unsafe { sp, pc: HUGE_FRAME });
    let at_address_space_top = walker.frame_at(u64::MAX - 8, fp, STUB_PC).unwrap();
    assert_eq!(walker.sender(&at_address_space_top, &mut map).unwrap_err(), FrameError::Unsafe { sp: u64::MAX - 8, pc: STUB_PC });

    let no_frame = LastJavaFrameAnchor { last_java_sp: 0, last_java_fp: fp, last_java_pc: 0 };
    assert_eq!(walker.frame_from_anchor(&no_frame).unwrap_err(), FrameError::FirstFrame);
    let below_one_word = LastJavaFrameAnchor { last_java_sp: 4, last_java_fp: fp, last_java_pc: 0 };
    assert_eq!(walker.frame_from_anchor(&below_one_word).unwrap_err(), FrameError::Unsafe { sp: 4, pc: 0 });

    let snapshot = RegisterSnapshot { sp: u64::MAX - 8, fp, pc: STUB_PC };
    assert!(matches!(sample_stack(&walker, snapshot, &JavaThreadContext::new(STACK), 16), StackSample::NotWalkable));
}

#[test]
fn deoptimized_frames_report_their_original_pc() {
    let cache = code_cache();
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let mut stack = synthetic_stack(arch);
        let compiled = {
            let walker = FrameWalker::new(arch, &cache, &stack.memory, STACK);
            let stub = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
            walker.sender(&stub, &mut RegisterMap::new(false)).unwrap()
        };
        deoptimize_frame(&compiled, &mut stack.memory).unwrap();
        assert_eq!(stack.memory.read_word(stack.compiled.0 - 8).unwrap(), COMPILED + DEOPT_HANDLER_OFFSET as u64);
        assert_eq!(stack.memory.read_word(stack.compiled.0 + 8).unwrap(), COMPILED_RETURN);

        let walker = FrameWalker::new(arch, &cache, &stack.memory, STACK);
        let stub = walker.frame_at(stack.stub.0, stack.stub.1, STUB_PC).unwrap();
        let mut map = RegisterMap::new(true);
        let deoptimized = walker.sender(&stub, &mut map).unwrap();
        assert_eq!(deoptimized.kind(), FrameKind::Deoptimized);
        assert_eq!(deoptimized.original_pc(), Some(COMPILED_RETURN));
        assert_eq!(deoptimized.real_pc(), COMPILED_RETURN);
        assert!(deoptimized.is_compiled_frame());
        // oop maps are found through the original pc
        let interpreted = walker.sender(&deoptimized, &mut map).unwrap();
        assert_eq!(interpreted.kind(), FrameKind::Interpreted);
        assert_eq!(map.location(VMReg::Register(CALLEE_SAVED)), Some(stack.compiled.0));

        assert_eq!(deoptimize_frame(&deoptimized, &mut stack.memory.clone()).unwrap_err(), FrameError::NotDeoptimizable("not a compiled frame"));
    }
}

#[test]
fn samples_are_taken_in_java_in_the_vm_or_not_at_all() {
    let cache = code_cache();
    let stack = synthetic_stack(Arch::X86_64);
    let walker = FrameWalker::new(Arch::X86_64, &cache, &stack.memory, STACK);
    let mut thread = JavaThreadContext::new(STACK);

    let in_stub = RegisterSnapshot { sp: stack.stub.0, fp: stack.stub.1, pc: STUB_PC };
    match sample_stack(&walker, in_stub, &thread, 16) {
        StackSample::InJava { frames } => assert_eq!(frames.len(), 4),
        other => panic!("{:?}", other),
    }

    let mid_prologue = RegisterSnapshot { pc: STUB + 4, ..in_stub };
    assert!(matches!(sample_stack(&walker, mid_prologue, &thread, 16), StackSample::NotWalkable));

    let in_native = RegisterSnapshot { sp: 0, fp: 0, pc: 0x9999_0000 };
    assert!(matches!(sample_stack(&walker, in_native, &thread, 16), StackSample::NotWalkable));

    // no pc in the anchor: the return address below the anchor's sp is used
    thread.anchor = LastJavaFrameAnchor { last_java_sp: stack.compiled.0, last_java_fp: stack.compiled.1, last_java_pc: 0 };
    let sample = sample_stack(&walker, in_native, &thread, 16);
    assert!(matches!(sample, StackSample::InVm { .. }));
    let kinds = sample.frames().iter().map(|frame| frame.kind()).collect::<Vec<_>>();
    assert_eq!(kinds, vec![FrameKind::Compiled, FrameKind::Interpreted, FrameKind::Entry]);
    assert_eq!(sample.frames()[0].pc(), COMPILED_RETURN);
}
