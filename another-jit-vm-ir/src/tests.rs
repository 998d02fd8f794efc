use std::collections::HashMap;
use std::sync::Arc;

use another_jit_vm::{Arch, Fpr, Gpr, WORD_SIZE};
use another_jit_vm::stack::StackBounds;
use another_jit_vm::thread_context::{JavaThreadContext, PENDING_EXCEPTION_OFFSET, VM_RESULT_OFFSET};
use stub_ids::{EntryId, StubId};

use crate::{IRInstr, LabelName, POISON, RuntimeAddresses, RuntimeEntry, StubAssembler, StubCode, StubGenConfig, StubGenError};
use crate::ir_to_native::{lower, lower_x86};
use crate::simulator::{Machine, RuntimeHooks, SimError, SimMemory, Simulator};

const STACK: StackBounds = StackBounds { base: 0x10_0000, size: 0x1_0000, guard_size: 0x1000 };
const THREAD: u64 = 0x20_0000;
const CODE: u64 = 0x40_0000;
const OTHER_CODE: u64 = 0x50_0000;
const CALLER_PC: u64 = 0x7000_0000;
const CALLER_FP: u64 = 0xf00d_0000;
const INITIAL_SP: u64 = STACK.base - 0x100;

fn machine(arch: Arch) -> Machine {
    let mut memory = SimMemory::new();
    memory.map_stack(STACK);
    memory.map(THREAD..THREAD + 0x1000);
    JavaThreadContext::new(STACK).store(&mut memory, THREAD).unwrap();
    let mut machine = Machine::new(arch, memory);
    let description = arch.description();
    for (i, gpr) in description.saved_gprs.iter().enumerate() {
        machine.set_gpr(*gpr, 0x1000 + i as u64);
    }
    for (i, fpr) in description.saved_fprs.iter().enumerate() {
        machine.set_fpr(*fpr, 0x2000 + i as u64);
    }
    machine.set_gpr(description.roles.thread, THREAD);
    machine.set_sp(INITIAL_SP);
    machine.set_fp(CALLER_FP);
    machine
}

fn saved_values(machine: &Machine) -> (Vec<(Gpr, u64)>, Vec<(Fpr, u64)>) {
    let gprs = machine.arch.saved_gprs.iter().map(|gpr| (*gpr, machine.gpr(*gpr))).collect();
    let fprs = machine.arch.saved_fprs.iter().map(|fpr| (*fpr, machine.fpr(*fpr))).collect();
    (gprs, fprs)
}

struct Recorder {
    calls: Vec<RuntimeEntry>,
    on_call: Box<dyn FnMut(RuntimeEntry, &mut Machine) -> Option<u64>>,
}

impl Recorder {
    fn new(on_call: impl FnMut(RuntimeEntry, &mut Machine) -> Option<u64> + 'static) -> Self {
        Self { calls: vec![], on_call: Box::new(on_call) }
    }
}

impl RuntimeHooks for Recorder {
    fn call(&mut self, entry: RuntimeEntry, machine: &mut Machine) -> Result<Option<u64>, SimError> {
        self.calls.push(entry);
        Ok((self.on_call)(entry, machine))
    }
}

fn save_and_restore(config: StubGenConfig, save_fpu: bool) -> StubCode {
    let layout = config.arch_description().save_layout(save_fpu);
    let mut masm = StubAssembler::new(config, "save_and_restore", None);
    masm.bind_new_label();
    let _map = masm.save_live_registers(&layout, 0);
    masm.call_rt_leaf(RuntimeEntry::ExceptionHandlerForPc, &[]);
    masm.restore_live_registers(&layout);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    masm.finish().unwrap()
}

#[test]
fn save_area_round_trips_every_register() {
    for arch in [Arch::X86_64, Arch::Riscv64] {
        for save_fpu in [true, false] {
            let config = StubGenConfig::for_arch(arch);
            let layout = config.arch_description().save_layout(save_fpu);
            let mut simulator = Simulator::new();
            simulator.install(CODE, Arc::new(save_and_restore(config, save_fpu)));
            simulator.add_exit(CALLER_PC);
            let mut machine = machine(arch);
            let (gprs_before, fprs_before) = saved_values(&machine);
            machine.prepare_call(CODE, CALLER_PC).unwrap();

            let expected_gprs = gprs_before.clone();
            let save_layout = layout.clone();
            let mut hooks = Recorder::new(move |_, machine| {
                let area_sp = machine.fp() - (save_layout.fp_offset() * WORD_SIZE) as u64;
                let values = save_layout.read_area(&machine.memory, area_sp).unwrap();
                for (gpr, value) in &expected_gprs {
                    assert_eq!(values.gpr(*gpr), Some(*value), "{:?}", gpr);
                }
                assert_eq!(values.return_address(), Some(CALLER_PC));
                None
            });
            let exit = simulator.run(&mut machine, &mut hooks).unwrap();
            assert_eq!(exit, CALLER_PC);
            assert_eq!(hooks.calls, vec![RuntimeEntry::ExceptionHandlerForPc]);
            assert_eq!(machine.sp(), INITIAL_SP);
            assert_eq!(machine.fp(), CALLER_FP);
            assert_eq!(machine.thread(), THREAD);
            let (gprs_after, fprs_after) = saved_values(&machine);
            assert_eq!(gprs_after, gprs_before, "{} fpu={}", arch, save_fpu);
            if save_fpu {
                assert_eq!(fprs_after, fprs_before);
            }
        }
    }
}

#[test]
fn frame_entry_and_exit_are_symmetric() {
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let config = StubGenConfig::for_arch(arch);
        let frame = config.arch_description().frame;
        let mut masm = StubAssembler::new(config, "frame", None);
        masm.bind_new_label();
        masm.emit(IRInstr::EnterFrame);
        let fp = masm.roles().fp;
        let scratch = masm.roles().scratch1;
        masm.load(scratch, fp, frame.return_addr_offset * WORD_SIZE as i32);
        masm.store(scratch, masm.roles().thread, VM_RESULT_OFFSET);
        masm.load(scratch, fp, frame.link_offset * WORD_SIZE as i32);
        masm.store(scratch, masm.roles().thread, PENDING_EXCEPTION_OFFSET);
        masm.emit(IRInstr::LeaveFrame);
        masm.emit(IRInstr::Return);
        let mut simulator = Simulator::new();
        simulator.install(CODE, Arc::new(masm.finish().unwrap()));
        simulator.add_exit(CALLER_PC);
        let mut machine = machine(arch);
        machine.prepare_call(CODE, CALLER_PC).unwrap();
        simulator.run(&mut machine, &mut Recorder::new(|_, _| None)).unwrap();
        assert_eq!(machine.sp(), INITIAL_SP);
        assert_eq!(machine.fp(), CALLER_FP);
        let thread = JavaThreadContext::load(&machine.memory, THREAD).unwrap();
        assert_eq!(thread.vm_result, CALLER_PC);
        assert_eq!(thread.pending_exception, CALLER_FP);
    }
}

fn forward_exception_target(config: StubGenConfig) -> StubCode {
    let mut masm = StubAssembler::new(config, "forward_exception", Some(StubId::C1ForwardException));
    masm.entry(EntryId::C1ForwardException);
    masm.stop("not reached");
    masm.finish().unwrap()
}

fn new_instance_like(config: StubGenConfig) -> (StubCode, LabelName) {
    let layout = config.arch_description().save_layout(true);
    let mut masm = StubAssembler::new(config, "new_instance_like", None);
    masm.bind_new_label();
    let map = masm.save_live_registers(&layout, 0);
    let roles = *masm.roles();
    let return_label = masm.call_rt(RuntimeEntry::NewInstance, &[roles.scratch2], Some(roles.result), None);
    masm.add_oop_map(return_label, map);
    masm.restore_live_registers_except(&layout, roles.result);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    (masm.finish().unwrap(), return_label)
}

#[test]
fn runtime_call_moves_vm_result_and_records_the_anchor() {
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let config = StubGenConfig::for_arch(arch);
        let (code, return_label) = new_instance_like(config);
        let mut simulator = Simulator::new();
        simulator.install(CODE, Arc::new(code));
        simulator.install(OTHER_CODE, Arc::new(forward_exception_target(config)));
        simulator.add_exit(CALLER_PC);
        let return_pc = simulator.label_address(CODE, return_label).unwrap();
        let layout = config.arch_description().save_layout(true);
        let mut machine = machine(arch);
        let klass = machine.gpr(machine.arch.roles.scratch2);
        machine.prepare_call(CODE, CALLER_PC).unwrap();

        let mut hooks = Recorder::new(move |_, machine| {
            assert_eq!(machine.c_arg(0), THREAD);
            assert_eq!(machine.c_arg(1), klass);
            let thread = JavaThreadContext::load(&machine.memory, THREAD).unwrap();
            assert_eq!(thread.anchor.last_java_pc, return_pc);
            assert_eq!(thread.anchor.last_java_fp, machine.fp());
            assert_eq!(thread.anchor.last_java_sp, machine.fp() - (layout.fp_offset() * WORD_SIZE) as u64);
            machine.write(THREAD + VM_RESULT_OFFSET as u64, 0x1234).unwrap();
            None
        });
        simulator.run(&mut machine, &mut hooks).unwrap();
        assert_eq!(machine.gpr(machine.arch.roles.result), 0x1234);
        let thread = JavaThreadContext::load(&machine.memory, THREAD).unwrap();
        assert_eq!(thread.vm_result, 0);
        assert!(!thread.anchor.has_last_java_frame());
        assert_eq!(thread.anchor.last_java_pc, 0);
    }
}

#[test]
fn pending_exception_goes_to_forward_exception() {
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let config = StubGenConfig::for_arch(arch);
        let (code, _) = new_instance_like(config);
        let mut simulator = Simulator::new();
        simulator.install(CODE, Arc::new(code));
        let forward = simulator.install(OTHER_CODE, Arc::new(forward_exception_target(config)));
        let forward_pc = forward[0].1;
        simulator.add_exit(forward_pc);
        let mut machine = machine(arch);
        machine.prepare_call(CODE, CALLER_PC).unwrap();
        let mut hooks = Recorder::new(|_, machine| {
            machine.write(THREAD + PENDING_EXCEPTION_OFFSET as u64, 0xbad0).unwrap();
            machine.write(THREAD + VM_RESULT_OFFSET as u64, 0x1234).unwrap();
            None
        });
        assert_eq!(simulator.run(&mut machine, &mut hooks).unwrap(), forward_pc);
        let thread = JavaThreadContext::load(&machine.memory, THREAD).unwrap();
        assert_eq!(thread.pending_exception, 0xbad0);
        assert_eq!(thread.vm_result, 0);
        // the frame is still there for the forwarding stub
        assert_ne!(machine.sp(), INITIAL_SP);
    }
}

#[test]
fn frameless_stub_leaves_its_frame_before_forwarding() {
    let config = StubGenConfig::for_arch(Arch::X86_64);
    let mut masm = StubAssembler::new(config, "frameless", None);
    masm.bind_new_label();
    masm.emit(IRInstr::EnterFrame);
    masm.call_rt(RuntimeEntry::ThrowNullPointerException, &[], None, None);
    masm.stop("unreachable");
    let code = masm.finish().unwrap();
    assert!(code.referenced_entries().contains(&EntryId::StubGenForwardException));
    let position = code.instructions.iter().position(|instruction| matches!(instruction, IRInstr::JumpEntry { .. })).unwrap();
    assert_eq!(code.instructions[position - 1], IRInstr::LeaveFrame);
}

#[test]
fn only_a_full_save_area_is_handed_to_forward_exception() {
    for arch in [Arch::X86_64, Arch::Riscv64] {
        let config = StubGenConfig::for_arch(arch);
        for (save_fpu, expected) in [(true, EntryId::C1ForwardException), (false, EntryId::StubGenForwardException)] {
            let layout = config.arch_description().save_layout(save_fpu);
            let mut masm = StubAssembler::new(config, "saved", None);
            masm.bind_new_label();
            masm.save_live_registers(&layout, 0);
            masm.call_rt(RuntimeEntry::ThrowNullPointerException, &[], None, None);
            masm.stop("unreachable");
            assert_eq!(masm.finish().unwrap().referenced_entries(), vec![expected]);
        }

        let mut masm = StubAssembler::new(config, "two_words", None);
        masm.bind_new_label();
        masm.emit(IRInstr::EnterFrame);
        masm.set_frame_size(2);
        masm.call_rt(RuntimeEntry::ThrowNullPointerException, &[], None, None);
        masm.stop("unreachable");
        assert_eq!(masm.finish().unwrap().referenced_entries(), vec![EntryId::StubGenForwardException]);
    }
}

#[test]
fn poisoned_registers_do_not_survive_calls() {
    let config = StubGenConfig::for_arch(Arch::Riscv64);
    let mut masm = StubAssembler::new(config, "poison", None);
    masm.bind_new_label();
    masm.emit(IRInstr::EnterFrame);
    masm.call_rt_leaf(RuntimeEntry::ThrowDiv0Exception, &[]);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    let mut simulator = Simulator::new();
    simulator.install(CODE, Arc::new(masm.finish().unwrap()));
    simulator.add_exit(CALLER_PC);
    let mut machine = machine(Arch::Riscv64);
    machine.prepare_call(CODE, CALLER_PC).unwrap();
    simulator.run(&mut machine, &mut Recorder::new(|_, _| None)).unwrap();
    let roles = machine.arch.roles;
    assert_eq!(machine.gpr(roles.scratch1), POISON);
    assert_eq!(machine.gpr(roles.thread), THREAD);
    assert_eq!(machine.gpr(roles.zero.unwrap()), 0);
    assert_ne!(machine.gpr(roles.callee_saved[2]), POISON);
}

#[test]
fn unbound_labels_are_reported() {
    let config = StubGenConfig::for_arch(Arch::X86_64);
    let mut masm = StubAssembler::new(config, "broken", None);
    let nowhere = masm.new_label();
    masm.emit(IRInstr::BranchToLabel { label: nowhere });
    match masm.finish() {
        Err(StubGenError::UnboundLabel { label, stub }) => {
            assert_eq!(label, nowhere);
            assert_eq!(stub, "broken");
        }
        other => panic!("{:?}", other.map(|code| code.name)),
    }
}

#[test]
fn stack_bang_past_the_guard_overflows() {
    let config = StubGenConfig::for_arch(Arch::X86_64);
    let mut masm = StubAssembler::new(config, "bang", None);
    masm.bind_new_label();
    let scratch = masm.roles().scratch1;
    let bytes = masm.roles().scratch2;
    masm.emit(IRInstr::Const64bit { to: bytes, const_: STACK.size });
    masm.emit(IRInstr::BangStack { bytes, scratch, shadow_pages: 0, page_size: 4096 });
    masm.emit(IRInstr::Return);
    let mut simulator = Simulator::new();
    simulator.install(CODE, Arc::new(masm.finish().unwrap()));
    let mut machine = machine(Arch::X86_64);
    machine.prepare_call(CODE, CALLER_PC).unwrap();
    let err = simulator.run(&mut machine, &mut Recorder::new(|_, _| None)).unwrap_err();
    assert!(matches!(err, SimError::StackOverflow(_)));
}

#[test]
fn x86_lowering_places_labels_and_entries() {
    let config = StubGenConfig::for_arch(Arch::X86_64);
    let code = save_and_restore(config, true);
    let runtime = RuntimeAddresses::symbolic(0x7f00_0000_0000);
    let laid_out = lower_x86(&code, 0x1000_0000, &HashMap::new(), &runtime).unwrap();
    let bytes = laid_out.bytes.as_ref().unwrap();
    assert_eq!(laid_out.size, bytes.len() as u64);
    // entry label nop, then push rbp
    assert_eq!(&bytes[..2], &[0x90, 0x55]);
    assert_eq!(*bytes.last().unwrap(), 0xc3);
    assert_eq!(laid_out.label_offsets.len(), code.labels.len());
    let mut labels = code.labels.iter().collect::<Vec<_>>();
    labels.sort_by_key(|(_, index)| **index);
    let offsets = labels.iter().map(|(label, _)| laid_out.label_offsets[label]).collect::<Vec<_>>();
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn lowering_needs_runtime_addresses_and_entries() {
    let config = StubGenConfig::for_arch(Arch::X86_64);
    let code = save_and_restore(config, false);
    assert!(matches!(lower_x86(&code, 0, &HashMap::new(), &RuntimeAddresses::new()), Err(StubGenError::UnknownRuntimeEntry(RuntimeEntry::ExceptionHandlerForPc))));

    let (code, _) = new_instance_like(config);
    let runtime = RuntimeAddresses::symbolic(0x7f00_0000_0000);
    assert!(matches!(lower_x86(&code, 0, &HashMap::new(), &runtime), Err(StubGenError::UnknownEntry(EntryId::C1ForwardException))));
    let entries = HashMap::from([(EntryId::C1ForwardException, 0x2000_0000)]);
    assert!(lower_x86(&code, 0x1000_0000, &entries, &runtime).is_ok());

    let riscv = save_and_restore(StubGenConfig::for_arch(Arch::Riscv64), false);
    assert!(matches!(lower(&riscv, 0, &HashMap::new(), &runtime), Err(StubGenError::UnsupportedLoweringArch(Arch::Riscv64))));
}
