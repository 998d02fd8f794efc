use another_jit_vm::{ArchDescription, Gpr, WORD_SIZE};
use another_jit_vm_ir::{IRInstr, StubAssembler, StubCode, StubGenConfig, StubGenError};
use gc_memory_layout_common::frame_layout::align_words;
use stub_ids::{EntryId, StubId};

/// Word offsets from fp of the call stub frame's slots. The call wrapper sits where the frame
/// walker looks for it, the result address just below, callee saved registers below that.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallStubLayout {
    pub call_wrapper: i32,
    pub result_address: i32,
    pub saved: Vec<(Gpr, i32)>,
    /// return address and saved fp included
    pub frame_words: usize,
}

impl CallStubLayout {
    pub fn new(arch: &ArchDescription) -> Self {
        let roles = &arch.roles;
        let call_wrapper = arch.frame.entry_frame_call_wrapper_offset;
        let result_address = call_wrapper - 1;
        let saved: Vec<(Gpr, i32)> = roles.callee_saved.iter()
            .copied()
            .filter(|gpr| *gpr != roles.sp && *gpr != roles.fp)
            .enumerate()
            .map(|(i, gpr)| (gpr, result_address - 1 - i as i32))
            .collect();
        let lowest = saved.last().map(|(_, slot)| *slot).unwrap_or(result_address);
        let frame_words = align_words((arch.frame.sender_sp_offset - lowest) as usize, arch.stack_alignment_words);
        Self { call_wrapper, result_address, saved, frame_words }
    }
}

/// Enter java from native code.
///
/// c arguments: the JavaCallWrapper, where to store the integer result, the java entry point
/// and the thread. The wrapper pointer stays in the frame for the walker, which resumes at
/// the wrapper's anchor when it leaves java through this frame.
pub fn generate_call_stub(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::StubGenCallStub.name(), Some(StubId::StubGenCallStub));
    let roles = *masm.roles();
    let layout = CallStubLayout::new(masm.arch());
    let word = WORD_SIZE as i32;
    let [call_wrapper, result_address, entry_point, thread] = [roles.c_args[0], roles.c_args[1], roles.c_args[2], roles.c_args[3]];

    masm.entry(EntryId::StubGenCallStub);
    masm.emit(IRInstr::EnterFrame);
    masm.add_sp(-(((layout.frame_words - 2) * WORD_SIZE) as i32));
    masm.set_frame_size(layout.frame_words);
    masm.set_frame_complete();
    masm.store(call_wrapper, roles.fp, layout.call_wrapper * word);
    masm.store(result_address, roles.fp, layout.result_address * word);
    for (gpr, slot) in &layout.saved {
        masm.store(*gpr, roles.fp, slot * word);
    }
    masm.mov(roles.thread, thread);
    masm.emit(IRInstr::CallRegister { target: entry_point });

    masm.entry(EntryId::StubGenCallStubReturnAddress);
    masm.load(roles.scratch1, roles.fp, layout.result_address * word);
    masm.store(roles.result, roles.scratch1, 0);
    for (gpr, slot) in &layout.saved {
        masm.load(*gpr, roles.fp, slot * word);
    }
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    masm.finish()
}
