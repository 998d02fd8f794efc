use another_jit_vm::thread_context::{EXCEPTION_OOP_OFFSET, EXCEPTION_PC_OFFSET, PENDING_EXCEPTION_OFFSET};
use another_jit_vm_ir::{IRInstr, RuntimeEntry, StubAssembler, StubCode, StubGenConfig, StubGenError};
use stub_ids::{EntryId, StubId};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PatchingStub {
    AccessField,
    LoadKlass,
    LoadMirror,
    LoadAppendix,
}

impl PatchingStub {
    pub const ALL: [PatchingStub; 4] = [PatchingStub::AccessField, PatchingStub::LoadKlass, PatchingStub::LoadMirror, PatchingStub::LoadAppendix];

    pub fn stub_id(&self) -> StubId {
        match self {
            PatchingStub::AccessField => StubId::C1AccessFieldPatching,
            PatchingStub::LoadKlass => StubId::C1LoadKlassPatching,
            PatchingStub::LoadMirror => StubId::C1LoadMirrorPatching,
            PatchingStub::LoadAppendix => StubId::C1LoadAppendixPatching,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        match self {
            PatchingStub::AccessField => EntryId::C1AccessFieldPatching,
            PatchingStub::LoadKlass => EntryId::C1LoadKlassPatching,
            PatchingStub::LoadMirror => EntryId::C1LoadMirrorPatching,
            PatchingStub::LoadAppendix => EntryId::C1LoadAppendixPatching,
        }
    }

    pub fn runtime_entry(&self) -> RuntimeEntry {
        match self {
            PatchingStub::AccessField => RuntimeEntry::AccessFieldPatching,
            PatchingStub::LoadKlass => RuntimeEntry::LoadKlassPatching,
            PatchingStub::LoadMirror => RuntimeEntry::LoadMirrorPatching,
            PatchingStub::LoadAppendix => RuntimeEntry::LoadAppendixPatching,
        }
    }
}

/// Save everything, let the runtime patch the caller's code, then either return to the patched
/// instruction or, if the runtime deoptimized the caller meanwhile, reexecute it in the
/// interpreter through the deopt blob.
///
/// A pending exception goes to forward_exception while the caller is intact, and to the deopt
/// blob's exception entry with the exception moved to the thread once it is not. The return
/// address is left in place for the deopt blob in both deoptimized cases.
pub fn generate_patching(config: StubGenConfig, stub: PatchingStub) -> Result<StubCode, StubGenError> {
    let stub_id = stub.stub_id();
    let mut masm = StubAssembler::new(config, stub_id.name(), Some(stub_id));
    let roles = *masm.roles();
    let layout = masm.arch().save_layout(true);
    let return_address = masm.return_address_offset();

    masm.entry(stub.entry_id());
    let oop_map = masm.save_live_registers(&layout, 0);
    let call = masm.call_rt_leaf_with_anchor(stub.runtime_entry(), &[]);
    masm.add_oop_map(call, oop_map);

    let no_exception = masm.new_label();
    let deoptimized_with_exception = masm.new_label();
    masm.load(roles.scratch1, roles.thread, PENDING_EXCEPTION_OFFSET);
    masm.emit(IRInstr::BranchZero { a: roles.scratch1, label: no_exception });
    masm.emit(IRInstr::BranchNotZero { a: roles.result, label: deoptimized_with_exception });
    masm.forward_pending_exception();

    masm.bind(deoptimized_with_exception);
    masm.load(roles.scratch1, roles.thread, PENDING_EXCEPTION_OFFSET);
    masm.store_const(0, roles.thread, PENDING_EXCEPTION_OFFSET);
    masm.store(roles.scratch1, roles.thread, EXCEPTION_OOP_OFFSET);
    masm.load(roles.scratch1, roles.fp, return_address);
    masm.store(roles.scratch1, roles.thread, EXCEPTION_PC_OFFSET);
    masm.restore_live_registers(&layout);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::DropReturnAddress);
    masm.emit(IRInstr::JumpEntry { entry: EntryId::DeoptUnpackWithExceptionInTls, scratch: roles.scratch1 });

    masm.bind(no_exception);
    let resume = masm.new_label();
    masm.emit(IRInstr::BranchZero { a: roles.result, label: resume });
    if config.debug_checks {
        let deoptimized = masm.new_label();
        masm.emit(IRInstr::BranchEqualConst { a: roles.result, const_: 1, label: deoptimized });
        masm.stop("unexpected result from the patching runtime call");
        masm.bind(deoptimized);
    }
    masm.restore_live_registers(&layout);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::JumpEntry { entry: EntryId::DeoptUnpackWithReexecution, scratch: roles.scratch1 });

    masm.bind(resume);
    masm.restore_live_registers(&layout);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    masm.finish()
}
