// tier-1 stubs that are a frame around one call_rt. Arguments arrive in the scratch
// registers: the first in scratch1, the second in scratch2.

use another_jit_vm::Gpr;
use another_jit_vm_ir::{IRInstr, RuntimeEntry, StubAssembler, StubCode, StubGenConfig, StubGenError};
use stub_ids::{EntryId, StubId};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ThrowStub {
    /// (index, array)
    RangeCheck,
    NullPointer,
    Div0,
    /// (object)
    ClassCast,
}

impl ThrowStub {
    pub const ALL: [ThrowStub; 4] = [ThrowStub::RangeCheck, ThrowStub::NullPointer, ThrowStub::Div0, ThrowStub::ClassCast];

    pub fn stub_id(&self) -> StubId {
        match self {
            ThrowStub::RangeCheck => StubId::C1ThrowRangeCheckFailed,
            ThrowStub::NullPointer => StubId::C1ThrowNullPointerException,
            ThrowStub::Div0 => StubId::C1ThrowDiv0Exception,
            ThrowStub::ClassCast => StubId::C1ThrowClassCastException,
        }
    }

    pub fn entry_id(&self) -> EntryId {
        match self {
            ThrowStub::RangeCheck => EntryId::C1ThrowRangeCheckFailed,
            ThrowStub::NullPointer => EntryId::C1ThrowNullPointerException,
            ThrowStub::Div0 => EntryId::C1ThrowDiv0Exception,
            ThrowStub::ClassCast => EntryId::C1ThrowClassCastException,
        }
    }

    pub fn runtime_entry(&self) -> RuntimeEntry {
        match self {
            ThrowStub::RangeCheck => RuntimeEntry::ThrowRangeCheckException,
            ThrowStub::NullPointer => RuntimeEntry::ThrowNullPointerException,
            ThrowStub::Div0 => RuntimeEntry::ThrowDiv0Exception,
            ThrowStub::ClassCast => RuntimeEntry::ThrowClassCastException,
        }
    }
}

fn argument_registers(masm: &StubAssembler, count: usize) -> Vec<Gpr> {
    let roles = masm.roles();
    [roles.scratch1, roles.scratch2].into_iter().take(count).collect()
}

/// The runtime call always leaves an exception pending, so control leaves through
/// forward_exception and the code after the call is unreachable.
pub fn generate_throw(config: StubGenConfig, stub: ThrowStub) -> Result<StubCode, StubGenError> {
    let stub_id = stub.stub_id();
    let target = stub.runtime_entry();
    let mut masm = StubAssembler::new(config, stub_id.name(), Some(stub_id));
    let layout = masm.arch().save_layout(true);

    masm.entry(stub.entry_id());
    let oop_map = masm.save_live_registers(&layout, 0);
    let args = argument_registers(&masm, target.signature().args);
    let call = masm.call_rt(target, &args, None, None);
    masm.add_oop_map(call, oop_map);
    masm.stop("throw stub returned");
    masm.finish()
}

/// klass in scratch1, the new object comes back in the result register.
pub fn generate_new_instance(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::C1NewInstance.name(), Some(StubId::C1NewInstance));
    let roles = *masm.roles();
    let layout = masm.arch().save_layout(true);

    masm.entry(EntryId::C1NewInstance);
    let oop_map = masm.save_live_registers(&layout, 0);
    let args = argument_registers(&masm, 1);
    let call = masm.call_rt(RuntimeEntry::NewInstance, &args, Some(roles.result), None);
    masm.add_oop_map(call, oop_map);
    masm.restore_live_registers_except(&layout, roles.result);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    masm.finish()
}

/// object in scratch1, lock in scratch2.
pub fn generate_monitorenter(config: StubGenConfig) -> Result<StubCode, StubGenError> {
    let mut masm = StubAssembler::new(config, StubId::C1MonitorEnter.name(), Some(StubId::C1MonitorEnter));
    let layout = masm.arch().save_layout(true);

    masm.entry(EntryId::C1MonitorEnter);
    let oop_map = masm.save_live_registers(&layout, 0);
    let args = argument_registers(&masm, 2);
    let call = masm.call_rt(RuntimeEntry::MonitorEnter, &args, None, None);
    masm.add_oop_map(call, oop_map);
    masm.restore_live_registers(&layout);
    masm.emit(IRInstr::LeaveFrame);
    masm.emit(IRInstr::Return);
    masm.finish()
}
