use another_jit_vm::{Fpr, Gpr};
use stub_ids::EntryId;

use crate::runtime_entries::RuntimeEntry;

/// Register plus byte displacement.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Address {
    pub base: Gpr,
    pub offset: i32,
}

impl Address {
    pub fn new(base: Gpr, offset: i32) -> Self {
        Self { base, offset }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub struct LabelName(pub u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct IRLabel {
    pub name: LabelName,
}

/// Architecture neutral stub instructions. Frame entry, frame exit and return address handling
/// are single instructions because they are where x86-64 and riscv64 differ: x86 pushes the
/// return address, riscv keeps it in `ra`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IRInstr {
    Label(IRLabel),
    Const64bit { to: Gpr, const_: u64 },
    CopyRegister { from: Gpr, to: Gpr },
    Load { to: Gpr, from: Address },
    Store { from: Gpr, to: Address },
    StoreConst { const_: i32, to: Address },
    LoadFloat { to: Fpr, from: Address },
    StoreFloat { from: Fpr, to: Address },
    AddConst { res: Gpr, const_: i32 },
    Add { res: Gpr, a: Gpr },
    Sub { res: Gpr, to_subtract: Gpr },
    LoadLabel { label: LabelName, to: Gpr },
    LoadEntry { entry: EntryId, to: Gpr },
    BranchToLabel { label: LabelName },
    BranchZero { a: Gpr, label: LabelName },
    BranchNotZero { a: Gpr, label: LabelName },
    BranchEqualConst { a: Gpr, const_: i32, label: LabelName },
    BranchNotEqualConst { a: Gpr, const_: i32, label: LabelName },
    JumpRegister { target: Gpr },
    JumpEntry { entry: EntryId, scratch: Gpr },
    CallRegister { target: Gpr },
    CallRuntime { target: RuntimeEntry, scratch: Gpr },
    /// push the frame pointer and return address, point fp at the new frame
    EnterFrame,
    LeaveFrame,
    /// make `from` the return address of the next frame entry
    PushReturnAddress { from: Gpr },
    PopReturnAddress { to: Gpr },
    /// drop a return address that is no longer needed
    DropReturnAddress,
    Return,
    /// touch every page from sp down to sp - bytes - shadow
    BangStack { bytes: Gpr, scratch: Gpr, shadow_pages: u32, page_size: u32 },
    Stop { reason: &'static str },
}

impl IRInstr {
    pub fn label_target(&self) -> Option<LabelName> {
        match self {
            IRInstr::LoadLabel { label, .. } |
            IRInstr::BranchToLabel { label } |
            IRInstr::BranchZero { label, .. } |
            IRInstr::BranchNotZero { label, .. } |
            IRInstr::BranchEqualConst { label, .. } |
            IRInstr::BranchNotEqualConst { label, .. } => Some(*label),
            _ => None,
        }
    }

    pub fn entry_target(&self) -> Option<EntryId> {
        match self {
            IRInstr::LoadEntry { entry, .. } | IRInstr::JumpEntry { entry, .. } => Some(*entry),
            _ => None,
        }
    }
}
