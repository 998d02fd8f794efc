// the stubs generated code calls into when something leaves the fast path: exception
// dispatch, lazy patching, deoptimization, uncommon traps and the call stub that enters java.

use another_jit_vm::{Gpr, RegisterRoles};
use another_jit_vm::saved_registers_utils::RegisterSaveLayout;
use another_jit_vm_ir::StubGenError;

pub use stub_routines::{Emission, GeneratedStub, StubRoutines};
pub use unroll_block::{UnpackKind, UnrollBlock, UnrollBlockError, VFrameShape};

pub mod unroll_block;
pub mod exception;
pub mod patching;
pub mod runtime_calls;
pub mod deoptimization;
pub mod call_stub;
pub mod stub_routines;

/// Byte offset from the save area's sp of the slot holding `gpr`.
pub(crate) fn saved_slot(layout: &RegisterSaveLayout, gpr: Gpr) -> Result<i32, StubGenError> {
    layout.gpr_byte_offset(gpr).ok_or_else(|| StubGenError::NotSaved(layout.arch().description().gpr_name(gpr)))
}

/// Callee saved registers with no fixed role, usable to keep values across a runtime call.
pub(crate) fn spare_callee_saved(roles: &RegisterRoles) -> impl Iterator<Item=Gpr> + '_ {
    roles.callee_saved.iter().copied().filter(move |gpr| {
        ![roles.sp, roles.fp, roles.thread, roles.unpack_kind, roles.mh_sp_save].contains(gpr)
    })
}
