use crate::{Arch, Fpr, Gpr};
use crate::saved_registers_utils::{FprPlacement, RegisterSaveLayout};

pub mod x86_64;
pub mod riscv64;

/// How a call communicates the return address to the callee.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReturnAddressStyle {
    /// call pushes the return address onto the stack
    Pushed,
    /// call writes the return address into a link register
    LinkRegister(Gpr),
}

/// Scratch registers used by the deoptimization unroll loop.
/// None of these may alias the result registers, the thread, or the unpack kind register.
#[derive(Copy, Clone, Debug)]
pub struct DeoptTemps {
    pub unroll_block: Gpr,
    pub frame_sizes: Gpr,
    pub frame_pcs: Gpr,
    pub counter: Gpr,
    pub frame_size: Gpr,
    pub sender_sp: Gpr,
}

#[derive(Copy, Clone, Debug)]
pub struct RegisterRoles {
    pub thread: Gpr,
    pub c_args: &'static [Gpr],
    pub java_args: &'static [Gpr],
    pub result: Gpr,
    pub fp_result: Fpr,
    pub exception_oop: Gpr,
    pub exception_pc: Gpr,
    pub scratch1: Gpr,
    pub scratch2: Gpr,
    pub sp: Gpr,
    pub fp: Gpr,
    // compiled code at a method handle call site keeps the real sp here
    pub mh_sp_save: Gpr,
    pub unpack_kind: Gpr,
    pub zero: Option<Gpr>,
    pub callee_saved: &'static [Gpr],
    pub deopt_temps: DeoptTemps,
}

/// Word offsets relative to the frame pointer, in the style of a platform frame header.
#[derive(Copy, Clone, Debug)]
pub struct FrameConstants {
    pub link_offset: i32,
    pub return_addr_offset: i32,
    pub sender_sp_offset: i32,
    // entry frames keep a pointer to their JavaCallWrapper here
    pub entry_frame_call_wrapper_offset: i32,
}

/// Interpreter frame header slots, word offsets relative to fp.
#[derive(Copy, Clone, Debug)]
pub struct InterpreterFrameOffsets {
    pub sender_sp: i32,
    pub last_sp: i32,
    pub method: i32,
    pub mirror: i32,
    pub mdp: i32,
    pub cache: i32,
    pub locals: i32,
    pub bcp: i32,
    pub initial_sp: i32,
}

impl InterpreterFrameOffsets {
    /// Words between the sender sp and the lowest fixed header slot, return address and link included.
    pub fn overhead_words(&self, frame: &FrameConstants) -> usize {
        (frame.sender_sp_offset - self.initial_sp) as usize
    }
}

pub struct ArchDescription {
    pub arch: Arch,
    pub gpr_names: &'static [&'static str],
    pub fpr_names: &'static [&'static str],
    pub roles: RegisterRoles,
    pub frame: FrameConstants,
    pub interpreter: InterpreterFrameOffsets,
    pub return_address_style: ReturnAddressStyle,
    // registers stored in the save area in ascending slot order
    pub saved_gprs: &'static [Gpr],
    pub saved_fprs: &'static [Fpr],
    pub fpr_placement: FprPlacement,
    pub stack_alignment_words: usize,
}

impl ArchDescription {
    pub fn gpr_name(&self, gpr: Gpr) -> &'static str {
        self.gpr_names.get(gpr.0 as usize).copied().unwrap_or("<bad gpr>")
    }

    pub fn fpr_name(&self, fpr: Fpr) -> &'static str {
        self.fpr_names.get(fpr.0 as usize).copied().unwrap_or("<bad fpr>")
    }

    pub fn gpr_count(&self) -> usize {
        self.gpr_names.len()
    }

    pub fn fpr_count(&self) -> usize {
        self.fpr_names.len()
    }

    pub fn save_layout(&self, save_fpu: bool) -> RegisterSaveLayout {
        RegisterSaveLayout::new(self, save_fpu)
    }

    pub fn link_register(&self) -> Option<Gpr> {
        match self.return_address_style {
            ReturnAddressStyle::Pushed => None,
            ReturnAddressStyle::LinkRegister(lr) => Some(lr),
        }
    }

    pub fn is_callee_saved(&self, gpr: Gpr) -> bool {
        self.roles.callee_saved.contains(&gpr)
    }
}
