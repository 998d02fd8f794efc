use crate::{Arch, Fpr, Gpr};
use crate::arch::{ArchDescription, DeoptTemps, FrameConstants, InterpreterFrameOffsets, RegisterRoles, ReturnAddressStyle};
use crate::saved_registers_utils::FprPlacement;

pub const RAX: Gpr = Gpr(0);
pub const RCX: Gpr = Gpr(1);
pub const RDX: Gpr = Gpr(2);
pub const RBX: Gpr = Gpr(3);
pub const RSP: Gpr = Gpr(4);
pub const RBP: Gpr = Gpr(5);
pub const RSI: Gpr = Gpr(6);
pub const RDI: Gpr = Gpr(7);
pub const R8: Gpr = Gpr(8);
pub const R9: Gpr = Gpr(9);
pub const R10: Gpr = Gpr(10);
pub const R11: Gpr = Gpr(11);
pub const R12: Gpr = Gpr(12);
pub const R13: Gpr = Gpr(13);
pub const R14: Gpr = Gpr(14);
pub const R15: Gpr = Gpr(15);

pub const XMM0: Fpr = Fpr(0);

const GPR_NAMES: [&str; 16] = ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];

const FPR_NAMES: [&str; 16] = ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15"];

// rsp and rbp are handled by the frame itself, r15 holds the thread
const SAVED_GPRS: [Gpr; 13] = [RAX, RCX, RDX, RBX, RSI, RDI, R8, R9, R10, R11, R12, R13, R14];

const SAVED_FPRS: [Fpr; 16] = [Fpr(0), Fpr(1), Fpr(2), Fpr(3), Fpr(4), Fpr(5), Fpr(6), Fpr(7), Fpr(8), Fpr(9), Fpr(10), Fpr(11), Fpr(12), Fpr(13), Fpr(14), Fpr(15)];

const C_ARGS: [Gpr; 6] = [RDI, RSI, RDX, RCX, R8, R9];

const JAVA_ARGS: [Gpr; 6] = [RSI, RDX, RCX, R8, R9, RDI];

const CALLEE_SAVED: [Gpr; 6] = [RBX, RBP, R12, R13, R14, R15];

pub static X86_64: ArchDescription = ArchDescription {
    arch: Arch::X86_64,
    gpr_names: &GPR_NAMES,
    fpr_names: &FPR_NAMES,
    roles: RegisterRoles {
        thread: R15,
        c_args: &C_ARGS,
        java_args: &JAVA_ARGS,
        result: RAX,
        fp_result: XMM0,
        exception_oop: RAX,
        exception_pc: RDX,
        scratch1: R10,
        scratch2: R11,
        sp: RSP,
        fp: RBP,
        mh_sp_save: RBP,
        unpack_kind: R14,
        zero: None,
        callee_saved: &CALLEE_SAVED,
        deopt_temps: DeoptTemps {
            unroll_block: RDI,
            frame_sizes: RSI,
            frame_pcs: RCX,
            counter: RDX,
            frame_size: RBX,
            sender_sp: R8,
        },
    },
    frame: FrameConstants {
        link_offset: 0,
        return_addr_offset: 1,
        sender_sp_offset: 2,
        entry_frame_call_wrapper_offset: -6,
    },
    interpreter: InterpreterFrameOffsets {
        sender_sp: -1,
        last_sp: -2,
        method: -3,
        mirror: -4,
        mdp: -5,
        cache: -6,
        locals: -7,
        bcp: -8,
        initial_sp: -9,
    },
    return_address_style: ReturnAddressStyle::Pushed,
    saved_gprs: &SAVED_GPRS,
    saved_fprs: &SAVED_FPRS,
    fpr_placement: FprPlacement::BelowGprs,
    stack_alignment_words: 2,
};
