use crate::{Arch, Fpr, Gpr};
use crate::arch::{ArchDescription, DeoptTemps, FrameConstants, InterpreterFrameOffsets, RegisterRoles, ReturnAddressStyle};
use crate::saved_registers_utils::FprPlacement;

pub const ZR: Gpr = Gpr(0);
pub const RA: Gpr = Gpr(1);
pub const SP: Gpr = Gpr(2);
pub const T0: Gpr = Gpr(5);
pub const T1: Gpr = Gpr(6);
pub const FP: Gpr = Gpr(8);
pub const S1: Gpr = Gpr(9);
pub const A0: Gpr = Gpr(10);
pub const A1: Gpr = Gpr(11);
pub const A2: Gpr = Gpr(12);
pub const A3: Gpr = Gpr(13);
pub const A4: Gpr = Gpr(14);
pub const A5: Gpr = Gpr(15);
pub const A6: Gpr = Gpr(16);
pub const A7: Gpr = Gpr(17);
pub const XTHREAD: Gpr = Gpr(23);
pub const S11: Gpr = Gpr(27);

pub const FA0: Fpr = Fpr(10);

const GPR_NAMES: [&str; 32] = [
    "zr", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "fp", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

const FPR_NAMES: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7",
    "fs0", "fs1", "fa0", "fa1", "fa2", "fa3", "fa4", "fa5",
    "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7",
    "fs8", "fs9", "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

// x0-x4 are zero, ra, sp, gp and tp. fp is saved by the frame, x23 holds the thread
const SAVED_GPRS: [Gpr; 25] = [
    Gpr(5), Gpr(6), Gpr(7),
    Gpr(9), Gpr(10), Gpr(11), Gpr(12), Gpr(13), Gpr(14), Gpr(15), Gpr(16), Gpr(17), Gpr(18), Gpr(19), Gpr(20), Gpr(21), Gpr(22),
    Gpr(24), Gpr(25), Gpr(26), Gpr(27), Gpr(28), Gpr(29), Gpr(30), Gpr(31),
];

const SAVED_FPRS: [Fpr; 32] = [
    Fpr(0), Fpr(1), Fpr(2), Fpr(3), Fpr(4), Fpr(5), Fpr(6), Fpr(7),
    Fpr(8), Fpr(9), Fpr(10), Fpr(11), Fpr(12), Fpr(13), Fpr(14), Fpr(15),
    Fpr(16), Fpr(17), Fpr(18), Fpr(19), Fpr(20), Fpr(21), Fpr(22), Fpr(23),
    Fpr(24), Fpr(25), Fpr(26), Fpr(27), Fpr(28), Fpr(29), Fpr(30), Fpr(31),
];

const C_ARGS: [Gpr; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

const JAVA_ARGS: [Gpr; 8] = [A1, A2, A3, A4, A5, A6, A7, A0];

const CALLEE_SAVED: [Gpr; 13] = [SP, FP, S1, Gpr(18), Gpr(19), Gpr(20), Gpr(21), Gpr(22), Gpr(23), Gpr(24), Gpr(25), Gpr(26), Gpr(27)];

pub static RISCV64: ArchDescription = ArchDescription {
    arch: Arch::Riscv64,
    gpr_names: &GPR_NAMES,
    fpr_names: &FPR_NAMES,
    roles: RegisterRoles {
        thread: XTHREAD,
        c_args: &C_ARGS,
        java_args: &JAVA_ARGS,
        result: A0,
        fp_result: FA0,
        exception_oop: A0,
        exception_pc: A3,
        scratch1: T0,
        scratch2: T1,
        sp: SP,
        fp: FP,
        mh_sp_save: FP,
        unpack_kind: S11,
        zero: Some(ZR),
        callee_saved: &CALLEE_SAVED,
        deopt_temps: DeoptTemps {
            unroll_block: A5,
            frame_sizes: A4,
            frame_pcs: A2,
            counter: A3,
            frame_size: S1,
            sender_sp: A6,
        },
    },
    frame: FrameConstants {
        link_offset: -2,
        return_addr_offset: -1,
        sender_sp_offset: 0,
        entry_frame_call_wrapper_offset: -10,
    },
    interpreter: InterpreterFrameOffsets {
        sender_sp: -3,
        last_sp: -4,
        method: -5,
        mirror: -6,
        mdp: -7,
        cache: -8,
        locals: -9,
        bcp: -10,
        initial_sp: -11,
    },
    return_address_style: ReturnAddressStyle::LinkRegister(RA),
    saved_gprs: &SAVED_GPRS,
    saved_fprs: &SAVED_FPRS,
    fpr_placement: FprPlacement::AboveGprs,
    stack_alignment_words: 2,
};
