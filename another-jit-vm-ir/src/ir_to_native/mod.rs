use std::collections::HashMap;

use iced_x86::{BlockEncoder, BlockEncoderOptions, InstructionBlock};
use iced_x86::code_asm::{AsmMemoryOperand, AsmRegister64, AsmRegisterXmm, CodeAssembler, CodeLabel, qword_ptr, r10, r11, r12, r13, r14, r15, r8, r9, rax, rbp, rbx, rcx, rdi, rdx, rsi, rsp, xmm0, xmm1, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9};

use another_jit_vm::{Arch, Fpr, Gpr};
use stub_ids::EntryId;

use crate::{Address, IRInstr, LabelName, LaidOutCode, RuntimeAddresses, StubCode, StubGenError};

fn to_native_64(gpr: Gpr) -> Result<AsmRegister64, StubGenError> {
    Ok(match gpr.0 {
        0 => rax,
        1 => rcx,
        2 => rdx,
        3 => rbx,
        4 => rsp,
        5 => rbp,
        6 => rsi,
        7 => rdi,
        8 => r8,
        9 => r9,
        10 => r10,
        11 => r11,
        12 => r12,
        13 => r13,
        14 => r14,
        15 => r15,
        _ => return Err(StubGenError::UnencodableRegister(format!("{:?}", gpr))),
    })
}

fn to_xmm(fpr: Fpr) -> Result<AsmRegisterXmm, StubGenError> {
    Ok(match fpr.0 {
        0 => xmm0,
        1 => xmm1,
        2 => xmm2,
        3 => xmm3,
        4 => xmm4,
        5 => xmm5,
        6 => xmm6,
        7 => xmm7,
        8 => xmm8,
        9 => xmm9,
        10 => xmm10,
        11 => xmm11,
        12 => xmm12,
        13 => xmm13,
        14 => xmm14,
        15 => xmm15,
        _ => return Err(StubGenError::UnencodableRegister(format!("{:?}", fpr))),
    })
}

fn memory(address: Address) -> Result<AsmMemoryOperand, StubGenError> {
    Ok(qword_ptr(to_native_64(address.base)? + address.offset))
}

struct Lowering<'l> {
    code: &'l StubCode,
    assembler: CodeAssembler,
    labels: HashMap<LabelName, CodeLabel>,
    // assembler instruction index of the nop each label is set on
    label_instruction_indices: HashMap<LabelName, usize>,
    entries: &'l HashMap<EntryId, u64>,
    runtime: &'l RuntimeAddresses,
}

impl Lowering<'_> {
    fn label(&mut self, label: LabelName) -> CodeLabel {
        let assembler = &mut self.assembler;
        *self.labels.entry(label).or_insert_with(|| assembler.create_label())
    }

    /// Jump or load targets of other stubs are absolute, entries of this stub go through its labels.
    fn entry_target(&mut self, entry: EntryId) -> Result<Result<CodeLabel, u64>, StubGenError> {
        if let Some(label) = self.code.entry_label(entry) {
            return Ok(Ok(self.label(label)));
        }
        self.entries.get(&entry).copied().map(Err).ok_or(StubGenError::UnknownEntry(entry))
    }

    fn single_ir_to_native(&mut self, instruction: &IRInstr) -> Result<(), StubGenError> {
        match instruction {
            IRInstr::Label(label) => {
                let mut code_label = self.label(label.name);
                self.assembler.set_label(&mut code_label)?;
                self.label_instruction_indices.insert(label.name, self.assembler.instructions().len());
                self.assembler.nop()?;
            }
            IRInstr::Const64bit { to, const_ } => {
                self.assembler.mov(to_native_64(*to)?, *const_)?;
            }
            IRInstr::CopyRegister { from, to } => {
                self.assembler.mov(to_native_64(*to)?, to_native_64(*from)?)?;
            }
            IRInstr::Load { to, from } => {
                self.assembler.mov(to_native_64(*to)?, memory(*from)?)?;
            }
            IRInstr::Store { from, to } => {
                self.assembler.mov(memory(*to)?, to_native_64(*from)?)?;
            }
            IRInstr::StoreConst { const_, to } => {
                self.assembler.mov(memory(*to)?, *const_)?;
            }
            IRInstr::LoadFloat { to, from } => {
                self.assembler.vmovsd(to_xmm(*to)?, memory(*from)?)?;
            }
            IRInstr::StoreFloat { from, to } => {
                self.assembler.vmovsd(memory(*to)?, to_xmm(*from)?)?;
            }
            IRInstr::AddConst { res, const_ } => {
                self.assembler.add(to_native_64(*res)?, *const_)?;
            }
            IRInstr::Add { res, a } => {
                self.assembler.add(to_native_64(*res)?, to_native_64(*a)?)?;
            }
            IRInstr::Sub { res, to_subtract } => {
                self.assembler.sub(to_native_64(*res)?, to_native_64(*to_subtract)?)?;
            }
            IRInstr::LoadLabel { label, to } => {
                let code_label = self.label(*label);
                self.assembler.lea(to_native_64(*to)?, qword_ptr(code_label))?;
            }
            IRInstr::LoadEntry { entry, to } => {
                let to = to_native_64(*to)?;
                match self.entry_target(*entry)? {
                    Ok(code_label) => self.assembler.lea(to, qword_ptr(code_label))?,
                    Err(address) => self.assembler.mov(to, address)?,
                }
            }
            IRInstr::BranchToLabel { label } => {
                let code_label = self.label(*label);
                self.assembler.jmp(code_label)?;
            }
            IRInstr::BranchZero { a, label } => {
                let code_label = self.label(*label);
                let a = to_native_64(*a)?;
                self.assembler.test(a, a)?;
                self.assembler.je(code_label)?;
            }
            IRInstr::BranchNotZero { a, label } => {
                let code_label = self.label(*label);
                let a = to_native_64(*a)?;
                self.assembler.test(a, a)?;
                self.assembler.jne(code_label)?;
            }
            IRInstr::BranchEqualConst { a, const_, label } => {
                let code_label = self.label(*label);
                self.assembler.cmp(to_native_64(*a)?, *const_)?;
                self.assembler.je(code_label)?;
            }
            IRInstr::BranchNotEqualConst { a, const_, label } => {
                let code_label = self.label(*label);
                self.assembler.cmp(to_native_64(*a)?, *const_)?;
                self.assembler.jne(code_label)?;
            }
            IRInstr::JumpRegister { target } => {
                self.assembler.jmp(to_native_64(*target)?)?;
            }
            IRInstr::JumpEntry { entry, scratch } => {
                match self.entry_target(*entry)? {
                    Ok(code_label) => self.assembler.jmp(code_label)?,
                    Err(address) => {
                        let scratch = to_native_64(*scratch)?;
                        self.assembler.mov(scratch, address)?;
                        self.assembler.jmp(scratch)?;
                    }
                }
            }
            IRInstr::CallRegister { target } => {
                self.assembler.call(to_native_64(*target)?)?;
            }
            IRInstr::CallRuntime { target, scratch } => {
                let address = self.runtime.get(*target).ok_or(StubGenError::UnknownRuntimeEntry(*target))?;
                let scratch = to_native_64(*scratch)?;
                self.assembler.mov(scratch, address)?;
                self.assembler.call(scratch)?;
            }
            IRInstr::EnterFrame => {
                self.assembler.push(rbp)?;
                self.assembler.mov(rbp, rsp)?;
            }
            IRInstr::LeaveFrame => {
                self.assembler.mov(rsp, rbp)?;
                self.assembler.pop(rbp)?;
            }
            IRInstr::PushReturnAddress { from } => {
                self.assembler.push(to_native_64(*from)?)?;
            }
            IRInstr::PopReturnAddress { to } => {
                self.assembler.pop(to_native_64(*to)?)?;
            }
            IRInstr::DropReturnAddress => {
                self.assembler.add(rsp, 8)?;
            }
            IRInstr::Return => {
                self.assembler.ret()?;
            }
            IRInstr::BangStack { bytes, scratch, shadow_pages, page_size } => {
                let bytes = to_native_64(*bytes)?;
                let scratch = to_native_64(*scratch)?;
                let mut touch = self.assembler.create_label();
                self.assembler.mov(scratch, rsp)?;
                self.assembler.sub(scratch, bytes)?;
                self.assembler.sub(scratch, (*shadow_pages * *page_size) as i32)?;
                self.assembler.set_label(&mut touch)?;
                self.assembler.mov(qword_ptr(scratch), scratch)?;
                self.assembler.add(scratch, *page_size as i32)?;
                self.assembler.cmp(scratch, rsp)?;
                self.assembler.jb(touch)?;
            }
            IRInstr::Stop { .. } => {
                self.assembler.ud2()?;
            }
        }
        Ok(())
    }
}

/// Encode a stub for x86-64 at `base`. Entries of other stubs must already have addresses.
pub fn lower_x86(code: &StubCode, base: u64, entries: &HashMap<EntryId, u64>, runtime: &RuntimeAddresses) -> Result<LaidOutCode, StubGenError> {
    if code.arch != Arch::X86_64 {
        return Err(StubGenError::UnsupportedLoweringArch(code.arch));
    }
    let mut lowering = Lowering {
        code,
        assembler: CodeAssembler::new(64)?,
        labels: HashMap::new(),
        label_instruction_indices: HashMap::new(),
        entries,
        runtime,
    };
    for instruction in &code.instructions {
        lowering.single_ir_to_native(instruction)?;
    }
    let Lowering { assembler, label_instruction_indices, .. } = lowering;
    let block = InstructionBlock::new(assembler.instructions(), base);
    let result = BlockEncoder::encode(64, block, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
    let label_offsets = label_instruction_indices.into_iter()
        .map(|(label, index)| (label, result.new_instruction_offsets[index]))
        .collect();
    Ok(LaidOutCode {
        size: result.code_buffer.len() as u64,
        label_offsets,
        bytes: Some(result.code_buffer),
    })
}

/// Encode a stub for the architecture it was generated for.
pub fn lower(code: &StubCode, base: u64, entries: &HashMap<EntryId, u64>, runtime: &RuntimeAddresses) -> Result<LaidOutCode, StubGenError> {
    match code.arch {
        Arch::X86_64 => lower_x86(code, base, entries, runtime),
        arch => Err(StubGenError::UnsupportedLoweringArch(arch)),
    }
}
