//! Executes stub ir against a word addressed memory, with the calling convention of either
//! architecture. Runtime routines are supplied by the caller through [`RuntimeHooks`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use log::trace;
use thiserror::Error;

use another_jit_vm::{Arch, ArchDescription, Fpr, Gpr, ReturnAddressStyle, WORD_SIZE};
use another_jit_vm::stack::{MemoryFault, StackBangError, StackBounds, StackOverflow, WordMemory};
use stub_ids::EntryId;

use crate::{Address, IRInstr, LabelName, POISON, RuntimeEntry, StubCode};

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    StackOverflow(#[from] StackOverflow),
    #[error("stack bang with a page size of zero")]
    ZeroPageSize,
    #[error(transparent)]
    MemoryFault(#[from] MemoryFault),
    #[error("stop: {0}")]
    Stop(&'static str),
    #[error("still running after {0} steps")]
    StepLimit(usize),
    #[error("pc {0:#x} is not in any simulated stub")]
    UnknownPc(u64),
    #[error("entry {0:?} has no address")]
    UnknownEntry(EntryId),
    #[error("runtime call {0:?} failed: {1}")]
    Runtime(RuntimeEntry, String),
}

impl From<StackBangError> for SimError {
    fn from(err: StackBangError) -> Self {
        match err {
            StackBangError::Overflow(overflow) => SimError::StackOverflow(overflow),
            StackBangError::ZeroPageSize => SimError::ZeroPageSize,
        }
    }
}

/// Sparse memory made of mapped regions. The stack region, if any, only admits accesses
/// above its guard zone.
#[derive(Clone, Debug, Default)]
pub struct SimMemory {
    words: HashMap<u64, u64>,
    regions: Vec<Range<u64>>,
    stack: Option<StackBounds>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, region: Range<u64>) {
        self.regions.push(region);
    }

    pub fn map_stack(&mut self, stack: StackBounds) {
        self.stack = Some(stack);
    }

    pub fn stack(&self) -> Option<StackBounds> {
        self.stack
    }

    fn check(&self, address: u64) -> Result<(), MemoryFault> {
        if address % WORD_SIZE as u64 != 0 {
            return Err(MemoryFault { address });
        }
        let in_stack = self.stack.map(|stack| stack.contains_usable(address)).unwrap_or(false);
        let in_region = self.regions.iter().any(|region| region.contains(&address));
        if in_stack || in_region {
            Ok(())
        } else {
            Err(MemoryFault { address })
        }
    }
}

impl WordMemory for SimMemory {
    fn read_word(&self, address: u64) -> Result<u64, MemoryFault> {
        self.check(address)?;
        Ok(self.words.get(&address).copied().unwrap_or(0))
    }

    fn write_word(&mut self, address: u64, value: u64) -> Result<(), MemoryFault> {
        self.check(address)?;
        self.words.insert(address, value);
        Ok(())
    }
}

pub struct Machine {
    pub arch: &'static ArchDescription,
    gprs: [u64; 32],
    fprs: [u64; 32],
    pub pc: u64,
    pub memory: SimMemory,
}

impl Machine {
    pub fn new(arch: Arch, memory: SimMemory) -> Self {
        Self {
            arch: arch.description(),
            gprs: [0; 32],
            fprs: [0; 32],
            pc: 0,
            memory,
        }
    }

    pub fn gpr(&self, gpr: Gpr) -> u64 {
        if Some(gpr) == self.arch.roles.zero {
            return 0;
        }
        self.gprs[gpr.0 as usize]
    }

    pub fn set_gpr(&mut self, gpr: Gpr, value: u64) {
        if Some(gpr) != self.arch.roles.zero {
            self.gprs[gpr.0 as usize] = value;
        }
    }

    pub fn fpr(&self, fpr: Fpr) -> u64 {
        self.fprs[fpr.0 as usize]
    }

    pub fn set_fpr(&mut self, fpr: Fpr, value: u64) {
        self.fprs[fpr.0 as usize] = value;
    }

    pub fn sp(&self) -> u64 {
        self.gpr(self.arch.roles.sp)
    }

    pub fn set_sp(&mut self, value: u64) {
        self.set_gpr(self.arch.roles.sp, value)
    }

    pub fn fp(&self) -> u64 {
        self.gpr(self.arch.roles.fp)
    }

    pub fn set_fp(&mut self, value: u64) {
        self.set_gpr(self.arch.roles.fp, value)
    }

    pub fn thread(&self) -> u64 {
        self.gpr(self.arch.roles.thread)
    }

    /// Argument `i` of a runtime call, 0 being the thread.
    pub fn c_arg(&self, i: usize) -> u64 {
        self.gpr(self.arch.roles.c_args[i])
    }

    pub fn read(&self, address: u64) -> Result<u64, MemoryFault> {
        self.memory.read_word(address)
    }

    pub fn write(&mut self, address: u64, value: u64) -> Result<(), MemoryFault> {
        self.memory.write_word(address, value)
    }

    fn address(&self, address: Address) -> u64 {
        self.gpr(address.base).wrapping_add(address.offset as i64 as u64)
    }

    pub fn push(&mut self, value: u64) -> Result<(), MemoryFault> {
        let sp = self.sp() - WORD_SIZE as u64;
        self.write(sp, value)?;
        self.set_sp(sp);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u64, MemoryFault> {
        let sp = self.sp();
        let value = self.read(sp)?;
        self.set_sp(sp + WORD_SIZE as u64);
        Ok(value)
    }

    /// Set up the state a call instruction leaves behind: return address pushed or in the link register.
    pub fn prepare_call(&mut self, target: u64, return_pc: u64) -> Result<(), MemoryFault> {
        match self.arch.return_address_style {
            ReturnAddressStyle::Pushed => self.push(return_pc)?,
            ReturnAddressStyle::LinkRegister(lr) => self.set_gpr(lr, return_pc),
        }
        self.pc = target;
        Ok(())
    }

    fn do_return(&mut self) -> Result<(), MemoryFault> {
        self.pc = match self.arch.return_address_style {
            ReturnAddressStyle::Pushed => self.pop()?,
            ReturnAddressStyle::LinkRegister(lr) => self.gpr(lr),
        };
        Ok(())
    }

    fn enter_frame(&mut self) -> Result<(), MemoryFault> {
        match self.arch.return_address_style {
            ReturnAddressStyle::Pushed => {
                self.push(self.fp())?;
                self.set_fp(self.sp());
            }
            ReturnAddressStyle::LinkRegister(lr) => {
                let sp = self.sp() - 2 * WORD_SIZE as u64;
                self.write(sp + WORD_SIZE as u64, self.gpr(lr))?;
                self.write(sp, self.fp())?;
                self.set_sp(sp);
                self.set_fp(sp + 2 * WORD_SIZE as u64);
            }
        }
        Ok(())
    }

    fn leave_frame(&mut self) -> Result<(), MemoryFault> {
        match self.arch.return_address_style {
            ReturnAddressStyle::Pushed => {
                self.set_sp(self.fp());
                let fp = self.pop()?;
                self.set_fp(fp);
            }
            ReturnAddressStyle::LinkRegister(lr) => {
                let fp = self.fp();
                let ra = self.read(fp - WORD_SIZE as u64)?;
                let link = self.read(fp - 2 * WORD_SIZE as u64)?;
                self.set_gpr(lr, ra);
                self.set_sp(fp);
                self.set_fp(link);
            }
        }
        Ok(())
    }

    /// Clobber every register a callee may change, so code that relies on one surviving a call fails.
    pub fn poison_caller_saved(&mut self) {
        let roles = self.arch.roles;
        for i in 0..self.arch.gpr_count() {
            let gpr = Gpr(i as u8);
            let keep = roles.callee_saved.contains(&gpr) || gpr == roles.sp || gpr == roles.thread || Some(gpr) == roles.zero;
            if !keep {
                self.set_gpr(gpr, POISON);
            }
        }
    }
}

/// Runtime routines called from simulated stubs. Arguments are in the c argument registers.
/// A returned value is written to the result register.
pub trait RuntimeHooks {
    fn call(&mut self, entry: RuntimeEntry, machine: &mut Machine) -> Result<Option<u64>, SimError>;
}

pub struct Simulator {
    code: BTreeMap<u64, Arc<StubCode>>,
    entries: HashMap<EntryId, u64>,
    exits: HashSet<u64>,
    pub poison_after_calls: bool,
    pub max_steps: usize,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            code: BTreeMap::new(),
            entries: HashMap::new(),
            exits: HashSet::new(),
            poison_after_calls: true,
            max_steps: 1_000_000,
        }
    }

    /// Place a stub at `base`. Its entries become reachable from other stubs.
    pub fn install(&mut self, base: u64, code: Arc<StubCode>) -> Vec<(EntryId, u64)> {
        let entries = code.entries.iter()
            .filter_map(|(entry, label)| Some((*entry, base + code.label_index(*label)? as u64 * StubCode::SIMULATED_INSTRUCTION_SIZE)))
            .collect::<Vec<_>>();
        self.entries.extend(entries.iter().copied());
        self.code.insert(base, code);
        entries
    }

    pub fn entry_address(&self, entry: EntryId) -> Option<u64> {
        self.entries.get(&entry).copied()
    }

    pub fn label_address(&self, base: u64, label: LabelName) -> Option<u64> {
        let code = self.code.get(&base)?;
        Some(base + code.label_index(label)? as u64 * StubCode::SIMULATED_INSTRUCTION_SIZE)
    }

    /// Reaching one of these pcs ends a run.
    pub fn add_exit(&mut self, pc: u64) {
        self.exits.insert(pc);
    }

    fn locate(&self, pc: u64) -> Option<(u64, &Arc<StubCode>, usize)> {
        let (base, code) = self.code.range(..=pc).next_back()?;
        let offset = pc - base;
        if offset % StubCode::SIMULATED_INSTRUCTION_SIZE != 0 {
            return None;
        }
        let index = (offset / StubCode::SIMULATED_INSTRUCTION_SIZE) as usize;
        (index < code.instructions.len()).then_some((*base, code, index))
    }

    /// Run from `machine.pc` until an exit pc is reached. Returns that pc.
    pub fn run(&self, machine: &mut Machine, hooks: &mut dyn RuntimeHooks) -> Result<u64, SimError> {
        for _ in 0..self.max_steps {
            if self.exits.contains(&machine.pc) {
                return Ok(machine.pc);
            }
            let (base, code, index) = self.locate(machine.pc).ok_or(SimError::UnknownPc(machine.pc))?;
            self.step(machine, hooks, base, code, index)?;
        }
        Err(SimError::StepLimit(self.max_steps))
    }

    fn label_pc(base: u64, code: &StubCode, label: LabelName) -> Result<u64, SimError> {
        let index = code.label_index(label).ok_or(SimError::UnknownPc(base))?;
        Ok(base + index as u64 * StubCode::SIMULATED_INSTRUCTION_SIZE)
    }

    fn entry_pc(&self, entry: EntryId) -> Result<u64, SimError> {
        self.entries.get(&entry).copied().ok_or(SimError::UnknownEntry(entry))
    }

    fn step(&self, machine: &mut Machine, hooks: &mut dyn RuntimeHooks, base: u64, code: &StubCode, index: usize) -> Result<(), SimError> {
        let instruction = &code.instructions[index];
        let next_pc = machine.pc + StubCode::SIMULATED_INSTRUCTION_SIZE;
        trace!("{}+{}: {:?}", code.name, index, instruction);
        machine.pc = next_pc;
        match instruction {
            IRInstr::Label(_) => {}
            IRInstr::Const64bit { to, const_ } => machine.set_gpr(*to, *const_),
            IRInstr::CopyRegister { from, to } => machine.set_gpr(*to, machine.gpr(*from)),
            IRInstr::Load { to, from } => {
                let value = machine.read(machine.address(*from))?;
                machine.set_gpr(*to, value);
            }
            IRInstr::Store { from, to } => machine.write(machine.address(*to), machine.gpr(*from))?,
            IRInstr::StoreConst { const_, to } => machine.write(machine.address(*to), *const_ as i64 as u64)?,
            IRInstr::LoadFloat { to, from } => {
                let value = machine.read(machine.address(*from))?;
                machine.set_fpr(*to, value);
            }
            IRInstr::StoreFloat { from, to } => machine.write(machine.address(*to), machine.fpr(*from))?,
            IRInstr::AddConst { res, const_ } => machine.set_gpr(*res, machine.gpr(*res).wrapping_add(*const_ as i64 as u64)),
            IRInstr::Add { res, a } => machine.set_gpr(*res, machine.gpr(*res).wrapping_add(machine.gpr(*a))),
            IRInstr::Sub { res, to_subtract } => machine.set_gpr(*res, machine.gpr(*res).wrapping_sub(machine.gpr(*to_subtract))),
            IRInstr::LoadLabel { label, to } => machine.set_gpr(*to, Self::label_pc(base, code, *label)?),
            IRInstr::LoadEntry { entry, to } => machine.set_gpr(*to, self.entry_pc(*entry)?),
            IRInstr::BranchToLabel { label } => machine.pc = Self::label_pc(base, code, *label)?,
            IRInstr::BranchZero { a, label } => {
                if machine.gpr(*a) == 0 {
                    machine.pc = Self::label_pc(base, code, *label)?;
                }
            }
            IRInstr::BranchNotZero { a, label } => {
                if machine.gpr(*a) != 0 {
                    machine.pc = Self::label_pc(base, code, *label)?;
                }
            }
            IRInstr::BranchEqualConst { a, const_, label } => {
                if machine.gpr(*a) == *const_ as i64 as u64 {
                    machine.pc = Self::label_pc(base, code, *label)?;
                }
            }
            IRInstr::BranchNotEqualConst { a, const_, label } => {
                if machine.gpr(*a) != *const_ as i64 as u64 {
                    machine.pc = Self::label_pc(base, code, *label)?;
                }
            }
            IRInstr::JumpRegister { target } => machine.pc = machine.gpr(*target),
            IRInstr::JumpEntry { entry, scratch } => {
                let target = self.entry_pc(*entry)?;
                machine.set_gpr(*scratch, target);
                machine.pc = target;
            }
            IRInstr::CallRegister { target } => {
                let target = machine.gpr(*target);
                machine.prepare_call(target, next_pc)?;
            }
            IRInstr::CallRuntime { target, .. } => {
                // the callee sees the stack a real call would leave, and returns right away
                machine.prepare_call(next_pc, next_pc)?;
                let result = hooks.call(*target, machine)?;
                machine.do_return()?;
                if self.poison_after_calls {
                    machine.poison_caller_saved();
                    if let Some(lr) = machine.arch.link_register() {
                        machine.set_gpr(lr, next_pc);
                    }
                }
                if let Some(result) = result {
                    machine.set_gpr(machine.arch.roles.result, result);
                }
                machine.pc = next_pc;
            }
            IRInstr::EnterFrame => machine.enter_frame()?,
            IRInstr::LeaveFrame => machine.leave_frame()?,
            IRInstr::PushReturnAddress { from } => {
                let value = machine.gpr(*from);
                match machine.arch.return_address_style {
                    ReturnAddressStyle::Pushed => machine.push(value)?,
                    ReturnAddressStyle::LinkRegister(lr) => machine.set_gpr(lr, value),
                }
            }
            IRInstr::PopReturnAddress { to } => {
                let value = match machine.arch.return_address_style {
                    ReturnAddressStyle::Pushed => machine.pop()?,
                    ReturnAddressStyle::LinkRegister(lr) => machine.gpr(lr),
                };
                machine.set_gpr(*to, value);
            }
            IRInstr::DropReturnAddress => {
                if machine.arch.return_address_style == ReturnAddressStyle::Pushed {
                    machine.pop()?;
                }
            }
            IRInstr::Return => machine.do_return()?,
            IRInstr::BangStack { bytes, shadow_pages, page_size, .. } => {
                if let Some(stack) = machine.memory.stack() {
                    stack.check_bang(machine.sp(), machine.gpr(*bytes), *shadow_pages as u64, *page_size as u64)?;
                }
            }
            IRInstr::Stop { reason } => return Err(SimError::Stop(reason)),
        }
        Ok(())
    }
}
