// stub ir: instructions, the assembler stubs are written against, runtime call targets,
// lowering to x86-64 and a simulator that runs stubs for either architecture.

use thiserror::Error;

use another_jit_vm::{Arch, ArchDescription};
use gc_memory_layout_common::code_cache::CodeCacheError;
use gc_memory_layout_common::oop_map::OopMapError;
use stub_ids::EntryId;

pub use assembler::StubAssembler;
pub use compiler::{Address, IRInstr, IRLabel, LabelName};
pub use runtime_entries::{RuntimeAddresses, RuntimeEntry};
pub use stub_code::{LaidOutCode, StubCode};

pub mod compiler;
pub mod assembler;
pub mod runtime_entries;
pub mod stub_code;
pub mod ir_to_native;
pub mod simulator;
#[cfg(test)]
pub mod tests;

#[derive(Error, Debug)]
pub enum StubGenError {
    #[error("failed to encode: {0}")]
    Iced(#[from] iced_x86::IcedError),
    #[error("label {label:?} is used in {stub} but never bound")]
    UnboundLabel { label: LabelName, stub: String },
    #[error(transparent)]
    OopMap(#[from] OopMapError),
    #[error("entry {0:?} has not been generated yet")]
    UnknownEntry(EntryId),
    #[error("runtime entry {0:?} has no address")]
    UnknownRuntimeEntry(RuntimeEntry),
    #[error("{0:?} has no x86-64 encoding")]
    UnencodableRegister(String),
    #[error("{0} has no slot in the register save area")]
    NotSaved(&'static str),
    #[error("no machine code lowering for {0}")]
    UnsupportedLoweringArch(Arch),
    #[error(transparent)]
    CodeCache(#[from] CodeCacheError),
}

/// Knobs for stub generation. Debug aids default to on in debug builds.
#[derive(Copy, Clone, Debug)]
pub struct StubGenConfig {
    pub arch: Arch,
    pub debug_checks: bool,
    pub bang_stack_in_unroll: bool,
    pub poison_unroll_registers: bool,
    pub jvmci_uncommon_trap_entries: bool,
    pub stack_shadow_pages: u32,
    pub page_size: u32,
}

impl Default for StubGenConfig {
    fn default() -> Self {
        Self {
            arch: Arch::host().unwrap_or(Arch::X86_64),
            debug_checks: cfg!(debug_assertions),
            bang_stack_in_unroll: cfg!(debug_assertions),
            poison_unroll_registers: cfg!(debug_assertions),
            jvmci_uncommon_trap_entries: false,
            stack_shadow_pages: 20,
            page_size: 4096,
        }
    }
}

impl StubGenConfig {
    pub fn for_arch(arch: Arch) -> Self {
        Self { arch, ..Default::default() }
    }

    pub fn arch_description(&self) -> &'static ArchDescription {
        self.arch.description()
    }
}

/// Written to dead registers so stale reads stand out.
pub const POISON: u64 = 0xdead_dead_dead_dead;
