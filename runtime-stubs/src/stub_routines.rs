use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use strum::IntoEnumIterator;

use another_jit_vm_ir::{LaidOutCode, RuntimeAddresses, StubCode, StubGenConfig, StubGenError};
use another_jit_vm_ir::ir_to_native::lower;
use another_jit_vm_ir::simulator::Simulator;
use gc_memory_layout_common::code_blob::{CodeBlob, CodeBlobKind};
use gc_memory_layout_common::code_cache::CodeCache;
use stub_ids::{EntryId, StubGroup, StubId};

use crate::call_stub::generate_call_stub;
use crate::deoptimization::{generate_deopt_blob, generate_uncommon_trap_blob};
use crate::exception::{ExceptionStubFlavor, generate_forward_exception, generate_handle_exception, generate_unwind_exception};
use crate::patching::{generate_patching, PatchingStub};
use crate::runtime_calls::{generate_monitorenter, generate_new_instance, generate_throw, ThrowStub};

const STUB_ALIGNMENT: u64 = 64;

/// How generated stubs get their bytes.
#[derive(Clone, Debug)]
pub enum Emission {
    /// ir only, laid out for [`Simulator`]
    Simulated,
    /// x86-64 machine code calling the runtime at the given addresses
    Native(RuntimeAddresses),
}

#[derive(Clone, Debug)]
pub struct GeneratedStub {
    pub code: Arc<StubCode>,
    pub layout: LaidOutCode,
    pub blob: Arc<CodeBlob>,
}

fn generate_stub(config: StubGenConfig, stub: StubId) -> Result<StubCode, StubGenError> {
    match stub {
        StubId::Deoptimization => generate_deopt_blob(config),
        StubId::C1ForwardException => generate_handle_exception(config, ExceptionStubFlavor::ForwardException),
        StubId::C1HandleException => generate_handle_exception(config, ExceptionStubFlavor::HandleException),
        StubId::C1HandleExceptionNoFpu => generate_handle_exception(config, ExceptionStubFlavor::HandleExceptionNoFpu),
        StubId::C1HandleExceptionFromCallee => generate_handle_exception(config, ExceptionStubFlavor::HandleExceptionFromCallee),
        StubId::C1UnwindException => generate_unwind_exception(config),
        StubId::C1AccessFieldPatching => generate_patching(config, PatchingStub::AccessField),
        StubId::C1LoadKlassPatching => generate_patching(config, PatchingStub::LoadKlass),
        StubId::C1LoadMirrorPatching => generate_patching(config, PatchingStub::LoadMirror),
        StubId::C1LoadAppendixPatching => generate_patching(config, PatchingStub::LoadAppendix),
        StubId::C1ThrowRangeCheckFailed => generate_throw(config, ThrowStub::RangeCheck),
        StubId::C1ThrowNullPointerException => generate_throw(config, ThrowStub::NullPointer),
        StubId::C1ThrowDiv0Exception => generate_throw(config, ThrowStub::Div0),
        StubId::C1ThrowClassCastException => generate_throw(config, ThrowStub::ClassCast),
        StubId::C1NewInstance => generate_new_instance(config),
        StubId::C1MonitorEnter => generate_monitorenter(config),
        StubId::C2UncommonTrap => generate_uncommon_trap_blob(config),
        StubId::StubGenForwardException => generate_forward_exception(config),
        StubId::StubGenCallStub => generate_call_stub(config),
    }
}

fn blob_kind(stub: StubId) -> CodeBlobKind {
    match stub {
        StubId::Deoptimization => CodeBlobKind::DeoptimizationBlob,
        StubId::C2UncommonTrap => CodeBlobKind::UncommonTrapBlob,
        StubId::StubGenCallStub => CodeBlobKind::CallStub,
        _ => CodeBlobKind::RuntimeStub,
    }
}

/// Stubs jump to entries of stubs generated before them: the initial stubs and the deopt blob
/// first, then forward_exception, which the other tier-1 stubs forward to.
pub fn generation_order() -> Vec<StubId> {
    let rank = |stub: &StubId| match stub.group() {
        StubGroup::StubGen => 0,
        StubGroup::Shared => 1,
        StubGroup::C1 if *stub == StubId::C1ForwardException => 2,
        StubGroup::C1 => 3,
        StubGroup::C2 => 4,
    };
    let mut order = StubId::iter().collect::<Vec<_>>();
    order.sort_by_key(|stub| (rank(stub), *stub));
    order
}

fn align_up(address: u64, alignment: u64) -> u64 {
    (address + alignment - 1) / alignment * alignment
}

/// Every generated stub, the code cache they are registered in, and the address of every entry.
pub struct StubRoutines {
    config: StubGenConfig,
    simulated: bool,
    code_cache: CodeCache,
    stubs: Vec<GeneratedStub>,
    entries: HashMap<EntryId, u64>,
}

impl StubRoutines {
    /// Generate all stubs, placed one after another from `base`.
    pub fn generate(config: StubGenConfig, emission: Emission, base: u64) -> Result<Self, StubGenError> {
        let mut routines = Self {
            config,
            simulated: matches!(emission, Emission::Simulated),
            code_cache: CodeCache::new(),
            stubs: vec![],
            entries: HashMap::new(),
        };
        let mut next = base;
        for stub in generation_order() {
            let code = generate_stub(config, stub)?;
            let layout = match &emission {
                Emission::Simulated => code.simulated_layout(),
                Emission::Native(runtime) => lower(&code, next, &routines.entries, runtime)?,
            };
            routines.entries.extend(code.entry_addresses(next, &layout)?);
            let blob = routines.code_cache.register(code.to_code_blob(blob_kind(stub), Some(stub.blob()), next, &layout)?)?;
            debug!("generated {} ({}) at {:#x}: {} bytes, {} entries, {} oop maps",
                code.name, stub.blob().name(), next, layout.size, code.entries.len(), blob.oop_maps.len());
            next = align_up(next + layout.size.max(1), STUB_ALIGNMENT);
            routines.stubs.push(GeneratedStub { code: Arc::new(code), layout, blob });
        }
        Ok(routines)
    }

    pub fn config(&self) -> &StubGenConfig {
        &self.config
    }

    pub fn entry(&self, entry: EntryId) -> Option<u64> {
        self.entries.get(&entry).copied()
    }

    pub fn entries(&self) -> &HashMap<EntryId, u64> {
        &self.entries
    }

    pub fn stubs(&self) -> &[GeneratedStub] {
        &self.stubs
    }

    pub fn stub(&self, stub: StubId) -> Option<&GeneratedStub> {
        self.stubs.iter().find(|generated| generated.code.stub_id == Some(stub))
    }

    pub fn code_cache(&self) -> &CodeCache {
        &self.code_cache
    }

    pub fn code_cache_mut(&mut self) -> &mut CodeCache {
        &mut self.code_cache
    }

    /// Make every stub runnable in `simulator`, at the address it was generated for.
    pub fn install(&self, simulator: &mut Simulator) {
        debug_assert!(self.simulated, "machine code stubs cannot be simulated");
        for stub in &self.stubs {
            simulator.install(stub.blob.code_begin, stub.code.clone());
        }
    }
}
