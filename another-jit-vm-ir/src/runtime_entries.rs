use std::collections::HashMap;

use num_derive::FromPrimitive;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

/// Runtime routines generated code may call. All take the current thread as first argument.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, FromPrimitive, EnumIter, IntoStaticStr)]
#[repr(u16)]
pub enum RuntimeEntry {
    /// handler for the exception in thread.exception_oop thrown at thread.exception_pc
    ExceptionHandlerForPc,
    /// (return_pc) -> handler of the frame that return_pc returns into
    ExceptionHandlerForReturnAddress,
    /// -> non zero when the method was deoptimized while patching
    AccessFieldPatching,
    LoadKlassPatching,
    LoadMirrorPatching,
    LoadAppendixPatching,
    /// (unpack_kind) -> unroll block
    FetchUnrollInfo,
    /// (trap_request, unpack_kind) -> unroll block
    UncommonTrap,
    /// (unpack_kind)
    UnpackFrames,
    /// (index, array)
    ThrowRangeCheckException,
    ThrowNullPointerException,
    ThrowDiv0Exception,
    /// (object)
    ThrowClassCastException,
    /// (klass) -> object in vm_result
    NewInstance,
    /// (object, lock)
    MonitorEnter,
}

pub struct RuntimeSignature {
    /// arguments after the thread
    pub args: usize,
    pub returns_value: bool,
}

impl RuntimeEntry {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn signature(&self) -> RuntimeSignature {
        let (args, returns_value) = match self {
            RuntimeEntry::ExceptionHandlerForPc => (0, true),
            RuntimeEntry::ExceptionHandlerForReturnAddress => (1, true),
            RuntimeEntry::AccessFieldPatching |
            RuntimeEntry::LoadKlassPatching |
            RuntimeEntry::LoadMirrorPatching |
            RuntimeEntry::LoadAppendixPatching => (0, true),
            RuntimeEntry::FetchUnrollInfo => (1, true),
            RuntimeEntry::UncommonTrap => (2, true),
            RuntimeEntry::UnpackFrames => (1, false),
            RuntimeEntry::ThrowRangeCheckException => (2, false),
            RuntimeEntry::ThrowNullPointerException |
            RuntimeEntry::ThrowDiv0Exception => (0, false),
            RuntimeEntry::ThrowClassCastException => (1, false),
            RuntimeEntry::NewInstance => (1, false),
            RuntimeEntry::MonitorEnter => (2, false),
        };
        RuntimeSignature { args, returns_value }
    }
}

/// Resolved addresses of the runtime routines, used when lowering to machine code.
#[derive(Clone, Debug, Default)]
pub struct RuntimeAddresses {
    addresses: HashMap<RuntimeEntry, u64>,
}

impl RuntimeAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, entry: RuntimeEntry, address: u64) {
        self.addresses.insert(entry, address);
    }

    pub fn get(&self, entry: RuntimeEntry) -> Option<u64> {
        self.addresses.get(&entry).copied()
    }

    /// Distinct made up addresses, for listings of code that will never run.
    pub fn symbolic(base: u64) -> Self {
        let addresses = RuntimeEntry::iter()
            .map(|entry| (entry, base + 0x100 * entry as u64))
            .collect();
        Self { addresses }
    }

    pub fn entry_at(&self, address: u64) -> Option<RuntimeEntry> {
        self.addresses.iter().find(|(_, entry_address)| **entry_address == address).map(|(entry, _)| *entry)
    }
}
