use std::collections::HashMap;
use std::sync::Arc;

use gc_memory_layout_common::code_blob::CodeBlob;
use gc_memory_layout_common::oop_map::VMReg;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FrameKind {
    /// the call stub, where native code entered java
    Entry,
    Interpreted,
    Compiled,
    Native,
    /// a compiled frame whose return address points at its deopt handler
    Deoptimized,
    /// a runtime stub or blob with a frame of its own
    Stub,
}

/// One activation. Only [`crate::FrameWalker`] makes these, after classifying the pc.
#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) sp: u64,
    pub(crate) unextended_sp: u64,
    pub(crate) fp: u64,
    pub(crate) pc: u64,
    pub(crate) kind: FrameKind,
    pub(crate) original_pc: Option<u64>,
    pub(crate) blob: Option<Arc<CodeBlob>>,
}

impl Frame {
    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn unextended_sp(&self) -> u64 {
        self.unextended_sp
    }

    pub fn fp(&self) -> u64 {
        self.fp
    }

    /// The raw pc. For a deoptimized frame this is the deopt handler.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn original_pc(&self) -> Option<u64> {
        self.original_pc
    }

    /// The pc the frame was executing at before any deoptimization patched it.
    pub fn real_pc(&self) -> u64 {
        self.original_pc.unwrap_or(self.pc)
    }

    pub fn blob(&self) -> Option<&Arc<CodeBlob>> {
        self.blob.as_ref()
    }

    pub fn is_entry_frame(&self) -> bool {
        self.kind == FrameKind::Entry
    }

    pub fn is_interpreted_frame(&self) -> bool {
        self.kind == FrameKind::Interpreted
    }

    pub fn is_compiled_frame(&self) -> bool {
        matches!(self.kind, FrameKind::Compiled | FrameKind::Deoptimized)
    }

    pub fn is_deoptimized_frame(&self) -> bool {
        self.kind == FrameKind::Deoptimized
    }
}

/// Where the walk found the callee saved registers of the frames above, so that the
/// collector can update them in place.
#[derive(Clone, Debug, Default)]
pub struct RegisterMap {
    include_argument_oops: bool,
    update_map: bool,
    locations: HashMap<VMReg, u64>,
}

impl RegisterMap {
    pub fn new(update_map: bool) -> Self {
        Self {
            include_argument_oops: false,
            update_map,
            locations: HashMap::new(),
        }
    }

    pub fn update_map(&self) -> bool {
        self.update_map
    }

    pub fn include_argument_oops(&self) -> bool {
        self.include_argument_oops
    }

    pub fn set_include_argument_oops(&mut self, include: bool) {
        self.include_argument_oops = include;
    }

    pub fn location(&self, register: VMReg) -> Option<u64> {
        self.locations.get(&register).copied()
    }

    pub fn set_location(&mut self, register: VMReg, address: u64) {
        debug_assert!(self.update_map, "location recorded in a map that is not updated");
        self.locations.insert(register, address);
    }

    pub fn clear(&mut self) {
        self.locations.clear();
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
