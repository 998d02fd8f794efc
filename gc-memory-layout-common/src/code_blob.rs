use std::ops::Range;

use stub_ids::BlobId;

use crate::oop_map::{OopMap, OopMapSet};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CodeBlobKind {
    RuntimeStub,
    DeoptimizationBlob,
    UncommonTrapBlob,
    /// frameless code, never the pc of a walkable frame
    BufferBlob,
    CallStub,
    Compiled,
    NativeWrapper,
}

/// A block of installed code and the metadata a stack walker needs about it.
#[derive(Clone, Debug)]
pub struct CodeBlob {
    pub name: String,
    pub blob_id: Option<BlobId>,
    pub kind: CodeBlobKind,
    pub code_begin: u64,
    pub code_size: u64,
    /// frame size in words, return address included. None for frameless blobs.
    pub frame_size_words: Option<usize>,
    /// code offset from which the frame is fully built
    pub frame_complete_offset: Option<u32>,
    pub caller_must_gc_arguments: bool,
    pub oop_maps: OopMapSet,
    pub deopt_handler_offset: Option<u32>,
    /// byte offset from the unextended sp where a deoptimized frame keeps its original pc
    pub orig_pc_offset: Option<i32>,
}

impl CodeBlob {
    pub fn new(name: impl Into<String>, kind: CodeBlobKind, code_begin: u64, code_size: u64) -> Self {
        Self {
            name: name.into(),
            blob_id: None,
            kind,
            code_begin,
            code_size,
            frame_size_words: None,
            frame_complete_offset: None,
            caller_must_gc_arguments: false,
            oop_maps: OopMapSet::new(),
            deopt_handler_offset: None,
            orig_pc_offset: None,
        }
    }

    pub fn code_range(&self) -> Range<u64> {
        self.code_begin..self.code_end()
    }

    pub fn code_end(&self) -> u64 {
        self.code_begin + self.code_size
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.code_range().contains(&pc)
    }

    pub fn offset_of(&self, pc: u64) -> Option<u32> {
        self.contains(pc).then(|| (pc - self.code_begin) as u32)
    }

    /// Whether a frame whose pc is `pc` has finished its prologue. Blobs that never
    /// recorded a completion point are complete everywhere.
    pub fn frame_complete_at(&self, pc: u64) -> bool {
        match (self.offset_of(pc), self.frame_complete_offset) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(offset), Some(complete)) => offset >= complete,
        }
    }

    pub fn is_frameless(&self) -> bool {
        self.frame_size_words.is_none()
    }

    pub fn oop_map_for_return_pc(&self, return_pc: u64) -> Option<&OopMap> {
        self.oop_maps.find_map_at_offset(self.offset_of(return_pc)?)
    }

    pub fn deopt_handler_pc(&self) -> Option<u64> {
        self.deopt_handler_offset.map(|offset| self.code_begin + offset as u64)
    }

    pub fn is_deopt_handler_pc(&self, pc: u64) -> bool {
        self.deopt_handler_pc() == Some(pc)
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.kind, CodeBlobKind::Compiled)
    }
}
