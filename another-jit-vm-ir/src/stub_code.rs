use std::collections::HashMap;

use itertools::Itertools;

use another_jit_vm::Arch;
use gc_memory_layout_common::code_blob::{CodeBlob, CodeBlobKind};
use gc_memory_layout_common::oop_map::{OopMap, OopMapSet};
use stub_ids::{BlobId, EntryId, StubId};

use crate::{IRInstr, LabelName, StubGenError};

/// The finished ir of one stub, before it is given an address.
#[derive(Clone, Debug)]
pub struct StubCode {
    pub name: String,
    pub stub_id: Option<StubId>,
    pub arch: Arch,
    pub instructions: Vec<IRInstr>,
    /// instruction index each label is bound to
    pub labels: HashMap<LabelName, usize>,
    pub entries: Vec<(EntryId, LabelName)>,
    pub oop_maps: Vec<(LabelName, OopMap)>,
    pub frame_size_words: Option<usize>,
    pub frame_complete: Option<LabelName>,
    pub caller_must_gc_arguments: bool,
}

/// Where each label of a stub ended up, and the machine code if it was lowered.
#[derive(Clone, Debug)]
pub struct LaidOutCode {
    pub size: u64,
    pub label_offsets: HashMap<LabelName, u32>,
    pub bytes: Option<Vec<u8>>,
}

impl StubCode {
    /// Every ir instruction takes this many bytes when stubs run in the simulator.
    pub const SIMULATED_INSTRUCTION_SIZE: u64 = 4;

    pub fn simulated_layout(&self) -> LaidOutCode {
        let label_offsets = self.labels.iter()
            .map(|(label, index)| (*label, (*index as u64 * Self::SIMULATED_INSTRUCTION_SIZE) as u32))
            .collect();
        LaidOutCode {
            size: self.instructions.len() as u64 * Self::SIMULATED_INSTRUCTION_SIZE,
            label_offsets,
            bytes: None,
        }
    }

    pub fn label_index(&self, label: LabelName) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    pub fn entry_label(&self, entry: EntryId) -> Option<LabelName> {
        self.entries.iter().find(|(id, _)| *id == entry).map(|(_, label)| *label)
    }

    /// Entries of other stubs this stub jumps to or loads.
    pub fn referenced_entries(&self) -> Vec<EntryId> {
        self.instructions.iter().filter_map(|instruction| instruction.entry_target()).unique().collect()
    }

    fn offset_of(&self, layout: &LaidOutCode, label: LabelName) -> Result<u32, StubGenError> {
        layout.label_offsets.get(&label).copied().ok_or_else(|| StubGenError::UnboundLabel { label, stub: self.name.clone() })
    }

    pub fn entry_addresses(&self, base: u64, layout: &LaidOutCode) -> Result<Vec<(EntryId, u64)>, StubGenError> {
        self.entries.iter()
            .map(|(entry, label)| Ok((*entry, base + self.offset_of(layout, *label)? as u64)))
            .collect()
    }

    pub fn to_code_blob(&self, kind: CodeBlobKind, blob_id: Option<BlobId>, base: u64, layout: &LaidOutCode) -> Result<CodeBlob, StubGenError> {
        let mut oop_maps = OopMapSet::new();
        for (label, map) in &self.oop_maps {
            oop_maps.add_gc_map(self.offset_of(layout, *label)?, map.clone())?;
        }
        let mut blob = CodeBlob::new(self.name.clone(), kind, base, layout.size);
        blob.blob_id = blob_id;
        blob.frame_size_words = self.frame_size_words;
        blob.frame_complete_offset = self.frame_complete.map(|label| self.offset_of(layout, label)).transpose()?;
        blob.caller_must_gc_arguments = self.caller_must_gc_arguments;
        blob.oop_maps = oop_maps;
        Ok(blob)
    }
}
