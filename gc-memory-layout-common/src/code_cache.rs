use std::ops::Range;
use std::sync::Arc;

use rangemap::RangeMap;
use thiserror::Error;

use crate::code_blob::CodeBlob;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CodeCacheError {
    #[error("blob {name} at {start:#x}..{end:#x} overlaps already registered code")]
    Overlap { name: String, start: u64, end: u64 },
    #[error("blob {0} is empty")]
    Empty(String),
}

/// Maps any pc to the code blob containing it. Also knows where the interpreter lives.
#[derive(Default)]
pub struct CodeCache {
    by_pc: RangeMap<u64, usize>,
    blobs: Vec<Arc<CodeBlob>>,
    interpreter: Option<Range<u64>>,
}

impl CodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, blob: CodeBlob) -> Result<Arc<CodeBlob>, CodeCacheError> {
        let range = blob.code_range();
        if range.is_empty() {
            return Err(CodeCacheError::Empty(blob.name));
        }
        let overlaps_interpreter = self.interpreter.as_ref().map(|interpreter| interpreter.start < range.end && range.start < interpreter.end).unwrap_or(false);
        if self.by_pc.overlaps(&range) || overlaps_interpreter {
            return Err(CodeCacheError::Overlap { name: blob.name, start: range.start, end: range.end });
        }
        log::debug!("registered {} at {:#x}..{:#x}", blob.name, range.start, range.end);
        let blob = Arc::new(blob);
        self.by_pc.insert(range, self.blobs.len());
        self.blobs.push(blob.clone());
        Ok(blob)
    }

    pub fn set_interpreter_range(&mut self, range: Range<u64>) -> Result<(), CodeCacheError> {
        if self.by_pc.overlaps(&range) {
            return Err(CodeCacheError::Overlap { name: "interpreter".to_string(), start: range.start, end: range.end });
        }
        self.interpreter = Some(range);
        Ok(())
    }

    pub fn find_blob(&self, pc: u64) -> Option<&Arc<CodeBlob>> {
        self.by_pc.get(&pc).map(|index| &self.blobs[*index])
    }

    pub fn is_interpreter_pc(&self, pc: u64) -> bool {
        self.interpreter.as_ref().map(|range| range.contains(&pc)).unwrap_or(false)
    }

    /// Whether `pc` is inside any code this cache knows about.
    pub fn contains(&self, pc: u64) -> bool {
        self.is_interpreter_pc(pc) || self.by_pc.contains_key(&pc)
    }

    pub fn blobs(&self) -> impl Iterator<Item=&Arc<CodeBlob>> {
        self.blobs.iter()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
