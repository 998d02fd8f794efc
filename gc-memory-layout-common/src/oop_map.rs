use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use thiserror::Error;

use another_jit_vm::{Fpr, Gpr};
use another_jit_vm::saved_registers_utils::{RegisterSaveLayout, SavedRegister};

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum OopMapError {
    #[error("location {0} already described by this oop map")]
    DuplicateLocation(VMReg),
    #[error("an oop map is already recorded at pc offset {0:#x}")]
    DuplicatePcOffset(u32),
    #[error("stack slot {slot} lies outside a frame of {frame_size_words} words")]
    OutsideFrame { slot: u32, frame_size_words: usize },
}

/// A location a value can live in at a call site. Stack slots are word offsets from the frame's sp.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub enum VMReg {
    Register(Gpr),
    FloatRegister(Fpr),
    Stack(u32),
}

impl Display for VMReg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VMReg::Register(gpr) => write!(f, "r{}", gpr.0),
            VMReg::FloatRegister(fpr) => write!(f, "f{}", fpr.0),
            VMReg::Stack(slot) => write!(f, "[sp+{}]", slot),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OopMapValueKind {
    Oop,
    NarrowOop,
    /// the location holds the caller's value of this register
    CalleeSaved(VMReg),
    DerivedOop { base: VMReg },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct OopMapValue {
    pub location: VMReg,
    pub kind: OopMapValueKind,
}

/// What lives where for one call site. A location appears at most once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OopMap {
    frame_size_words: usize,
    arg_count: usize,
    values: BTreeMap<VMReg, OopMapValueKind>,
}

impl OopMap {
    pub fn new(frame_size_words: usize, arg_count: usize) -> Self {
        Self {
            frame_size_words,
            arg_count,
            values: BTreeMap::new(),
        }
    }

    /// Describe every register a save area holds, at the offsets the save routine stores them.
    pub fn from_save_layout(layout: &RegisterSaveLayout, arg_count: usize) -> Self {
        let mut map = Self::new(layout.save_area_size(), arg_count);
        for (register, offset) in layout.slots() {
            let content = match register {
                SavedRegister::Gpr(gpr) => VMReg::Register(gpr),
                SavedRegister::Fpr(fpr) => VMReg::FloatRegister(fpr),
                SavedRegister::Link | SavedRegister::ReturnAddress => continue,
            };
            map.values.insert(VMReg::Stack(offset as u32), OopMapValueKind::CalleeSaved(content));
        }
        map
    }

    pub fn frame_size_words(&self) -> usize {
        self.frame_size_words
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    fn insert(&mut self, location: VMReg, kind: OopMapValueKind) -> Result<(), OopMapError> {
        if let VMReg::Stack(slot) = location {
            if slot as usize >= self.frame_size_words + self.arg_count {
                return Err(OopMapError::OutsideFrame { slot, frame_size_words: self.frame_size_words });
            }
        }
        if self.values.contains_key(&location) {
            return Err(OopMapError::DuplicateLocation(location));
        }
        self.values.insert(location, kind);
        Ok(())
    }

    pub fn set_oop(&mut self, location: VMReg) -> Result<(), OopMapError> {
        self.insert(location, OopMapValueKind::Oop)
    }

    pub fn set_narrow_oop(&mut self, location: VMReg) -> Result<(), OopMapError> {
        self.insert(location, OopMapValueKind::NarrowOop)
    }

    pub fn set_callee_saved(&mut self, location: VMReg, register: VMReg) -> Result<(), OopMapError> {
        self.insert(location, OopMapValueKind::CalleeSaved(register))
    }

    pub fn set_derived_oop(&mut self, location: VMReg, base: VMReg) -> Result<(), OopMapError> {
        self.insert(location, OopMapValueKind::DerivedOop { base })
    }

    pub fn values(&self) -> impl Iterator<Item=OopMapValue> + '_ {
        self.values.iter().map(|(location, kind)| OopMapValue { location: *location, kind: *kind })
    }

    pub fn get(&self, location: VMReg) -> Option<OopMapValueKind> {
        self.values.get(&location).copied()
    }

    /// (register, stack slot) for every callee saved register spilled to the stack.
    pub fn callee_saved_slots(&self) -> impl Iterator<Item=(VMReg, u32)> + '_ {
        self.values.iter().filter_map(|(location, kind)| match (location, kind) {
            (VMReg::Stack(slot), OopMapValueKind::CalleeSaved(register)) => Some((*register, *slot)),
            _ => None,
        })
    }

    pub fn oop_locations(&self) -> impl Iterator<Item=VMReg> + '_ {
        self.values.iter().filter_map(|(location, kind)| match kind {
            OopMapValueKind::Oop | OopMapValueKind::NarrowOop => Some(*location),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Oop maps of one code blob keyed by the code offset of the return address they describe.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OopMapSet {
    maps: BTreeMap<u32, OopMap>,
}

impl OopMapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gc_map(&mut self, pc_offset: u32, map: OopMap) -> Result<(), OopMapError> {
        if self.maps.contains_key(&pc_offset) {
            return Err(OopMapError::DuplicatePcOffset(pc_offset));
        }
        self.maps.insert(pc_offset, map);
        Ok(())
    }

    pub fn find_map_at_offset(&self, pc_offset: u32) -> Option<&OopMap> {
        self.maps.get(&pc_offset)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=(u32, &OopMap)> {
        self.maps.iter().map(|(offset, map)| (*offset, map))
    }
}
