use std::mem::size_of;

use memoffset::offset_of;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert_eq;
use thiserror::Error;

use another_jit_vm::{ArchDescription, WORD_SIZE};
use another_jit_vm::stack::{MemoryFault, WordMemory};
use gc_memory_layout_common::frame_layout::{last_frame_adjust, MethodShape, size_activation};

/// How the interpreter continues in the top rebuilt frame. The values are passed to the
/// runtime as is.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, FromPrimitive)]
#[repr(i32)]
pub enum UnpackKind {
    /// continue after the instruction that deoptimized
    Deopt = 0,
    /// an exception is in flight and is delivered in the top frame
    Exception = 1,
    UncommonTrap = 2,
    /// execute the instruction again
    Reexecute = 3,
}

impl UnpackKind {
    pub fn from_word(word: u64) -> Option<Self> {
        UnpackKind::from_i64(word as i64)
    }
}

/// The unroll block as generated code reads it. The two arrays live elsewhere.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct RawUnrollBlock {
    /// bytes, return address and saved fp included
    pub size_of_deoptimized_frame: u64,
    /// bytes the caller grows by for the outermost frame's extra locals
    pub caller_adjustment: u64,
    pub number_of_frames: u64,
    /// all frame sizes plus the caller adjustment, for banging
    pub total_frame_sizes: u64,
    pub unpack_kind: u64,
    /// address of number_of_frames frame sizes in bytes
    pub frame_sizes: u64,
    /// address of number_of_frames + 1 return pcs
    pub frame_pcs: u64,
    pub initial_fp: u64,
}

pub const SIZE_OF_DEOPTIMIZED_FRAME_OFFSET: i32 = offset_of!(RawUnrollBlock, size_of_deoptimized_frame) as i32;
pub const CALLER_ADJUSTMENT_OFFSET: i32 = offset_of!(RawUnrollBlock, caller_adjustment) as i32;
pub const NUMBER_OF_FRAMES_OFFSET: i32 = offset_of!(RawUnrollBlock, number_of_frames) as i32;
pub const TOTAL_FRAME_SIZES_OFFSET: i32 = offset_of!(RawUnrollBlock, total_frame_sizes) as i32;
pub const UNPACK_KIND_OFFSET: i32 = offset_of!(RawUnrollBlock, unpack_kind) as i32;
pub const FRAME_SIZES_OFFSET: i32 = offset_of!(RawUnrollBlock, frame_sizes) as i32;
pub const FRAME_PCS_OFFSET: i32 = offset_of!(RawUnrollBlock, frame_pcs) as i32;
pub const INITIAL_FP_OFFSET: i32 = offset_of!(RawUnrollBlock, initial_fp) as i32;

const RAW_UNROLL_BLOCK_WORDS: usize = 8;

const_assert_eq!(size_of::<RawUnrollBlock>(), RAW_UNROLL_BLOCK_WORDS * WORD_SIZE);

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum UnrollBlockError {
    #[error("an unroll block needs at least one frame")]
    NoFrames,
    #[error("{frames} frames need {} return pcs, got {pcs}", frames + 1)]
    PcCountMismatch { frames: usize, pcs: usize },
    #[error("frame size {0} is not a whole number of words")]
    UnalignedFrameSize(u64),
    #[error("method has {max_locals} locals but {size_of_parameters} parameter words")]
    BadMethodShape { max_locals: usize, size_of_parameters: usize },
    #[error("frames of {frame_sizes:?} bytes plus {caller_adjustment} do not fit the address space")]
    FramesTooLarge { frame_sizes: Vec<u64>, caller_adjustment: u64 },
    #[error("unknown unpack kind {0}")]
    UnknownUnpackKind(u64),
    #[error(transparent)]
    Memory(#[from] MemoryFault),
}

/// One interpreter activation to rebuild, outermost first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VFrameShape {
    pub method: MethodShape,
    /// expression stack entries live at the call site, unused for the top frame
    pub temps: usize,
    pub monitors: usize,
    /// where the rebuilt frame continues in the interpreter
    pub continuation_pc: u64,
}

/// The plan for replacing one compiled frame by interpreter frames. Frame 0 is the outermost,
/// pushed first. `frame_pcs[i]` is the return address stored for frame i, so `frame_pcs[0]`
/// returns into the deoptimized frame's caller and the last pc is where the top frame resumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnrollBlock {
    size_of_deoptimized_frame: u64,
    caller_adjustment: u64,
    unpack_kind: UnpackKind,
    frame_sizes: Vec<u64>,
    frame_pcs: Vec<u64>,
    initial_fp: u64,
}

fn check_word_multiple(bytes: u64) -> Result<u64, UnrollBlockError> {
    if bytes % WORD_SIZE as u64 != 0 {
        return Err(UnrollBlockError::UnalignedFrameSize(bytes));
    }
    Ok(bytes)
}

impl UnrollBlock {
    pub fn new(size_of_deoptimized_frame: u64, caller_adjustment: u64, unpack_kind: UnpackKind,
               frame_sizes: Vec<u64>, frame_pcs: Vec<u64>, initial_fp: u64) -> Result<Self, UnrollBlockError> {
        if frame_sizes.is_empty() {
            return Err(UnrollBlockError::NoFrames);
        }
        if frame_pcs.len() != frame_sizes.len() + 1 {
            return Err(UnrollBlockError::PcCountMismatch { frames: frame_sizes.len(), pcs: frame_pcs.len() });
        }
        check_word_multiple(size_of_deoptimized_frame)?;
        check_word_multiple(caller_adjustment)?;
        for size in &frame_sizes {
            // each frame holds at least its return address and saved fp
            if *size < 2 * WORD_SIZE as u64 {
                return Err(UnrollBlockError::UnalignedFrameSize(*size));
            }
            check_word_multiple(*size)?;
        }
        if frame_sizes.iter().try_fold(caller_adjustment, |total, size| total.checked_add(*size)).is_none() {
            return Err(UnrollBlockError::FramesTooLarge { frame_sizes, caller_adjustment });
        }
        Ok(Self {
            size_of_deoptimized_frame,
            caller_adjustment,
            unpack_kind,
            frame_sizes,
            frame_pcs,
            initial_fp,
        })
    }

    /// Size the interpreter frames for `vframes` with the interpreter's own formula.
    pub fn for_vframes(arch: &ArchDescription, unpack_kind: UnpackKind, size_of_deoptimized_frame: u64,
                       caller_pc: u64, initial_fp: u64, vframes: &[VFrameShape]) -> Result<Self, UnrollBlockError> {
        for vframe in vframes {
            if vframe.method.max_locals < vframe.method.size_of_parameters {
                return Err(UnrollBlockError::BadMethodShape {
                    max_locals: vframe.method.max_locals,
                    size_of_parameters: vframe.method.size_of_parameters,
                });
            }
        }
        let outermost = vframes.first().ok_or(UnrollBlockError::NoFrames)?;
        let word = WORD_SIZE as u64;
        let frame_sizes = vframes.iter().enumerate()
            .map(|(i, vframe)| {
                let is_top_frame = i + 1 == vframes.len();
                let (callee_params, callee_locals) = match vframes.get(i + 1) {
                    Some(callee) => (callee.method.size_of_parameters, callee.method.max_locals),
                    None => (0, 0),
                };
                size_activation(arch, vframe.method.max_stack, vframe.temps, 0, vframe.monitors,
                                callee_params, callee_locals, is_top_frame) as u64 * word
            })
            .collect();
        let caller_adjustment = last_frame_adjust(outermost.method.size_of_parameters, outermost.method.max_locals) as u64 * word;
        let frame_pcs = std::iter::once(caller_pc)
            .chain(vframes.iter().map(|vframe| vframe.continuation_pc))
            .collect();
        Self::new(size_of_deoptimized_frame, caller_adjustment, unpack_kind, frame_sizes, frame_pcs, initial_fp)
    }

    pub fn size_of_deoptimized_frame(&self) -> u64 {
        self.size_of_deoptimized_frame
    }

    pub fn caller_adjustment(&self) -> u64 {
        self.caller_adjustment
    }

    pub fn unpack_kind(&self) -> UnpackKind {
        self.unpack_kind
    }

    pub fn set_unpack_kind(&mut self, unpack_kind: UnpackKind) {
        self.unpack_kind = unpack_kind;
    }

    pub fn number_of_frames(&self) -> usize {
        self.frame_sizes.len()
    }

    pub fn frame_sizes(&self) -> &[u64] {
        &self.frame_sizes
    }

    pub fn frame_pcs(&self) -> &[u64] {
        &self.frame_pcs
    }

    pub fn initial_fp(&self) -> u64 {
        self.initial_fp
    }

    pub fn total_frame_sizes(&self) -> u64 {
        self.caller_adjustment + self.frame_sizes.iter().sum::<u64>()
    }

    /// Bytes `write_to` fills.
    pub fn size_in_bytes(&self) -> u64 {
        ((RAW_UNROLL_BLOCK_WORDS + self.frame_sizes.len() + self.frame_pcs.len()) * WORD_SIZE) as u64
    }

    fn raw(&self, base: u64) -> RawUnrollBlock {
        let frame_sizes = base + (RAW_UNROLL_BLOCK_WORDS * WORD_SIZE) as u64;
        RawUnrollBlock {
            size_of_deoptimized_frame: self.size_of_deoptimized_frame,
            caller_adjustment: self.caller_adjustment,
            number_of_frames: self.frame_sizes.len() as u64,
            total_frame_sizes: self.total_frame_sizes(),
            unpack_kind: self.unpack_kind as i32 as u64,
            frame_sizes,
            frame_pcs: frame_sizes + (self.frame_sizes.len() * WORD_SIZE) as u64,
            initial_fp: self.initial_fp,
        }
    }

    /// Lay the block out at `base`: the header, then the sizes, then the pcs.
    pub fn write_to(&self, memory: &mut dyn WordMemory, base: u64) -> Result<(), MemoryFault> {
        let raw = self.raw(base);
        let header = [
            (SIZE_OF_DEOPTIMIZED_FRAME_OFFSET, raw.size_of_deoptimized_frame),
            (CALLER_ADJUSTMENT_OFFSET, raw.caller_adjustment),
            (NUMBER_OF_FRAMES_OFFSET, raw.number_of_frames),
            (TOTAL_FRAME_SIZES_OFFSET, raw.total_frame_sizes),
            (UNPACK_KIND_OFFSET, raw.unpack_kind),
            (FRAME_SIZES_OFFSET, raw.frame_sizes),
            (FRAME_PCS_OFFSET, raw.frame_pcs),
            (INITIAL_FP_OFFSET, raw.initial_fp),
        ];
        for (offset, value) in header {
            memory.write_word(base + offset as u64, value)?;
        }
        for (i, size) in self.frame_sizes.iter().enumerate() {
            memory.write_word(raw.frame_sizes + (i * WORD_SIZE) as u64, *size)?;
        }
        for (i, pc) in self.frame_pcs.iter().enumerate() {
            memory.write_word(raw.frame_pcs + (i * WORD_SIZE) as u64, *pc)?;
        }
        Ok(())
    }

    pub fn read_from(memory: &dyn WordMemory, base: u64) -> Result<Self, UnrollBlockError> {
        let field = |offset: i32| memory.read_word(base + offset as u64);
        let number_of_frames = field(NUMBER_OF_FRAMES_OFFSET)? as usize;
        let unpack_kind_word = field(UNPACK_KIND_OFFSET)?;
        let unpack_kind = UnpackKind::from_word(unpack_kind_word).ok_or(UnrollBlockError::UnknownUnpackKind(unpack_kind_word))?;
        let frame_sizes_address = field(FRAME_SIZES_OFFSET)?;
        let frame_pcs_address = field(FRAME_PCS_OFFSET)?;
        let frame_sizes = (0..number_of_frames)
            .map(|i| memory.read_word(frame_sizes_address + (i * WORD_SIZE) as u64))
            .collect::<Result<Vec<_>, _>>()?;
        let frame_pcs = (0..=number_of_frames)
            .map(|i| memory.read_word(frame_pcs_address + (i * WORD_SIZE) as u64))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(field(SIZE_OF_DEOPTIMIZED_FRAME_OFFSET)?, field(CALLER_ADJUSTMENT_OFFSET)?, unpack_kind,
                  frame_sizes, frame_pcs, field(INITIAL_FP_OFFSET)?)
    }
}
