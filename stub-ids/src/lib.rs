// every generated stub, the blob it lives in and its entry points, declared once.
// ids of one group are contiguous, so global <-> group local translation is a subtraction.

use std::ops::Range;

use lazy_static::lazy_static;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use strum_macros::{Display, EnumCount, EnumIter};

#[cfg(test)]
pub mod tests;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, EnumIter, EnumCount, Display)]
pub enum StubGroup {
    #[strum(serialize = "shared")]
    Shared,
    #[strum(serialize = "c1")]
    C1,
    #[strum(serialize = "c2")]
    C2,
    #[strum(serialize = "stubgen")]
    StubGen,
}

impl StubGroup {
    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BlobRecord {
    pub id: BlobId,
    pub group: StubGroup,
    pub name: &'static str,
}

#[derive(Copy, Clone, Debug)]
pub struct StubRecord {
    pub id: StubId,
    pub blob: BlobId,
    pub name: &'static str,
}

#[derive(Copy, Clone, Debug)]
pub struct EntryRecord {
    pub id: EntryId,
    pub stub: StubId,
    pub name: &'static str,
}

macro_rules! declare_stubs {
    ($(group $group:ident {
        $(blob $blob:ident = $blob_name:literal {
            $(stub $stub:ident = $stub_name:literal {
                $(entry $entry:ident = $entry_name:literal),* $(,)?
            })*
        })*
    })*) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, FromPrimitive, EnumIter, EnumCount)]
        #[repr(u16)]
        pub enum BlobId {
            $($($blob,)*)*
        }

        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, FromPrimitive, EnumIter, EnumCount)]
        #[repr(u16)]
        pub enum StubId {
            $($($($stub,)*)*)*
        }

        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug, FromPrimitive, EnumIter, EnumCount)]
        #[repr(u16)]
        pub enum EntryId {
            $($($($($entry,)*)*)*)*
        }

        pub const BLOB_RECORDS: &[BlobRecord] = &[
            $($(BlobRecord { id: BlobId::$blob, group: StubGroup::$group, name: $blob_name },)*)*
        ];

        pub const STUB_RECORDS: &[StubRecord] = &[
            $($($(StubRecord { id: StubId::$stub, blob: BlobId::$blob, name: $stub_name },)*)*)*
        ];

        pub const ENTRY_RECORDS: &[EntryRecord] = &[
            $($($($(EntryRecord { id: EntryId::$entry, stub: StubId::$stub, name: $entry_name },)*)*)*)*
        ];
    };
}

declare_stubs! {
    group Shared {
        blob DeoptBlob = "deopt_blob" {
            stub Deoptimization = "deoptimization" {
                entry DeoptUnpack = "unpack",
                entry DeoptUnpackWithReexecution = "unpack_with_reexecution",
                entry DeoptUnpackWithException = "unpack_with_exception",
                entry DeoptUnpackWithExceptionInTls = "unpack_with_exception_in_tls",
                entry DeoptUncommonTrap = "uncommon_trap",
                entry DeoptImplicitExceptionUncommonTrap = "implicit_exception_uncommon_trap",
            }
        }
    }
    group C1 {
        blob C1ForwardExceptionBlob = "forward_exception Runtime1 stub" {
            stub C1ForwardException = "forward_exception" { entry C1ForwardException = "forward_exception" }
        }
        blob C1HandleExceptionBlob = "handle_exception Runtime1 stub" {
            stub C1HandleException = "handle_exception" { entry C1HandleException = "handle_exception" }
        }
        blob C1HandleExceptionNoFpuBlob = "handle_exception_nofpu Runtime1 stub" {
            stub C1HandleExceptionNoFpu = "handle_exception_nofpu" { entry C1HandleExceptionNoFpu = "handle_exception_nofpu" }
        }
        blob C1HandleExceptionFromCalleeBlob = "handle_exception_from_callee Runtime1 stub" {
            stub C1HandleExceptionFromCallee = "handle_exception_from_callee" { entry C1HandleExceptionFromCallee = "handle_exception_from_callee" }
        }
        blob C1UnwindExceptionBlob = "unwind_exception Runtime1 stub" {
            stub C1UnwindException = "unwind_exception" { entry C1UnwindException = "unwind_exception" }
        }
        blob C1AccessFieldPatchingBlob = "access_field_patching Runtime1 stub" {
            stub C1AccessFieldPatching = "access_field_patching" { entry C1AccessFieldPatching = "access_field_patching" }
        }
        blob C1LoadKlassPatchingBlob = "load_klass_patching Runtime1 stub" {
            stub C1LoadKlassPatching = "load_klass_patching" { entry C1LoadKlassPatching = "load_klass_patching" }
        }
        blob C1LoadMirrorPatchingBlob = "load_mirror_patching Runtime1 stub" {
            stub C1LoadMirrorPatching = "load_mirror_patching" { entry C1LoadMirrorPatching = "load_mirror_patching" }
        }
        blob C1LoadAppendixPatchingBlob = "load_appendix_patching Runtime1 stub" {
            stub C1LoadAppendixPatching = "load_appendix_patching" { entry C1LoadAppendixPatching = "load_appendix_patching" }
        }
        blob C1ThrowRangeCheckFailedBlob = "range_check_failed Runtime1 stub" {
            stub C1ThrowRangeCheckFailed = "range_check_failed" { entry C1ThrowRangeCheckFailed = "range_check_failed" }
        }
        blob C1ThrowNullPointerExceptionBlob = "throw_null_pointer_exception Runtime1 stub" {
            stub C1ThrowNullPointerException = "throw_null_pointer_exception" { entry C1ThrowNullPointerException = "throw_null_pointer_exception" }
        }
        blob C1ThrowDiv0ExceptionBlob = "throw_div0_exception Runtime1 stub" {
            stub C1ThrowDiv0Exception = "throw_div0_exception" { entry C1ThrowDiv0Exception = "throw_div0_exception" }
        }
        blob C1ThrowClassCastExceptionBlob = "throw_class_cast_exception Runtime1 stub" {
            stub C1ThrowClassCastException = "throw_class_cast_exception" { entry C1ThrowClassCastException = "throw_class_cast_exception" }
        }
        blob C1NewInstanceBlob = "new_instance Runtime1 stub" {
            stub C1NewInstance = "new_instance" { entry C1NewInstance = "new_instance" }
        }
        blob C1MonitorEnterBlob = "monitorenter Runtime1 stub" {
            stub C1MonitorEnter = "monitorenter" { entry C1MonitorEnter = "monitorenter" }
        }
    }
    group C2 {
        blob C2UncommonTrapBlob = "uncommon_trap_blob" {
            stub C2UncommonTrap = "uncommon_trap" { entry C2UncommonTrap = "uncommon_trap" }
        }
    }
    group StubGen {
        blob StubGenInitialBlob = "initial_stubs" {
            stub StubGenForwardException = "forward_exception" {
                entry StubGenForwardException = "forward_exception",
            }
            stub StubGenCallStub = "call_stub" {
                entry StubGenCallStub = "call_stub",
                entry StubGenCallStubReturnAddress = "call_stub_return_address",
            }
        }
    }
}

/// Id ranges of each group and each parent, checked once when first used.
pub struct StubRegistry {
    group_blobs: Vec<Range<u16>>,
    group_stubs: Vec<Range<u16>>,
    group_entries: Vec<Range<u16>>,
    blob_stubs: Vec<Range<u16>>,
    stub_entries: Vec<Range<u16>>,
}

fn contiguous_ranges<T: Copy + Eq>(count: usize, parents: impl Iterator<Item=(u16, T)>, parent_index: impl Fn(T) -> usize) -> Vec<Range<u16>> {
    let mut ranges: Vec<Option<Range<u16>>> = vec![None; count];
    for (child, parent) in parents {
        let range = &mut ranges[parent_index(parent)];
        match range {
            None => *range = Some(child..child + 1),
            Some(existing) => {
                assert_eq!(existing.end, child, "children of one parent must be declared contiguously");
                existing.end = child + 1;
            }
        }
    }
    ranges.into_iter().map(|range| range.unwrap_or(0..0)).collect()
}

impl StubRegistry {
    fn new() -> Self {
        use strum::EnumCount;
        let group_blobs = contiguous_ranges(StubGroup::COUNT, BLOB_RECORDS.iter().map(|record| (record.id as u16, record.group)), |group| group.index());
        let group_stubs = contiguous_ranges(StubGroup::COUNT, STUB_RECORDS.iter().map(|record| (record.id as u16, record.blob.group())), |group| group.index());
        let group_entries = contiguous_ranges(StubGroup::COUNT, ENTRY_RECORDS.iter().map(|record| (record.id as u16, record.stub.group())), |group| group.index());
        let blob_stubs = contiguous_ranges(BlobId::COUNT, STUB_RECORDS.iter().map(|record| (record.id as u16, record.blob)), |blob| blob as usize);
        let stub_entries = contiguous_ranges(StubId::COUNT, ENTRY_RECORDS.iter().map(|record| (record.id as u16, record.stub)), |stub| stub as usize);
        for (index, record) in BLOB_RECORDS.iter().enumerate() {
            assert_eq!(record.id as usize, index);
            assert!(!blob_stubs[index].is_empty(), "blob {} has no stubs", record.name);
        }
        for (index, record) in STUB_RECORDS.iter().enumerate() {
            assert_eq!(record.id as usize, index);
            assert!(!stub_entries[index].is_empty(), "stub {} has no entries", record.name);
        }
        for (index, record) in ENTRY_RECORDS.iter().enumerate() {
            assert_eq!(record.id as usize, index);
        }
        Self {
            group_blobs,
            group_stubs,
            group_entries,
            blob_stubs,
            stub_entries,
        }
    }
}

lazy_static! {
    pub static ref STUB_REGISTRY: StubRegistry = StubRegistry::new();
}

pub fn get_blob_name(id: BlobId) -> &'static str {
    id.name()
}

pub fn get_stub_name(id: StubId) -> &'static str {
    id.name()
}

pub fn get_entry_name(id: EntryId) -> &'static str {
    id.name()
}

impl BlobId {
    pub fn name(&self) -> &'static str {
        BLOB_RECORDS[*self as usize].name
    }

    pub fn group(&self) -> StubGroup {
        BLOB_RECORDS[*self as usize].group
    }

    pub fn stubs(&self) -> impl Iterator<Item=StubId> {
        STUB_REGISTRY.blob_stubs[*self as usize].clone().filter_map(StubId::from_u16)
    }

    pub fn base_stub(&self) -> StubId {
        STUB_RECORDS[STUB_REGISTRY.blob_stubs[*self as usize].start as usize].id
    }

    pub fn max_stub(&self) -> StubId {
        STUB_RECORDS[STUB_REGISTRY.blob_stubs[*self as usize].end as usize - 1].id
    }

    pub fn entries(&self) -> impl Iterator<Item=EntryId> {
        self.stubs().flat_map(|stub| stub.entries())
    }

    pub fn local_index(&self) -> usize {
        (*self as u16 - STUB_REGISTRY.group_blobs[self.group().index()].start) as usize
    }

    pub fn from_name(name: &str) -> Option<BlobId> {
        BLOB_RECORDS.iter().find(|record| record.name == name).map(|record| record.id)
    }
}

impl StubId {
    pub fn name(&self) -> &'static str {
        STUB_RECORDS[*self as usize].name
    }

    pub fn blob(&self) -> BlobId {
        STUB_RECORDS[*self as usize].blob
    }

    pub fn group(&self) -> StubGroup {
        self.blob().group()
    }

    pub fn entries(&self) -> impl Iterator<Item=EntryId> {
        STUB_REGISTRY.stub_entries[*self as usize].clone().filter_map(EntryId::from_u16)
    }

    pub fn base_entry(&self) -> EntryId {
        ENTRY_RECORDS[STUB_REGISTRY.stub_entries[*self as usize].start as usize].id
    }

    pub fn max_entry(&self) -> EntryId {
        ENTRY_RECORDS[STUB_REGISTRY.stub_entries[*self as usize].end as usize - 1].id
    }

    pub fn entry_count(&self) -> usize {
        STUB_REGISTRY.stub_entries[*self as usize].len()
    }

    /// Offset of this stub within its group.
    pub fn local_index(&self) -> usize {
        (*self as u16 - STUB_REGISTRY.group_stubs[self.group().index()].start) as usize
    }

    /// Stub with the given qualified `group.name`, or plain name when it is unique.
    pub fn from_name(name: &str) -> Option<StubId> {
        if let Some((group, stub)) = name.split_once('.') {
            return STUB_RECORDS.iter()
                .find(|record| record.name == stub && record.blob.group().to_string() == group)
                .map(|record| record.id);
        }
        let mut matching = STUB_RECORDS.iter().filter(|record| record.name == name);
        match (matching.next(), matching.next()) {
            (Some(record), None) => Some(record.id),
            _ => None,
        }
    }
}

impl EntryId {
    pub fn name(&self) -> &'static str {
        ENTRY_RECORDS[*self as usize].name
    }

    pub fn stub(&self) -> StubId {
        ENTRY_RECORDS[*self as usize].stub
    }

    pub fn blob(&self) -> BlobId {
        self.stub().blob()
    }

    pub fn group(&self) -> StubGroup {
        self.blob().group()
    }

    pub fn local_index(&self) -> usize {
        (*self as u16 - STUB_REGISTRY.group_entries[self.group().index()].start) as usize
    }
}

impl StubGroup {
    pub fn blobs(&self) -> impl Iterator<Item=BlobId> {
        STUB_REGISTRY.group_blobs[self.index()].clone().filter_map(BlobId::from_u16)
    }

    pub fn stubs(&self) -> impl Iterator<Item=StubId> {
        STUB_REGISTRY.group_stubs[self.index()].clone().filter_map(StubId::from_u16)
    }

    pub fn entries(&self) -> impl Iterator<Item=EntryId> {
        STUB_REGISTRY.group_entries[self.index()].clone().filter_map(EntryId::from_u16)
    }

    pub fn stub_count(&self) -> usize {
        STUB_REGISTRY.group_stubs[self.index()].len()
    }

    pub fn stub_at(&self, local_index: usize) -> Option<StubId> {
        let range = &STUB_REGISTRY.group_stubs[self.index()];
        if local_index >= range.len() {
            return None;
        }
        StubId::from_u16(range.start + local_index as u16)
    }

    pub fn blob_at(&self, local_index: usize) -> Option<BlobId> {
        let range = &STUB_REGISTRY.group_blobs[self.index()];
        if local_index >= range.len() {
            return None;
        }
        BlobId::from_u16(range.start + local_index as u16)
    }

    pub fn entry_at(&self, local_index: usize) -> Option<EntryId> {
        let range = &STUB_REGISTRY.group_entries[self.index()];
        if local_index >= range.len() {
            return None;
        }
        EntryId::from_u16(range.start + local_index as u16)
    }
}
