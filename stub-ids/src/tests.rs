use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};

use crate::{BlobId, ENTRY_RECORDS, EntryId, get_blob_name, get_stub_name, STUB_RECORDS, StubGroup, StubId};

#[test]
fn every_id_round_trips_through_its_group() {
    for group in StubGroup::iter() {
        for (local, stub) in group.stubs().enumerate() {
            assert_eq!(stub.local_index(), local);
            assert_eq!(group.stub_at(local), Some(stub));
            assert_eq!(stub.group(), group);
        }
        assert_eq!(group.stub_at(group.stub_count()), None);
        for (local, blob) in group.blobs().enumerate() {
            assert_eq!(group.blob_at(local), Some(blob));
            assert_eq!(blob.local_index(), local);
        }
        for (local, entry) in group.entries().enumerate() {
            assert_eq!(group.entry_at(local), Some(entry));
            assert_eq!(entry.local_index(), local);
        }
    }
    let total: usize = StubGroup::iter().map(|group| group.stub_count()).sum();
    assert_eq!(total, StubId::COUNT);
}

#[test]
fn hierarchy_is_consistent() {
    for blob in BlobId::iter() {
        let stubs = blob.stubs().collect_vec();
        assert!(!stubs.is_empty());
        assert_eq!(stubs.first().copied(), Some(blob.base_stub()));
        assert_eq!(stubs.last().copied(), Some(blob.max_stub()));
        for stub in stubs {
            assert_eq!(stub.blob(), blob);
            for entry in stub.entries() {
                assert_eq!(entry.stub(), stub);
                assert_eq!(entry.blob(), blob);
            }
        }
    }
    let reached = BlobId::iter().flat_map(|blob| blob.entries().collect_vec()).collect_vec();
    assert_eq!(reached, EntryId::iter().collect_vec());
    assert_eq!(ENTRY_RECORDS.len(), EntryId::COUNT);
    assert_eq!(STUB_RECORDS.len(), StubId::COUNT);
}

#[test]
fn groups_appear_in_declaration_order() {
    let groups = StubId::iter().map(|stub| stub.group()).dedup().collect_vec();
    assert_eq!(groups, StubGroup::iter().collect_vec());
}

#[test]
fn deopt_blob_entries() {
    let stub = StubId::Deoptimization;
    assert_eq!(stub.entry_count(), 6);
    assert_eq!(stub.base_entry(), EntryId::DeoptUnpack);
    assert_eq!(stub.max_entry(), EntryId::DeoptImplicitExceptionUncommonTrap);
    assert_eq!(get_blob_name(BlobId::DeoptBlob), "deopt_blob");
    assert_eq!(EntryId::DeoptUnpackWithExceptionInTls.name(), "unpack_with_exception_in_tls");
}

#[test]
fn names_resolve() {
    assert_eq!(get_stub_name(StubId::C1HandleExceptionFromCallee), "handle_exception_from_callee");
    assert_eq!(StubId::from_name("handle_exception_nofpu"), Some(StubId::C1HandleExceptionNoFpu));
    // declared in two groups, only the qualified name is unambiguous
    assert_eq!(StubId::from_name("forward_exception"), None);
    assert_eq!(StubId::from_name("c1.forward_exception"), Some(StubId::C1ForwardException));
    assert_eq!(StubId::from_name("stubgen.forward_exception"), Some(StubId::StubGenForwardException));
    assert_eq!(BlobId::from_name("uncommon_trap_blob"), Some(BlobId::C2UncommonTrapBlob));
    assert_eq!(StubId::from_name("no_such_stub"), None);
}
