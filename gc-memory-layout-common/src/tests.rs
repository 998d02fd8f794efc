use another_jit_vm::{Arch, Gpr};
use another_jit_vm::saved_registers_utils::SavedRegister;
use strum::IntoEnumIterator;

use crate::code_blob::{CodeBlob, CodeBlobKind};
use crate::code_cache::{CodeCache, CodeCacheError};
use crate::frame_layout::{InterpreterFrameSlot, last_frame_adjust, size_activation};
use crate::oop_map::{OopMap, OopMapError, OopMapSet, OopMapValueKind, VMReg};

#[test]
fn oop_map_agrees_with_save_layout() {
    for arch in Arch::iter() {
        for save_fpu in [true, false] {
            let layout = arch.description().save_layout(save_fpu);
            let map = OopMap::from_save_layout(&layout, 0);
            for (register, slot) in map.callee_saved_slots() {
                let saved = match register {
                    VMReg::Register(gpr) => SavedRegister::Gpr(gpr),
                    VMReg::FloatRegister(fpr) => SavedRegister::Fpr(fpr),
                    VMReg::Stack(_) => panic!("stack slot recorded as a register"),
                };
                assert_eq!(layout.offset_of(saved), Some(slot as usize));
            }
            let expected = layout.saved_gprs().len() + layout.saved_fprs().len();
            assert_eq!(map.callee_saved_slots().count(), expected);
        }
    }
}

#[test]
fn oop_map_rejects_duplicates_and_out_of_frame_slots() {
    let mut map = OopMap::new(4, 1);
    map.set_oop(VMReg::Stack(2)).unwrap();
    assert_eq!(map.set_narrow_oop(VMReg::Stack(2)), Err(OopMapError::DuplicateLocation(VMReg::Stack(2))));
    // one argument slot past the frame is still addressable
    map.set_oop(VMReg::Stack(4)).unwrap();
    assert!(matches!(map.set_oop(VMReg::Stack(5)), Err(OopMapError::OutsideFrame { slot: 5, .. })));
    map.set_derived_oop(VMReg::Register(Gpr(3)), VMReg::Stack(2)).unwrap();
    assert_eq!(map.get(VMReg::Register(Gpr(3))), Some(OopMapValueKind::DerivedOop { base: VMReg::Stack(2) }));
    assert_eq!(map.oop_locations().count(), 2);

    let mut set = OopMapSet::new();
    set.add_gc_map(0x10, map.clone()).unwrap();
    assert_eq!(set.add_gc_map(0x10, map), Err(OopMapError::DuplicatePcOffset(0x10)));
    assert!(set.find_map_at_offset(0x11).is_none());
}

fn stub_blob(name: &str, begin: u64, size: u64) -> CodeBlob {
    let mut blob = CodeBlob::new(name, CodeBlobKind::RuntimeStub, begin, size);
    blob.frame_size_words = Some(4);
    blob.frame_complete_offset = Some(8);
    blob
}

#[test]
fn frame_complete_window() {
    let blob = stub_blob("stub", 0x1000, 0x40);
    assert!(!blob.frame_complete_at(0x1004));
    assert!(blob.frame_complete_at(0x1008));
    assert!(!blob.frame_complete_at(0x1040));
}

#[test]
fn code_cache_lookup_and_overlap() {
    let mut cache = CodeCache::new();
    cache.set_interpreter_range(0x10_0000..0x10_8000).unwrap();
    let first = cache.register(stub_blob("a", 0x1000, 0x40)).unwrap();
    cache.register(stub_blob("b", 0x1040, 0x40)).unwrap();
    assert!(matches!(cache.register(stub_blob("c", 0x1020, 0x10)), Err(CodeCacheError::Overlap { .. })));
    assert!(matches!(cache.register(stub_blob("d", 0x10_7000, 0x2000)), Err(CodeCacheError::Overlap { .. })));
    assert_eq!(cache.find_blob(0x103f).map(|blob| blob.name.as_str()), Some(first.name.as_str()));
    assert_eq!(cache.find_blob(0x1040).map(|blob| blob.name.as_str()), Some("b"));
    assert!(cache.find_blob(0x1080).is_none());
    assert!(cache.is_interpreter_pc(0x10_0010));
    assert!(cache.contains(0x10_0010));
    assert_eq!(cache.len(), 2);
}

#[test]
fn activation_sizes() {
    let x86 = Arch::X86_64.description();
    // 11 words of header, 3 non parameter locals, one monitor, 5 stack slots, rounded up to 2
    assert_eq!(size_activation(x86, 5, 1, 0, 1, 2, 5, true), 22);
    assert_eq!(size_activation(x86, 5, 1, 0, 1, 2, 5, false), 18);
    assert_eq!(last_frame_adjust(2, 5), 3);
    assert_eq!(last_frame_adjust(3, 3), 0);
    for arch in Arch::iter() {
        let description = arch.description();
        assert_eq!(size_activation(description, 0, 0, 0, 0, 0, 0, true) % description.stack_alignment_words, 0);
    }
}

#[test]
fn callees_with_fewer_locals_than_parameters_add_no_locals() {
    for arch in Arch::iter() {
        let description = arch.description();
        for is_top_frame in [true, false] {
            let without_locals = size_activation(description, 5, 1, 0, 1, 4, 4, is_top_frame);
            assert_eq!(size_activation(description, 5, 1, 0, 1, 4, 1, is_top_frame), without_locals);
            assert_eq!(size_activation(description, 5, 1, 0, 1, usize::MAX, 0, is_top_frame), without_locals);
        }
    }
    assert_eq!(last_frame_adjust(4, 1), 0);
}

#[test]
fn interpreter_slots_sit_below_the_link() {
    for arch in Arch::iter() {
        let description = arch.description();
        let fp = 0x8000;
        assert!(InterpreterFrameSlot::SenderSp.address(description, fp) < fp.wrapping_add((description.frame.link_offset * 8) as i64 as u64));
        assert!(InterpreterFrameSlot::InitialSp.address(description, fp) < InterpreterFrameSlot::Bcp.address(description, fp));
    }
}
