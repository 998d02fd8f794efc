use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use itertools::Itertools;
use rusty_fork::rusty_fork_test;
use strum::IntoEnumIterator;

use crate::{Arch, Gpr, WORD_SIZE};
use crate::code_modification::{decode_call_rel32, EditAction, encode_call_rel32, GlobalCodeEditingLock, PatchError, SpinPatchSite};
use crate::saved_registers_utils::SavedRegister;
use crate::stack::{OwnedNativeStack, StackBangError, StackBounds, StackOverflow, WordMemory};
use crate::thread_context::{JavaThreadContext, LAST_JAVA_FP_OFFSET, LAST_JAVA_PC_OFFSET, LAST_JAVA_SP_OFFSET, PENDING_EXCEPTION_OFFSET};

#[test]
fn save_area_sizes() {
    let x86 = Arch::X86_64.description();
    assert_eq!(x86.save_layout(true).save_area_size(), 32);
    assert_eq!(x86.save_layout(false).save_area_size(), 16);
    let riscv = Arch::Riscv64.description();
    assert_eq!(riscv.save_layout(true).save_area_size(), 60);
    assert_eq!(riscv.save_layout(false).save_area_size(), 28);
}

#[test]
fn eliding_fpu_shrinks_by_exactly_the_fpr_region() {
    for arch in Arch::iter() {
        let description = arch.description();
        let full = description.save_layout(true);
        let no_fpu = description.save_layout(false);
        let fpr_words = description.saved_fprs.len();
        assert_eq!(full.save_area_size() - full.padding_words() - fpr_words, no_fpu.save_area_size() - no_fpu.padding_words());
        assert!(no_fpu.saved_fprs().iter().all(|fpr| no_fpu.fpr_offset(*fpr).is_none()));
    }
}

#[test]
fn gpr_offsets_follow_placement_policy() {
    let x86 = Arch::X86_64.description();
    let full = x86.save_layout(true);
    let no_fpu = x86.save_layout(false);
    for gpr in x86.saved_gprs {
        assert_eq!(full.gpr_offset(*gpr).unwrap(), no_fpu.gpr_offset(*gpr).unwrap() + x86.saved_fprs.len());
    }
    let riscv = Arch::Riscv64.description();
    let full = riscv.save_layout(true);
    let no_fpu = riscv.save_layout(false);
    for gpr in riscv.saved_gprs {
        assert_eq!(full.gpr_offset(*gpr), no_fpu.gpr_offset(*gpr));
    }
}

#[test]
fn consecutive_registers_get_consecutive_slots() {
    for arch in Arch::iter() {
        let description = arch.description();
        let layout = description.save_layout(true);
        for (a, b) in description.saved_gprs.iter().tuple_windows() {
            assert!(a.0 < b.0);
            assert_eq!(layout.gpr_offset(*a).unwrap() + 1, layout.gpr_offset(*b).unwrap());
        }
        for (a, b) in description.saved_fprs.iter().tuple_windows() {
            assert_eq!(layout.fpr_offset(*a).unwrap() + 1, layout.fpr_offset(*b).unwrap());
        }
    }
}

#[test]
fn excluded_registers_have_no_slot() {
    let x86 = Arch::X86_64.description();
    let layout = x86.save_layout(true);
    assert_eq!(layout.gpr_offset(x86.roles.sp), None);
    assert_eq!(layout.gpr_offset(x86.roles.fp), None);
    assert_eq!(layout.gpr_offset(x86.roles.thread), None);
    let riscv = Arch::Riscv64.description();
    let layout = riscv.save_layout(false);
    for excluded in [Gpr(0), Gpr(1), Gpr(2), Gpr(3), Gpr(4), Gpr(8), Gpr(23)] {
        assert_eq!(layout.gpr_offset(excluded), None);
    }
}

#[test]
fn slots_are_unique_and_dense_apart_from_padding() {
    for arch in Arch::iter() {
        for save_fpu in [true, false] {
            let layout = arch.description().save_layout(save_fpu);
            let slots = layout.slots();
            let offsets = slots.iter().map(|(_, offset)| *offset).collect::<HashSet<_>>();
            assert_eq!(offsets.len(), slots.len());
            assert_eq!(slots.len() + layout.padding_words(), layout.save_area_size());
            assert_eq!(slots.last().unwrap().0, SavedRegister::ReturnAddress);
            assert_eq!(layout.save_area_size() % 2, 0);
        }
    }
}

#[test]
fn save_frame_pointer_lines_up_with_frame_constants() {
    for arch in Arch::iter() {
        let description = arch.description();
        let layout = description.save_layout(true);
        let fp = layout.fp_offset() as i32;
        assert_eq!(fp + description.frame.link_offset, layout.link_offset() as i32);
        assert_eq!(fp + description.frame.return_addr_offset, layout.return_address_offset() as i32);
        assert_eq!(fp + description.frame.sender_sp_offset, layout.save_area_size() as i32);
    }
}

#[test]
fn thread_context_offsets() {
    assert_eq!(PENDING_EXCEPTION_OFFSET, 0);
    assert_eq!(LAST_JAVA_FP_OFFSET, LAST_JAVA_SP_OFFSET + WORD_SIZE as i32);
    assert_eq!(LAST_JAVA_PC_OFFSET, LAST_JAVA_FP_OFFSET + WORD_SIZE as i32);
}

struct VecMemory {
    base: u64,
    words: Vec<u64>,
}

impl WordMemory for VecMemory {
    fn read_word(&self, address: u64) -> Result<u64, crate::stack::MemoryFault> {
        let index = ((address - self.base) / 8) as usize;
        self.words.get(index).copied().ok_or(crate::stack::MemoryFault { address })
    }

    fn write_word(&mut self, address: u64, value: u64) -> Result<(), crate::stack::MemoryFault> {
        let index = ((address - self.base) / 8) as usize;
        *self.words.get_mut(index).ok_or(crate::stack::MemoryFault { address })? = value;
        Ok(())
    }
}

#[test]
fn thread_context_survives_word_memory() {
    let bounds = StackBounds { base: 0x10_0000, size: 0x1_0000, guard_size: 0x1000 };
    let mut context = JavaThreadContext::new(bounds);
    context.pending_exception = 0xabc;
    context.anchor.last_java_pc = 0x1234;
    let mut memory = VecMemory { base: 0x1000, words: vec![0; 64] };
    context.store(&mut memory, 0x1000).unwrap();
    let loaded = JavaThreadContext::load(&memory, 0x1000).unwrap();
    assert_eq!(loaded.pending_exception, 0xabc);
    assert_eq!(loaded.anchor.last_java_pc, 0x1234);
    assert_eq!(loaded.stack_bounds(), bounds);
}

#[test]
fn stack_bounds_and_banging() {
    let bounds = StackBounds { base: 0x10_0000, size: 0x1_0000, guard_size: 0x1000 };
    assert!(bounds.contains_usable(0x10_0000 - 8));
    assert!(!bounds.contains_usable(0x10_0000));
    assert!(bounds.contains_usable_inclusive(0x10_0000));
    assert!(!bounds.contains_usable(bounds.end()));
    assert!(bounds.check_bang(0xF_8000, 0x2000, 2, 0x1000).is_ok());
    match bounds.check_bang(0xF_2000, 0x1000, 1, 0x1000) {
        Err(StackBangError::Overflow(overflow)) => assert!(overflow.touched < bounds.usable_end()),
        other => panic!("{:?}", other),
    }
}

#[test]
fn banging_an_unrepresentable_growth_overflows() {
    let bounds = StackBounds { base: 0x10_0000, size: 0x1_0000, guard_size: 0x1000 };
    let limit = bounds.usable_end();
    let overflow = StackBangError::Overflow(StackOverflow { touched: 0, limit });
    assert_eq!(bounds.check_bang(0xF_8000, u64::MAX, 20, 0x1000), Err(overflow));
    assert_eq!(bounds.check_bang(0xF_8000, 0x1000, u64::MAX, 0x1000), Err(overflow));
    assert_eq!(bounds.check_bang(0xF_8000, 0xF_9000, 0, 0x1000), Err(overflow));
    assert_eq!(bounds.check_bang(0xF_8000, 0x1000, 1, 0), Err(StackBangError::ZeroPageSize));
}

rusty_fork_test! {
    #[test]
    fn owned_native_stack_has_guard() {
        let stack = OwnedNativeStack::new(64 * 4096, 2).unwrap();
        let bounds = stack.bounds();
        assert_eq!(bounds.usable_end() - bounds.end(), bounds.guard_size);
        let mut memory = stack.memory();
        let top_word = bounds.base - 8;
        memory.write_word(top_word, 0x55).unwrap();
        assert_eq!(memory.read_word(top_word).unwrap(), 0x55);
        assert!(memory.read_word(bounds.end()).is_err());
    }
}

#[test]
fn edit_action_checks_expected() {
    let lock = GlobalCodeEditingLock::new();
    let word = AtomicU64::new(7);
    let handle = lock.acquire();
    let action = EditAction { from: Some(7), to: 9, location: &word as *const AtomicU64 };
    assert_eq!(action.do_edit(&handle).unwrap(), 7);
    let stale = EditAction { from: Some(7), to: 11, location: &word as *const AtomicU64 };
    assert_eq!(stale.do_edit(&handle), Err(PatchError::UnexpectedContents { expected: 7, found: 9 }));
}

#[test]
fn aligned_word_patch_is_never_torn() {
    const BEFORE: u64 = 0x1111_1111_0000_0001;
    const AFTER: u64 = 0x0000_0000_2222_2222;
    let call_target = Arc::new(AtomicU64::new(BEFORE));
    let done = Arc::new(AtomicBool::new(false));
    let executor = {
        let call_target = call_target.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut reached = HashSet::new();
            while !done.load(Ordering::Acquire) {
                reached.insert(call_target.load(Ordering::Acquire));
            }
            reached
        })
    };
    let lock = GlobalCodeEditingLock::new();
    for i in 0..10_000 {
        let handle = lock.acquire();
        let (from, to) = if i % 2 == 0 { (BEFORE, AFTER) } else { (AFTER, BEFORE) };
        handle.edit_word(&call_target, to, Some(from)).unwrap();
    }
    done.store(true, Ordering::Release);
    let reached = executor.join().unwrap();
    assert!(reached.iter().all(|target| *target == BEFORE || *target == AFTER));
}

#[test]
fn spin_then_patch_call_is_never_torn() {
    const SITE: u64 = 0x4000_0005;
    let landing_before = 0x4000_1000u64;
    let landing_after = 0x4fff_f000u64;
    let lock = GlobalCodeEditingLock::new();
    for _ in 0..200 {
        let words = Arc::new([AtomicU64::new(0x9090_9090_9090_9090), AtomicU64::new(0x9090_9090_9090_9090)]);
        {
            let site = SpinPatchSite::new(&words, 5, 5).unwrap();
            site.patch(&lock.acquire(), &encode_call_rel32(SITE, landing_before)).unwrap();
        }
        let done = Arc::new(AtomicBool::new(false));
        let executor = {
            let words = words.clone();
            let done = done.clone();
            thread::spawn(move || {
                let site = SpinPatchSite::new(&words, 5, 5).unwrap();
                let mut reached = Vec::new();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    reached.push(decode_call_rel32(SITE, &site.fetch()));
                    if finished {
                        break reached;
                    }
                }
            })
        };
        let site = SpinPatchSite::new(&words, 5, 5).unwrap();
        site.patch(&lock.acquire(), &encode_call_rel32(SITE, landing_after)).unwrap();
        done.store(true, Ordering::Release);
        let reached = executor.join().unwrap();
        assert!(reached.iter().all(|target| *target == Some(landing_before) || *target == Some(landing_after)));
        assert_eq!(reached.last().copied().flatten(), Some(landing_after));
    }
}

#[test]
fn spin_patch_window_is_validated() {
    let words = [AtomicU64::new(0), AtomicU64::new(0)];
    assert!(SpinPatchSite::new(&words, 7, 5).is_err());
    assert!(SpinPatchSite::new(&words, 4, 13).is_err());
    assert!(SpinPatchSite::new(&words, 6, 5).is_ok());
}
