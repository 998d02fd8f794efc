use std::collections::{HashMap, HashSet};

use another_jit_vm::{ArchDescription, Gpr, RegisterRoles, WORD_SIZE};
use another_jit_vm::saved_registers_utils::RegisterSaveLayout;
use another_jit_vm::thread_context::{LAST_JAVA_FP_OFFSET, LAST_JAVA_PC_OFFSET, LAST_JAVA_SP_OFFSET, PENDING_EXCEPTION_OFFSET, VM_RESULT_2_OFFSET, VM_RESULT_OFFSET};
use gc_memory_layout_common::oop_map::OopMap;
use stub_ids::{EntryId, StubId};

use crate::{Address, IRInstr, IRLabel, LabelName, RuntimeEntry, StubCode, StubGenConfig, StubGenError};

/// Builds the ir of one stub: labels, entries, the frame description and an oop map for
/// every call that can reach a safepoint.
pub struct StubAssembler {
    config: StubGenConfig,
    arch: &'static ArchDescription,
    name: String,
    stub_id: Option<StubId>,
    instructions: Vec<IRInstr>,
    next_label: u32,
    bound: HashMap<LabelName, usize>,
    entries: Vec<(EntryId, LabelName)>,
    oop_maps: Vec<(LabelName, OopMap)>,
    frame_size_words: Option<usize>,
    frame_complete: Option<LabelName>,
    /// the frame is the full register save area the tier-1 forward exception stub unwinds
    full_save_frame: bool,
    caller_must_gc_arguments: bool,
}

impl StubAssembler {
    pub fn new(config: StubGenConfig, name: impl Into<String>, stub_id: Option<StubId>) -> Self {
        Self {
            config,
            arch: config.arch_description(),
            name: name.into(),
            stub_id,
            instructions: vec![],
            next_label: 0,
            bound: HashMap::new(),
            entries: vec![],
            oop_maps: vec![],
            frame_size_words: None,
            frame_complete: None,
            full_save_frame: false,
            caller_must_gc_arguments: false,
        }
    }

    pub fn config(&self) -> &StubGenConfig {
        &self.config
    }

    pub fn arch(&self) -> &'static ArchDescription {
        self.arch
    }

    pub fn roles(&self) -> &'static RegisterRoles {
        &self.arch.roles
    }

    pub fn stub_id(&self) -> Option<StubId> {
        self.stub_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn new_label(&mut self) -> LabelName {
        let label = LabelName(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn bind(&mut self, label: LabelName) {
        let previous = self.bound.insert(label, self.instructions.len());
        assert!(previous.is_none(), "label {:?} bound twice in {}", label, self.name);
        self.instructions.push(IRInstr::Label(IRLabel { name: label }));
    }

    pub fn bind_new_label(&mut self) -> LabelName {
        let label = self.new_label();
        self.bind(label);
        label
    }

    pub fn emit(&mut self, instruction: IRInstr) {
        self.instructions.push(instruction);
    }

    /// Mark the current position as the start of `entry`.
    pub fn entry(&mut self, entry: EntryId) -> LabelName {
        debug_assert!(self.stub_id.map(|stub| entry.stub() == stub).unwrap_or(true), "{:?} does not belong to {}", entry, self.name);
        let label = self.bind_new_label();
        self.entries.push((entry, label));
        label
    }

    pub fn set_frame_size(&mut self, words: usize) {
        self.frame_size_words = Some(words);
        self.full_save_frame = false;
    }

    pub fn frame_size(&self) -> Option<usize> {
        self.frame_size_words
    }

    /// From here on the frame is fully built and may be walked.
    pub fn set_frame_complete(&mut self) {
        if self.frame_complete.is_none() {
            let label = self.bind_new_label();
            self.frame_complete = Some(label);
        }
    }

    pub fn set_caller_must_gc_arguments(&mut self, must: bool) {
        self.caller_must_gc_arguments = must;
    }

    pub fn add_oop_map(&mut self, return_label: LabelName, map: OopMap) {
        self.oop_maps.push((return_label, map));
    }

    pub fn mov(&mut self, to: Gpr, from: Gpr) {
        if to != from {
            self.emit(IRInstr::CopyRegister { from, to });
        }
    }

    pub fn load(&mut self, to: Gpr, base: Gpr, offset: i32) {
        self.emit(IRInstr::Load { to, from: Address::new(base, offset) });
    }

    pub fn store(&mut self, from: Gpr, base: Gpr, offset: i32) {
        self.emit(IRInstr::Store { from, to: Address::new(base, offset) });
    }

    pub fn store_const(&mut self, const_: i32, base: Gpr, offset: i32) {
        self.emit(IRInstr::StoreConst { const_, to: Address::new(base, offset) });
    }

    pub fn add_sp(&mut self, bytes: i32) {
        let sp = self.roles().sp;
        self.emit(IRInstr::AddConst { res: sp, const_: bytes });
    }

    pub fn stop(&mut self, reason: &'static str) {
        self.emit(IRInstr::Stop { reason });
    }

    /// Byte offset from fp of the frame's return address slot.
    pub fn return_address_offset(&self) -> i32 {
        self.arch.frame.return_addr_offset * WORD_SIZE as i32
    }

    pub fn set_last_java_frame(&mut self, return_label: LabelName) {
        let roles = *self.roles();
        self.store(roles.sp, roles.thread, LAST_JAVA_SP_OFFSET);
        self.store(roles.fp, roles.thread, LAST_JAVA_FP_OFFSET);
        self.emit(IRInstr::LoadLabel { label: return_label, to: roles.scratch1 });
        self.store(roles.scratch1, roles.thread, LAST_JAVA_PC_OFFSET);
    }

    pub fn reset_last_java_frame(&mut self) {
        let thread = self.roles().thread;
        self.store_const(0, thread, LAST_JAVA_SP_OFFSET);
        self.store_const(0, thread, LAST_JAVA_FP_OFFSET);
        self.store_const(0, thread, LAST_JAVA_PC_OFFSET);
    }

    fn pass_arguments(&mut self, args: &[Gpr]) {
        let roles = *self.roles();
        debug_assert!(args.len() + 1 <= roles.c_args.len());
        for (i, arg) in args.iter().enumerate() {
            // moving in order must not clobber a later argument or the thread
            debug_assert!(!roles.c_args[..=i].contains(arg) || roles.c_args[i + 1] == *arg, "argument {:?} would be overwritten", arg);
            debug_assert!(args[i + 1..].iter().all(|later| *later != roles.c_args[i + 1]), "argument register {:?} clobbered", roles.c_args[i + 1]);
            self.mov(roles.c_args[i + 1], *arg);
        }
        self.mov(roles.c_args[0], roles.thread);
    }

    /// Call into the runtime with a last java frame set up and no check for exceptions.
    /// Returns the label of the return address.
    pub fn call_rt_leaf_with_anchor(&mut self, target: RuntimeEntry, args: &[Gpr]) -> LabelName {
        let return_label = self.new_label();
        self.pass_arguments(args);
        self.set_last_java_frame(return_label);
        let scratch = self.roles().scratch1;
        self.emit(IRInstr::CallRuntime { target, scratch });
        self.bind(return_label);
        self.reset_last_java_frame();
        return_label
    }

    /// Call into the runtime without a walkable frame.
    pub fn call_rt_leaf(&mut self, target: RuntimeEntry, args: &[Gpr]) {
        self.pass_arguments(args);
        let scratch = self.roles().scratch1;
        self.emit(IRInstr::CallRuntime { target, scratch });
    }

    /// Leave the stub for an exception pending in the thread. Only a frame that is the full
    /// register save area can be handed to the tier-1 forward exception stub, which restores
    /// registers from it. Any other frame is popped and the shared stub dispatches on its
    /// return address.
    pub fn forward_pending_exception(&mut self) {
        let scratch = self.roles().scratch1;
        if self.stub_id == Some(StubId::C1ForwardException) {
            self.stop("pending exception in forward_exception");
        } else if self.frame_size_words.is_some() && self.full_save_frame {
            self.emit(IRInstr::JumpEntry { entry: EntryId::C1ForwardException, scratch });
        } else {
            self.emit(IRInstr::LeaveFrame);
            self.emit(IRInstr::JumpEntry { entry: EntryId::StubGenForwardException, scratch });
        }
    }

    /// The standard runtime call: thread first, at most three more arguments, last java frame
    /// recorded around the call. A pending exception afterwards never returns here, see
    /// [`StubAssembler::forward_pending_exception`].
    /// Results in vm_result / vm_result_2 are moved to the given registers and cleared.
    /// Returns the label of the return address, which is where an oop map belongs.
    pub fn call_rt(&mut self, target: RuntimeEntry, args: &[Gpr], oop_result: Option<Gpr>, metadata_result: Option<Gpr>) -> LabelName {
        debug_assert!(args.len() <= 3, "call_rt passes at most three arguments, {} has {}", target.name(), args.len());
        debug_assert_eq!(args.len(), target.signature().args, "{} called with the wrong argument count", target.name());
        let roles = *self.roles();
        let return_label = self.call_rt_leaf_with_anchor(target, args);

        let no_exception = self.new_label();
        self.load(roles.scratch1, roles.thread, PENDING_EXCEPTION_OFFSET);
        self.emit(IRInstr::BranchZero { a: roles.scratch1, label: no_exception });
        if oop_result.is_some() {
            self.store_const(0, roles.thread, VM_RESULT_OFFSET);
        }
        if metadata_result.is_some() {
            self.store_const(0, roles.thread, VM_RESULT_2_OFFSET);
        }
        self.forward_pending_exception();
        self.bind(no_exception);
        if let Some(oop_result) = oop_result {
            self.load(oop_result, roles.thread, VM_RESULT_OFFSET);
            self.store_const(0, roles.thread, VM_RESULT_OFFSET);
        }
        if let Some(metadata_result) = metadata_result {
            self.load(metadata_result, roles.thread, VM_RESULT_2_OFFSET);
            self.store_const(0, roles.thread, VM_RESULT_2_OFFSET);
        }
        return_label
    }

    /// Enter a frame and spill every register of `layout` into it. The frame size becomes the
    /// save area size. Returns the oop map describing the spilled registers.
    pub fn save_live_registers(&mut self, layout: &RegisterSaveLayout, arg_count: usize) -> OopMap {
        debug_assert_eq!(layout.arch(), self.config.arch);
        let sp = self.roles().sp;
        self.emit(IRInstr::EnterFrame);
        self.add_sp(-((layout.body_words() * WORD_SIZE) as i32));
        for gpr in layout.saved_gprs() {
            if let Some(offset) = layout.gpr_byte_offset(*gpr) {
                self.store(*gpr, sp, offset);
            }
        }
        for fpr in layout.saved_fprs() {
            if let Some(offset) = layout.fpr_byte_offset(*fpr) {
                self.emit(IRInstr::StoreFloat { from: *fpr, to: Address::new(sp, offset) });
            }
        }
        self.set_frame_size(layout.save_area_size());
        self.full_save_frame = layout.includes_fpu();
        self.set_frame_complete();
        OopMap::from_save_layout(layout, arg_count)
    }

    fn restore_registers_from(&mut self, layout: &RegisterSaveLayout, skip: &HashSet<Gpr>) {
        let sp = self.roles().sp;
        for fpr in layout.saved_fprs() {
            if let Some(offset) = layout.fpr_byte_offset(*fpr) {
                self.emit(IRInstr::LoadFloat { to: *fpr, from: Address::new(sp, offset) });
            }
        }
        for gpr in layout.saved_gprs() {
            if skip.contains(gpr) {
                continue;
            }
            if let Some(offset) = layout.gpr_byte_offset(*gpr) {
                self.load(*gpr, sp, offset);
            }
        }
    }

    /// Reload every saved register. The frame stays, callers leave it themselves.
    pub fn restore_live_registers(&mut self, layout: &RegisterSaveLayout) {
        self.restore_registers_from(layout, &HashSet::new());
    }

    pub fn restore_live_registers_except(&mut self, layout: &RegisterSaveLayout, keep: Gpr) {
        self.restore_registers_from(layout, &HashSet::from([keep]));
    }

    /// Reload only the integer and float result registers, then pop the whole save area,
    /// return address included. fp is not restored.
    pub fn restore_result_registers(&mut self, layout: &RegisterSaveLayout) {
        let roles = *self.roles();
        let sp = roles.sp;
        if let Some(offset) = layout.fpr_byte_offset(roles.fp_result) {
            self.emit(IRInstr::LoadFloat { to: roles.fp_result, from: Address::new(sp, offset) });
        }
        if let Some(offset) = layout.gpr_byte_offset(roles.result) {
            self.load(roles.result, sp, offset);
        }
        self.add_sp(layout.save_area_size_in_bytes() as i32);
    }

    pub fn finish(self) -> Result<StubCode, StubGenError> {
        for instruction in &self.instructions {
            if let Some(label) = instruction.label_target() {
                if !self.bound.contains_key(&label) {
                    return Err(StubGenError::UnboundLabel { label, stub: self.name });
                }
            }
        }
        for (label, _) in &self.oop_maps {
            if !self.bound.contains_key(label) {
                return Err(StubGenError::UnboundLabel { label: *label, stub: self.name });
            }
        }
        Ok(StubCode {
            name: self.name,
            stub_id: self.stub_id,
            arch: self.config.arch,
            instructions: self.instructions,
            labels: self.bound,
            entries: self.entries,
            oop_maps: self.oop_maps,
            frame_size_words: self.frame_size_words,
            frame_complete: self.frame_complete,
            caller_must_gc_arguments: self.caller_must_gc_arguments,
        })
    }
}
