use anyhow::anyhow;
use clap::Parser;
use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};
use log::info;
use strum::IntoEnumIterator;

use another_jit_vm::Arch;
use another_jit_vm::saved_registers_utils::SavedRegister;
use another_jit_vm_ir::RuntimeAddresses;
use runtime_stubs::{Emission, GeneratedStub, StubRoutines};
use stub_ids::StubGroup;
use stubgen_args::{StubGenArgs, StubGenCommand};

const CODE_BASE: u64 = 0x7000_0000_0000;
const RUNTIME_BASE: u64 = 0x7f00_0000_0000;

fn print_ids() {
    for group in StubGroup::iter() {
        println!("{}", group);
        for blob in group.blobs() {
            println!("  {}", blob.name());
            for stub in blob.stubs() {
                println!("    {}", stub.name());
                for entry in stub.entries() {
                    println!("      {}", entry.name());
                }
            }
        }
    }
}

fn print_layout(arch: Arch, save_fpu: bool) {
    let description = arch.description();
    let layout = description.save_layout(save_fpu);
    println!("{} save area, fpu {}: {} words", arch, save_fpu, layout.save_area_size());
    for (register, offset) in layout.slots() {
        let name = match register {
            SavedRegister::Gpr(gpr) => description.gpr_name(gpr).to_string(),
            SavedRegister::Fpr(fpr) => description.fpr_name(fpr).to_string(),
            SavedRegister::Link => "saved fp".to_string(),
            SavedRegister::ReturnAddress => "return address".to_string(),
        };
        println!("  sp+{:<4} {}", offset * 8, name);
    }
}

fn print_blob(stub: &GeneratedStub) {
    let blob = &stub.blob;
    let frame = blob.frame_size_words.map(|words| format!("{} words", words)).unwrap_or_else(|| "none".to_string());
    println!("{:<40} {:?} at {:#x}, {} bytes, frame {}, {} oop maps",
             blob.name, blob.kind, blob.code_begin, blob.code_size, frame, blob.oop_maps.len());
    for (entry, _) in &stub.code.entries {
        println!("    entry {}", entry.name());
    }
}

fn disassemble(stub: &GeneratedStub) -> anyhow::Result<()> {
    let bytes = stub.layout.bytes.as_ref().ok_or_else(|| anyhow!("{} has no machine code", stub.blob.name))?;
    println!("{}:", stub.blob.name);
    let mut decoder = Decoder::with_ip(64, bytes, stub.blob.code_begin, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut instruction = Instruction::default();
    let mut output = String::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        output.clear();
        formatter.format(&instruction, &mut output);
        println!("  {:016x} {}", instruction.ip(), output);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = StubGenArgs::parse();
    match &args.command {
        StubGenCommand::Ids {} => print_ids(),
        StubGenCommand::Layout { arch, no_fpu } => print_layout(*arch, !no_fpu),
        StubGenCommand::Generate { arch } => {
            let routines = StubRoutines::generate(args.config(*arch), Emission::Simulated, CODE_BASE)?;
            info!("generated {} stubs for {}", routines.stubs().len(), arch);
            for stub in routines.stubs() {
                print_blob(stub);
            }
        }
        StubGenCommand::Dump { arch, stub } => {
            let emission = Emission::Native(RuntimeAddresses::symbolic(RUNTIME_BASE));
            let routines = StubRoutines::generate(args.config(*arch), emission, CODE_BASE)?;
            match stub {
                Some(stub) => {
                    let generated = routines.stub(*stub).ok_or_else(|| anyhow!("{} was not generated", stub.name()))?;
                    disassemble(generated)?;
                }
                None => {
                    for generated in routines.stubs() {
                        disassemble(generated)?;
                    }
                }
            }
        }
    }
    Ok(())
}
