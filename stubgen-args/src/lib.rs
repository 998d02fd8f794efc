use std::error::Error;

use clap::Parser;

use another_jit_vm::Arch;
use another_jit_vm_ir::StubGenConfig;
use stub_ids::StubId;

/// Parse a stub name, either `group.name` or a name unique across groups
fn parse_stub(s: &str) -> Result<StubId, Box<dyn Error + Send + Sync>> {
    StubId::from_name(s).ok_or_else(|| format!("no stub named `{}`, or the name is ambiguous without a group", s).into())
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "generates deoptimization and exception stubs")]
pub struct StubGenArgs {
    #[clap(long, global = true, help = "emit the debug checks the stubs carry in debug builds")]
    pub debug_checks: bool,
    #[clap(long, global = true, help = "generate the jvmci uncommon trap entries of the deopt blob")]
    pub jvmci: bool,
    #[clap(subcommand)]
    pub command: StubGenCommand,
}

#[derive(Parser, Debug, Clone)]
pub enum StubGenCommand {
    #[clap(about = "print the stub group, blob, stub and entry hierarchy")]
    Ids {},
    #[clap(about = "print the register save area layout")]
    Layout {
        #[clap(long)]
        arch: Arch,
        #[clap(long, help = "layout without floating point registers")]
        no_fpu: bool,
    },
    #[clap(about = "disassemble generated machine code")]
    Dump {
        #[clap(long, default_value = "x86_64")]
        arch: Arch,
        #[clap(long, value_parser = parse_stub, help = "only this stub")]
        stub: Option<StubId>,
    },
    #[clap(about = "generate every stub and print its blob")]
    Generate {
        #[clap(long)]
        arch: Arch,
    },
}

impl StubGenArgs {
    pub fn config(&self, arch: Arch) -> StubGenConfig {
        StubGenConfig {
            debug_checks: self.debug_checks,
            jvmci_uncommon_trap_entries: self.jvmci,
            ..StubGenConfig::for_arch(arch)
        }
    }
}
