use clap::{Parser, Subcommand, ValueEnum};
use regvm_jit::bytecode::Insn;
use regvm_jit::config::EmitConfig;
use regvm_jit::listing::Listing;
use regvm_jit::{TranslatedModule, translate_module};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "regvm-jit")]
#[command(about = "Native code emitter for register VM bytecode", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a bytecode listing and report the emitted code
    Emit {
        /// TOML listing with one [[function]] table per function
        listing: PathBuf,

        /// Emitter configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output format (human or json)
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Also map the code into executable memory
        #[arg(long)]
        finalize: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Emit {
            listing,
            config,
            format,
            finalize,
        } => {
            if let Err(e) = run_emit(&listing, config, format, finalize) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn run_emit(
    path: &std::path::Path,
    config: Option<PathBuf>,
    format: OutputFormat,
    finalize: bool,
) -> Result<(), String> {
    let config = match config {
        Some(path) => EmitConfig::load(&path).map_err(|e| e.to_string())?,
        None => EmitConfig::default(),
    };
    let listing = Listing::load(path).map_err(|e| e.to_string())?;

    let module = translate_module(&listing.code(), &config).map_err(|e| e.to_string())?;
    if finalize {
        let native = module.finalize().map_err(|e| e.to_string())?;
        tracing::info!(size = native.code_size(), "mapped executable module");
    }

    let report = EmitReport::new(&listing, &module).map_err(|e| e.to_string())?;
    match format {
        OutputFormat::Human => print!("{}", report.render_human()),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct EmitReport {
    code_size: usize,
    entry_gate: usize,
    functions: Vec<FunctionReport>,
    code: String,
}

#[derive(Serialize)]
struct FunctionReport {
    name: String,
    entry: usize,
    size: usize,
    instructions: Vec<InstructionReport>,
}

#[derive(Serialize)]
struct InstructionReport {
    pc: usize,
    opcode: String,
    offset: usize,
}

impl EmitReport {
    fn new(listing: &Listing, module: &TranslatedModule) -> Result<Self, regvm_jit::EmitError> {
        let mut functions = Vec::with_capacity(module.functions.len());
        for (i, (listed, translated)) in listing.functions.iter().zip(&module.functions).enumerate()
        {
            let end = module
                .functions
                .get(i + 1)
                .map_or(module.code.len(), |next| next.entry);

            let mut instructions = Vec::new();
            let mut pc = 0;
            while pc < listed.code.len() {
                let (op, _) = Insn::decode(&listed.code, pc)?;
                instructions.push(InstructionReport {
                    pc,
                    opcode: format!("{:?}", op),
                    offset: translated.inst_offsets[pc],
                });
                pc += op.words();
            }

            functions.push(FunctionReport {
                name: listed.name.clone(),
                entry: translated.entry,
                size: end - translated.entry,
                instructions,
            });
        }

        Ok(Self {
            code_size: module.code.len(),
            entry_gate: module.entry_gate,
            functions,
            code: hex(&module.code),
        })
    }

    fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "code size: {} bytes", self.code_size);
        let _ = writeln!(out, "entry gate: {:#06x}", self.entry_gate);
        for f in &self.functions {
            let _ = writeln!(out);
            let _ = writeln!(out, "function {} @ {:#06x} ({} bytes)", f.name, f.entry, f.size);
            for inst in &f.instructions {
                let _ = writeln!(out, "  {:4}  {:#06x}  {}", inst.pc, inst.offset, inst.opcode);
            }
        }
        let _ = writeln!(out);
        for (i, line) in self.code.as_bytes().chunks(32).enumerate() {
            let _ = writeln!(
                out,
                "{:06x}  {}",
                i * 16,
                String::from_utf8_lossy(line)
            );
        }
        out
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
