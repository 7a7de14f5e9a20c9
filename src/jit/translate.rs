//! Module driver: translate whole functions and link them in memory.
//!
//! All functions of a module share one code buffer laid out as:
//!
//! ```text
//! [ entry gate | shared exits | fn 0 body | fn 0 fallbacks | fn 1 body | ... ]
//! ```
//!
//! Every instruction word gets a label, so any bytecode position can be
//! turned into a native address (`NativeProto::inst_targets`).

use super::EmitError;
use super::codebuf::{CodeBuffer, Label};
use super::context::Emitter;
use super::emit::{self, InstSite};
use super::gate::{EntryFn, emit_gate};
use super::labels::{Outcome, SharedLabels};
use super::memory::ExecutableMemory;
use crate::bytecode::Insn;
use crate::config::EmitConfig;
use crate::layout::NativeProto;

const FUNCTION_ALIGNMENT: usize = 16;

/// Position-independent translation result.
#[derive(Debug, Clone)]
pub struct TranslatedModule {
    pub code: Vec<u8>,
    /// Offset of the entry gate.
    pub entry_gate: usize,
    pub functions: Vec<TranslatedFunction>,
}

#[derive(Debug, Clone)]
pub struct TranslatedFunction {
    /// Offset of the first instruction.
    pub entry: usize,
    /// Code offset of every instruction word; aux words map to their instruction.
    pub inst_offsets: Vec<usize>,
}

/// Translate every function in `functions` into one module.
///
/// Fails on the first instruction the backend cannot handle; the caller
/// keeps such functions interpreted.
pub fn translate_module(
    functions: &[&[u32]],
    config: &EmitConfig,
) -> Result<TranslatedModule, EmitError> {
    let mut buf = CodeBuffer::with_capacity(functions.iter().map(|f| f.len() * 32).sum());
    let shared = SharedLabels::new(&mut buf);

    let (entry_gate, function_labels) = {
        let mut e = Emitter::new(&mut buf, shared, config);
        let entry_gate = emit_gate(&mut e);

        let mut function_labels = Vec::with_capacity(functions.len());
        for (index, code) in functions.iter().enumerate() {
            e.asm.align(FUNCTION_ALIGNMENT);
            let start = e.asm.offset();
            let labels = translate_function(&mut e, code)?;
            tracing::debug!(
                function = index,
                instructions = code.len(),
                size = e.asm.offset() - start,
                "translated function"
            );
            function_labels.push(labels);
        }
        (entry_gate, function_labels)
    };

    buf.resolve()?;

    let functions = function_labels
        .iter()
        .map(|labels| -> Result<TranslatedFunction, EmitError> {
            let words = labels.len() - 1;
            let inst_offsets = labels[..words]
                .iter()
                .map(|l| buf.label_offset(*l).ok_or(EmitError::UnboundLabel))
                .collect::<Result<Vec<_>, _>>()?;
            let entry = buf.label_offset(labels[0]).ok_or(EmitError::UnboundLabel)?;
            Ok(TranslatedFunction {
                entry,
                inst_offsets,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TranslatedModule {
        code: buf.into_code(),
        entry_gate,
        functions,
    })
}

/// Emit one function body followed by its out-of-line fallbacks.
fn translate_function(e: &mut Emitter, code: &[u32]) -> Result<Vec<Label>, EmitError> {
    let labels: Vec<Label> = (0..=code.len()).map(|_| e.new_label()).collect();
    let mut fallbacks = Vec::new();

    let mut pc = 0;
    while pc < code.len() {
        let (op, insn) = Insn::decode(code, pc)?;
        for label in &labels[pc..pc + op.words()] {
            e.bind(*label);
        }
        tracing::trace!(pc, ?op, offset = e.asm.offset(), "emit instruction");

        let site = InstSite {
            pc,
            op,
            insn,
            code,
            labels: &labels,
        };
        match emit::emit_instruction(e, &site, &mut fallbacks)? {
            Outcome::Next | Outcome::Leave => {}
            Outcome::JumpTo(target) => e.asm.jmp(target),
        }
        pc += op.words();
    }

    // Falling off the end is a bytecode bug
    e.bind(labels[code.len()]);
    e.asm.int3();

    for fallback in fallbacks {
        emit::emit_fallback(e, fallback);
    }
    Ok(labels)
}

impl TranslatedModule {
    /// Copy the code into executable memory and compute absolute addresses.
    pub fn finalize(&self) -> Result<NativeModule, EmitError> {
        let memory = ExecutableMemory::from_code(&self.code)?;
        let base = memory.as_ptr();

        // SAFETY: offsets come from the same buffer that was copied.
        let at = |offset: usize| unsafe { base.add(offset) };

        // SAFETY: the gate was emitted with the EntryFn calling convention.
        let entry = unsafe { std::mem::transmute::<*const u8, EntryFn>(at(self.entry_gate)) };

        let functions = self
            .functions
            .iter()
            .map(|f| NativeFunction {
                entry_target: at(f.entry),
                inst_targets: f.inst_offsets.iter().map(|&o| at(o)).collect(),
            })
            .collect();

        tracing::debug!(size = self.code.len(), "finalized native module");
        Ok(NativeModule {
            memory,
            entry,
            functions,
        })
    }
}

/// Native code of one function, ready to be referenced from its prototype.
#[derive(Debug)]
pub struct NativeFunction {
    entry_target: *const u8,
    inst_targets: Vec<*const u8>,
}

impl NativeFunction {
    pub fn entry_target(&self) -> *const u8 {
        self.entry_target
    }

    pub fn inst_targets(&self) -> &[*const u8] {
        &self.inst_targets
    }

    /// Metadata for `Proto::exec_data`. Valid while the module is alive.
    pub fn native_proto(&self) -> NativeProto {
        NativeProto {
            entry_target: self.entry_target,
            inst_targets: self.inst_targets.as_ptr(),
        }
    }
}

/// A linked, executable module.
pub struct NativeModule {
    memory: ExecutableMemory,
    entry: EntryFn,
    functions: Vec<NativeFunction>,
}

impl NativeModule {
    /// The entry gate.
    pub fn entry(&self) -> EntryFn {
        self.entry
    }

    pub fn function(&self, index: usize) -> Option<&NativeFunction> {
        self.functions.get(index)
    }

    pub fn functions(&self) -> &[NativeFunction] {
        &self.functions
    }

    pub fn code_size(&self) -> usize {
        self.memory.size()
    }
}
