//! Code buffer for building JIT code.
//!
//! Machine code is appended to a growing byte vector. Branch targets are
//! [`Label`]s: a label can be referenced before or after it is bound, and all
//! rel32 references are patched in one pass by [`CodeBuffer::resolve`].

use super::EmitError;

/// A position in the code buffer, possibly not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A buffer for building machine code.
pub struct CodeBuffer {
    /// The code bytes
    code: Vec<u8>,
    /// Bound offset for every label created so far
    labels: Vec<Option<usize>>,
    /// Pending rel32 references: (offset of the 4-byte field, target)
    fixups: Vec<(usize, Label)>,
}

impl CodeBuffer {
    /// Create a new empty code buffer.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new code buffer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Get the current size of the code.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Emit a single byte.
    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 16-bit value (little-endian).
    pub fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Create a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the current position.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        debug_assert!(slot.is_none(), "label bound twice");
        *slot = Some(self.code.len());
    }

    /// Offset of a bound label.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Emit a 4-byte placeholder that will receive `target - end_of_field`.
    pub fn emit_label_ref(&mut self, target: Label) {
        self.fixups.push((self.code.len(), target));
        self.emit_u32(0);
    }

    /// Patch every pending label reference.
    pub fn resolve(&mut self) -> Result<(), EmitError> {
        for (at, label) in self.fixups.drain(..) {
            let target = self.labels[label.0 as usize].ok_or(EmitError::UnboundLabel)?;
            let rel = target as i64 - (at as i64 + 4);
            let rel = i32::try_from(rel).map_err(|_| EmitError::BranchOutOfRange)?;
            self.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// Get the code bytes (for inspection).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Consume the buffer and return the raw code bytes.
    /// Note: This does not patch label references - call `resolve` first.
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Pad with `int3` up to the given power-of-two boundary.
    pub fn align(&mut self, alignment: usize) {
        while self.code.len() & (alignment - 1) != 0 {
            self.emit_u8(0xCC);
        }
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
