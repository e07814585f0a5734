//! Code buffer for incrementally building machine code.
//!
//! Holds the raw bytes of an object under construction plus label
//! bookkeeping for block-local control flow. Forward references are
//! emitted as placeholder rel32 fields and patched in `finish`.
//! Symbol-level references (calls across functions or objects) are not
//! handled here; the compiler records them as relocations on the object.

/// A position in the buffer that control flow can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

pub struct CodeBuffer {
    code: Vec<u8>,
    /// Offset each label is bound to, once known.
    labels: Vec<Option<usize>>,
    /// Patch sites: (offset of a rel32 field, target label).
    fixups: Vec<(usize, Label)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Current emission offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Allocate an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    /// Emit a rel32 field referring to `label`, patched in `finish`.
    /// The displacement is computed from the end of the field, matching
    /// the x86-64 rel32 convention.
    pub fn emit_rel32_to(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.emit_u32(0);
    }

    /// Pad with NOPs to the given power-of-two boundary.
    pub fn align(&mut self, alignment: usize) {
        while self.code.len() % alignment != 0 {
            self.emit_u8(0x90);
        }
    }

    /// Patch all fixups and return the finished bytes. An unbound label
    /// is an internal invariant violation, reported rather than panicking.
    pub fn finish(mut self) -> Result<Vec<u8>, String> {
        for (at, label) in self.fixups.drain(..) {
            let target = self.labels[label.0]
                .ok_or_else(|| format!("label {:?} never bound", label))?;
            let rel = target as i64 - (at as i64 + 4);
            if rel < i32::MIN as i64 || rel > i32::MAX as i64 {
                return Err(format!("branch displacement out of range: {}", rel));
            }
            self.code[at..at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
        }
        Ok(self.code)
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}
