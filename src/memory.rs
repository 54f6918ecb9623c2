use crate::common::word::Word;

/// Frame memory. Grows in 32-byte words and never shrinks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn words(&self) -> usize {
        self.data.len() / 32
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Grows memory to cover `[offset, offset + len)`. Zero-length ranges
    /// never expand. Callers charge gas before calling this.
    pub fn expand(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let end = (offset + len).div_ceil(32) * 32;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
    }

    /// Copies bytes out; anything beyond the current size reads as zero.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if offset < self.data.len() {
            let end = (offset + len).min(self.data.len());
            out[..end - offset].copy_from_slice(&self.data[offset..end]);
        }
        out
    }

    pub fn read_word(&self, offset: usize) -> Word {
        Word::from_bytes(&self.read(offset, 32))
    }

    /// Expands as needed, then writes `len` bytes at `offset`. `data` shorter
    /// than `len` is zero-filled, longer is truncated.
    pub fn write(&mut self, offset: usize, len: usize, data: &[u8]) {
        if len == 0 {
            return;
        }
        self.expand(offset, len);
        let n = data.len().min(len);
        self.data[offset..offset + n].copy_from_slice(&data[..n]);
        self.data[offset + n..offset + len].fill(0);
    }

    pub fn write_word(&mut self, offset: usize, value: &Word) {
        self.write(offset, 32, &value.into_bytes());
    }

    pub fn write_byte(&mut self, offset: usize, value: u8) {
        self.write(offset, 1, &[value]);
    }

    /// MCOPY semantics: overlapping ranges behave as if copied via a buffer.
    pub fn copy_within(&mut self, dst: usize, src: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.expand(src, len);
        self.expand(dst, len);
        self.data.copy_within(src..src + len, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_in_words() {
        let mut memory = Memory::new();
        memory.write_byte(0, 0xff);
        assert_eq!(memory.len(), 32);
        memory.write_word(1, &Word::one());
        assert_eq!(memory.len(), 64);
        memory.expand(100, 0);
        assert_eq!(memory.len(), 64);
    }

    #[test]
    fn test_read_past_end_does_not_expand() {
        let mut memory = Memory::new();
        memory.write_byte(31, 0x01);
        assert_eq!(memory.read_word(0), Word::one());
        assert_eq!(memory.read(30, 4), vec![0x00, 0x01, 0x00, 0x00]);
        assert_eq!(memory.read(1000, 2), vec![0, 0]);
        assert_eq!(memory.len(), 32);
    }

    #[test]
    fn test_write_zero_fills() {
        let mut memory = Memory::new();
        memory.write(0, 4, &[0xaa; 4]);
        memory.write(0, 4, &[0xbb]);
        assert_eq!(memory.read(0, 4), vec![0xbb, 0, 0, 0]);
    }

    #[test]
    fn test_copy_within_overlap() {
        let mut memory = Memory::new();
        memory.write(0, 4, &[1, 2, 3, 4]);
        memory.copy_within(1, 0, 4);
        assert_eq!(memory.read(0, 5), vec![1, 1, 2, 3, 4]);
    }
}
