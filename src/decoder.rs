use crate::{
    common::word::Word,
    opcodes::{JUMPDEST, Opcode, get_opcode},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub offset: usize,
    /// Immediate bytes of PUSH1..PUSH32. Shorter than the push width when
    /// the code ends early.
    pub argument: Option<Vec<u8>>,
}

impl Instruction {
    /// Immediate value, with missing trailing bytes read as zero.
    pub fn immediate(&self) -> Word {
        let Some(argument) = &self.argument else {
            return Word::zero();
        };
        let width = self.opcode.push_len();
        if argument.len() == width {
            return Word::from_bytes(argument);
        }
        let mut padded = vec![0u8; width];
        padded[..argument.len()].copy_from_slice(argument);
        Word::from_bytes(&padded)
    }

    /// Byte offset of the next instruction.
    pub fn next_offset(&self) -> usize {
        self.offset + 1 + self.argument.as_ref().map(Vec::len).unwrap_or_default()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x} {}", self.offset, self.opcode.name())?;
        if let Some(argument) = &self.argument {
            write!(f, " 0x{}", hex::encode(argument))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct Bytecode {
    pub code: Vec<u8>,
    pub instructions: Vec<Instruction>,
    /// Sorted `(byte offset, instruction index)` pairs of every JUMPDEST.
    pub jumptable: Vec<(usize, usize)>,
}

impl Bytecode {
    pub fn new(code: Vec<u8>, instructions: Vec<Instruction>, jumptable: Vec<(usize, usize)>) -> Self {
        Self {
            code,
            instructions,
            jumptable,
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Instruction index for a jump to `offset`, if it lands on a JUMPDEST
    /// that is not part of PUSH data.
    pub fn resolve_jump(&self, offset: usize) -> Option<usize> {
        let index = self
            .jumptable
            .binary_search_by_key(&offset, |(key, _)| *key)
            .ok()?;
        Some(self.jumptable[index].1)
    }
}

pub struct Decoder;

impl Decoder {
    pub fn decode(code: impl Into<Vec<u8>>) -> Bytecode {
        let code = code.into();
        let mut instructions = Vec::new();
        let mut jumptable = Vec::new();

        let mut pos = 0;
        while pos < code.len() {
            let opcode = get_opcode(code[pos]);
            if opcode.code == JUMPDEST {
                jumptable.push((pos, instructions.len()));
            }

            let width = opcode.push_len();
            let argument = if width > 0 {
                let start = (pos + 1).min(code.len());
                let end = (pos + 1 + width).min(code.len());
                Some(code[start..end].to_vec())
            } else {
                None
            };

            let instruction = Instruction {
                opcode,
                offset: pos,
                argument,
            };
            pos = instruction.next_offset();
            instructions.push(instruction);
        }

        Bytecode::new(code, instructions, jumptable)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(code: &Bytecode) -> Vec<String> {
        code.instructions.iter().map(|i| i.opcode.name()).collect()
    }

    #[test]
    fn test_decode_simple() {
        let code = Decoder::decode(vec![0x60, 0x01, 0x60, 0x01, 0x01]);
        assert_eq!(names(&code), vec!["PUSH1", "PUSH1", "ADD"]);
        assert_eq!(code.instructions[1].offset, 2);
        assert_eq!(code.instructions[1].immediate(), Word::one());
    }

    #[test]
    fn test_truncated_push_is_clipped() {
        let code = Decoder::decode(vec![0x00, 0x61, 0xab]);
        assert_eq!(code.instructions.len(), 2);
        assert_eq!(code.instructions[1].argument, Some(vec![0xab]));
        assert_eq!(code.instructions[1].immediate(), Word::from(0xab00));

        let code = Decoder::decode(vec![0x7f]);
        assert_eq!(code.instructions[0].argument, Some(vec![]));
        assert_eq!(code.instructions[0].immediate(), Word::zero());
    }

    #[test]
    fn test_undefined_bytes_are_preserved() {
        let code = Decoder::decode(vec![0x0c, 0xef, 0x00]);
        assert_eq!(code.instructions.len(), 3);
        assert_eq!(code.instructions[0].opcode.code, 0x0c);
        assert_eq!(code.instructions[1].opcode.code, 0xef);
        assert!(!code.instructions[1].opcode.is_defined());
    }

    #[test]
    fn test_jumpdest_inside_push_data() {
        // PUSH2 0x5b5b, JUMPDEST
        let code = Decoder::decode(vec![0x61, 0x5b, 0x5b, 0x5b]);
        assert_eq!(code.jumptable, vec![(3, 1)]);
        assert_eq!(code.resolve_jump(1), None);
        assert_eq!(code.resolve_jump(3), Some(1));
    }

    #[test]
    fn test_reassemble() {
        let bytes = hex::decode("6080604052348015600f57600080fd5b50").unwrap();
        let code = Decoder::decode(bytes.clone());
        let mut out = Vec::new();
        for instruction in &code.instructions {
            out.push(instruction.opcode.code);
            if let Some(argument) = &instruction.argument {
                out.extend_from_slice(argument);
            }
        }
        assert_eq!(out, bytes);
    }
}
