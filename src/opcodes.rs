use once_cell::sync::Lazy;

/// Static description of a single opcode byte.
///
/// Bytes without an instruction stay in the table as undefined entries that
/// keep their `code`, so decoding is lossless; executing one halts the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub code: u8,
    pub name: &'static str,
    /// Numeric suffix for families (`PUSH_`, `DUP_`, `SWAP_`, `LOG_`).
    pub n: u8,
    /// Stack items consumed.
    pub inputs: u8,
    /// Stack items produced.
    pub outputs: u8,
}

impl Opcode {
    const fn new(code: u8, name: &'static str, inputs: u8, outputs: u8) -> Self {
        Self {
            code,
            name,
            n: 0,
            inputs,
            outputs,
        }
    }

    const fn family(code: u8, name: &'static str, n: u8, inputs: u8, outputs: u8) -> Self {
        Self {
            code,
            name,
            n,
            inputs,
            outputs,
        }
    }

    const fn undefined(code: u8) -> Self {
        Self::new(code, UNDEFINED, 0, 0)
    }

    pub fn name(&self) -> String {
        if self.is_defined() {
            self.name.replace('_', &self.n.to_string())
        } else {
            format!("UNDEFINED(0x{:02x})", self.code)
        }
    }

    pub fn is_defined(&self) -> bool {
        self.name != UNDEFINED
    }

    /// Number of immediate bytes following the opcode (PUSH1..PUSH32).
    pub fn push_len(&self) -> usize {
        if self.name == "PUSH_" {
            self.n as usize
        } else {
            0
        }
    }
}

const UNDEFINED: &str = "undefined";

pub const STOP: u8 = 0x00;
pub const JUMPDEST: u8 = 0x5b;
pub const PUSH1: u8 = 0x60;
pub const PUSH32: u8 = 0x7f;
pub const INVALID: u8 = 0xfe;

/// `(code, name, inputs, outputs)` for every non-family instruction.
const INSTRUCTIONS: &[(u8, &str, u8, u8)] = &[
    (0x00, "STOP", 0, 0),
    (0x01, "ADD", 2, 1),
    (0x02, "MUL", 2, 1),
    (0x03, "SUB", 2, 1),
    (0x04, "DIV", 2, 1),
    (0x05, "SDIV", 2, 1),
    (0x06, "MOD", 2, 1),
    (0x07, "SMOD", 2, 1),
    (0x08, "ADDMOD", 3, 1),
    (0x09, "MULMOD", 3, 1),
    (0x0a, "EXP", 2, 1),
    (0x0b, "SIGNEXTEND", 2, 1),
    (0x10, "LT", 2, 1),
    (0x11, "GT", 2, 1),
    (0x12, "SLT", 2, 1),
    (0x13, "SGT", 2, 1),
    (0x14, "EQ", 2, 1),
    (0x15, "ISZERO", 1, 1),
    (0x16, "AND", 2, 1),
    (0x17, "OR", 2, 1),
    (0x18, "XOR", 2, 1),
    (0x19, "NOT", 1, 1),
    (0x1a, "BYTE", 2, 1),
    (0x1b, "SHL", 2, 1),
    (0x1c, "SHR", 2, 1),
    (0x1d, "SAR", 2, 1),
    (0x20, "KECCAK256", 2, 1),
    (0x30, "ADDRESS", 0, 1),
    (0x31, "BALANCE", 1, 1),
    (0x32, "ORIGIN", 0, 1),
    (0x33, "CALLER", 0, 1),
    (0x34, "CALLVALUE", 0, 1),
    (0x35, "CALLDATALOAD", 1, 1),
    (0x36, "CALLDATASIZE", 0, 1),
    (0x37, "CALLDATACOPY", 3, 0),
    (0x38, "CODESIZE", 0, 1),
    (0x39, "CODECOPY", 3, 0),
    (0x3a, "GASPRICE", 0, 1),
    (0x3b, "EXTCODESIZE", 1, 1),
    (0x3c, "EXTCODECOPY", 4, 0),
    (0x3d, "RETURNDATASIZE", 0, 1),
    (0x3e, "RETURNDATACOPY", 3, 0),
    (0x3f, "EXTCODEHASH", 1, 1),
    (0x40, "BLOCKHASH", 1, 1),
    (0x41, "COINBASE", 0, 1),
    (0x42, "TIMESTAMP", 0, 1),
    (0x43, "NUMBER", 0, 1),
    (0x44, "PREVRANDAO", 0, 1),
    (0x45, "GASLIMIT", 0, 1),
    (0x46, "CHAINID", 0, 1),
    (0x47, "SELFBALANCE", 0, 1),
    (0x48, "BASEFEE", 0, 1),
    (0x49, "BLOBHASH", 1, 1),
    (0x4a, "BLOBBASEFEE", 0, 1),
    (0x50, "POP", 1, 0),
    (0x51, "MLOAD", 1, 1),
    (0x52, "MSTORE", 2, 0),
    (0x53, "MSTORE8", 2, 0),
    (0x54, "SLOAD", 1, 1),
    (0x55, "SSTORE", 2, 0),
    (0x56, "JUMP", 1, 0),
    (0x57, "JUMPI", 2, 0),
    (0x58, "PC", 0, 1),
    (0x59, "MSIZE", 0, 1),
    (0x5a, "GAS", 0, 1),
    (0x5b, "JUMPDEST", 0, 0),
    (0x5c, "TLOAD", 1, 1),
    (0x5d, "TSTORE", 2, 0),
    (0x5e, "MCOPY", 3, 0),
    (0x5f, "PUSH0", 0, 1),
    (0xf0, "CREATE", 3, 1),
    (0xf1, "CALL", 7, 1),
    (0xf2, "CALLCODE", 7, 1),
    (0xf3, "RETURN", 2, 0),
    (0xf4, "DELEGATECALL", 6, 1),
    (0xf5, "CREATE2", 4, 1),
    (0xfa, "STATICCALL", 6, 1),
    (0xfd, "REVERT", 2, 0),
    (0xfe, "INVALID", 0, 0),
    (0xff, "SELFDESTRUCT", 1, 0),
];

static OPCODES: Lazy<[Opcode; 256]> = Lazy::new(|| {
    let mut table = [Opcode::undefined(0); 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = Opcode::undefined(i as u8);
    }
    for &(code, name, inputs, outputs) in INSTRUCTIONS {
        table[code as usize] = Opcode::new(code, name, inputs, outputs);
    }
    for n in 1..=32u8 {
        let code = PUSH1 + n - 1;
        table[code as usize] = Opcode::family(code, "PUSH_", n, 0, 1);
    }
    for n in 1..=16u8 {
        let dup = 0x80 + n - 1;
        table[dup as usize] = Opcode::family(dup, "DUP_", n, n, n + 1);
        let swap = 0x90 + n - 1;
        table[swap as usize] = Opcode::family(swap, "SWAP_", n, n + 1, n + 1);
    }
    for n in 0..=4u8 {
        let code = 0xa0 + n;
        table[code as usize] = Opcode::family(code, "LOG_", n, n + 2, 0);
    }
    table
});

pub fn get_opcode(value: u8) -> Opcode {
    OPCODES[value as usize]
}
