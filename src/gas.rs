//! Gas schedule and pure cost functions.
//!
//! Everything here is a function of its arguments only; warm/cold status and
//! storage values are looked up by the caller and passed in.

use crate::{
    common::{tx::AccessListItem, word::Word},
    config::Config,
    executor::ExecutorError,
};

pub const ZERO: u64 = 0;
pub const BASE: u64 = 2;
pub const VERY_LOW: u64 = 3;
pub const LOW: u64 = 5;
pub const MID: u64 = 8;
pub const HIGH: u64 = 10;
pub const JUMPDEST: u64 = 1;
pub const BLOCKHASH: u64 = 20;

pub const WARM_STORAGE_READ: u64 = 100;
pub const COLD_SLOAD: u64 = 2100;
pub const COLD_ACCOUNT_ACCESS: u64 = 2600;

pub const SSTORE_SET: u64 = 20_000;
pub const SSTORE_RESET: u64 = 5000 - COLD_SLOAD;
pub const SSTORE_CLEARS_REFUND: i64 = 4800;
pub const SSTORE_SENTRY: u64 = 2300;

pub const CALL_VALUE: u64 = 9000;
pub const CALL_STIPEND: u64 = 2300;
pub const NEW_ACCOUNT: u64 = 25_000;

pub const CREATE: u64 = 32_000;
pub const CODE_DEPOSIT: u64 = 200;
pub const INITCODE_WORD: u64 = 2;
pub const KECCAK: u64 = 30;
pub const KECCAK_WORD: u64 = 6;
pub const COPY_WORD: u64 = 3;
pub const LOG: u64 = 375;
pub const LOG_TOPIC: u64 = 375;
pub const LOG_DATA: u64 = 8;
pub const EXP: u64 = 10;
pub const EXP_BYTE: u64 = 50;
pub const SELFDESTRUCT: u64 = 5000;
pub const TRANSIENT: u64 = 100;

pub const TX: u64 = 21_000;
pub const TX_CREATE: u64 = 32_000;
pub const TX_DATA_ZERO: u64 = 4;
pub const TX_DATA_NON_ZERO: u64 = 16;
pub const ACCESS_LIST_ADDRESS: u64 = 2400;
pub const ACCESS_LIST_STORAGE_KEY: u64 = 1900;
pub const PER_AUTH_BASE: u64 = 12_500;
pub const FLOOR_PER_TOKEN: u64 = 10;

pub const MAX_CODE_SIZE: usize = 24_576;
pub const MAX_INITCODE_SIZE: usize = 2 * MAX_CODE_SIZE;
pub const MAX_REFUND_QUOTIENT: u64 = 5;

/// Memory offsets at or beyond this bound cost more gas than any block holds.
const MEMORY_LIMIT: u64 = u32::MAX as u64;

/// Gas budget of one call frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Gas {
    pub limit: u64,
    pub used: u64,
    /// Signed refund accumulated by this frame and its committed children.
    pub refund: i64,
}

impl Gas {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            refund: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn charge(&mut self, cost: u64) -> Result<(), ExecutorError> {
        if cost > self.remaining() {
            self.used = self.limit;
            return Err(ExecutorError::OutOfGas);
        }
        self.used += cost;
        Ok(())
    }

    /// Gives back gas that was set aside but not spent (child leftovers, stipend).
    pub fn reclaim(&mut self, amount: u64) {
        self.used = self.used.saturating_sub(amount);
    }

    pub fn consume_all(&mut self) {
        self.used = self.limit;
    }

    pub fn record_refund(&mut self, delta: i64) {
        self.refund += delta;
    }
}

/// Base cost charged before an opcode executes. `None` for undefined bytes.
pub fn static_cost(opcode: u8) -> Option<u64> {
    let cost = match opcode {
        0x00 => ZERO,
        0x01 | 0x03 => VERY_LOW,
        0x02 | 0x04..=0x07 | 0x0b => LOW,
        0x08 | 0x09 => MID,
        0x0a => EXP,
        0x10..=0x1d => VERY_LOW,
        0x20 => KECCAK,
        0x30 | 0x32..=0x34 | 0x36 | 0x38 | 0x3a | 0x3d => BASE,
        0x31 | 0x3b | 0x3c | 0x3f => ZERO,
        0x35 | 0x37 | 0x39 | 0x3e => VERY_LOW,
        0x40 => BLOCKHASH,
        0x41..=0x46 | 0x48 | 0x4a => BASE,
        0x47 => LOW,
        0x49 => VERY_LOW,
        0x50 => BASE,
        0x51..=0x53 => VERY_LOW,
        0x54 | 0x55 => ZERO,
        0x56 => MID,
        0x57 => HIGH,
        0x58..=0x5a => BASE,
        0x5b => JUMPDEST,
        0x5c | 0x5d => TRANSIENT,
        0x5e => VERY_LOW,
        0x5f => BASE,
        0x60..=0x9f => VERY_LOW,
        0xa0..=0xa4 => LOG,
        0xf0 | 0xf5 => CREATE,
        0xf1 | 0xf2 | 0xf4 | 0xfa => ZERO,
        0xf3 | 0xfd | 0xfe => ZERO,
        0xff => SELFDESTRUCT,
        _ => return None,
    };
    Some(cost)
}

pub fn words(len: u64) -> u64 {
    len.div_ceil(32)
}

/// `3 * words + words^2 / 512`
pub fn memory_cost(words: u64) -> u64 {
    VERY_LOW * words + words * words / 512
}

/// Words needed to cover `[offset, offset + len)`, or `None` when the range
/// is too large to ever be paid for. A zero length needs no memory.
pub fn memory_words(offset: &Word, len: &Word) -> Option<u64> {
    if len.is_zero() {
        return Some(0);
    }
    let offset = offset.to_u64().filter(|v| *v < MEMORY_LIMIT)?;
    let len = len.to_u64().filter(|v| *v < MEMORY_LIMIT)?;
    Some(words(offset + len))
}

/// Cost of growing memory from `current` words to cover `new` words.
pub fn memory_expansion(current: u64, new: u64) -> u64 {
    if new <= current {
        return 0;
    }
    memory_cost(new) - memory_cost(current)
}

pub fn copy_cost(len: u64) -> u64 {
    COPY_WORD * words(len)
}

pub fn exp_cost(exponent: &Word) -> u64 {
    EXP_BYTE * exponent.byte_len() as u64
}

pub fn keccak_cost(len: u64) -> u64 {
    KECCAK_WORD * words(len)
}

pub fn log_cost(topics: u64, len: u64) -> u64 {
    LOG_TOPIC * topics + LOG_DATA * len
}

pub fn access_cost(warm: bool) -> u64 {
    if warm {
        WARM_STORAGE_READ
    } else {
        COLD_ACCOUNT_ACCESS
    }
}

pub fn sload_cost(warm: bool) -> u64 {
    if warm { WARM_STORAGE_READ } else { COLD_SLOAD }
}

/// EIP-2200 / EIP-2929 net metering. `original` is the value at the start of
/// the transaction, `current` the value before this store.
pub fn sstore_cost(original: &Word, current: &Word, new: &Word, warm: bool) -> u64 {
    let cold = if warm { 0 } else { COLD_SLOAD };
    let cost = if current == new {
        WARM_STORAGE_READ
    } else if original == current {
        if original.is_zero() {
            SSTORE_SET
        } else {
            SSTORE_RESET
        }
    } else {
        WARM_STORAGE_READ
    };
    cost + cold
}

/// EIP-3529 refund delta for a single SSTORE.
pub fn sstore_refund(original: &Word, current: &Word, new: &Word) -> i64 {
    if current == new {
        return 0;
    }
    let mut refund = 0i64;
    if original == current {
        if !original.is_zero() && new.is_zero() {
            refund += SSTORE_CLEARS_REFUND;
        }
        return refund;
    }
    if !original.is_zero() {
        if current.is_zero() {
            refund -= SSTORE_CLEARS_REFUND;
        } else if new.is_zero() {
            refund += SSTORE_CLEARS_REFUND;
        }
    }
    if original == new {
        if original.is_zero() {
            refund += (SSTORE_SET - WARM_STORAGE_READ) as i64;
        } else {
            refund += (SSTORE_RESET - WARM_STORAGE_READ) as i64;
        }
    }
    refund
}

/// Extra cost of the CALL family beyond memory expansion.
pub fn call_cost(warm: bool, transfers_value: bool, creates_account: bool) -> u64 {
    let mut cost = access_cost(warm);
    if transfers_value {
        cost += CALL_VALUE;
    }
    if creates_account {
        cost += NEW_ACCOUNT;
    }
    cost
}

/// All but one 64th (EIP-150).
pub fn all_but_one_64th(gas: u64) -> u64 {
    gas - gas / 64
}

/// Gas handed to a callee: the request capped by the 63/64 rule.
pub fn forwarded_gas(requested: &Word, available: u64) -> u64 {
    let cap = all_but_one_64th(available);
    match requested.to_u64() {
        Some(requested) => requested.min(cap),
        None => cap,
    }
}

/// Dynamic part of CREATE/CREATE2: init-code word cost plus hashing for CREATE2.
pub fn create_cost(init_len: u64, create2: bool) -> u64 {
    let words = words(init_len);
    let hashing = if create2 { KECCAK_WORD * words } else { 0 };
    INITCODE_WORD * words + hashing
}

pub fn code_deposit_cost(len: usize) -> u64 {
    CODE_DEPOSIT * len as u64
}

pub fn selfdestruct_cost(warm: bool, creates_account: bool) -> u64 {
    let mut cost = if warm { 0 } else { COLD_ACCOUNT_ACCESS };
    if creates_account {
        cost += NEW_ACCOUNT;
    }
    cost
}

/// EIP-7623 calldata tokens: zero bytes count 1, others 4.
pub fn calldata_tokens(data: &[u8]) -> u64 {
    let zeros = data.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    zeros + non_zeros * 4
}

/// Minimum gas a transaction is billed under EIP-7623.
pub fn floor_gas(data: &[u8]) -> u64 {
    TX + FLOOR_PER_TOKEN * calldata_tokens(data)
}

pub fn intrinsic_gas(
    config: &Config,
    data: &[u8],
    is_create: bool,
    access_list: &[AccessListItem],
    authorizations: usize,
) -> u64 {
    let zeros = data.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    let mut gas = TX + zeros * TX_DATA_ZERO + non_zeros * TX_DATA_NON_ZERO;

    if is_create {
        gas += TX_CREATE + INITCODE_WORD * words(data.len() as u64);
    }

    for item in access_list {
        gas += ACCESS_LIST_ADDRESS + ACCESS_LIST_STORAGE_KEY * item.storage_keys.len() as u64;
    }

    if config.eip7702 {
        gas += PER_AUTH_BASE * authorizations as u64;
    }
    gas
}
