use tiny_keccak::{Hasher, Keccak};

use crate::common::word::Word;

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut sha3 = Keccak::v256();
    let mut ret = [0u8; 32];
    sha3.update(input);
    sha3.finalize(&mut ret);
    ret
}

/// keccak256 of the empty byte string.
pub const EMPTY_CODE_HASH: Word =
    crate::common::word::word("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");
