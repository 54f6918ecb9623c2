use std::{collections::BTreeSet, sync::Arc};

use num_bigint::BigUint;
use num_traits::Zero;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    common::{address::Address, signature::recover, word::Word},
    config::Hardfork,
};

mod blake2;
mod bls;
mod bn254;
mod kzg;

pub use bls::BlsPrecompiles;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrecompileError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid point")]
    InvalidPoint,
    #[error("verification failed")]
    VerificationFailed,
    #[error("no precompile at {0}")]
    Unknown(Address),
}

/// Native contract implementations keyed by reserved address.
///
/// `execute` is only invoked after the caller has been charged `gas_cost`
/// for the same input; an error is a failed call, never a transaction abort.
pub trait PrecompileProvider: Send + Sync + std::fmt::Debug {
    fn addresses(&self) -> Vec<Address>;

    fn can_handle(&self, address: &Address) -> bool {
        self.addresses().contains(address)
    }

    fn gas_cost(&self, address: &Address, input: &[u8]) -> u64;

    fn execute(&self, address: &Address, input: &[u8]) -> Result<Vec<u8>, PrecompileError>;
}

/// First-match-wins union of providers.
#[derive(Clone, Default)]
pub struct Precompiles {
    providers: Vec<Arc<dyn PrecompileProvider>>,
}

impl std::fmt::Debug for Precompiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.addresses()).finish()
    }
}

impl Precompiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_hardfork(hardfork: Hardfork) -> Self {
        let standard = Self::new().with(Arc::new(StandardPrecompiles));
        match hardfork {
            Hardfork::Cancun => standard,
            Hardfork::Prague => standard.with(Arc::new(BlsPrecompiles)),
        }
    }

    /// Prepends `provider`, so it shadows any provider added before it.
    pub fn with(mut self, provider: Arc<dyn PrecompileProvider>) -> Self {
        self.providers.insert(0, provider);
        self
    }

    fn provider(&self, address: &Address) -> Option<&Arc<dyn PrecompileProvider>> {
        self.providers.iter().find(|p| p.can_handle(address))
    }

    pub fn can_handle(&self, address: &Address) -> bool {
        self.provider(address).is_some()
    }

    pub fn gas_cost(&self, address: &Address, input: &[u8]) -> Option<u64> {
        self.provider(address).map(|p| p.gas_cost(address, input))
    }

    pub fn execute(&self, address: &Address, input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
        self.provider(address)
            .ok_or(PrecompileError::Unknown(*address))?
            .execute(address, input)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.providers
            .iter()
            .flat_map(|p| p.addresses())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

pub const ECRECOVER: Address = Address::from_low_u64(0x01);
pub const SHA256: Address = Address::from_low_u64(0x02);
pub const RIPEMD160: Address = Address::from_low_u64(0x03);
pub const IDENTITY: Address = Address::from_low_u64(0x04);
pub const MODEXP: Address = Address::from_low_u64(0x05);
pub const BN254_ADD: Address = Address::from_low_u64(0x06);
pub const BN254_MUL: Address = Address::from_low_u64(0x07);
pub const BN254_PAIRING: Address = Address::from_low_u64(0x08);
pub const BLAKE2F: Address = Address::from_low_u64(0x09);
pub const POINT_EVALUATION: Address = Address::from_low_u64(0x0a);

/// Precompiles 0x01 through 0x0a, shared by Cancun and Prague.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPrecompiles;

impl PrecompileProvider for StandardPrecompiles {
    fn addresses(&self) -> Vec<Address> {
        (0x01..=0x0a).map(Address::from_low_u64).collect()
    }

    fn can_handle(&self, address: &Address) -> bool {
        (ECRECOVER..=POINT_EVALUATION).contains(address)
    }

    fn gas_cost(&self, address: &Address, input: &[u8]) -> u64 {
        let words = input.len().div_ceil(32) as u64;
        match *address {
            ECRECOVER => 3000,
            SHA256 => 60 + 12 * words,
            RIPEMD160 => 600 + 120 * words,
            IDENTITY => 15 + 3 * words,
            MODEXP => modexp_gas_cost(input),
            BN254_ADD => 150,
            BN254_MUL => 6000,
            BN254_PAIRING => 45_000 + 34_000 * (input.len() / 192) as u64,
            BLAKE2F => blake2::gas_cost(input),
            POINT_EVALUATION => 50_000,
            _ => 0,
        }
    }

    fn execute(&self, address: &Address, input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
        match *address {
            ECRECOVER => Ok(ecrecover(input)),
            SHA256 => Ok(Sha256::digest(input).to_vec()),
            RIPEMD160 => Ok(ripemd160(input)),
            IDENTITY => Ok(input.to_vec()),
            MODEXP => modexp(input),
            BN254_ADD => bn254::add(input),
            BN254_MUL => bn254::mul(input),
            BN254_PAIRING => bn254::pairing(input),
            BLAKE2F => blake2::compress(input),
            POINT_EVALUATION => kzg::point_evaluation(input),
            _ => Err(PrecompileError::Unknown(*address)),
        }
    }
}

/// `len` bytes of `input` starting at `offset`, zero-filled past the end.
pub(crate) fn padded(input: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset < input.len() {
        let end = input.len().min(offset.saturating_add(len));
        out[..end - offset].copy_from_slice(&input[offset..end]);
    }
    out
}

/// Left-pads to 32 bytes; empty output when recovery fails.
fn ecrecover(input: &[u8]) -> Vec<u8> {
    let input = padded(input, 0, 128);
    let v = Word::from_bytes(&input[32..64]);
    let parity = match v.to_u64() {
        Some(27) => 0,
        Some(28) => 1,
        _ => return vec![],
    };
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&input[0..32]);
    let r = Word::from_bytes(&input[64..96]);
    let s = Word::from_bytes(&input[96..128]);

    match recover(&hash, parity, &r, &s) {
        Some(address) => address.as_word().into_bytes().to_vec(),
        None => vec![],
    }
}

fn ripemd160(input: &[u8]) -> Vec<u8> {
    let hash = Ripemd160::digest(input);
    let mut out = vec![0u8; 32];
    out[12..].copy_from_slice(&hash);
    out
}

struct ModexpHeader {
    base_len: Word,
    exp_len: Word,
    mod_len: Word,
}

impl ModexpHeader {
    fn parse(input: &[u8]) -> Self {
        Self {
            base_len: Word::from_bytes(&padded(input, 0, 32)),
            exp_len: Word::from_bytes(&padded(input, 32, 32)),
            mod_len: Word::from_bytes(&padded(input, 64, 32)),
        }
    }
}

/// EIP-2565 pricing.
fn modexp_gas_cost(input: &[u8]) -> u64 {
    const MIN_GAS: u128 = 200;

    let header = ModexpHeader::parse(input);
    let (Some(base_len), Some(exp_len), Some(mod_len)) = (
        header.base_len.to_u64(),
        header.exp_len.to_u64(),
        header.mod_len.to_u64(),
    ) else {
        return u64::MAX;
    };

    let words = base_len.max(mod_len).div_ceil(8) as u128;
    let complexity = words * words;

    let head_len = exp_len.min(32) as usize;
    let head = match usize::try_from(base_len) {
        Ok(base_len) => Word::from_bytes(&padded(input, 96usize.saturating_add(base_len), head_len)),
        Err(_) => Word::zero(),
    };
    let head_bits = head.bits() as u128;
    let iterations = if exp_len <= 32 {
        head_bits.saturating_sub(1)
    } else {
        8 * (exp_len as u128 - 32) + head_bits.saturating_sub(1)
    };

    let gas = (complexity * iterations.max(1) / 3).max(MIN_GAS);
    u64::try_from(gas).unwrap_or(u64::MAX)
}

fn modexp(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let header = ModexpHeader::parse(input);
    if header.base_len.is_zero() && header.mod_len.is_zero() {
        return Ok(vec![]);
    }
    let length = |word: &Word| {
        word.to_usize()
            .filter(|len| *len <= u32::MAX as usize)
            .ok_or(PrecompileError::InvalidInput("modexp length too large"))
    };
    let base_len = length(&header.base_len)?;
    let exp_len = length(&header.exp_len)?;
    let mod_len = length(&header.mod_len)?;

    let base = BigUint::from_bytes_be(&padded(input, 96, base_len));
    let exp = BigUint::from_bytes_be(&padded(input, 96 + base_len, exp_len));
    let modulus = BigUint::from_bytes_be(&padded(input, 96 + base_len + exp_len, mod_len));

    if modulus.is_zero() {
        return Ok(vec![0u8; mod_len]);
    }

    let result = base.modpow(&exp, &modulus).to_bytes_be();
    let mut out = vec![0u8; mod_len];
    out[mod_len - result.len()..].copy_from_slice(&result);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s.replace(['\n', ' '], "")).unwrap()
    }

    #[test]
    fn test_can_handle() {
        let precompiles = Precompiles::for_hardfork(Hardfork::Cancun);
        for i in 1..=10 {
            assert!(precompiles.can_handle(&Address::from_low_u64(i)));
        }
        assert!(!precompiles.can_handle(&Address::zero()));
        assert!(!precompiles.can_handle(&Address::from_low_u64(0x0b)));

        let mut high = Address::from_low_u64(1);
        high.0[0] = 1;
        assert!(!precompiles.can_handle(&high));

        let prague = Precompiles::for_hardfork(Hardfork::Prague);
        assert!(prague.can_handle(&Address::from_low_u64(0x0b)));
        assert!(prague.can_handle(&Address::from_low_u64(0x0f)));
        assert!(!prague.can_handle(&Address::from_low_u64(0x10)));
        assert_eq!(prague.addresses().len(), 15);
    }

    #[derive(Debug)]
    struct Echo;

    impl PrecompileProvider for Echo {
        fn addresses(&self) -> Vec<Address> {
            vec![SHA256, Address::from_low_u64(0x1234)]
        }

        fn gas_cost(&self, _: &Address, _: &[u8]) -> u64 {
            1
        }

        fn execute(&self, _: &Address, input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
            Ok(input.iter().rev().copied().collect())
        }
    }

    #[test]
    fn test_first_match_wins() {
        let precompiles = Precompiles::for_hardfork(Hardfork::Cancun).with(Arc::new(Echo));
        assert_eq!(precompiles.gas_cost(&SHA256, &[1, 2]), Some(1));
        assert_eq!(precompiles.execute(&SHA256, &[1, 2]).unwrap(), vec![2, 1]);
        assert_eq!(precompiles.gas_cost(&IDENTITY, &[1, 2]), Some(18));
        assert!(precompiles.can_handle(&Address::from_low_u64(0x1234)));
        assert_eq!(
            precompiles.execute(&Address::from_low_u64(0x99), &[]),
            Err(PrecompileError::Unknown(Address::from_low_u64(0x99)))
        );
    }

    #[test]
    fn test_gas_cost() {
        let standard = StandardPrecompiles;
        let input = vec![0u8; 64];
        assert_eq!(standard.gas_cost(&ECRECOVER, &[]), 3000);
        assert_eq!(standard.gas_cost(&SHA256, &input), 60 + 12 * 2);
        assert_eq!(standard.gas_cost(&RIPEMD160, &input), 600 + 120 * 2);
        assert_eq!(standard.gas_cost(&IDENTITY, &input), 15 + 3 * 2);
        assert_eq!(standard.gas_cost(&BN254_ADD, &[]), 150);
        assert_eq!(standard.gas_cost(&BN254_MUL, &[]), 6000);
        assert_eq!(standard.gas_cost(&BN254_PAIRING, &[0u8; 384]), 45_000 + 68_000);
        assert_eq!(standard.gas_cost(&POINT_EVALUATION, &[]), 50_000);
    }

    #[test]
    fn test_ecrecover() {
        let input = bytes(
            "acee28ed6d5eff643274a2abd164fec12cc75f1ea78a87922304c04e2424bc88
            000000000000000000000000000000000000000000000000000000000000001c
            08da09260614b31b17af2ac76eaa7d50172b6d0cec03fe706748e2d532c0d309
            7e7a201aaefc664515b3a28a0bdd2fffdd58f3bff5fb639bf01f049c47648b3f",
        );
        assert_eq!(
            hex::encode(ecrecover(&input)),
            "000000000000000000000000d148c7f37b346a4bd8e14f8c1f181f5f640481c8"
        );

        // trailing bytes are ignored
        let mut long = input.clone();
        long.extend_from_slice(&[0xff; 16]);
        assert_eq!(ecrecover(&long), ecrecover(&input));
    }

    #[test]
    fn test_ecrecover_high_s() {
        let input = bytes(
            "a6588c81ba59e991dccec1b3c3b73c4b04cce35f30344c6df815d75e4d42351a
            000000000000000000000000000000000000000000000000000000000000001b
            4ca5e12d5fc25d983a215fb64032bbfe90a3e596d67a1b2cfa9646186a513704
            bda125db9c2f810df6eaf77a5479de3b147359425fc1534f1fee6c1211308966",
        );
        assert_eq!(
            hex::encode(ecrecover(&input)),
            "0000000000000000000000008948112e60ba94f6afdcfc6b690904b7321d3a52"
        );
    }

    #[test]
    fn test_ecrecover_rejects() {
        // v is neither 27 nor 28
        let mut input = vec![0u8; 128];
        input[63] = 26;
        assert_eq!(ecrecover(&input), Vec::<u8>::new());

        // garbage in the upper bytes of v
        input[63] = 27;
        input[32] = 1;
        assert_eq!(ecrecover(&input), Vec::<u8>::new());

        // r = s = 0
        assert_eq!(ecrecover(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_hashes() {
        let standard = StandardPrecompiles;
        assert_eq!(
            hex::encode(standard.execute(&SHA256, b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(standard.execute(&RIPEMD160, b"abc").unwrap()),
            "0000000000000000000000008eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
        assert_eq!(standard.execute(&IDENTITY, &[1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }

    fn modexp_input(base: &[u8], exp: &[u8], modulus: &[u8]) -> Vec<u8> {
        let mut input = Vec::new();
        for len in [base.len(), exp.len(), modulus.len()] {
            input.extend_from_slice(&Word::from(len).into_bytes());
        }
        input.extend_from_slice(base);
        input.extend_from_slice(exp);
        input.extend_from_slice(modulus);
        input
    }

    #[test]
    fn test_modexp() {
        assert_eq!(modexp(&modexp_input(&[3], &[2], &[5])).unwrap(), vec![4]);
        assert_eq!(modexp(&modexp_input(&[3], &[2], &[0])).unwrap(), vec![0]);
        assert_eq!(
            modexp(&modexp_input(&[2], &[10], &[0, 0, 0x01, 0x00])).unwrap(),
            vec![0, 0, 0, 0]
        );
        assert_eq!(modexp(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_modexp_empty_operands_ignore_exponent_length() {
        let mut input = Word::zero().into_bytes().to_vec();
        input.extend_from_slice(&Word::from(1u64 << 40).into_bytes());
        input.extend_from_slice(&Word::zero().into_bytes());

        let precompiles = Precompiles::for_hardfork(Hardfork::Cancun);
        let address = Address::from_low_u64(0x05);
        assert_eq!(precompiles.gas_cost(&address, &input), Some(200));
        assert_eq!(precompiles.execute(&address, &input).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_modexp_short_input_is_zero_padded() {
        // base_len = exp_len = mod_len = 1, base = 3, exp = 2 and the modulus byte missing
        let mut input = modexp_input(&[3], &[2], &[7]);
        input.pop();
        assert_eq!(modexp(&input).unwrap(), vec![0]);

        // modulus present, exponent truncated to zero: 3^0 mod 7
        let input = modexp_input(&[3], &[], &[7]);
        assert_eq!(modexp(&input).unwrap(), vec![1]);
    }

    #[test]
    fn test_modexp_gas_cost() {
        assert_eq!(modexp_gas_cost(&[]), 200);
        assert_eq!(modexp_gas_cost(&modexp_input(&[3], &[2], &[5])), 200);

        // 64-byte operands, 32-byte exponent with the top bit set:
        // words = 8, complexity = 64, iterations = 255
        let mut exp = vec![0u8; 32];
        exp[0] = 0x80;
        let input = modexp_input(&[1u8; 64], &exp, &[1u8; 64]);
        assert_eq!(modexp_gas_cost(&input), 64 * 255 / 3);

        // exponent longer than 32 bytes: 8 * (40 - 32) + (bits(head) - 1)
        let mut exp = vec![0u8; 40];
        exp[31] = 1;
        let input = modexp_input(&[1u8; 512], &exp, &[1u8; 512]);
        assert_eq!(modexp_gas_cost(&input), 64 * 64 * 64 / 3);

        let mut huge = vec![0xffu8; 32];
        huge.extend_from_slice(&[0u8; 64]);
        assert_eq!(modexp_gas_cost(&huge), u64::MAX);
    }

    #[test]
    fn test_padded() {
        assert_eq!(padded(&[1, 2, 3], 1, 4), vec![2, 3, 0, 0]);
        assert_eq!(padded(&[1, 2, 3], 5, 2), vec![0, 0]);
        assert_eq!(padded(&[1, 2, 3], usize::MAX, 2), vec![0, 0]);
    }
}
