use std::ops::{BitAnd, BitOr, BitXor, Not};

use i256::I256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::decode;

type U256 = primitive_types::U256;
type U512 = primitive_types::U512;

/// 256-bit machine word. All arithmetic wraps modulo 2^256 unless the method
/// name says otherwise.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Word(U256);

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::LowerHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Word {
    pub const fn zero() -> Self {
        Self(primitive_types::U256([0u64; 4]))
    }

    pub fn one() -> Self {
        Self(U256::one())
    }

    pub fn max() -> Self {
        Self(U256::max_value())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() > 32 {
            return Self(U256::from_big_endian(&bytes[bytes.len() - 32..]));
        }
        Self(U256::from_big_endian(bytes))
    }

    /// Reads up to 32 bytes and pads on the right, as PUSH and CALLDATALOAD do
    /// for short input.
    pub fn from_bytes_padded(bytes: &[u8]) -> Self {
        let mut buffer = [0u8; 32];
        let n = bytes.len().min(32);
        buffer[..n].copy_from_slice(&bytes[..n]);
        Self(U256::from_big_endian(&buffer))
    }

    pub fn into_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn from_hex(hex: &str) -> eyre::Result<Self> {
        let hex = hex.trim_start_matches("0x");
        if hex.is_empty() {
            return Ok(Self::zero());
        }
        let word = U256::from_str_radix(hex, 16);
        Ok(Self(word.map_err(|_| eyre::eyre!("Invalid U256: '{hex}'."))?))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn bit(&self, index: usize) -> bool {
        index < 256 && self.0.bit(index)
    }

    pub fn bits(&self) -> usize {
        self.0.bits()
    }

    /// Number of significant bytes, i.e. the length of the big-endian form
    /// with leading zeros stripped.
    pub fn byte_len(&self) -> usize {
        self.0.bits().div_ceil(8)
    }

    pub fn low_u64(&self) -> u64 {
        self.0.low_u64()
    }

    pub fn to_u64(&self) -> Option<u64> {
        (self.0.bits() <= 64).then(|| self.0.low_u64())
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|value| usize::try_from(value).ok())
    }

    /// Clamps values that do not fit into `usize` to `usize::MAX`.
    pub fn saturating_usize(&self) -> usize {
        self.to_usize().unwrap_or(usize::MAX)
    }

    pub fn as_u128(&self) -> u128 {
        self.0.low_u128()
    }

    pub fn overflowing_add(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_add(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_sub(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_sub(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_mul(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_mul(rhs.0);
        (Self(word), flag)
    }

    pub fn checked_add(&self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(&self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(&self, rhs: Self) -> Option<Self> {
        self.0.checked_mul(rhs.0).map(Self)
    }

    pub fn saturating_sub(&self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn saturating_add(&self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn pow(&self, exp: Self) -> Self {
        let (ret, _) = self.0.overflowing_pow(exp.0);
        Self(ret)
    }

    pub fn add_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let sum = U512::from(self.0) + U512::from(that.0);
        let res = sum % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    pub fn mul_modulo(&self, that: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = self.0.full_mul(that.0) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    pub fn is_negative(&self) -> bool {
        self.0.bit(255)
    }

    pub fn negate(&self) -> Self {
        let (word, _) = (!self.0).overflowing_add(U256::one());
        Self(word)
    }

    fn signed(&self) -> I256 {
        I256::from_be_bytes(self.into_bytes())
    }

    fn from_signed(value: I256) -> Self {
        Self::from_bytes(&value.to_be_bytes())
    }

    pub fn signed_lt(&self, rhs: &Self) -> bool {
        self.signed() < rhs.signed()
    }

    pub fn signed_gt(&self, rhs: &Self) -> bool {
        self.signed() > rhs.signed()
    }

    pub fn signed_div(&self, rhs: &Self) -> Self {
        if rhs.is_zero() {
            return Self::zero();
        }
        let (a, b) = (self.signed(), rhs.signed());
        if a == I256::MIN && b == I256::from(-1) {
            return *self;
        }
        Self::from_signed(a / b)
    }

    pub fn signed_rem(&self, rhs: &Self) -> Self {
        if rhs.is_zero() {
            return Self::zero();
        }
        let (a, b) = (self.signed(), rhs.signed());
        if b == I256::from(-1) {
            return Self::zero();
        }
        Self::from_signed(a % b)
    }

    /// SIGNEXTEND: extends the sign of the `(index + 1)`-th lowest byte.
    pub fn sign_extend(&self, index: &Word) -> Self {
        if *index >= Word::from(31) {
            return *self;
        }
        let bit = index.low_u64() as usize * 8 + 7;
        let mask = (U256::one() << bit) - U256::one();
        if self.0.bit(bit) {
            Self(self.0 | !mask)
        } else {
            Self(self.0 & mask)
        }
    }

    /// BYTE: the `index`-th byte counting from the most significant one.
    pub fn byte(&self, index: &Word) -> Self {
        if *index >= Word::from(32) {
            return Self::zero();
        }
        Self::from(self.into_bytes()[index.low_u64() as usize])
    }

    pub fn shl(&self, shift: &Word) -> Self {
        if *shift >= Word::from(256) {
            return Self::zero();
        }
        Self(self.0 << shift.low_u64() as usize)
    }

    pub fn shr(&self, shift: &Word) -> Self {
        if *shift >= Word::from(256) {
            return Self::zero();
        }
        Self(self.0 >> shift.low_u64() as usize)
    }

    pub fn sar(&self, shift: &Word) -> Self {
        let negative = self.is_negative();
        if *shift >= Word::from(256) {
            return if negative { Self::max() } else { Self::zero() };
        }
        let shift = shift.low_u64() as usize;
        if negative {
            Self(!((!self.0) >> shift))
        } else {
            Self(self.0 >> shift)
        }
    }
}

impl From<u8> for Word {
    fn from(value: u8) -> Self {
        Self(U256::from(value))
    }
}

impl From<bool> for Word {
    fn from(value: bool) -> Self {
        if value { Self::one() } else { Self::zero() }
    }
}

impl From<i32> for Word {
    fn from(value: i32) -> Self {
        if value < 0 {
            Self(U256::from(value.unsigned_abs())).negate()
        } else {
            Self(U256::from(value))
        }
    }
}

impl From<u32> for Word {
    fn from(value: u32) -> Self {
        Self(U256::from(value))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl From<[u8; 32]> for Word {
    fn from(value: [u8; 32]) -> Self {
        Self::from_bytes(&value)
    }
}

impl std::ops::Add<Word> for Word {
    type Output = Word;

    fn add(self, rhs: Word) -> Self::Output {
        self.overflowing_add(rhs).0
    }
}

impl std::ops::AddAssign<Word> for Word {
    fn add_assign(&mut self, rhs: Word) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<Word> for Word {
    type Output = Word;

    fn sub(self, rhs: Word) -> Self::Output {
        self.overflowing_sub(rhs).0
    }
}

impl std::ops::SubAssign<Word> for Word {
    fn sub_assign(&mut self, rhs: Word) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<Word> for Word {
    type Output = Word;

    fn mul(self, rhs: Word) -> Self::Output {
        self.overflowing_mul(rhs).0
    }
}

/// Division by zero yields zero.
impl std::ops::Div<Word> for Word {
    type Output = Word;

    fn div(self, rhs: Word) -> Self::Output {
        if rhs.is_zero() {
            return Word::zero();
        }
        Word(self.0 / rhs.0)
    }
}

/// Remainder by zero yields zero.
impl std::ops::Rem<Word> for Word {
    type Output = Word;

    fn rem(self, rhs: Word) -> Self::Output {
        if rhs.is_zero() {
            return Word::zero();
        }
        Word(self.0 % rhs.0)
    }
}

impl BitAnd for Word {
    type Output = Word;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl Not for Word {
    type Output = Word;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl Serialize for Word {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Word, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let text: String = Deserialize::deserialize(deserializer)?;
        if text.starts_with("0x") {
            Word::from_hex(&text).map_err(D::Error::custom)
        } else {
            U256::from_dec_str(&text)
                .map(Word)
                .map_err(|_| D::Error::custom(format!("Invalid U256: '{text}'.")))
        }
    }
}

pub const fn word(s: &str) -> Word {
    let bytes = decode::<32>(s);
    let mut limbs = [0u64; 4];
    let mut i = 0;
    while i < 4 {
        let mut limb = 0u64;
        let mut j = 0;
        while j < 8 {
            limb = (limb << 8) | bytes[(3 - i) * 8 + j] as u64;
            j += 1;
        }
        limbs[i] = limb;
        i += 1;
    }
    Word(primitive_types::U256(limbs))
}

const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Decodes the message of a Solidity `Error(string)` revert payload.
pub fn decode_error_string(ret: &[u8]) -> Option<String> {
    if ret.len() < 4 + 32 + 32 || ret[0..4] != ERROR_SELECTOR {
        return None;
    }
    let offset = Word::from_bytes(&ret[4..4 + 32]).to_usize()?;
    let start = 4usize.checked_add(offset)?;
    let end = start.checked_add(32)?;
    let size = Word::from_bytes(ret.get(start..end)?).to_usize()?;
    let data = ret.get(end..end.checked_add(size)?)?;
    String::from_utf8(data.to_vec()).ok()
}
