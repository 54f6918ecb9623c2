use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::common::{decode, hash::keccak256, word::Word};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address length: {0}")]
    InvalidLength(usize),
    #[error("Invalid address hex: {0}")]
    InvalidHex(String),
}

#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| byte == &0)
    }

    /// Low-numbered address `0x00..00NN`, as used for precompiles.
    pub const fn from_low_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let mut out = [0u8; 20];
        let mut i = 0;
        while i < 8 {
            out[12 + i] = bytes[i];
            i += 1;
        }
        Self(out)
    }

    /// CREATE: `keccak256(rlp([sender, nonce]))[12..]`.
    pub fn create(&self, nonce: u64) -> Address {
        let mut stream = rlp::RlpStream::new_list(2);
        stream.append(&self.0.to_vec());
        stream.append(&nonce);
        let hash = keccak256(&stream.out());
        Self::from_hash(&hash)
    }

    /// CREATE2: `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`.
    pub fn create2(&self, salt: &Word, init_code: &[u8]) -> Address {
        let mut buffer = Vec::with_capacity(1 + 20 + 32 + 32);
        buffer.push(0xffu8);
        buffer.extend_from_slice(&self.0);
        buffer.extend_from_slice(&salt.into_bytes());
        buffer.extend_from_slice(&keccak256(init_code));
        Self::from_hash(&keccak256(&buffer))
    }

    pub fn from_hash(hash: &[u8; 32]) -> Address {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash[12..32]);
        Address(addr)
    }

    pub fn as_word(&self) -> Word {
        Word::from_bytes(&self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<&Address> for Word {
    fn from(value: &Address) -> Self {
        value.as_word()
    }
}

impl From<Address> for Word {
    fn from(value: Address) -> Self {
        value.as_word()
    }
}

/// Keeps the low 20 bytes of the word.
impl From<&Word> for Address {
    fn from(value: &Word) -> Self {
        let bytes: [u8; 32] = value.into_bytes();
        let mut ret = Address::default();
        ret.0.copy_from_slice(&bytes[12..]);
        ret
    }
}

impl From<Word> for Address {
    fn from(value: Word) -> Self {
        (&value).into()
    }
}

impl From<[u8; 20]> for Address {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = AddressError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 20] = value
            .try_into()
            .map_err(|_| AddressError::InvalidLength(value.len()))?;
        Ok(Address(bytes))
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let hex = value.trim_start_matches("0x");
        if hex.len() != 40 {
            return Err(AddressError::InvalidLength(hex.len() / 2));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|_| AddressError::InvalidHex(value.to_string()))?;
        Ok(Address(bytes))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::try_from(s)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        Address::try_from(hex.as_str()).map_err(D::Error::custom)
    }
}

pub const fn addr(s: &str) -> Address {
    Address(decode(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_address() {
        assert_eq!(
            addr("0x5bc1c1942f2333acb9ce156525bc079fad983f13").create(0x065b),
            addr("0xe77afefd5b7beb79d1843e65a0fd54963abc742f")
        );
    }

    #[test]
    fn test_create_address_nonce_zero() {
        // rlp encodes nonce 0 as the empty string
        assert_eq!(
            addr("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0").create(0),
            addr("0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d")
        );
    }

    #[test]
    fn test_create2_address() {
        // EIP-1014 example 1
        assert_eq!(
            Address::zero().create2(&Word::zero(), &[0x00]),
            addr("0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38")
        );
        // EIP-1014 example 2
        assert_eq!(
            addr("0xdeadbeef00000000000000000000000000000000").create2(&Word::zero(), &[0x00]),
            addr("0xB928f69Bb1D91Cd65274e3c79d8986362984fDA3")
        );
    }

    #[test]
    fn test_word_conversion() {
        let address = addr("0x00000000000000000000000000000000000000ff");
        assert_eq!(Word::from(&address), Word::from(0xff));
        assert_eq!(Address::from(&Word::max()), addr("0xffffffffffffffffffffffffffffffffffffffff"));
        assert_eq!(Address::from_low_u64(9), addr("0x09"));
    }

    #[test]
    fn test_parse() {
        assert!(Address::try_from("0x1234").is_err());
        assert!(Address::try_from("zz00000000000000000000000000000000000000").is_err());
        assert_eq!(
            "0x00000000000000000000000000000000000000ff".parse::<Address>(),
            Ok(addr("0xff"))
        );
    }
}
