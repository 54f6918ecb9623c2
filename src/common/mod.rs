use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod address;
pub mod block;
pub mod hash;
pub mod signature;
pub mod tx;
pub mod word;

pub use address::Address;
pub use word::Word;

/// Byte buffer that (de)serializes as a `0x`-prefixed hex string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Hex(pub Vec<u8>);

impl Hex {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Hex {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Hex {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl AsRef<[u8]> for Hex {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for Hex {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl std::fmt::Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl Serialize for Hex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D>(deserializer: D) -> Result<Hex, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let text: String = Deserialize::deserialize(deserializer)?;
        let text = text.trim_start_matches("0x");
        let padded = if text.len() % 2 == 1 {
            format!("0{text}")
        } else {
            text.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|_| {
            D::Error::invalid_value(serde::de::Unexpected::Str(text), &"hex string")
        })?;
        Ok(Hex(bytes))
    }
}

/// Compile-time hex parsing into a right-aligned fixed buffer.
/// Odd-length input is treated as if left-padded with a zero nibble.
pub(crate) const fn decode<const N: usize>(s: &str) -> [u8; N] {
    let s = s.as_bytes();
    let mut out = [0u8; N];
    let start = if s.len() > 1 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X') {
        2
    } else {
        0
    };

    let mut pos = s.len();
    let mut nibble = 0;
    while pos > start {
        let c = s[pos - 1];
        let v = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => panic!("invalid hex digit"),
        };
        let index = N - 1 - nibble / 2;
        if nibble % 2 == 0 {
            out[index] = v;
        } else {
            out[index] |= v << 4;
        }
        nibble += 1;
        pos -= 1;
    }
    out
}
