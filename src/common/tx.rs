use serde::{Deserialize, Serialize};

use crate::common::{
    Hex,
    address::Address,
    hash::keccak256,
    signature::{SECP256K1_N_HALF, recover},
    word::Word,
};

/// Blob gas consumed by a single blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 131_072;

/// First byte of a valid blob versioned hash.
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tx {
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub nonce: Word,
    #[serde(default)]
    pub value: Word,
    #[serde(alias = "data", default)]
    pub input: Hex,
    #[serde(alias = "gasLimit")]
    pub gas: Word,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: Option<Word>,
    #[serde(rename = "maxFeePerGas", default)]
    pub max_fee_per_gas: Option<Word>,
    #[serde(rename = "maxPriorityFeePerGas", default)]
    pub max_priority_fee_per_gas: Option<Word>,
    #[serde(rename = "maxFeePerBlobGas", default)]
    pub max_fee_per_blob_gas: Option<Word>,
    #[serde(rename = "blobVersionedHashes", default)]
    pub blob_versioned_hashes: Vec<Word>,
    #[serde(rename = "accessList", default)]
    pub access_list: Vec<AccessListItem>,
    #[serde(rename = "authorizationList", default)]
    pub authorization_list: Option<Vec<Authorization>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessListItem {
    pub address: Address,
    #[serde(rename = "storageKeys", default)]
    pub storage_keys: Vec<Word>,
}

/// EIP-7702 authorization tuple.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(rename = "chainId")]
    pub chain_id: Word,
    pub address: Address,
    pub nonce: Word,
    #[serde(rename = "yParity", alias = "v")]
    pub y_parity: Word,
    pub r: Word,
    pub s: Word,
}

impl Authorization {
    const MAGIC: u8 = 0x05;

    /// `keccak256(0x05 ++ rlp([chain_id, address, nonce]))`
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = rlp::RlpStream::new_list(3);
        stream.append(&trimmed(&self.chain_id));
        stream.append(&self.address.0.to_vec());
        stream.append(&trimmed(&self.nonce));
        let mut buffer = vec![Self::MAGIC];
        buffer.extend_from_slice(&stream.out());
        keccak256(&buffer)
    }

    /// Recovers the authority (signer). High-s signatures are rejected.
    pub fn authority(&self) -> Option<Address> {
        if self.s > SECP256K1_N_HALF {
            return None;
        }
        let parity = self.y_parity.to_u64().filter(|v| *v <= 1)? as u8;
        recover(&self.signing_hash(), parity, &self.r, &self.s)
    }
}

fn trimmed(word: &Word) -> Vec<u8> {
    word.into_bytes()
        .into_iter()
        .skip_while(|byte| byte == &0)
        .collect()
}

/// EIP-7702 delegation designator: `0xef0100 ++ address`.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

pub fn delegation_code(address: &Address) -> Vec<u8> {
    let mut code = DELEGATION_PREFIX.to_vec();
    code.extend_from_slice(&address.0);
    code
}

/// Target of a delegation designator, if `code` is one.
pub fn delegated_address(code: &[u8]) -> Option<Address> {
    if code.len() != 23 || code[..3] != DELEGATION_PREFIX {
        return None;
    }
    Address::try_from(&code[3..]).ok()
}

impl Tx {
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some()
    }

    pub fn is_blob(&self) -> bool {
        self.max_fee_per_blob_gas.is_some() || !self.blob_versioned_hashes.is_empty()
    }

    pub fn is_set_code(&self) -> bool {
        self.authorization_list.is_some()
    }

    pub fn authorizations(&self) -> &[Authorization] {
        self.authorization_list.as_deref().unwrap_or_default()
    }

    /// Upper bound of the per-gas price the sender agreed to pay.
    pub fn max_fee(&self) -> Word {
        self.max_fee_per_gas
            .or(self.gas_price)
            .unwrap_or_default()
    }

    /// EIP-1559: `base + min(priority, max_fee - base)`; legacy: `gas_price`.
    pub fn effective_gas_price(&self, base_fee: Word) -> Word {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee), priority) => {
                let priority = priority.unwrap_or_default();
                let headroom = max_fee.saturating_sub(base_fee);
                base_fee + std::cmp::min(priority, headroom)
            }
            _ => self.gas_price.unwrap_or_default(),
        }
    }

    pub fn blob_gas(&self) -> u64 {
        GAS_PER_BLOB * self.blob_versioned_hashes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::addr;

    #[test]
    fn test_effective_gas_price() {
        let tx = Tx {
            max_fee_per_gas: Some(Word::from(100)),
            max_priority_fee_per_gas: Some(Word::from(10)),
            ..Tx::default()
        };
        assert_eq!(tx.effective_gas_price(Word::from(50)), Word::from(60));
        assert_eq!(tx.effective_gas_price(Word::from(95)), Word::from(100));

        let legacy = Tx {
            gas_price: Some(Word::from(7)),
            ..Tx::default()
        };
        assert_eq!(legacy.effective_gas_price(Word::from(5)), Word::from(7));
        assert_eq!(legacy.max_fee(), Word::from(7));
    }

    #[test]
    fn test_authority_roundtrip() {
        use k256::ecdsa::SigningKey;

        let signing_key = SigningKey::from_bytes(&[0x11u8; 32].into()).unwrap();
        let point = signing_key.verifying_key().to_encoded_point(false);
        let signer = Address::from_hash(&keccak256(&point.as_bytes()[1..]));

        let mut auth = Authorization {
            chain_id: Word::one(),
            address: addr("0x00000000000000000000000000000000000000aa"),
            nonce: Word::zero(),
            ..Authorization::default()
        };
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&auth.signing_hash())
            .unwrap();
        let bytes = signature.to_bytes();
        auth.r = Word::from_bytes(&bytes[..32]);
        auth.s = Word::from_bytes(&bytes[32..]);
        auth.y_parity = Word::from(recovery_id.to_byte());

        assert_eq!(auth.authority(), Some(signer));

        auth.y_parity = Word::from(2);
        assert_eq!(auth.authority(), None);
    }

    #[test]
    fn test_delegation_code() {
        let target = addr("0x00000000000000000000000000000000000000aa");
        let code = delegation_code(&target);
        assert_eq!(code.len(), 23);
        assert_eq!(delegated_address(&code), Some(target));
        assert_eq!(delegated_address(&code[..22]), None);
        assert_eq!(delegated_address(&[0xef; 23]), None);
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "from": "0x00000000000000000000000000000000000000a1",
            "to": null,
            "input": "0x6001",
            "gas": "0x5208",
            "maxFeePerGas": "0x10",
            "accessList": [{"address": "0x00000000000000000000000000000000000000b2", "storageKeys": ["0x01"]}]
        }"#;
        let tx: Tx = serde_json::from_str(json).unwrap();
        assert!(tx.is_create());
        assert!(tx.is_eip1559());
        assert_eq!(tx.gas, Word::from(21000));
        assert_eq!(tx.input.as_slice(), &[0x60, 0x01]);
        assert_eq!(tx.access_list[0].storage_keys, vec![Word::one()]);
    }
}
