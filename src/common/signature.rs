use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::common::{address::Address, hash::keccak256, word::Word, word::word};

/// secp256k1 group order.
pub const SECP256K1_N: Word =
    word("0xfffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141");

pub const SECP256K1_N_HALF: Word =
    word("0x7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0");

/// Recovers the signer address from a prehashed message.
///
/// `parity` is the y-parity bit (0 or 1). Signatures with a high `s` are
/// accepted: they are normalized to `n - s` with the parity flipped, since
/// the underlying library only verifies low-s form.
pub fn recover(hash: &[u8; 32], parity: u8, r: &Word, s: &Word) -> Option<Address> {
    if parity > 1 {
        return None;
    }
    if r.is_zero() || s.is_zero() || *r >= SECP256K1_N || *s >= SECP256K1_N {
        return None;
    }

    let (s, parity) = if *s > SECP256K1_N_HALF {
        (SECP256K1_N - *s, parity ^ 1)
    } else {
        (*s, parity)
    };

    let mut bytes = [0u8; 64];
    bytes[0..32].copy_from_slice(&r.into_bytes());
    bytes[32..64].copy_from_slice(&s.into_bytes());

    let signature = Signature::from_slice(&bytes).ok()?;
    let recovery_id = RecoveryId::from_byte(parity)?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id).ok()?;

    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Some(Address::from_hash(&hash))
}
