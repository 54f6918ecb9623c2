//! Point evaluation precompile (EIP-4844).

use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{AffineRepr, CurveGroup, pairing::Pairing};
use ark_ff::PrimeField;
use ark_serialize::CanonicalDeserialize;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use super::PrecompileError;
use crate::common::{decode, tx::VERSIONED_HASH_VERSION_KZG};

const INPUT_LEN: usize = 192;

pub const FIELD_ELEMENTS_PER_BLOB: u64 = 4096;

/// Order of the BLS12-381 scalar field.
pub const BLS_MODULUS: [u8; 32] =
    decode("0x73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001");

/// `[tau]_2` from the KZG ceremony, compressed.
const TAU_G2: &str = "b5bfd7dd8cdeb128843bc287230af38926187075cbfbefa81009a2ce615ac53d\
                      2914e5870cb452d2afaaab24f3499f72185cbfee53492714734429b7b38608e2\
                      3926c911cceceac9a36851477ba4c60b087041de621000edc98edada20c1def2";

static TAU: Lazy<Option<G2Affine>> = Lazy::new(|| {
    let bytes = hex::decode(TAU_G2).ok()?;
    G2Affine::deserialize_compressed(&bytes[..]).ok()
});

pub fn versioned_hash(commitment: &[u8]) -> [u8; 32] {
    let mut hash: [u8; 32] = Sha256::digest(commitment).into();
    hash[0] = VERSIONED_HASH_VERSION_KZG;
    hash
}

fn read_scalar(bytes: &[u8]) -> Result<Fr, PrecompileError> {
    if bytes >= &BLS_MODULUS[..] {
        return Err(PrecompileError::InvalidInput("scalar not in field"));
    }
    Ok(Fr::from_be_bytes_mod_order(bytes))
}

fn read_g1(bytes: &[u8]) -> Result<G1Affine, PrecompileError> {
    G1Affine::deserialize_compressed(bytes).map_err(|_| PrecompileError::InvalidPoint)
}

/// Input: `versioned_hash ++ z ++ y ++ commitment ++ proof`. Verifies that the
/// committed polynomial evaluates to `y` at `z`.
pub(super) fn point_evaluation(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    if input.len() != INPUT_LEN {
        return Err(PrecompileError::InvalidInput("point evaluation input length"));
    }
    let commitment_bytes = &input[96..144];
    if versioned_hash(commitment_bytes)[..] != input[0..32] {
        return Err(PrecompileError::InvalidInput("mismatched versioned hash"));
    }

    let z = read_scalar(&input[32..64])?;
    let y = read_scalar(&input[64..96])?;
    let commitment = read_g1(commitment_bytes)?;
    let proof = read_g1(&input[144..192])?;
    let tau = TAU
        .as_ref()
        .ok_or(PrecompileError::InvalidInput("trusted setup unavailable"))?;

    // e(C - [y]_1, [1]_2) == e(proof, [tau - z]_2)
    let g1 = G1Affine::generator();
    let g2 = G2Affine::generator();
    let p_minus_y = (G1Projective::from(commitment) - g1 * y).into_affine();
    let x_minus_z = (G2Projective::from(*tau) - g2 * z).into_affine();

    if Bls12_381::pairing(p_minus_y, g2) != Bls12_381::pairing(proof, x_minus_z) {
        return Err(PrecompileError::VerificationFailed);
    }

    let mut out = vec![0u8; 64];
    out[24..32].copy_from_slice(&FIELD_ELEMENTS_PER_BLOB.to_be_bytes());
    out[32..].copy_from_slice(&BLS_MODULUS);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Commitment and proof of the zero polynomial: the point at infinity.
    fn zero_polynomial_input(z: u8, y: u8) -> Vec<u8> {
        let mut infinity = vec![0u8; 48];
        infinity[0] = 0xc0;

        let mut input = versioned_hash(&infinity).to_vec();
        let mut scalar = [0u8; 32];
        scalar[31] = z;
        input.extend_from_slice(&scalar);
        scalar[31] = y;
        input.extend_from_slice(&scalar);
        input.extend_from_slice(&infinity);
        input.extend_from_slice(&infinity);
        input
    }

    #[test]
    fn test_versioned_hash() {
        let mut infinity = vec![0u8; 48];
        infinity[0] = 0xc0;
        assert_eq!(
            hex::encode(versioned_hash(&infinity)),
            "010657f37554c781402a22917dee2f75def7ab966d7b770905398eba3c444014"
        );
    }

    #[test]
    fn test_trusted_setup_parses() {
        assert!(TAU.is_some());
    }

    #[test]
    fn test_zero_polynomial() {
        let out = point_evaluation(&zero_polynomial_input(7, 0)).unwrap();
        assert_eq!(
            hex::encode(out),
            "0000000000000000000000000000000000000000000000000000000000001000\
             73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001"
        );
    }

    #[test]
    fn test_wrong_evaluation() {
        assert_eq!(
            point_evaluation(&zero_polynomial_input(7, 1)),
            Err(PrecompileError::VerificationFailed)
        );
    }

    #[test]
    fn test_invalid_input() {
        assert!(point_evaluation(&[0u8; 191]).is_err());

        let mut input = zero_polynomial_input(7, 0);
        input[0] = 0x02;
        assert_eq!(
            point_evaluation(&input),
            Err(PrecompileError::InvalidInput("mismatched versioned hash"))
        );

        let mut input = zero_polynomial_input(7, 0);
        input[32..64].copy_from_slice(&BLS_MODULUS);
        assert_eq!(
            point_evaluation(&input),
            Err(PrecompileError::InvalidInput("scalar not in field"))
        );
    }
}
