//! alt_bn128 precompiles (EIP-196, EIP-197, EIP-1108 pricing).

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G1Projective, G2Affine};
use ark_ec::{AffineRepr, CurveGroup, pairing::Pairing};
use ark_ff::{BigInt, BigInteger, One, PrimeField, Zero};

use super::{PrecompileError, padded};

const PAIR_LEN: usize = 192;

/// Reads a canonical (below the modulus) base field element.
fn read_fq(bytes: &[u8]) -> Result<Fq, PrecompileError> {
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.rchunks(8)) {
        let mut buf = [0u8; 8];
        buf[8 - chunk.len()..].copy_from_slice(chunk);
        *limb = u64::from_be_bytes(buf);
    }
    Fq::from_bigint(BigInt::new(limbs)).ok_or(PrecompileError::InvalidInput("coordinate not in field"))
}

fn read_g1(bytes: &[u8]) -> Result<G1Affine, PrecompileError> {
    let x = read_fq(&bytes[0..32])?;
    let y = read_fq(&bytes[32..64])?;
    if x.is_zero() && y.is_zero() {
        return Ok(G1Affine::identity());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        return Err(PrecompileError::InvalidPoint);
    }
    Ok(point)
}

/// Fq2 elements are encoded imaginary part first.
fn read_g2(bytes: &[u8]) -> Result<G2Affine, PrecompileError> {
    let x = Fq2::new(read_fq(&bytes[32..64])?, read_fq(&bytes[0..32])?);
    let y = Fq2::new(read_fq(&bytes[96..128])?, read_fq(&bytes[64..96])?);
    if x.is_zero() && y.is_zero() {
        return Ok(G2Affine::identity());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(PrecompileError::InvalidPoint);
    }
    Ok(point)
}

fn write_fq(out: &mut [u8], value: &Fq) {
    let bytes = value.into_bigint().to_bytes_be();
    out[32 - bytes.len()..32].copy_from_slice(&bytes);
}

fn encode_g1(point: G1Projective) -> Vec<u8> {
    let affine = point.into_affine();
    let mut out = vec![0u8; 64];
    if !affine.infinity {
        write_fq(&mut out[0..32], &affine.x);
        write_fq(&mut out[32..64], &affine.y);
    }
    out
}

pub(super) fn add(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let input = padded(input, 0, 128);
    let a = read_g1(&input[0..64])?;
    let b = read_g1(&input[64..128])?;
    Ok(encode_g1(a.into_group() + b))
}

pub(super) fn mul(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let input = padded(input, 0, 96);
    let point = read_g1(&input[0..64])?;
    let scalar = Fr::from_be_bytes_mod_order(&input[64..96]);
    Ok(encode_g1(point * scalar))
}

pub(super) fn pairing(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    if input.len() % PAIR_LEN != 0 {
        return Err(PrecompileError::InvalidInput("pairing input length"));
    }

    let mut g1 = Vec::with_capacity(input.len() / PAIR_LEN);
    let mut g2 = Vec::with_capacity(input.len() / PAIR_LEN);
    for pair in input.chunks(PAIR_LEN) {
        g1.push(read_g1(&pair[0..64])?);
        g2.push(read_g2(&pair[64..192])?);
    }

    let mut out = vec![0u8; 32];
    if g1.is_empty() || Bn254::multi_pairing(g1, g2).0.is_one() {
        out[31] = 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const G1: &str = "0000000000000000000000000000000000000000000000000000000000000001\
                      0000000000000000000000000000000000000000000000000000000000000002";
    const G1_X2: &str = "030644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd3\
                         15ed738c0e0a7c92e7845f96b2ae9c0a68a6a449e3538fc7ff3ebf7a5a18a2c4";
    const G1_X3: &str = "0769bf9ac56bea3ff40232bcb1b6bd159315d84715b8e679f2d355961915abf0\
                         2ab799bee0489429554fdb7c8d086475319e63b40b9c5b57cdf1ff3dd9fe2261";

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_add() {
        assert_eq!(add(&[0u8; 128]).unwrap(), vec![0u8; 64]);
        assert_eq!(add(&[]).unwrap(), vec![0u8; 64]);

        let input = [bytes(G1), bytes(G1)].concat();
        assert_eq!(hex::encode(add(&input).unwrap()), G1_X2);

        let input = [bytes(G1_X2), bytes(G1)].concat();
        assert_eq!(hex::encode(add(&input).unwrap()), G1_X3);

        // generator plus nothing
        assert_eq!(hex::encode(add(&bytes(G1)).unwrap()), G1);
    }

    #[test]
    fn test_add_rejects_invalid_points() {
        // (1, 3) is not on the curve
        let mut input = bytes(G1);
        input[63] = 3;
        assert_eq!(add(&input), Err(PrecompileError::InvalidPoint));

        // x equal to the field modulus
        let mut input = bytes("30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47");
        input.extend_from_slice(&[0u8; 32]);
        assert!(add(&input).is_err());
    }

    #[test]
    fn test_mul() {
        let mut input = bytes(G1);
        input.extend_from_slice(&[0u8; 31]);
        input.push(3);
        assert_eq!(hex::encode(mul(&input).unwrap()), G1_X3);

        // any point times zero
        assert_eq!(mul(&bytes(G1)).unwrap(), vec![0u8; 64]);
        assert_eq!(mul(&[]).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn test_pairing() {
        assert!(pairing(&[0u8; 100]).is_err());

        let mut one = vec![0u8; 32];
        one[31] = 1;
        assert_eq!(pairing(&[]).unwrap(), one);
        assert_eq!(pairing(&[0u8; 192]).unwrap(), one);
        assert_eq!(pairing(&[0u8; 384]).unwrap(), one);
    }

    #[test]
    fn test_pairing_rejects_point_off_curve() {
        let mut input = vec![0u8; 192];
        input[31] = 1;
        input[63] = 3;
        assert_eq!(pairing(&input), Err(PrecompileError::InvalidPoint));
    }
}
