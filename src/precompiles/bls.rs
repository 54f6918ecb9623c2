//! BLS12-381 curve operations (EIP-2537), active from Prague.
//!
//! Field elements are 64 bytes with 16 leading zero bytes; `Fp2` elements are
//! `c0 ++ c1`. An all-zero encoding is the point at infinity.

use ark_bls12_381::{Bls12_381, Fq, Fq2, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{AffineRepr, CurveGroup, pairing::Pairing};
use ark_ff::{BigInt, BigInteger, One, PrimeField, Zero};

use super::{PrecompileError, PrecompileProvider};
use crate::common::address::Address;

pub const G1_ADD: Address = Address::from_low_u64(0x0b);
pub const G1_MSM: Address = Address::from_low_u64(0x0c);
pub const G2_ADD: Address = Address::from_low_u64(0x0d);
pub const G2_MSM: Address = Address::from_low_u64(0x0e);
pub const PAIRING: Address = Address::from_low_u64(0x0f);

const FP_LEN: usize = 64;
const G1_LEN: usize = 2 * FP_LEN;
const G2_LEN: usize = 4 * FP_LEN;
const SCALAR_LEN: usize = 32;

const G1_ADD_GAS: u64 = 375;
const G2_ADD_GAS: u64 = 600;
const G1_MSM_BASE_GAS: u64 = 12_000;
const G2_MSM_BASE_GAS: u64 = 22_500;
const PAIRING_BASE_GAS: u64 = 37_700;
const PAIRING_PAIR_GAS: u64 = 32_600;

/// Per-mille MSM discount by number of pairs; the last entry applies beyond the table.
const MSM_DISCOUNT: [u64; 130] = [
    1000, 949, 848, 797, 764, 750, 738, 728, 719, 712, 705, 698, 692, 687, 682, 677, 673, 669,
    665, 661, 658, 654, 651, 648, 645, 642, 640, 637, 635, 632, 630, 627, 625, 623, 621, 619, 617,
    615, 613, 611, 609, 608, 606, 604, 603, 601, 599, 598, 596, 595, 593, 592, 591, 589, 588, 586,
    585, 584, 582, 581, 580, 579, 577, 576, 575, 574, 573, 572, 570, 569, 568, 567, 566, 565, 564,
    563, 562, 561, 560, 559, 558, 557, 556, 555, 554, 553, 552, 551, 550, 549, 548, 547, 547, 546,
    545, 544, 543, 542, 542, 541, 540, 539, 538, 538, 537, 536, 535, 535, 534, 533, 532, 532, 531,
    530, 530, 529, 528, 528, 527, 526, 526, 525, 524, 524, 523, 522, 522, 521, 520, 520,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct BlsPrecompiles;

impl PrecompileProvider for BlsPrecompiles {
    fn addresses(&self) -> Vec<Address> {
        vec![G1_ADD, G1_MSM, G2_ADD, G2_MSM, PAIRING]
    }

    fn gas_cost(&self, address: &Address, input: &[u8]) -> u64 {
        match *address {
            G1_ADD => G1_ADD_GAS,
            G2_ADD => G2_ADD_GAS,
            G1_MSM => msm_gas(input.len(), G1_LEN + SCALAR_LEN, G1_MSM_BASE_GAS),
            G2_MSM => msm_gas(input.len(), G2_LEN + SCALAR_LEN, G2_MSM_BASE_GAS),
            PAIRING => PAIRING_BASE_GAS + PAIRING_PAIR_GAS * (input.len() / (G1_LEN + G2_LEN)) as u64,
            _ => 0,
        }
    }

    fn execute(&self, address: &Address, input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
        match *address {
            G1_ADD => g1_add(input),
            G1_MSM => g1_msm(input),
            G2_ADD => g2_add(input),
            G2_MSM => g2_msm(input),
            PAIRING => pairing(input),
            _ => Err(PrecompileError::Unknown(*address)),
        }
    }
}

fn msm_gas(len: usize, pair_len: usize, base: u64) -> u64 {
    if len == 0 || len % pair_len != 0 {
        return 0;
    }
    let k = len / pair_len;
    let discount = MSM_DISCOUNT[k.min(MSM_DISCOUNT.len()) - 1];
    k as u64 * base * discount / 1000
}

fn read_fp(bytes: &[u8]) -> Result<Fq, PrecompileError> {
    if bytes[..16].iter().any(|byte| *byte != 0) {
        return Err(PrecompileError::InvalidInput("field element padding"));
    }
    let mut limbs = [0u64; 6];
    for (limb, chunk) in limbs.iter_mut().zip(bytes[16..].rchunks(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *limb = u64::from_be_bytes(buf);
    }
    Fq::from_bigint(BigInt::new(limbs)).ok_or(PrecompileError::InvalidInput("field element not canonical"))
}

fn read_fp2(bytes: &[u8]) -> Result<Fq2, PrecompileError> {
    Ok(Fq2::new(read_fp(&bytes[..FP_LEN])?, read_fp(&bytes[FP_LEN..])?))
}

fn read_g1(bytes: &[u8], subgroup: bool) -> Result<G1Affine, PrecompileError> {
    let x = read_fp(&bytes[..FP_LEN])?;
    let y = read_fp(&bytes[FP_LEN..G1_LEN])?;
    if x.is_zero() && y.is_zero() {
        return Ok(G1Affine::identity());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || (subgroup && !point.is_in_correct_subgroup_assuming_on_curve()) {
        return Err(PrecompileError::InvalidPoint);
    }
    Ok(point)
}

fn read_g2(bytes: &[u8], subgroup: bool) -> Result<G2Affine, PrecompileError> {
    let x = read_fp2(&bytes[..2 * FP_LEN])?;
    let y = read_fp2(&bytes[2 * FP_LEN..G2_LEN])?;
    if x.is_zero() && y.is_zero() {
        return Ok(G2Affine::identity());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || (subgroup && !point.is_in_correct_subgroup_assuming_on_curve()) {
        return Err(PrecompileError::InvalidPoint);
    }
    Ok(point)
}

fn write_fp(out: &mut Vec<u8>, value: &Fq) {
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&value.into_bigint().to_bytes_be());
}

fn encode_g1(point: G1Projective) -> Vec<u8> {
    let affine = point.into_affine();
    if affine.infinity {
        return vec![0u8; G1_LEN];
    }
    let mut out = Vec::with_capacity(G1_LEN);
    write_fp(&mut out, &affine.x);
    write_fp(&mut out, &affine.y);
    out
}

fn encode_g2(point: G2Projective) -> Vec<u8> {
    let affine = point.into_affine();
    if affine.infinity {
        return vec![0u8; G2_LEN];
    }
    let mut out = Vec::with_capacity(G2_LEN);
    for value in [affine.x.c0, affine.x.c1, affine.y.c0, affine.y.c1] {
        write_fp(&mut out, &value);
    }
    out
}

fn g1_add(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    if input.len() != 2 * G1_LEN {
        return Err(PrecompileError::InvalidInput("g1 add input length"));
    }
    let a = read_g1(&input[..G1_LEN], false)?;
    let b = read_g1(&input[G1_LEN..], false)?;
    Ok(encode_g1(a.into_group() + b))
}

fn g2_add(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    if input.len() != 2 * G2_LEN {
        return Err(PrecompileError::InvalidInput("g2 add input length"));
    }
    let a = read_g2(&input[..G2_LEN], false)?;
    let b = read_g2(&input[G2_LEN..], false)?;
    Ok(encode_g2(a.into_group() + b))
}

fn g1_msm(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let pair_len = G1_LEN + SCALAR_LEN;
    if input.is_empty() || input.len() % pair_len != 0 {
        return Err(PrecompileError::InvalidInput("g1 msm input length"));
    }
    let mut acc = G1Projective::zero();
    for pair in input.chunks(pair_len) {
        let point = read_g1(&pair[..G1_LEN], true)?;
        acc += point * Fr::from_be_bytes_mod_order(&pair[G1_LEN..]);
    }
    Ok(encode_g1(acc))
}

fn g2_msm(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let pair_len = G2_LEN + SCALAR_LEN;
    if input.is_empty() || input.len() % pair_len != 0 {
        return Err(PrecompileError::InvalidInput("g2 msm input length"));
    }
    let mut acc = G2Projective::zero();
    for pair in input.chunks(pair_len) {
        let point = read_g2(&pair[..G2_LEN], true)?;
        acc += point * Fr::from_be_bytes_mod_order(&pair[G2_LEN..]);
    }
    Ok(encode_g2(acc))
}

fn pairing(input: &[u8]) -> Result<Vec<u8>, PrecompileError> {
    let pair_len = G1_LEN + G2_LEN;
    if input.is_empty() || input.len() % pair_len != 0 {
        return Err(PrecompileError::InvalidInput("pairing input length"));
    }
    let mut g1 = Vec::new();
    let mut g2 = Vec::new();
    for pair in input.chunks(pair_len) {
        g1.push(read_g1(&pair[..G1_LEN], true)?);
        g2.push(read_g2(&pair[G1_LEN..], true)?);
    }
    let mut out = vec![0u8; 32];
    if Bls12_381::multi_pairing(g1, g2).0.is_one() {
        out[31] = 1;
    }
    Ok(out)
}
