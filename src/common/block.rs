use serde::{Deserialize, Serialize};

use crate::common::{address::Address, word::Word};

/// Block context visible to executing code.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Header {
    pub number: Word,
    pub timestamp: Word,
    #[serde(rename = "gasLimit")]
    pub gas_limit: Word,
    #[serde(rename = "baseFeePerGas", default)]
    pub base_fee: Word,
    #[serde(rename = "miner", alias = "coinbase")]
    pub coinbase: Address,
    #[serde(rename = "mixHash", alias = "prevRandao", default)]
    pub prev_randao: Word,
    #[serde(rename = "excessBlobGas", default)]
    pub excess_blob_gas: Word,
}

impl Header {
    /// EIP-4844 blob base fee: `fake_exponential(1, excess_blob_gas, fraction)`.
    pub fn blob_base_fee(&self, update_fraction: u64) -> Word {
        fake_exponential(
            Word::one(),
            self.excess_blob_gas,
            Word::from(update_fraction),
        )
    }
}

/// Integer approximation of `factor * e ** (numerator / denominator)`.
pub fn fake_exponential(factor: Word, numerator: Word, denominator: Word) -> Word {
    if denominator.is_zero() {
        return Word::zero();
    }
    let mut i = Word::one();
    let mut output = Word::zero();
    let mut accum = factor * denominator;
    while !accum.is_zero() {
        output = output.saturating_add(accum);
        accum = match accum.checked_mul(numerator) {
            Some(value) => value / (denominator * i),
            None => break,
        };
        i += Word::one();
    }
    output / denominator
}
