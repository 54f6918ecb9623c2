use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::{
    common::{
        Hex,
        address::Address,
        block::Header,
        tx::{Tx, VERSIONED_HASH_VERSION_KZG, delegated_address, delegation_code},
        word::{Word, decode_error_string},
    },
    config::Config,
    executor::{Executor, ExecutorError, FrameResult, InnerCall, Outcome},
    gas,
    interpreter::{CallRequest, Context, CreateRequest, FrameKind, Log},
    state::{Loader, State},
    tracer::{EventTracer, NoopTracer},
};

/// Reasons a transaction is rejected before anything is charged.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("INSUFFICIENT_MAX_FEE_PER_GAS")]
    InsufficientMaxFeePerGas,
    #[error("PRIORITY_GREATER_THAN_MAX_FEE_PER_GAS")]
    PriorityGreaterThanMaxFee,
    #[error("INITCODE_SIZE_EXCEEDED")]
    InitCodeSizeExceeded,
    #[error("TYPE_3_TX_CONTRACT_CREATION")]
    BlobContractCreation,
    #[error("TYPE_3_TX_ZERO_BLOBS")]
    ZeroBlobs,
    #[error("TYPE_3_TX_BLOB_COUNT_EXCEEDED")]
    BlobCountExceeded,
    #[error("TYPE_3_TX_INVALID_BLOB_VERSIONED_HASH")]
    InvalidBlobVersionedHash,
    #[error("INSUFFICIENT_MAX_FEE_PER_BLOB_GAS")]
    InsufficientMaxFeePerBlobGas,
    #[error("GAS_ALLOWANCE_EXCEEDED")]
    GasAllowanceExceeded,
    #[error("INTRINSIC_GAS_TOO_LOW")]
    IntrinsicGasTooLow,
    #[error("INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[error("SENDER_NOT_EOA")]
    SenderNotEoa,
    #[error("NONCE_IS_MAX")]
    NonceIsMax,
    #[error("NONCE_MISMATCH")]
    NonceMismatch,
    #[error("TYPE_4_TX_CONTRACT_CREATION")]
    SetCodeContractCreation,
    #[error("TYPE_4_EMPTY_AUTHORIZATION_LIST")]
    EmptyAuthorizationList,
}

#[derive(Error, Debug)]
pub enum TxError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Eyre(#[from] eyre::ErrReport),
}

/// Why an included transaction did not succeed. Gas is charged regardless.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ExecutionFailure {
    #[error("execution reverted")]
    Reverted,
    #[error("out of gas")]
    OutOfGas,
    #[error("invalid EF prefix")]
    InvalidCodePrefix,
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
    #[error("address collision")]
    AddressCollision,
    #[error("precompile out of gas")]
    PrecompileOutOfGas,
    #[error("precompile failed")]
    PrecompileFailed,
    #[error("{0}")]
    Halted(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&ExecutorError> for ExecutionFailure {
    fn from(error: &ExecutorError) -> Self {
        match error {
            ExecutorError::OutOfGas => Self::OutOfGas,
            ExecutorError::InvalidCodePrefix => Self::InvalidCodePrefix,
            ExecutorError::MaxCodeSizeExceeded => Self::MaxCodeSizeExceeded,
            ExecutorError::AddressCollision => Self::AddressCollision,
            ExecutorError::PrecompileOutOfGas => Self::PrecompileOutOfGas,
            ExecutorError::Precompile(_) => Self::PrecompileFailed,
            ExecutorError::Eyre(e) => Self::Internal(e.to_string()),
            e => Self::Halted(e.to_string()),
        }
    }
}

/// Receipt payload of an executed transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResult {
    pub success: bool,
    pub gas_used: u64,
    pub gas_refund: u64,
    pub return_data: Hex,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    pub logs: Vec<Log>,
    pub created_accounts: Vec<Address>,
    pub deleted_accounts: Vec<Address>,
    pub inner_calls: Vec<InnerCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    pub effective_gas_price: Word,
    pub blob_gas_used: u64,
}

/// Runs whole transactions against a ledger: validate, set up, execute and
/// settle fees. One instance serves every transaction of a block.
pub struct TransactionExecutor<T: EventTracer> {
    config: Config,
    header: Header,
    executor: Executor<T>,
}

impl TransactionExecutor<NoopTracer> {
    pub fn new(config: Config, header: Header) -> Self {
        Self::with_tracer(config, header, NoopTracer)
    }
}

impl<T: EventTracer> TransactionExecutor<T> {
    pub fn with_tracer(config: Config, header: Header, tracer: T) -> Self {
        Self {
            config,
            header,
            executor: Executor::with_tracer(tracer),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn tracer(&self) -> &T {
        self.executor.tracer()
    }

    pub fn tracer_mut(&mut self) -> &mut T {
        self.executor.tracer_mut()
    }

    pub fn into_tracer(self) -> T {
        self.executor.into_tracer()
    }

    pub async fn execute<L: Loader>(
        &mut self,
        state: &mut State<L>,
        tx: &Tx,
    ) -> Result<TxResult, TxError> {
        let gas_limit = match self.validate(state, tx).await {
            Ok(gas_limit) => gas_limit,
            Err(TxError::Invalid(e)) => {
                tracing::warn!("rejected tx from {}: {e}", tx.from);
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let snapshot = state.take_snapshot();
        match self.run(state, tx, gas_limit).await {
            Ok(result) => {
                state.commit(snapshot);
                let deleted = state.finalize_transaction();
                Ok(TxResult {
                    deleted_accounts: deleted,
                    ..result
                })
            }
            Err(e) => {
                tracing::error!("tx from {} failed internally: {e}", tx.from);
                state.revert(snapshot);
                state.finalize_transaction();
                Ok(TxResult {
                    failure: Some(ExecutionFailure::Internal(e.to_string())),
                    effective_gas_price: tx.effective_gas_price(self.header.base_fee),
                    ..TxResult::default()
                })
            }
        }
    }

    fn blob_gas(&self, tx: &Tx) -> u64 {
        if self.config.eip4844 { tx.blob_gas() } else { 0 }
    }

    /// Checks that need no mutation. Returns the gas limit as `u64`.
    async fn validate<L: Loader>(&self, state: &mut State<L>, tx: &Tx) -> Result<u64, TxError> {
        let config = &self.config;
        let base_fee = self.header.base_fee;

        if tx.is_eip1559() {
            let max_fee = tx.max_fee();
            if max_fee < base_fee {
                return Err(ValidationError::InsufficientMaxFeePerGas.into());
            }
            if tx.max_priority_fee_per_gas.unwrap_or_default() > max_fee {
                return Err(ValidationError::PriorityGreaterThanMaxFee.into());
            }
        } else if tx.max_fee() < base_fee {
            return Err(ValidationError::InsufficientMaxFeePerGas.into());
        }

        if tx.is_create() && tx.input.0.len() > gas::MAX_INITCODE_SIZE {
            return Err(ValidationError::InitCodeSizeExceeded.into());
        }

        let blob_base_fee = self
            .header
            .blob_base_fee(config.blob_base_fee_update_fraction);
        if config.eip4844 && tx.is_blob() {
            if tx.is_create() {
                return Err(ValidationError::BlobContractCreation.into());
            }
            if tx.blob_versioned_hashes.is_empty() {
                return Err(ValidationError::ZeroBlobs.into());
            }
            if tx.blob_versioned_hashes.len() > config.max_blobs_per_block {
                return Err(ValidationError::BlobCountExceeded.into());
            }
            let version_ok = tx
                .blob_versioned_hashes
                .iter()
                .all(|hash| hash.into_bytes()[0] == VERSIONED_HASH_VERSION_KZG);
            if !version_ok {
                return Err(ValidationError::InvalidBlobVersionedHash.into());
            }
            if tx.max_fee_per_blob_gas.unwrap_or_default() < blob_base_fee {
                return Err(ValidationError::InsufficientMaxFeePerBlobGas.into());
            }
        }

        if tx.is_set_code() {
            if tx.is_create() {
                return Err(ValidationError::SetCodeContractCreation.into());
            }
            if tx.authorizations().is_empty() {
                return Err(ValidationError::EmptyAuthorizationList.into());
            }
        }

        let gas_limit = tx
            .gas
            .to_u64()
            .filter(|gas| Word::from(*gas) <= self.header.gas_limit)
            .ok_or(ValidationError::GasAllowanceExceeded)?;

        let intrinsic = gas::intrinsic_gas(
            config,
            &tx.input.0,
            tx.is_create(),
            &tx.access_list,
            tx.authorizations().len(),
        );
        let floor = if config.eip7623 {
            gas::floor_gas(&tx.input.0)
        } else {
            0
        };
        if intrinsic.max(floor) > gas_limit {
            return Err(ValidationError::IntrinsicGasTooLow.into());
        }

        let code = state.code(&tx.from).await?;
        if !code.is_empty() && delegated_address(&code).is_none() {
            return Err(ValidationError::SenderNotEoa.into());
        }

        let nonce = state.nonce(&tx.from).await?;
        if nonce == u64::MAX {
            return Err(ValidationError::NonceIsMax.into());
        }
        if tx.nonce != Word::from(nonce) {
            return Err(ValidationError::NonceMismatch.into());
        }

        let blob_fee = Word::from(self.blob_gas(tx)).checked_mul(tx.max_fee_per_blob_gas.unwrap_or_default());
        let cost = Word::from(gas_limit)
            .checked_mul(tx.max_fee())
            .zip(blob_fee)
            .and_then(|(gas, blob)| gas.checked_add(blob))
            .and_then(|fees| fees.checked_add(tx.value))
            .ok_or(ValidationError::InsufficientFunds)?;
        if state.balance(&tx.from).await? < cost {
            return Err(ValidationError::InsufficientFunds.into());
        }

        Ok(gas_limit)
    }

    async fn run<L: Loader>(
        &mut self,
        state: &mut State<L>,
        tx: &Tx,
        gas_limit: u64,
    ) -> Result<TxResult, ExecutorError> {
        let sender = tx.from;
        let base_fee = self.header.base_fee;
        let price = tx.effective_gas_price(base_fee);
        let blob_base_fee = self
            .header
            .blob_base_fee(self.config.blob_base_fee_update_fraction);
        let blob_fee = Word::from(self.blob_gas(tx)) * blob_base_fee;

        let nonce = state.nonce(&sender).await?;
        if !state.increment_nonce(&sender).await? {
            return Err(ExecutorError::NonceOverflow);
        }
        if !state
            .sub_balance(&sender, Word::from(gas_limit) * price + blob_fee)
            .await?
        {
            return Err(ExecutorError::InsufficientBalance);
        }
        tracing::debug!("tx setup: sender={sender} nonce={nonce} gas={gas_limit} price={price}");

        state.warm_address(&sender);
        state.warm_address(&self.header.coinbase);
        for address in self.config.precompiles.addresses() {
            state.warm_address(&address);
        }
        for item in &tx.access_list {
            state.warm_address(&item.address);
            for key in &item.storage_keys {
                state.warm_slot(&item.address, key);
            }
        }
        self.authorize(state, tx).await?;

        let intrinsic = gas::intrinsic_gas(
            &self.config,
            &tx.input.0,
            tx.is_create(),
            &tx.access_list,
            tx.authorizations().len(),
        );
        let ctx = Context {
            config: self.config.clone(),
            header: self.header.clone(),
            origin: sender,
            gas_price: price,
            blob_hashes: tx.blob_versioned_hashes.clone(),
        };
        let gas = gas_limit - intrinsic;

        let snapshot = state.take_snapshot();
        let result = match tx.to {
            Some(to) => {
                state.warm_address(&to);
                let mut code = state.code(&to).await?;
                let mut code_address = to;
                if let Some(delegate) = delegated_address(&code) {
                    state.warm_address(&delegate);
                    code = state.code(&delegate).await?;
                    code_address = delegate;
                }
                let request = CallRequest {
                    kind: FrameKind::Call,
                    caller: sender,
                    address: to,
                    target: to,
                    code_address,
                    code,
                    value: tx.value,
                    transfer: !tx.value.is_zero(),
                    input: tx.input.0.clone(),
                    gas,
                    is_static: false,
                    output: (0, 0),
                };
                self.executor.call(state, &ctx, request).await?
            }
            None => {
                let address = sender.create(nonce);
                let request = CreateRequest {
                    kind: FrameKind::Create,
                    caller: sender,
                    value: tx.value,
                    init_code: tx.input.0.clone(),
                    salt: None,
                    gas,
                };
                self.executor.create(state, &ctx, request, address).await?
            }
        };
        state.commit(snapshot);

        Ok(self.settle(state, tx, gas_limit, price, result).await?)
    }

    /// EIP-7702: installs delegations from the authorization list. Invalid
    /// tuples are skipped; only the first tuple signed by an authority counts.
    async fn authorize<L: Loader>(&self, state: &mut State<L>, tx: &Tx) -> eyre::Result<()> {
        if !self.config.eip7702 {
            return Ok(());
        }
        let chain_id = Word::from(self.config.chain_id);
        let mut seen = HashSet::new();
        for auth in tx.authorizations() {
            let Some(authority) = auth.authority() else {
                continue;
            };
            if !seen.insert(authority) {
                continue;
            }
            if !auth.chain_id.is_zero() && auth.chain_id != chain_id {
                continue;
            }
            let Some(nonce) = auth.nonce.to_u64().filter(|nonce| *nonce < u64::MAX) else {
                continue;
            };
            state.warm_address(&authority);

            let code = state.code(&authority).await?;
            if !code.is_empty() && delegated_address(&code).is_none() {
                continue;
            }
            if state.nonce(&authority).await? != nonce {
                continue;
            }

            let code = if auth.address.is_zero() {
                Vec::new()
            } else {
                state.warm_address(&auth.address);
                delegation_code(&auth.address)
            };
            tracing::debug!("authority {authority} delegates to {}", auth.address);
            state.set_code(&authority, code).await?;
            state.increment_nonce(&authority).await?;
        }
        Ok(())
    }

    /// Applies the refund cap and calldata floor, returns unused gas to the
    /// sender and pays the coinbase.
    async fn settle<L: Loader>(
        &self,
        state: &mut State<L>,
        tx: &Tx,
        gas_limit: u64,
        price: Word,
        result: FrameResult,
    ) -> eyre::Result<TxResult> {
        let used = gas_limit - result.gas.remaining();
        let refund = if result.is_success() {
            (result.gas.refund.max(0) as u64).min(used / gas::MAX_REFUND_QUOTIENT)
        } else {
            0
        };
        let mut gas_used = used - refund;
        if self.config.eip7623 {
            gas_used = gas_used.max(gas::floor_gas(&tx.input.0));
        }

        state
            .add_balance(&tx.from, Word::from(gas_limit - gas_used) * price)
            .await?;
        let tip = price.saturating_sub(self.header.base_fee);
        state
            .add_balance(&self.header.coinbase, Word::from(gas_used) * tip)
            .await?;

        let (success, failure, revert_reason) = match &result.outcome {
            Outcome::Success => (true, None, None),
            Outcome::Revert => (
                false,
                Some(ExecutionFailure::Reverted),
                decode_error_string(&result.output),
            ),
            Outcome::Failure(e) => (false, Some(ExecutionFailure::from(e)), None),
        };
        tracing::debug!("tx done: success={success} gas_used={gas_used} refund={refund}");

        let mut created_accounts = result.created;
        if let Some(address) = result.address {
            created_accounts.insert(0, address);
        }
        Ok(TxResult {
            success,
            gas_used,
            gas_refund: refund,
            return_data: Hex(if tx.is_create() && success {
                Vec::new()
            } else {
                result.output
            }),
            revert_reason,
            failure,
            logs: result.logs,
            created_accounts,
            deleted_accounts: Vec::new(),
            inner_calls: result.inner_calls,
            contract_address: result.address,
            effective_gas_price: price,
            blob_gas_used: self.blob_gas(tx),
        })
    }
}

impl<T: EventTracer> std::fmt::Debug for TransactionExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("hardfork", &self.config.hardfork)
            .field("block", &self.header.number)
            .finish()
    }
}

/// Convenience for one-off runs: executes `tx` with a fresh executor.
pub async fn execute<L: Loader>(
    state: &mut State<L>,
    config: &Config,
    header: &Header,
    tx: &Tx,
) -> Result<TxResult, TxError> {
    TransactionExecutor::new(config.clone(), header.clone())
        .execute(state, tx)
        .await
}
