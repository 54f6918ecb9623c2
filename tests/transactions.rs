use evm_core::{
    common::{
        Hex,
        address::Address,
        block::Header,
        hash::keccak256,
        tx::{Authorization, Tx, delegation_code},
        word::Word,
    },
    config::Config,
    state::{GenesisAccount, MemoryLoader, State},
    transaction::{ExecutionFailure, TransactionExecutor, TxError, ValidationError},
};
use k256::ecdsa::SigningKey;
use pretty_assertions::assert_eq;

const BALANCE: u64 = 1_000_000_000_000;

fn init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn sender() -> Address {
    Address::from_low_u64(0xa11ce)
}

fn contract() -> Address {
    Address::from_low_u64(0xc0de)
}

fn coinbase() -> Address {
    Address::from_low_u64(0xc0ba5e)
}

fn header() -> Header {
    Header {
        number: Word::from(1),
        gas_limit: Word::from(30_000_000),
        coinbase: coinbase(),
        ..Header::default()
    }
}

fn executor() -> TransactionExecutor<evm_core::tracer::NoopTracer> {
    TransactionExecutor::new(Config::prague(1), header())
}

fn state(contract_code: &str) -> eyre::Result<State<MemoryLoader>> {
    let loader = MemoryLoader::new()
        .with_account(sender(), GenesisAccount::with_balance(Word::from(BALANCE)))
        .with_account(contract(), GenesisAccount::with_code(hex::decode(contract_code)?));
    Ok(State::new(loader))
}

fn call(input: Vec<u8>, gas: u64) -> Tx {
    Tx {
        from: sender(),
        to: Some(contract()),
        input: Hex(input),
        gas: Word::from(gas),
        gas_price: Some(Word::one()),
        ..Tx::default()
    }
}

#[tokio::test]
async fn test_create_with_ef_prefix_fails() -> eyre::Result<()> {
    init();
    let mut state = state("00")?;
    // PUSH1 0xef, PUSH0, MSTORE8, PUSH1 1, PUSH0, RETURN
    let tx = Tx {
        to: None,
        ..call(hex::decode("60ef5f5360015ff3")?, 100_000)
    };
    let result = executor().execute(&mut state, &tx).await?;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ExecutionFailure::InvalidCodePrefix));
    assert_eq!(result.failure.as_ref().map(|f| f.to_string()).as_deref(), Some("invalid EF prefix"));
    assert_eq!(result.gas_used, 100_000);
    assert_eq!(result.contract_address, None);

    let address = sender().create(0);
    assert!(state.code(&address).await?.is_empty());
    assert_eq!(state.nonce(&address).await?, 0);
    assert_eq!(state.nonce(&sender()).await?, 1);
    assert_eq!(state.balance(&sender()).await?, Word::from(BALANCE - 100_000));
    Ok(())
}

#[tokio::test]
async fn test_create_deploys_runtime_code() -> eyre::Result<()> {
    init();
    let mut state = state("00")?;
    // init code copies the trailing 2 runtime bytes (PUSH0, STOP) and returns them
    let tx = Tx {
        to: None,
        ..call(hex::decode("6002600a5f3960025ff35f00")?, 200_000)
    };
    let result = executor().execute(&mut state, &tx).await?;
    assert!(result.success, "{:?}", result.failure);

    let address = sender().create(0);
    assert_eq!(result.contract_address, Some(address));
    assert_eq!(result.created_accounts, vec![address]);
    assert_eq!(state.code(&address).await?.as_slice(), &[0x5f, 0x00]);
    assert_eq!(state.nonce(&address).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_sstore_refund_is_capped() -> eyre::Result<()> {
    init();
    // SSTORE(0, 5), SSTORE(0, 0)
    let mut state = state("60055f555f5f5500")?;
    let result = executor().execute(&mut state, &call(vec![], 100_000)).await?;
    assert!(result.success);

    // 21000 intrinsic + 22209 execution, refund 19900 capped at a fifth
    let used = 21_000 + 22_209;
    assert_eq!(result.gas_refund, used / 5);
    assert_eq!(result.gas_used, used - used / 5);
    assert_eq!(state.storage(&contract(), &Word::zero()).await?, Word::zero());
    assert_eq!(
        state.balance(&sender()).await?,
        Word::from(BALANCE - result.gas_used)
    );
    Ok(())
}

#[tokio::test]
async fn test_revert_reason_is_decoded() -> eyre::Result<()> {
    init();
    let mut payload = hex::decode("08c379a0")?;
    payload.extend_from_slice(&Word::from(32).into_bytes());
    payload.extend_from_slice(&Word::from(4).into_bytes());
    let mut message = b"nope".to_vec();
    message.resize(32, 0);
    payload.extend_from_slice(&message);

    // CODECOPY(0, 10, 100), REVERT(0, 100), followed by the payload
    let code = format!("6064600a5f3960645ffd{}", hex::encode(&payload));
    let mut state = state(&code)?;
    let result = executor().execute(&mut state, &call(vec![], 100_000)).await?;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ExecutionFailure::Reverted));
    assert_eq!(result.revert_reason.as_deref(), Some("nope"));
    assert_eq!(result.return_data.0, payload);
    assert!(result.gas_used < 100_000);
    Ok(())
}

#[tokio::test]
async fn test_value_transfer_and_changes() -> eyre::Result<()> {
    init();
    let receiver = Address::from_low_u64(0xb0b);
    let mut state = state("00")?;
    let mut executor = executor();

    for nonce in 0..2u64 {
        let tx = Tx {
            to: Some(receiver),
            nonce: Word::from(nonce),
            value: Word::from(500),
            ..call(vec![], 21_000)
        };
        let result = executor.execute(&mut state, &tx).await?;
        assert!(result.success);
        assert_eq!(result.gas_used, 21_000);
    }

    let changes = state.changes();
    assert_eq!(changes[&receiver].balance, Some(Word::from(1_000)));
    assert_eq!(changes[&sender()].nonce, Some(2));
    assert_eq!(
        changes[&sender()].balance,
        Some(Word::from(BALANCE - 1_000 - 2 * 21_000))
    );
    assert_eq!(changes[&coinbase()].balance, Some(Word::from(2 * 21_000)));
    Ok(())
}

#[tokio::test]
async fn test_rejected_tx_leaves_state_untouched() -> eyre::Result<()> {
    init();
    let mut state = state("00")?;
    let tx = Tx {
        nonce: Word::from(5),
        ..call(vec![], 21_000)
    };
    let err = executor().execute(&mut state, &tx).await.unwrap_err();
    assert!(matches!(err, TxError::Invalid(ValidationError::NonceMismatch)));
    assert!(state.changes().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_selfdestruct_in_creating_tx_deletes_account() -> eyre::Result<()> {
    init();
    let beneficiary = Address::from_low_u64(0xbe);
    let mut state = state("00")?;
    let init_code = format!("73{}ff", hex::encode(beneficiary.0));
    let tx = Tx {
        to: None,
        value: Word::from(10),
        ..call(hex::decode(init_code)?, 200_000)
    };
    let result = executor().execute(&mut state, &tx).await?;
    assert!(result.success, "{:?}", result.failure);

    let address = sender().create(0);
    assert_eq!(result.deleted_accounts, vec![address]);
    assert_eq!(state.balance(&beneficiary).await?, Word::from(10));
    assert_eq!(state.balance(&address).await?, Word::zero());
    assert_eq!(state.nonce(&address).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_revert_reason_is_ignored() -> eyre::Result<()> {
    init();
    let mut payload = hex::decode("08c379a0")?;
    payload.extend_from_slice(&Word::from(0xffffffffffffffe0u64).into_bytes());
    payload.extend_from_slice(&[0u8; 64]);

    // CODECOPY(0, 10, 100), REVERT(0, 100), followed by the payload
    let code = format!("6064600a5f3960645ffd{}", hex::encode(&payload));
    let mut state = state(&code)?;
    let result = executor().execute(&mut state, &call(vec![], 100_000)).await?;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ExecutionFailure::Reverted));
    assert_eq!(result.revert_reason, None);
    assert_eq!(result.return_data.0, payload);
    Ok(())
}

fn signer() -> eyre::Result<(SigningKey, Address)> {
    let key = SigningKey::from_bytes(&[0x22u8; 32].into())?;
    let point = key.verifying_key().to_encoded_point(false);
    let authority = Address::from_hash(&keccak256(&point.as_bytes()[1..]));
    Ok((key, authority))
}

fn authorization(key: &SigningKey, address: Address, nonce: u64) -> eyre::Result<Authorization> {
    let mut auth = Authorization {
        chain_id: Word::one(),
        address,
        nonce: Word::from(nonce),
        ..Authorization::default()
    };
    let (signature, recovery_id) = key.sign_prehash_recoverable(&auth.signing_hash())?;
    let bytes = signature.to_bytes();
    auth.r = Word::from_bytes(&bytes[..32]);
    auth.s = Word::from_bytes(&bytes[32..]);
    auth.y_parity = Word::from(recovery_id.to_byte());
    Ok(auth)
}

fn set_code(authority: Address, authorizations: Vec<Authorization>) -> Tx {
    Tx {
        to: Some(authority),
        max_fee_per_gas: Some(Word::one()),
        max_priority_fee_per_gas: Some(Word::one()),
        gas_price: None,
        authorization_list: Some(authorizations),
        ..call(vec![], 200_000)
    }
}

#[tokio::test]
async fn test_set_code_authorization() -> eyre::Result<()> {
    init();
    let (key, authority) = signer()?;
    let auth = authorization(&key, contract(), 0)?;

    // delegate: SSTORE(0, 42)
    let mut state = state("602a5f5500")?;
    let tx = set_code(authority, vec![auth]);
    let result = executor().execute(&mut state, &tx).await?;
    assert!(result.success, "{:?}", result.failure);

    assert_eq!(state.code(&authority).await?.as_slice(), delegation_code(&contract()).as_slice());
    assert_eq!(state.nonce(&authority).await?, 1);
    assert_eq!(state.storage(&authority, &Word::zero()).await?, Word::from(42));
    assert_eq!(state.storage(&contract(), &Word::zero()).await?, Word::zero());
    Ok(())
}

#[tokio::test]
async fn test_first_authorization_per_authority_wins() -> eyre::Result<()> {
    init();
    let (key, authority) = signer()?;
    let other = Address::from_low_u64(0xd2);
    let first = authorization(&key, contract(), 0)?;
    let second = authorization(&key, other, 1)?;

    // delegate: SSTORE(0, 42)
    let mut state = state("602a5f5500")?;
    let tx = set_code(authority, vec![first, second]);
    let result = executor().execute(&mut state, &tx).await?;
    assert!(result.success, "{:?}", result.failure);

    assert_eq!(state.code(&authority).await?.as_slice(), delegation_code(&contract()).as_slice());
    assert_eq!(state.nonce(&authority).await?, 1);
    assert_eq!(state.storage(&authority, &Word::zero()).await?, Word::from(42));
    Ok(())
}
