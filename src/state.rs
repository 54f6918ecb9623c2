use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use serde::{Deserialize, Serialize};

use crate::common::{Hex, address::Address, hash::keccak256, word::Word};

/// Source of committed chain state. Every method is called at most once per
/// address (or slot, or block number) for the lifetime of a [`State`].
#[allow(async_fn_in_trait)]
pub trait Loader {
    async fn balance(&self, address: &Address) -> eyre::Result<Word>;
    async fn nonce(&self, address: &Address) -> eyre::Result<u64>;
    async fn code(&self, address: &Address) -> eyre::Result<Vec<u8>>;
    async fn storage(&self, address: &Address, key: &Word) -> eyre::Result<Word>;
    /// Whether the account has any non-zero storage slot (CREATE collision check).
    async fn has_storage(&self, address: &Address) -> eyre::Result<bool>;
    async fn block_hash(&self, number: u64) -> eyre::Result<Word>;
}

/// Account as found in a JSON alloc map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisAccount {
    #[serde(default)]
    pub balance: Word,
    #[serde(default)]
    pub nonce: Word,
    #[serde(default)]
    pub code: Hex,
    #[serde(default)]
    pub storage: BTreeMap<Word, Word>,
}

impl GenesisAccount {
    pub fn with_balance(balance: Word) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn with_code(code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Hex(code.into()),
            ..Self::default()
        }
    }

    pub fn balance(mut self, balance: Word) -> Self {
        self.balance = balance;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Word::from(nonce);
        self
    }

    pub fn slot(mut self, key: Word, value: Word) -> Self {
        self.storage.insert(key, value);
        self
    }
}

/// In-memory [`Loader`], used by tests and the `evm` binary.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    accounts: HashMap<Address, GenesisAccount>,
    block_hashes: HashMap<u64, Word>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"0x..": {"balance": .., "nonce": .., "code": .., "storage": {..}}}`.
    pub fn from_json(json: &str) -> eyre::Result<Self> {
        let accounts: HashMap<Address, GenesisAccount> = serde_json::from_str(json)?;
        Ok(Self {
            accounts,
            block_hashes: HashMap::new(),
        })
    }

    pub fn with_account(mut self, address: Address, account: GenesisAccount) -> Self {
        self.accounts.insert(address, account);
        self
    }

    pub fn with_block_hash(mut self, number: u64, hash: Word) -> Self {
        self.block_hashes.insert(number, hash);
        self
    }
}

impl Loader for MemoryLoader {
    async fn balance(&self, address: &Address) -> eyre::Result<Word> {
        Ok(self
            .accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    async fn nonce(&self, address: &Address) -> eyre::Result<u64> {
        let Some(account) = self.accounts.get(address) else {
            return Ok(0);
        };
        account
            .nonce
            .to_u64()
            .ok_or_else(|| eyre::eyre!("nonce of {address} does not fit u64"))
    }

    async fn code(&self, address: &Address) -> eyre::Result<Vec<u8>> {
        Ok(self
            .accounts
            .get(address)
            .map(|account| account.code.0.clone())
            .unwrap_or_default())
    }

    async fn storage(&self, address: &Address, key: &Word) -> eyre::Result<Word> {
        Ok(self
            .accounts
            .get(address)
            .and_then(|account| account.storage.get(key))
            .copied()
            .unwrap_or_default())
    }

    async fn has_storage(&self, address: &Address) -> eyre::Result<bool> {
        Ok(self
            .accounts
            .get(address)
            .is_some_and(|account| account.storage.values().any(|value| !value.is_zero())))
    }

    async fn block_hash(&self, number: u64) -> eyre::Result<Word> {
        Ok(self.block_hashes.get(&number).copied().unwrap_or_default())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: Word,
    pub code: Arc<Vec<u8>>,
}

impl Account {
    /// EIP-161 emptiness.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }
}

/// Committed view of one address: what the chain had, and what the ledger
/// holds after the transactions finalized so far.
#[derive(Clone, Debug, Default)]
struct Entry {
    chain: Account,
    account: Account,
    chain_storage: HashMap<Word, Word>,
    storage: HashMap<Word, Word>,
    chain_has_storage: bool,
    /// Storage was dropped by a self-destruct; unloaded slots read as zero.
    wiped: bool,
}

/// Mutations made since a snapshot was taken.
#[derive(Clone, Debug, Default)]
struct Layer {
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, Word), Word>,
    transient: HashMap<(Address, Word), Word>,
    created: HashSet<Address>,
    destructed: HashSet<Address>,
}

impl Layer {
    fn merge(&mut self, child: Layer) {
        self.accounts.extend(child.accounts);
        self.storage.extend(child.storage);
        self.transient.extend(child.transient);
        self.created.extend(child.created);
        self.destructed.extend(child.destructed);
    }
}

/// Per-address difference between the chain and the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccountChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Word>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Hex>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<Word, Word>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Transactional account ledger.
///
/// Committed values live in the base map. Every [`State::take_snapshot`]
/// pushes a copy-on-write layer; reads walk the layers top-down before
/// falling back to the base, so reverting is a truncation of the layer
/// stack. Warm address/slot sets sit outside the layers and survive reverts.
pub struct State<L: Loader> {
    loader: L,
    base: HashMap<Address, Entry>,
    layers: Vec<Layer>,
    transient: HashMap<(Address, Word), Word>,
    created: HashSet<Address>,
    destructed: HashSet<Address>,
    warm_addresses: HashSet<Address>,
    warm_slots: HashSet<(Address, Word)>,
    block_hashes: HashMap<u64, Word>,
}

impl<L: Loader> State<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            base: HashMap::new(),
            layers: Vec::new(),
            transient: HashMap::new(),
            created: HashSet::new(),
            destructed: HashSet::new(),
            warm_addresses: HashSet::new(),
            warm_slots: HashSet::new(),
            block_hashes: HashMap::new(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    async fn load(&mut self, address: &Address) -> eyre::Result<()> {
        if self.base.contains_key(address) {
            return Ok(());
        }
        let now = Instant::now();
        let balance = self.loader.balance(address).await?;
        let nonce = self.loader.nonce(address).await?;
        let code = self.loader.code(address).await?;
        let has_storage = self.loader.has_storage(address).await?;
        let ms = now.elapsed().as_millis();
        tracing::info!(
            "ACCOUNT: [{ms} ms] {address} balance={balance:#x} nonce={nonce} code={} bytes",
            code.len()
        );

        let account = Account {
            nonce,
            balance,
            code: Arc::new(code),
        };
        self.base.insert(
            *address,
            Entry {
                chain: account.clone(),
                account,
                chain_has_storage: has_storage,
                ..Entry::default()
            },
        );
        Ok(())
    }

    async fn load_slot(&mut self, address: &Address, key: &Word) -> eyre::Result<()> {
        self.load(address).await?;
        let Some(entry) = self.base.get(address) else {
            return Ok(());
        };
        if entry.wiped || entry.storage.contains_key(key) {
            return Ok(());
        }
        let now = Instant::now();
        let value = self.loader.storage(address, key).await?;
        let ms = now.elapsed().as_millis();
        tracing::info!("SLOAD: [{ms} ms] {address}[{key:#x}]={value:#x}");

        if let Some(entry) = self.base.get_mut(address) {
            entry.chain_storage.insert(*key, value);
            entry.storage.insert(*key, value);
        }
        Ok(())
    }

    fn account_ref(&self, address: &Address) -> Account {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.accounts.get(address))
            .or_else(|| self.base.get(address).map(|entry| &entry.account))
            .cloned()
            .unwrap_or_default()
    }

    fn account_mut(&mut self, address: &Address) -> &mut Account {
        let current = self.account_ref(address);
        match self.layers.last_mut() {
            Some(layer) => layer.accounts.entry(*address).or_insert(current),
            None => &mut self.base.entry(*address).or_default().account,
        }
    }

    fn slot_ref(&self, address: &Address, key: &Word) -> Word {
        let pair = (*address, *key);
        if let Some(value) = self
            .layers
            .iter()
            .rev()
            .find_map(|layer| layer.storage.get(&pair))
        {
            return *value;
        }
        self.base
            .get(address)
            .and_then(|entry| entry.storage.get(key))
            .copied()
            .unwrap_or_default()
    }

    pub async fn account(&mut self, address: &Address) -> eyre::Result<Account> {
        self.load(address).await?;
        Ok(self.account_ref(address))
    }

    pub async fn balance(&mut self, address: &Address) -> eyre::Result<Word> {
        Ok(self.account(address).await?.balance)
    }

    pub async fn nonce(&mut self, address: &Address) -> eyre::Result<u64> {
        Ok(self.account(address).await?.nonce)
    }

    pub async fn code(&mut self, address: &Address) -> eyre::Result<Arc<Vec<u8>>> {
        Ok(self.account(address).await?.code)
    }

    /// keccak256 of the code, or zero for an empty (non-existent) account.
    pub async fn code_hash(&mut self, address: &Address) -> eyre::Result<Word> {
        let account = self.account(address).await?;
        if account.is_empty() {
            return Ok(Word::zero());
        }
        Ok(Word::from(keccak256(&account.code)))
    }

    pub async fn is_empty(&mut self, address: &Address) -> eyre::Result<bool> {
        Ok(self.account(address).await?.is_empty())
    }

    /// Any non-zero storage, committed or pending.
    pub async fn has_storage(&mut self, address: &Address) -> eyre::Result<bool> {
        self.load(address).await?;
        let pending = self.layers.iter().any(|layer| {
            layer
                .storage
                .iter()
                .any(|((owner, _), value)| owner == address && !value.is_zero())
        });
        let committed = self.base.get(address).is_some_and(|entry| {
            (entry.chain_has_storage && !entry.wiped)
                || entry.storage.values().any(|value| !value.is_zero())
        });
        Ok(pending || committed)
    }

    pub async fn storage(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        self.load_slot(address, key).await?;
        Ok(self.slot_ref(address, key))
    }

    /// Value of the slot at the start of the current transaction.
    pub async fn original_storage(&mut self, address: &Address, key: &Word) -> eyre::Result<Word> {
        self.load_slot(address, key).await?;
        Ok(self
            .base
            .get(address)
            .and_then(|entry| entry.storage.get(key))
            .copied()
            .unwrap_or_default())
    }

    pub async fn set_storage(&mut self, address: &Address, key: Word, value: Word) -> eyre::Result<()> {
        self.load_slot(address, &key).await?;
        match self.layers.last_mut() {
            Some(layer) => {
                layer.storage.insert((*address, key), value);
            }
            None => {
                let entry = self.base.entry(*address).or_default();
                entry.storage.insert(key, value);
            }
        }
        Ok(())
    }

    pub async fn set_balance(&mut self, address: &Address, balance: Word) -> eyre::Result<()> {
        self.load(address).await?;
        self.account_mut(address).balance = balance;
        Ok(())
    }

    pub async fn set_nonce(&mut self, address: &Address, nonce: u64) -> eyre::Result<()> {
        self.load(address).await?;
        self.account_mut(address).nonce = nonce;
        Ok(())
    }

    pub async fn set_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()> {
        self.load(address).await?;
        self.account_mut(address).code = Arc::new(code);
        Ok(())
    }

    /// Returns `false` (and leaves the nonce untouched) when it is already `u64::MAX`.
    pub async fn increment_nonce(&mut self, address: &Address) -> eyre::Result<bool> {
        self.load(address).await?;
        let account = self.account_mut(address);
        match account.nonce.checked_add(1) {
            Some(nonce) => {
                account.nonce = nonce;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn add_balance(&mut self, address: &Address, value: Word) -> eyre::Result<()> {
        self.load(address).await?;
        let account = self.account_mut(address);
        account.balance = account.balance.saturating_add(value);
        Ok(())
    }

    /// Returns `false` (and changes nothing) when the balance is too low.
    pub async fn sub_balance(&mut self, address: &Address, value: Word) -> eyre::Result<bool> {
        self.load(address).await?;
        let account = self.account_mut(address);
        match account.balance.checked_sub(value) {
            Some(balance) => {
                account.balance = balance;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Moves `value` between accounts; `false` when `from` cannot afford it.
    pub async fn transfer(&mut self, from: &Address, to: &Address, value: Word) -> eyre::Result<bool> {
        self.load(to).await?;
        if !self.sub_balance(from, value).await? {
            return Ok(false);
        }
        self.add_balance(to, value).await?;
        Ok(true)
    }

    pub fn transient(&self, address: &Address, key: &Word) -> Word {
        let pair = (*address, *key);
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.transient.get(&pair))
            .or_else(|| self.transient.get(&pair))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_transient(&mut self, address: &Address, key: Word, value: Word) {
        let pair = (*address, key);
        match self.layers.last_mut() {
            Some(layer) => layer.transient.insert(pair, value),
            None => self.transient.insert(pair, value),
        };
    }

    /// Marks the address warm; returns whether it already was.
    pub fn warm_address(&mut self, address: &Address) -> bool {
        !self.warm_addresses.insert(*address)
    }

    pub fn is_warm_address(&self, address: &Address) -> bool {
        self.warm_addresses.contains(address)
    }

    /// Marks the slot warm; returns whether it already was.
    pub fn warm_slot(&mut self, address: &Address, key: &Word) -> bool {
        !self.warm_slots.insert((*address, *key))
    }

    pub fn is_warm_slot(&self, address: &Address, key: &Word) -> bool {
        self.warm_slots.contains(&(*address, *key))
    }

    pub fn mark_created(&mut self, address: &Address) {
        match self.layers.last_mut() {
            Some(layer) => layer.created.insert(*address),
            None => self.created.insert(*address),
        };
    }

    /// Created by the running transaction (EIP-6780).
    pub fn is_created(&self, address: &Address) -> bool {
        self.created.contains(address)
            || self.layers.iter().any(|layer| layer.created.contains(address))
    }

    pub fn mark_destructed(&mut self, address: &Address) {
        match self.layers.last_mut() {
            Some(layer) => layer.destructed.insert(*address),
            None => self.destructed.insert(*address),
        };
    }

    pub fn is_destructed(&self, address: &Address) -> bool {
        self.destructed.contains(address)
            || self.layers.iter().any(|layer| layer.destructed.contains(address))
    }

    pub async fn block_hash(&mut self, number: u64) -> eyre::Result<Word> {
        if let Some(hash) = self.block_hashes.get(&number) {
            return Ok(*hash);
        }
        let now = Instant::now();
        let hash = self.loader.block_hash(number).await?;
        let ms = now.elapsed().as_millis();
        tracing::info!("BLOCKHASH: [{ms} ms] {number}={hash:#x}");
        self.block_hashes.insert(number, hash);
        Ok(hash)
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn take_snapshot(&mut self) -> usize {
        let id = self.layers.len();
        self.layers.push(Layer::default());
        tracing::debug!("snapshot {id}");
        id
    }

    /// Folds every layer since `id` into its parent (or the base for `id == 0`).
    pub fn commit(&mut self, id: usize) {
        if id >= self.layers.len() {
            return;
        }
        let mut merged = Layer::default();
        for layer in self.layers.drain(id..) {
            merged.merge(layer);
        }
        match self.layers.last_mut() {
            Some(parent) => parent.merge(merged),
            None => self.flatten(merged),
        }
        tracing::debug!("commit {id}");
    }

    /// Drops every layer since `id`. Reverting an id that is already gone
    /// does nothing.
    pub fn revert(&mut self, id: usize) {
        if id >= self.layers.len() {
            return;
        }
        self.layers.truncate(id);
        tracing::debug!("revert {id}");
    }

    fn flatten(&mut self, layer: Layer) {
        for (address, account) in layer.accounts {
            self.base.entry(address).or_default().account = account;
        }
        for ((address, key), value) in layer.storage {
            self.base.entry(address).or_default().storage.insert(key, value);
        }
        self.transient.extend(layer.transient);
        self.created.extend(layer.created);
        self.destructed.extend(layer.destructed);
    }

    /// Ends the running transaction: merges all layers, deletes accounts
    /// that self-destructed in the same transaction that created them, and
    /// resets warm sets, transient storage and the created set. Returns the
    /// deleted addresses.
    pub fn finalize_transaction(&mut self) -> Vec<Address> {
        self.commit(0);

        let mut deleted = self
            .destructed
            .drain()
            .filter(|address| self.created.contains(address))
            .collect::<Vec<_>>();
        deleted.sort();
        for address in &deleted {
            if let Some(entry) = self.base.get_mut(address) {
                entry.account = Account::default();
                entry.storage.clear();
                entry.wiped = true;
            }
        }

        self.created.clear();
        self.transient.clear();
        self.warm_addresses.clear();
        self.warm_slots.clear();
        deleted
    }

    /// Differences between the loaded chain values and the committed ledger.
    pub fn changes(&self) -> BTreeMap<Address, AccountChange> {
        let mut changes = BTreeMap::new();
        for (address, entry) in &self.base {
            let mut change = AccountChange::default();
            if entry.account.balance != entry.chain.balance {
                change.balance = Some(entry.account.balance);
            }
            if entry.account.nonce != entry.chain.nonce {
                change.nonce = Some(entry.account.nonce);
            }
            if entry.account.code != entry.chain.code {
                change.code = Some(Hex(entry.account.code.to_vec()));
            }
            for (key, value) in &entry.storage {
                let chain = entry.chain_storage.get(key).copied().unwrap_or_default();
                if *value != chain {
                    change.storage.insert(*key, *value);
                }
            }
            change.deleted = entry.wiped && !entry.chain.is_empty();
            if change != AccountChange::default() {
                changes.insert(*address, change);
            }
        }
        changes
    }
}
