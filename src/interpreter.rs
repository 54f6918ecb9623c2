use std::sync::Arc;

use serde::Serialize;

use crate::{
    common::{
        Hex,
        address::Address,
        block::Header,
        hash::keccak256,
        tx::delegated_address,
        word::Word,
    },
    config::Config,
    decoder::{Bytecode, Decoder},
    executor::{ExecutorError, InnerCall},
    gas::{self, Gas},
    memory::Memory,
    opcodes::INVALID,
    stack::{STACK_LIMIT, Stack},
    state::{Loader, State},
};

/// Transaction-wide environment shared by every frame.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub config: Config,
    pub header: Header,
    pub origin: Address,
    pub gas_price: Word,
    pub blob_hashes: Vec<Word>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameKind {
    #[default]
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

impl FrameKind {
    pub fn is_create(&self) -> bool {
        matches!(self, FrameKind::Create | FrameKind::Create2)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Hex,
}

/// Message call produced by the CALL family, already paid for by the caller.
#[derive(Clone, Debug, Default)]
pub struct CallRequest {
    pub kind: FrameKind,
    pub caller: Address,
    /// Account whose storage and balance the callee runs against.
    pub address: Address,
    /// Address named by the instruction; precompiles are matched on it.
    pub target: Address,
    /// Account the code was taken from (differs from `target` for delegated EOAs).
    pub code_address: Address,
    pub code: Arc<Vec<u8>>,
    pub value: Word,
    /// Move `value` from `caller` to `address` before running.
    pub transfer: bool,
    pub input: Vec<u8>,
    /// Gas handed to the callee, stipend included.
    pub gas: u64,
    pub is_static: bool,
    /// Region of the caller's memory receiving the output.
    pub output: (usize, usize),
}

#[derive(Clone, Debug, Default)]
pub struct CreateRequest {
    pub kind: FrameKind,
    pub caller: Address,
    pub value: Word,
    pub init_code: Vec<u8>,
    pub salt: Option<Word>,
    pub gas: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
    SelfDestruct,
}

/// What the frame asks the orchestrator to do after one instruction.
#[derive(Debug)]
pub enum Action {
    Continue,
    Call(CallRequest),
    Create(CreateRequest),
    Halt(Halt),
}

/// One call frame: code, machine state and the result accumulated so far.
#[derive(Debug, Default)]
pub struct Frame {
    pub kind: FrameKind,
    pub code: Bytecode,
    /// Index into `code.instructions`, not a byte offset.
    pub pc: usize,
    pub depth: usize,
    pub is_static: bool,
    pub gas: Gas,
    pub snapshot: usize,
    pub address: Address,
    pub code_address: Address,
    pub caller: Address,
    pub value: Word,
    pub input: Vec<u8>,
    pub stack: Stack,
    pub memory: Memory,
    pub return_data: Vec<u8>,
    pub logs: Vec<Log>,
    pub created: Vec<Address>,
    pub inner_calls: Vec<InnerCall>,
    /// Region of the parent's memory receiving this frame's output.
    pub output: (usize, usize),
}

impl Frame {
    pub fn for_call(request: CallRequest, depth: usize, snapshot: usize) -> Self {
        Self {
            kind: request.kind,
            code: Decoder::decode(request.code.as_ref().clone()),
            depth,
            is_static: request.is_static,
            gas: Gas::new(request.gas),
            snapshot,
            address: request.address,
            code_address: request.code_address,
            caller: request.caller,
            value: request.value,
            input: request.input,
            output: request.output,
            ..Self::default()
        }
    }

    pub fn for_create(request: CreateRequest, address: Address, depth: usize, snapshot: usize) -> Self {
        Self {
            kind: request.kind,
            code: Decoder::decode(request.init_code),
            depth,
            gas: Gas::new(request.gas),
            snapshot,
            address,
            code_address: address,
            caller: request.caller,
            value: request.value,
            ..Self::default()
        }
    }

    /// Opcode of the next instruction, `None` once past the end of the code.
    pub fn current_opcode(&self) -> Option<(usize, u8)> {
        self.code
            .instructions
            .get(self.pc)
            .map(|instruction| (instruction.offset, instruction.opcode.code))
    }

    /// Charges expansion for `[offset, offset + len)` and grows memory to cover it.
    fn memory_region(&mut self, offset: &Word, len: &Word) -> Result<(usize, usize), ExecutorError> {
        let words = gas::memory_words(offset, len).ok_or(ExecutorError::OutOfGas)?;
        self.gas
            .charge(gas::memory_expansion(self.memory.words() as u64, words))?;
        if len.is_zero() {
            return Ok((0, 0));
        }
        let (offset, len) = (offset.low_u64() as usize, len.low_u64() as usize);
        self.memory.expand(offset, len);
        Ok((offset, len))
    }

    /// Memory region for a copy instruction, with the per-word copy cost.
    fn copy_region(&mut self, offset: &Word, len: &Word) -> Result<(usize, usize), ExecutorError> {
        let (offset, len) = self.memory_region(offset, len)?;
        self.gas.charge(gas::copy_cost(len as u64))?;
        Ok((offset, len))
    }

    fn unary(&mut self, f: impl FnOnce(Word) -> Word) -> Result<(), ExecutorError> {
        let a = self.stack.pop()?;
        self.stack.push(f(a))
    }

    fn binary(&mut self, f: impl FnOnce(Word, Word) -> Word) -> Result<(), ExecutorError> {
        let [a, b] = self.stack.pop_n::<2>()?;
        self.stack.push(f(a, b))
    }

    fn ternary(&mut self, f: impl FnOnce(Word, Word, Word) -> Word) -> Result<(), ExecutorError> {
        let [a, b, c] = self.stack.pop_n::<3>()?;
        self.stack.push(f(a, b, c))
    }

    fn jump(&mut self, dest: &Word) -> Result<(), ExecutorError> {
        self.pc = dest
            .to_usize()
            .and_then(|offset| self.code.resolve_jump(offset))
            .ok_or(ExecutorError::InvalidJump)?;
        Ok(())
    }

    fn ensure_mutable(&self, opcode: u8) -> Result<(), ExecutorError> {
        if self.is_static {
            return Err(ExecutorError::StaticCallViolation(opcode));
        }
        Ok(())
    }

    /// Executes one instruction.
    pub async fn step<L: Loader>(
        &mut self,
        state: &mut State<L>,
        ctx: &Context,
    ) -> Result<Action, ExecutorError> {
        let Some(instruction) = self.code.instructions.get(self.pc) else {
            return Ok(Action::Halt(Halt::Stop));
        };
        let opcode = instruction.opcode.code;
        let offset = instruction.offset;
        let immediate = if instruction.opcode.push_len() > 0 {
            instruction.immediate()
        } else {
            Word::zero()
        };

        if opcode == INVALID {
            return Err(ExecutorError::InvalidOpcode(opcode));
        }
        let cost = gas::static_cost(opcode).ok_or(ExecutorError::UndefinedOpcode(opcode))?;
        let (inputs, outputs) = (
            instruction.opcode.inputs as usize,
            instruction.opcode.outputs as usize,
        );
        self.stack.require(inputs)?;
        if self.stack.len() - inputs + outputs > STACK_LIMIT {
            return Err(ExecutorError::StackOverflow);
        }
        self.gas.charge(cost)?;
        self.pc += 1;

        match opcode {
            0x00 => {
                // STOP
                return Ok(Action::Halt(Halt::Stop));
            }
            0x01 => self.binary(|a, b| a + b)?,
            0x02 => self.binary(|a, b| a * b)?,
            0x03 => self.binary(|a, b| a - b)?,
            0x04 => self.binary(|a, b| a / b)?,
            0x05 => self.binary(|a, b| a.signed_div(&b))?,
            0x06 => self.binary(|a, b| a % b)?,
            0x07 => self.binary(|a, b| a.signed_rem(&b))?,
            0x08 => self.ternary(|a, b, n| a.add_modulo(&b, &n))?,
            0x09 => self.ternary(|a, b, n| a.mul_modulo(&b, &n))?,
            0x0a => {
                // EXP
                let exponent = *self.stack.peek(1)?;
                self.gas.charge(gas::exp_cost(&exponent))?;
                self.binary(|base, exponent| base.pow(exponent))?;
            }
            0x0b => self.binary(|b, x| x.sign_extend(&b))?,

            0x10 => self.binary(|a, b| Word::from(a < b))?,
            0x11 => self.binary(|a, b| Word::from(a > b))?,
            0x12 => self.binary(|a, b| Word::from(a.signed_lt(&b)))?,
            0x13 => self.binary(|a, b| Word::from(a.signed_gt(&b)))?,
            0x14 => self.binary(|a, b| Word::from(a == b))?,
            0x15 => self.unary(|a| Word::from(a.is_zero()))?,
            0x16 => self.binary(|a, b| a & b)?,
            0x17 => self.binary(|a, b| a | b)?,
            0x18 => self.binary(|a, b| a ^ b)?,
            0x19 => self.unary(|a| !a)?,
            0x1a => self.binary(|i, x| x.byte(&i))?,
            0x1b => self.binary(|shift, x| x.shl(&shift))?,
            0x1c => self.binary(|shift, x| x.shr(&shift))?,
            0x1d => self.binary(|shift, x| x.sar(&shift))?,

            0x20 => {
                // KECCAK256
                let [offset, len] = self.stack.pop_n::<2>()?;
                let (offset, len) = self.memory_region(&offset, &len)?;
                self.gas.charge(gas::keccak_cost(len as u64))?;
                let hash = keccak256(&self.memory.read(offset, len));
                self.stack.push(Word::from(hash))?;
            }

            0x30 => self.stack.push(self.address.as_word())?,
            0x31 => {
                // BALANCE
                let address = Address::from(&self.stack.pop()?);
                let warm = state.warm_address(&address);
                self.gas.charge(gas::access_cost(warm))?;
                let balance = state.balance(&address).await?;
                self.stack.push(balance)?;
            }
            0x32 => self.stack.push(ctx.origin.as_word())?,
            0x33 => self.stack.push(self.caller.as_word())?,
            0x34 => self.stack.push(self.value)?,
            0x35 => {
                // CALLDATALOAD
                let offset = self.stack.pop()?;
                let data = padded_slice(&self.input, &offset, 32);
                self.stack.push(Word::from_bytes(&data))?;
            }
            0x36 => self.stack.push(Word::from(self.input.len()))?,
            0x37 => {
                // CALLDATACOPY
                let [dest, src, len] = self.stack.pop_n::<3>()?;
                let (dest, len) = self.copy_region(&dest, &len)?;
                let data = padded_slice(&self.input, &src, len);
                self.memory.write(dest, len, &data);
            }
            0x38 => self.stack.push(Word::from(self.code.len()))?,
            0x39 => {
                // CODECOPY
                let [dest, src, len] = self.stack.pop_n::<3>()?;
                let (dest, len) = self.copy_region(&dest, &len)?;
                let data = padded_slice(&self.code.code, &src, len);
                self.memory.write(dest, len, &data);
            }
            0x3a => self.stack.push(ctx.gas_price)?,
            0x3b => {
                // EXTCODESIZE
                let address = Address::from(&self.stack.pop()?);
                let warm = state.warm_address(&address);
                self.gas.charge(gas::access_cost(warm))?;
                let code = state.code(&address).await?;
                self.stack.push(Word::from(code.len()))?;
            }
            0x3c => {
                // EXTCODECOPY
                let [address, dest, src, len] = self.stack.pop_n::<4>()?;
                let address = Address::from(&address);
                let warm = state.warm_address(&address);
                self.gas.charge(gas::access_cost(warm))?;
                let (dest, len) = self.copy_region(&dest, &len)?;
                let code = state.code(&address).await?;
                let data = padded_slice(&code, &src, len);
                self.memory.write(dest, len, &data);
            }
            0x3d => self.stack.push(Word::from(self.return_data.len()))?,
            0x3e => {
                // RETURNDATACOPY
                let [dest, src, len] = self.stack.pop_n::<3>()?;
                let end = src.checked_add(len).ok_or(ExecutorError::ReturnDataOutOfBounds)?;
                if end > Word::from(self.return_data.len()) {
                    return Err(ExecutorError::ReturnDataOutOfBounds);
                }
                let (dest, len) = self.copy_region(&dest, &len)?;
                let src = src.low_u64() as usize;
                let data = self.return_data[src..src + len].to_vec();
                self.memory.write(dest, len, &data);
            }
            0x3f => {
                // EXTCODEHASH
                let address = Address::from(&self.stack.pop()?);
                let warm = state.warm_address(&address);
                self.gas.charge(gas::access_cost(warm))?;
                let hash = state.code_hash(&address).await?;
                self.stack.push(hash)?;
            }

            0x40 => {
                // BLOCKHASH
                let number = self.stack.pop()?;
                let current = ctx.header.number;
                let hash = match number.to_u64() {
                    Some(n) if number < current && current - number <= Word::from(256u64) => {
                        state.block_hash(n).await?
                    }
                    _ => Word::zero(),
                };
                self.stack.push(hash)?;
            }
            0x41 => self.stack.push(ctx.header.coinbase.as_word())?,
            0x42 => self.stack.push(ctx.header.timestamp)?,
            0x43 => self.stack.push(ctx.header.number)?,
            0x44 => self.stack.push(ctx.header.prev_randao)?,
            0x45 => self.stack.push(ctx.header.gas_limit)?,
            0x46 => self.stack.push(Word::from(ctx.config.chain_id))?,
            0x47 => {
                // SELFBALANCE
                let balance = state.balance(&self.address).await?;
                self.stack.push(balance)?;
            }
            0x48 => self.stack.push(ctx.header.base_fee)?,
            0x49 => {
                // BLOBHASH
                let index = self.stack.pop()?;
                let hash = index
                    .to_usize()
                    .and_then(|index| ctx.blob_hashes.get(index))
                    .copied()
                    .unwrap_or_default();
                self.stack.push(hash)?;
            }
            0x4a => {
                // BLOBBASEFEE
                let fee = ctx
                    .header
                    .blob_base_fee(ctx.config.blob_base_fee_update_fraction);
                self.stack.push(fee)?;
            }

            0x50 => {
                // POP
                self.stack.pop()?;
            }
            0x51 => {
                // MLOAD
                let offset = self.stack.pop()?;
                let (offset, _) = self.memory_region(&offset, &Word::from(32u64))?;
                let value = self.memory.read_word(offset);
                self.stack.push(value)?;
            }
            0x52 => {
                // MSTORE
                let [offset, value] = self.stack.pop_n::<2>()?;
                let (offset, _) = self.memory_region(&offset, &Word::from(32u64))?;
                self.memory.write_word(offset, &value);
            }
            0x53 => {
                // MSTORE8
                let [offset, value] = self.stack.pop_n::<2>()?;
                let (offset, _) = self.memory_region(&offset, &Word::one())?;
                self.memory.write_byte(offset, value.low_u64() as u8);
            }
            0x54 => {
                // SLOAD
                let key = self.stack.pop()?;
                let warm = state.warm_slot(&self.address, &key);
                self.gas.charge(gas::sload_cost(warm))?;
                let value = state.storage(&self.address, &key).await?;
                self.stack.push(value)?;
            }
            0x55 => {
                // SSTORE
                self.ensure_mutable(opcode)?;
                if self.gas.remaining() <= gas::SSTORE_SENTRY {
                    return Err(ExecutorError::OutOfGas);
                }
                let [key, value] = self.stack.pop_n::<2>()?;
                let warm = state.warm_slot(&self.address, &key);
                let current = state.storage(&self.address, &key).await?;
                let original = state.original_storage(&self.address, &key).await?;
                self.gas
                    .charge(gas::sstore_cost(&original, &current, &value, warm))?;
                self.gas
                    .record_refund(gas::sstore_refund(&original, &current, &value));
                state.set_storage(&self.address, key, value).await?;
            }
            0x56 => {
                // JUMP
                let dest = self.stack.pop()?;
                self.jump(&dest)?;
            }
            0x57 => {
                // JUMPI
                let [dest, condition] = self.stack.pop_n::<2>()?;
                if !condition.is_zero() {
                    self.jump(&dest)?;
                }
            }
            0x58 => self.stack.push(Word::from(offset))?,
            0x59 => self.stack.push(Word::from(self.memory.len()))?,
            0x5a => self.stack.push(Word::from(self.gas.remaining()))?,
            0x5b => {
                // JUMPDEST
            }
            0x5c => {
                // TLOAD
                let key = self.stack.pop()?;
                self.stack.push(state.transient(&self.address, &key))?;
            }
            0x5d => {
                // TSTORE
                self.ensure_mutable(opcode)?;
                let [key, value] = self.stack.pop_n::<2>()?;
                state.set_transient(&self.address, key, value);
            }
            0x5e => {
                // MCOPY
                let [dest, src, len] = self.stack.pop_n::<3>()?;
                let (src, _) = self.memory_region(&src, &len)?;
                let (dest, len) = self.copy_region(&dest, &len)?;
                self.memory.copy_within(dest, src, len);
            }
            0x5f..=0x7f => self.stack.push(immediate)?,
            0x80..=0x8f => self.stack.dup((opcode - 0x7f) as usize)?,
            0x90..=0x9f => self.stack.swap((opcode - 0x8f) as usize)?,
            0xa0..=0xa4 => {
                // LOG0..LOG4
                self.ensure_mutable(opcode)?;
                let [offset, len] = self.stack.pop_n::<2>()?;
                let count = (opcode - 0xa0) as usize;
                self.stack.require(count)?;
                let mut topics = Vec::with_capacity(count);
                for _ in 0..count {
                    topics.push(self.stack.pop()?);
                }
                let (offset, len) = self.memory_region(&offset, &len)?;
                self.gas.charge(gas::log_cost(count as u64, len as u64))?;
                self.logs.push(Log {
                    address: self.address,
                    topics,
                    data: Hex(self.memory.read(offset, len)),
                });
            }

            0xf0 | 0xf5 => {
                // CREATE, CREATE2
                self.ensure_mutable(opcode)?;
                let [value, offset, len] = self.stack.pop_n::<3>()?;
                let salt = if opcode == 0xf5 {
                    Some(self.stack.pop()?)
                } else {
                    None
                };
                let (offset, len) = self.memory_region(&offset, &len)?;
                if len > gas::MAX_INITCODE_SIZE {
                    return Err(ExecutorError::InitCodeSizeExceeded);
                }
                self.gas.charge(gas::create_cost(len as u64, salt.is_some()))?;
                let init_code = self.memory.read(offset, len);

                let forwarded = gas::all_but_one_64th(self.gas.remaining());
                self.gas.charge(forwarded)?;
                let kind = if salt.is_some() {
                    FrameKind::Create2
                } else {
                    FrameKind::Create
                };
                return Ok(Action::Create(CreateRequest {
                    kind,
                    caller: self.address,
                    value,
                    init_code,
                    salt,
                    gas: forwarded,
                }));
            }
            0xf1 | 0xf2 | 0xf4 | 0xfa => {
                // CALL, CALLCODE, DELEGATECALL, STATICCALL
                return self.call(opcode, state).await.map(Action::Call);
            }
            0xf3 | 0xfd => {
                // RETURN, REVERT
                let [offset, len] = self.stack.pop_n::<2>()?;
                let (offset, len) = self.memory_region(&offset, &len)?;
                let data = self.memory.read(offset, len);
                let halt = if opcode == 0xf3 {
                    Halt::Return(data)
                } else {
                    Halt::Revert(data)
                };
                return Ok(Action::Halt(halt));
            }
            0xff => {
                // SELFDESTRUCT
                self.ensure_mutable(opcode)?;
                let beneficiary = Address::from(&self.stack.pop()?);
                let warm = state.warm_address(&beneficiary);
                let balance = state.balance(&self.address).await?;
                let creates_account = !balance.is_zero() && state.is_empty(&beneficiary).await?;
                self.gas
                    .charge(gas::selfdestruct_cost(warm, creates_account))?;

                if state.is_created(&self.address) {
                    state.set_balance(&self.address, Word::zero()).await?;
                    if beneficiary != self.address {
                        state.add_balance(&beneficiary, balance).await?;
                    }
                    state.mark_destructed(&self.address);
                } else if beneficiary != self.address {
                    state.transfer(&self.address, &beneficiary, balance).await?;
                }
                return Ok(Action::Halt(Halt::SelfDestruct));
            }
            _ => return Err(ExecutorError::UndefinedOpcode(opcode)),
        }
        Ok(Action::Continue)
    }

    async fn call<L: Loader>(
        &mut self,
        opcode: u8,
        state: &mut State<L>,
    ) -> Result<CallRequest, ExecutorError> {
        let kind = match opcode {
            0xf1 => FrameKind::Call,
            0xf2 => FrameKind::CallCode,
            0xf4 => FrameKind::DelegateCall,
            _ => FrameKind::StaticCall,
        };
        let requested = self.stack.pop()?;
        let target = Address::from(&self.stack.pop()?);
        let value = match kind {
            FrameKind::Call | FrameKind::CallCode => self.stack.pop()?,
            _ => Word::zero(),
        };
        let [in_offset, in_len, out_offset, out_len] = self.stack.pop_n::<4>()?;

        if kind == FrameKind::Call && self.is_static && !value.is_zero() {
            return Err(ExecutorError::StaticCallViolation(opcode));
        }

        let (in_offset, in_len) = self.memory_region(&in_offset, &in_len)?;
        let output = self.memory_region(&out_offset, &out_len)?;

        let warm = state.warm_address(&target);
        let transfer = !value.is_zero();
        let creates_account =
            kind == FrameKind::Call && transfer && state.is_empty(&target).await?;
        let mut cost = gas::call_cost(warm, transfer, creates_account);

        let mut code = state.code(&target).await?;
        let mut code_address = target;
        if let Some(delegate) = delegated_address(&code) {
            cost += gas::access_cost(state.warm_address(&delegate));
            code = state.code(&delegate).await?;
            code_address = delegate;
        }
        self.gas.charge(cost)?;

        let mut gas = gas::forwarded_gas(&requested, self.gas.remaining());
        self.gas.charge(gas)?;
        if transfer {
            gas += gas::CALL_STIPEND;
        }

        let (caller, address, value) = match kind {
            FrameKind::CallCode => (self.address, self.address, value),
            FrameKind::DelegateCall => (self.caller, self.address, self.value),
            _ => (self.address, target, value),
        };
        Ok(CallRequest {
            kind,
            caller,
            address,
            target,
            code_address,
            code,
            value,
            transfer,
            input: self.memory.read(in_offset, in_len),
            gas,
            is_static: self.is_static || kind == FrameKind::StaticCall,
            output,
        })
    }
}

/// `len` bytes of `source` starting at `offset`, zero-padded past the end.
fn padded_slice(source: &[u8], offset: &Word, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if let Some(start) = offset.to_usize() {
        if start < source.len() {
            let end = start.saturating_add(len).min(source.len());
            out[..end - start].copy_from_slice(&source[start..end]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        common::address::addr,
        state::{GenesisAccount, MemoryLoader},
    };

    const CONTRACT: Address = addr("0x00000000000000000000000000000000000c0de0");

    fn code_frame(code: &str, gas: u64) -> Frame {
        let code = hex::decode(code).unwrap();
        Frame::for_call(
            CallRequest {
                address: CONTRACT,
                code_address: CONTRACT,
                target: CONTRACT,
                code: Arc::new(code),
                gas,
                ..CallRequest::default()
            },
            0,
            0,
        )
    }

    /// Runs a frame that makes no calls until it halts.
    async fn run(frame: &mut Frame, state: &mut State<MemoryLoader>) -> Result<Halt, ExecutorError> {
        let ctx = Context::default();
        loop {
            match frame.step(state, &ctx).await? {
                Action::Continue => continue,
                Action::Halt(halt) => return Ok(halt),
                action => panic!("unexpected {action:?}"),
            }
        }
    }

    fn state() -> State<MemoryLoader> {
        let loader = MemoryLoader::new().with_account(
            CONTRACT,
            GenesisAccount::with_balance(Word::from(5)).slot(Word::one(), Word::from(9)),
        );
        State::new(loader)
    }

    fn stack(frame: &Frame) -> Vec<Word> {
        frame.stack.as_slice().to_vec()
    }

    #[tokio::test]
    async fn test_add() {
        // PUSH1 1, PUSH1 1, ADD
        let mut frame = code_frame("6001600101", 100);
        let mut state = state();
        assert_eq!(run(&mut frame, &mut state).await.unwrap(), Halt::Stop);
        assert_eq!(stack(&frame), vec![Word::from(2)]);
        assert_eq!(frame.gas.used, 9);
    }

    #[tokio::test]
    async fn test_arithmetic_wraps() {
        // PUSH1 1, PUSH0, SUB, PUSH1 2, MUL, PUSH0, PUSH1 7, DIV, PUSH0, PUSH1 7, SMOD
        let mut frame = code_frame("60015f0360020260005f6007045f600707", 1000);
        let mut state = state();
        let halt = run(&mut frame, &mut state).await;
        assert!(halt.is_ok());
        assert_eq!(
            stack(&frame),
            vec![Word::max() - Word::one(), Word::zero(), Word::zero(), Word::zero()]
        );
    }

    #[tokio::test]
    async fn test_exp_cost() {
        // PUSH2 0x0100, PUSH1 2, EXP
        let mut frame = code_frame("61010060020a", 1000);
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(stack(&frame), vec![Word::zero()]);
        assert_eq!(frame.gas.used, 3 + 3 + 10 + 50 * 2);
    }

    #[tokio::test]
    async fn test_invalid_jump() {
        // PUSH1 3, JUMP, PUSH1 0x5b
        let mut frame = code_frame("600356605b", 100);
        let mut state = state();
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::InvalidJump)
        ));

        // PUSH1 4, JUMP, INVALID, JUMPDEST, PUSH1 1
        let mut frame = code_frame("600456fe5b6001", 100);
        assert_eq!(run(&mut frame, &mut state).await.unwrap(), Halt::Stop);
        assert_eq!(stack(&frame), vec![Word::one()]);
    }

    #[tokio::test]
    async fn test_undefined_and_invalid_opcodes() {
        let mut state = state();
        assert!(matches!(
            run(&mut code_frame("0c", 100), &mut state).await,
            Err(ExecutorError::UndefinedOpcode(0x0c))
        ));
        assert!(matches!(
            run(&mut code_frame("fe", 100), &mut state).await,
            Err(ExecutorError::InvalidOpcode(0xfe))
        ));
    }

    #[tokio::test]
    async fn test_stack_arity_checked_first() {
        let mut state = state();
        // PUSH1 1, ADD
        let mut frame = code_frame("600101", 100);
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::StackUnderflow)
        ));
        assert_eq!(frame.gas.used, 3);

        let mut frame = code_frame("5f", 100);
        for _ in 0..STACK_LIMIT {
            frame.stack.push(Word::zero()).unwrap();
        }
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::StackOverflow)
        ));
    }

    #[tokio::test]
    async fn test_memory_expansion_cost() {
        // PUSH1 1, PUSH1 0x40, MSTORE: three words
        let mut frame = code_frame("6001604052", 100);
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(frame.memory.len(), 96);
        assert_eq!(frame.gas.used, 3 + 3 + 3 + gas::memory_cost(3));

        // MLOAD at a huge offset cannot be paid for
        let mut frame = code_frame("63ffffffff51", 1_000_000);
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::OutOfGas)
        ));
    }

    #[tokio::test]
    async fn test_sload_warm_and_cold() {
        // PUSH1 1, SLOAD, PUSH1 1, SLOAD
        let mut frame = code_frame("600154600154", 10_000);
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(stack(&frame), vec![Word::from(9), Word::from(9)]);
        assert_eq!(frame.gas.used, 3 + 2100 + 3 + 100);
    }

    #[tokio::test]
    async fn test_sstore_sentry() {
        // PUSH1 1, PUSH1 1, SSTORE with 2306 gas: 2300 left at SSTORE
        let mut frame = code_frame("6001600155", 2306);
        let mut state = state();
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::OutOfGas)
        ));
    }

    #[tokio::test]
    async fn test_static_violation() {
        let mut frame = code_frame("6001600155", 100_000);
        frame.is_static = true;
        let mut state = state();
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::StaticCallViolation(0x55))
        ));
    }

    #[tokio::test]
    async fn test_returndatacopy_out_of_bounds() {
        // PUSH1 1, PUSH0, PUSH0, RETURNDATACOPY
        let mut frame = code_frame("60015f5f3e", 100);
        let mut state = state();
        assert!(matches!(
            run(&mut frame, &mut state).await,
            Err(ExecutorError::ReturnDataOutOfBounds)
        ));
    }

    #[tokio::test]
    async fn test_return_and_revert() {
        // PUSH1 0x2a, PUSH0, MSTORE8, PUSH1 1, PUSH0, RETURN
        let mut state = state();
        let mut frame = code_frame("602a5f5360015ff3", 100);
        assert_eq!(
            run(&mut frame, &mut state).await.unwrap(),
            Halt::Return(vec![0x2a])
        );
        let mut frame = code_frame("602a5f5360015ffd", 100);
        assert_eq!(
            run(&mut frame, &mut state).await.unwrap(),
            Halt::Revert(vec![0x2a])
        );
    }

    #[tokio::test]
    async fn test_log() {
        // PUSH1 0xaa, PUSH0, MSTORE8, PUSH1 7, PUSH1 1, PUSH0, LOG1
        let mut frame = code_frame("60aa5f53600760015fa1", 10_000);
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(
            frame.logs,
            vec![Log {
                address: CONTRACT,
                topics: vec![Word::from(7)],
                data: Hex(vec![0xaa]),
            }]
        );
    }

    #[tokio::test]
    async fn test_environment() {
        // SELFBALANCE, CALLDATASIZE, CODESIZE, PC
        let mut frame = code_frame("47363858", 100);
        frame.input = vec![1, 2, 3];
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(
            stack(&frame),
            vec![Word::from(5), Word::from(3), Word::from(4), Word::from(3)]
        );
    }

    #[tokio::test]
    async fn test_transient_storage() {
        // PUSH1 5, PUSH1 1, TSTORE, PUSH1 1, TLOAD
        let mut frame = code_frame("600560015d60015c", 1000);
        let mut state = state();
        run(&mut frame, &mut state).await.unwrap();
        assert_eq!(stack(&frame), vec![Word::from(5)]);
    }

    #[test]
    fn test_padded_slice() {
        assert_eq!(padded_slice(&[1, 2, 3], &Word::one(), 4), vec![2, 3, 0, 0]);
        assert_eq!(padded_slice(&[1, 2, 3], &Word::max(), 2), vec![0, 0]);
    }
}
