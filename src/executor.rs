use serde::Serialize;
use thiserror::Error;

use crate::{
    common::{Hex, address::Address, word::Word},
    gas::{self, Gas},
    interpreter::{Action, CallRequest, Context, CreateRequest, Frame, FrameKind, Halt, Log},
    opcodes::get_opcode,
    precompiles::PrecompileError,
    state::{Loader, State},
    tracer::{EventTracer, NoopTracer, Step},
};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Call depth limit reached")]
    CallDepthLimitReached,
    #[error("Out of gas")]
    OutOfGas,
    #[error("Invalid jump")]
    InvalidJump,
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    #[error("Undefined opcode: {0:#04x}")]
    UndefinedOpcode(u8),
    #[error("Unallowed opcode from static call: {0:#04x}")]
    StaticCallViolation(u8),
    #[error("Return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("Insufficient balance for transfer")]
    InsufficientBalance,
    #[error("Nonce overflow")]
    NonceOverflow,
    #[error("Address collision")]
    AddressCollision,
    #[error("Init code size exceeded")]
    InitCodeSizeExceeded,
    #[error("Max code size exceeded")]
    MaxCodeSizeExceeded,
    #[error("invalid EF prefix")]
    InvalidCodePrefix,
    #[error("Precompile out of gas")]
    PrecompileOutOfGas,
    #[error("Precompile failed: {0}")]
    Precompile(#[from] PrecompileError),
    #[error("{0}")]
    Eyre(#[from] eyre::ErrReport),
}

pub const CALL_DEPTH_LIMIT: usize = 1024;

/// How a frame ended.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Revert,
    /// Exceptional halt: all gas of the frame is gone.
    Failure(ExecutorError),
}

/// Record of a finished sub-call, reported in the transaction result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerCall {
    pub kind: FrameKind,
    pub from: Address,
    pub to: Address,
    pub value: Word,
    pub gas: u64,
    pub gas_used: u64,
    pub input: Hex,
    pub output: Hex,
    pub success: bool,
    pub depth: usize,
}

#[derive(Debug)]
pub struct FrameResult {
    pub outcome: Outcome,
    pub output: Vec<u8>,
    pub gas: Gas,
    pub logs: Vec<Log>,
    pub created: Vec<Address>,
    pub inner_calls: Vec<InnerCall>,
    /// Deployed contract of a successful CREATE/CREATE2.
    pub address: Option<Address>,
    pub call: InnerCall,
}

impl FrameResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    /// A call or creation that ended before any code ran.
    fn early(call: InnerCall, outcome: Outcome, gas: Gas, output: Vec<u8>) -> Self {
        let success = matches!(outcome, Outcome::Success);
        Self {
            outcome,
            call: InnerCall {
                gas_used: gas.used,
                output: Hex(output.clone()),
                success,
                ..call
            },
            output,
            gas,
            logs: Vec::new(),
            created: Vec::new(),
            inner_calls: Vec::new(),
            address: None,
        }
    }
}

enum Entry {
    Frame(Box<Frame>),
    Done(FrameResult),
}

fn call_record(request: &CallRequest, depth: usize) -> InnerCall {
    InnerCall {
        kind: request.kind,
        from: request.caller,
        to: request.target,
        value: request.value,
        gas: request.gas,
        input: Hex(request.input.clone()),
        depth,
        ..InnerCall::default()
    }
}

fn create_record(request: &CreateRequest, address: Address, depth: usize) -> InnerCall {
    InnerCall {
        kind: request.kind,
        from: request.caller,
        to: address,
        value: request.value,
        gas: request.gas,
        input: Hex(request.init_code.clone()),
        depth,
        ..InnerCall::default()
    }
}

/// Call orchestrator: drives frames on an explicit stack, so nesting depth
/// never translates into native recursion.
pub struct Executor<T: EventTracer> {
    tracer: T,
}

impl Default for Executor<NoopTracer> {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor<NoopTracer> {
    pub fn new() -> Self {
        Self {
            tracer: NoopTracer,
        }
    }
}

impl<T: EventTracer> Executor<T> {
    pub fn with_tracer(tracer: T) -> Self {
        Self { tracer }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut T {
        &mut self.tracer
    }

    pub fn into_tracer(self) -> T {
        self.tracer
    }

    /// Runs a message call as the outermost frame. Only loader failures
    /// surface as `Err`; everything else is reported in the result.
    pub async fn call<L: Loader>(
        &mut self,
        state: &mut State<L>,
        ctx: &Context,
        request: CallRequest,
    ) -> Result<FrameResult, ExecutorError> {
        match self.enter_call(state, ctx, request, 0).await? {
            Entry::Frame(frame) => self.run(state, ctx, frame).await,
            Entry::Done(result) => Ok(result),
        }
    }

    /// Runs contract creation as the outermost frame at `address`. The
    /// sender's nonce is expected to be bumped already.
    pub async fn create<L: Loader>(
        &mut self,
        state: &mut State<L>,
        ctx: &Context,
        request: CreateRequest,
        address: Address,
    ) -> Result<FrameResult, ExecutorError> {
        match self.enter_create(state, request, address, 0).await? {
            Entry::Frame(frame) => self.run(state, ctx, frame).await,
            Entry::Done(result) => Ok(result),
        }
    }

    async fn enter_call<L: Loader>(
        &mut self,
        state: &mut State<L>,
        ctx: &Context,
        request: CallRequest,
        depth: usize,
    ) -> Result<Entry, ExecutorError> {
        let record = call_record(&request, depth);
        if depth > CALL_DEPTH_LIMIT {
            let outcome = Outcome::Failure(ExecutorError::CallDepthLimitReached);
            return Ok(Entry::Done(FrameResult::early(record, outcome, Gas::new(request.gas), vec![])));
        }
        if request.transfer && state.balance(&request.caller).await? < request.value {
            let outcome = Outcome::Failure(ExecutorError::InsufficientBalance);
            return Ok(Entry::Done(FrameResult::early(record, outcome, Gas::new(request.gas), vec![])));
        }

        let snapshot = state.take_snapshot();
        if request.transfer
            && !state
                .transfer(&request.caller, &request.address, request.value)
                .await?
        {
            state.revert(snapshot);
            let outcome = Outcome::Failure(ExecutorError::InsufficientBalance);
            return Ok(Entry::Done(FrameResult::early(record, outcome, Gas::new(request.gas), vec![])));
        }

        if let Some(cost) = ctx.config.precompiles.gas_cost(&request.target, &request.input) {
            let mut gas = Gas::new(request.gas);
            let (outcome, output) = match gas.charge(cost) {
                Err(_) => (Outcome::Failure(ExecutorError::PrecompileOutOfGas), vec![]),
                Ok(()) => match ctx.config.precompiles.execute(&request.target, &request.input) {
                    Ok(output) => (Outcome::Success, output),
                    Err(e) => (Outcome::Failure(e.into()), vec![]),
                },
            };
            if matches!(outcome, Outcome::Success) {
                state.commit(snapshot);
            } else {
                state.revert(snapshot);
                gas.consume_all();
            }
            tracing::debug!("precompile {} cost={cost} outcome={outcome:?}", request.target);
            return Ok(Entry::Done(FrameResult::early(record, outcome, gas, output)));
        }

        if request.code.is_empty() {
            state.commit(snapshot);
            return Ok(Entry::Done(FrameResult::early(
                record,
                Outcome::Success,
                Gas::new(request.gas),
                vec![],
            )));
        }

        tracing::debug!(
            "enter {:?} {} -> {} depth={depth} gas={}",
            request.kind,
            request.caller,
            request.target,
            request.gas
        );
        Ok(Entry::Frame(Box::new(Frame::for_call(request, depth, snapshot))))
    }

    /// CREATE/CREATE2 from inside a frame: checks depth and balance, bumps
    /// the creator's nonce and derives the new address.
    async fn spawn_create<L: Loader>(
        &mut self,
        state: &mut State<L>,
        request: CreateRequest,
        depth: usize,
    ) -> Result<Entry, ExecutorError> {
        let early = |request: &CreateRequest, error: ExecutorError| {
            let record = create_record(request, Address::zero(), depth);
            Entry::Done(FrameResult::early(
                record,
                Outcome::Failure(error),
                Gas::new(request.gas),
                vec![],
            ))
        };
        if depth > CALL_DEPTH_LIMIT {
            return Ok(early(&request, ExecutorError::CallDepthLimitReached));
        }
        if state.balance(&request.caller).await? < request.value {
            return Ok(early(&request, ExecutorError::InsufficientBalance));
        }
        let nonce = state.nonce(&request.caller).await?;
        if !state.increment_nonce(&request.caller).await? {
            return Ok(early(&request, ExecutorError::NonceOverflow));
        }

        let address = match &request.salt {
            Some(salt) => request.caller.create2(salt, &request.init_code),
            None => request.caller.create(nonce),
        };
        self.enter_create(state, request, address, depth).await
    }

    async fn enter_create<L: Loader>(
        &mut self,
        state: &mut State<L>,
        request: CreateRequest,
        address: Address,
        depth: usize,
    ) -> Result<Entry, ExecutorError> {
        state.warm_address(&address);
        let account = state.account(&address).await?;
        if account.nonce != 0 || !account.code.is_empty() || state.has_storage(&address).await? {
            let mut gas = Gas::new(request.gas);
            gas.consume_all();
            let record = create_record(&request, address, depth);
            let outcome = Outcome::Failure(ExecutorError::AddressCollision);
            return Ok(Entry::Done(FrameResult::early(record, outcome, gas, vec![])));
        }

        let snapshot = state.take_snapshot();
        state.mark_created(&address);
        state.set_nonce(&address, 1).await?;
        if !state
            .transfer(&request.caller, &address, request.value)
            .await?
        {
            state.revert(snapshot);
            let record = create_record(&request, address, depth);
            let outcome = Outcome::Failure(ExecutorError::InsufficientBalance);
            return Ok(Entry::Done(FrameResult::early(record, outcome, Gas::new(request.gas), vec![])));
        }

        tracing::debug!(
            "enter {:?} {} -> {address} depth={depth} gas={}",
            request.kind,
            request.caller,
            request.gas
        );
        Ok(Entry::Frame(Box::new(Frame::for_create(
            request, address, depth, snapshot,
        ))))
    }

    async fn run<L: Loader>(
        &mut self,
        state: &mut State<L>,
        ctx: &Context,
        root: Box<Frame>,
    ) -> Result<FrameResult, ExecutorError> {
        let mut frames = vec![root];
        while let Some(frame) = frames.last_mut() {
            let step = if self.tracer.is_enabled() {
                self.capture(frame)
            } else {
                None
            };
            let action = frame.step(state, ctx).await;
            if let Some(step) = step {
                self.record(step, frame, &action);
            }

            let halt = match action {
                Ok(Action::Continue) => continue,
                Ok(Action::Call(request)) => {
                    let region = request.output;
                    let depth = frame.depth + 1;
                    match self.enter_call(state, ctx, request, depth).await? {
                        Entry::Frame(child) => frames.push(child),
                        Entry::Done(result) => resume(frame, result, region)?,
                    }
                    continue;
                }
                Ok(Action::Create(request)) => {
                    let depth = frame.depth + 1;
                    match self.spawn_create(state, request, depth).await? {
                        Entry::Frame(child) => frames.push(child),
                        Entry::Done(result) => resume(frame, result, (0, 0))?,
                    }
                    continue;
                }
                Ok(Action::Halt(halt)) => Ok(halt),
                Err(ExecutorError::Eyre(e)) => return Err(ExecutorError::Eyre(e)),
                Err(e) => Err(e),
            };

            let Some(frame) = frames.pop() else {
                break;
            };
            let region = frame.output;
            let result = self.finish(state, *frame, halt).await?;
            match frames.last_mut() {
                Some(parent) => resume(parent, result, region)?,
                None => return Ok(result),
            }
        }
        Err(eyre::eyre!("frame stack drained without a result").into())
    }

    /// Settles a halted frame: deploys code for creations, then commits or
    /// reverts its snapshot.
    async fn finish<L: Loader>(
        &mut self,
        state: &mut State<L>,
        mut frame: Frame,
        halt: Result<Halt, ExecutorError>,
    ) -> Result<FrameResult, ExecutorError> {
        let (mut outcome, mut output) = match halt {
            Ok(Halt::Stop) | Ok(Halt::SelfDestruct) => (Outcome::Success, vec![]),
            Ok(Halt::Return(output)) => (Outcome::Success, output),
            Ok(Halt::Revert(output)) => (Outcome::Revert, output),
            Err(e) => (Outcome::Failure(e), vec![]),
        };

        let mut address = None;
        if frame.kind.is_create() && matches!(outcome, Outcome::Success) {
            let code = std::mem::take(&mut output);
            match deposit(&mut frame.gas, &code) {
                Ok(()) => {
                    state.set_code(&frame.address, code).await?;
                    address = Some(frame.address);
                }
                Err(e) => outcome = Outcome::Failure(e),
            }
        }

        match &outcome {
            Outcome::Success => state.commit(frame.snapshot),
            Outcome::Revert => state.revert(frame.snapshot),
            Outcome::Failure(_) => {
                state.revert(frame.snapshot);
                frame.gas.consume_all();
            }
        }
        let success = matches!(outcome, Outcome::Success);
        if !success {
            frame.gas.refund = 0;
            frame.logs.clear();
            frame.created.clear();
            frame.inner_calls.clear();
        }

        tracing::debug!(
            "exit {:?} {} depth={} outcome={outcome:?} gas_used={}",
            frame.kind,
            frame.address,
            frame.depth,
            frame.gas.used
        );

        let call = InnerCall {
            kind: frame.kind,
            from: frame.caller,
            to: match frame.kind {
                FrameKind::CallCode | FrameKind::DelegateCall => frame.code_address,
                _ => frame.address,
            },
            value: frame.value,
            gas: frame.gas.limit,
            gas_used: frame.gas.used,
            input: Hex(if frame.kind.is_create() {
                std::mem::take(&mut frame.code.code)
            } else {
                std::mem::take(&mut frame.input)
            }),
            output: Hex(output.clone()),
            success,
            depth: frame.depth,
        };
        Ok(FrameResult {
            outcome,
            output,
            gas: frame.gas,
            logs: frame.logs,
            created: frame.created,
            inner_calls: frame.inner_calls,
            address,
            call,
        })
    }

    fn capture(&self, frame: &Frame) -> Option<Step> {
        let (pc, opcode) = frame.current_opcode()?;
        let top = |n: usize| frame.stack.peek(n).ok().copied();
        let storage = match opcode {
            0x54 => top(0).map(|key| (key, Word::zero())),
            0x55 => top(0).zip(top(1)),
            _ => None,
        };
        Some(Step {
            pc,
            opcode,
            name: get_opcode(opcode).name(),
            gas: frame.gas.remaining(),
            gas_cost: 0,
            depth: frame.depth,
            refund: frame.gas.refund,
            stack: frame.stack.as_slice().to_vec(),
            memory: self
                .tracer
                .with_memory()
                .then(|| Hex(frame.memory.as_slice().to_vec())),
            storage,
            error: None,
        })
    }

    fn record(&mut self, mut step: Step, frame: &Frame, action: &Result<Action, ExecutorError>) {
        step.gas_cost = step.gas.saturating_sub(frame.gas.remaining());
        match action {
            Ok(Action::Continue) if step.opcode == 0x54 => {
                if let (Some((key, _)), Some(value)) = (step.storage, frame.stack.peek(0).ok()) {
                    step.storage = Some((key, *value));
                }
            }
            Err(e) => step.error = Some(e.to_string()),
            _ => (),
        }
        self.tracer.add(step);
    }
}

/// EIP-170 / EIP-3541 checks and the per-byte deposit charge.
fn deposit(gas: &mut Gas, code: &[u8]) -> Result<(), ExecutorError> {
    if code.len() > gas::MAX_CODE_SIZE {
        return Err(ExecutorError::MaxCodeSizeExceeded);
    }
    if code.first() == Some(&0xef) {
        return Err(ExecutorError::InvalidCodePrefix);
    }
    gas.charge(gas::code_deposit_cost(code.len()))
}

/// Hands a finished child back to its parent: returns unused gas, merges
/// what the child accumulated and pushes the status word.
fn resume(parent: &mut Frame, result: FrameResult, region: (usize, usize)) -> Result<(), ExecutorError> {
    parent.gas.reclaim(result.gas.remaining());

    let success = result.is_success();
    let is_create = result.call.kind.is_create();
    parent.inner_calls.push(result.call);
    if success {
        parent.gas.refund += result.gas.refund;
        parent.logs.extend(result.logs);
        if let Some(address) = result.address {
            parent.created.push(address);
        }
        parent.created.extend(result.created);
        parent.inner_calls.extend(result.inner_calls);
    }

    let status = if is_create {
        parent.return_data = match result.outcome {
            Outcome::Revert => result.output,
            _ => Vec::new(),
        };
        result
            .address
            .filter(|_| success)
            .map(|address| address.as_word())
            .unwrap_or_default()
    } else {
        let (offset, len) = region;
        let n = len.min(result.output.len());
        parent.memory.write(offset, n, &result.output[..n]);
        parent.return_data = result.output;
        Word::from(success)
    };
    parent.stack.push(status)
}
