pub mod common;
pub mod config;
pub mod decoder;
pub mod executor;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcodes;
pub mod precompiles;
pub mod stack;
pub mod state;
pub mod tracer;
pub mod transaction;

pub use executor::{Executor, ExecutorError};
pub use state::{Loader, MemoryLoader, State};
pub use transaction::{TransactionExecutor, TxResult};
