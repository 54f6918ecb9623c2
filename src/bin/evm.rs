use std::path::PathBuf;

use clap::{Parser, Subcommand};
use evm_core::{
    common::{Hex, address::Address, block::Header, tx::Tx, word::Word},
    config::{Config, Hardfork},
    decoder::{Bytecode, Decoder},
    state::{GenesisAccount, MemoryLoader, State},
    tracer::{EventTracer, StepTracer},
    transaction::TransactionExecutor,
};
use serde_json::json;

// cargo run --bin evm -- run 6001600101
// cargo run --bin evm -- tx --alloc alloc.json --tx tx.json --env env.json

#[derive(Parser)]
#[command(about = "Execute EVM bytecode or transactions against an in-memory state")]
struct Args {
    #[arg(long, env = "EVM_FORK", default_value = "prague")]
    fork: String,

    #[arg(long, env = "EVM_CHAIN_ID", default_value_t = 1)]
    chain_id: u64,

    /// Print every executed step as a JSON line.
    #[arg(long)]
    trace: bool,

    /// Include memory in trace lines.
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run raw bytecode as the code of a single account.
    Run {
        code: String,
        #[arg(long, default_value = "")]
        input: String,
        #[arg(long, default_value_t = 10_000_000)]
        gas: u64,
        #[arg(long, default_value = "0")]
        value: String,
        /// Print the disassembly before running.
        #[arg(long)]
        dump: bool,
    },
    /// Run a JSON transaction against a JSON alloc map and block header.
    Tx {
        #[arg(long)]
        alloc: PathBuf,
        #[arg(long)]
        tx: PathBuf,
        #[arg(long)]
        env: Option<PathBuf>,
    },
}

const SENDER: &str = "f39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const CONTRACT: &str = "e7f1725e7734ce288f8367e1bb143e90bb3f0512";

fn dump(decoded: &Bytecode) {
    println!("{:<6} {:<15} Argument", "PC", "OpCode");
    println!("{}", "─".repeat(40));
    for instruction in &decoded.instructions {
        let pc = format!("{:#06x}", instruction.offset);
        let argument = instruction
            .argument
            .as_ref()
            .map(|arg| format!("0x{}", hex::encode(arg)))
            .unwrap_or_default();
        println!("{pc:<6} {:<15} {argument}", instruction.opcode.name());
    }
    println!();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::new(args.fork.parse::<Hardfork>()?, args.chain_id);
    let tracer = if args.memory {
        StepTracer::with_memory()
    } else {
        StepTracer::new()
    };

    let (loader, header, tx) = match args.command {
        Command::Run {
            code,
            input,
            gas,
            value,
            dump: show,
        } => {
            let code = hex::decode(code.trim_start_matches("0x"))?;
            if show {
                dump(&Decoder::decode(code.clone()));
            }
            let sender = Address::try_from(SENDER)?;
            let contract = Address::try_from(CONTRACT)?;
            let value = Word::from_hex(&value)?;
            let loader = MemoryLoader::new()
                .with_account(sender, GenesisAccount::with_balance(Word::max()))
                .with_account(contract, GenesisAccount::with_code(code));
            let header = Header {
                gas_limit: Word::from(u64::MAX),
                ..Header::default()
            };
            let tx = Tx {
                from: sender,
                to: Some(contract),
                value,
                input: Hex(hex::decode(input.trim_start_matches("0x"))?),
                gas: Word::from(gas),
                gas_price: Some(Word::zero()),
                ..Tx::default()
            };
            (loader, header, tx)
        }
        Command::Tx { alloc, tx, env } => {
            let loader = MemoryLoader::from_json(&std::fs::read_to_string(alloc)?)?;
            let tx: Tx = serde_json::from_str(&std::fs::read_to_string(tx)?)?;
            let header = match env {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => Header {
                    gas_limit: tx.gas,
                    ..Header::default()
                },
            };
            (loader, header, tx)
        }
    };

    let mut state = State::new(loader);
    let mut executor = TransactionExecutor::with_tracer(config, header, tracer);
    let result = executor.execute(&mut state, &tx).await?;

    if args.trace {
        for step in executor.tracer_mut().take() {
            println!("{}", serde_json::to_string(&step)?);
        }
    }
    let output = json!({
        "result": result,
        "changes": state.changes(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
