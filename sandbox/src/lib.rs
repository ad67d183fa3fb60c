//! Sandboxed code execution: framed transport, runner protocol, executor
//! lifecycle, and a pool of warm executors.

pub mod executor;
pub mod pool;
pub mod process;
pub mod runner;
pub mod transport;

pub use executor::{ExecutorError, QueryHandler, SandboxExecutor, SandboxSettings};
pub use pool::{ExecutorPool, PoolError};
pub use process::{ChildGuard, KillOutcome, set_new_session, try_kill_process_group};
pub use runner::{CodeEvaluator, Command, EchoEvaluator, LlmQuery, Reply, handle_command, parse_command};
pub use transport::{Frame, FramedReader, TransportError};
