//! Bytecode state-machine interpreter
//!
//! Programs are uploaded by the peer and stored in program memory. See
//! [`program`] for the byte layout and [`machine`] for execution rules.

pub mod builder;
pub mod device;
pub mod machine;
pub mod program;

pub use builder::{ActionId, BuildError, ProgramBuilder, ALWAYS};
pub use device::Device;
pub use machine::{
    ActionSink, CheckOutcome, Interpreter, InterpreterError, InterpreterState, MAX_GOTO_DEPTH,
};
pub use program::{
    is_enabled, program_length, program_sum, Layout, ProgramError, PORT_SIZE, STATUS_DISABLED,
    STATUS_ENABLED,
};
