//! State-machine interpreter
//!
//! Runs the program stored in [`ProgramMemory`]. Each check samples the
//! inputs, evaluates the current state and follows any goto chain within
//! the same check. A goto chain that revisits a state disables the program
//! in memory so it does not run again after a reboot.

use heapless::Vec;
use homenode_hal::ProgramMemory;

use super::device::{fires_on_entry, Device};
use super::program::{
    is_enabled, Cursor, Layout, ProgramError, NO_STATE, PORT_SIZE, STATUS_ADDR, STATUS_DISABLED,
};

/// Longest goto chain followed within one check
pub const MAX_GOTO_DEPTH: usize = 16;

/// Interpreter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterpreterError {
    /// The program is malformed; the interpreter is disabled until restarted
    Program(ProgramError),
    /// A goto chain revisited `state`; the program has been disabled.
    /// `persisted` is false if writing the disabled marker failed.
    LoopDetected { state: u8, persisted: bool },
}

impl From<ProgramError> for InterpreterError {
    fn from(e: ProgramError) -> Self {
        InterpreterError::Program(e)
    }
}

/// Interpreter run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterpreterState {
    /// No enabled program
    Idle,
    /// Program failed validation or execution
    Disabled,
    /// Program running
    Running,
}

/// Result of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CheckOutcome {
    /// Nothing to run
    Inactive,
    /// No goto fired; `state` is stable
    Stable { state: u8 },
    /// Gotos fired; the chain settled in `state` after `hops` transitions
    Moved { state: u8, hops: u8 },
}

/// Receives every action that is not flow control
pub trait ActionSink {
    /// Execute one action
    fn execute(&mut self, device: Device, value: &[u8]);
}

impl<T: ActionSink + ?Sized> ActionSink for &mut T {
    fn execute(&mut self, device: Device, value: &[u8]) {
        (**self).execute(device, value)
    }
}

/// Bytecode state-machine interpreter
#[derive(Debug, Clone)]
pub struct Interpreter {
    state: InterpreterState,
    layout: Option<Layout>,
    current: u8,
    pending: u8,
    baseline: Option<[u8; PORT_SIZE]>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create an idle interpreter
    pub const fn new() -> Self {
        Self {
            state: InterpreterState::Idle,
            layout: None,
            current: NO_STATE,
            pending: NO_STATE,
            baseline: None,
        }
    }

    /// Current run state
    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// Id of the current program state, if running
    pub fn current_state(&self) -> Option<u8> {
        match self.state {
            InterpreterState::Running if self.current != NO_STATE => Some(self.current),
            _ => None,
        }
    }

    /// Validate the stored program and schedule entry into state 0
    ///
    /// A program whose status byte is not enabled leaves the interpreter
    /// idle; a malformed one leaves it disabled.
    pub fn start<M: ProgramMemory + ?Sized>(&mut self, memory: &M) -> Result<(), ProgramError> {
        self.stop();
        if !is_enabled(memory)? {
            return Err(ProgramError::NotEnabled);
        }
        let layout = Layout::read(memory).and_then(|layout| {
            if layout.state_count == 0 {
                Err(ProgramError::NoStates)
            } else {
                Ok(layout)
            }
        });
        match layout {
            Ok(layout) => {
                self.layout = Some(layout);
                self.state = InterpreterState::Running;
                self.pending = 0;
                Ok(())
            }
            Err(e) => {
                self.state = InterpreterState::Disabled;
                Err(e)
            }
        }
    }

    /// Stop running and forget the current state
    pub fn stop(&mut self) {
        *self = Self::new();
    }

    /// Schedule entry into `state` on the next check
    pub fn enter(&mut self, state: u8) {
        if self.state == InterpreterState::Running {
            self.pending = state;
        }
    }

    /// Run one check against the sampled inputs
    pub fn check<M, S>(
        &mut self,
        memory: &mut M,
        inputs: &[u8; PORT_SIZE],
        sink: &mut S,
    ) -> Result<CheckOutcome, InterpreterError>
    where
        M: ProgramMemory + ?Sized,
        S: ActionSink + ?Sized,
    {
        let Some(layout) = self.layout else {
            return Ok(CheckOutcome::Inactive);
        };
        let baseline = self.baseline.unwrap_or(*inputs);

        let mut entering = self.pending != NO_STATE;
        let mut target = core::mem::replace(&mut self.pending, NO_STATE);
        if !entering && self.current == NO_STATE {
            return Ok(CheckOutcome::Inactive);
        }

        let mut path: Vec<u8, MAX_GOTO_DEPTH> = Vec::new();
        loop {
            if entering {
                self.current = target;
            }
            let next = match self.evaluate(&layout, &*memory, inputs, &baseline, entering, sink) {
                Ok(next) => next,
                Err(e) => {
                    self.disable();
                    return Err(e.into());
                }
            };
            let Some(next) = next else {
                break;
            };

            if next == self.current || path.contains(&next) || path.push(self.current).is_err() {
                self.disable();
                let persisted = memory.write(STATUS_ADDR, &[STATUS_DISABLED]).is_ok();
                return Err(InterpreterError::LoopDetected {
                    state: next,
                    persisted,
                });
            }
            target = next;
            entering = true;
        }

        self.baseline = Some(*inputs);
        let state = self.current;
        Ok(match path.len() {
            0 => CheckOutcome::Stable { state },
            hops => CheckOutcome::Moved {
                state,
                hops: hops as u8,
            },
        })
    }

    fn disable(&mut self) {
        *self = Self::new();
        self.state = InterpreterState::Disabled;
    }

    /// Evaluate the current state, returning the first goto target
    fn evaluate<M, S>(
        &mut self,
        layout: &Layout,
        memory: &M,
        inputs: &[u8; PORT_SIZE],
        baseline: &[u8; PORT_SIZE],
        entering: bool,
        sink: &mut S,
    ) -> Result<Option<u8>, ProgramError>
    where
        M: ProgramMemory + ?Sized,
        S: ActionSink + ?Sized,
    {
        let offset = layout.state_offset(memory, self.current)?;
        let mut cursor = Cursor::new(memory, offset, layout.action_table);
        let mut goto = None;

        let evaluations = cursor.u8()?;
        for _ in 0..evaluations {
            let mut matched = true;
            let mut changed = false;
            for port in 0..PORT_SIZE {
                let value = cursor.u8()?;
                let mask = cursor.u8()?;
                if inputs[port] & mask != value & mask {
                    matched = false;
                }
                if (inputs[port] ^ baseline[port]) & mask != 0 {
                    changed = true;
                }
            }

            let refs = cursor.u8()?;
            for _ in 0..refs {
                let action_ref = cursor.u16()?;
                if !matched || !(changed || entering) {
                    continue;
                }
                let action = layout.action(memory, action_ref)?;
                if !changed && !fires_on_entry(action.device) {
                    continue;
                }
                let target = action.value.first().copied().unwrap_or(NO_STATE);
                match Device::from_byte(action.device) {
                    Device::Goto => {
                        if goto.is_none() {
                            goto = Some(target);
                        }
                    }
                    Device::Enter => self.pending = target,
                    device => sink.execute(device, &action.value),
                }
            }
        }

        Ok(goto)
    }
}
