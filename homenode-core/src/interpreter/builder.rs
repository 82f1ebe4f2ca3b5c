//! Program builder
//!
//! Lays out states, evaluations and the action table and computes every
//! absolute offset, so callers never hand-assemble program bytes.
//!
//! ```
//! use homenode_core::interpreter::{ProgramBuilder, ALWAYS};
//!
//! let mut builder = ProgramBuilder::new();
//! let lamp_on = builder.action(0x80 | 0x03, &[1]).unwrap();
//! builder.state().unwrap();
//! builder.evaluation(ALWAYS, &[lamp_on]).unwrap();
//!
//! let mut image = [0u8; 64];
//! let len = builder.build(&mut image).unwrap();
//! assert_eq!(len, builder.len());
//! ```

use heapless::Vec;

use super::program::{MAX_ACTION_VALUE, PORT_SIZE, STATE_TABLE_ADDR, STATUS_ENABLED};

/// Maximum states a builder holds
pub const MAX_STATES: usize = 32;

/// Maximum evaluations across all states
pub const MAX_EVALUATIONS: usize = 64;

/// Maximum actions in the table
pub const MAX_ACTIONS: usize = 64;

/// Maximum action references across all evaluations
pub const MAX_REFS: usize = 128;

const MAX_VALUE_BYTES: usize = 512;

/// Condition that matches any input
pub const ALWAYS: [(u8, u8); PORT_SIZE] = [(0, 0); PORT_SIZE];

/// Errors while building a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildError {
    /// Builder capacity exceeded
    Full,
    /// Action value longer than the interpreter accepts
    ValueTooLong,
    /// Evaluation added before any state
    NoState,
    /// Reference to an action the builder does not hold
    UnknownAction,
    /// Program does not fit the output buffer or the address space
    TooLarge,
}

/// Handle to an action in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(u8);

#[derive(Debug, Clone, Copy)]
struct ActionEntry {
    device: u8,
    value_start: u16,
    value_len: u8,
}

#[derive(Debug, Clone, Copy)]
struct EvaluationEntry {
    conditions: [(u8, u8); PORT_SIZE],
    refs_start: u8,
    refs_len: u8,
}

#[derive(Debug, Clone, Copy)]
struct StateEntry {
    evaluations_start: u8,
    evaluations_len: u8,
}

/// Incremental program builder
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    actions: Vec<ActionEntry, MAX_ACTIONS>,
    values: Vec<u8, MAX_VALUE_BYTES>,
    evaluations: Vec<EvaluationEntry, MAX_EVALUATIONS>,
    refs: Vec<ActionId, MAX_REFS>,
    states: Vec<StateEntry, MAX_STATES>,
}

impl ProgramBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action to the table
    ///
    /// `device` is the raw device byte, entry flag included.
    pub fn action(&mut self, device: u8, value: &[u8]) -> Result<ActionId, BuildError> {
        if value.len() > MAX_ACTION_VALUE {
            return Err(BuildError::ValueTooLong);
        }
        let id = ActionId(self.actions.len() as u8);
        let value_start = self.values.len() as u16;
        self.values
            .extend_from_slice(value)
            .map_err(|_| BuildError::Full)?;
        self.actions
            .push(ActionEntry {
                device,
                value_start,
                value_len: value.len() as u8,
            })
            .map_err(|_| BuildError::Full)?;
        Ok(id)
    }

    /// Start a new state, returning its id
    pub fn state(&mut self) -> Result<u8, BuildError> {
        let id = self.states.len() as u8;
        self.states
            .push(StateEntry {
                evaluations_start: self.evaluations.len() as u8,
                evaluations_len: 0,
            })
            .map_err(|_| BuildError::Full)?;
        Ok(id)
    }

    /// Add an evaluation to the most recent state
    ///
    /// `conditions` holds one `(value, mask)` pair per input byte.
    pub fn evaluation(
        &mut self,
        conditions: [(u8, u8); PORT_SIZE],
        actions: &[ActionId],
    ) -> Result<(), BuildError> {
        if self.states.is_empty() {
            return Err(BuildError::NoState);
        }
        if actions
            .iter()
            .any(|a| usize::from(a.0) >= self.actions.len())
        {
            return Err(BuildError::UnknownAction);
        }
        let refs_start = self.refs.len() as u8;
        self.refs
            .extend_from_slice(actions)
            .map_err(|_| BuildError::Full)?;
        self.evaluations
            .push(EvaluationEntry {
                conditions,
                refs_start,
                refs_len: actions.len() as u8,
            })
            .map_err(|_| BuildError::Full)?;
        let state = self.states.last_mut().ok_or(BuildError::NoState)?;
        state.evaluations_len += 1;
        Ok(())
    }

    fn header_len(&self) -> usize {
        usize::from(STATE_TABLE_ADDR) + 2 * self.states.len() + 2
    }

    fn state_len(&self, state: &StateEntry) -> usize {
        let start = usize::from(state.evaluations_start);
        let end = start + usize::from(state.evaluations_len);
        1 + self.evaluations[start..end]
            .iter()
            .map(|e| 2 * PORT_SIZE + 1 + 2 * usize::from(e.refs_len))
            .sum::<usize>()
    }

    fn action_table_offset(&self) -> usize {
        self.header_len() + self.states.iter().map(|s| self.state_len(s)).sum::<usize>()
    }

    fn action_offset(&self, id: ActionId) -> usize {
        self.action_table_offset()
            + 1
            + self.actions[..usize::from(id.0)]
                .iter()
                .map(|a| 2 + usize::from(a.value_len))
                .sum::<usize>()
    }

    /// Total program length in bytes
    pub fn len(&self) -> usize {
        self.action_offset(ActionId(self.actions.len() as u8))
    }

    /// Whether no state has been added
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Write the program (status `ENABLED`) into `out`
    pub fn build(&self, out: &mut [u8]) -> Result<usize, BuildError> {
        let len = self.len();
        if len > out.len() || len > usize::from(u16::MAX) {
            return Err(BuildError::TooLarge);
        }

        out[0] = STATUS_ENABLED;
        out[1] = self.states.len() as u8;

        let mut pos = usize::from(STATE_TABLE_ADDR);
        let mut state_offset = self.header_len();
        for state in &self.states {
            put_u16(out, pos, state_offset);
            pos += 2;
            state_offset += self.state_len(state);
        }
        put_u16(out, pos, self.action_table_offset());
        pos += 2;

        for state in &self.states {
            out[pos] = state.evaluations_len;
            pos += 1;
            let start = usize::from(state.evaluations_start);
            let end = start + usize::from(state.evaluations_len);
            for evaluation in &self.evaluations[start..end] {
                for (value, mask) in evaluation.conditions {
                    out[pos] = value;
                    out[pos + 1] = mask;
                    pos += 2;
                }
                out[pos] = evaluation.refs_len;
                pos += 1;
                let refs_start = usize::from(evaluation.refs_start);
                let refs_end = refs_start + usize::from(evaluation.refs_len);
                for &action in &self.refs[refs_start..refs_end] {
                    put_u16(out, pos, self.action_offset(action));
                    pos += 2;
                }
            }
        }

        out[pos] = self.actions.len() as u8;
        pos += 1;
        for action in &self.actions {
            out[pos] = action.device;
            out[pos + 1] = action.value_len;
            pos += 2;
            let start = usize::from(action.value_start);
            let end = start + usize::from(action.value_len);
            out[pos..pos + usize::from(action.value_len)].copy_from_slice(&self.values[start..end]);
            pos += usize::from(action.value_len);
        }

        Ok(pos)
    }
}

fn put_u16(out: &mut [u8], pos: usize, value: usize) {
    out[pos..pos + 2].copy_from_slice(&(value as u16).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::program::{program_length, Layout};
    use homenode_hal::RamProgramMemory;

    #[test]
    fn test_exact_bytes() {
        let mut builder = ProgramBuilder::new();
        let a = builder.action(0x7E, &[1]).unwrap();
        builder.state().unwrap();
        builder.evaluation([(1, 1), (0, 0), (0, 0), (0, 0)], &[a]).unwrap();
        builder.state().unwrap();

        let mut out = [0u8; 64];
        let len = builder.build(&mut out).unwrap();
        assert_eq!(
            &out[..len],
            &[
                STATUS_ENABLED, 2, // status, states
                0x00, 0x08, 0x00, 0x14, // state offsets
                0x00, 0x15, // action table
                1, 1, 1, 0, 0, 0, 0, 0, 0, 1, 0x00, 0x16, // state 0
                0,    // state 1
                1, 0x7E, 1, 1, // action table
            ]
        );
    }

    #[test]
    fn test_built_program_validates() {
        let mut builder = ProgramBuilder::new();
        let on = builder.action(0x01, &[1]).unwrap();
        let off = builder.action(0x01, &[0]).unwrap();
        let text = builder.action(0x40, b"\x00hello").unwrap();
        builder.state().unwrap();
        builder.evaluation([(0x01, 0x01), (0, 0), (0, 0), (0, 0)], &[on, text]).unwrap();
        builder.evaluation([(0x00, 0x01), (0, 0), (0, 0), (0, 0)], &[off]).unwrap();

        let mut out = [0u8; 128];
        let len = builder.build(&mut out).unwrap();
        let mut memory = RamProgramMemory::<128>::new();
        memory.load(&out[..len]);
        let layout = Layout::read(&memory).unwrap();
        assert_eq!(usize::from(layout.length), len);
        assert_eq!(usize::from(program_length(&memory)), builder.len());
    }

    #[test]
    fn test_evaluation_needs_state() {
        let mut builder = ProgramBuilder::new();
        assert_eq!(builder.evaluation(ALWAYS, &[]), Err(BuildError::NoState));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let mut builder = ProgramBuilder::new();
        builder.state().unwrap();
        assert_eq!(
            builder.evaluation(ALWAYS, &[ActionId(3)]),
            Err(BuildError::UnknownAction)
        );
    }

    #[test]
    fn test_output_too_small() {
        let mut builder = ProgramBuilder::new();
        builder.state().unwrap();
        let mut out = [0u8; 4];
        assert_eq!(builder.build(&mut out), Err(BuildError::TooLarge));
    }
}
