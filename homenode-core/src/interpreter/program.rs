//! Program layout and validation
//!
//! ```text
//! 0        status (ENABLED = 0x5A)
//! 1        state_count
//! 2        state_offset[state_count]   big-endian u16
//! ..       action_table_offset          big-endian u16
//! ..       states: eval_count, then per evaluation
//!              (value, mask) x PORT_SIZE, action_count, action_ref[action_count]
//! table    action_count, then per action: device, length, value[length]
//! ```
//!
//! Every offset in the program is absolute. [`Layout::read`] walks the
//! whole structure once and rejects anything that points outside the
//! memory or into the wrong region, so the interpreter can trust the
//! offsets it follows. Reads during execution are still bounds-checked.

use heapless::Vec;
use homenode_hal::{MemoryError, ProgramMemory};

/// Status byte of a runnable program
pub const STATUS_ENABLED: u8 = 0x5A;

/// Status byte of a stopped program
pub const STATUS_DISABLED: u8 = 0x00;

/// Address of the status byte
pub const STATUS_ADDR: u16 = 0;

/// Address of the state count
pub const STATE_COUNT_ADDR: u16 = 1;

/// Address of the first state offset
pub const STATE_TABLE_ADDR: u16 = 2;

/// Bytes in the input vector
pub const PORT_SIZE: usize = 4;

/// Largest action value
pub const MAX_ACTION_VALUE: usize = 32;

/// Marker for "no state"
pub const NO_STATE: u8 = 0xFF;

/// Program structure errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgramError {
    /// Status byte is not [`STATUS_ENABLED`]
    NotEnabled,
    /// Program has no states
    NoStates,
    /// A read ran past its region
    OutOfBounds,
    /// Action table offset overlaps the header or lies past the memory
    BadActionTable,
    /// State offset outside the state region
    BadStateOffset(u8),
    /// Action reference not on an action boundary
    BadActionRef(u16),
    /// Action value longer than [`MAX_ACTION_VALUE`]
    ActionTooLong,
    /// State id past `state_count`
    NoSuchState(u8),
    /// Underlying memory failure
    Memory(MemoryError),
}

impl From<MemoryError> for ProgramError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::OutOfBounds => ProgramError::OutOfBounds,
            other => ProgramError::Memory(other),
        }
    }
}

/// Bounded forward reader over program memory
pub(crate) struct Cursor<'m, M: ProgramMemory + ?Sized> {
    memory: &'m M,
    pos: u16,
    end: u16,
}

impl<'m, M: ProgramMemory + ?Sized> Cursor<'m, M> {
    pub(crate) fn new(memory: &'m M, pos: u16, end: u16) -> Self {
        Self { memory, pos, end }
    }

    pub(crate) fn pos(&self) -> u16 {
        self.pos
    }

    pub(crate) fn skip(&mut self, n: u16) -> Result<u16, ProgramError> {
        let start = self.pos;
        self.pos = start
            .checked_add(n)
            .filter(|&next| next <= self.end)
            .ok_or(ProgramError::OutOfBounds)?;
        Ok(start)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProgramError> {
        let at = self.skip(1)?;
        Ok(self.memory.read_u8(at)?)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProgramError> {
        let at = self.skip(2)?;
        Ok(self.memory.read_u16(at)?)
    }
}

/// One decoded action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Raw device byte, entry flag included
    pub device: u8,
    /// Value bytes
    pub value: Vec<u8, MAX_ACTION_VALUE>,
}

/// Validated program structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// Number of states
    pub state_count: u8,
    /// Absolute offset of the action table
    pub action_table: u16,
    /// End of the action table, i.e. the program length
    pub length: u16,
}

impl Layout {
    /// Walk and validate the program structure, ignoring the status byte
    pub fn read<M: ProgramMemory + ?Sized>(memory: &M) -> Result<Self, ProgramError> {
        let size = memory.size();
        let state_count = memory.read_u8(STATE_COUNT_ADDR)?;
        let header_end = STATE_TABLE_ADDR + 2 * u16::from(state_count) + 2;
        if header_end > size {
            return Err(ProgramError::OutOfBounds);
        }

        let action_table = memory.read_u16(header_end - 2)?;
        if action_table < header_end || action_table >= size {
            return Err(ProgramError::BadActionTable);
        }

        let mut cursor = Cursor::new(memory, action_table, size);
        let action_count = cursor.u8()?;
        for _ in 0..action_count {
            cursor.u8()?;
            let len = cursor.u8()?;
            if usize::from(len) > MAX_ACTION_VALUE {
                return Err(ProgramError::ActionTooLong);
            }
            cursor.skip(u16::from(len))?;
        }

        let layout = Self {
            state_count,
            action_table,
            length: cursor.pos(),
        };

        for id in 0..state_count {
            let offset = layout.state_offset(memory, id)?;
            let mut cursor = Cursor::new(memory, offset, action_table);
            let evaluations = cursor.u8()?;
            for _ in 0..evaluations {
                cursor.skip(2 * PORT_SIZE as u16)?;
                let refs = cursor.u8()?;
                for _ in 0..refs {
                    let action_ref = cursor.u16()?;
                    if !layout.is_action_boundary(memory, action_ref)? {
                        return Err(ProgramError::BadActionRef(action_ref));
                    }
                }
            }
        }

        Ok(layout)
    }

    fn header_end(&self) -> u16 {
        STATE_TABLE_ADDR + 2 * u16::from(self.state_count) + 2
    }

    /// Absolute offset of a state's evaluation list
    pub fn state_offset<M: ProgramMemory + ?Sized>(
        &self,
        memory: &M,
        id: u8,
    ) -> Result<u16, ProgramError> {
        if id >= self.state_count {
            return Err(ProgramError::NoSuchState(id));
        }
        let offset = memory.read_u16(STATE_TABLE_ADDR + 2 * u16::from(id))?;
        if offset < self.header_end() || offset >= self.action_table {
            return Err(ProgramError::BadStateOffset(id));
        }
        Ok(offset)
    }

    fn is_action_boundary<M: ProgramMemory + ?Sized>(
        &self,
        memory: &M,
        target: u16,
    ) -> Result<bool, ProgramError> {
        let mut cursor = Cursor::new(memory, self.action_table, self.length);
        let count = cursor.u8()?;
        for _ in 0..count {
            let pos = cursor.pos();
            if pos == target {
                return Ok(true);
            }
            if pos > target {
                return Ok(false);
            }
            cursor.u8()?;
            let len = cursor.u8()?;
            cursor.skip(u16::from(len))?;
        }
        Ok(false)
    }

    /// Read the action at an absolute offset inside the action table
    pub fn action<M: ProgramMemory + ?Sized>(
        &self,
        memory: &M,
        offset: u16,
    ) -> Result<Action, ProgramError> {
        if offset <= self.action_table || offset >= self.length {
            return Err(ProgramError::BadActionRef(offset));
        }
        let mut cursor = Cursor::new(memory, offset, self.length);
        let device = cursor.u8()?;
        let len = cursor.u8()?;
        let start = cursor.skip(u16::from(len))?;

        let mut value = Vec::new();
        value
            .resize(usize::from(len), 0)
            .map_err(|_| ProgramError::ActionTooLong)?;
        memory.read(start, &mut value)?;
        Ok(Action { device, value })
    }
}

/// Whether the status byte marks the program runnable
pub fn is_enabled<M: ProgramMemory + ?Sized>(memory: &M) -> Result<bool, ProgramError> {
    Ok(memory.read_u8(STATUS_ADDR)? == STATUS_ENABLED)
}

/// Length of a structurally valid program, or 0
pub fn program_length<M: ProgramMemory + ?Sized>(memory: &M) -> u16 {
    Layout::read(memory).map(|layout| layout.length).unwrap_or(0)
}

/// Additive sum of the first `length` bytes of program memory
pub fn program_sum<M: ProgramMemory + ?Sized>(memory: &M, length: u16) -> Result<u8, ProgramError> {
    let mut sum = 0u8;
    let mut buf = [0u8; 32];
    let mut addr = 0u16;
    while addr < length {
        let n = (length - addr).min(buf.len() as u16);
        let chunk = &mut buf[..usize::from(n)];
        memory.read(addr, chunk)?;
        sum = sum.wrapping_add(homenode_protocol::additive(chunk));
        addr += n;
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::builder::{ProgramBuilder, ALWAYS};
    use homenode_hal::RamProgramMemory;

    fn memory_with(bytes: &[u8]) -> RamProgramMemory<256> {
        let mut memory = RamProgramMemory::new();
        memory.load(bytes);
        memory
    }

    fn sample() -> RamProgramMemory<256> {
        let mut builder = ProgramBuilder::new();
        let on = builder.action(0x00, &[1]).unwrap();
        let led = builder.action(0xA0, &[1, 2, 3]).unwrap();
        builder.state().unwrap();
        builder.evaluation(ALWAYS, &[on, led]).unwrap();
        let mut buf = [0u8; 256];
        let len = builder.build(&mut buf).unwrap();
        memory_with(&buf[..len])
    }

    #[test]
    fn test_layout_of_built_program() {
        let memory = sample();
        let layout = Layout::read(&memory).unwrap();
        assert_eq!(layout.state_count, 1);
        // header 6, state 1 + 8 + 1 + 4 = 14
        assert_eq!(layout.action_table, 20);
        // table 1 + (2 + 1) + (2 + 3)
        assert_eq!(layout.length, 29);
        assert_eq!(program_length(&memory), 29);
        assert!(is_enabled(&memory).unwrap());
    }

    #[test]
    fn test_action_read() {
        let memory = sample();
        let layout = Layout::read(&memory).unwrap();
        let action = layout.action(&memory, 24).unwrap();
        assert_eq!(action.device, 0xA0);
        assert_eq!(&action.value[..], &[1, 2, 3]);
        assert_eq!(layout.action(&memory, 20), Err(ProgramError::BadActionRef(20)));
        assert_eq!(layout.action(&memory, 29), Err(ProgramError::BadActionRef(29)));
    }

    #[test]
    fn test_erased_memory_has_no_program() {
        let memory = RamProgramMemory::<256>::new();
        assert!(!is_enabled(&memory).unwrap());
        // 0xFF states would need a 514-byte header
        assert_eq!(program_length(&memory), 0);
    }

    #[test]
    fn test_action_table_overlapping_header() {
        // one state, action table offset points into the header
        let memory = memory_with(&[STATUS_ENABLED, 1, 0x00, 0x06, 0x00, 0x03, 0x00]);
        assert_eq!(Layout::read(&memory), Err(ProgramError::BadActionTable));
    }

    #[test]
    fn test_state_offset_past_action_table() {
        let memory = memory_with(&[STATUS_ENABLED, 1, 0x00, 0x09, 0x00, 0x06, 0x00, 0x00]);
        assert_eq!(Layout::read(&memory), Err(ProgramError::BadStateOffset(0)));
    }

    #[test]
    fn test_misaligned_action_ref() {
        let mut memory = sample();
        // first ref of the evaluation sits at 6 + 1 + 8 + 1 = 16
        memory.write(16, &[0x00, 0x16]).unwrap();
        assert_eq!(Layout::read(&memory), Err(ProgramError::BadActionRef(0x16)));
        assert_eq!(program_length(&memory), 0);
    }

    #[test]
    fn test_action_table_running_off_memory() {
        let mut memory = RamProgramMemory::<16>::new();
        memory.load(&[STATUS_ENABLED, 0, 0x00, 0x04, 0x01, 0x00, 0x10]);
        assert_eq!(Layout::read(&memory), Err(ProgramError::OutOfBounds));
    }

    #[test]
    fn test_program_sum() {
        let memory = memory_with(&[1, 2, 3, 250]);
        assert_eq!(program_sum(&memory, 3).unwrap(), 6);
        assert_eq!(program_sum(&memory, 4).unwrap(), 0);
        assert_eq!(program_sum(&memory, 0).unwrap(), 0);
    }
}
