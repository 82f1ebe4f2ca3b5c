//! Program transfer
//!
//! Upload writes a program into memory in chunks. The first two bytes
//! (status and state count) are held back until the final chunk arrives,
//! so a partly written program can never be mistaken for a runnable one.
//! Download reads the stored program back in fixed-size chunks.

use homenode_hal::{MemoryError, ProgramMemory};

use crate::interpreter::program::{
    program_length, program_sum, ProgramError, STATUS_ADDR, STATUS_DISABLED, STATUS_ENABLED,
};
use crate::transport::ChannelId;

/// Bytes of program data per downloaded chunk
pub const CHUNK_SIZE: usize = 24;

/// Bytes in a chunk body ahead of the data: address and count
pub const CHUNK_HEADER_LEN: usize = 3;

/// Smallest accepted upload
pub const MIN_PROGRAM_LEN: u16 = 3;

const HELD_LEN: u16 = 2;

/// Transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// Chunk received with no upload in progress
    NotStarted,
    /// Announced total is outside `MIN_PROGRAM_LEN..=memory size`
    InvalidLength,
    /// Chunk is empty or extends past the announced total
    OutOfRange,
    /// Completed program failed validation; it stays disabled
    InvalidProgram,
    /// Program memory failure
    Memory(MemoryError),
}

impl From<MemoryError> for TransferError {
    fn from(e: MemoryError) -> Self {
        TransferError::Memory(e)
    }
}

impl From<ProgramError> for TransferError {
    fn from(e: ProgramError) -> Self {
        match e {
            ProgramError::Memory(e) => TransferError::Memory(e),
            _ => TransferError::InvalidProgram,
        }
    }
}

/// Result of storing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChunkOutcome {
    /// More chunks expected
    Stored,
    /// Final chunk stored and the program enabled
    Complete,
}

#[derive(Debug, Clone, Copy)]
struct Upload {
    total: u16,
    source: ChannelId,
    held: [u8; HELD_LEN as usize],
}

/// Upload state
#[derive(Debug, Clone, Default)]
pub struct ProgramTransfer {
    upload: Option<Upload>,
}

impl ProgramTransfer {
    pub const fn new() -> Self {
        Self { upload: None }
    }

    /// Whether an upload is in progress
    pub fn is_active(&self) -> bool {
        self.upload.is_some()
    }

    /// Channel the current upload arrives on
    pub fn source(&self) -> Option<ChannelId> {
        self.upload.map(|upload| upload.source)
    }

    /// Start an upload of `total` bytes arriving on `source`
    ///
    /// Marks the stored program disabled immediately. The caller stops the
    /// interpreter.
    pub fn begin<M: ProgramMemory + ?Sized>(
        &mut self,
        memory: &mut M,
        total: u16,
        source: ChannelId,
    ) -> Result<(), TransferError> {
        if total < MIN_PROGRAM_LEN || total > memory.size() {
            return Err(TransferError::InvalidLength);
        }
        self.upload = None;
        memory.write(STATUS_ADDR, &[STATUS_DISABLED, 0])?;
        self.upload = Some(Upload {
            total,
            source,
            held: [STATUS_DISABLED, 0],
        });
        Ok(())
    }

    /// Abandon an upload, leaving the program disabled
    pub fn abort(&mut self) {
        self.upload = None;
    }

    /// Abandon the upload if it arrives on `channel`; returns true if one
    /// was dropped
    pub fn abort_from(&mut self, channel: ChannelId) -> bool {
        if self.source() == Some(channel) {
            self.abort();
            true
        } else {
            false
        }
    }

    /// Store one chunk
    ///
    /// The chunk ending exactly at the announced total completes the
    /// upload: the held header is written, the program validated and, if
    /// its length matches, enabled.
    pub fn write_chunk<M: ProgramMemory + ?Sized>(
        &mut self,
        memory: &mut M,
        addr: u16,
        data: &[u8],
    ) -> Result<ChunkOutcome, TransferError> {
        let upload = self.upload.as_mut().ok_or(TransferError::NotStarted)?;
        let len = u16::try_from(data.len()).map_err(|_| TransferError::OutOfRange)?;
        let end = addr
            .checked_add(len)
            .filter(|&end| len > 0 && end <= upload.total)
            .ok_or(TransferError::OutOfRange)?;

        let split = usize::from(HELD_LEN.saturating_sub(addr)).min(data.len());
        for (i, &byte) in data[..split].iter().enumerate() {
            upload.held[usize::from(addr) + i] = byte;
        }
        if split < data.len() {
            memory.write(addr.max(HELD_LEN), &data[split..])?;
        }

        if end < upload.total {
            return Ok(ChunkOutcome::Stored);
        }

        let Upload { total, held, .. } = *upload;
        self.upload = None;
        memory.write(STATUS_ADDR + 1, &held[1..])?;
        if program_length(memory) != total {
            return Err(TransferError::InvalidProgram);
        }
        memory.write(STATUS_ADDR, &[STATUS_ENABLED])?;
        Ok(ChunkOutcome::Complete)
    }
}

/// Number of download chunks for the stored program
pub fn chunk_count<M: ProgramMemory + ?Sized>(memory: &M) -> u16 {
    program_length(memory).div_ceil(CHUNK_SIZE as u16)
}

/// Build the body of download chunk `index`: `[addr_hi, addr_lo, n, data[n]]`
///
/// Returns `None` past the end of the stored program.
pub fn read_chunk<M: ProgramMemory + ?Sized>(
    memory: &M,
    index: u8,
    out: &mut [u8],
) -> Result<Option<usize>, TransferError> {
    let length = program_length(memory);
    let addr = u16::from(index) * CHUNK_SIZE as u16;
    if addr >= length {
        return Ok(None);
    }
    let n = usize::from(length - addr).min(CHUNK_SIZE);
    let body_len = CHUNK_HEADER_LEN + n;
    if out.len() < body_len {
        return Err(TransferError::OutOfRange);
    }
    out[..2].copy_from_slice(&addr.to_be_bytes());
    out[2] = n as u8;
    memory.read(addr, &mut out[CHUNK_HEADER_LEN..body_len])?;
    Ok(Some(body_len))
}

/// Consistency body: `[len_hi, len_lo, additive sum]` of the stored program
pub fn consistency<M: ProgramMemory + ?Sized>(memory: &M) -> Result<[u8; 3], TransferError> {
    let length = program_length(memory);
    let sum = program_sum(memory, length)?;
    let [hi, lo] = length.to_be_bytes();
    Ok([hi, lo, sum])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::program::is_enabled;
    use crate::interpreter::{ProgramBuilder, ALWAYS};
    use homenode_hal::RamProgramMemory;
    use homenode_protocol::additive;

    /// 39 LED actions and one display message: exactly 300 bytes
    fn program_300() -> std::vec::Vec<u8> {
        let mut b = ProgramBuilder::new();
        let mut refs = std::vec::Vec::new();
        for i in 0..39u8 {
            refs.push(b.action(0x20 + (i % 32), &[i, 0, 0]).unwrap());
        }
        refs.push(b.action(0x40, b"\x01hello").unwrap());
        b.state().unwrap();
        b.evaluation(ALWAYS, &refs).unwrap();
        let mut image = [0u8; 512];
        let len = b.build(&mut image).unwrap();
        image[..len].to_vec()
    }

    /// Largest data run a peer fits in one chunk message
    const UPLOAD_CHUNK: usize = 25;

    fn upload(
        memory: &mut RamProgramMemory<1024>,
        program: &[u8],
    ) -> Result<ChunkOutcome, TransferError> {
        let mut transfer = ProgramTransfer::new();
        transfer.begin(memory, program.len() as u16, ChannelId::Usb)?;
        let mut outcome = ChunkOutcome::Stored;
        for (i, chunk) in program.chunks(UPLOAD_CHUNK).enumerate() {
            outcome = transfer.write_chunk(memory, (i * UPLOAD_CHUNK) as u16, chunk)?;
            if outcome == ChunkOutcome::Stored {
                assert!(!is_enabled(memory).unwrap());
            }
        }
        Ok(outcome)
    }

    #[test]
    fn test_upload_300_bytes() {
        let program = program_300();
        assert_eq!(program.len(), 300);

        let mut memory = RamProgramMemory::<1024>::new();
        assert_eq!(upload(&mut memory, &program), Ok(ChunkOutcome::Complete));
        assert!(is_enabled(&memory).unwrap());
        assert_eq!(&memory.as_bytes()[..300], &program[..]);

        let [hi, lo, sum] = consistency(&memory).unwrap();
        assert_eq!(u16::from_be_bytes([hi, lo]), 300);
        assert_eq!(sum, additive(&program));
    }

    #[test]
    fn test_program_disabled_during_upload() {
        let program = program_300();
        let mut memory = RamProgramMemory::<1024>::new();
        upload(&mut memory, &program).unwrap();

        let mut transfer = ProgramTransfer::new();
        transfer.begin(&mut memory, 300, ChannelId::Usb).unwrap();
        assert!(!is_enabled(&memory).unwrap());

        // header chunk held back
        transfer.write_chunk(&mut memory, 0, &program[..24]).unwrap();
        assert_eq!(memory.read_u8(0).unwrap(), STATUS_DISABLED);
        assert_eq!(memory.read_u8(1).unwrap(), 0);
        assert_eq!(memory.read_u8(2).unwrap(), program[2]);
        assert!(transfer.is_active());
    }

    #[test]
    fn test_out_of_order_chunks() {
        let program = program_300();
        let mut memory = RamProgramMemory::<1024>::new();
        let mut transfer = ProgramTransfer::new();
        transfer.begin(&mut memory, 300, ChannelId::Usb).unwrap();

        let chunks: std::vec::Vec<_> = program.chunks(UPLOAD_CHUNK).enumerate().collect();
        let (last, rest) = chunks.split_last().unwrap();
        for (i, chunk) in rest.iter().rev() {
            let outcome = transfer
                .write_chunk(&mut memory, (*i * UPLOAD_CHUNK) as u16, chunk)
                .unwrap();
            assert_eq!(outcome, ChunkOutcome::Stored);
        }
        let outcome = transfer
            .write_chunk(&mut memory, (last.0 * UPLOAD_CHUNK) as u16, last.1)
            .unwrap();
        assert_eq!(outcome, ChunkOutcome::Complete);
        assert!(is_enabled(&memory).unwrap());
    }

    #[test]
    fn test_begin_rejects_bad_totals() {
        let mut memory = RamProgramMemory::<64>::new();
        let mut transfer = ProgramTransfer::new();
        assert_eq!(
            transfer.begin(&mut memory, 2, ChannelId::Usb),
            Err(TransferError::InvalidLength)
        );
        assert_eq!(
            transfer.begin(&mut memory, 65, ChannelId::Usb),
            Err(TransferError::InvalidLength)
        );
        assert!(transfer.begin(&mut memory, 64, ChannelId::Usb).is_ok());
    }

    #[test]
    fn test_abort_only_from_source_channel() {
        let mut memory = RamProgramMemory::<64>::new();
        let mut transfer = ProgramTransfer::new();
        assert!(!transfer.abort_from(ChannelId::Bluetooth));

        transfer.begin(&mut memory, 10, ChannelId::Bluetooth).unwrap();
        assert_eq!(transfer.source(), Some(ChannelId::Bluetooth));
        assert!(!transfer.abort_from(ChannelId::Usb));
        assert!(transfer.is_active());

        assert!(transfer.abort_from(ChannelId::Bluetooth));
        assert!(!transfer.is_active());
        assert_eq!(memory.read_u8(STATUS_ADDR).unwrap(), STATUS_DISABLED);
        assert_eq!(
            transfer.write_chunk(&mut memory, 0, &[1]),
            Err(TransferError::NotStarted)
        );
    }

    #[test]
    fn test_chunk_outside_total() {
        let mut memory = RamProgramMemory::<64>::new();
        let mut transfer = ProgramTransfer::new();
        assert_eq!(
            transfer.write_chunk(&mut memory, 0, &[1]),
            Err(TransferError::NotStarted)
        );
        transfer.begin(&mut memory, 10, ChannelId::Usb).unwrap();
        assert_eq!(
            transfer.write_chunk(&mut memory, 8, &[1, 2, 3]),
            Err(TransferError::OutOfRange)
        );
        assert_eq!(
            transfer.write_chunk(&mut memory, 0xFFFF, &[1, 2]),
            Err(TransferError::OutOfRange)
        );
        assert_eq!(
            transfer.write_chunk(&mut memory, 4, &[]),
            Err(TransferError::OutOfRange)
        );
        assert!(transfer.is_active());
    }

    #[test]
    fn test_inconsistent_program_stays_disabled() {
        let mut program = program_300();
        // action table offset points past the program
        program[4] = 0x03;
        let mut memory = RamProgramMemory::<1024>::new();
        assert_eq!(upload(&mut memory, &program), Err(TransferError::InvalidProgram));
        assert!(!is_enabled(&memory).unwrap());
    }

    #[test]
    fn test_download_chunks() {
        let program = program_300();
        let mut memory = RamProgramMemory::<1024>::new();
        memory.load(&program);
        assert_eq!(chunk_count(&memory), 13);

        let mut out = [0u8; 32];
        let len = read_chunk(&memory, 0, &mut out).unwrap().unwrap();
        assert_eq!(len, CHUNK_HEADER_LEN + CHUNK_SIZE);
        assert_eq!(&out[..3], &[0, 0, 24]);
        assert_eq!(&out[3..len], &program[..24]);

        let len = read_chunk(&memory, 12, &mut out).unwrap().unwrap();
        assert_eq!(&out[..3], &[0x01, 0x20, 12]);
        assert_eq!(&out[3..len], &program[288..]);

        assert_eq!(read_chunk(&memory, 13, &mut out), Ok(None));
    }

    #[test]
    fn test_no_program_has_empty_consistency() {
        let memory = RamProgramMemory::<64>::new();
        assert_eq!(consistency(&memory), Ok([0, 0, 0]));
        assert_eq!(chunk_count(&memory), 0);
    }
}
