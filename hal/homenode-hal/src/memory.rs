//! Byte-addressable program memory
//!
//! The interpreter program lives in memory that survives a reboot (an
//! EEPROM, or a flash-backed RAM image). The control core only sees a flat
//! address space bounded by [`ProgramMemory::size`]; every access outside
//! that bound is an error, never a wrap-around.

/// Errors from program memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryError {
    /// Access extends past the end of the device
    OutOfBounds,
    /// Device refused the write
    WriteFailed,
}

/// Byte-addressable program storage
pub trait ProgramMemory {
    /// Declared size of the address space in bytes
    fn size(&self) -> u16;

    /// Read `buf.len()` bytes starting at `addr`
    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Write `data` starting at `addr`
    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), MemoryError>;

    /// Read a single byte
    fn read_u8(&self, addr: u16) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian `u16`
    fn read_u16(&self, addr: u16) -> Result<u16, MemoryError> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

/// Program memory backed by a RAM image
///
/// Tracks whether the image changed since the last [`take_dirty`] so the
/// owner can persist it.
///
/// [`take_dirty`]: RamProgramMemory::take_dirty
#[derive(Debug, Clone)]
pub struct RamProgramMemory<const N: usize> {
    image: [u8; N],
    dirty: bool,
}

impl<const N: usize> Default for RamProgramMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RamProgramMemory<N> {
    /// Create an erased image (all bytes `0xFF`)
    pub const fn new() -> Self {
        Self {
            image: [0xFF; N],
            dirty: false,
        }
    }

    /// Replace the image contents, e.g. after loading from flash
    ///
    /// Bytes past `data.len()` are left erased. The image is not marked dirty.
    pub fn load(&mut self, data: &[u8]) {
        let len = data.len().min(N);
        self.image[..len].copy_from_slice(&data[..len]);
        self.image[len..].fill(0xFF);
        self.dirty = false;
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    /// Return and clear the dirty flag
    pub fn take_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }

    /// Check if the image changed since the last `take_dirty`
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn range(addr: u16, len: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(MemoryError::OutOfBounds)?;
        if end > N || N > u16::MAX as usize + 1 {
            return Err(MemoryError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl<const N: usize> ProgramMemory for RamProgramMemory<N> {
    fn size(&self) -> u16 {
        N.min(u16::MAX as usize) as u16
    }

    fn read(&self, addr: u16, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = Self::range(addr, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), MemoryError> {
        let range = Self::range(addr, data.len())?;
        if self.image[range.clone()] != *data {
            self.image[range].copy_from_slice(data);
            self.dirty = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_image_is_erased() {
        let mem = RamProgramMemory::<16>::new();
        assert_eq!(mem.read_u8(0), Ok(0xFF));
        assert_eq!(mem.size(), 16);
        assert!(!mem.is_dirty());
    }

    #[test]
    fn test_write_then_read() {
        let mut mem = RamProgramMemory::<16>::new();
        mem.write(4, &[0x12, 0x34]).unwrap();
        assert_eq!(mem.read_u16(4), Ok(0x1234));
        assert!(mem.take_dirty());
        assert!(!mem.is_dirty());
    }

    #[test]
    fn test_identical_write_does_not_dirty() {
        let mut mem = RamProgramMemory::<8>::new();
        mem.write(0, &[0xFF, 0xFF]).unwrap();
        assert!(!mem.is_dirty());
    }

    #[test]
    fn test_out_of_bounds() {
        let mut mem = RamProgramMemory::<8>::new();
        let mut buf = [0u8; 4];
        assert_eq!(mem.read(6, &mut buf), Err(MemoryError::OutOfBounds));
        assert_eq!(mem.write(8, &[1]), Err(MemoryError::OutOfBounds));
        assert_eq!(mem.read_u16(7), Err(MemoryError::OutOfBounds));
        // Zero-length access at the end is fine
        assert_eq!(mem.read(8, &mut []), Ok(()));
    }

    #[test]
    fn test_load_pads_with_erased() {
        let mut mem = RamProgramMemory::<4>::new();
        mem.write(3, &[0]).unwrap();
        mem.load(&[1, 2]);
        assert_eq!(mem.as_bytes(), &[1, 2, 0xFF, 0xFF]);
        assert!(!mem.is_dirty());
    }
}
