//! Rebased stream window over a client database file
//!
//! Every region offset in a client database file is relative to the end of
//! the version header, so the window is rebased once after the header is
//! parsed and all later seeks use window-relative positions.
//!
//! The window also carries a bit cursor for bit-packed columns. Bits are
//! consumed LSB to MSB of successive bytes; the fractional byte is retained
//! between bit reads and discarded before the next byte-aligned read.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// A seekable little-endian view over the file bytes, starting at `base`.
pub struct StreamWindow {
    cursor: Cursor<Vec<u8>>,
    base: u64,
    bit_acc: u64,
    bit_len: u32,
}

impl StreamWindow {
    /// Create a window over the whole buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self::rebased(data, 0)
    }

    /// Create a window whose position 0 maps to `base` in the buffer.
    pub fn rebased(data: Vec<u8>, base: u64) -> Self {
        let mut cursor = Cursor::new(data);
        cursor.set_position(base);
        StreamWindow {
            cursor,
            base,
            bit_acc: 0,
            bit_len: 0,
        }
    }

    /// Current position, relative to the window base.
    pub fn position(&self) -> u64 {
        self.cursor.position() - self.base
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64 - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seek to a window-relative position. Discards any buffered bits.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.reset_bits();
        self.cursor.seek(SeekFrom::Start(self.base + pos))?;
        Ok(())
    }

    /// Discard the fractional byte held by the bit cursor.
    pub fn reset_bits(&mut self) {
        self.bit_acc = 0;
        self.bit_len = 0;
    }

    fn truncated(&self, what: &str) -> Error {
        Error::Truncated(format!(
            "unexpected end of stream reading {} near offset {}",
            what,
            self.position()
        ))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.reset_bits();
        self.cursor.read_u8().map_err(|_| self.truncated("u8"))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.reset_bits();
        self.cursor.read_i8().map_err(|_| self.truncated("i8"))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.reset_bits();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated("u16"))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.reset_bits();
        self.cursor
            .read_i16::<LittleEndian>()
            .map_err(|_| self.truncated("i16"))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        self.reset_bits();
        self.cursor
            .read_u24::<LittleEndian>()
            .map_err(|_| self.truncated("u24"))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.reset_bits();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated("u32"))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.reset_bits();
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| self.truncated("i32"))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.reset_bits();
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| self.truncated("u64"))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.reset_bits();
        self.cursor
            .read_i64::<LittleEndian>()
            .map_err(|_| self.truncated("i64"))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.reset_bits();
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| self.truncated("f32"))
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.reset_bits();
        let mut buf = vec![0u8; n];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| self.truncated("bytes"))?;
        Ok(buf)
    }

    /// Read a null-terminated string from the current position.
    pub fn read_cstring(&mut self) -> Result<String> {
        self.reset_bits();
        let mut bytes = Vec::new();
        loop {
            let b = self.cursor.read_u8().map_err(|_| self.truncated("cstring"))?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a single bit from the bit cursor.
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Read `n` bits (1..=64), LSB first across successive bytes.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        debug_assert!((1..=64).contains(&n));
        let mut acc = self.bit_acc as u128;
        let mut have = self.bit_len;
        while have < n {
            let byte = self.cursor.read_u8().map_err(|_| self.truncated("bits"))?;
            acc |= (byte as u128) << have;
            have += 8;
        }
        let value = (acc & ((1u128 << n) - 1)) as u64;
        // At most 7 bits remain buffered.
        self.bit_acc = (acc >> n) as u64;
        self.bit_len = have - n;
        Ok(value)
    }

    /// Borrow the underlying buffer, window-relative.
    pub fn window_bytes(&self) -> &[u8] {
        &self.cursor.get_ref()[self.base as usize..]
    }

    /// Rebase the window so that position 0 maps to absolute `base`.
    pub fn into_rebased(self, base: u64) -> StreamWindow {
        StreamWindow::rebased(self.cursor.into_inner(), base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reads_little_endian() {
        let mut win = StreamWindow::new(vec![0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(win.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(win.read_f32().unwrap(), 1.0);
        assert!(matches!(win.read_u8(), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_rebase_and_seek() {
        let mut win = StreamWindow::rebased(vec![0xFF, 0xFF, 0xAA, 0xBB], 2);
        assert_eq!(win.len(), 2);
        assert_eq!(win.read_u8().unwrap(), 0xAA);
        assert_eq!(win.position(), 1);
        win.seek(0).unwrap();
        assert_eq!(win.read_u16().unwrap(), 0xBBAA);
    }

    #[test]
    fn test_bits_lsb_first() {
        // 0x0543 = 0b101_01000011: low 5 bits = 3, next 11 bits = 42
        let mut win = StreamWindow::new(vec![0x43, 0x05]);
        assert_eq!(win.read_bits(5).unwrap(), 3);
        assert_eq!(win.read_bits(11).unwrap(), 42);
    }

    #[test]
    fn test_bit_then_byte_read_resets_cursor() {
        let mut win = StreamWindow::new(vec![0b0000_0101, 0x99]);
        assert!(win.read_bit().unwrap());
        assert!(!win.read_bit().unwrap());
        assert!(win.read_bit().unwrap());
        // Byte-aligned read discards the fractional byte.
        assert_eq!(win.read_u8().unwrap(), 0x99);
        assert_eq!(win.bit_len, 0);
    }

    #[test]
    fn test_read_bits_across_bytes() {
        let mut win = StreamWindow::new(vec![0xFF, 0x01]);
        assert_eq!(win.read_bits(4).unwrap(), 0xF);
        assert_eq!(win.read_bits(8).unwrap(), 0x1F);
        assert_eq!(win.read_bits(4).unwrap(), 0);
        assert!(matches!(win.read_bits(8), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_read_bits_full_width() {
        let mut win = StreamWindow::new(vec![0xEF, 0xBE, 0xAD, 0xDE, 0xBE, 0xBA, 0xFE, 0xCA]);
        assert_eq!(win.read_bits(64).unwrap(), 0xCAFE_BABE_DEAD_BEEF);
    }

    #[test]
    fn test_read_cstring() {
        let mut win = StreamWindow::new(b"foo\0bar\0".to_vec());
        assert_eq!(win.read_cstring().unwrap(), "foo");
        assert_eq!(win.read_cstring().unwrap(), "bar");
    }
}
