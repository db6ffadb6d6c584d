// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bounds-checked byte access over a borrowed buffer.

use std::ffi::CStr;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::NativeEndian;
use thiserror::Error;

/// Mask and pattern matching an Annex B start code (`00 00 01`) followed by
/// any byte.
pub const START_CODE_MASK: u32 = 0xffffff00;
pub const START_CODE_PATTERN: u32 = 0x00000100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ByteReaderError {
    #[error("requested {requested} bytes but only {remaining} remain")]
    OutOfBytes { requested: usize, remaining: usize },
    #[error("position {position} is past the end of the data ({size} bytes)")]
    InvalidPosition { position: usize, size: usize },
    #[error("no NUL terminator found in the remaining data")]
    UnterminatedString,
}

pub type ByteReaderResult<T> = std::result::Result<T, ByteReaderError>;

/// A cursor over a byte slice. Every read is checked against the remaining
/// data: `get_*` methods advance by exactly the consumed width, `peek_*`
/// methods never move the position, and a failed read leaves the cursor
/// untouched.
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

macro_rules! read_impl {
    ($(($get:ident, $peek:ident, $ty:ty, $size:expr, $read:expr)),* $(,)?) => {
        $(
            pub fn $peek(&self) -> ByteReaderResult<$ty> {
                let data = self.peek_data($size)?;
                Ok($read(data))
            }

            pub fn $get(&mut self) -> ByteReaderResult<$ty> {
                let value = self.$peek()?;
                self.position += $size;
                Ok(value)
            }
        )*
    };
}

fn read_u8(data: &[u8]) -> u8 {
    data[0]
}

fn read_i8(data: &[u8]) -> i8 {
    data[0] as i8
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bytes from the start of the data.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor to `position`, which may be equal to the size of the
    /// data but not past it.
    pub fn set_position(&mut self, position: usize) -> ByteReaderResult<()> {
        if position > self.data.len() {
            return Err(ByteReaderError::InvalidPosition {
                position,
                size: self.data.len(),
            });
        }

        self.position = position;
        Ok(())
    }

    /// Total size of the data in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// The whole buffer this reader was created over.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn check_remaining(&self, requested: usize) -> ByteReaderResult<()> {
        let remaining = self.remaining();
        if requested > remaining {
            return Err(ByteReaderError::OutOfBytes {
                requested,
                remaining,
            });
        }

        Ok(())
    }

    pub fn skip(&mut self, num_bytes: usize) -> ByteReaderResult<()> {
        self.check_remaining(num_bytes)?;
        self.position += num_bytes;
        Ok(())
    }

    read_impl!(
        (get_u8, peek_u8, u8, 1, read_u8),
        (get_i8, peek_i8, i8, 1, read_i8),
        (get_u16_le, peek_u16_le, u16, 2, LittleEndian::read_u16),
        (get_u16_be, peek_u16_be, u16, 2, BigEndian::read_u16),
        (get_i16_le, peek_i16_le, i16, 2, LittleEndian::read_i16),
        (get_i16_be, peek_i16_be, i16, 2, BigEndian::read_i16),
        (get_u24_le, peek_u24_le, u32, 3, LittleEndian::read_u24),
        (get_u24_be, peek_u24_be, u32, 3, BigEndian::read_u24),
        (get_i24_le, peek_i24_le, i32, 3, LittleEndian::read_i24),
        (get_i24_be, peek_i24_be, i32, 3, BigEndian::read_i24),
        (get_u32_le, peek_u32_le, u32, 4, LittleEndian::read_u32),
        (get_u32_be, peek_u32_be, u32, 4, BigEndian::read_u32),
        (get_i32_le, peek_i32_le, i32, 4, LittleEndian::read_i32),
        (get_i32_be, peek_i32_be, i32, 4, BigEndian::read_i32),
        (get_u64_le, peek_u64_le, u64, 8, LittleEndian::read_u64),
        (get_u64_be, peek_u64_be, u64, 8, BigEndian::read_u64),
        (get_i64_le, peek_i64_le, i64, 8, LittleEndian::read_i64),
        (get_i64_be, peek_i64_be, i64, 8, BigEndian::read_i64),
        (get_f32_le, peek_f32_le, f32, 4, LittleEndian::read_f32),
        (get_f32_be, peek_f32_be, f32, 4, BigEndian::read_f32),
        (get_f64_le, peek_f64_le, f64, 8, LittleEndian::read_f64),
        (get_f64_be, peek_f64_be, f64, 8, BigEndian::read_f64),
    );

    /// Returns the next `size` bytes without consuming them.
    pub fn peek_data(&self, size: usize) -> ByteReaderResult<&'a [u8]> {
        self.check_remaining(size)?;
        Ok(&self.data[self.position..self.position + size])
    }

    /// Returns the next `size` bytes and advances past them.
    pub fn get_data(&mut self, size: usize) -> ByteReaderResult<&'a [u8]> {
        let data = self.peek_data(size)?;
        self.position += size;
        Ok(data)
    }

    /// Like [`Self::get_data`], but returns an owned copy.
    pub fn dup_data(&mut self, size: usize) -> ByteReaderResult<Vec<u8>> {
        self.get_data(size).map(<[u8]>::to_vec)
    }

    /// Returns a reader bounded to the next `size` bytes and advances this
    /// reader past them.
    pub fn sub_reader(&mut self, size: usize) -> ByteReaderResult<ByteReader<'a>> {
        self.get_data(size).map(ByteReader::new)
    }

    /// Size in bytes, terminator included, of the NUL-terminated string of
    /// `char_size`-wide code units starting at the current position.
    fn scan_string(&self, char_size: usize) -> ByteReaderResult<usize> {
        self.data[self.position..]
            .chunks_exact(char_size)
            .position(|unit| unit.iter().all(|b| *b == 0))
            .map(|len| (len + 1) * char_size)
            .ok_or(ByteReaderError::UnterminatedString)
    }

    fn skip_string(&mut self, char_size: usize) -> ByteReaderResult<()> {
        self.position += self.scan_string(char_size)?;
        Ok(())
    }

    /// Skips a NUL-terminated string of 8-bit characters (ASCII, UTF-8,
    /// ISO-8859-N...).
    pub fn skip_string_utf8(&mut self) -> ByteReaderResult<()> {
        self.skip_string(1)
    }

    /// Skips a NUL-terminated string of 16-bit code units.
    pub fn skip_string_utf16(&mut self) -> ByteReaderResult<()> {
        self.skip_string(2)
    }

    /// Skips a NUL-terminated string of 32-bit code units.
    pub fn skip_string_utf32(&mut self) -> ByteReaderResult<()> {
        self.skip_string(4)
    }

    pub fn peek_string_utf8(&self) -> ByteReaderResult<&'a CStr> {
        let size = self.scan_string(1)?;
        CStr::from_bytes_with_nul(&self.data[self.position..self.position + size])
            .map_err(|_| ByteReaderError::UnterminatedString)
    }

    pub fn get_string_utf8(&mut self) -> ByteReaderResult<&'a CStr> {
        let string = self.peek_string_utf8()?;
        self.position += string.to_bytes_with_nul().len();
        Ok(string)
    }

    /// Returns the native-endian code units of the NUL-terminated string at
    /// the current position, without the terminator.
    pub fn peek_string_utf16(&self) -> ByteReaderResult<Vec<u16>> {
        let size = self.scan_string(2)?;
        Ok(self.data[self.position..self.position + size - 2]
            .chunks_exact(2)
            .map(NativeEndian::read_u16)
            .collect())
    }

    pub fn get_string_utf16(&mut self) -> ByteReaderResult<Vec<u16>> {
        let string = self.peek_string_utf16()?;
        self.position += (string.len() + 1) * 2;
        Ok(string)
    }

    /// Returns the native-endian code units of the NUL-terminated string at
    /// the current position, without the terminator.
    pub fn peek_string_utf32(&self) -> ByteReaderResult<Vec<u32>> {
        let size = self.scan_string(4)?;
        Ok(self.data[self.position..self.position + size - 4]
            .chunks_exact(4)
            .map(NativeEndian::read_u32)
            .collect())
    }

    pub fn get_string_utf32(&mut self) -> ByteReaderResult<Vec<u32>> {
        let string = self.peek_string_utf32()?;
        self.position += (string.len() + 1) * 4;
        Ok(string)
    }

    /// Scans `size` bytes starting `offset` bytes after the current position
    /// for the first 4-byte big-endian word `w` such that
    /// `w & mask == pattern`.
    ///
    /// All four bytes of the word must lie inside the scanned window, even
    /// if some of them are masked out. Returns the offset of the match
    /// relative to the current position, or `None` if there is no match or
    /// the window does not fit in the remaining data.
    pub fn masked_scan_u32(
        &self,
        mask: u32,
        pattern: u32,
        offset: usize,
        size: usize,
    ) -> Option<usize> {
        if size < 4 || offset.checked_add(size)? > self.remaining() {
            return None;
        }

        let start = self.position + offset;
        let data = &self.data[start..start + size];

        if mask == START_CODE_MASK && pattern == START_CODE_PATTERN {
            return Self::scan_for_start_code(data).map(|i| offset + i);
        }

        // Seed the state with something that cannot match.
        let mut state = !pattern;
        for (i, byte) in data.iter().enumerate() {
            state = (state << 8) | u32::from(*byte);
            if (state & mask) == pattern && i >= 3 {
                return Some(offset + i - 3);
            }
        }

        None
    }

    /// Equivalent to the generic scan for the start code mask and pattern,
    /// but only looks at one byte every one to three positions.
    fn scan_for_start_code(data: &[u8]) -> Option<usize> {
        let mut i = 0;
        while i + 3 < data.len() {
            if data[i + 2] > 1 {
                i += 3;
            } else if data[i + 1] != 0 {
                i += 2;
            } else if data[i] != 0 || data[i + 2] != 1 {
                i += 1;
            } else {
                return Some(i);
            }
        }

        None
    }
}
