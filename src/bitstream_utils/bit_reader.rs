// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-granular reads over a borrowed buffer. Unlike
//! [`crate::codec::h264::nalu_reader::NaluReader`], no emulation prevention
//! is performed: every bit of the underlying data is visible.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitReaderError {
    #[error("requested {requested} bits but only {remaining} remain")]
    OutOfBits { requested: usize, remaining: usize },
    #[error("requested {requested} bits into a {width}-bit value")]
    TooManyBitsRequested { requested: usize, width: usize },
    #[error("bit position {position} is past the end of the data ({size} bits)")]
    InvalidPosition { position: usize, size: usize },
    #[error("failed to convert read input to target type")]
    ConversionFailed,
}

pub type BitReaderResult<T> = std::result::Result<T, BitReaderError>;

/// A cursor reading bits most-significant-bit first.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits.
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves to the absolute bit `position`. The end of the data is a valid
    /// position.
    pub fn set_position(&mut self, position: usize) -> BitReaderResult<()> {
        if position > self.size() {
            return Err(BitReaderError::InvalidPosition {
                position,
                size: self.size(),
            });
        }

        self.position = position;
        Ok(())
    }

    /// Total size in bits.
    pub fn size(&self) -> usize {
        self.data.len() * 8
    }

    /// Number of bits left to read.
    pub fn remaining(&self) -> usize {
        self.size() - self.position
    }

    fn check_bits<U>(&self, num_bits: usize) -> BitReaderResult<()> {
        let width = std::mem::size_of::<U>() * 8;
        if num_bits > width || num_bits > 64 {
            return Err(BitReaderError::TooManyBitsRequested {
                requested: num_bits,
                width,
            });
        }

        let remaining = self.remaining();
        if num_bits > remaining {
            return Err(BitReaderError::OutOfBits {
                requested: num_bits,
                remaining,
            });
        }

        Ok(())
    }

    /// Returns the next `num_bits` bits without consuming them. `num_bits`
    /// may not exceed the width of `U`.
    pub fn peek_bits<U: TryFrom<u64>>(&self, num_bits: usize) -> BitReaderResult<U> {
        self.check_bits::<U>(num_bits)?;
        U::try_from(self.peek_bits_unchecked(num_bits))
            .map_err(|_| BitReaderError::ConversionFailed)
    }

    /// Reads `num_bits` bits. On failure the position is left unchanged.
    pub fn read_bits<U: TryFrom<u64>>(&mut self, num_bits: usize) -> BitReaderResult<U> {
        let value = self.peek_bits(num_bits)?;
        self.position += num_bits;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> BitReaderResult<bool> {
        Ok(self.read_bits::<u8>(1)? == 1)
    }

    pub fn skip(&mut self, num_bits: usize) -> BitReaderResult<()> {
        let remaining = self.remaining();
        if num_bits > remaining {
            return Err(BitReaderError::OutOfBits {
                requested: num_bits,
                remaining,
            });
        }

        self.position += num_bits;
        Ok(())
    }

    /// Advances to the next byte boundary, if not already on one.
    pub fn skip_to_byte(&mut self) {
        self.position = (self.position + 7) & !7;
    }

    /// Assembles up to 64 bits starting at the current position. The caller
    /// must have checked that `num_bits` bits remain.
    pub(crate) fn peek_bits_unchecked(&self, num_bits: usize) -> u64 {
        debug_assert!(num_bits <= 64 && num_bits <= self.remaining());

        let mut value = 0u64;
        let mut position = self.position;
        let mut bits_left = num_bits;

        while bits_left > 0 {
            let byte = self.data[position / 8];
            let available = 8 - position % 8;
            let n = std::cmp::min(available, bits_left);
            let bits = (u64::from(byte) >> (available - n)) & ((1 << n) - 1);

            value = (value << n) | bits;
            position += n;
            bits_left -= n;
        }

        value
    }

    pub(crate) fn read_bits_unchecked(&mut self, num_bits: usize) -> u64 {
        let value = self.peek_bits_unchecked(num_bits);
        self.position += num_bits;
        value
    }

    pub(crate) fn skip_unchecked(&mut self, num_bits: usize) {
        debug_assert!(num_bits <= self.remaining());
        self.position += num_bits;
    }
}
