// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synthesizes H.264 NAL units for the parser tests.

use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum NaluWriterError {
    #[error("cannot write {0} bits at once")]
    InvalidBitCount(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) type NaluWriterResult<T> = std::result::Result<T, NaluWriterError>;

/// Packs syntax elements most-significant-bit first into Annex B NAL units,
/// escaping the payload with emulation prevention bytes when enabled. A
/// partial byte is zero-padded when the writer is flushed or dropped.
pub(crate) struct NaluWriter<W: Write> {
    out: W,
    ep_enabled: bool,
    /// Zero bytes written since the last non-zero or emulation prevention
    /// byte.
    zero_run: usize,
    pending: u8,
    pending_bits: u8,
}

impl<W: Write> NaluWriter<W> {
    pub fn new(out: W, ep_enabled: bool) -> Self {
        Self {
            out,
            ep_enabled,
            zero_run: 0,
            pending: 0,
            pending_bits: 0,
        }
    }

    fn put_byte(&mut self, byte: u8) -> NaluWriterResult<()> {
        if self.ep_enabled && self.zero_run >= 2 && byte <= 0x03 {
            self.out.write_all(&[0x03])?;
            self.zero_run = 0;
        }

        self.out.write_all(&[byte])?;
        self.zero_run = if byte == 0x00 { self.zero_run + 1 } else { 0 };

        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> NaluWriterResult<()> {
        self.pending = (self.pending << 1) | u8::from(bit);
        self.pending_bits += 1;

        if self.pending_bits == 8 {
            let byte = self.pending;
            self.pending = 0;
            self.pending_bits = 0;
            self.put_byte(byte)?;
        }

        Ok(())
    }

    /// `f(n)`, up to 64 bits.
    pub fn write_f<T: Into<u64>>(&mut self, bits: usize, value: T) -> NaluWriterResult<()> {
        if bits > 64 {
            return Err(NaluWriterError::InvalidBitCount(bits));
        }

        let value = value.into();
        for shift in (0..bits).rev() {
            self.write_bit((value >> shift) & 1 == 1)?;
        }

        Ok(())
    }

    /// `u(n)`.
    pub fn write_u<T: Into<u64>>(&mut self, bits: usize, value: T) -> NaluWriterResult<()> {
        self.write_f(bits, value)
    }

    fn write_exp_golomb(&mut self, code_num: u64) -> NaluWriterResult<()> {
        // code_num is at most 2^32, so the value fits in 33 bits.
        let value = code_num + 1;
        let bits = 64 - value.leading_zeros() as usize;

        self.write_f(bits - 1, 0u64)?;
        self.write_f(bits, value)
    }

    /// `ue(v)`.
    pub fn write_ue<T: Into<u32>>(&mut self, value: T) -> NaluWriterResult<()> {
        self.write_exp_golomb(u64::from(value.into()))
    }

    /// `se(v)`, mapped with 9-3.
    pub fn write_se<T: Into<i32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value = i64::from(value.into());
        let code_num = if value <= 0 { -2 * value } else { 2 * value - 1 };

        self.write_exp_golomb(code_num as u64)
    }

    /// Pads the pending byte, then writes a 4-byte start code and the NAL
    /// header byte. Neither is escaped.
    pub fn write_header(&mut self, idc: u8, nal_unit_type: u8) -> NaluWriterResult<()> {
        self.flush()?;
        self.out
            .write_all(&[0x00, 0x00, 0x00, 0x01, (idc & 0b11) << 5 | (nal_unit_type & 0x1f)])?;
        self.zero_run = 0;

        Ok(())
    }

    /// Writes `rbsp_trailing_bits()`.
    pub fn write_trailing_bits(&mut self) -> NaluWriterResult<()> {
        self.write_bit(true)?;

        while !self.aligned() {
            self.write_bit(false)?;
        }

        Ok(())
    }

    pub fn aligned(&self) -> bool {
        self.pending_bits == 0
    }

    pub fn flush(&mut self) -> NaluWriterResult<()> {
        if !self.aligned() {
            let byte = self.pending << (8 - self.pending_bits);
            self.pending = 0;
            self.pending_bits = 0;
            self.put_byte(byte)?;
        }

        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Drop for NaluWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("unable to flush NAL writer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_utils::BitReader;
    use crate::codec::h264::nalu_reader::NaluReader;

    #[test]
    fn packs_bits_and_pads_on_drop() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            for bit in [true, false, false, false, true, true, true, true] {
                writer.write_bit(bit).unwrap();
            }
            assert!(writer.aligned());
            writer.write_f(3, 0b101u8).unwrap();
            assert!(!writer.aligned());
        }
        assert_eq!(buf, vec![0b1000_1111, 0b1010_0000]);
    }

    #[test]
    fn wide_fields() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            writer.write_f(64, u64::MAX - 1).unwrap();
            writer.write_f(5, 0b10110u8).unwrap();
            assert!(matches!(
                writer.write_f(65, 0u8),
                Err(NaluWriterError::InvalidBitCount(65))
            ));
        }

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read_bits::<u64>(64).unwrap(), u64::MAX - 1);
        assert_eq!(reader.read_bits::<u8>(5).unwrap(), 0b10110);
        assert_eq!(reader.read_bits::<u8>(3).unwrap(), 0);
    }

    #[test]
    fn first_ue_codes() {
        fn single_ue(value: u32) -> Vec<u8> {
            let mut buf = Vec::<u8>::new();
            NaluWriter::new(&mut buf, false).write_ue(value).unwrap();
            buf
        }

        assert_eq!(single_ue(0), vec![0b1000_0000]);
        assert_eq!(single_ue(1), vec![0b0100_0000]);
        assert_eq!(single_ue(2), vec![0b0110_0000]);
        assert_eq!(single_ue(3), vec![0b0010_0000]);
        assert_eq!(single_ue(6), vec![0b0011_1000]);
        assert_eq!(single_ue(7), vec![0b0001_0000]);
        assert_eq!(single_ue(9), vec![0b0001_0100]);
    }

    #[test]
    fn exp_golomb_reads_back() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            writer.write_ue(10u32).unwrap();
            writer.write_se(-42).unwrap();
            writer.write_se(3).unwrap();
            writer.write_ue(100u32).unwrap();
        }

        let mut reader = NaluReader::new(&buf);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 10);
        assert_eq!(reader.read_se::<i32>().unwrap(), -42);
        assert_eq!(reader.read_se::<i32>().unwrap(), 3);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 100);
    }

    #[test]
    fn emulation_prevention() {
        fn escaped(input: &[u8]) -> Vec<u8> {
            let mut buf = Vec::<u8>::new();
            {
                let mut writer = NaluWriter::new(&mut buf, true);
                for byte in input {
                    writer.write_f(8, *byte).unwrap();
                }
            }
            buf
        }

        for last in 0x00..=0x03u8 {
            assert_eq!(escaped(&[0x00, 0x00, last]), vec![0x00, 0x00, 0x03, last]);
        }
        assert_eq!(
            escaped(&[0x00, 0x00, 0x00, 0x00, 0x03]),
            vec![0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x03]
        );
        assert_eq!(
            escaped(&[0x00, 0x00, 0x04, 0x00, 0x00]),
            vec![0x00, 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn header_and_trailing_bits() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, true);
            writer.write_header(3, 7).unwrap();
            writer.write_f(16, 0u16).unwrap();
            writer.write_f(7, 0u8).unwrap();
            writer.write_trailing_bits().unwrap();
            assert!(writer.aligned());
        }

        // The start code is written verbatim, the payload is escaped.
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x00, 0x00, 0x03, 0x01]);
    }
}
