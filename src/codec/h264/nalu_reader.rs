// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;

use anyhow::anyhow;
use bytes::Buf;
use thiserror::Error;

/// A bit reader for h264 bitstreams. It properly handles emulation-prevention
/// bytes and stop bits.
#[derive(Clone, Debug)]
pub struct NaluReader<'a> {
    /// A reference into the next unread byte in the stream.
    data: Cursor<&'a [u8]>,
    /// Contents of the current byte. First unread bit starting at position 8 -
    /// num_remaining_bits_in_curr_bytes.
    curr_byte: u32,
    /// Number of bits remaining in `curr_byte`
    num_remaining_bits_in_curr_byte: usize,
    /// Used in epb detection.
    prev_two_bytes: u32,
    /// Number of epbs (i.e. 0x000003) we found.
    num_epb: usize,
}

#[derive(Debug, Error)]
pub enum GetByteError {
    #[error("reader ran out of bits")]
    OutOfBits,
}

#[derive(Debug, Error)]
pub enum ReadBitsError {
    #[error("more than 32 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("failed to advance the current byte")]
    GetByte(#[from] GetByteError),
    #[error("failed to convert read input to target type")]
    ConversionFailed,
}

impl<'a> NaluReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: Cursor::new(data),
            curr_byte: Default::default(),
            num_remaining_bits_in_curr_byte: Default::default(),
            prev_two_bytes: 0xffff,
            num_epb: Default::default(),
        }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        Ok(self.read_bits::<u32>(1)? == 1)
    }

    /// Read up to 32 bits from the stream.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        if num_bits > 32 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        let mut bits_left = num_bits;
        let mut out = 0u64;

        while self.num_remaining_bits_in_curr_byte < bits_left {
            out |= u64::from(self.curr_byte) << (bits_left - self.num_remaining_bits_in_curr_byte);
            bits_left -= self.num_remaining_bits_in_curr_byte;
            self.update_curr_byte()?;
        }

        out |= u64::from(self.curr_byte) >> (self.num_remaining_bits_in_curr_byte - bits_left);
        out &= (1 << num_bits) - 1;
        self.num_remaining_bits_in_curr_byte -= bits_left;

        let out = u32::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)?;
        U::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Returns the next `num_bits` bits without consuming them.
    pub fn peek_bits<U: TryFrom<u32>>(&self, num_bits: usize) -> Result<U, ReadBitsError> {
        self.clone().read_bits(num_bits)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, mut num_bits: usize) -> Result<(), ReadBitsError> {
        while num_bits > 0 {
            let n = std::cmp::min(num_bits, 32);
            self.read_bits::<u32>(n)?;
            num_bits -= n;
        }

        Ok(())
    }

    /// Discards the bits left in the current byte.
    pub fn skip_to_byte(&mut self) {
        self.num_remaining_bits_in_curr_byte = 0;
    }

    /// Returns the amount of bits left in the stream, emulation prevention
    /// bytes included.
    pub fn num_bits_left(&self) -> usize {
        self.data.remaining() * 8 + self.num_remaining_bits_in_curr_byte
    }

    /// Returns the number of emulation-prevention bytes read so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Number of payload bits consumed so far. Emulation prevention bytes do
    /// not count.
    pub fn position(&self) -> usize {
        // `data` never advances past the end of its slice.
        let consumed = self.data.position() as usize;
        8 * (consumed - self.num_epb) - self.num_remaining_bits_in_curr_byte
    }

    /// Whether the stream still has RBSP data. Implements more_rbsp_data(). See
    /// ITU-T H.264 for more details.
    pub fn has_more_rbsp_data(&self) -> bool {
        let mut reader = self.clone();

        match reader.read_bit() {
            // no more data at all in the rbsp
            Err(_) => return false,
            Ok(false) => return true,
            Ok(true) => (),
        }

        // The bit we just read is the stop bit only if nothing but unset bits
        // follow it.
        let tail = reader.num_remaining_bits_in_curr_byte;
        match reader.read_bits::<u32>(tail) {
            Ok(0) => (),
            _ => return true,
        }

        while let Ok(byte) = reader.read_bits::<u32>(8) {
            if byte != 0 {
                return true;
            }
        }

        false
    }

    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> anyhow::Result<U> {
        let mut num_bits = 0;

        while !self.read_bit()? {
            num_bits += 1;
            if num_bits > 32 {
                return Err(anyhow!("Invalid stream"));
            }
        }

        let rest = if num_bits > 0 {
            u64::from(self.read_bits::<u32>(num_bits)?)
        } else {
            0
        };

        let value = (1u64 << num_bits) - 1 + rest;
        let value = u32::try_from(value).map_err(|_| anyhow!("Exp-Golomb value overflow"))?;

        U::try_from(value).map_err(|_| anyhow!("Conversion error"))
    }

    pub fn read_ue_bounded<U: TryFrom<u32>>(&mut self, min: u32, max: u32) -> anyhow::Result<U> {
        let ue = self.read_ue()?;
        if ue > max || ue < min {
            Err(anyhow!(
                "Value out of bounds: expected {} - {}, got {}",
                min,
                max,
                ue
            ))
        } else {
            Ok(U::try_from(ue).map_err(|_| anyhow!("Conversion error"))?)
        }
    }

    pub fn read_ue_max<U: TryFrom<u32>>(&mut self, max: u32) -> anyhow::Result<U> {
        self.read_ue_bounded(0, max)
    }

    pub fn read_se<U: TryFrom<i32>>(&mut self) -> anyhow::Result<U> {
        let ue = i64::from(self.read_ue::<u32>()?);

        let se = if ue % 2 == 0 { -ue / 2 } else { ue / 2 + 1 };
        let se = i32::try_from(se).map_err(|_| anyhow!("Exp-Golomb value overflow"))?;

        U::try_from(se).map_err(|_| anyhow!("Conversion error"))
    }

    pub fn read_se_bounded<U: TryFrom<i32>>(&mut self, min: i32, max: i32) -> anyhow::Result<U> {
        let se = self.read_se()?;
        if se < min || se > max {
            Err(anyhow!(
                "Value out of bounds, expected between {}-{}, got {}",
                min,
                max,
                se
            ))
        } else {
            Ok(U::try_from(se).map_err(|_| anyhow!("Conversion error"))?)
        }
    }

    pub fn peek_ue<U: TryFrom<u32>>(&self) -> anyhow::Result<U> {
        self.clone().read_ue()
    }

    pub fn peek_se<U: TryFrom<i32>>(&self) -> anyhow::Result<U> {
        self.clone().read_se()
    }

    fn get_byte(&mut self) -> Result<u8, GetByteError> {
        if self.data.remaining() == 0 {
            return Err(GetByteError::OutOfBits);
        }

        Ok(self.data.get_u8())
    }

    fn update_curr_byte(&mut self) -> Result<(), GetByteError> {
        let mut byte = self.get_byte()?;

        if (self.prev_two_bytes & 0xffff) == 0 && byte == 0x03 {
            // We found an epb
            self.num_epb += 1;
            // Read another byte
            byte = self.get_byte()?;
            // We need another 3 bytes before another epb can happen.
            self.prev_two_bytes = 0xffff;
        }

        self.num_remaining_bits_in_curr_byte = 8;
        self.prev_two_bytes = ((self.prev_two_bytes & 0xff) << 8) | u32::from(byte);

        self.curr_byte = u32::from(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::NaluReader;
    use crate::codec::h264::nalu_writer::NaluWriter;

    // These tests are adapted from the chromium tests at media/video/h264_bit_reader_unitttest.cc

    #[test]
    fn read_stream_without_escape_and_trailing_zero_bytes() {
        const RBSP: [u8; 6] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xa0];

        let mut reader = NaluReader::new(&RBSP);
        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 0);
        assert_eq!(reader.num_bits_left(), 47);
        assert!(reader.has_more_rbsp_data());

        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x02);
        assert_eq!(reader.num_bits_left(), 39);
        assert!(reader.has_more_rbsp_data());

        assert_eq!(reader.read_bits::<u32>(31).unwrap(), 0x23456789);
        assert_eq!(reader.num_bits_left(), 8);
        assert!(reader.has_more_rbsp_data());

        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 1);
        assert_eq!(reader.num_bits_left(), 7);
        assert!(reader.has_more_rbsp_data());

        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 0);
        assert_eq!(reader.num_bits_left(), 6);
        assert!(!reader.has_more_rbsp_data());
    }

    #[test]
    fn single_byte_stream() {
        const RBSP: [u8; 1] = [0x18];

        let mut reader = NaluReader::new(&RBSP);
        assert_eq!(reader.num_bits_left(), 8);
        assert!(reader.has_more_rbsp_data());
        assert_eq!(reader.read_bits::<u32>(4).unwrap(), 1);
        assert!(!reader.has_more_rbsp_data());
    }

    #[test]
    fn stop_bit_occupy_full_byte() {
        const RBSP: [u8; 2] = [0xab, 0x80];

        let mut reader = NaluReader::new(&RBSP);
        assert_eq!(reader.num_bits_left(), 16);
        assert!(reader.has_more_rbsp_data());

        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0xab);
        assert_eq!(reader.num_bits_left(), 8);

        assert!(!reader.has_more_rbsp_data());
    }

    #[test]
    fn stop_bit_followed_by_escaped_zeros() {
        // 0x80, then two zero bytes and an epb protecting a third.
        const RBSP: [u8; 5] = [0x80, 0x00, 0x00, 0x03, 0x00];

        let reader = NaluReader::new(&RBSP);
        assert!(!reader.has_more_rbsp_data());

        const MORE: [u8; 5] = [0x80, 0x00, 0x00, 0x03, 0x01];
        let reader = NaluReader::new(&MORE);
        assert!(reader.has_more_rbsp_data());
    }

    #[test]
    fn position_skips_epb() {
        const DATA: [u8; 9] = [0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];

        let mut reader = NaluReader::new(&DATA);
        assert_eq!(reader.position(), 0);
        reader.read_bits::<u32>(1).unwrap();
        assert_eq!(reader.position(), 1);
        reader.read_bits::<u32>(7).unwrap();
        assert_eq!(reader.position(), 8);
        reader.read_bits::<u32>(8).unwrap();
        assert_eq!(reader.position(), 16);
        assert_eq!(reader.num_epb(), 0);
        reader.read_bits::<u32>(8).unwrap();
        assert_eq!(reader.position(), 24);
        assert_eq!(reader.num_epb(), 1);

        reader.skip_bits(32).unwrap();
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 1);
        assert_eq!(reader.position(), 64);
        reader.read_bit().unwrap_err();
    }

    #[test]
    fn epb_then_payload() {
        const DATA: [u8; 8] = [0x00, 0x00, 0x03, 0x00, 0x01, 0x02, 0x03, 0x04];

        let mut reader = NaluReader::new(&DATA);
        reader.read_bits::<u32>(1).unwrap();
        assert_eq!(reader.position(), 1);
        reader.read_bits::<u32>(7).unwrap();
        assert_eq!(reader.position(), 8);
        reader.read_bits::<u32>(8).unwrap();
        assert_eq!(reader.position(), 16);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0);
        assert_eq!(reader.position(), 24);

        reader.skip_bits(24).unwrap();
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 4);
        assert_eq!(reader.num_epb(), 1);
    }

    #[test]
    fn epb_is_transparent() {
        let values = [0u32, 0, 0, 1, 0x0300, 0, 3, 0xffff_ffff, 2];

        let mut escaped = Vec::new();
        let mut raw = Vec::new();
        for (buf, ep) in [(&mut escaped, true), (&mut raw, false)] {
            let mut writer = NaluWriter::<&mut Vec<u8>>::new(buf, ep);
            for value in values {
                writer.write_f(32, value).unwrap();
            }
        }
        assert!(escaped.len() > raw.len());

        let mut reader = NaluReader::new(&escaped);
        for value in values {
            assert_eq!(reader.read_bits::<u32>(32).unwrap(), value);
        }
        assert_eq!(reader.num_epb(), escaped.len() - raw.len());
        assert_eq!(reader.position(), raw.len() * 8);
    }

    #[test]
    fn read_bits_limits() {
        const DATA: [u8; 5] = [0xff, 0xff, 0xff, 0xff, 0xff];

        let mut reader = NaluReader::new(&DATA);
        reader.read_bits::<u32>(33).unwrap_err();
        reader.read_bits::<u8>(9).unwrap_err();
        assert_eq!(reader.peek_bits::<u32>(32).unwrap(), 0xffff_ffff);
        assert_eq!(reader.read_bits::<u32>(32).unwrap(), 0xffff_ffff);
        reader.read_bits::<u32>(9).unwrap_err();
    }

    #[test]
    fn exp_golomb() {
        // 1 | 010 | 011 | 00100 | 00101 | 0001000 | 00000000 1 11111111
        let mut buf = Vec::new();
        {
            let mut writer = NaluWriter::<&mut Vec<u8>>::new(&mut buf, false);
            writer.write_ue(0u32).unwrap();
            writer.write_ue(1u32).unwrap();
            writer.write_ue(2u32).unwrap();
            writer.write_se(2i32).unwrap();
            writer.write_se(-2i32).unwrap();
            writer.write_ue(7u32).unwrap();
            writer.write_ue(510u32).unwrap();
            writer.write_trailing_bits().unwrap();
        }

        let mut reader = NaluReader::new(&buf);
        assert_eq!(reader.peek_ue::<u32>().unwrap(), 0);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 0);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 1);
        assert_eq!(reader.read_ue_max::<u32>(1).map_err(|_| ()), Err(()));

        let mut reader = NaluReader::new(&buf);
        reader.skip_bits(7).unwrap();
        assert_eq!(reader.peek_se::<i32>().unwrap(), 2);
        assert_eq!(reader.read_se::<i32>().unwrap(), 2);
        assert_eq!(reader.read_se_bounded::<i32>(-2, 2).unwrap(), -2);
        assert_eq!(reader.read_ue_bounded::<u8>(7, 7).unwrap(), 7);
        assert_eq!(reader.read_ue::<u16>().unwrap(), 510);
        assert!(!reader.has_more_rbsp_data());
    }

    #[test]
    fn exp_golomb_extremes() {
        // 32 leading zeros and an all-ones suffix is 2^33 - 2: too large.
        let mut data = vec![0x00; 4];
        data.extend_from_slice(&[0xff; 5]);
        NaluReader::new(&data).read_ue::<u32>().unwrap_err();

        // 32 leading zeros and a zero suffix is u32::MAX.
        let mut data = vec![0x00; 4];
        data.extend_from_slice(&[0x80, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(NaluReader::new(&data).read_ue::<u32>().unwrap(), u32::MAX);

        // More than 32 leading zeros.
        NaluReader::new(&[0x00; 6]).read_ue::<u32>().unwrap_err();

        // Truncated suffix.
        NaluReader::new(&[0x00, 0x01]).read_ue::<u32>().unwrap_err();
    }

    #[test]
    fn exp_golomb_sweep() {
        let unsigned: Vec<u32> = (0..5000)
            .chain([65535, 65536, 1 << 31, u32::MAX - 1, u32::MAX])
            .collect();
        let signed: Vec<i32> = (-3000..3000)
            .chain([i32::MAX, i32::MAX - 1, i32::MIN + 1, -65536])
            .collect();

        let mut buf = Vec::new();
        {
            let mut writer = NaluWriter::<&mut Vec<u8>>::new(&mut buf, true);
            for value in &unsigned {
                writer.write_ue(*value).unwrap();
            }
            for value in &signed {
                writer.write_se(*value).unwrap();
            }
        }

        let mut reader = NaluReader::new(&buf);
        for value in &unsigned {
            assert_eq!(reader.read_ue::<u32>().unwrap(), *value);
        }
        for value in &signed {
            assert_eq!(reader.read_se::<i32>().unwrap(), *value);
        }
    }

    #[test]
    fn exp_golomb_out_of_range() {
        // codeNum 2^32 does not fit in a u32, and i32::MIN would need it.
        let mut buf = Vec::new();
        NaluWriter::<&mut Vec<u8>>::new(&mut buf, false)
            .write_se(i32::MIN)
            .unwrap();
        NaluReader::new(&buf).read_se::<i32>().unwrap_err();

        // codeNum u32::MAX maps to 2^31.
        let mut buf = Vec::new();
        NaluWriter::<&mut Vec<u8>>::new(&mut buf, false)
            .write_ue(u32::MAX)
            .unwrap();
        NaluReader::new(&buf).read_se::<i32>().unwrap_err();
    }

    #[test]
    fn epb_transparent_at_every_alignment() {
        for offset in 0..8usize {
            for v in 0..=3u8 {
                let mut escaped = Vec::new();
                let mut raw = Vec::new();
                for (buf, ep) in [(&mut escaped, true), (&mut raw, false)] {
                    let mut writer = NaluWriter::<&mut Vec<u8>>::new(buf, ep);
                    writer.write_f(offset, 0xffu8).unwrap();
                    writer.write_f(24, u32::from(v)).unwrap();
                    writer.write_f(8, 0x80u8).unwrap();
                    writer.write_f(8 - offset, 0u8).unwrap();
                }
                assert_eq!(raw.len(), 5);

                // A 00 00 0v run only lands on byte boundaries when aligned.
                if offset == 0 {
                    assert_eq!(escaped, vec![0x00, 0x00, 0x03, v, 0x80, 0x00]);
                }

                let mut reader = NaluReader::new(&escaped);
                assert_eq!(
                    reader.read_bits::<u32>(offset).unwrap(),
                    0xff >> (8 - offset)
                );
                assert_eq!(reader.read_bits::<u32>(24).unwrap(), u32::from(v));
                assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x80);
                assert_eq!(reader.read_bits::<u32>(8 - offset).unwrap(), 0);
                assert_eq!(reader.position(), 40);
                assert_eq!(reader.num_epb(), escaped.len() - raw.len());
                assert_eq!(reader.num_bits_left(), 0);
            }
        }
    }
}
