// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NAL unit framing: start code scanning, length-prefixed units and the NAL
//! unit header.

use anyhow::anyhow;
use enumn::N;
use log::debug;

use crate::bitstream_utils::byte_reader::START_CODE_MASK;
use crate::bitstream_utils::byte_reader::START_CODE_PATTERN;
use crate::bitstream_utils::BitReader;
use crate::bitstream_utils::ByteReader;
use crate::codec::h264::parser::ParseError;

#[derive(N, Debug, PartialEq, Eq, Clone, Copy)]
pub enum NaluType {
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
}

/// How NAL units are delimited in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFormat {
    /// Units are preceded by a `00 00 01` or `00 00 00 01` start code.
    AnnexB,
    /// Units are preceded by their size as a big-endian integer of
    /// `length_size` bytes (1, 2 or 4).
    Avc { length_size: usize },
}

/// `nal_unit_header_mvc_extension()`, present in prefix and slice extension
/// units when `svc_extension_flag` is unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaluHeaderMvc {
    pub non_idr_flag: bool,
    pub priority_id: u8,
    pub view_id: u16,
    pub temporal_id: u8,
    pub anchor_pic_flag: bool,
    pub inter_view_flag: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluHeader {
    pub ref_idc: u8,
    pub type_: NaluType,
    pub idr_pic_flag: bool,
    /// Size of the header, extension included.
    pub header_bytes: usize,
    pub mvc: Option<NaluHeaderMvc>,
}

impl NaluHeader {
    /// Parses the header at the start of `data`, which holds the whole NAL
    /// unit.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let byte = *data.first().ok_or(anyhow!("Empty NAL unit"))?;

        let type_ = NaluType::n(byte & 0x1f).unwrap_or_else(|| {
            debug!("Reserved or unspecified NAL unit type {}", byte & 0x1f);
            NaluType::Unknown
        });

        let mut header = NaluHeader {
            ref_idc: (byte & 0x60) >> 5,
            type_,
            idr_pic_flag: type_ == NaluType::SliceIdr,
            header_bytes: 1,
            mvc: None,
        };

        if matches!(type_, NaluType::PrefixUnit | NaluType::SliceExt) {
            if data.len() < 4 {
                return Err(anyhow!(
                    "NAL unit of type {:?} too short for its header extension",
                    type_
                ));
            }

            // svc_extension_flag
            if data[1] & 0x80 == 0 {
                let mut r = BitReader::new(&data[1..4]);
                r.skip_unchecked(1);

                let mvc = NaluHeaderMvc {
                    non_idr_flag: r.read_bits_unchecked(1) == 1,
                    priority_id: r.read_bits_unchecked(6) as u8,
                    view_id: r.read_bits_unchecked(10) as u16,
                    temporal_id: r.read_bits_unchecked(3) as u8,
                    anchor_pic_flag: r.read_bits_unchecked(1) == 1,
                    inter_view_flag: r.read_bits_unchecked(1) == 1,
                };

                header.idr_pic_flag = !mvc.non_idr_flag;
                header.mvc = Some(mvc);
            }

            header.header_bytes += 3;
        }

        debug!("Nal type {:?}, ref_idc {}", header.type_, header.ref_idc);

        Ok(header)
    }

    /// Whether this header type indicates EOS.
    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }

    /// The length of the header.
    pub fn len(&self) -> usize {
        self.header_bytes
    }
}

/// Returns the offset in `data` of the first `00 00 01` at or after `offset`.
/// At least one byte must follow the start code.
pub fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
    let size = data.len().checked_sub(offset)?;
    ByteReader::new(data)
        .masked_scan_u32(START_CODE_MASK, START_CODE_PATTERN, offset, size)
}

/// A NAL unit located in a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nalu<'a> {
    pub header: NaluHeader,
    /// The whole buffer this unit was found in. Possibly shared with the
    /// other NALUs in the Access Unit.
    pub data: &'a [u8],
    /// Size of the unit in bytes, header included. Zero for end of sequence
    /// and end of stream units.
    pub size: usize,
    /// Offset of the NAL unit header in `data`.
    pub offset: usize,
    /// Offset of the start code, or of the length prefix, in `data`.
    pub sc_offset: usize,
}

impl<'a> Nalu<'a> {
    fn locate(data: &'a [u8], offset: usize) -> Result<Self, ParseError> {
        let size = data.len();

        if size < offset.saturating_add(4) {
            return Err(ParseError::Invalid(anyhow!(
                "Can't parse, buffer has too small size {}, offset {}",
                size,
                offset
            )));
        }

        let start_code = find_start_code(data, offset).ok_or(ParseError::NoNal)?;

        // If the preceding byte is 00, then we actually have a four byte SC,
        // i.e. 00 00 00 01 Where the first 00 is the "zero_byte()"
        let mut sc_offset = start_code;
        if sc_offset > 0 && data[sc_offset - 1] == 0x00 {
            sc_offset -= 1;
        }

        let nalu_offset = start_code + 3;
        let header = NaluHeader::parse(&data[nalu_offset..]).map_err(|e| {
            log::warn!("error parsing \"NAL unit header\": {:#}", e);
            ParseError::BrokenData(e.to_string())
        })?;

        let size = if header.is_end() {
            debug!("end-of-seq or end-of-stream nal found");
            0
        } else {
            size - nalu_offset
        };

        Ok(Nalu {
            header,
            data,
            size,
            offset: nalu_offset,
            sc_offset,
        })
    }

    /// Find the next Annex B encoded NAL unit at or after `offset`. The unit
    /// ends at the following start code, which must be present.
    pub fn next(data: &'a [u8], offset: usize) -> Result<Self, ParseError> {
        let mut nalu = Self::locate(data, offset)?;

        if nalu.size == 0 {
            return Ok(nalu);
        }

        let mut next_offset = match find_start_code(data, nalu.offset) {
            Some(next) => next - nalu.offset,
            None => {
                debug!("Nal start {}, No end found", nalu.offset);
                return Err(ParseError::NoNalEnd);
            }
        };

        // Discard trailing_zero_8bits
        if next_offset > 0 && data[nalu.offset + next_offset - 1] == 0x00 {
            next_offset -= 1;
        }

        if next_offset < 2 {
            return Err(ParseError::BrokenData(format!(
                "NAL unit at offset {} is too small ({} bytes)",
                nalu.offset, next_offset
            )));
        }

        nalu.size = next_offset;
        debug!("Complete nal found. Off: {}, Size: {}", nalu.offset, nalu.size);

        Ok(nalu)
    }

    /// Like [`Nalu::next`], but the unit extends to the end of `data`. Only
    /// use this if `data` is known to end with a complete NAL unit.
    pub fn next_unchecked(data: &'a [u8], offset: usize) -> Result<Self, ParseError> {
        Self::locate(data, offset)
    }

    /// Reads the length-prefixed NAL unit at `offset`.
    pub fn next_avc(data: &'a [u8], offset: usize, length_size: usize) -> Result<Self, ParseError> {
        if !matches!(length_size, 1 | 2 | 4) {
            return Err(ParseError::Invalid(anyhow!(
                "Invalid NAL length size {}",
                length_size
            )));
        }

        if data.len() < offset.saturating_add(length_size) {
            return Err(ParseError::Invalid(anyhow!(
                "Can't parse, buffer has too small size {}, offset {}",
                data.len(),
                offset
            )));
        }

        let remaining = data.len() - offset;
        let mut r = BitReader::new(&data[offset..]);
        let nal_size = r.read_bits_unchecked(length_size * 8) as usize;

        if remaining < nal_size.saturating_add(length_size) {
            return Err(ParseError::NoNalEnd);
        }

        let nalu_offset = offset + length_size;
        let header = NaluHeader::parse(&data[nalu_offset..nalu_offset + nal_size]).map_err(|e| {
            log::warn!("error parsing \"NAL unit header\": {:#}", e);
            ParseError::BrokenData(e.to_string())
        })?;

        Ok(Nalu {
            header,
            data,
            size: nal_size,
            offset: nalu_offset,
            sc_offset: offset,
        })
    }

    /// Whether this unit carries coded slice data.
    pub fn is_slice(&self) -> bool {
        matches!(
            self.header.type_,
            NaluType::Slice
                | NaluType::SliceDpa
                | NaluType::SliceDpb
                | NaluType::SliceDpc
                | NaluType::SliceIdr
        )
    }

    /// Whether this unit has an MVC header extension.
    pub fn is_mvc(&self) -> bool {
        self.header.mvc.is_some()
    }
}

impl<'a> AsRef<[u8]> for Nalu<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}

/// Iterates over the NAL units of a buffer. Iteration stops at the first
/// unit that cannot be located.
pub struct NalIterator<'a> {
    data: &'a [u8],
    offset: usize,
    format: NalFormat,
}

impl<'a> NalIterator<'a> {
    pub fn new(data: &'a [u8], format: NalFormat) -> Self {
        Self {
            data,
            offset: 0,
            format,
        }
    }
}

impl<'a> Iterator for NalIterator<'a> {
    type Item = Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let nalu = match self.format {
            NalFormat::AnnexB => match Nalu::next(self.data, self.offset) {
                // The last unit of the buffer has no start code after it.
                Err(ParseError::NoNalEnd) => Nalu::next_unchecked(self.data, self.offset),
                res => res,
            },
            NalFormat::Avc { length_size } => Nalu::next_avc(self.data, self.offset, length_size),
        }
        .ok()?;

        self.offset = nalu.offset + nalu.size;
        Some(nalu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNEX_B_STREAM: [u8; 20] = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0xaa, 0xbb, // 4-byte start code, SPS
        0x00, 0x00, 0x00, 0x01, 0x68, 0xcc, 0xdd, // 4-byte start code, PPS
        0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // 3-byte start code, IDR slice
    ];

    #[test]
    fn annex_b_units() {
        let nalu = Nalu::next(&ANNEX_B_STREAM, 0).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Sps);
        assert_eq!(nalu.header.ref_idc, 3);
        assert_eq!(nalu.sc_offset, 0);
        assert_eq!(nalu.offset, 4);
        assert_eq!(nalu.size, 3);
        assert_eq!(nalu.as_ref(), &[0x67, 0xaa, 0xbb]);

        let nalu = Nalu::next(&ANNEX_B_STREAM, 7).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Pps);
        assert_eq!(nalu.sc_offset, 7);
        assert_eq!(nalu.offset, 11);
        assert_eq!(nalu.size, 3);

        assert!(matches!(
            Nalu::next(&ANNEX_B_STREAM, 14),
            Err(ParseError::NoNalEnd)
        ));

        let nalu = Nalu::next_unchecked(&ANNEX_B_STREAM, 14).unwrap();
        assert_eq!(nalu.header.type_, NaluType::SliceIdr);
        assert!(nalu.header.idr_pic_flag);
        assert!(nalu.is_slice());
        assert_eq!(nalu.sc_offset, 14);
        assert_eq!(nalu.offset, 17);
        assert_eq!(nalu.size, 3);
    }

    #[test]
    fn iterate_annex_b() {
        let types = NalIterator::new(&ANNEX_B_STREAM, NalFormat::AnnexB)
            .map(|nalu| nalu.header.type_)
            .collect::<Vec<_>>();

        assert_eq!(
            types,
            vec![NaluType::Sps, NaluType::Pps, NaluType::SliceIdr]
        );
    }

    #[test]
    fn annex_b_errors() {
        assert!(matches!(Nalu::next(&[0xff; 8], 0), Err(ParseError::NoNal)));
        assert!(matches!(
            Nalu::next(&[0x00, 0x00, 0x01], 0),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            Nalu::next(&ANNEX_B_STREAM, 17),
            Err(ParseError::Invalid(_))
        ));

        // An access unit delimiter needs its primary_pic_type byte.
        const SHORT: [u8; 9] = [0x00, 0x00, 0x01, 0x09, 0x00, 0x00, 0x01, 0x09, 0xf0];
        assert!(matches!(
            Nalu::next(&SHORT, 0),
            Err(ParseError::BrokenData(_))
        ));
    }

    #[test]
    fn end_of_sequence_is_empty() {
        const STREAM: [u8; 8] = [0x00, 0x00, 0x01, 0x0a, 0x00, 0x00, 0x01, 0x0b];

        let nalu = Nalu::next(&STREAM, 0).unwrap();
        assert_eq!(nalu.header.type_, NaluType::SeqEnd);
        assert!(nalu.header.is_end());
        assert_eq!(nalu.size, 0);
        assert!(nalu.as_ref().is_empty());

        let nalus = NalIterator::new(&STREAM, NalFormat::AnnexB).collect::<Vec<_>>();
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[1].header.type_, NaluType::StreamEnd);
    }

    #[test]
    fn reserved_types_are_unknown() {
        const STREAM: [u8; 5] = [0x00, 0x00, 0x01, 0x17, 0x80];

        let nalu = Nalu::next_unchecked(&STREAM, 0).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Unknown);
        assert!(!nalu.is_slice());
    }

    #[test]
    fn mvc_header_extension() {
        // svc_extension_flag = 0, non_idr_flag = 0, priority_id = 5,
        // view_id = 3, temporal_id = 2, anchor_pic_flag = 1,
        // inter_view_flag = 1, reserved_one_bit.
        const STREAM: [u8; 8] = [0x00, 0x00, 0x01, 0x74, 0x05, 0x00, 0xd7, 0x88];

        let nalu = Nalu::next_unchecked(&STREAM, 0).unwrap();
        assert_eq!(nalu.header.type_, NaluType::SliceExt);
        assert_eq!(nalu.header.header_bytes, 4);
        assert!(nalu.header.idr_pic_flag);
        assert!(nalu.is_mvc());
        assert_eq!(
            nalu.header.mvc,
            Some(NaluHeaderMvc {
                non_idr_flag: false,
                priority_id: 5,
                view_id: 3,
                temporal_id: 2,
                anchor_pic_flag: true,
                inter_view_flag: true,
            })
        );

        // svc_extension_flag = 1.
        const SVC: [u8; 8] = [0x00, 0x00, 0x01, 0x74, 0x80, 0x00, 0x00, 0x88];
        let nalu = Nalu::next_unchecked(&SVC, 0).unwrap();
        assert_eq!(nalu.header.header_bytes, 4);
        assert!(!nalu.header.idr_pic_flag);
        assert!(!nalu.is_mvc());

        // Too short for the extension.
        const SHORT: [u8; 6] = [0x00, 0x00, 0x01, 0x6e, 0x80, 0x00];
        assert!(matches!(
            Nalu::next_unchecked(&SHORT, 0),
            Err(ParseError::BrokenData(_))
        ));
    }

    #[test]
    fn avc_units() {
        const STREAM: [u8; 13] = [
            0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84, // IDR slice
            0x00, 0x00, 0x00, 0x02, 0x41, 0x9a, // non-IDR slice
        ];

        let nalu = Nalu::next_avc(&STREAM, 0, 4).unwrap();
        assert_eq!(nalu.header.type_, NaluType::SliceIdr);
        assert_eq!(nalu.sc_offset, 0);
        assert_eq!(nalu.offset, 4);
        assert_eq!(nalu.size, 3);

        let nalu = Nalu::next_avc(&STREAM, 7, 4).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Slice);
        assert_eq!(nalu.header.ref_idc, 2);
        assert_eq!(nalu.offset, 11);
        assert_eq!(nalu.as_ref(), &[0x41, 0x9a]);

        assert!(matches!(
            Nalu::next_avc(&STREAM, 13, 4),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            Nalu::next_avc(&[0x00, 0x00, 0x00, 0x09, 0x65, 0x88], 0, 4),
            Err(ParseError::NoNalEnd)
        ));
        assert!(matches!(
            Nalu::next_avc(&[0x00, 0x00, 0x00, 0x00], 0, 4),
            Err(ParseError::BrokenData(_))
        ));
        assert!(matches!(
            Nalu::next_avc(&STREAM, 0, 3),
            Err(ParseError::Invalid(_))
        ));

        let nalu = Nalu::next_avc(&[0x00, 0x02, 0x09, 0xf0], 0, 2).unwrap();
        assert_eq!(nalu.header.type_, NaluType::AuDelimiter);

        let nalus = NalIterator::new(&STREAM, NalFormat::Avc { length_size: 4 })
            .map(|nalu| nalu.offset)
            .collect::<Vec<_>>();
        assert_eq!(nalus, vec![4, 11]);
    }
}
