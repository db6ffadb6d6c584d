// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Supplemental enhancement information, see Annex D of ITU-T H.264.
//! Only buffering period and picture timing payloads are interpreted.

use anyhow::anyhow;
use anyhow::Context;
use enumn::N;
use log::debug;
use log::warn;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::parser::HrdParams;
use crate::codec::h264::parser::ParseError;
use crate::codec::h264::parser::Parser;
use crate::codec::h264::parser::MAX_SPS_COUNT;

/// Table D-1 (partial).
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeiPayloadType {
    BufferingPeriod = 0,
    PicTiming = 1,
    PanScanRect = 2,
    FillerPayload = 3,
    UserDataRegistered = 4,
    UserDataUnregistered = 5,
    RecoveryPoint = 6,
    DecRefPicMarkingRepetition = 7,
    SparePic = 8,
    SceneInfo = 9,
    SubSeqInfo = 10,
    SubSeqLayerCharacteristics = 11,
    SubSeqCharacteristics = 12,
    FullFrameFreeze = 13,
    FullFrameFreezeRelease = 14,
    FullFrameSnapshot = 15,
    ProgressiveRefinementSegmentStart = 16,
    ProgressiveRefinementSegmentEnd = 17,
    MotionConstrainedSliceGroupSet = 18,
    FilmGrainCharacteristics = 19,
    DeblockingFilterDisplayPreference = 20,
    StereoVideoInfo = 21,
}

/// Table D-1, interpretation of `pic_struct`.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PicStruct {
    #[default]
    Frame = 0,
    TopField = 1,
    BottomField = 2,
    TopBottom = 3,
    BottomTop = 4,
    TopBottomTop = 5,
    BottomTopBottom = 6,
    FrameDoubling = 7,
    FrameTripling = 8,
}

impl PicStruct {
    /// `NumClockTS`, the number of clock timestamps in a picture timing
    /// message with this structure.
    pub fn num_clock_ts(&self) -> usize {
        match self {
            PicStruct::Frame | PicStruct::TopField | PicStruct::BottomField => 1,
            PicStruct::TopBottom | PicStruct::BottomTop | PicStruct::FrameDoubling => 2,
            PicStruct::TopBottomTop | PicStruct::BottomTopBottom | PicStruct::FrameTripling => 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferingPeriod {
    pub seq_parameter_set_id: u8,
    /// Indexed by `SchedSelIdx`. Only set when the SPS carries NAL HRD
    /// parameters.
    pub nal_initial_cpb_removal_delay: [u32; 32],
    pub nal_initial_cpb_removal_delay_offset: [u32; 32],
    /// Indexed by `SchedSelIdx`. Only set when the SPS carries VCL HRD
    /// parameters.
    pub vcl_initial_cpb_removal_delay: [u32; 32],
    pub vcl_initial_cpb_removal_delay_offset: [u32; 32],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    pub ct_type: u8,
    pub nuit_field_based_flag: bool,
    pub counting_type: u8,
    pub full_timestamp_flag: bool,
    pub discontinuity_flag: bool,
    pub cnt_dropped_flag: bool,
    pub n_frames: u8,
    pub seconds_flag: bool,
    pub seconds_value: u8,
    pub minutes_flag: bool,
    pub minutes_value: u8,
    pub hours_flag: bool,
    pub hours_value: u8,
    /// Zero when the HRD signals no `time_offset_length`.
    pub time_offset: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicTiming {
    pub cpb_removal_delay: u32,
    pub dpb_output_delay: u32,
    pub pic_struct_present_flag: bool,
    pub pic_struct: PicStruct,
    /// Only the first `pic_struct.num_clock_ts()` entries are meaningful.
    pub clock_timestamp_flag: [bool; 3],
    pub clock_timestamp: [ClockTimestamp; 3],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeiPayload {
    BufferingPeriod(BufferingPeriod),
    PicTiming(PicTiming),
    /// A payload that is skipped over.
    Unknown { payload_type: u32, size: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    /// Size of the payload in bytes, as signaled or clamped to the end of the
    /// NAL unit.
    pub payload_size: u32,
    pub payload: SeiPayload,
}

/// Reads a `payloadType` or `payloadSize` value: a run of 0xff bytes, each
/// adding 255, then a final byte.
fn read_ff_coded(r: &mut NaluReader) -> anyhow::Result<u32> {
    let mut value = 0u32;

    loop {
        let byte: u32 = r.read_bits(8)?;
        value = value
            .checked_add(byte)
            .ok_or_else(|| anyhow!("SEI value overflow"))?;

        if byte != 0xff {
            return Ok(value);
        }
    }
}

/// Reads a two's complement value of `num_bits` bits.
fn read_signed(r: &mut NaluReader, num_bits: usize) -> anyhow::Result<i32> {
    if num_bits == 0 {
        return Ok(0);
    }

    let value: u32 = r.read_bits(num_bits)?;
    let shift = 32 - num_bits as u32;

    Ok(((value << shift) as i32) >> shift)
}

fn parse_initial_cpb_removal_delays(
    r: &mut NaluReader,
    hrd: &HrdParams,
    delay: &mut [u32; 32],
    offset: &mut [u32; 32],
) -> anyhow::Result<()> {
    let num_bits = usize::from(hrd.initial_cpb_removal_delay_length_minus1) + 1;

    for sched_sel_idx in 0..=usize::from(hrd.cpb_cnt_minus1) {
        delay[sched_sel_idx] = r.read_bits(num_bits)?;
        offset[sched_sel_idx] = r.read_bits(num_bits)?;
    }

    Ok(())
}

fn parse_clock_timestamp(
    r: &mut NaluReader,
    time_offset_length: u8,
) -> anyhow::Result<ClockTimestamp> {
    let mut ts = ClockTimestamp {
        ct_type: r.read_bits(2)?,
        nuit_field_based_flag: r.read_bit()?,
        counting_type: r.read_bits(5)?,
        full_timestamp_flag: r.read_bit()?,
        discontinuity_flag: r.read_bit()?,
        cnt_dropped_flag: r.read_bit()?,
        n_frames: r.read_bits(8)?,
        ..Default::default()
    };

    if ts.full_timestamp_flag {
        ts.seconds_flag = true;
        ts.seconds_value = r.read_bits(6)?;
        ts.minutes_flag = true;
        ts.minutes_value = r.read_bits(6)?;
        ts.hours_flag = true;
        ts.hours_value = r.read_bits(5)?;
    } else {
        ts.seconds_flag = r.read_bit()?;
        if ts.seconds_flag {
            ts.seconds_value = r.read_bits(6)?;
            ts.minutes_flag = r.read_bit()?;
            if ts.minutes_flag {
                ts.minutes_value = r.read_bits(6)?;
                ts.hours_flag = r.read_bit()?;
                if ts.hours_flag {
                    ts.hours_value = r.read_bits(5)?;
                }
            }
        }
    }

    ts.time_offset = read_signed(r, usize::from(time_offset_length))?;

    Ok(ts)
}

impl Parser {
    fn parse_buffering_period(&self, r: &mut NaluReader) -> anyhow::Result<BufferingPeriod> {
        let mut bp = BufferingPeriod {
            seq_parameter_set_id: r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?,
            ..Default::default()
        };

        let sps = self.get_sps(bp.seq_parameter_set_id).ok_or_else(|| {
            warn!(
                "couldn't find associated sequence parameter set with id: {}",
                bp.seq_parameter_set_id
            );
            ParseError::BrokenLink(format!(
                "buffering period references SPS {} that has not been successfully parsed",
                bp.seq_parameter_set_id
            ))
        })?;

        if sps.vui_parameters_present_flag {
            let vui = &sps.vui_parameters;

            if vui.nal_hrd_parameters_present_flag {
                parse_initial_cpb_removal_delays(
                    r,
                    &vui.nal_hrd_parameters,
                    &mut bp.nal_initial_cpb_removal_delay,
                    &mut bp.nal_initial_cpb_removal_delay_offset,
                )
                .context("NAL initial CPB removal delays")?;
            }

            if vui.vcl_hrd_parameters_present_flag {
                parse_initial_cpb_removal_delays(
                    r,
                    &vui.vcl_hrd_parameters,
                    &mut bp.vcl_initial_cpb_removal_delay,
                    &mut bp.vcl_initial_cpb_removal_delay_offset,
                )
                .context("VCL initial CPB removal delays")?;
            }
        }

        Ok(bp)
    }

    fn parse_pic_timing(&self, r: &mut NaluReader) -> anyhow::Result<PicTiming> {
        let sps = self
            .last_sps()
            .ok_or_else(|| anyhow!("Picture timing SEI without an active SPS"))?;

        let mut pt = PicTiming::default();
        if !sps.vui_parameters_present_flag {
            return Ok(pt);
        }

        let vui = &sps.vui_parameters;
        let hrd = if vui.nal_hrd_parameters_present_flag {
            Some(&vui.nal_hrd_parameters)
        } else if vui.vcl_hrd_parameters_present_flag {
            Some(&vui.vcl_hrd_parameters)
        } else {
            None
        };

        if let Some(hrd) = hrd {
            pt.cpb_removal_delay =
                r.read_bits(usize::from(hrd.cpb_removal_delay_length_minus1) + 1)?;
            pt.dpb_output_delay =
                r.read_bits(usize::from(hrd.dpb_output_delay_length_minus1) + 1)?;
        }

        pt.pic_struct_present_flag = vui.pic_struct_present_flag;
        if pt.pic_struct_present_flag {
            let pic_struct: u8 = r.read_bits(4)?;
            pt.pic_struct = PicStruct::n(pic_struct)
                .with_context(|| format!("Invalid pic_struct {}", pic_struct))?;

            let time_offset_length = hrd.map_or(0, |hrd| hrd.time_offset_length);

            for i in 0..pt.pic_struct.num_clock_ts() {
                pt.clock_timestamp_flag[i] = r.read_bit()?;
                if pt.clock_timestamp_flag[i] {
                    pt.clock_timestamp[i] = parse_clock_timestamp(r, time_offset_length)
                        .with_context(|| format!("Clock timestamp {}", i))?;
                }
            }
        }

        Ok(pt)
    }

    fn parse_sei_message(&self, r: &mut NaluReader) -> anyhow::Result<SeiMessage> {
        let payload_type = read_ff_coded(r).context("SEI payload type")?;
        let mut payload_size = read_ff_coded(r).context("SEI payload size")?;

        let available = u32::try_from(r.num_bits_left() / 8).unwrap_or(u32::MAX);
        if payload_size > available {
            debug!(
                "SEI payload size {} exceeds the remaining {} bytes, clamping",
                payload_size, available
            );
            payload_size = available;
        }

        debug!("SEI message type {}, size {}", payload_type, payload_size);

        let start = r.position();
        let payload = match SeiPayloadType::n(payload_type) {
            Some(SeiPayloadType::BufferingPeriod) => SeiPayload::BufferingPeriod(
                self.parse_buffering_period(r)
                    .context("Buffering period")?,
            ),
            Some(SeiPayloadType::PicTiming) => {
                SeiPayload::PicTiming(self.parse_pic_timing(r).context("Picture timing")?)
            }
            _ => SeiPayload::Unknown {
                payload_type,
                size: payload_size,
            },
        };

        let payload_bits = 8 * payload_size as usize;
        let consumed = r.position() - start;
        if consumed > payload_bits {
            return Err(anyhow!(
                "SEI payload of type {} is {} bits long, but only {} bytes were signaled",
                payload_type,
                consumed,
                payload_size
            ));
        }

        r.skip_bits(payload_bits - consumed)?;

        Ok(SeiMessage {
            payload_type,
            payload_size,
            payload,
        })
    }

    /// Parses all the messages of a SEI NAL unit. Picture timing messages are
    /// interpreted against the last parsed SPS, buffering period messages
    /// against the SPS they reference.
    pub fn parse_sei(&self, nalu: &Nalu) -> Result<Vec<SeiMessage>, ParseError> {
        debug!("parsing SEI");

        if nalu.header.type_ != NaluType::Sei {
            return Err(ParseError::Invalid(anyhow!(
                "Invalid NALU type, expected {:?}, got {:?}",
                NaluType::Sei,
                nalu.header.type_
            )));
        }

        Parser::rbsp_reader(nalu)
            .and_then(|mut r| {
                let mut messages = Vec::new();

                while r.has_more_rbsp_data() {
                    messages.push(self.parse_sei_message(&mut r)?);
                }

                Ok(messages)
            })
            .map_err(|e| {
                warn!(
                    "error parsing \"Supplemental enhancement information\": {:#}",
                    e
                );
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::parser::tests::nalus;
    use crate::codec::h264::parser::tests::write_sps_body;
    use crate::codec::h264::parser::tests::TestWriter;

    fn write_hrd(w: &mut TestWriter) {
        // cpb_cnt_minus1, bit_rate_scale, cpb_size_scale
        w.write_ue(1u32).unwrap();
        w.write_u(4, 4u8).unwrap();
        w.write_u(4, 6u8).unwrap();
        for (bit_rate, cpb_size, cbr) in [(1000u32, 2000u32, false), (500, 800, true)] {
            w.write_ue(bit_rate).unwrap();
            w.write_ue(cpb_size).unwrap();
            w.write_f(1, cbr).unwrap();
        }
        // initial_cpb_removal_delay_length_minus1, cpb_removal_delay_length_minus1,
        // dpb_output_delay_length_minus1, time_offset_length
        w.write_u(5, 23u8).unwrap();
        w.write_u(5, 15u8).unwrap();
        w.write_u(5, 7u8).unwrap();
        w.write_u(5, 10u8).unwrap();
    }

    /// SPS 0 with NAL HRD parameters and pic_struct_present_flag.
    fn write_sps_with_hrd(w: &mut TestWriter) {
        w.write_header(3, NaluType::Sps as u8).unwrap();
        write_sps_body(w, 77, 0, 20, 15);
        w.write_f(1, true).unwrap();
        // aspect ratio, overscan, video signal type, chroma location
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
        // timing info
        w.write_f(1, true).unwrap();
        w.write_u(32, 1u32).unwrap();
        w.write_u(32, 50u32).unwrap();
        w.write_f(1, true).unwrap();
        // nal_hrd_parameters_present_flag
        w.write_f(1, true).unwrap();
        write_hrd(w);
        // vcl_hrd_parameters_present_flag, low_delay_hrd_flag
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
        // pic_struct_present_flag, bitstream_restriction_flag
        w.write_f(1, true).unwrap();
        w.write_f(1, false).unwrap();
        w.write_trailing_bits().unwrap();
    }

    fn pad_to_byte(w: &mut TestWriter) {
        while !w.aligned() {
            w.write_f(1, false).unwrap();
        }
    }

    #[test]
    fn parse_sei_messages() {
        let _ = env_logger::try_init();

        let mut buf = Vec::new();
        {
            let mut w = TestWriter::new(&mut buf, true);
            write_sps_with_hrd(&mut w);

            w.write_header(0, NaluType::Sei as u8).unwrap();

            // Buffering period, 97 bits.
            w.write_u(8, 0u8).unwrap();
            w.write_u(8, 13u8).unwrap();
            w.write_ue(0u32).unwrap();
            for (delay, offset) in [(90000u32, 0u32), (45000, 100)] {
                w.write_u(24, delay).unwrap();
                w.write_u(24, offset).unwrap();
            }
            pad_to_byte(&mut w);

            // Picture timing, 76 bits.
            w.write_u(8, 1u8).unwrap();
            w.write_u(8, 10u8).unwrap();
            w.write_u(16, 600u16).unwrap();
            w.write_u(8, 3u8).unwrap();
            // pic_struct: top, bottom
            w.write_u(4, 3u8).unwrap();
            w.write_f(1, true).unwrap();
            // ct_type, nuit_field_based_flag, counting_type
            w.write_u(2, 1u8).unwrap();
            w.write_f(1, true).unwrap();
            w.write_u(5, 0u8).unwrap();
            // full_timestamp_flag, discontinuity_flag, cnt_dropped_flag
            w.write_f(1, true).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, false).unwrap();
            w.write_u(8, 12u8).unwrap();
            w.write_u(6, 30u8).unwrap();
            w.write_u(6, 15u8).unwrap();
            w.write_u(5, 2u8).unwrap();
            // time_offset: -3
            w.write_u(10, 1021u16).unwrap();
            w.write_f(1, false).unwrap();
            pad_to_byte(&mut w);

            // User data with a type that needs two bytes.
            w.write_u(8, 0xffu8).unwrap();
            w.write_u(8, 45u8).unwrap();
            w.write_u(8, 2u8).unwrap();
            w.write_u(16, 0xbeefu16).unwrap();

            w.write_trailing_bits().unwrap();
        }

        let nalus = nalus(&buf);
        assert_eq!(nalus.len(), 2);

        let mut parser = Parser::default();
        parser.parse_nal(&nalus[0]).unwrap();

        let sps = parser.get_sps(0).unwrap();
        let hrd = &sps.vui_parameters.nal_hrd_parameters;
        assert_eq!(hrd.cpb_cnt_minus1, 1);
        assert_eq!(hrd.bit_rate_value_minus1[1], 500);
        assert!(hrd.cbr_flag[1]);
        assert_eq!(hrd.time_offset_length, 10);
        // Frame rate is unknown with pic_struct_present_flag.
        assert_eq!((sps.fps_num, sps.fps_den), (0, 1));

        let messages = parser.parse_sei(&nalus[1]).unwrap();
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].payload_type, 0);
        assert_eq!(messages[0].payload_size, 13);
        let SeiPayload::BufferingPeriod(bp) = &messages[0].payload else {
            panic!("unexpected payload {:?}", messages[0].payload);
        };
        assert_eq!(bp.seq_parameter_set_id, 0);
        assert_eq!(bp.nal_initial_cpb_removal_delay[..2], [90000, 45000]);
        assert_eq!(bp.nal_initial_cpb_removal_delay_offset[..2], [0, 100]);
        assert_eq!(bp.vcl_initial_cpb_removal_delay, [0; 32]);

        assert_eq!(messages[1].payload_type, 1);
        let SeiPayload::PicTiming(pt) = &messages[1].payload else {
            panic!("unexpected payload {:?}", messages[1].payload);
        };
        assert_eq!(pt.cpb_removal_delay, 600);
        assert_eq!(pt.dpb_output_delay, 3);
        assert!(pt.pic_struct_present_flag);
        assert_eq!(pt.pic_struct, PicStruct::TopBottom);
        assert_eq!(pt.clock_timestamp_flag, [true, false, false]);
        assert_eq!(
            pt.clock_timestamp[0],
            ClockTimestamp {
                ct_type: 1,
                nuit_field_based_flag: true,
                counting_type: 0,
                full_timestamp_flag: true,
                discontinuity_flag: false,
                cnt_dropped_flag: false,
                n_frames: 12,
                seconds_flag: true,
                seconds_value: 30,
                minutes_flag: true,
                minutes_value: 15,
                hours_flag: true,
                hours_value: 2,
                time_offset: -3,
            }
        );
        assert_eq!(pt.clock_timestamp[1], ClockTimestamp::default());

        assert_eq!(
            messages[2],
            SeiMessage {
                payload_type: 300,
                payload_size: 2,
                payload: SeiPayload::Unknown {
                    payload_type: 300,
                    size: 2
                },
            }
        );
    }

    #[test]
    fn sei_errors() {
        let _ = env_logger::try_init();

        let mut buf = Vec::new();
        {
            let mut w = TestWriter::new(&mut buf, true);

            // Buffering period for SPS 4.
            w.write_header(0, NaluType::Sei as u8).unwrap();
            w.write_u(8, 0u8).unwrap();
            w.write_u(8, 1u8).unwrap();
            w.write_ue(4u32).unwrap();
            pad_to_byte(&mut w);
            w.write_trailing_bits().unwrap();

            // Picture timing.
            w.write_header(0, NaluType::Sei as u8).unwrap();
            w.write_u(8, 1u8).unwrap();
            w.write_u(8, 1u8).unwrap();
            w.write_u(8, 0u8).unwrap();
            w.write_trailing_bits().unwrap();

            write_sps_with_hrd(&mut w);

            // Buffering period overrunning its declared size.
            w.write_header(0, NaluType::Sei as u8).unwrap();
            w.write_u(8, 0u8).unwrap();
            w.write_u(8, 1u8).unwrap();
            w.write_ue(0u32).unwrap();
            for _ in 0..4 {
                w.write_u(24, 0x123456u32).unwrap();
            }
            pad_to_byte(&mut w);
            w.write_trailing_bits().unwrap();
        }

        let nalus = nalus(&buf);
        assert_eq!(nalus.len(), 4);

        let mut parser = Parser::default();
        assert!(matches!(
            parser.parse_sei(&nalus[0]),
            Err(ParseError::BrokenLink(_))
        ));
        assert!(matches!(
            parser.parse_sei(&nalus[1]),
            Err(ParseError::Invalid(_))
        ));

        parser.parse_nal(&nalus[2]).unwrap();
        assert!(matches!(
            parser.parse_sei(&nalus[3]),
            Err(ParseError::Invalid(_))
        ));
        // Not a SEI.
        assert!(matches!(
            parser.parse_sei(&nalus[2]),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn sei_size_is_clamped() {
        let mut buf = Vec::new();
        {
            let mut w = TestWriter::new(&mut buf, true);
            w.write_header(0, NaluType::Sei as u8).unwrap();
            w.write_u(8, 5u8).unwrap();
            w.write_u(8, 200u8).unwrap();
            w.write_u(16, 0x1234u16).unwrap();
            w.write_trailing_bits().unwrap();
        }

        let nalus = nalus(&buf);
        let parser = Parser::default();
        let messages = parser.parse_sei(&nalus[0]).unwrap();

        // Two payload bytes and the trailing bits.
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload_size, 3);
        assert_eq!(
            messages[0].payload,
            SeiPayload::Unknown {
                payload_type: 5,
                size: 3
            }
        );
    }

    #[test]
    fn clock_ts_count() {
        let counts = (0..=8)
            .map(|i| PicStruct::n(i as u8).unwrap().num_clock_ts())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![1, 1, 1, 2, 2, 3, 3, 2, 3]);
        assert!(PicStruct::n(9u8).is_none());
    }

    #[test]
    fn signed_values() {
        let data = [0b1111_1101, 0b0111_0000];
        let mut r = NaluReader::new(&data);
        assert_eq!(read_signed(&mut r, 0).unwrap(), 0);
        assert_eq!(read_signed(&mut r, 8).unwrap(), -3);
        assert_eq!(read_signed(&mut r, 4).unwrap(), 7);
    }
}
