// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Can't reasonably expect client code to consume everything that has been parsed.
#![allow(dead_code)]

use anyhow::anyhow;
use anyhow::Context;
use enumn::N;
use log::debug;
use log::warn;
use thiserror::Error;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::Resolution;

pub(super) const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 13, 20, 20, 20, 28, 28, 28, 28, 32, 32, 32, 37, 37, 42,
];

pub(super) const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 14, 20, 20, 20, 24, 24, 24, 24, 27, 27, 27, 30, 30, 34,
];

pub(super) const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 10, 13, 11, 13, 16, 16, 16, 16, 18, 18, 18, 18, 18, 23, 23, 23, 23, 23, 23, 25, 25, 25,
    25, 25, 25, 25, 27, 27, 27, 27, 27, 27, 27, 27, 29, 29, 29, 29, 29, 29, 29, 31, 31, 31, 31, 31,
    31, 33, 33, 33, 33, 33, 36, 36, 36, 36, 38, 38, 38, 40, 40, 42,
];

pub(super) const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 13, 15, 13, 15, 17, 17, 17, 17, 19, 19, 19, 19, 19, 21, 21, 21, 21, 21, 21, 22, 22, 22,
    22, 22, 22, 22, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 27, 27, 27, 27, 27,
    27, 28, 28, 28, 28, 28, 30, 30, 30, 30, 32, 32, 32, 33, 33, 35,
];

pub const MAX_SPS_COUNT: usize = 32;
pub const MAX_PPS_COUNT: usize = 256;

/// The maximum number of pictures in the DPB, as per A.3.1, clause h)
const DPB_MAX_SIZE: u32 = 16;

/// Largest `view_id` allowed by H.7.4.1.2.5.
const MAX_VIEW_ID: u32 = 1023;

/// Maximum number of entries in a reference picture list modification.
const MAX_REF_PIC_LIST_MODIFICATIONS: usize = 32;

/// Table E-1, indexed by `aspect_ratio_idc`.
const ASPECT_RATIOS: [(u16, u16); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// `aspect_ratio_idc` value signaling an explicit `sar_width:sar_height`.
const EXTENDED_SAR: u8 = 255;

/// Outcome of a failed locate or parse call.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The data is corrupt, e.g. a NAL unit header that cannot be parsed.
    #[error("broken data: {0}")]
    BrokenData(String),
    /// A parameter set that was never successfully parsed is referenced.
    #[error("broken link: {0}")]
    BrokenLink(String),
    #[error("{0:#}")]
    Invalid(anyhow::Error),
    #[error("no NAL unit found")]
    NoNal,
    #[error("NAL unit start found, but no end")]
    NoNalEnd,
}

impl From<anyhow::Error> for ParseError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ParseError>() {
            Ok(err) => err,
            Err(err) => ParseError::Invalid(err),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub modification_of_pic_nums_idc: u8,
    /* if modification_of_pic_nums_idc == 0 || 1 */
    pub abs_diff_pic_num_minus1: u32,
    /* if modification_of_pic_nums_idc == 2 */
    pub long_term_pic_num: u32,
    /* if modification_of_pic_nums_idc == 4 || 5 */
    pub abs_diff_view_idx_minus1: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,

    pub luma_weight_l0: [i16; 32],
    pub luma_offset_l0: [i8; 32],

    /* if seq->ChromaArrayType != 0 */
    pub chroma_weight_l0: [[i16; 2]; 32],
    pub chroma_offset_l0: [[i8; 2]; 32],

    /* if slice->slice_type % 5 == 1 */
    pub luma_weight_l1: [i16; 32],
    pub luma_offset_l1: [i8; 32],

    /* and if seq->ChromaArrayType != 0 */
    pub chroma_weight_l1: [[i16; 2]; 32],
    pub chroma_offset_l1: [[i8; 2]; 32],
}

/// Representation of `MaxLongTermFrameIdx`.
///
/// `MaxLongTermFrameIdx` is derived from `max_long_term_frame_idx_plus1`, an unsigned integer with
/// a special value indicating "no long-term frame indices". This type allows easy conversion
/// between the actual and "plus1" representation, while ensuring that the special value is always
/// handled by the code.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxLongTermFrameIdx {
    #[default]
    NoLongTermFrameIndices,
    Idx(u32),
}

impl MaxLongTermFrameIdx {
    /// Create a value from `max_long_term_frame_idx_plus1`.
    pub fn from_value_plus1(max_long_term_frame_idx_plus1: u32) -> Self {
        match max_long_term_frame_idx_plus1 {
            0 => Self::NoLongTermFrameIndices,
            i @ 1.. => Self::Idx(i - 1),
        }
    }

    /// Convert this value to the representation used by `max_long_term_frame_idx_plus1`.
    pub fn to_value_plus1(self) -> u32 {
        match self {
            Self::NoLongTermFrameIndices => 0,
            Self::Idx(i) => i + 1,
        }
    }
}

impl PartialEq<u32> for MaxLongTermFrameIdx {
    fn eq(&self, other: &u32) -> bool {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => false,
            MaxLongTermFrameIdx::Idx(idx) => idx.eq(other),
        }
    }
}

impl PartialOrd<u32> for MaxLongTermFrameIdx {
    fn partial_cmp(&self, other: &u32) -> Option<std::cmp::Ordering> {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => Some(std::cmp::Ordering::Less),
            MaxLongTermFrameIdx::Idx(idx) => Some(idx.cmp(other)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarkingInner {
    /// Specifies a control operation to be applied to affect the reference
    /// picture marking. The `memory_management_control_operation` syntax element
    /// is followed by data necessary for the operation specified by the value
    /// of `memory_management_control_operation`. The values and control
    /// operations associated with `memory_management_control_operation` are
    /// specified in Table 7-9
    pub memory_management_control_operation: u8,

    /// Used (with memory_management_control_operation equal to 3 or 1) to
    /// assign a long-term frame index to a short-term reference picture or to
    /// mark a short-term reference picture as "unused for reference".
    pub difference_of_pic_nums_minus1: u32,

    /// Used (with memory_management_control_operation equal to 2) to mark a
    /// long-term reference picture as "unused for reference".
    pub long_term_pic_num: u32,

    /// Used (with memory_management_control_operation equal to 3 or 6) to
    /// assign a long-term frame index to a picture.
    pub long_term_frame_idx: u32,

    /// Specifies the maximum value of long-term frame index allowed for
    /// long-term reference pictures (until receipt of another value of
    /// `max_long_term_frame_idx_plus1`).
    pub max_long_term_frame_idx: MaxLongTermFrameIdx,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarking {
    /// Specifies how the previously-decoded pictures in the decoded picture
    /// buffer are treated after decoding of an IDR picture. See Annex C.
    pub no_output_of_prior_pics_flag: bool,

    /// If unset, specifies that the MaxLongTermFrameIdx variable is set equal
    /// to "no long-term frame indices" and that the IDR picture is marked as
    /// "used for short-term reference". If set, specifies that the
    /// MaxLongTermFrameIdx variable is set equal to 0 and that the current IDR
    /// picture is marked "used for long-term reference" and is assigned
    /// LongTermFrameIdx equal to 0.
    pub long_term_reference_flag: bool,

    /// Selects the reference picture marking mode of the currently decoded
    /// picture as specified in Table 7-8.
    pub adaptive_ref_pic_marking_mode_flag: bool,

    /// The memory management control operations, without the terminating
    /// operation 0.
    pub inner: Vec<RefPicMarkingInner>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    /// Specifies the address of the first macroblock in the slice.
    pub first_mb_in_slice: u32,

    /// Specifies the coding type of the slice according to Table 7-6.
    pub slice_type: SliceType,

    // Specifies the picture parameter set in use
    pub pic_parameter_set_id: u8,

    /// Specifies the colour plane associated with the current slice RBSP when
    /// `separate_colour_plane_flag` is set.
    pub colour_plane_id: u8,

    /// Used as an identifier for pictures and shall be represented by
    /// `log2_max_frame_num_minus4 + 4` bits in the bitstream.
    pub frame_num: u16,

    /// If set, specifies that the slice is a slice of a coded field. If not
    /// set, specifies that the slice is a slice of a coded frame.
    pub field_pic_flag: bool,

    /// If set, specifies that the slice is part of a coded bottom field. If not
    /// set, specifies that the picture is a coded top field.
    pub bottom_field_flag: bool,

    /// Identifies an IDR picture. The values of `idr_pic_id` in all the slices
    /// of an IDR picture shall remain unchanged. When two consecutive access
    /// units in decoding order are both IDR access units, the value of
    /// `idr_pic_id` in the slices of the first such IDR access unit shall
    /// differ from the `idr_pic_id` in the second such IDR access unit
    pub idr_pic_id: u16,

    /// Specifies the picture order count modulo `MaxPicOrderCntLsb` for the top
    /// field of a coded frame or for a coded field. The length of the
    /// `pic_order_cnt_lsb` syntax element is
    /// `log2_max_pic_order_cnt_lsb_minus4` + 4 bits.
    pub pic_order_cnt_lsb: u16,

    ///  Specifies the picture order count difference between the bottom field
    ///  and the top field of a coded frame as follows
    pub delta_pic_order_cnt_bottom: i32,

    /// The first entry specifies the picture order count difference from the
    /// expected picture order count for the top field of a coded frame or for a
    /// coded field as specified in clause 8.2.1 The second entry  specifies the
    /// picture order count difference from the expected picture order count for
    /// the bottom field of a coded frame specified in clause 8.2.1.
    pub delta_pic_order_cnt: [i32; 2],

    /// Size in bits of the picture order count syntax elements of this header.
    pub pic_order_cnt_bit_size: usize,

    /// Shall be equal to 0 for slices and slice data partitions belonging to
    /// the primary coded picture. The value of `redundant_pic_cnt shall` be
    /// greater than 0 for coded slices or coded slice data partitions of a
    /// redundant coded picture
    pub redundant_pic_cnt: u8,

    /// Specifies the method used in the decoding process to derive motion
    /// vectors and reference indices for inter prediction >
    pub direct_spatial_mv_pred_flag: bool,

    /// If set, specifies that the syntax element `num_ref_idx_l0_active_minus1`
    /// is present for P, SP, and B slices and that the syntax element
    /// `num_ref_idx_l1_active_minus1` is present for B slices. If not set,
    /// specifies that the syntax elements `num_ref_idx_l0_active_minus1` and
    /// `num_ref_idx_l1_active_minus1` are not present.
    pub num_ref_idx_active_override_flag: bool,

    /// Specifies the maximum reference index for reference picture list 0 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l0_active_minus1: u8,

    /// Specifies the maximum reference index for reference picture list 1 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l1_active_minus1: u8,

    /// If set, specifies that the syntax element `modification_of_pic_nums_idc`
    /// is present for specifying reference picture list 0. If not set,
    /// specifies that this syntax element is not present.
    pub ref_pic_list_modification_flag_l0: bool,

    /// Reference picture list 0 modification as parsed with the
    /// `ref_pic_list_modification()` process. The terminating operation is
    /// not stored.
    pub ref_pic_list_modification_l0: Vec<RefPicListModification>,

    /// If set, specifies that the syntax element `modification_of_pic_nums_idc`
    /// is present for specifying reference picture list 1. If not set,
    /// specifies that this syntax element is not present.
    pub ref_pic_list_modification_flag_l1: bool,

    /// Reference picture list 1 modification as parsed with the
    /// `ref_pic_list_modification()` process.
    pub ref_pic_list_modification_l1: Vec<RefPicListModification>,

    /// Prediction weight table as parsed using 7.3.3.2
    pub pred_weight_table: PredWeightTable,

    /// Decoded reference picture marking parsed using 7.3.3.3
    pub dec_ref_pic_marking: RefPicMarking,

    /// Size in bits of the `dec_ref_pic_marking()` syntax of this header.
    pub dec_ref_pic_marking_bit_size: usize,

    /// Specifies the index for determining the initialization table used in the
    /// initialization process for context variables.
    pub cabac_init_idc: u8,

    /// Specifies the initial value of QP Y to be used for all the macroblocks
    /// in the slice until modified by the value of `mb_qp_delta` in the
    /// macroblock layer. The initial QPY quantization parameter for the slice
    /// is computed using 7-30.
    pub slice_qp_delta: i8,

    /// Specifies the decoding process to be used to decode P macroblocks in an
    /// SP slice.
    pub sp_for_switch_flag: bool,

    /// Specifies the value of QSY for all the macroblocks in SP and SI slices.
    /// The QSY quantization parameter for the slice is computed using 7-31.
    pub slice_qs_delta: i8,

    /// Specifies whether the operation of the deblocking filter shall be
    /// disabled across some block edges of the slice and specifies for which
    /// edges the filtering is disabled.
    pub disable_deblocking_filter_idc: u8,

    /// Specifies the offset used in accessing the α and tC0 deblocking filter
    /// tables for filtering operations controlled by the macroblocks within the
    /// slice. From this value, the offset that shall be applied when addressing
    /// these tables shall be computed using 7-32.
    pub slice_alpha_c0_offset_div2: i8,

    /// Specifies the offset used in accessing the β deblocking filter table for
    /// filtering operations controlled by the macroblocks within the slice.
    /// From this value, the offset that is applied when addressing the β table
    /// of the deblocking filter shall be computed using 7-33.
    pub slice_beta_offset_div2: i8,

    /// Used with the slice group map types 3 to 5 to derive the number of
    /// slice group map units in slice group 0.
    pub slice_group_change_cycle: u32,

    /// Same as `MaxPicNum` in ITU-T H.264.
    pub max_pic_num: u32,

    /// Size of the slice_header() in bits, emulation prevention bytes
    /// excluded.
    pub header_bit_size: usize,

    /// Number of emulation prevention bytes (EPB) in this slice_header()
    pub n_emulation_prevention_bytes: usize,

    /// Size of the NAL unit header preceding this slice_header(), in bytes.
    pub nal_header_bytes: usize,
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
/// See table 7-6 in ITU-T H.264.
pub enum SliceType {
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-6 in ITU-T H.264.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-6 in ITU-T H.264.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-6 in ITU-T H.264.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice. See table 7-6 in ITU-T H.264.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice. See table 7-6 in ITU-T H.264.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }
}

impl Default for SliceType {
    fn default() -> Self {
        Self::P
    }
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Baseline = 66,
    Main = 77,
    Extended = 88,
    High = 100,
    High10 = 110,
    High422P = 122,
    High444P = 244,
    MultiviewHigh = 118,
    StereoHigh = 128,
}

/// `seq_parameter_set_mvc_extension()`, only present in subset SPSes of the
/// MVC profiles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsMvcExtension {
    /// One entry per view, `num_views_minus1 + 1` in total.
    pub views: Vec<SpsMvcView>,
    /// `num_level_values_signalled_minus1 + 1` entries.
    pub level_values: Vec<SpsMvcLevelValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsMvcView {
    pub view_id: u16,
    /// Inter-view references of anchor pictures. Always empty for view 0.
    pub anchor_refs_l0: Vec<u16>,
    pub anchor_refs_l1: Vec<u16>,
    /// Inter-view references of non-anchor pictures. Always empty for view 0.
    pub non_anchor_refs_l0: Vec<u16>,
    pub non_anchor_refs_l1: Vec<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsMvcLevelValue {
    pub level_idc: u8,
    pub applicable_ops: Vec<SpsMvcOperationPoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsMvcOperationPoint {
    pub temporal_id: u8,
    pub target_view_ids: Vec<u16>,
    pub num_views_minus1: u16,
}

/// A H264 Sequence Parameter Set. A syntax structure containing syntax elements
/// that apply to zero or more entire coded video sequences as determined by the
/// content of a seq_parameter_set_id syntax element found in the picture
/// parameter set referred to by the pic_parameter_set_id syntax element found
/// in each slice header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    /// Identifies the sequence parameter set that is referred to by the picture
    /// parameter set
    pub seq_parameter_set_id: u8,

    /// Profile to which the coded video sequence conforms
    pub profile_idc: u8,

    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set0_flag: bool,
    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set1_flag: bool,
    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set2_flag: bool,
    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set3_flag: bool,
    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set4_flag: bool,
    /// Retains the same meaning as in ITU-T H.264. See 7.4.2.1.1
    pub constraint_set5_flag: bool,

    /// Level to which the coded video sequence conforms, as signaled.
    pub level_idc: u8,

    /// Specifies the chroma sampling relative to the luma sampling as specified
    /// in clause 6.2.
    pub chroma_format_idc: u8,

    /// Specifies whether the three colour components of the 4:4:4 chroma format
    /// are coded separately.
    pub separate_colour_plane_flag: bool,

    /// Specifies the bit depth of the samples of the luma array and the value
    /// of the luma quantization parameter range offset QpBdOffsetY. See 7-3 and
    /// 7-4.
    pub bit_depth_luma_minus8: u8,

    /// Specifies the bit depth of the samples of the chroma arrays and the
    /// value of the chroma quantization parameter range offset QpBdOffsetC. See
    /// 7-5 and 7-6.
    pub bit_depth_chroma_minus8: u8,

    /// qpprime_y_zero_transform_bypass_flag equal to 1 specifies that, when
    /// QP′Y is equal to 0, a transform bypass operation for the transform
    /// coefficient decoding process and picture construction process prior to
    /// deblocking filter process as specified in clause 8.5 shall be applied.
    /// qpprime_y_zero_transform_bypass_flag equal to 0 specifies that the
    /// transform coefficient decoding process and picture construction process
    /// prior to deblocking filter process shall not use the transform bypass
    /// operation
    /// QP′Y is defined in 7-38 as QP′Y = QPY + QpBdOffsetY
    pub qpprime_y_zero_transform_bypass_flag: bool,

    /// Whether `seq_scaling_list_present_flag[i]` for i = 0..7 or i = 0..11 is
    /// present or whether the sequence level scaling list shall be specified by
    /// Flat_4x4_16 for i = 0..5 and flat_8x8_16 for i = 6..11
    pub seq_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1, in zigzag scan order.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1, in zigzag scan order.
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the value of the variable MaxFrameNum that is used in
    /// frame_num related derivations as follows: MaxFrameNum = 2 ^
    /// (log2_max_frame_num_minus4 + 4 )
    pub log2_max_frame_num_minus4: u8,

    /// Specifies the method to decode picture order count (as specified in
    /// clause 8.2.1)
    pub pic_order_cnt_type: u8,

    /// Specifies the value of the variable MaxPicOrderCntLsb that is used in
    /// the decoding process for picture order count as specified in clause
    /// 8.2.1 as follows: MaxPicOrderCntLsb = 2 ^ (
    /// log2_max_pic_order_cnt_lsb_minus4 + 4 ).
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    /// If true, specifies that `delta_pic_order_cnt[0]` and
    /// `delta_pic_order_cnt[1]` are not present in the slice headers of the
    /// sequence and shall be inferred to be equal to 0.
    /// If false, specifies that `delta_pic_order_cnt[0]` is present in the
    /// slice headers of the sequence and `delta_pic_order_cnt[1]` may be
    /// present in the slice headers of the sequence.
    pub delta_pic_order_always_zero_flag: bool,

    /// Used to calculate the picture order count of a non-reference picture as
    /// specified in clause 8.2.1.
    pub offset_for_non_ref_pic: i32,

    /// Used to calculate the picture order count of a bottom field as specified
    /// in clause 8.2.1.
    pub offset_for_top_to_bottom_field: i32,

    /// Used in the decoding process for picture order count as specified in
    /// clause 8.2.1
    pub num_ref_frames_in_pic_order_cnt_cycle: u8,

    /// An element of a list of num_ref_frames_in_pic_order_cnt_cycle values
    /// used in the decoding process for picture order count as specified in
    /// clause 8.2.
    pub offset_for_ref_frame: [i32; 255],

    /// Specifies the maximum number of short-term and long-term reference
    /// frames, complementary reference field pairs, and non-paired reference
    /// fields that may be used by the decoding process for inter prediction of
    /// any picture in the coded video sequence. Also
    /// determines the size of the sliding window operation as specified in
    /// clause 8.2.5.3.
    pub max_num_ref_frames: u8,

    /// Specifies the allowed values of frame_num as specified in clause 7.4.3
    /// and the decoding process in case of an inferred gap between values of
    /// frame_num as specified in clause 8.2.5.2
    pub gaps_in_frame_num_value_allowed_flag: bool,

    /// Plus 1 specifies the width of each decoded picture in units of
    /// macroblocks.
    pub pic_width_in_mbs_minus1: u16,
    /// Plus 1 specifies the height in slice group map units of a decoded frame
    /// or field.
    pub pic_height_in_map_units_minus1: u16,

    /// If true,  specifies that every coded picture of the coded video sequence
    /// is a coded frame containing only frame macroblocks, else specifies that
    /// coded pictures of the coded video sequence may either be coded fields or
    /// coded frames.
    pub frame_mbs_only_flag: bool,

    /// If true, specifies the possible use of switching between frame and field
    /// macroblocks within frames, else, specifies no switching between frame
    /// and field macroblocks within a picture.
    pub mb_adaptive_frame_field_flag: bool,

    /// Specifies the method used in the derivation process for luma motion
    /// vectors for B_Skip, B_Direct_16x16 and B_Direct_8x8 as specified in
    /// clause 8.4.1.2.
    pub direct_8x8_inference_flag: bool,

    /// If true, specifies that the frame cropping offset parameters follow next
    /// in the sequence parameter, else specifies that the frame cropping offset
    /// parameters are not present
    pub frame_cropping_flag: bool,

    /// Specify the samples of the pictures in the coded video sequence that are
    /// output from the decoding process, in terms of a rectangular region
    /// specified in frame coordinates for output.
    pub frame_crop_left_offset: u32,
    /// Specify the samples of the pictures in the coded video sequence that are
    /// output from the decoding process, in terms of a rectangular region
    /// specified in frame coordinates for output.
    pub frame_crop_right_offset: u32,
    /// Specify the samples of the pictures in the coded video sequence that are
    /// output from the decoding process, in terms of a rectangular region
    /// specified in frame coordinates for output.
    pub frame_crop_top_offset: u32,
    /// Specify the samples of the pictures in the coded video sequence that are
    /// output from the decoding process, in terms of a rectangular region
    /// specified in frame coordinates for output.
    pub frame_crop_bottom_offset: u32,

    // Calculated
    /// Same as ExpectedDeltaPerPicOrderCntCycle, see 7-12 in ITU-T H.264.
    pub expected_delta_per_pic_order_cnt_cycle: i32,

    pub vui_parameters_present_flag: bool,
    /// Left at its defaults when VUI parsing is disabled.
    pub vui_parameters: VuiParams,

    /// Width of the cropped picture, in samples.
    pub width: u32,
    /// Height of the cropped picture, in samples.
    pub height: u32,

    /// Frame rate numerator. Zero if the frame rate is unknown.
    pub fps_num: u32,
    /// Frame rate denominator.
    pub fps_den: u32,

    /// MVC extension, only set for subset SPSes.
    pub extension: Option<SpsMvcExtension>,
}

impl Sps {
    /// Returns the coded width of the stream.
    ///
    /// See 7-13 through 7-17 in ITU-T H.264.
    pub const fn coded_width(&self) -> u32 {
        (self.pic_width_in_mbs_minus1 as u32 + 1) * 16
    }

    /// Returns the coded height of the stream.
    ///
    /// See 7-13 through 7-17 in ITU-T H.264.
    pub const fn coded_height(&self) -> u32 {
        (self.pic_height_in_map_units_minus1 as u32 + 1)
            * 16
            * (2 - self.frame_mbs_only_flag as u32)
    }

    /// Returns the cropped size of the stream.
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Returns `ChromaArrayType`, as computed in ITU-T H.264.
    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }

    /// Returns the profile, if it is one of the known ones.
    pub fn profile(&self) -> Option<Profile> {
        Profile::n(self.profile_idc)
    }

    /// Returns `SubWidthC` and `SubHeightC`.
    ///
    /// See table 6-1 in ITU-T H.264.
    fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    /// Returns `CropUnitX` and `CropUnitY`.
    ///
    /// See 7-19 through 7-22 in ITU-T H.264.
    fn crop_unit_x_y(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            0 => (1, 2 - u32::from(self.frame_mbs_only_flag)),
            _ => {
                let (sub_width_c, sub_height_c) = self.sub_width_height_c();
                (
                    sub_width_c,
                    sub_height_c * (2 - u32::from(self.frame_mbs_only_flag)),
                )
            }
        }
    }

    /// Same as MaxFrameNum. See 7-10 in ITU-T H.264.
    pub fn max_frame_num(&self) -> u32 {
        1 << (self.log2_max_frame_num_minus4 + 4)
    }

    /// `PicSizeInMapUnits`, see 7-17 in ITU-T H.264.
    pub fn pic_size_in_map_units(&self) -> u64 {
        (u64::from(self.pic_width_in_mbs_minus1) + 1)
            * (u64::from(self.pic_height_in_map_units_minus1) + 1)
    }
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 6],
            offset_for_ref_frame: [0; 255],
            seq_parameter_set_id: Default::default(),
            profile_idc: Default::default(),
            constraint_set0_flag: Default::default(),
            constraint_set1_flag: Default::default(),
            constraint_set2_flag: Default::default(),
            constraint_set3_flag: Default::default(),
            constraint_set4_flag: Default::default(),
            constraint_set5_flag: Default::default(),
            level_idc: Default::default(),
            chroma_format_idc: 1,
            separate_colour_plane_flag: Default::default(),
            bit_depth_luma_minus8: Default::default(),
            bit_depth_chroma_minus8: Default::default(),
            qpprime_y_zero_transform_bypass_flag: Default::default(),
            seq_scaling_matrix_present_flag: Default::default(),
            log2_max_frame_num_minus4: Default::default(),
            pic_order_cnt_type: Default::default(),
            log2_max_pic_order_cnt_lsb_minus4: Default::default(),
            delta_pic_order_always_zero_flag: Default::default(),
            offset_for_non_ref_pic: Default::default(),
            offset_for_top_to_bottom_field: Default::default(),
            num_ref_frames_in_pic_order_cnt_cycle: Default::default(),
            max_num_ref_frames: Default::default(),
            gaps_in_frame_num_value_allowed_flag: Default::default(),
            pic_width_in_mbs_minus1: Default::default(),
            pic_height_in_map_units_minus1: Default::default(),
            frame_mbs_only_flag: Default::default(),
            mb_adaptive_frame_field_flag: Default::default(),
            direct_8x8_inference_flag: Default::default(),
            frame_cropping_flag: Default::default(),
            frame_crop_left_offset: Default::default(),
            frame_crop_right_offset: Default::default(),
            frame_crop_top_offset: Default::default(),
            frame_crop_bottom_offset: Default::default(),
            expected_delta_per_pic_order_cnt_cycle: Default::default(),
            vui_parameters_present_flag: Default::default(),
            vui_parameters: Default::default(),
            width: Default::default(),
            height: Default::default(),
            fps_num: 0,
            fps_den: 1,
            extension: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdParams {
    /// Plus 1 specifies the number of alternative CPB specifications in the
    /// bitstream. The value of `cpb_cnt_minus1` shall be in the range of 0 to 31,
    /// inclusive
    pub cpb_cnt_minus1: u8,
    /// Together with `bit_rate_value_minus1[ SchedSelIdx ]` specifies the
    /// maximum input bit rate of the `SchedSelIdx`-th CPB.
    pub bit_rate_scale: u8,
    /// Together with `cpb_size_value_minus1[ SchedSelIdx ]` specifies the CPB
    /// size of the SchedSelIdx-th CPB.
    pub cpb_size_scale: u8,

    /// `[ SchedSelIdx ]` (together with bit_rate_scale) specifies the maximum
    /// input bit rate for the SchedSelIdx-th CPB.
    pub bit_rate_value_minus1: [u32; 32],
    /// `[ SchedSelIdx ]` is used together with cpb_size_scale to specify the
    /// SchedSelIdx-th CPB size.
    pub cpb_size_value_minus1: [u32; 32],
    /// `[ SchedSelIdx ]` equal to 0 specifies that to decode this bitstream by
    /// the HRD using the `SchedSelIdx`-th CPB specification, the hypothetical
    /// stream delivery scheduler (HSS) operates in an intermittent bit rate
    /// mode. `cbr_flag[ SchedSelIdx ]` equal to 1 specifies that the HSS operates
    /// in a constant bit rate (CBR) mode
    pub cbr_flag: [bool; 32],

    /// Specifies the length in bits of the `initial_cpb_removal_delay[
    /// SchedSelIdx ]` and `initial_cpb_removal_delay_offset[ SchedSelIdx ]` syntax
    /// elements of the buffering period SEI message.
    pub initial_cpb_removal_delay_length_minus1: u8,
    /// Specifies the length in bits of the `cpb_removal_delay` syntax element.
    pub cpb_removal_delay_length_minus1: u8,
    /// Specifies the length in bits of the `dpb_output_delay` syntax element.
    pub dpb_output_delay_length_minus1: u8,
    /// If greater than 0, specifies the length in bits of the `time_offset`
    /// syntax element. `time_offset_length` equal to 0 specifies that the
    /// `time_offset` syntax element is not present
    pub time_offset_length: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    /// Specifies whether `aspect_ratio_idc` is present.
    pub aspect_ratio_info_present_flag: bool,
    /// Specifies the value of the sample aspect ratio of the luma samples.
    /// Table E-1 shows the meaning of the code. When aspect_ratio_idc indicates
    /// Extended_SAR, the sample aspect ratio is represented by sar_width :
    /// sar_height. When the aspect_ratio_idc syntax element is not present,
    /// aspect_ratio_idc value shall be inferred to be equal to 0
    pub aspect_ratio_idc: u8,

    /* if aspect_ratio_idc == 255 */
    /// Indicates the horizontal size of the sample aspect ratio (in arbitrary
    /// units)
    pub sar_width: u16,
    /// Indicates the vertical size of the sample aspect ratio (in the same
    /// arbitrary units as sar_width).
    pub sar_height: u16,

    /// If true specifies that the overscan_appropriate_flag is present. Else,
    /// the preferred display method for the video signal is unspecified
    pub overscan_info_present_flag: bool,
    /* if overscan_info_present_flag */
    /// If true, indicates that the cropped decoded pictures output are suitable
    /// for display using overscan. Else, indicates that the cropped decoded
    /// pictures output contain visually important information in the entire
    /// region out to the edges of the cropping rectangle of the picture, such
    /// that the cropped decoded pictures output should not be displayed using
    /// overscan.
    pub overscan_appropriate_flag: bool,

    /// Specifies that video_format, video_full_range_flag and
    /// colour_description_present_flag are present
    pub video_signal_type_present_flag: bool,
    /// Indicates the representation of the pictures as specified in Table E-2,
    /// before being coded in accordance with this Recommendation |
    /// International Standard. When the video_format syntax element is not
    /// present, video_format value shall be inferred to be equal to 5.
    pub video_format: u8,
    /// Indicates the black level and range of the luma and chroma signals as
    /// derived from E′Y, E′PB, and E′PR or E′ R, E′G, and E′B real-valued
    /// component signals.
    pub video_full_range_flag: bool,
    /// Specifies that colour_primaries, transfer_characteristics and
    /// matrix_coefficients are present.
    pub colour_description_present_flag: bool,
    /// Indicates the chromaticity coordinates of the source primaries as
    /// specified in Table E-3 in terms of the CIE 1931 definition of x and y as
    /// specified by ISO 11664-1.
    pub colour_primaries: u8,
    /// Retains same meaning as in ITU-T H.264.
    pub transfer_characteristics: u8,
    /// Describes the matrix coefficients used in deriving luma and chroma
    /// signals from the green, blue, and red, or Y, Z, and X primaries, as
    /// specified in Table E-5.
    pub matrix_coefficients: u8,

    /// Specifies that chroma_sample_loc_type_top_field and
    /// chroma_sample_loc_type_bottom_field are present
    pub chroma_loc_info_present_flag: bool,
    /// Specify the location of chroma samples. See ITU-T H.264 for more details.
    pub chroma_sample_loc_type_top_field: u8,
    /// Specify the location of chroma samples. See ITU-T H.264 for more details.
    pub chroma_sample_loc_type_bottom_field: u8,

    /// Specifies that num_units_in_tick, time_scale and fixed_frame_rate_flag
    /// are present in the bitstream
    pub timing_info_present_flag: bool,
    /* if timing_info_present_flag */
    /// The number of time units of a clock operating at the frequency
    /// time_scale Hz that corresponds to one increment (called a clock tick) of
    /// a clock tick counter
    pub num_units_in_tick: u32,
    /// The number of time units that pass in one second. For example, a time
    /// coordinate system that measures time using a 27 MHz clock has a
    /// time_scale of 27 000 000. time_scale shall be greater than 0.
    pub time_scale: u32,
    /// Retains the same meaning as in ITU-T H.264.
    pub fixed_frame_rate_flag: bool,

    /// Specifies that NAL HRD parameters (pertaining to Type II bitstream
    /// conformance) are present.
    pub nal_hrd_parameters_present_flag: bool,
    /* if nal_hrd_parameters_present_flag */
    /// The NAL HDR parameters
    pub nal_hrd_parameters: HrdParams,
    /// Specifies that VCL HRD parameters (pertaining to all bitstream
    /// conformance) are present.
    pub vcl_hrd_parameters_present_flag: bool,
    /* if vcl_hrd_parameters_present_flag */
    /// The VCL HRD parameters
    pub vcl_hrd_parameters: HrdParams,

    /// Specifies the HRD operational mode as specified in Annex C.
    pub low_delay_hrd_flag: bool,

    /// Specifies that picture timing SEI messages (clause D.2.3) are present
    /// that include the pic_struct syntax element.
    pub pic_struct_present_flag: bool,

    /// Specifies that the following coded video sequence bitstream restriction
    /// parameters are present
    pub bitstream_restriction_flag: bool,
    /*  if bitstream_restriction_flag */
    /// If false, indicates that no sample outside the picture boundaries and no
    /// sample at a fractional sample position for which the sample value is
    /// derived using one or more samples outside the picture boundaries is used
    /// for inter prediction of any sample. If true, indicates that one or more
    /// samples outside picture boundaries may be used in inter prediction. When
    /// the motion_vectors_over_pic_boundaries_flag syntax element is not
    /// present, motion_vectors_over_pic_boundaries_flag value shall be inferred
    /// to be true.
    pub motion_vectors_over_pic_boundaries_flag: bool,
    /// Indicates a number of bytes not exceeded by the sum of the sizes of the
    /// VCL NAL units associated with any coded picture in the coded video
    /// sequence.
    pub max_bytes_per_pic_denom: u32,
    /// Indicates an upper bound for the number of coded bits of
    /// macroblock_layer( ) data for any macroblock in any picture of the coded
    /// video sequence
    pub max_bits_per_mb_denom: u32,
    /// Retains the same meaning as in ITU-T H.264.
    pub log2_max_mv_length_horizontal: u32,
    /// Retains the same meaning as in ITU-T H.264.
    pub log2_max_mv_length_vertical: u32,
    /// Indicates an upper bound for the number of frames buffers, in the
    /// decoded picture buffer (DPB), that are required for storing frames,
    /// complementary field pairs, and non-paired fields before output. The
    /// value of max_num_reorder_frames shall be in the range of 0 to
    /// max_dec_frame_buffering, inclusive.
    pub max_num_reorder_frames: u32,
    /// Specifies the required size of the HRD decoded picture buffer (DPB) in
    /// units of frame buffers. The value of max_dec_frame_buffering shall be
    /// greater than or equal to max_num_ref_frames.
    pub max_dec_frame_buffering: u32,
}

impl VuiParams {
    /// Returns the sample aspect ratio as `(numerator, denominator)`, following
    /// Table E-1. `(0, 0)` means unspecified.
    pub fn par(&self) -> (u16, u16) {
        if !self.aspect_ratio_info_present_flag {
            return (0, 0);
        }

        match self.aspect_ratio_idc {
            EXTENDED_SAR => (self.sar_width, self.sar_height),
            idc => ASPECT_RATIOS
                .get(usize::from(idc))
                .copied()
                .unwrap_or((0, 0)),
        }
    }
}

impl Default for VuiParams {
    fn default() -> Self {
        Self {
            aspect_ratio_info_present_flag: Default::default(),
            aspect_ratio_idc: Default::default(),
            sar_width: Default::default(),
            sar_height: Default::default(),
            overscan_info_present_flag: Default::default(),
            overscan_appropriate_flag: Default::default(),
            video_signal_type_present_flag: Default::default(),
            video_format: 5,
            video_full_range_flag: Default::default(),
            colour_description_present_flag: Default::default(),
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            chroma_loc_info_present_flag: Default::default(),
            chroma_sample_loc_type_top_field: Default::default(),
            chroma_sample_loc_type_bottom_field: Default::default(),
            timing_info_present_flag: Default::default(),
            num_units_in_tick: Default::default(),
            time_scale: Default::default(),
            fixed_frame_rate_flag: Default::default(),
            nal_hrd_parameters_present_flag: Default::default(),
            nal_hrd_parameters: Default::default(),
            vcl_hrd_parameters_present_flag: Default::default(),
            vcl_hrd_parameters: Default::default(),
            low_delay_hrd_flag: Default::default(),
            pic_struct_present_flag: Default::default(),
            bitstream_restriction_flag: Default::default(),
            motion_vectors_over_pic_boundaries_flag: true,
            max_bytes_per_pic_denom: 2,
            max_bits_per_mb_denom: 1,
            log2_max_mv_length_horizontal: 15,
            log2_max_mv_length_vertical: 15,
            max_num_reorder_frames: Default::default(),
            max_dec_frame_buffering: Default::default(),
        }
    }
}

/// A H264 Picture Parameter Set. A syntax structure containing syntax elements
/// that apply to zero or more entire coded pictures as determined by the
/// `pic_parameter_set_id` syntax element found in each slice header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    /// Identifies the picture parameter set that is referred to in the slice header.
    pub pic_parameter_set_id: u8,

    /// Refers to the active sequence parameter set. Resolved through the
    /// parser each time it is needed.
    pub seq_parameter_set_id: u8,

    /// Selects the entropy decoding method to be applied for the syntax
    /// elements for which two descriptors appear in the syntax tables as
    /// follows: If `entropy_coding_mode_flag` is false, the method specified by
    /// the left descriptor in the syntax table is applied (Exp-Golomb coded,
    /// see clause 9.1 or CAVLC, see clause 9.2). Otherwise
    /// (`entropy_coding_mode_flag` is true), the method specified by the right
    /// descriptor in the syntax table is applied (CABAC, see clause 9.3).
    pub entropy_coding_mode_flag: bool,

    /// If true, specifies that the syntax elements delta_pic_order_cnt_bottom
    /// (when `pic_order_cnt_type` is equal to 0) or `delta_pic_order_cnt[1]`
    /// (when `pic_order_cnt_type` is equal to 1), which are related to picture
    /// order counts for the bottom field of a coded frame, are present in the
    /// slice headers for coded frames as specified in clause 7.3.3. Otherwise,
    /// specifies that the syntax elements `delta_pic_order_cnt_bottom` and
    /// `delta_pic_order_cnt[1]` are not present in the slice headers.
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    /// Plus 1 specifies the number of slice groups for a picture. When
    /// `num_slice_groups_minus1` is equal to 0, all slices of the picture
    /// belong to the same slice group. The allowed range of
    /// `num_slice_groups_minus1` is specified in Annex A.
    pub num_slice_groups_minus1: u32,

    /// Specifies how the mapping of slice group map units to slice groups is
    /// coded. Only meaningful when `num_slice_groups_minus1` is not 0.
    pub slice_group_map_type: u8,

    /// `slice_group_map_type == 0`: number of consecutive slice group map
    /// units assigned to each slice group.
    pub run_length_minus1: [u32; 8],

    /// `slice_group_map_type == 2`: top-left and bottom-right corners of each
    /// slice group rectangle.
    pub top_left: [u32; 8],
    pub bottom_right: [u32; 8],

    /// `slice_group_map_type` in 3..=5: direction and rate of change of the
    /// slice groups.
    pub slice_group_change_direction_flag: bool,
    pub slice_group_change_rate_minus1: u32,

    /// `slice_group_map_type == 6`: explicit slice group of each map unit.
    pub pic_size_in_map_units_minus1: u32,
    pub slice_group_id: Vec<u8>,

    /// Specifies how `num_ref_idx_l0_active_minus1` is inferred for P, SP, and
    /// B slices with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l0_default_active_minus1: u8,

    /// Specifies how `num_ref_idx_l1_active_minus1` is inferred for B slices
    /// with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l1_default_active_minus1: u8,

    /// If not set, specifies that the default weighted prediction shall be
    /// applied to P and SP slices. If set, specifies that explicit weighted
    /// prediction shall be applied to P and SP slices.
    pub weighted_pred_flag: bool,

    /// `weighted_bipred_idc` equal to 0 specifies that the default weighted
    /// prediction shall be applied to B slices. `weighted_bipred_idc` equal to
    /// 1 specifies that explicit weighted prediction shall be applied to B
    /// slices. `weighted_bipred_idc` equal to 2 specifies that implicit
    /// weighted prediction shall be applied to B slices
    pub weighted_bipred_idc: u8,

    /// Specifies the initial value minus 26 of SliceQPY for each slice. The
    /// initial value is modified at the slice layer when a non-zero value of
    /// `slice_qp_delta` is decoded, and is modified further when a non-zero
    /// value of `mb_qp_delta` is decoded at the macroblock layer.
    pub pic_init_qp_minus26: i8,

    /// Specifies the initial value minus 26 of SliceQSY for all macroblocks in
    /// SP or SI slices. The initial value is modified at the slice layer when a
    /// non-zero value of `slice_qs_delta` is decoded.
    pub pic_init_qs_minus26: i8,

    /// Specifies the offset that shall be added to QP Y and QSY for addressing
    /// the table of QPC values for the Cb chroma component.
    pub chroma_qp_index_offset: i8,

    /// If set, specifies that a set of syntax elements controlling the
    /// characteristics of the deblocking filter is present in the slice header.
    /// If not set, specifies that the set of syntax elements controlling the
    /// characteristics of the deblocking filter is not present in the slice
    /// headers and their inferred values are in effect.
    pub deblocking_filter_control_present_flag: bool,

    /// If not set, specifies that intra prediction allows usage of residual
    /// data and decoded samples of neighbouring macroblocks coded using Inter
    /// macroblock prediction modes for the prediction of macroblocks coded
    /// using Intra macroblock prediction modes. If set, specifies constrained
    /// intra prediction, in which case prediction of macroblocks coded using
    /// Intra macroblock prediction modes only uses residual data and decoded
    /// samples from I or SI macroblock types.
    pub constrained_intra_pred_flag: bool,

    /// If not set, specifies that the `redundant_pic_cnt` syntax element is not
    /// present in slice headers, coded slice data partition B NAL units, and
    /// coded slice data partition C NAL units that refer (either directly or by
    /// association with a corresponding coded slice data partition A NAL unit)
    /// to the picture parameter set. If set, specifies that the
    /// `redundant_pic_cnt` syntax element is present in all slice headers,
    /// coded slice data partition B NAL units, and coded slice data partition C
    /// NAL units that refer (either directly or by association with a
    /// corresponding coded slice data partition A NAL unit) to the picture
    /// parameter set.
    pub redundant_pic_cnt_present_flag: bool,

    /// If set, specifies that the 8x8 transform decoding process may be in use
    /// (see clause 8.5). If not set, specifies that the 8x8 transform decoding
    /// process is not in use.
    pub transform_8x8_mode_flag: bool,

    ///  If set, specifies that parameters are present to modify the scaling
    ///  lists specified in the sequence parameter set. If not set, specifies
    ///  that the scaling lists used for the picture shall be inferred to be
    ///  equal to those specified by the sequence parameter set.
    pub pic_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the offset that shall be added to QPY and QSY for addressing
    /// the table of QPC values for the Cr chroma component. When
    /// `second_chroma_qp_index_offset` is not present, it shall be inferred to be
    /// equal to `chroma_qp_index_offset`.
    pub second_chroma_qp_index_offset: i8,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            pic_parameter_set_id: Default::default(),
            seq_parameter_set_id: Default::default(),
            entropy_coding_mode_flag: Default::default(),
            bottom_field_pic_order_in_frame_present_flag: Default::default(),
            num_slice_groups_minus1: Default::default(),
            slice_group_map_type: Default::default(),
            run_length_minus1: Default::default(),
            top_left: Default::default(),
            bottom_right: Default::default(),
            slice_group_change_direction_flag: Default::default(),
            slice_group_change_rate_minus1: Default::default(),
            pic_size_in_map_units_minus1: Default::default(),
            slice_group_id: Default::default(),
            num_ref_idx_l0_default_active_minus1: Default::default(),
            num_ref_idx_l1_default_active_minus1: Default::default(),
            weighted_pred_flag: Default::default(),
            weighted_bipred_idc: Default::default(),
            pic_init_qp_minus26: Default::default(),
            pic_init_qs_minus26: Default::default(),
            chroma_qp_index_offset: Default::default(),
            deblocking_filter_control_present_flag: Default::default(),
            constrained_intra_pred_flag: Default::default(),
            redundant_pic_cnt_present_flag: Default::default(),
            transform_8x8_mode_flag: Default::default(),
            pic_scaling_matrix_present_flag: Default::default(),
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 6],
            second_chroma_qp_index_offset: Default::default(),
        }
    }
}

/// Which optional sections of the bitstream end up in the parsed records.
/// Disabled sections are still consumed so that the fields following them
/// are read from the right position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserOptions {
    /// Parse `vui_parameters()` of sequence parameter sets. When unset the
    /// VUI is skipped entirely, and the frame rate is left unknown.
    pub parse_vui_params: bool,
    /// Fill `SliceHeader::pred_weight_table`.
    pub parse_pred_weight_table: bool,
    /// Fill `SliceHeader::dec_ref_pic_marking`.
    pub parse_dec_ref_pic_marking: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            parse_vui_params: true,
            parse_pred_weight_table: true,
            parse_dec_ref_pic_marking: true,
        }
    }
}

/// H.264 parameter set cache and parser. SPSes and PPSes are stored in slots
/// indexed by their own id, so a later parameter set with the same id
/// replaces the earlier one.
#[derive(Debug)]
pub struct Parser {
    spses: Vec<Option<Sps>>,
    ppses: Vec<Option<Pps>>,
    last_sps: Option<u8>,
    last_pps: Option<u8>,
    options: ParserOptions,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// `Ceil(Log2(value))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
fn ceil_log2(value: u64) -> u32 {
    if value <= 1 {
        0
    } else {
        64 - (value - 1).leading_zeros()
    }
}

impl Parser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            spses: vec![None; MAX_SPS_COUNT],
            ppses: vec![None; MAX_PPS_COUNT],
            last_sps: None,
            last_pps: None,
            options,
        }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Returns a reader over the payload of `nalu`, header excluded.
    pub(super) fn rbsp_reader<'a>(nalu: &Nalu<'a>) -> anyhow::Result<NaluReader<'a>> {
        let start = nalu.offset + nalu.header.len();
        let end = nalu.offset + nalu.size;

        nalu.data
            .get(start..end)
            .map(NaluReader::new)
            .ok_or_else(|| anyhow!("NAL unit at offset {} has no payload", nalu.offset))
    }

    fn check_nalu_type(nalu: &Nalu, expected: NaluType) -> anyhow::Result<()> {
        if nalu.header.type_ != expected {
            return Err(anyhow!(
                "Invalid NALU type, expected {:?}, got {:?}",
                expected,
                nalu.header.type_
            ));
        }

        Ok(())
    }

    fn fill_default_scaling_list_4x4(scaling_list4x4: &mut [u8; 16], i: usize) {
        // See table 7.2 in ITU-T H.264.
        if i < 3 {
            *scaling_list4x4 = DEFAULT_4X4_INTRA;
        } else {
            *scaling_list4x4 = DEFAULT_4X4_INTER;
        }
    }

    fn fill_default_scaling_list_8x8(scaling_list8x8: &mut [u8; 64], i: usize) {
        if i % 2 == 0 {
            *scaling_list8x8 = DEFAULT_8X8_INTRA;
        } else {
            *scaling_list8x8 = DEFAULT_8X8_INTER;
        }
    }

    fn fill_fallback_scaling_list_4x4(
        scaling_list4x4: &mut [[u8; 16]; 6],
        i: usize,
        default_scaling_list_intra: &[u8; 16],
        default_scaling_list_inter: &[u8; 16],
    ) {
        // See table 7.2 in ITU-T H.264.
        scaling_list4x4[i] = match i {
            0 => *default_scaling_list_intra,
            3 => *default_scaling_list_inter,
            _ => scaling_list4x4[i - 1],
        }
    }

    fn fill_fallback_scaling_list_8x8(
        scaling_list8x8: &mut [[u8; 64]; 6],
        i: usize,
        default_scaling_list_intra: &[u8; 64],
        default_scaling_list_inter: &[u8; 64],
    ) {
        // See table 7.2 in ITU-T H.264.
        scaling_list8x8[i] = match i {
            0 => *default_scaling_list_intra,
            1 => *default_scaling_list_inter,
            _ => scaling_list8x8[i - 2],
        }
    }

    fn fill_scaling_list_flat(
        scaling_list4x4: &mut [[u8; 16]; 6],
        scaling_list8x8: &mut [[u8; 64]; 6],
    ) {
        // (7-8) in ITU-T H.264.
        for outer in scaling_list4x4 {
            outer.fill(16);
        }

        // (7-9) in ITU-T H.264.
        for outer in scaling_list8x8 {
            outer.fill(16);
        }
    }

    /// Parses one `scaling_list()`. Returns whether the default list must be
    /// used instead.
    fn parse_scaling_list<U: AsMut<[u8]>>(
        r: &mut NaluReader,
        scaling_list: &mut U,
    ) -> anyhow::Result<bool> {
        // 7.3.2.1.1.1
        let mut last_scale = 8u8;
        let mut next_scale = 8u8;

        for j in 0..scaling_list.as_mut().len() {
            if next_scale != 0 {
                let delta_scale = r.read_se_bounded::<i32>(-128, 127)?;
                next_scale = ((last_scale as i32 + delta_scale + 256) % 256) as u8;
                if j == 0 && next_scale == 0 {
                    return Ok(true);
                }
            }

            scaling_list.as_mut()[j] = if next_scale == 0 {
                last_scale
            } else {
                next_scale
            };

            last_scale = scaling_list.as_mut()[j];
        }

        Ok(false)
    }

    fn parse_sps_scaling_lists(r: &mut NaluReader, sps: &mut Sps) -> anyhow::Result<()> {
        let scaling_lists4x4 = &mut sps.scaling_lists_4x4;
        let scaling_lists8x8 = &mut sps.scaling_lists_8x8;

        for i in 0..6 {
            let seq_scaling_list_present_flag = r.read_bit()?;
            if seq_scaling_list_present_flag {
                if Parser::parse_scaling_list(r, &mut scaling_lists4x4[i])? {
                    Parser::fill_default_scaling_list_4x4(&mut scaling_lists4x4[i], i);
                }
            } else {
                // Table 7-2: Fallback rule A
                Parser::fill_fallback_scaling_list_4x4(
                    scaling_lists4x4,
                    i,
                    &DEFAULT_4X4_INTRA,
                    &DEFAULT_4X4_INTER,
                );
            }
        }

        let num_8x8 = if sps.chroma_format_idc != 3 { 2 } else { 6 };
        for i in 0..num_8x8 {
            let seq_scaling_list_present_flag = r.read_bit()?;
            if seq_scaling_list_present_flag {
                if Parser::parse_scaling_list(r, &mut scaling_lists8x8[i])? {
                    Parser::fill_default_scaling_list_8x8(&mut scaling_lists8x8[i], i);
                }
            } else {
                Parser::fill_fallback_scaling_list_8x8(
                    scaling_lists8x8,
                    i,
                    &DEFAULT_8X8_INTRA,
                    &DEFAULT_8X8_INTER,
                );
            }
        }

        Ok(())
    }

    fn parse_pps_scaling_lists(r: &mut NaluReader, pps: &mut Pps, sps: &Sps) -> anyhow::Result<()> {
        let scaling_lists4x4 = &mut pps.scaling_lists_4x4;
        let scaling_lists8x8 = &mut pps.scaling_lists_8x8;

        for i in 0..6 {
            let pic_scaling_list_present_flag = r.read_bit()?;
            if pic_scaling_list_present_flag {
                if Parser::parse_scaling_list(r, &mut scaling_lists4x4[i])? {
                    Parser::fill_default_scaling_list_4x4(&mut scaling_lists4x4[i], i);
                }
            } else if !sps.seq_scaling_matrix_present_flag {
                // Table 7-2: Fallback rule A
                Parser::fill_fallback_scaling_list_4x4(
                    scaling_lists4x4,
                    i,
                    &DEFAULT_4X4_INTRA,
                    &DEFAULT_4X4_INTER,
                );
            } else {
                // Table 7-2: Fallback rule B
                Parser::fill_fallback_scaling_list_4x4(
                    scaling_lists4x4,
                    i,
                    &sps.scaling_lists_4x4[0],
                    &sps.scaling_lists_4x4[3],
                );
            }
        }

        if pps.transform_8x8_mode_flag {
            let num8x8 = if sps.chroma_format_idc != 3 { 2 } else { 6 };

            for i in 0..num8x8 {
                let pic_scaling_list_present_flag = r.read_bit()?;
                if pic_scaling_list_present_flag {
                    if Parser::parse_scaling_list(r, &mut scaling_lists8x8[i])? {
                        Parser::fill_default_scaling_list_8x8(&mut scaling_lists8x8[i], i);
                    }
                } else if !sps.seq_scaling_matrix_present_flag {
                    // Table 7-2: Fallback rule A
                    Parser::fill_fallback_scaling_list_8x8(
                        scaling_lists8x8,
                        i,
                        &DEFAULT_8X8_INTRA,
                        &DEFAULT_8X8_INTER,
                    );
                } else {
                    // Table 7-2: Fallback rule B
                    Parser::fill_fallback_scaling_list_8x8(
                        scaling_lists8x8,
                        i,
                        &sps.scaling_lists_8x8[0],
                        &sps.scaling_lists_8x8[1],
                    );
                }
            }
        }

        Ok(())
    }

    fn parse_hrd(r: &mut NaluReader) -> anyhow::Result<HrdParams> {
        let mut hrd = HrdParams {
            cpb_cnt_minus1: r.read_ue_max(31)?,
            bit_rate_scale: r.read_bits(4)?,
            cpb_size_scale: r.read_bits(4)?,
            ..Default::default()
        };

        for sched_sel_idx in 0..=usize::from(hrd.cpb_cnt_minus1) {
            hrd.bit_rate_value_minus1[sched_sel_idx] = r.read_ue()?;
            hrd.cpb_size_value_minus1[sched_sel_idx] = r.read_ue()?;
            hrd.cbr_flag[sched_sel_idx] = r.read_bit()?;
        }

        hrd.initial_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.dpb_output_delay_length_minus1 = r.read_bits(5)?;
        hrd.time_offset_length = r.read_bits(5)?;
        Ok(hrd)
    }

    fn parse_vui(r: &mut NaluReader) -> anyhow::Result<VuiParams> {
        let mut vui = VuiParams {
            aspect_ratio_info_present_flag: r.read_bit()?,
            ..Default::default()
        };

        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = r.read_bits(8)?;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                vui.sar_width = r.read_bits(16)?;
                vui.sar_height = r.read_bits(16)?;
            }
        }

        vui.overscan_info_present_flag = r.read_bit()?;
        if vui.overscan_info_present_flag {
            vui.overscan_appropriate_flag = r.read_bit()?;
        }

        vui.video_signal_type_present_flag = r.read_bit()?;
        if vui.video_signal_type_present_flag {
            vui.video_format = r.read_bits(3)?;
            vui.video_full_range_flag = r.read_bit()?;
            vui.colour_description_present_flag = r.read_bit()?;
            if vui.colour_description_present_flag {
                vui.colour_primaries = r.read_bits(8)?;
                vui.transfer_characteristics = r.read_bits(8)?;
                vui.matrix_coefficients = r.read_bits(8)?;
            }
        }

        vui.chroma_loc_info_present_flag = r.read_bit()?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field = r.read_ue_max(5)?;
            vui.chroma_sample_loc_type_bottom_field = r.read_ue_max(5)?;
        }

        vui.timing_info_present_flag = r.read_bit()?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = r.read_bits(32)?;
            if vui.num_units_in_tick == 0 {
                warn!("num_units_in_tick == 0, which is not allowed by E.2.1");
            }

            vui.time_scale = r.read_bits(32)?;
            if vui.time_scale == 0 {
                warn!("time_scale == 0, which is not allowed by E.2.1");
            }

            vui.fixed_frame_rate_flag = r.read_bit()?;
        }

        vui.nal_hrd_parameters_present_flag = r.read_bit()?;
        if vui.nal_hrd_parameters_present_flag {
            vui.nal_hrd_parameters = Parser::parse_hrd(r).context("NAL HRD parameters")?;
        }

        vui.vcl_hrd_parameters_present_flag = r.read_bit()?;
        if vui.vcl_hrd_parameters_present_flag {
            vui.vcl_hrd_parameters = Parser::parse_hrd(r).context("VCL HRD parameters")?;
        }

        if vui.nal_hrd_parameters_present_flag || vui.vcl_hrd_parameters_present_flag {
            vui.low_delay_hrd_flag = r.read_bit()?;
        }

        vui.pic_struct_present_flag = r.read_bit()?;
        vui.bitstream_restriction_flag = r.read_bit()?;

        if vui.bitstream_restriction_flag {
            vui.motion_vectors_over_pic_boundaries_flag = r.read_bit()?;
            vui.max_bytes_per_pic_denom = r.read_ue()?;
            vui.max_bits_per_mb_denom = r.read_ue_max(16)?;
            vui.log2_max_mv_length_horizontal = r.read_ue_max(16)?;
            vui.log2_max_mv_length_vertical = r.read_ue_max(16)?;
            vui.max_num_reorder_frames = r.read_ue()?;
            vui.max_dec_frame_buffering = r.read_ue()?;
        }

        Ok(vui)
    }

    /// Computes the cropped picture size and the frame rate.
    fn compute_sps_derived(sps: &mut Sps, vui_parsed: bool) -> anyhow::Result<()> {
        let (crop_unit_x, crop_unit_y) = sps.crop_unit_x_y();

        let width = i64::from(sps.coded_width())
            - (i64::from(sps.frame_crop_left_offset) + i64::from(sps.frame_crop_right_offset))
                * i64::from(crop_unit_x);
        let height = i64::from(sps.coded_height())
            - (i64::from(sps.frame_crop_top_offset) + i64::from(sps.frame_crop_bottom_offset))
                * i64::from(crop_unit_y);

        if width < 0 || height < 0 {
            warn!("invalid width/height in SPS: {}x{}", width, height);
            return Err(anyhow!("Invalid frame cropping, resulting size is {}x{}", width, height));
        }

        sps.width = u32::try_from(width)?;
        sps.height = u32::try_from(height)?;
        debug!("SPS resolution {}x{}", sps.width, sps.height);

        sps.fps_num = 0;
        sps.fps_den = 1;

        let vui = &sps.vui_parameters;
        if vui_parsed && vui.timing_info_present_flag {
            if vui.fixed_frame_rate_flag && sps.frame_mbs_only_flag && !vui.pic_struct_present_flag
            {
                // A frame is two fields.
                let frame_rate = match (vui.time_scale, vui.num_units_in_tick.checked_mul(2)) {
                    (0, _) | (_, Some(0)) => None,
                    (time_scale, Some(den)) => Some((time_scale, den)),
                    (time_scale, None) if time_scale % 2 == 0 => {
                        Some((time_scale / 2, vui.num_units_in_tick))
                    }
                    (_, None) => None,
                };

                match frame_rate {
                    Some((num, den)) => {
                        sps.fps_num = num;
                        sps.fps_den = den;
                        debug!("SPS frame rate {}/{}", sps.fps_num, sps.fps_den);
                    }
                    None => warn!(
                        "unusable VUI timing {}/{}, unknown frame rate",
                        vui.time_scale, vui.num_units_in_tick
                    ),
                }
            }
        } else {
            debug!("No VUI timing information, unknown frame rate");
        }

        Ok(())
    }

    fn parse_sps_inner(r: &mut NaluReader, parse_vui: bool) -> anyhow::Result<Sps> {
        let mut sps = Sps {
            profile_idc: r.read_bits(8)?,
            constraint_set0_flag: r.read_bit()?,
            constraint_set1_flag: r.read_bit()?,
            constraint_set2_flag: r.read_bit()?,
            constraint_set3_flag: r.read_bit()?,
            constraint_set4_flag: r.read_bit()?,
            constraint_set5_flag: r.read_bit()?,
            ..Default::default()
        };

        // skip reserved_zero_2bits
        r.skip_bits(2)?;

        sps.level_idc = r.read_bits(8)?;
        sps.seq_parameter_set_id = r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?;

        Parser::fill_scaling_list_flat(&mut sps.scaling_lists_4x4, &mut sps.scaling_lists_8x8);

        if sps.profile_idc == 100
            || sps.profile_idc == 110
            || sps.profile_idc == 122
            || sps.profile_idc == 244
            || sps.profile_idc == 44
            || sps.profile_idc == 83
            || sps.profile_idc == 86
            || sps.profile_idc == 118
            || sps.profile_idc == 128
            || sps.profile_idc == 138
            || sps.profile_idc == 139
            || sps.profile_idc == 134
            || sps.profile_idc == 135
        {
            sps.chroma_format_idc = r.read_ue_max(3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane_flag = r.read_bit()?;
            }

            sps.bit_depth_luma_minus8 = r.read_ue_max(6)?;
            sps.bit_depth_chroma_minus8 = r.read_ue_max(6)?;
            sps.qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
            sps.seq_scaling_matrix_present_flag = r.read_bit()?;

            if sps.seq_scaling_matrix_present_flag {
                Parser::parse_sps_scaling_lists(r, &mut sps).context("SPS scaling lists")?;
            }
        }

        sps.log2_max_frame_num_minus4 = r.read_ue_max(12)?;

        sps.pic_order_cnt_type = r.read_ue_max(2)?;

        if sps.pic_order_cnt_type == 0 {
            sps.log2_max_pic_order_cnt_lsb_minus4 = r.read_ue_max(12)?;
        } else if sps.pic_order_cnt_type == 1 {
            sps.delta_pic_order_always_zero_flag = r.read_bit()?;
            sps.offset_for_non_ref_pic = r.read_se()?;
            sps.offset_for_top_to_bottom_field = r.read_se()?;
            sps.num_ref_frames_in_pic_order_cnt_cycle = r.read_ue_max(255)?;

            let mut offset_acc = 0i32;
            for i in 0..usize::from(sps.num_ref_frames_in_pic_order_cnt_cycle) {
                sps.offset_for_ref_frame[i] = r.read_se()?;

                // (7-12) in ITU-T H.264.
                offset_acc = offset_acc
                    .checked_add(sps.offset_for_ref_frame[i])
                    .context("ExpectedDeltaPerPicOrderCntCycle overflow")?;
            }

            sps.expected_delta_per_pic_order_cnt_cycle = offset_acc;
        }

        sps.max_num_ref_frames = r.read_ue_max(DPB_MAX_SIZE)?;
        sps.gaps_in_frame_num_value_allowed_flag = r.read_bit()?;
        sps.pic_width_in_mbs_minus1 = r.read_ue()?;
        sps.pic_height_in_map_units_minus1 = r.read_ue()?;
        sps.frame_mbs_only_flag = r.read_bit()?;

        if !sps.frame_mbs_only_flag {
            sps.mb_adaptive_frame_field_flag = r.read_bit()?;
        }

        sps.direct_8x8_inference_flag = r.read_bit()?;
        sps.frame_cropping_flag = r.read_bit()?;

        if sps.frame_cropping_flag {
            sps.frame_crop_left_offset = r.read_ue()?;
            sps.frame_crop_right_offset = r.read_ue()?;
            sps.frame_crop_top_offset = r.read_ue()?;
            sps.frame_crop_bottom_offset = r.read_ue()?;
        }

        sps.vui_parameters_present_flag = r.read_bit()?;
        let vui_parsed = sps.vui_parameters_present_flag && parse_vui;
        if vui_parsed {
            sps.vui_parameters = Parser::parse_vui(r).context("VUI parameters")?;
        }

        Parser::compute_sps_derived(&mut sps, vui_parsed)?;

        Ok(sps)
    }

    fn parse_view_ids(r: &mut NaluReader, max_count: u32) -> anyhow::Result<Vec<u16>> {
        let count: u32 = r.read_ue_max(max_count)?;

        (0..count).map(|_| r.read_ue_max(MAX_VIEW_ID)).collect()
    }

    fn parse_sps_mvc_extension(r: &mut NaluReader) -> anyhow::Result<SpsMvcExtension> {
        let bit_equal_to_one = r.read_bit()?;
        if !bit_equal_to_one {
            return Err(anyhow!("bit_equal_to_one is not set in subset SPS"));
        }

        let num_views_minus1: u32 = r.read_ue_max(MAX_VIEW_ID)?;
        let mut views = Vec::new();
        for _ in 0..=num_views_minus1 {
            views.push(SpsMvcView {
                view_id: r.read_ue_max(MAX_VIEW_ID)?,
                ..Default::default()
            });
        }

        for view in views.iter_mut().skip(1) {
            view.anchor_refs_l0 = Parser::parse_view_ids(r, 15)?;
            view.anchor_refs_l1 = Parser::parse_view_ids(r, 15)?;
        }

        for view in views.iter_mut().skip(1) {
            view.non_anchor_refs_l0 = Parser::parse_view_ids(r, 15)?;
            view.non_anchor_refs_l1 = Parser::parse_view_ids(r, 15)?;
        }

        let num_level_values_signalled_minus1: u32 = r.read_ue_max(63)?;
        let mut level_values = Vec::new();
        for _ in 0..=num_level_values_signalled_minus1 {
            let level_idc = r.read_bits(8)?;
            let num_applicable_ops_minus1: u32 = r.read_ue_max(1023)?;

            let mut applicable_ops = Vec::new();
            for _ in 0..=num_applicable_ops_minus1 {
                let temporal_id = r.read_bits(3)?;
                let num_target_views_minus1: u32 = r.read_ue_max(1023)?;
                let target_view_ids = (0..=num_target_views_minus1)
                    .map(|_| r.read_ue_max(MAX_VIEW_ID))
                    .collect::<anyhow::Result<Vec<u16>>>()?;

                applicable_ops.push(SpsMvcOperationPoint {
                    temporal_id,
                    target_view_ids,
                    num_views_minus1: r.read_ue_max(1023)?,
                });
            }

            level_values.push(SpsMvcLevelValue {
                level_idc,
                applicable_ops,
            });
        }

        Ok(SpsMvcExtension {
            views,
            level_values,
        })
    }

    /// Parses a SPS without registering it.
    pub fn parse_sps_data(nalu: &Nalu, parse_vui: bool) -> Result<Sps, ParseError> {
        debug!("parsing SPS");

        Parser::check_nalu_type(nalu, NaluType::Sps)
            .and_then(|_| Parser::rbsp_reader(nalu))
            .and_then(|mut r| Parser::parse_sps_inner(&mut r, parse_vui))
            .map_err(|e| {
                warn!("error parsing \"Sequence parameter set\": {:#}", e);
                e.into()
            })
    }

    /// Parses a subset SPS without registering it. The VUI is always parsed,
    /// as the MVC extension follows it.
    pub fn parse_subset_sps_data(nalu: &Nalu) -> Result<Sps, ParseError> {
        debug!("parsing subset SPS");

        Parser::check_nalu_type(nalu, NaluType::SubsetSps)
            .and_then(|_| Parser::rbsp_reader(nalu))
            .and_then(|mut r| {
                let mut sps = Parser::parse_sps_inner(&mut r, true)?;

                if matches!(
                    sps.profile(),
                    Some(Profile::MultiviewHigh | Profile::StereoHigh)
                ) {
                    sps.extension = Some(
                        Parser::parse_sps_mvc_extension(&mut r).context("SPS MVC extension")?,
                    );
                }

                Ok(sps)
            })
            .map_err(|e| {
                warn!("error parsing \"Subset sequence parameter set\": {:#}", e);
                e.into()
            })
    }

    fn insert_sps(&mut self, sps: Sps) -> &Sps {
        let id = sps.seq_parameter_set_id;
        debug!("adding sequence parameter set with id: {} to array", id);

        self.last_sps = Some(id);
        self.spses[usize::from(id)].insert(sps)
    }

    /// Parse a SPS and add it to the list of active SPSes, replacing the
    /// previous SPS with the same id.
    ///
    /// Returns a reference to the new SPS.
    pub fn parse_sps(&mut self, nalu: &Nalu) -> Result<&Sps, ParseError> {
        let sps = Parser::parse_sps_data(nalu, self.options.parse_vui_params)?;
        Ok(self.insert_sps(sps))
    }

    /// Parse a subset SPS and add it to the list of active SPSes. Subset SPSes
    /// share their id space with regular SPSes.
    pub fn parse_subset_sps(&mut self, nalu: &Nalu) -> Result<&Sps, ParseError> {
        let sps = Parser::parse_subset_sps_data(nalu)?;
        Ok(self.insert_sps(sps))
    }

    fn parse_slice_groups(r: &mut NaluReader, pps: &mut Pps, sps: &Sps) -> anyhow::Result<()> {
        pps.slice_group_map_type = r.read_ue_max(6)?;

        let max_map_unit = u32::try_from(sps.pic_size_in_map_units() - 1).unwrap_or(u32::MAX);

        let num_slice_groups = pps.num_slice_groups_minus1 as usize + 1;
        match pps.slice_group_map_type {
            0 => {
                for run_length_minus1 in &mut pps.run_length_minus1[..num_slice_groups] {
                    *run_length_minus1 = r.read_ue()?;
                }
            }
            2 => {
                for i in 0..num_slice_groups {
                    pps.top_left[i] = r.read_ue()?;
                    pps.bottom_right[i] = r.read_ue()?;
                }
            }
            3..=5 => {
                pps.slice_group_change_direction_flag = r.read_bit()?;
                pps.slice_group_change_rate_minus1 = r.read_ue_max(max_map_unit)?;
            }
            6 => {
                pps.pic_size_in_map_units_minus1 = r.read_ue_max(max_map_unit)?;

                let bits = ceil_log2(u64::from(pps.num_slice_groups_minus1) + 1) as usize;
                pps.slice_group_id = (0..=pps.pic_size_in_map_units_minus1)
                    .map(|_| r.read_bits::<u8>(bits))
                    .collect::<Result<Vec<u8>, _>>()?;
            }
            _ => (),
        }

        Ok(())
    }

    fn parse_pps_inner(&self, r: &mut NaluReader) -> anyhow::Result<Pps> {
        let pic_parameter_set_id = r.read_ue_max(MAX_PPS_COUNT as u32 - 1)?;
        let seq_parameter_set_id = r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?;

        let sps = self.get_sps(seq_parameter_set_id).ok_or_else(|| {
            warn!(
                "couldn't find associated sequence parameter set with id: {}",
                seq_parameter_set_id
            );
            ParseError::BrokenLink(format!(
                "PPS {} references SPS {} that has not been successfully parsed",
                pic_parameter_set_id, seq_parameter_set_id
            ))
        })?;

        // The SPS lists are the defaults if the PPS carries no scaling matrix.
        let mut pps = Pps {
            pic_parameter_set_id,
            seq_parameter_set_id,
            scaling_lists_4x4: sps.scaling_lists_4x4,
            scaling_lists_8x8: sps.scaling_lists_8x8,
            ..Default::default()
        };

        pps.entropy_coding_mode_flag = r.read_bit()?;
        pps.bottom_field_pic_order_in_frame_present_flag = r.read_bit()?;
        pps.num_slice_groups_minus1 = r.read_ue_max(7)?;

        if pps.num_slice_groups_minus1 > 0 {
            Parser::parse_slice_groups(r, &mut pps, sps).context("PPS slice groups")?;
        }

        pps.num_ref_idx_l0_default_active_minus1 = r.read_ue_max(31)?;
        pps.num_ref_idx_l1_default_active_minus1 = r.read_ue_max(31)?;

        pps.weighted_pred_flag = r.read_bit()?;
        pps.weighted_bipred_idc = r.read_bits(2)?;

        let qp_bd_offset = 6 * (i32::from(sps.bit_depth_luma_minus8)
            + i32::from(sps.separate_colour_plane_flag));
        pps.pic_init_qp_minus26 = r.read_se_bounded(-(26 + qp_bd_offset), 25)?;
        pps.pic_init_qs_minus26 = r.read_se_bounded(-26, 25)?;

        pps.chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;

        // When second_chroma_qp_index_offset is not present, it shall be
        // inferred to be equal to chroma_qp_index_offset.
        pps.second_chroma_qp_index_offset = pps.chroma_qp_index_offset;

        pps.deblocking_filter_control_present_flag = r.read_bit()?;
        pps.constrained_intra_pred_flag = r.read_bit()?;
        pps.redundant_pic_cnt_present_flag = r.read_bit()?;

        if r.has_more_rbsp_data() {
            pps.transform_8x8_mode_flag = r.read_bit()?;
            pps.pic_scaling_matrix_present_flag = r.read_bit()?;

            if pps.pic_scaling_matrix_present_flag {
                Parser::parse_pps_scaling_lists(r, &mut pps, sps).context("PPS scaling lists")?;
            }

            pps.second_chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;
        }

        Ok(pps)
    }

    /// Parses a PPS without registering it. The SPS it references must be
    /// known to this parser.
    pub fn parse_pps_data(&self, nalu: &Nalu) -> Result<Pps, ParseError> {
        debug!("parsing PPS");

        Parser::check_nalu_type(nalu, NaluType::Pps)
            .and_then(|_| Parser::rbsp_reader(nalu))
            .and_then(|mut r| self.parse_pps_inner(&mut r))
            .map_err(|e| {
                warn!("error parsing \"Picture parameter set\": {:#}", e);
                e.into()
            })
    }

    /// Parse a PPS and add it to the list of active PPSes, replacing the
    /// previous PPS with the same id.
    pub fn parse_pps(&mut self, nalu: &Nalu) -> Result<&Pps, ParseError> {
        let pps = self.parse_pps_data(nalu)?;
        let id = pps.pic_parameter_set_id;
        debug!("adding picture parameter set with id: {} to array", id);

        self.last_pps = Some(id);
        Ok(self.ppses[usize::from(id)].insert(pps))
    }

    /// Parses the parameter sets carried by `nalu` into the cache. Other NAL
    /// unit types are ignored.
    pub fn parse_nal(&mut self, nalu: &Nalu) -> Result<(), ParseError> {
        match nalu.header.type_ {
            NaluType::Sps => self.parse_sps(nalu).map(|_| ()),
            NaluType::SubsetSps => self.parse_subset_sps(nalu).map(|_| ()),
            NaluType::Pps => self.parse_pps(nalu).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn parse_ref_pic_list_modification(
        r: &mut NaluReader,
        max_pic_num: u32,
        is_mvc: bool,
    ) -> anyhow::Result<Vec<RefPicListModification>> {
        let mut ref_list_mods = Vec::new();

        loop {
            let mut pic_num_mod = RefPicListModification {
                modification_of_pic_nums_idc: r.read_ue_max(5)?,
                ..Default::default()
            };

            match pic_num_mod.modification_of_pic_nums_idc {
                0 | 1 => {
                    pic_num_mod.abs_diff_pic_num_minus1 = r.read_ue_max(max_pic_num - 1)?;
                }

                2 => {
                    pic_num_mod.long_term_pic_num = r.read_ue()?;
                }

                3 => break,

                _ if is_mvc => {
                    pic_num_mod.abs_diff_view_idx_minus1 = r.read_ue()?;
                }

                idc => {
                    return Err(anyhow!(
                        "modification_of_pic_nums_idc {} is only allowed in MVC slices",
                        idc
                    ))
                }
            }

            if ref_list_mods.len() == MAX_REF_PIC_LIST_MODIFICATIONS {
                return Err(anyhow!(
                    "Broken Data: more than {} reference picture list modifications",
                    MAX_REF_PIC_LIST_MODIFICATIONS
                ));
            }

            ref_list_mods.push(pic_num_mod);
        }

        Ok(ref_list_mods)
    }

    fn parse_ref_pic_list_modifications(
        r: &mut NaluReader,
        nalu: &Nalu,
        header: &mut SliceHeader,
    ) -> anyhow::Result<()> {
        if !header.slice_type.is_i() && !header.slice_type.is_si() {
            header.ref_pic_list_modification_flag_l0 = r.read_bit()?;
            if header.ref_pic_list_modification_flag_l0 {
                header.ref_pic_list_modification_l0 =
                    Parser::parse_ref_pic_list_modification(r, header.max_pic_num, nalu.is_mvc())
                        .context("Reference picture list 0 modification")?;
            }
        }

        if header.slice_type.is_b() {
            header.ref_pic_list_modification_flag_l1 = r.read_bit()?;
            if header.ref_pic_list_modification_flag_l1 {
                header.ref_pic_list_modification_l1 =
                    Parser::parse_ref_pic_list_modification(r, header.max_pic_num, nalu.is_mvc())
                        .context("Reference picture list 1 modification")?;
            }
        }

        Ok(())
    }

    fn parse_pred_weight_table(
        r: &mut NaluReader,
        sps: &Sps,
        header: &SliceHeader,
    ) -> anyhow::Result<PredWeightTable> {
        let mut pt = PredWeightTable {
            luma_log2_weight_denom: r.read_ue_max(7)?,
            ..Default::default()
        };

        // When luma_weight_l0_flag is equal to 0, luma_weight_l0[i] shall be
        // inferred to be equal to 2 ^ luma_log2_weight_denom for
        // RefPicList0[i].
        let default_luma_weight = 1 << pt.luma_log2_weight_denom;
        pt.luma_weight_l0.fill(default_luma_weight);

        // When luma_weight_l1_flag is equal to 0, luma_weight_l1[i] shall be
        // inferred to be equal to 2 ^ luma_log2_weight_denom for
        // RefPicList1[i].
        if header.slice_type.is_b() {
            pt.luma_weight_l1.fill(default_luma_weight);
        }

        if sps.chroma_array_type() != 0 {
            pt.chroma_log2_weight_denom = r.read_ue_max(7)?;
            let default_chroma_weight = 1 << pt.chroma_log2_weight_denom;

            // When chroma_weight_l0_flag is equal to 0, chroma_weight_l0[i]
            // shall be inferred to be equal to 2 ^ chroma_log2_weight_denom for
            // RefPicList0[i].
            pt.chroma_weight_l0.fill([default_chroma_weight; 2]);

            if header.slice_type.is_b() {
                pt.chroma_weight_l1.fill([default_chroma_weight; 2]);
            }
        }

        for i in 0..=usize::from(header.num_ref_idx_l0_active_minus1) {
            let luma_weight_l0_flag = r.read_bit()?;

            if luma_weight_l0_flag {
                pt.luma_weight_l0[i] = r.read_se_bounded(-128, 127)?;
                pt.luma_offset_l0[i] = r.read_se_bounded(-128, 127)?;
            }

            if sps.chroma_array_type() != 0 {
                let chroma_weight_l0_flag = r.read_bit()?;
                if chroma_weight_l0_flag {
                    for j in 0..2 {
                        pt.chroma_weight_l0[i][j] = r.read_se_bounded(-128, 127)?;
                        pt.chroma_offset_l0[i][j] = r.read_se_bounded(-128, 127)?;
                    }
                }
            }
        }

        if header.slice_type.is_b() {
            for i in 0..=usize::from(header.num_ref_idx_l1_active_minus1) {
                let luma_weight_l1_flag = r.read_bit()?;

                if luma_weight_l1_flag {
                    pt.luma_weight_l1[i] = r.read_se_bounded(-128, 127)?;
                    pt.luma_offset_l1[i] = r.read_se_bounded(-128, 127)?;
                }

                if sps.chroma_array_type() != 0 {
                    let chroma_weight_l1_flag = r.read_bit()?;
                    if chroma_weight_l1_flag {
                        for j in 0..2 {
                            pt.chroma_weight_l1[i][j] = r.read_se_bounded(-128, 127)?;
                            pt.chroma_offset_l1[i][j] = r.read_se_bounded(-128, 127)?;
                        }
                    }
                }
            }
        }

        Ok(pt)
    }

    fn parse_dec_ref_pic_marking(r: &mut NaluReader, nalu: &Nalu) -> anyhow::Result<RefPicMarking> {
        let mut rpm = RefPicMarking::default();

        if nalu.header.idr_pic_flag {
            rpm.no_output_of_prior_pics_flag = r.read_bit()?;
            rpm.long_term_reference_flag = r.read_bit()?;
        } else {
            rpm.adaptive_ref_pic_marking_mode_flag = r.read_bit()?;

            if rpm.adaptive_ref_pic_marking_mode_flag {
                loop {
                    let mut marking = RefPicMarkingInner::default();

                    let mem_mgmt_ctrl_op = r.read_ue_max::<u8>(6)?;
                    marking.memory_management_control_operation = mem_mgmt_ctrl_op;

                    if mem_mgmt_ctrl_op == 0 {
                        break;
                    }

                    if mem_mgmt_ctrl_op == 1 || mem_mgmt_ctrl_op == 3 {
                        marking.difference_of_pic_nums_minus1 = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 2 {
                        marking.long_term_pic_num = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 3 || mem_mgmt_ctrl_op == 6 {
                        marking.long_term_frame_idx = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 4 {
                        marking.max_long_term_frame_idx =
                            MaxLongTermFrameIdx::from_value_plus1(r.read_ue()?);
                    }

                    rpm.inner.push(marking);
                }
            }
        }

        Ok(rpm)
    }

    fn parse_slice_header_inner(
        &self,
        r: &mut NaluReader,
        nalu: &Nalu,
    ) -> anyhow::Result<SliceHeader> {
        if r.num_bits_left() == 0 {
            return Err(anyhow!("Empty slice NAL unit"));
        }

        let mut header = SliceHeader {
            first_mb_in_slice: r.read_ue()?,
            nal_header_bytes: nalu.header.len(),
            ..Default::default()
        };

        let slice_type = r.read_ue_max::<u8>(9)? % 5;
        header.slice_type = SliceType::n(slice_type)
            .with_context(|| format!("Invalid slice type {}", slice_type))?;

        header.pic_parameter_set_id = r.read_ue_max(MAX_PPS_COUNT as u32 - 1)?;

        let pps = self.get_pps(header.pic_parameter_set_id).ok_or_else(|| {
            warn!(
                "couldn't find associated picture parameter set with id: {}",
                header.pic_parameter_set_id
            );
            ParseError::BrokenLink(format!(
                "slice references PPS {} that has not been successfully parsed",
                header.pic_parameter_set_id
            ))
        })?;

        let sps = self.get_sps(pps.seq_parameter_set_id).ok_or_else(|| {
            warn!(
                "couldn't find associated sequence parameter set with id: {}",
                pps.seq_parameter_set_id
            );
            ParseError::BrokenLink(format!(
                "PPS {} references SPS {} that has not been successfully parsed",
                pps.pic_parameter_set_id, pps.seq_parameter_set_id
            ))
        })?;

        if sps.separate_colour_plane_flag {
            header.colour_plane_id = r.read_bits(2)?;
        }

        header.frame_num = r.read_bits(usize::from(sps.log2_max_frame_num_minus4) + 4)?;

        if !sps.frame_mbs_only_flag {
            header.field_pic_flag = r.read_bit()?;
            if header.field_pic_flag {
                header.bottom_field_flag = r.read_bit()?;
            }
        }

        if header.field_pic_flag {
            header.max_pic_num = 2 * sps.max_frame_num();
        } else {
            header.max_pic_num = sps.max_frame_num();
        }

        if nalu.header.idr_pic_flag {
            header.idr_pic_id = r.read_ue_max(0xffff)?;
        }

        let pos = r.position();
        if sps.pic_order_cnt_type == 0 {
            header.pic_order_cnt_lsb =
                r.read_bits(usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4)?;

            if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                header.delta_pic_order_cnt_bottom = r.read_se()?;
            }
        }

        if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
            header.delta_pic_order_cnt[0] = r.read_se()?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                header.delta_pic_order_cnt[1] = r.read_se()?;
            }
        }
        header.pic_order_cnt_bit_size = r.position() - pos;

        if pps.redundant_pic_cnt_present_flag {
            header.redundant_pic_cnt = r.read_ue_max(127)?;
        }

        if header.slice_type.is_b() {
            header.direct_spatial_mv_pred_flag = r.read_bit()?;
        }

        // The PPS defaults apply to every slice type unless overridden.
        header.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
        header.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;

        if header.slice_type.is_p() || header.slice_type.is_sp() || header.slice_type.is_b() {
            header.num_ref_idx_active_override_flag = r.read_bit()?;
            if header.num_ref_idx_active_override_flag {
                header.num_ref_idx_l0_active_minus1 = r.read_ue_max(31)?;
                if header.slice_type.is_b() {
                    header.num_ref_idx_l1_active_minus1 = r.read_ue_max(31)?;
                }
            }
        }

        Parser::parse_ref_pic_list_modifications(r, nalu, &mut header)?;

        if (pps.weighted_pred_flag && (header.slice_type.is_p() || header.slice_type.is_sp()))
            || (pps.weighted_bipred_idc == 1 && header.slice_type.is_b())
        {
            let pred_weight_table = Parser::parse_pred_weight_table(r, sps, &header)
                .context("Prediction weight table")?;
            if self.options.parse_pred_weight_table {
                header.pred_weight_table = pred_weight_table;
            }
        }

        if nalu.header.ref_idc != 0 {
            let pos = r.position();
            let dec_ref_pic_marking = Parser::parse_dec_ref_pic_marking(r, nalu)
                .context("Decoded reference picture marking")?;
            header.dec_ref_pic_marking_bit_size = r.position() - pos;

            if self.options.parse_dec_ref_pic_marking {
                header.dec_ref_pic_marking = dec_ref_pic_marking;
            }
        }

        if pps.entropy_coding_mode_flag && !header.slice_type.is_i() && !header.slice_type.is_si() {
            header.cabac_init_idc = r.read_ue_max(2)?;
        }

        header.slice_qp_delta = r.read_se_bounded(-87, 77)?;

        if header.slice_type.is_sp() || header.slice_type.is_si() {
            if header.slice_type.is_sp() {
                header.sp_for_switch_flag = r.read_bit()?;
            }

            header.slice_qs_delta = r.read_se_bounded(-51, 51)?;
        }

        if pps.deblocking_filter_control_present_flag {
            header.disable_deblocking_filter_idc = r.read_ue_max(2)?;

            if header.disable_deblocking_filter_idc != 1 {
                header.slice_alpha_c0_offset_div2 = r.read_se_bounded(-6, 6)?;
                header.slice_beta_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        if pps.num_slice_groups_minus1 > 0 && (3..=5).contains(&pps.slice_group_map_type) {
            // (7-34) and (7-35) in ITU-T H.264.
            let slice_group_change_rate = u64::from(pps.slice_group_change_rate_minus1) + 1;
            let bits = ceil_log2(sps.pic_size_in_map_units() / slice_group_change_rate + 1);
            header.slice_group_change_cycle = r.read_bits(bits as usize)?;
        }

        header.header_bit_size = r.position();
        header.n_emulation_prevention_bytes = r.num_epb();

        Ok(header)
    }

    /// Parses the header of a slice. The PPS and SPS it references must have
    /// been parsed by this parser.
    pub fn parse_slice_header(&self, nalu: &Nalu) -> Result<SliceHeader, ParseError> {
        debug!("parsing slice header");

        let is_slice =
            nalu.is_slice() || (nalu.header.type_ == NaluType::SliceExt && nalu.is_mvc());
        if !is_slice {
            return Err(ParseError::Invalid(anyhow!(
                "Invalid NALU type: {:?} is not a slice NALU",
                nalu.header.type_
            )));
        }

        Parser::rbsp_reader(nalu)
            .and_then(|mut r| self.parse_slice_header_inner(&mut r, nalu))
            .map_err(|e| {
                warn!("error parsing \"Slice header\": {:#}", e);
                e.into()
            })
    }

    pub fn get_sps(&self, sps_id: u8) -> Option<&Sps> {
        self.spses.get(usize::from(sps_id))?.as_ref()
    }

    pub fn get_pps(&self, pps_id: u8) -> Option<&Pps> {
        self.ppses.get(usize::from(pps_id))?.as_ref()
    }

    /// The most recently parsed SPS or subset SPS.
    pub fn last_sps(&self) -> Option<&Sps> {
        self.get_sps(self.last_sps?)
    }

    /// The most recently parsed PPS.
    pub fn last_pps(&self) -> Option<&Pps> {
        self.get_pps(self.last_pps?)
    }
}
