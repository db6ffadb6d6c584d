// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream readers and H.264 parameter set, slice header and SEI parsers.
//!
//! NAL units are located with [`codec::h264::nalu::Nalu`] or iterated with
//! [`codec::h264::nalu::NalIterator`], then handed to a
//! [`codec::h264::parser::Parser`], which keeps the parameter sets that later
//! units refer to.

pub mod bitstream_utils;
pub mod codec;

/// Size of a picture, in samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}
