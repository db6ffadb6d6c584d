// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec-agnostic bitstream access.

pub mod bit_reader;
pub mod byte_reader;

pub use bit_reader::BitReader;
pub use bit_reader::BitReaderError;
pub use byte_reader::ByteReader;
pub use byte_reader::ByteReaderError;
