#![no_main]

use cros_codecparsers::codec::h264::nalu::NalFormat;
use cros_codecparsers::codec::h264::nalu::NalIterator;
use cros_codecparsers::codec::h264::nalu::NaluType;
use cros_codecparsers::codec::h264::parser::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The first byte picks the framing.
    let Some((&selector, data)) = data.split_first() else {
        return;
    };

    let format = match selector % 4 {
        0 => NalFormat::Avc { length_size: 1 },
        1 => NalFormat::Avc { length_size: 2 },
        2 => NalFormat::Avc { length_size: 4 },
        _ => NalFormat::AnnexB,
    };

    let mut parser = Parser::default();

    for nalu in NalIterator::new(data, format) {
        match nalu.header.type_ {
            NaluType::Sei => {
                let _ = parser.parse_sei(&nalu);
            }
            _ if nalu.is_slice() || nalu.is_mvc() => {
                let _ = parser.parse_slice_header(&nalu);
            }
            _ => {
                let _ = parser.parse_nal(&nalu);
            }
        }
    }
});
