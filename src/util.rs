use std::ops::RangeFrom;

use nom::error::{make_error, ErrorKind, ParseError};
use nom::{Err, IResult, InputIter, InputLength, Slice};

use crate::buffer::Buf;

/// Parse a 48 bit big endian integer, the DTLS record sequence number.
pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

#[inline(always)]
pub fn put_u24(out: &mut Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

#[inline(always)]
pub fn put_u48(out: &mut Buf, v: u64) {
    out.extend_from_slice(&v.to_be_bytes()[2..]);
}

#[inline(always)]
pub fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}
