use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

use nom::bytes::streaming::take;
use nom::error::{Error, ErrorKind};
use nom::number::streaming::be_u8;
use nom::{Err, IResult};

/// Parse one identifier octet.
///
/// LDAP tag numbers always fit into the five low bits of a single octet,
/// so the multi-octet (high-tag-number) form is rejected outright.
pub fn parse_type_header(i: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    let (rest, octet) = be_u8(i)?;
    let class = match TagClass::from_u8(octet >> 6) {
        Some(class) => class,
        None => return Err(Err::Error(Error::new(i, ErrorKind::Tag))),
    };
    let structure = if octet & 0x20 == 0 {
        TagStructure::Primitive
    } else {
        TagStructure::Constructed
    };
    let id = u64::from(octet & 0x1f);
    if id == 0x1f {
        return Err(Err::Failure(Error::new(i, ErrorKind::TooLarge)));
    }
    Ok((rest, (class, structure, id)))
}

/// Parse a definite length, short or long form.
///
/// The indefinite form (0x80) and the reserved octet 0xFF are hard
/// failures: LDAP forbids the former, and a stream containing either
/// cannot be resynchronized.
pub fn parse_length(i: &[u8]) -> IResult<&[u8], u64> {
    let (rest, octet) = be_u8(i)?;
    if octet & 0x80 == 0 {
        return Ok((rest, u64::from(octet)));
    }
    if octet == 0x80 || octet == 0xff {
        return Err(Err::Failure(Error::new(i, ErrorKind::LengthValue)));
    }
    let count = usize::from(octet & 0x7f);
    if count > 8 {
        return Err(Err::Failure(Error::new(i, ErrorKind::TooLarge)));
    }
    let (rest, bytes) = take(count)(rest)?;
    let len = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if len > u64::from(u32::MAX) {
        return Err(Err::Failure(Error::new(i, ErrorKind::TooLarge)));
    }
    Ok((rest, len))
}

/// Extract an unsigned integer value from BER content octets.
pub fn parse_uint(i: &[u8]) -> IResult<&[u8], u64> {
    Ok((
        &i[i.len()..],
        i.iter().fold(0, |res, &byte| (res << 8) | u64::from(byte)),
    ))
}

/// Parse raw BER data into a structure, recursing into constructed
/// values. Returns `Err::Incomplete` until a full TLV is available.
pub fn parse_tag(i: &[u8]) -> IResult<&[u8], StructureTag> {
    let (rest, (class, structure, id)) = parse_type_header(i)?;
    let (rest, len) = parse_length(rest)?;
    let (rest, content) = take(len as usize)(rest)?;
    let payload = match structure {
        TagStructure::Primitive => PL::P(content.to_vec()),
        TagStructure::Constructed => {
            let mut children = Vec::new();
            let mut inner = content;
            while !inner.is_empty() {
                let (next, child) = match parse_tag(inner) {
                    Ok(parsed) => parsed,
                    // a child truncated inside a complete parent can never complete
                    Err(Err::Incomplete(_)) => {
                        return Err(Err::Failure(Error::new(i, ErrorKind::Eof)))
                    }
                    Err(e) => return Err(e),
                };
                inner = next;
                children.push(child);
            }
            PL::C(children)
        }
    };
    Ok((
        rest,
        StructureTag {
            class,
            id,
            payload,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::TagClass;
    use crate::structure::{StructureTag, PL};

    #[test]
    fn test_primitive() {
        let bytes: Vec<u8> = vec![2, 2, 255, 127];
        let result_tag = StructureTag {
            class: TagClass::Universal,
            id: 2u64,
            payload: PL::P(vec![255, 127]),
        };
        let (rest, tag) = parse_tag(&bytes[..]).expect("primitive");
        assert!(rest.is_empty());
        assert_eq!(tag, result_tag);
    }

    #[test]
    fn test_constructed() {
        let bytes: Vec<u8> = vec![
            48, 14, 12, 12, 72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33,
        ];
        let result_tag = StructureTag {
            class: TagClass::Universal,
            id: 16u64,
            payload: PL::C(vec![StructureTag {
                class: TagClass::Universal,
                id: 12u64,
                payload: PL::P(vec![72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33]),
            }]),
        };
        let (rest, tag) = parse_tag(&bytes[..]).expect("constructed");
        assert!(rest.is_empty());
        assert_eq!(tag, result_tag);
    }

    #[test]
    fn test_long_length() {
        let mut bytes: Vec<u8> = vec![0x30, 0x82, 0x01, 0x04, 0x04, 0x82, 0x01, 0x00];
        bytes.extend(std::iter::repeat(0x41).take(256));
        let (rest, tag) = parse_tag(&bytes[..]).expect("long length");
        assert!(rest.is_empty());
        let children = tag.expect_constructed().expect("children");
        assert_eq!(children.len(), 1);
        let inner = children
            .into_iter()
            .next()
            .unwrap()
            .expect_primitive()
            .expect("content");
        assert_eq!(inner.len(), 256);
    }

    #[test]
    fn test_incomplete() {
        let bytes: Vec<u8> = vec![0x30, 0x05, 0x04, 0x03, 0x61];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Incomplete(_))));
    }

    #[test]
    fn test_indefinite_rejected() {
        let bytes: Vec<u8> = vec![0x30, 0x80, 0x04, 0x00, 0x00, 0x00];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }

    #[test]
    fn test_high_tag_number_rejected() {
        let bytes: Vec<u8> = vec![0x1f, 0x81, 0x00, 0x01, 0x00];
        assert!(matches!(parse_tag(&bytes[..]), Err(Err::Failure(_))));
    }

    #[test]
    fn test_uint() {
        let (_, n) = parse_uint(&[0x01, 0x00]).unwrap();
        assert_eq!(n, 256);
    }
}
