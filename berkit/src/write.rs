use std::io;

use bytes::BytesMut;

use crate::common::{TagClass, TagStructure};
use crate::structure::{StructureTag, PL};

/// Serialize a structure into the output buffer.
pub fn encode_into(buf: &mut BytesMut, tag: StructureTag) -> io::Result<()> {
    let mut out = Vec::with_capacity(128);
    render(tag, &mut out);
    buf.extend_from_slice(&out);
    Ok(())
}

fn render(tag: StructureTag, out: &mut Vec<u8>) {
    match tag.payload {
        PL::P(bytes) => {
            write_type(out, tag.class, TagStructure::Primitive, tag.id);
            write_length(out, bytes.len());
            out.extend_from_slice(&bytes);
        }
        PL::C(children) => {
            let mut body = Vec::new();
            for child in children {
                render(child, &mut body);
            }
            write_type(out, tag.class, TagStructure::Constructed, tag.id);
            write_length(out, body.len());
            out.extend_from_slice(&body);
        }
    }
}

pub fn write_type(out: &mut Vec<u8>, class: TagClass, structure: TagStructure, id: u64) {
    out.push((class as u8) << 6 | (structure as u8) << 5 | id as u8);
}

/// Emit the minimal definite length: short form up to 127, long form above.
pub fn write_length(out: &mut Vec<u8>, len: usize) {
    if len <= 127 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse_tag;

    #[test]
    fn test_short_length() {
        let mut out = Vec::new();
        write_length(&mut out, 127);
        assert_eq!(out, vec![127]);
    }

    #[test]
    fn test_long_length() {
        let mut out = Vec::new();
        write_length(&mut out, 300);
        assert_eq!(out, vec![0x82, 0x01, 0x2c]);
    }

    #[test]
    fn test_roundtrip() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: PL::C(vec![
                StructureTag {
                    class: TagClass::Universal,
                    id: 2,
                    payload: PL::P(vec![1]),
                },
                StructureTag {
                    class: TagClass::Application,
                    id: 1,
                    payload: PL::C(vec![StructureTag {
                        class: TagClass::Context,
                        id: 0,
                        payload: PL::P(Vec::from(&b"secret"[..])),
                    }]),
                },
            ]),
        };
        let mut buf = BytesMut::new();
        encode_into(&mut buf, tag.clone()).expect("encoded");
        let (rest, parsed) = parse_tag(&buf[..]).expect("parsed");
        assert!(rest.is_empty());
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_roundtrip_long_form() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(vec![0x5a; 300]),
        };
        let mut buf = BytesMut::new();
        encode_into(&mut buf, tag.clone()).expect("encoded");
        assert_eq!(buf[1], 0x82);
        let (rest, parsed) = parse_tag(&buf[..]).expect("parsed");
        assert!(rest.is_empty());
        assert_eq!(parsed, tag);
    }
}
