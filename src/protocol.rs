//! Wire protocol plumbing: PDU framing and the LDAPMessage envelope.
//!
//! The codec is a pure byte-stream-to-PDU transformer. Inbound, it buffers
//! bytes until a complete top-level TLV is available, decodes the envelope
//! into `(messageID, protocolOp, controls)`, and hands it downstream;
//! splitting the stream at any byte boundary yields the same PDUs. A
//! structural failure is fatal, since a BER stream can't be resynchronized
//! after one.

use bytes::{Buf, BytesMut};
use log::trace;
use tokio_util::codec::{Decoder, Encoder};

use berkit::common::TagClass;
use berkit::parse::{parse_tag, parse_uint};
use berkit::structure::{StructureTag, PL};
use berkit::structures::{ASNTag, Integer, Sequence, Tag};
use berkit::universal::Types;
use berkit::write;

use crate::controls::{build_tag, parse_controls, Control, RawControl};
use crate::exop::Exop;
use crate::result::{LdapError, LdapResult};
use crate::RequestId;

pub struct LdapCodec;

pub type MaybeControls = Option<Vec<RawControl>>;

impl Decoder for LdapCodec {
    type Item = (RequestId, (Tag, Vec<Control>));
    type Error = LdapError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (amt, tag) = match parse_tag(&buf[..]) {
            Ok((rest, tag)) => (buf.len() - rest.len(), tag),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => {
                return Err(LdapError::MalformedBer {
                    reason: "top-level TLV",
                })
            }
        };
        buf.advance(amt);
        let mut tags = tag
            .match_id(Types::Sequence as u64)
            .and_then(|t| t.expect_constructed())
            .ok_or(LdapError::MalformedPdu {
                reason: "envelope is not a sequence",
            })?;
        let mut maybe_controls = tags.pop().ok_or(LdapError::MalformedPdu {
            reason: "empty envelope",
        })?;
        let has_controls = match maybe_controls {
            StructureTag {
                id,
                class,
                ref payload,
            } if class == TagClass::Context && id == 0 => match *payload {
                PL::C(_) => true,
                PL::P(_) => {
                    return Err(LdapError::MalformedPdu {
                        reason: "primitive controls element",
                    })
                }
            },
            StructureTag { id, class, .. } if class == TagClass::Context && id == 10 => {
                // Active Directory bug workaround
                //
                // AD incorrectly encodes Notice of Disconnection messages. The OID of the
                // Unsolicited Notification should be part of the ExtendedResponse sequence
                // but AD puts it outside, where the optional controls belong. This match
                // arm ignores the stray element.
                maybe_controls = tags.pop().ok_or(LdapError::MalformedPdu {
                    reason: "envelope with a lone trailing element",
                })?;
                false
            }
            _ => false,
        };
        let (protoop, controls) = if has_controls {
            (
                tags.pop().ok_or(LdapError::MalformedPdu {
                    reason: "missing protocol op",
                })?,
                Some(maybe_controls),
            )
        } else {
            (maybe_controls, None)
        };
        let controls = match controls {
            Some(controls) => parse_controls(controls)?,
            None => vec![],
        };
        let msgid = tags
            .pop()
            .and_then(|t| t.match_class(TagClass::Universal))
            .and_then(|t| t.match_id(Types::Integer as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or(LdapError::MalformedPdu {
                reason: "message id is not an integer",
            })?;
        let id = match parse_uint(&msgid) {
            Ok((_, id)) => id as RequestId,
            Err(_) => {
                return Err(LdapError::MalformedPdu {
                    reason: "message id value",
                })
            }
        };
        if protoop.class != TagClass::Application {
            return Err(LdapError::MalformedPdu {
                reason: "protocol op is not application-tagged",
            });
        }
        Ok(Some((id, (Tag::StructureTag(protoop), controls))))
    }
}

impl Encoder<(RequestId, Tag, MaybeControls)> for LdapCodec {
    type Error = LdapError;

    fn encode(
        &mut self,
        msg: (RequestId, Tag, MaybeControls),
        into: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let (id, tag, controls) = msg;
        let outstruct = {
            let mut envelope = vec![
                Tag::Integer(Integer {
                    inner: i64::from(id),
                    ..Default::default()
                }),
                tag,
            ];
            if let Some(controls) = controls {
                envelope.push(Tag::StructureTag(StructureTag {
                    id: 0,
                    class: TagClass::Context,
                    payload: PL::C(controls.into_iter().map(build_tag).collect()),
                }));
            }
            Tag::Sequence(Sequence {
                inner: envelope,
                ..Default::default()
            })
            .into_structure()
        };
        trace!("sending PDU: {:?}", &outstruct);
        write::encode_into(into, outstruct)?;
        Ok(())
    }
}

/// An operation result together with the extended-response components,
/// parsed out of the raw protocol op.
pub struct LdapResultExt(pub LdapResult, pub Exop);

impl From<Tag> for LdapResultExt {
    fn from(t: Tag) -> LdapResultExt {
        let t = match t {
            Tag::StructureTag(t) => t,
            Tag::Null(_) => {
                return LdapResultExt(
                    LdapResult {
                        rc: 0,
                        matched: String::from(""),
                        text: String::from(""),
                        refs: vec![],
                        ctrls: vec![],
                    },
                    Exop {
                        name: None,
                        val: None,
                    },
                )
            }
            _ => unimplemented!(),
        };
        let mut tags = t.expect_constructed().expect("result sequence").into_iter();
        let rc = match parse_uint(
            tags.next()
                .expect("element")
                .match_class(TagClass::Universal)
                .and_then(|t| t.match_id(Types::Enumerated as u64))
                .and_then(|t| t.expect_primitive())
                .expect("result code")
                .as_slice(),
        ) {
            Ok((_, rc)) => rc as u32,
            _ => panic!("failed to parse result code"),
        };
        let matched = String::from_utf8(
            tags.next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("matched dn");
        let text = String::from_utf8(
            tags.next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("diagnostic message");
        let mut refs = Vec::new();
        let mut exop_name = None;
        let mut exop_val = None;
        for tag in tags {
            match (tag.class, tag.id) {
                (TagClass::Context, 3) => {
                    refs.extend(crate::search::parse_refs(tag));
                }
                (TagClass::Context, 10) => {
                    exop_name = Some(
                        String::from_utf8(tag.expect_primitive().expect("octet string"))
                            .expect("response name"),
                    );
                }
                (TagClass::Context, 11) => {
                    exop_val = Some(tag.expect_primitive().expect("octet string"));
                }
                _ => (),
            }
        }
        LdapResultExt(
            LdapResult {
                rc,
                matched,
                text,
                refs,
                ctrls: vec![],
            },
            Exop {
                name: exop_name,
                val: exop_val,
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bind_response_pdu(msgid: i32, rc: i64) -> BytesMut {
        let msg = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: i64::from(msgid),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    id: 1,
                    class: TagClass::Application,
                    inner: vec![
                        Tag::Enumerated(berkit::structures::Enumerated {
                            inner: rc,
                            ..Default::default()
                        }),
                        Tag::OctetString(berkit::structures::OctetString {
                            ..Default::default()
                        }),
                        Tag::OctetString(berkit::structures::OctetString {
                            ..Default::default()
                        }),
                    ],
                }),
            ],
            ..Default::default()
        })
        .into_structure();
        let mut buf = BytesMut::new();
        write::encode_into(&mut buf, msg).expect("encoded");
        buf
    }

    #[test]
    fn decode_whole_pdu() {
        let mut buf = bind_response_pdu(1, 0);
        let (id, (tag, controls)) = LdapCodec
            .decode(&mut buf)
            .expect("decode")
            .expect("one pdu");
        assert_eq!(id, 1);
        assert!(controls.is_empty());
        assert!(buf.is_empty());
        let LdapResultExt(result, _) = LdapResultExt::from(tag);
        assert_eq!(result.rc, 0);
    }

    #[test]
    fn decode_is_split_agnostic() {
        let whole = bind_response_pdu(7, 49);
        for split in 1..whole.len() {
            let mut buf = BytesMut::from(&whole[..split]);
            assert!(LdapCodec.decode(&mut buf).expect("no error").is_none());
            buf.extend_from_slice(&whole[split..]);
            let (id, (tag, _)) = LdapCodec
                .decode(&mut buf)
                .expect("decode")
                .expect("one pdu");
            assert_eq!(id, 7);
            let LdapResultExt(result, _) = LdapResultExt::from(tag);
            assert_eq!(result.rc, 49);
        }
    }

    #[test]
    fn decode_two_pdus_in_one_read() {
        let mut buf = bind_response_pdu(1, 0);
        buf.extend_from_slice(&bind_response_pdu(2, 0));
        let (first, _) = LdapCodec.decode(&mut buf).expect("decode").expect("pdu");
        let (second, _) = LdapCodec.decode(&mut buf).expect("decode").expect("pdu");
        assert_eq!((first, second), (1, 2));
        assert!(buf.is_empty());
    }

    #[test]
    fn reject_non_sequence_envelope() {
        let mut buf = BytesMut::from(&[0x04, 0x02, 0x61, 0x62][..]);
        assert!(matches!(
            LdapCodec.decode(&mut buf),
            Err(LdapError::MalformedPdu { .. })
        ));
    }

    #[test]
    fn reject_indefinite_length() {
        let mut buf = BytesMut::from(&[0x30, 0x80, 0x00, 0x00][..]);
        assert!(matches!(
            LdapCodec.decode(&mut buf),
            Err(LdapError::MalformedBer { .. })
        ));
    }
}
