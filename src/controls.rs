//! Control construction and parsing.
//!
//! A control can be associated with a request or a response. A request
//! control is created by instantiating its structure and converting it to
//! [`RawControl`](struct.RawControl.html), the general form which can be
//! passed to [`with_controls()`](../struct.Ldap.html#method.with_controls).
//!
//! `RawControl`, together with an optional instance of
//! [`ControlType`](types/index.html), forms the type
//! [`Control`](struct.Control.html); a vector of `Control`s is attached to
//! every result which can carry one.
//!
//! The first element of `Control` will have a value if the parser recognizes
//! the control's OID as one that is implemented by the library itself. A
//! recognized response control can be parsed by calling
//! [`parse()`](struct.RawControl.html#method.parse) on the `RawControl`
//! representing it; a third-party control must implement the
//! [`ControlParser`](trait.ControlParser.html) trait to support this
//! interface.

use std::collections::HashMap;

use bytes::BytesMut;

use berkit::common::TagClass;
use berkit::parse::{parse_tag, parse_uint};
use berkit::structure::{StructureTag, PL};
use berkit::structures::{ASNTag, Boolean, Integer, OctetString, Sequence, Tag};
use berkit::universal::Types;
use berkit::write;

use crate::result::LdapError;

pub mod types {
    //! Recognized control types.
    pub type ControlType = self::inner::_ControlType;
    pub use self::inner::_ControlType::PagedResults;
    mod inner {
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub enum _ControlType {
            PagedResults,
            #[doc(hidden)]
            _Nonexhaustive,
        }
    }
}
use self::types::ControlType;

lazy_static::lazy_static! {
    static ref CONTROLS: HashMap<&'static str, ControlType> = {
        let mut map = HashMap::new();
        map.insert(PAGED_RESULTS_OID, types::PagedResults);
        map
    };
}

/// Conversion trait for single- and multi-control argument variants.
pub trait IntoRawControlVec {
    fn into(self) -> Vec<RawControl>;
}

impl IntoRawControlVec for Vec<RawControl> {
    fn into(self) -> Vec<RawControl> {
        self
    }
}

impl IntoRawControlVec for RawControl {
    fn into(self) -> Vec<RawControl> {
        vec![self]
    }
}

/// Mark a control as critical.
pub trait MakeCritical: Into<RawControl> {
    fn critical(self) -> RawControl
    where
        Self: Sized,
    {
        let mut ctrl = self.into();
        ctrl.crit = true;
        ctrl
    }
}

/// Response control parsing.
pub trait ControlParser {
    fn parse(val: &[u8]) -> Self;
}

/// Control known to the library, accompanied by its raw form.
#[derive(Clone, Debug)]
pub struct Control(pub Option<ControlType>, pub RawControl);

/// Generic control.
#[derive(Clone, Debug, PartialEq)]
pub struct RawControl {
    /// OID of the control.
    pub ctype: String,
    /// Criticality flag.
    pub crit: bool,
    /// Raw value of the control, if any.
    pub val: Option<Vec<u8>>,
}

impl RawControl {
    /// Parse the control value with the parser of a recognized control type.
    pub fn parse<T: ControlParser>(&self) -> T {
        T::parse(self.val.as_ref().expect("control value").as_slice())
    }
}

pub(crate) fn build_tag(ctrl: RawControl) -> StructureTag {
    let mut seq = vec![Tag::OctetString(OctetString {
        inner: Vec::from(ctrl.ctype.as_bytes()),
        ..Default::default()
    })];
    if ctrl.crit {
        seq.push(Tag::Boolean(Boolean {
            inner: true,
            ..Default::default()
        }));
    }
    if let Some(val) = ctrl.val {
        seq.push(Tag::OctetString(OctetString {
            inner: val,
            ..Default::default()
        }));
    }
    Tag::Sequence(Sequence {
        inner: seq,
        ..Default::default()
    })
    .into_structure()
}

const CTRL_ERR: LdapError = LdapError::MalformedPdu {
    reason: "response control structure",
};

/// Decode the control set attached to a response envelope.
///
/// Errors instead of panicking: controls are parsed on the connection's
/// hot receive path, where a structural failure must poison the connection
/// rather than the process.
pub(crate) fn parse_controls(t: StructureTag) -> Result<Vec<Control>, LdapError> {
    let tags = t.expect_constructed().ok_or(CTRL_ERR)?;
    let mut ctrls = Vec::new();
    for ctrl in tags {
        let mut components = ctrl.expect_constructed().ok_or(CTRL_ERR)?.into_iter();
        let ctype = components
            .next()
            .and_then(|t| t.expect_primitive())
            .and_then(|v| String::from_utf8(v).ok())
            .ok_or(CTRL_ERR)?;
        let next = components.next();
        let (crit, maybe_val) = match next {
            None => (false, None),
            Some(c) => match c {
                StructureTag {
                    id,
                    class: _,
                    ref payload,
                } if id == Types::Boolean as u64 => match *payload {
                    PL::P(ref v) if !v.is_empty() => (v[0] != 0, components.next()),
                    _ => return Err(CTRL_ERR),
                },
                StructureTag { id, .. } if id == Types::OctetString as u64 => (false, Some(c)),
                _ => return Err(CTRL_ERR),
            },
        };
        let val = match maybe_val {
            None => None,
            Some(v) => Some(v.expect_primitive().ok_or(CTRL_ERR)?),
        };
        let known_type = CONTROLS.get(&*ctype).copied();
        ctrls.push(Control(known_type, RawControl { ctype, crit, val }));
    }
    Ok(ctrls)
}

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Paged Results control ([RFC 2696](https://tools.ietf.org/html/rfc2696)).
///
/// This struct can be used both for requests and responses, although `size`
/// means different things in each case.
#[derive(Clone, Debug)]
pub struct PagedResults {
    /// For requests, desired page size. For responses, a server's estimate
    /// of the result set size, if non-zero.
    pub size: i32,
    /// Paging cookie.
    pub cookie: Vec<u8>,
}

impl MakeCritical for PagedResults {}

impl From<PagedResults> for RawControl {
    fn from(pr: PagedResults) -> RawControl {
        let cookie_len = pr.cookie.len();
        let cval = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: i64::from(pr.size),
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: pr.cookie,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        })
        .into_structure();
        let mut buf = BytesMut::with_capacity(cookie_len + 16);
        write::encode_into(&mut buf, cval).expect("encoded");
        RawControl {
            ctype: PAGED_RESULTS_OID.to_owned(),
            crit: false,
            val: Some(Vec::from(&buf[..])),
        }
    }
}

impl ControlParser for PagedResults {
    fn parse(val: &[u8]) -> PagedResults {
        let mut pr_comps = match parse_tag(val) {
            Ok((_, tag)) => tag,
            _ => panic!("failed to parse paged results value components"),
        }
        .expect_constructed()
        .expect("paged results components")
        .into_iter();
        let size = match parse_uint(
            pr_comps
                .next()
                .expect("element")
                .match_class(TagClass::Universal)
                .and_then(|t| t.match_id(Types::Integer as u64))
                .and_then(|t| t.expect_primitive())
                .expect("paged results size")
                .as_slice(),
        ) {
            Ok((_, size)) => size as i32,
            _ => panic!("failed to parse size"),
        };
        let cookie = pr_comps
            .next()
            .expect("element")
            .expect_primitive()
            .expect("octet string");
        PagedResults { size, cookie }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paged_results_roundtrip() {
        let raw: RawControl = PagedResults {
            size: 50,
            cookie: vec![1, 2, 3],
        }
        .into();
        assert_eq!(raw.ctype, PAGED_RESULTS_OID);
        let parsed: PagedResults = raw.parse();
        assert_eq!(parsed.size, 50);
        assert_eq!(parsed.cookie, vec![1, 2, 3]);
    }

    #[test]
    fn parse_control_set() {
        let ctrls = Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: 0,
            inner: vec![Tag::Sequence(Sequence {
                inner: vec![
                    Tag::OctetString(OctetString {
                        inner: Vec::from(&b"1.2.3.4"[..]),
                        ..Default::default()
                    }),
                    Tag::Boolean(Boolean {
                        inner: true,
                        ..Default::default()
                    }),
                ],
                ..Default::default()
            })],
            ..Default::default()
        })
        .into_structure();
        let parsed = parse_controls(ctrls).expect("controls");
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].0.is_none());
        assert_eq!(
            parsed[0].1,
            RawControl {
                ctype: String::from("1.2.3.4"),
                crit: true,
                val: None,
            }
        );
    }

    #[test]
    fn critical_marker() {
        let raw = PagedResults {
            size: 10,
            cookie: vec![],
        }
        .critical();
        assert!(raw.crit);
    }
}
