//! Extended operation construction and parsing.
//!
//! A generic exop is represented by [`Exop`](struct.Exop.html). If a
//! particular exop is implemented by this library, it has one or two
//! associated structs; one for constructing requests, and another for
//! parsing responses. A request struct must implement the `From` conversion
//! of itself into `Exop`. A response struct must implement the
//! [`ExopParser`](trait.ExopParser.html) trait.

use std::str;

use bytes::BytesMut;

use berkit::common::TagClass;
use berkit::parse::parse_tag;
use berkit::structures::{ASNTag, OctetString, Sequence, Tag};
use berkit::write;

/// Generic extended operation.
#[derive(Clone, Debug)]
pub struct Exop {
    /// OID of the operation. It may be absent in the response.
    pub name: Option<String>,
    /// Request or response value. It may be absent in both.
    pub val: Option<Vec<u8>>,
}

/// Conversion trait for extended response values.
pub trait ExopParser {
    fn parse(val: &[u8]) -> Self;
}

impl Exop {
    /// Parse the exop value with the parser of a recognized response type.
    pub fn parse<T: ExopParser>(&self) -> T {
        T::parse(self.val.as_ref().expect("exop value").as_slice())
    }
}

pub(crate) fn construct_exop(exop: Exop) -> Vec<Tag> {
    assert!(exop.name.is_some());
    let mut seq = vec![Tag::OctetString(OctetString {
        id: 0,
        class: TagClass::Context,
        inner: exop.name.expect("exop name").into_bytes(),
    })];
    if let Some(val) = exop.val {
        seq.push(Tag::OctetString(OctetString {
            id: 1,
            class: TagClass::Context,
            inner: val,
        }));
    }
    seq
}

pub const PASSMOD_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

/// Password Modify extended operation ([RFC 3062](https://tools.ietf.org/html/rfc3062)).
///
/// The structure contains elements of a Password Modify request. The precise
/// semantics of having a particular field present or absent will depend on
/// the server receiving the request; consult the server documentation. Some
/// rules are prescribed by the RFC and should generally apply:
///
/// * The `user_id` field contains the identity of the user whose password is
///   being changed. This may or may not be a DN. If the field is absent, the
///   identity associated with the current connection will be used.
///
/// * If `old_pass` is present, it must match the existing password.
///
/// * If `new_pass` is not present, the server may autogenerate the new
///   password.
///
/// Although the specification doesn't constrain the values of old and new
/// passwords, this implementation limits them to UTF-8 strings.
#[derive(Clone, Debug)]
pub struct PasswordModify<'a> {
    pub user_id: Option<&'a str>,
    pub old_pass: Option<&'a str>,
    pub new_pass: Option<&'a str>,
}

/// Password Modify response.
///
/// If the server has generated a new password, it must send its value in the
/// response.
#[derive(Clone, Debug)]
pub struct PasswordModifyResp {
    pub gen_pass: String,
}

impl<'a> From<PasswordModify<'a>> for Exop {
    fn from(pm: PasswordModify<'a>) -> Exop {
        let mut pm_vec = vec![];
        if let Some(user_id) = pm.user_id {
            pm_vec.push(Tag::OctetString(OctetString {
                id: 0,
                class: TagClass::Context,
                inner: Vec::from(user_id.as_bytes()),
            }));
        }
        if let Some(old_pass) = pm.old_pass {
            pm_vec.push(Tag::OctetString(OctetString {
                id: 1,
                class: TagClass::Context,
                inner: Vec::from(old_pass.as_bytes()),
            }));
        }
        if let Some(new_pass) = pm.new_pass {
            pm_vec.push(Tag::OctetString(OctetString {
                id: 2,
                class: TagClass::Context,
                inner: Vec::from(new_pass.as_bytes()),
            }));
        }
        let val = if pm_vec.is_empty() {
            None
        } else {
            let pm_val = Tag::Sequence(Sequence {
                inner: pm_vec,
                ..Default::default()
            })
            .into_structure();
            let mut buf = BytesMut::new();
            write::encode_into(&mut buf, pm_val).expect("encoded");
            Some(Vec::from(&buf[..]))
        };
        Exop {
            name: Some(PASSMOD_OID.to_owned()),
            val,
        }
    }
}

impl ExopParser for PasswordModifyResp {
    fn parse(val: &[u8]) -> PasswordModifyResp {
        let tags = match parse_tag(val) {
            Ok((_, tag)) => tag,
            _ => panic!("failed to parse password modify return value"),
        };
        let mut tags = tags
            .expect_constructed()
            .expect("password modify sequence")
            .into_iter();
        let gen_pass = tags
            .next()
            .expect("element")
            .match_class(TagClass::Context)
            .and_then(|t| t.match_id(0))
            .and_then(|t| t.expect_primitive())
            .expect("generated password");
        let gen_pass = String::from_utf8(gen_pass).expect("generated password not UTF-8");
        PasswordModifyResp { gen_pass }
    }
}

pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Who Am I extended operation ([RFC 4532](https://tools.ietf.org/html/rfc4532)).
///
/// This operation doesn't have any data associated with a request. It can be
/// combined with request controls, and if those controls change the
/// authorization status of the request, it will be reflected in the response.
#[derive(Clone, Debug)]
pub struct WhoAmI;

/// Who Am I response.
#[derive(Clone, Debug)]
pub struct WhoAmIResp {
    /// Authorization Id, the identity which LDAP uses for access control
    /// on this connection.
    pub authzid: String,
}

impl From<WhoAmI> for Exop {
    fn from(_w: WhoAmI) -> Exop {
        Exop {
            name: Some(WHOAMI_OID.to_owned()),
            val: None,
        }
    }
}

impl ExopParser for WhoAmIResp {
    fn parse(val: &[u8]) -> WhoAmIResp {
        WhoAmIResp {
            authzid: str::from_utf8(val).expect("authzid").to_owned(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passmod_request_value() {
        let exop: Exop = PasswordModify {
            user_id: Some("uid=u,dc=x"),
            old_pass: Some("old"),
            new_pass: Some("new"),
        }
        .into();
        assert_eq!(exop.name.as_deref(), Some(PASSMOD_OID));
        let val = exop.val.expect("request value");
        let (_, tag) = parse_tag(&val).expect("request sequence");
        let comps = tag.expect_constructed().expect("components");
        assert_eq!(
            comps.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn passmod_empty_request_has_no_value() {
        let exop: Exop = PasswordModify {
            user_id: None,
            old_pass: None,
            new_pass: None,
        }
        .into();
        assert!(exop.val.is_none());
    }
}
