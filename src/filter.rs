//! Search filter representation.
//!
//! Filters form a recursive tree: `And`/`Or`/`Not` composites over match
//! leaves. A filter is built with the constructor methods and consumed by
//! the Search operation, which encodes it into the request PDU. Assertion
//! values are stored raw; the `\NN` escaping of NUL, parentheses, the
//! asterisk and the backslash is applied when the filter is encoded.

use berkit::common::TagClass;
use berkit::structures::{Boolean, ExplicitTag, OctetString, Sequence, Tag};

use crate::result::{LdapError, Result};
use crate::util::ldap_escape;

const AND_FILT: u64 = 0;
const OR_FILT: u64 = 1;
const NOT_FILT: u64 = 2;

const EQ_MATCH: u64 = 3;
const SUBSTR_MATCH: u64 = 4;
const GTE_MATCH: u64 = 5;
const LTE_MATCH: u64 = 6;
const PRES_MATCH: u64 = 7;
const APPROX_MATCH: u64 = 8;
const EXT_MATCH: u64 = 9;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

/// An LDAP search filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, String),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Approx(String, String),
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        fin: Option<String>,
    },
    Extensible {
        rule: Option<String>,
        attr: Option<String>,
        value: String,
        dn_attrs: bool,
    },
}

impl Filter {
    pub fn and(children: Vec<Filter>) -> Filter {
        Filter::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Filter {
        Filter::Or(children)
    }

    pub fn not(inner: Filter) -> Filter {
        Filter::Not(Box::new(inner))
    }

    pub fn equality(attr: &str, value: &str) -> Filter {
        Filter::Equality(attr.to_owned(), value.to_owned())
    }

    pub fn greater_or_equal(attr: &str, value: &str) -> Filter {
        Filter::GreaterOrEqual(attr.to_owned(), value.to_owned())
    }

    pub fn less_or_equal(attr: &str, value: &str) -> Filter {
        Filter::LessOrEqual(attr.to_owned(), value.to_owned())
    }

    pub fn approx(attr: &str, value: &str) -> Filter {
        Filter::Approx(attr.to_owned(), value.to_owned())
    }

    pub fn present(attr: &str) -> Filter {
        Filter::Present(attr.to_owned())
    }

    /// Build a filter from a match pattern, splitting it on `*`.
    ///
    /// A pattern without an asterisk is an equality match, a lone asterisk
    /// is a presence test, and anything else becomes a substring match with
    /// the fragments around the asterisks as initial/any/final parts. Empty
    /// fragments between adjacent asterisks are dropped.
    pub fn like(attr: &str, pattern: &str) -> Filter {
        if pattern == "*" {
            return Filter::Present(attr.to_owned());
        }
        if !pattern.contains('*') {
            return Filter::Equality(attr.to_owned(), pattern.to_owned());
        }
        let parts: Vec<&str> = pattern.split('*').collect();
        let last = parts.len() - 1;
        let initial = (!parts[0].is_empty()).then(|| parts[0].to_owned());
        let fin = (!parts[last].is_empty()).then(|| parts[last].to_owned());
        let any = parts[1..last]
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| (*p).to_owned())
            .collect();
        Filter::Substring {
            attr: attr.to_owned(),
            initial,
            any,
            fin,
        }
    }

    /// Encode the filter into its request representation. Structurally
    /// invalid trees (empty composites, substring matches without parts)
    /// are rejected here.
    pub(crate) fn into_tag(self) -> Result<Tag> {
        match self {
            Filter::And(children) => composite(AND_FILT, children),
            Filter::Or(children) => composite(OR_FILT, children),
            Filter::Not(inner) => Ok(Tag::ExplicitTag(ExplicitTag {
                class: TagClass::Context,
                id: NOT_FILT,
                inner: Box::new(inner.into_tag()?),
            })),
            Filter::Equality(attr, value) => Ok(attr_value(EQ_MATCH, attr, &value)),
            Filter::GreaterOrEqual(attr, value) => Ok(attr_value(GTE_MATCH, attr, &value)),
            Filter::LessOrEqual(attr, value) => Ok(attr_value(LTE_MATCH, attr, &value)),
            Filter::Approx(attr, value) => Ok(attr_value(APPROX_MATCH, attr, &value)),
            Filter::Present(attr) => Ok(Tag::OctetString(OctetString {
                class: TagClass::Context,
                id: PRES_MATCH,
                inner: attr.into_bytes(),
            })),
            Filter::Substring {
                attr,
                initial,
                any,
                fin,
            } => {
                if initial.is_none() && any.is_empty() && fin.is_none() {
                    return Err(LdapError::ProtocolViolation {
                        reason: "substring filter without parts",
                    });
                }
                let mut parts = vec![];
                if let Some(initial) = initial {
                    parts.push(sub_part(SUB_INITIAL, &initial));
                }
                for sub_any in &any {
                    parts.push(sub_part(SUB_ANY, sub_any));
                }
                if let Some(fin) = fin {
                    parts.push(sub_part(SUB_FINAL, &fin));
                }
                Ok(Tag::Sequence(Sequence {
                    class: TagClass::Context,
                    id: SUBSTR_MATCH,
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: attr.into_bytes(),
                            ..Default::default()
                        }),
                        Tag::Sequence(Sequence {
                            inner: parts,
                            ..Default::default()
                        }),
                    ],
                }))
            }
            Filter::Extensible {
                rule,
                attr,
                value,
                dn_attrs,
            } => {
                if rule.is_none() && attr.is_none() {
                    return Err(LdapError::ProtocolViolation {
                        reason: "extensible match needs a rule or an attribute",
                    });
                }
                let mut inner = vec![];
                if let Some(rule) = rule {
                    inner.push(Tag::OctetString(OctetString {
                        class: TagClass::Context,
                        id: 1,
                        inner: rule.into_bytes(),
                    }));
                }
                if let Some(attr) = attr {
                    inner.push(Tag::OctetString(OctetString {
                        class: TagClass::Context,
                        id: 2,
                        inner: attr.into_bytes(),
                    }));
                }
                inner.push(Tag::OctetString(OctetString {
                    class: TagClass::Context,
                    id: 3,
                    inner: escaped(&value),
                }));
                if dn_attrs {
                    inner.push(Tag::Boolean(Boolean {
                        class: TagClass::Context,
                        id: 4,
                        inner: dn_attrs,
                    }));
                }
                Ok(Tag::Sequence(Sequence {
                    class: TagClass::Context,
                    id: EXT_MATCH,
                    inner,
                }))
            }
        }
    }
}

fn escaped(value: &str) -> Vec<u8> {
    ldap_escape(value).into_owned().into_bytes()
}

fn composite(id: u64, children: Vec<Filter>) -> Result<Tag> {
    if children.is_empty() {
        return Err(LdapError::ProtocolViolation {
            reason: "empty composite filter",
        });
    }
    let inner = children
        .into_iter()
        .map(Filter::into_tag)
        .collect::<Result<Vec<_>>>()?;
    Ok(Tag::Sequence(Sequence {
        class: TagClass::Context,
        id,
        inner,
    }))
}

fn attr_value(id: u64, attr: String, value: &str) -> Tag {
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.into_bytes(),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: escaped(value),
                ..Default::default()
            }),
        ],
    })
}

fn sub_part(id: u64, part: &str) -> Tag {
    Tag::OctetString(OctetString {
        class: TagClass::Context,
        id,
        inner: escaped(part),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use berkit::structure::{StructureTag, PL};
    use berkit::structures::ASNTag;

    fn encode(f: Filter) -> StructureTag {
        f.into_tag().expect("filter tag").into_structure()
    }

    #[test]
    fn equality_shape() {
        let st = encode(Filter::equality("cn", "alice"));
        assert_eq!(st.class, TagClass::Context);
        assert_eq!(st.id, EQ_MATCH);
        let comps = st.expect_constructed().expect("components");
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].payload, PL::P(Vec::from(&b"cn"[..])));
        assert_eq!(comps[1].payload, PL::P(Vec::from(&b"alice"[..])));
    }

    #[test]
    fn value_escaping() {
        let st = encode(Filter::equality("cn", "a*b"));
        let comps = st.expect_constructed().expect("components");
        assert_eq!(comps[1].payload, PL::P(Vec::from(&b"a\\2ab"[..])));
    }

    #[test]
    fn presence_shape() {
        let st = encode(Filter::like("objectClass", "*"));
        assert_eq!(st.class, TagClass::Context);
        assert_eq!(st.id, PRES_MATCH);
        assert_eq!(st.payload, PL::P(Vec::from(&b"objectClass"[..])));
    }

    #[test]
    fn like_splits_substrings() {
        let f = Filter::like("cn", "ab*cd*ef");
        assert_eq!(
            f,
            Filter::Substring {
                attr: String::from("cn"),
                initial: Some(String::from("ab")),
                any: vec![String::from("cd")],
                fin: Some(String::from("ef")),
            }
        );
        let st = encode(f);
        assert_eq!(st.id, SUBSTR_MATCH);
        let comps = st.expect_constructed().expect("components");
        let parts = comps[1].clone().expect_constructed().expect("parts");
        assert_eq!(
            parts.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![SUB_INITIAL, SUB_ANY, SUB_FINAL]
        );
    }

    #[test]
    fn like_open_ended() {
        let f = Filter::like("cn", "ab*");
        assert_eq!(
            f,
            Filter::Substring {
                attr: String::from("cn"),
                initial: Some(String::from("ab")),
                any: vec![],
                fin: None,
            }
        );
    }

    #[test]
    fn composite_shape() {
        let st = encode(Filter::and(vec![
            Filter::present("objectClass"),
            Filter::not(Filter::equality("uid", "root")),
        ]));
        assert_eq!(st.id, AND_FILT);
        let comps = st.expect_constructed().expect("children");
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[1].id, NOT_FILT);
        let inner = comps[1].clone().expect_constructed().expect("not child");
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].id, EQ_MATCH);
    }

    #[test]
    fn empty_composite_rejected() {
        assert!(matches!(
            Filter::or(vec![]).into_tag(),
            Err(LdapError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn extensible_shape() {
        let st = encode(Filter::Extensible {
            rule: Some(String::from("caseExactMatch")),
            attr: Some(String::from("cn")),
            value: String::from("alice"),
            dn_attrs: true,
        });
        assert_eq!(st.id, EXT_MATCH);
        let comps = st.expect_constructed().expect("components");
        assert_eq!(
            comps.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }
}
