use berkit::common::TagClass;
use berkit::structures::{OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::result::{CompareResult, Result};

impl Ldap {
    /// Compare the value(s) of the attribute `attr` within an entry named by
    /// `dn` with the value `val`. If any of the values is identical to the
    /// provided one, return result code 6 (`compareTrue`), otherwise return
    /// result code 5 (`compareFalse`). Both are reported as a successful
    /// completion through the returned [`CompareResult`](struct.CompareResult.html).
    pub async fn compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<CompareResult> {
        let req = Tag::Sequence(Sequence {
            id: 14,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: Vec::from(attr.as_bytes()),
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            inner: Vec::from(val.as_ref()),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                }),
            ],
        });
        Ok(CompareResult(self.op_call(req).await?.0))
    }
}
