use berkit::common::TagClass;
use berkit::structures::{Boolean, OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Rename and/or move an entry named by `dn`. The new name is given by
    /// `rdn`. If `delete_old` is `true`, delete the previous value of the
    /// naming attribute from the entry. If the entry is to be moved elsewhere
    /// in the DIT, `new_sup` gives the new superior entry where the moved
    /// entry will be anchored.
    pub async fn modifydn(
        &mut self,
        dn: &str,
        rdn: &str,
        delete_old: bool,
        new_sup: Option<&str>,
    ) -> Result<LdapResult> {
        let mut params = vec![
            Tag::OctetString(OctetString {
                inner: Vec::from(dn.as_bytes()),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: Vec::from(rdn.as_bytes()),
                ..Default::default()
            }),
            Tag::Boolean(Boolean {
                inner: delete_old,
                ..Default::default()
            }),
        ];
        if let Some(new_sup) = new_sup {
            params.push(Tag::OctetString(OctetString {
                id: 0,
                class: TagClass::Context,
                inner: Vec::from(new_sup.as_bytes()),
            }));
        }
        let req = Tag::Sequence(Sequence {
            id: 12,
            class: TagClass::Application,
            inner: params,
        });
        Ok(self.op_call(req).await?.0)
    }
}
