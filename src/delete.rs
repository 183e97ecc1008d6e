use berkit::common::TagClass;
use berkit::structures::{OctetString, Tag};

use crate::ldap::Ldap;
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Delete an entry named by `dn`.
    pub async fn delete(&mut self, dn: &str) -> Result<LdapResult> {
        let req = Tag::OctetString(OctetString {
            id: 10,
            class: TagClass::Application,
            inner: Vec::from(dn.as_bytes()),
        });
        Ok(self.op_call(req).await?.0)
    }
}
