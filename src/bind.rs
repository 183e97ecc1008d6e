use berkit::common::TagClass;
use berkit::structures::{Integer, OctetString, Sequence, Tag};

use crate::ldap::Ldap;
use crate::result::{LdapResult, Result};

impl Ldap {
    /// Do a simple Bind with the provided DN (`bind_dn`) and password
    /// (`bind_pw`). Anonymous binds pass an empty string for both.
    ///
    /// While the Bind is unanswered, the connection queues any other
    /// submitted operation; flushing resumes once the server responds.
    pub async fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let req = Tag::Sequence(Sequence {
            id: 0,
            class: TagClass::Application,
            inner: vec![
                Tag::Integer(Integer {
                    inner: 3,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: Vec::from(bind_dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    id: 0,
                    class: TagClass::Context,
                    inner: Vec::from(bind_pw.as_bytes()),
                }),
            ],
        });
        Ok(self.op_call(req).await?.0)
    }
}
