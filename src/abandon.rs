use berkit::common::TagClass;
use berkit::structures::{Integer, Tag};

use crate::ldap::{ConnOp, Ldap};
use crate::result::Result;
use crate::RequestId;

impl Ldap {
    /// Ask the server to abandon the operation with the message ID `msgid`.
    /// Abandon expects no response; the abandoned operation itself is
    /// resolved locally with `LdapError::Abandoned`.
    pub async fn abandon(&mut self, msgid: RequestId) -> Result<()> {
        let req = Tag::Integer(Integer {
            id: 16,
            class: TagClass::Application,
            inner: i64::from(msgid),
        });
        self.send_op(|id, controls| ConnOp::Abandon {
            id,
            target: msgid,
            tag: req,
            controls,
        })?;
        Ok(())
    }
}
