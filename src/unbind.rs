use berkit::common::TagClass;
use berkit::structures::{Null, Tag};

use crate::ldap::{ConnOp, Ldap};
use crate::result::Result;

impl Ldap {
    /// Terminate the connection to the server. The Unbind PDU is flushed,
    /// after which the connection is torn down; any operation still pending
    /// at that point resolves with `ConnectionClosed`.
    pub async fn unbind(&mut self) -> Result<()> {
        let req = Tag::Null(Null {
            id: 2,
            class: TagClass::Application,
            inner: (),
        });
        self.send_op(|id, _controls| ConnOp::Unbind { id, tag: req })?;
        Ok(())
    }
}
