use berkit::common::TagClass;
use berkit::structures::{Sequence, Tag};

use crate::exop::{construct_exop, Exop};
use crate::ldap::Ldap;
use crate::result::{ExopResult, Result};

impl Ldap {
    /// Perform an Extended operation given by `exop`. Extended operations are
    /// defined in the [`exop`](exop/index.html) module. See the module-level
    /// documentation for the list of extended operations supported by this
    /// library and procedures for defining custom exops.
    pub async fn extended<E>(&mut self, exop: E) -> Result<ExopResult>
    where
        E: Into<Exop>,
    {
        let req = Tag::Sequence(Sequence {
            id: 23,
            class: TagClass::Application,
            inner: construct_exop(exop.into()),
        });
        let (result, exop) = self.op_call(req).await?;
        Ok(ExopResult(exop, result))
    }
}
