use super::{ASNTag, Tag};
use crate::common::TagClass;
use crate::structure;

/// A tag wrapping a single inner value in an explicit construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplicitTag {
    pub id: u64,
    pub class: TagClass,
    pub inner: Box<Tag>,
}

impl ASNTag for ExplicitTag {
    fn into_structure(self) -> structure::StructureTag {
        structure::StructureTag {
            id: self.id,
            class: self.class,
            payload: structure::PL::C(vec![self.inner.into_structure()]),
        }
    }
}
