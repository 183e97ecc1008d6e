use std::default;

use byteorder::{BigEndian, WriteBytesExt};

use super::ASNTag;
use crate::common::TagClass;
use crate::structure;
use crate::universal;

/// Integer value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// Integer with a different universal tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

fn i_e_into_structure(id: u64, class: TagClass, inner: i64) -> structure::StructureTag {
    // Minimal two's-complement octets: grow until the remaining high bits
    // are pure sign extension.
    let mut count = 1usize;
    while count < 8 {
        let rem = inner >> (8 * count - 1);
        if rem == 0 || rem == -1 {
            break;
        }
        count += 1;
    }

    let mut out: Vec<u8> = Vec::with_capacity(count);
    out.write_int::<BigEndian>(inner, count).expect("vec write");

    structure::StructureTag {
        id,
        class,
        payload: structure::PL::P(out),
    }
}

impl ASNTag for Integer {
    fn into_structure(self) -> structure::StructureTag {
        i_e_into_structure(self.id, self.class, self.inner)
    }
}

impl ASNTag for Enumerated {
    fn into_structure(self) -> structure::StructureTag {
        i_e_into_structure(self.id, self.class, self.inner)
    }
}

impl default::Default for Integer {
    fn default() -> Integer {
        Integer {
            id: universal::Types::Integer as u64,
            class: TagClass::Universal,
            inner: 0i64,
        }
    }
}

impl default::Default for Enumerated {
    fn default() -> Enumerated {
        Enumerated {
            id: universal::Types::Enumerated as u64,
            class: TagClass::Universal,
            inner: 0i64,
        }
    }
}

#[cfg(test)]
mod test {
    use super::i_e_into_structure;

    use crate::common::TagClass;
    use crate::structure;

    #[test]
    fn test_not_unnecessary_octets() {
        // 127 fits into 8 bits
        let result = i_e_into_structure(2, TagClass::Universal, 127);
        let correct = structure::PL::P(vec![127]);
        assert_eq![result.payload, correct];
    }

    #[test]
    fn test_not_positive_getting_negative() {
        // 128 cannot be encoded into an 8 bit signed number
        let result = i_e_into_structure(2, TagClass::Universal, 128);
        let correct = structure::PL::P(vec![0, 128]);
        assert_eq![result.payload, correct];
    }

    #[test]
    fn test_negative() {
        let result = i_e_into_structure(2, TagClass::Universal, -129);
        let correct = structure::PL::P(vec![0xff, 0x7f]);
        assert_eq![result.payload, correct];
    }
}
