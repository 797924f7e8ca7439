//! Entity descriptor marshaled into guest memory by `sensors.contact`.

use serde::{Deserialize, Serialize};

/// Kind of object a sensor can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum EntityType {
    Rock = 0,
    Bot = 1,
    Building = 2,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Rock, EntityType::Bot, EntityType::Building];

    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(EntityType::Rock),
            1 => Some(EntityType::Bot),
            2 => Some(EntityType::Building),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Rock => "rock",
            EntityType::Bot => "bot",
            EntityType::Building => "building",
        }
    }
}

/// Fixed-layout record describing another entity.
///
/// Wire layout (little endian, natural alignment of the `i64` field):
///
/// | offset | size | field      |
/// |--------|------|------------|
/// | 0      | 8    | `identity` |
/// | 8      | 2    | `kind`     |
/// | 10     | 6    | padding    |
///
/// The host writes all [`EntityDescriptor::SIZE`] bytes, padding zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub identity: i64,
    pub kind: u16,
}

impl EntityDescriptor {
    pub const SIZE: usize = 16;
    pub const ALIGN: usize = 8;
    const KIND_OFFSET: usize = 8;

    pub fn new(identity: i64, kind: EntityType) -> Self {
        Self {
            identity,
            kind: kind.tag(),
        }
    }

    /// Descriptor written when nothing is in contact.
    pub const fn none() -> Self {
        Self {
            identity: 0,
            kind: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.identity > 0 && EntityType::from_tag(self.kind).is_some()
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::from_tag(self.kind)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0_u8; Self::SIZE];
        buf[..Self::KIND_OFFSET].copy_from_slice(&self.identity.to_le_bytes());
        buf[Self::KIND_OFFSET..Self::KIND_OFFSET + 2].copy_from_slice(&self.kind.to_le_bytes());
        buf
    }

    /// Reads a descriptor back from its wire form. Returns `None` when fewer
    /// than [`EntityDescriptor::SIZE`] bytes are available; padding is ignored.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let mut identity = [0_u8; 8];
        identity.copy_from_slice(&bytes[..Self::KIND_OFFSET]);
        let kind = u16::from_le_bytes([bytes[Self::KIND_OFFSET], bytes[Self::KIND_OFFSET + 1]]);
        Some(Self {
            identity: i64::from_le_bytes(identity),
            kind,
        })
    }
}

impl Default for EntityDescriptor {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn none_descriptor_is_invalid() {
        let descriptor = EntityDescriptor::none();
        assert_eq!(descriptor.identity, 0);
        assert!(!descriptor.is_valid());
    }

    #[test]
    fn unknown_kind_tag_is_invalid() {
        let descriptor = EntityDescriptor {
            identity: 7,
            kind: 3,
        };
        assert!(!descriptor.is_valid());
        assert_eq!(descriptor.entity_type(), None);
    }

    #[test]
    fn encode_places_kind_after_identity_and_zeroes_padding() {
        let bytes = EntityDescriptor::new(0x0102_0304_0506_0708, EntityType::Building).encode();
        assert_eq!(&bytes[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..10], &[2, 0]);
        assert_eq!(&bytes[10..], &[0; 6]);
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert_eq!(EntityDescriptor::decode(&[0_u8; 15]), None);
        let descriptor = EntityDescriptor::new(42, EntityType::Bot);
        let mut long = descriptor.encode().to_vec();
        long.extend_from_slice(&[0xff; 4]);
        assert_eq!(EntityDescriptor::decode(&long), Some(descriptor));
    }

    proptest! {
        #[test]
        fn validity_tracks_identity_and_kind(identity in any::<i64>(), kind in any::<u16>()) {
            let descriptor = EntityDescriptor { identity, kind };
            prop_assert_eq!(descriptor.is_valid(), identity > 0 && kind <= 2);
            if identity <= 0 {
                prop_assert!(!descriptor.is_valid());
            }
        }
    }
}
