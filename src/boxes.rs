// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// A four-character box code as it appears on the wire.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl From<u32> for FourCC {
    fn from(number: u32) -> FourCC {
        FourCC {
            value: number.to_be_bytes(),
        }
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> FourCC {
        FourCC { value }
    }
}

impl From<BoxType> for FourCC {
    fn from(kind: BoxType) -> FourCC {
        From::from(u32::from(kind))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.value))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.value))
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.value.eq(*other)
    }
}

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:literal),+,) => {
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                use self::BoxType::*;
                match t {
                    $($boxtype => $boxenum),*,
                    _ => UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                use self::BoxType::*;
                match b {
                    $($boxenum => $boxtype),*,
                    UnknownBox(t) => t,
                }
            }
        }
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        fourcc.fmt(f)
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        fourcc.fmt(f)
    }
}

box_database!(
    FileTypeBox 0x6674_7970,                // "ftyp"
    MetadataBox 0x6d65_7461,                // "meta"
    PrimaryItemBox 0x7069_746d,             // "pitm"
    ItemPropertiesBox 0x6970_7270,          // "iprp"
    ItemPropertyContainerBox 0x6970_636f,   // "ipco"
    ItemPropertyAssociationBox 0x6970_6d61, // "ipma"
    ItemReferenceBox 0x6972_6566,           // "iref"
    ImageSpatialExtentsBox 0x6973_7065,     // "ispe"
    PixelInformationBox 0x7069_7869,        // "pixi"
    AV1CodecConfigurationBox 0x6176_3143,   // "av1C"
    AuxiliaryTypeProperty 0x6175_7843,      // "auxC"
    DerivedImageRefBox 0x6469_6d67,         // "dimg"
);
