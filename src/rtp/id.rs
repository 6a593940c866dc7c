#![allow(missing_docs)]

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

macro_rules! num_id {
    ($id:ident, $t:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $id($t);

        impl $id {
            pub fn new() -> Self {
                $id(fastrand::$t(..))
            }
        }

        impl Deref for $id {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$t> for $id {
            fn from(v: $t) -> Self {
                $id(v)
            }
        }

        impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

num_id!(Ssrc, u32);
num_id!(Pt, u8);
num_id!(SeqNo, u64);

impl SeqNo {
    pub fn is_next(&self, other: SeqNo) -> bool {
        if **self >= *other {
            return false;
        }
        *other - **self == 1
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The 16 bit value as written in RTP headers.
    pub fn as_u16(&self) -> u16 {
        self.0 as u16
    }
}

impl Pt {
    /// Payload type for the RTX stream when none is configured.
    ///
    /// Common convention is to pair the RTX payload type right after the media one.
    pub fn rtx_default(&self) -> Pt {
        Pt(self.0.wrapping_add(1) & 0x7f)
    }
}
