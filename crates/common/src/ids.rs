//! Newtype ids for every persisted row, mirroring the teacher's
//! `AccountId`/`MailboxId` newtype pattern (`crates/common/src/lib.rs`)
//! rather than passing bare `u32`s around.

use std::num::NonZeroU32;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(v: u32) -> Option<Self> {
                NonZeroU32::new(v).map(Self)
            }

            pub fn get(self) -> u32 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.get())
            }
        }
    };
}

id_newtype!(AddressId);
id_newtype!(MailboxId);
id_newtype!(MessageId);
id_newtype!(BodypartId);
id_newtype!(UserId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(AddressId::new(0).is_none());
        assert_eq!(AddressId::new(1).unwrap().get(), 1);
    }
}
