//! Parsed address and message model (spec §3: Address, Header/Message,
//! Injectee). Wraps `mail-parser`/`mail-builder` the way the teacher's
//! `smtp`/`directory` crates do, but exposes the owned, classification-aware
//! shapes this spec requires rather than `mail-parser`'s borrowed views.

pub mod address;
pub mod fields;
pub mod message;

pub use address::{Address, AddressClass};
pub use fields::AddressFieldKind;
pub use message::{Bodypart, Message, MessageState};
