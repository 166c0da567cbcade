//! Parsed mail address with the classifier tag described in spec §3.
//!
//! Grounded on `original_source/message/address.h`'s classifier and the
//! `Addr { name, address }` shape `mail-parser` exposes (see the
//! `convert_address` helper in `examples/other_examples/…aerogramme…`).

use common::ids::AddressId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// A normal address with both a localpart and a domain.
    Normal,
    /// The empty reverse-path `<>` used for non-delivery reports.
    Bounce,
    /// An RFC 5322 group with no members (`undisclosed-recipients:;`).
    EmptyGroup,
    /// No domain part (bare localpart, e.g. local aliasing).
    Local,
    /// Could not be parsed into localpart/domain at all.
    Invalid,
}

/// A parsed address. Equality and hashing are case-insensitive on
/// `localpart`/`domain` after canonicalization, matching spec §3's
/// "once id is set, (name, localpart, domain) is frozen" invariant.
#[derive(Debug, Clone)]
pub struct Address {
    pub name: Option<String>,
    pub localpart: String,
    pub domain: String,
    pub class: AddressClass,
    id: Option<AddressId>,
}

impl Address {
    pub fn new(name: Option<String>, localpart: String, domain: String) -> Self {
        let class = if localpart.is_empty() && domain.is_empty() {
            AddressClass::Bounce
        } else if domain.is_empty() {
            AddressClass::Local
        } else {
            AddressClass::Normal
        };
        Address {
            name,
            localpart,
            domain,
            class,
            id: None,
        }
    }

    pub fn bounce() -> Self {
        Address {
            name: None,
            localpart: String::new(),
            domain: String::new(),
            class: AddressClass::Bounce,
            id: None,
        }
    }

    pub fn invalid(raw: impl Into<String>) -> Self {
        Address {
            name: None,
            localpart: raw.into(),
            domain: String::new(),
            class: AddressClass::Invalid,
            id: None,
        }
    }

    pub fn empty_group(name: impl Into<String>) -> Self {
        Address {
            name: Some(name.into()),
            localpart: String::new(),
            domain: String::new(),
            class: AddressClass::EmptyGroup,
            id: None,
        }
    }

    /// Parses `local@domain` (no display name, no angle brackets) — the
    /// shape of a bare reverse-/forward-path as received on the wire.
    pub fn parse_bare(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::bounce();
        }
        match raw.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                Self::new(None, local.to_string(), domain.to_string())
            }
            Some((local, domain)) if domain.is_empty() => {
                Self::new(None, local.to_string(), String::new())
            }
            _ => Self::invalid(raw),
        }
    }

    pub fn from_mail_parser(addr: &mail_parser::Addr<'_>) -> Self {
        let name = addr.name.as_ref().map(|c| c.to_string());
        match addr.address.as_ref() {
            None => Self::invalid(name.unwrap_or_default()),
            Some(a) => {
                let a = a.as_ref();
                match a.rsplit_once('@') {
                    Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                        Self::new(name, local.to_string(), domain.to_string())
                    }
                    Some((local, domain)) if local.is_empty() && domain.is_empty() => {
                        Self::bounce()
                    }
                    Some((local, domain)) if domain.is_empty() => {
                        Self::new(name, local.to_string(), String::new())
                    }
                    _ => Self::new(name, a.to_string(), String::new()),
                }
            }
        }
    }

    pub fn id(&self) -> Option<AddressId> {
        self.id
    }

    /// Sets the Address Cache-assigned stable id. Freezes `name`/`localpart`/
    /// `domain` per spec §3 — there is no setter for those fields afterward.
    pub fn set_id(&mut self, id: AddressId) {
        self.id = Some(id);
    }

    pub fn localpart_lower(&self) -> String {
        self.localpart.to_ascii_lowercase()
    }

    pub fn domain_lower(&self) -> String {
        self.domain.to_ascii_lowercase()
    }

    /// `user@domain`, empty string for a bounce address.
    pub fn as_path(&self) -> String {
        if self.domain.is_empty() {
            self.localpart.clone()
        } else {
            format!("{}@{}", self.localpart, self.domain)
        }
    }

    /// Strip `<separator><detail>` from the localpart, per the
    /// `use-subaddressing`/`address-separator` config keys in spec §6.
    pub fn canonical_localpart(&self, separator: &str) -> String {
        if separator.is_empty() {
            return self.localpart_lower();
        }
        let lower = self.localpart_lower();
        match lower.find(separator) {
            Some(idx) => lower[..idx].to_string(),
            None => lower,
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.localpart_lower() == other.localpart_lower() && self.domain_lower() == other.domain_lower()
    }
}

impl Eq for Address {}
