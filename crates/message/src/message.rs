//! Parsed `Message` and `Bodypart` (spec §3), plus the unparsable-message
//! wrap described in spec §4.2 and tested by property 6 in spec §8.

use std::collections::HashMap;

use mail_builder::MessageBuilder;
use mail_parser::{HeaderValue, MessageParser};

use crate::address::Address;
use crate::fields::AddressFieldKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Parsed with no defects.
    Valid,
    /// Parsed, but `error` is non-empty; body is still usable.
    Defective,
    /// Could not be parsed at all; needs `Message::wrap_unparsable`.
    Unparsable,
}

/// One leaf of the bodypart tree. The tree shape itself (nesting for
/// multipart/alternative etc.) is preserved via `part_number`
/// (MIME-style dotted numbering, e.g. `"1.2"`), matching the part-numbering
/// scheme `original_source/message/injector.h`'s `addPartNumber` implies.
#[derive(Debug, Clone)]
pub struct Bodypart {
    pub part_number: String,
    pub content_type: String,
    pub is_text: bool,
    pub bytes: Vec<u8>,
}

impl Bodypart {
    /// Content-addressed dedup key used by the Injector (spec §4.6 phase 4):
    /// two bodyparts with identical bytes collapse to the same stored row.
    pub fn fingerprint(&self) -> [u8; 32] {
        blake3::hash(&self.bytes).into()
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub state: MessageState,
    pub error: String,
    /// Ordered header fields, normalized name (e.g. `"subject"`) to raw
    /// decoded value, duplicates preserved in wire order.
    pub headers: Vec<(String, String)>,
    pub address_fields: HashMap<AddressFieldKind, Vec<Address>>,
    pub bodyparts: Vec<Bodypart>,
    pub internal_date: i64,
    /// Wire-format octet count, the quantity the Sieve `size` test reads.
    pub size: usize,
    pub raw: Vec<u8>,
}

impl Message {
    /// Parses `raw` (the full, already-assembled message including any
    /// synthetic `Received`/`Return-Path` prepended by the session per spec
    /// §4.2) into a `Message`. Never fails — an unparsable input yields a
    /// `Message` in `MessageState::Unparsable` with `error` set, per spec §3.
    pub fn parse(raw: Vec<u8>, internal_date: i64) -> Self {
        let size = raw.len();
        let Some(parsed) = MessageParser::default().parse(&raw) else {
            return Message {
                state: MessageState::Unparsable,
                error: "message could not be parsed".to_string(),
                headers: Vec::new(),
                address_fields: HashMap::new(),
                bodyparts: Vec::new(),
                internal_date,
                size,
                raw,
            };
        };

        let mut headers = Vec::new();
        for header in parsed.headers() {
            let name = header.name.as_str().to_ascii_lowercase();
            let value = header_value_to_string(&header.value);
            headers.push((name, value));
        }

        let mut address_fields = HashMap::new();
        let mut defects = Vec::new();
        for kind in AddressFieldKind::ALL {
            let Some(value) = parsed.header(kind.header_name()) else {
                continue;
            };
            let addrs = header_value_addresses(value);
            if !addrs.is_empty() {
                address_fields.insert(kind, addrs);
            } else if !matches!(value, HeaderValue::Empty) {
                // The header is present but mail-parser could not resolve it
                // to an address/address-list — a malformed address field
                // that doesn't stop the rest of the message from parsing.
                defects.push(format!("malformed {} header", kind.header_name()));
            }
        }

        let mut bodyparts = Vec::new();
        for (idx, part) in parsed.text_bodies().enumerate() {
            bodyparts.push(Bodypart {
                part_number: (idx + 1).to_string(),
                content_type: "text/plain".to_string(),
                is_text: true,
                bytes: part.contents().to_vec(),
            });
        }
        for (idx, part) in parsed.html_bodies().enumerate() {
            bodyparts.push(Bodypart {
                part_number: format!("{}.html", idx + 1),
                content_type: "text/html".to_string(),
                is_text: true,
                bytes: part.contents().to_vec(),
            });
        }
        for (idx, part) in parsed.attachments().enumerate() {
            bodyparts.push(Bodypart {
                part_number: format!("att.{}", idx + 1),
                content_type: part
                    .content_type()
                    .map(|c| c.ctype().to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                is_text: false,
                bytes: part.contents().to_vec(),
            });
        }
        if bodyparts.is_empty() {
            bodyparts.push(Bodypart {
                part_number: "1".to_string(),
                content_type: "text/plain".to_string(),
                is_text: true,
                bytes: Vec::new(),
            });
        }

        // mail-parser surfaces structural problems (malformed address
        // fields it still returned a tree for) as a message we can read
        // fine otherwise; we treat those as "defective", not "unparsable" —
        // the latter is reserved for parse() returning no tree at all.
        let error = defects.join("; ");
        let state = if error.is_empty() {
            MessageState::Valid
        } else {
            MessageState::Defective
        };

        Message {
            state,
            error,
            headers,
            address_fields,
            bodyparts,
            internal_date,
            size,
            raw,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all<'a>(&'a self, name: &str) -> Vec<&'a str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.headers.iter().any(|(n, _)| *n == name)
    }

    pub fn remove_header(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(n, _)| *n != name);
    }

    pub fn prepend_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .insert(0, (name.to_ascii_lowercase(), value.into()));
    }

    /// Content fingerprint across all bodyparts, used by the Injector's
    /// "find messages" phase (spec §4.6 phase 1) to detect an already-stored
    /// message without comparing raw octets.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for part in &self.bodyparts {
            hasher.update(&part.fingerprint());
        }
        hasher.finalize().into()
    }

    /// Wraps an unparsable message in a well-formed single-text-part outer
    /// message (spec §4.2, §8 property 6). The wrapper's body is the
    /// original octets plus the parse error; `parse()` on the wrapper's
    /// serialized bytes always yields `MessageState::Valid`.
    pub fn wrap_unparsable(
        raw: &[u8],
        error: &str,
        from: &str,
        to: &str,
        internal_date: i64,
    ) -> Self {
        let body = format!(
            "The original message could not be parsed: {error}\r\n\r\n--- original octets follow ---\r\n{}",
            String::from_utf8_lossy(raw)
        );
        let builder = MessageBuilder::new()
            .from((String::new(), from.to_string()))
            .to((String::new(), to.to_string()))
            .subject("Undeliverable message wrapped")
            .text_body(body);
        let bytes = builder.write_to_vec().unwrap_or_default();
        let mut wrapped = Self::parse(bytes, internal_date);
        debug_assert_eq!(wrapped.state, MessageState::Valid);
        wrapped.error = String::new();
        wrapped
    }
}

fn header_value_to_string(value: &HeaderValue<'_>) -> String {
    match value {
        HeaderValue::Text(t) => t.to_string(),
        HeaderValue::TextList(list) => list.join(", "),
        HeaderValue::Address(a) => Address::from_mail_parser(a).as_path(),
        HeaderValue::AddressList(list) => list
            .iter()
            .map(|a| Address::from_mail_parser(a).as_path())
            .collect::<Vec<_>>()
            .join(", "),
        HeaderValue::DateTime(d) => d.to_rfc3339(),
        _ => String::new(),
    }
}

fn header_value_addresses(value: &HeaderValue<'_>) -> Vec<Address> {
    match value {
        HeaderValue::Address(a) => vec![Address::from_mail_parser(a)],
        HeaderValue::AddressList(list) => {
            list.iter().map(Address::from_mail_parser).collect()
        }
        HeaderValue::Empty => vec![],
        _ => vec![],
    }
}
