//! Submission-time message normalization (spec §4.2, rules 1-4). Applied
//! only in the Submit dialect, after the raw octets have been parsed into a
//! [`Message`].

use message::{Address, AddressFieldKind, Message};

/// Applies spec §4.2 rules 1-4 in order. `permitted_senders` is the set
/// derived at AUTH success (spec §4.1). Rules 3-4 (From/Sender ownership
/// enforcement) only run when `check_sender_addresses` is set (spec §6) —
/// deployments that don't maintain a permitted-sender directory need to be
/// able to turn the check off rather than have every From get overwritten.
pub fn normalize_submission(
    message: &mut Message,
    hostname: &str,
    transaction_id: u64,
    permitted_senders: &[Address],
    check_sender_addresses: bool,
) {
    // 1. Remove any Bcc field.
    message.remove_header("bcc");
    message.address_fields.remove(&AddressFieldKind::Bcc);

    // 2. Add Message-ID if absent.
    if !message.has_header("message-id") {
        message.prepend_header(
            "message-id",
            format!("<{transaction_id}.mailcore@{hostname}>"),
        );
    }

    if !check_sender_addresses {
        return;
    }

    // 4. If a Sender field exists but names an address the user is not
    // permitted to use, strip it before rule 3 runs.
    if let Some(senders) = message.address_fields.get(&AddressFieldKind::Sender).cloned() {
        if let Some(sender) = senders.first() {
            if !permitted_senders.contains(sender) {
                message.remove_header("sender");
                message.address_fields.remove(&AddressFieldKind::Sender);
            }
        }
    }

    // 3. If From names an address the user is not permitted to use, and
    // there is no Sender field, add one.
    if !message.address_fields.contains_key(&AddressFieldKind::Sender) {
        let from_is_permitted = message
            .address_fields
            .get(&AddressFieldKind::From)
            .and_then(|froms| froms.first())
            .map(|from| permitted_senders.contains(from))
            .unwrap_or(true);

        if !from_is_permitted {
            let froms = message
                .address_fields
                .get(&AddressFieldKind::From)
                .cloned()
                .unwrap_or_default();
            let chosen = froms
                .iter()
                .find(|from| permitted_senders.contains(from))
                .or_else(|| permitted_senders.first());
            if let Some(chosen) = chosen {
                message.prepend_header("sender", chosen.as_path());
                message
                    .address_fields
                    .insert(AddressFieldKind::Sender, vec![chosen.clone()]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(local: &str, domain: &str) -> Address {
        Address::new(None, local.to_string(), domain.to_string())
    }

    #[test]
    fn bcc_is_stripped() {
        let raw = b"From: a@x\r\nTo: b@x\r\nBcc: hidden@x\r\n\r\nhi\r\n".to_vec();
        let mut msg = Message::parse(raw, 0);
        normalize_submission(&mut msg, "mx.example", 1, &[addr("a", "x")], true);
        assert!(!msg.has_header("bcc"));
        assert!(!msg.address_fields.contains_key(&AddressFieldKind::Bcc));
    }

    #[test]
    fn message_id_added_when_absent() {
        let raw = b"From: a@x\r\nTo: b@x\r\n\r\nhi\r\n".to_vec();
        let mut msg = Message::parse(raw, 0);
        normalize_submission(&mut msg, "mx.example", 42, &[addr("a", "x")], true);
        assert!(msg.header("message-id").unwrap().contains("42"));
    }

    #[test]
    fn unpermitted_from_gets_sender_added() {
        let raw = b"From: spoofed@evil\r\nTo: b@x\r\n\r\nhi\r\n".to_vec();
        let mut msg = Message::parse(raw, 0);
        normalize_submission(&mut msg, "mx.example", 1, &[addr("a", "x")], true);
        let sender = msg.header("sender").unwrap();
        assert!(sender.contains("a@x"));
    }

    #[test]
    fn permitted_from_is_untouched() {
        let raw = b"From: a@x\r\nTo: b@x\r\n\r\nhi\r\n".to_vec();
        let mut msg = Message::parse(raw, 0);
        normalize_submission(&mut msg, "mx.example", 1, &[addr("a", "x")], true);
        assert!(!msg.has_header("sender"));
    }

    #[test]
    fn ownership_check_disabled_leaves_unpermitted_from_untouched() {
        let raw = b"From: spoofed@evil\r\nTo: b@x\r\n\r\nhi\r\n".to_vec();
        let mut msg = Message::parse(raw, 0);
        normalize_submission(&mut msg, "mx.example", 1, &[addr("a", "x")], false);
        assert!(!msg.has_header("sender"));
    }
}
