//! Outbound delivery handoff (spec §4.6 phase 8, §4.1 RCPT TO contract for
//! remote recipients in the Submit dialect). Building the actual outbound
//! transport (DNS-driven MX selection, TLS negotiation) is out of scope —
//! this module's only job is to produce the `deliveries` rows the Injector
//! writes; a separate spool worker (not part of this crate) would poll that
//! table and perform the handoff.

use store::DeliveryRequest;

/// One recipient that should leave via outbound transport rather than (or in
/// addition to) a local mailbox: a `redirect` action's target, or an
/// unresolved RCPT in the Submit dialect.
pub struct SpoolEntry {
    pub item_index: usize,
    pub sender: String,
    pub recipient: String,
}

/// Builds the `DeliveryRequest` batch the Injector persists in the same
/// transaction as the mailbox writes (spec §4.6: "a single database
/// transaction").
pub fn build_delivery_requests(entries: Vec<SpoolEntry>) -> Vec<DeliveryRequest> {
    entries
        .into_iter()
        .map(|e| DeliveryRequest {
            item_index: e.item_index,
            sender: e.sender,
            recipient: e.recipient,
        })
        .collect()
}
