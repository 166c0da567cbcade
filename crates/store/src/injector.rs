//! Transactional message injection (spec §4.6), grounded on
//! `original_source/message/injector.h`'s nine-phase
//! `findMessages`/`findDependencies`/`updateAddresses`/`createDependencies`/
//! `insertBodyparts`/`selectMessageIds`/`selectUids`/`insertMessages`/
//! `insertDeliveries` pipeline, reworked as a single async transaction
//! instead of a chain of `EventHandler` callbacks.

use std::collections::HashMap;
use std::time::Duration;

use common::error::{MailError, MailResult};
use common::ids::{AddressId, MailboxId, MessageId, UserId};
use message::{Address, Message};
use tokio_postgres::Transaction;
use tracing::warn;

use crate::address_cache::AddressCache;
use crate::mailbox::MailboxRegistry;
use crate::pool::Pool;

/// A `Message` augmented with the per-mailbox delivery metadata it is about
/// to receive (spec §3 "Injectee"). The per-mailbox view is set exactly
/// once, by the Injector, before the batch is announced.
pub struct Injectee {
    pub message: Message,
    pub target_mailboxes: Vec<MailboxId>,
    pub flags: Vec<String>,
    pub annotations: Vec<(String, Option<UserId>, String)>,
    views: HashMap<MailboxId, (i64, i64)>,
    message_id: Option<MessageId>,
}

impl Injectee {
    pub fn new(message: Message, target_mailboxes: Vec<MailboxId>) -> Self {
        Injectee {
            message,
            target_mailboxes,
            flags: Vec::new(),
            annotations: Vec::new(),
            views: HashMap::new(),
            message_id: None,
        }
    }

    pub fn uid(&self, mailbox: MailboxId) -> Option<i64> {
        self.views.get(&mailbox).map(|(uid, _)| *uid)
    }

    pub fn modseq(&self, mailbox: MailboxId) -> Option<i64> {
        self.views.get(&mailbox).map(|(_, modseq)| *modseq)
    }

    fn set_view(&mut self, mailbox: MailboxId, uid: i64, modseq: i64) {
        debug_assert!(
            !self.views.contains_key(&mailbox),
            "per-mailbox view set more than once"
        );
        self.views.insert(mailbox, (uid, modseq));
    }
}

/// One outbound delivery to hand to the spool, referencing a message in the
/// same batch by its position.
pub struct DeliveryRequest {
    pub item_index: usize,
    pub sender: String,
    pub recipient: String,
}

const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

pub struct Injector {
    pool: Pool,
    registry: std::sync::Arc<MailboxRegistry>,
    address_cache: std::sync::Arc<AddressCache>,
}

impl Injector {
    pub fn new(
        pool: Pool,
        registry: std::sync::Arc<MailboxRegistry>,
        address_cache: std::sync::Arc<AddressCache>,
    ) -> Self {
        Injector {
            pool,
            registry,
            address_cache,
        }
    }

    /// Persists `items` (plus `deliveries`) as one transaction, retrying up
    /// to [`MAX_TRANSIENT_ATTEMPTS`] times on a transient error before
    /// surfacing `MailError::InjectionTransient` (spec §7).
    pub async fn inject(
        &self,
        mut items: Vec<Injectee>,
        deliveries: Vec<DeliveryRequest>,
    ) -> MailResult<Vec<Injectee>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inject_once(&mut items, &deliveries).await {
                Ok(()) => return Ok(items),
                Err(e) if e.is_retryable() && attempt < MAX_TRANSIENT_ATTEMPTS => {
                    warn!(attempt, error = %e, "injection attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(MailError::InjectionTransient {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn inject_once(
        &self,
        items: &mut [Injectee],
        deliveries: &[DeliveryRequest],
    ) -> MailResult<()> {
        let mut client = self.pool.get().await?;
        let txn = client
            .transaction()
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;

        // Phase 1: find messages already stored by content fingerprint.
        let existing = self.find_messages(&txn, items).await?;

        // Phase 2/3: collect referenced addresses, resolve them via the
        // cache. Only messages not already stored need their headers
        // persisted, but resolving ids for all referenced addresses is
        // cheap and keeps the cache warm.
        let mut addresses = collect_addresses(items);
        self.address_cache.resolve(&txn, &mut addresses).await?;
        let address_ids = index_addresses(&addresses);

        // Phase 4: bodyparts, dedup by fingerprint.
        let bodypart_ids = self.insert_bodyparts(&txn, items, &existing).await?;

        // Phase 5: message ids.
        self.select_message_ids(&txn, items, &existing).await?;

        // Phase 6/7: per-mailbox UID/modseq allocation, message + flag +
        // annotation + header rows.
        self.insert_messages(&txn, items, &bodypart_ids, &address_ids, &existing)
            .await?;

        // Phase 8: deliveries.
        self.insert_deliveries(&txn, items, deliveries).await?;

        // Commit.
        txn.commit()
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;

        // Phase 9: announce — reflect allocation into the shared mirror now
        // that the commit has actually happened.
        for item in items.iter() {
            for &mailbox in &item.target_mailboxes {
                if let (Some(uid), Some(modseq)) = (item.uid(mailbox), item.modseq(mailbox)) {
                    if let Some(m) = self.registry.by_id(mailbox) {
                        self.registry
                            .update_counters(mailbox, uid + 1, modseq.max(m.next_modseq));
                    }
                }
            }
        }
        Ok(())
    }

    async fn find_messages(
        &self,
        txn: &Transaction<'_>,
        items: &[Injectee],
    ) -> MailResult<HashMap<[u8; 32], MessageId>> {
        let mut existing = HashMap::new();
        for item in items {
            let fp = item.message.fingerprint();
            if existing.contains_key(&fp) {
                continue;
            }
            let row = txn
                .query_opt(
                    "SELECT id FROM messages WHERE fingerprint = $1",
                    &[&fp.as_slice()],
                )
                .await
                .map_err(|e| MailError::Database(e.to_string()))?;
            if let Some(row) = row {
                let id: i64 = row.get(0);
                existing.insert(fp, id_from_i64(id)?);
            }
        }
        Ok(existing)
    }

    async fn insert_bodyparts(
        &self,
        txn: &Transaction<'_>,
        items: &[Injectee],
        existing: &HashMap<[u8; 32], MessageId>,
    ) -> MailResult<HashMap<[u8; 32], i64>> {
        let mut ids = HashMap::new();
        for item in items {
            if existing.contains_key(&item.message.fingerprint()) {
                continue;
            }
            for part in &item.message.bodyparts {
                let fp = part.fingerprint();
                if ids.contains_key(&fp) {
                    continue;
                }
                let inserted = txn
                    .query_opt(
                        "INSERT INTO bodyparts (fingerprint, content_type, is_text, bytes) \
                         VALUES ($1, $2, $3, $4) \
                         ON CONFLICT (fingerprint) DO NOTHING RETURNING id",
                        &[
                            &fp.as_slice(),
                            &part.content_type,
                            &part.is_text,
                            &part.bytes,
                        ],
                    )
                    .await
                    .map_err(|e| MailError::Database(e.to_string()))?;
                let id = match inserted {
                    Some(row) => row.get(0),
                    None => {
                        let row = txn
                            .query_one(
                                "SELECT id FROM bodyparts WHERE fingerprint = $1",
                                &[&fp.as_slice()],
                            )
                            .await
                            .map_err(|e| MailError::Database(e.to_string()))?;
                        row.get(0)
                    }
                };
                ids.insert(fp, id);
            }
        }
        Ok(ids)
    }

    async fn select_message_ids(
        &self,
        txn: &Transaction<'_>,
        items: &mut [Injectee],
        existing: &HashMap<[u8; 32], MessageId>,
    ) -> MailResult<()> {
        for item in items.iter_mut() {
            let fp = item.message.fingerprint();
            if let Some(id) = existing.get(&fp) {
                item.message_id = Some(*id);
                continue;
            }
            let row = txn
                .query_one(
                    "INSERT INTO messages (fingerprint, rfc822_size, internal_date) \
                     VALUES ($1, $2, $3) RETURNING id",
                    &[
                        &fp.as_slice(),
                        &(item.message.size as i64),
                        &item.message.internal_date,
                    ],
                )
                .await
                .map_err(|e| MailError::Database(e.to_string()))?;
            let id: i64 = row.get(0);
            item.message_id = Some(id_from_i64(id)?);
        }
        Ok(())
    }

    async fn insert_messages(
        &self,
        txn: &Transaction<'_>,
        items: &mut [Injectee],
        bodypart_ids: &HashMap<[u8; 32], i64>,
        address_ids: &HashMap<(String, String, String), AddressId>,
        existing: &HashMap<[u8; 32], MessageId>,
    ) -> MailResult<()> {
        // Group by target mailbox so the UID allocator is called once per
        // mailbox with the correct count (spec §4.6 phase 6).
        let mut per_mailbox: HashMap<MailboxId, Vec<usize>> = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            for &mailbox in &item.target_mailboxes {
                per_mailbox.entry(mailbox).or_default().push(idx);
            }
        }

        for (mailbox, item_indices) in per_mailbox {
            let (first_uid, new_modseq) = self
                .registry
                .allocate(txn, mailbox, item_indices.len() as i64)
                .await?;
            for (offset, &idx) in item_indices.iter().enumerate() {
                let uid = first_uid + offset as i64;
                let message_id = items[idx]
                    .message_id
                    .expect("message id assigned in phase 5");
                txn.execute(
                    "INSERT INTO mailbox_messages (mailbox, uid, modseq, message) \
                     VALUES ($1, $2, $3, $4)",
                    &[
                        &(mailbox.get() as i64),
                        &uid,
                        &new_modseq,
                        &(message_id.get() as i64),
                    ],
                )
                .await
                .map_err(|e| MailError::Database(e.to_string()))?;

                for flag in &items[idx].flags {
                    txn.execute(
                        "INSERT INTO flags (mailbox, uid, flag) VALUES ($1, $2, $3)",
                        &[&(mailbox.get() as i64), &uid, flag],
                    )
                    .await
                    .map_err(|e| MailError::Database(e.to_string()))?;
                }
                for (entry, owner, value) in &items[idx].annotations {
                    txn.execute(
                        "INSERT INTO annotations (mailbox, uid, entry, owner, value) \
                         VALUES ($1, $2, $3, $4, $5)",
                        &[
                            &(mailbox.get() as i64),
                            &uid,
                            entry,
                            &owner.map(|o| o.get() as i64).unwrap_or(0),
                            value,
                        ],
                    )
                    .await
                    .map_err(|e| MailError::Database(e.to_string()))?;
                }

                items[idx].set_view(mailbox, uid, new_modseq);
            }
        }

        for item in items.iter() {
            let fp = item.message.fingerprint();
            if existing.contains_key(&fp) {
                continue;
            }
            let message_id = item.message_id.expect("message id assigned in phase 5");
            self.insert_header_and_address_fields(txn, message_id, item, bodypart_ids, address_ids)
                .await?;
        }
        Ok(())
    }

    async fn insert_header_and_address_fields(
        &self,
        txn: &Transaction<'_>,
        message_id: MessageId,
        item: &Injectee,
        bodypart_ids: &HashMap<[u8; 32], i64>,
        address_ids: &HashMap<(String, String, String), AddressId>,
    ) -> MailResult<()> {
        for (position, (field, value)) in item.message.headers.iter().enumerate() {
            txn.execute(
                "INSERT INTO header_fields (message, part, position, field, value) \
                 VALUES ($1, '0', $2, $3, $4)",
                &[&(message_id.get() as i64), &(position as i32), field, value],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        }

        for (kind, addrs) in &item.message.address_fields {
            for (number, addr) in addrs.iter().enumerate() {
                let key = address_key(addr);
                let Some(address_id) = address_ids.get(&key) else {
                    continue;
                };
                txn.execute(
                    "INSERT INTO address_fields (message, part, position, field, address, number) \
                     VALUES ($1, '0', 0, $2, $3, $4)",
                    &[
                        &(message_id.get() as i64),
                        &kind.header_name(),
                        &(address_id.get() as i64),
                        &(number as i32),
                    ],
                )
                .await
                .map_err(|e| MailError::Database(e.to_string()))?;
            }
        }

        for part in &item.message.bodyparts {
            let Some(&bodypart_id) = bodypart_ids.get(&part.fingerprint()) else {
                continue;
            };
            txn.execute(
                "INSERT INTO message_parts (message, part, bodypart) VALUES ($1, $2, $3)",
                &[&(message_id.get() as i64), &part.part_number, &bodypart_id],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn insert_deliveries(
        &self,
        txn: &Transaction<'_>,
        items: &[Injectee],
        deliveries: &[DeliveryRequest],
    ) -> MailResult<()> {
        for delivery in deliveries {
            let Some(item) = items.get(delivery.item_index) else {
                continue;
            };
            let message_id = item.message_id.expect("message id assigned in phase 5");
            txn.execute(
                "INSERT INTO deliveries (message, sender, recipient, queued_at) \
                 VALUES ($1, $2, $3, EXTRACT(EPOCH FROM now())::BIGINT)",
                &[
                    &(message_id.get() as i64),
                    &delivery.sender,
                    &delivery.recipient,
                ],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

fn address_key(addr: &Address) -> (String, String, String) {
    (
        addr.name.clone().unwrap_or_default(),
        addr.localpart_lower(),
        addr.domain_lower(),
    )
}

fn collect_addresses(items: &[Injectee]) -> Vec<Address> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        for addrs in item.message.address_fields.values() {
            for addr in addrs {
                let key = address_key(addr);
                if seen.insert(key) {
                    out.push(addr.clone());
                }
            }
        }
    }
    out
}

fn index_addresses(addresses: &[Address]) -> HashMap<(String, String, String), AddressId> {
    addresses
        .iter()
        .filter_map(|a| a.id().map(|id| (address_key(a), id)))
        .collect()
}

fn id_from_i64(v: i64) -> MailResult<MessageId> {
    MessageId::new(v as u32)
        .ok_or_else(|| MailError::Database("message id 0 returned by sequence".to_string()))
}
