//! Address Cache (spec §4.4), grounded on
//! `original_source/message/addresscache.cpp`'s `AddressLookup`/
//! `AddressInsert` SELECT-then-INSERT-then-SELECT pattern, which tolerates
//! two injectors racing to insert the same (name, localpart, domain) triple.

use std::sync::Arc;

use common::error::{MailError, MailResult};
use common::ids::AddressId;
use dashmap::DashMap;
use message::Address;
use tokio_postgres::Transaction;

/// Process-wide, append-only for any given key triple (spec §4.4
/// "Concurrency"). Shared across sessions, injected rather than reached
/// through a static (spec §9).
#[derive(Default)]
pub struct AddressCache {
    ids: DashMap<(String, String, String), AddressId>,
}

fn key(address: &Address) -> (String, String, String) {
    (
        address.name.clone().unwrap_or_default(),
        address.localpart_lower(),
        address.domain_lower(),
    )
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a stable id to every address in `batch`, querying or
    /// inserting within `txn` as needed (spec §4.4). Mutates each address in
    /// place via [`Address::set_id`].
    pub async fn resolve(&self, txn: &Transaction<'_>, batch: &mut [Address]) -> MailResult<()> {
        for address in batch.iter_mut() {
            let k = key(address);
            if let Some(id) = self.ids.get(&k) {
                address.set_id(*id);
                continue;
            }
            let id = self.lookup_or_insert(txn, address).await?;
            self.ids.insert(k, id);
            address.set_id(id);
        }
        Ok(())
    }

    async fn lookup_or_insert(
        &self,
        txn: &Transaction<'_>,
        address: &Address,
    ) -> MailResult<AddressId> {
        let name = address.name.clone().unwrap_or_default();
        let localpart = address.localpart_lower();
        let domain = address.domain_lower();

        if let Some(id) = self.select(txn, &name, &localpart, &domain).await? {
            return Ok(id);
        }

        // Between the SELECT above and this INSERT another injector may have
        // raced us; the unique index on (name, localpart, domain) makes the
        // loser's INSERT fail, and we fall back to a plain SELECT.
        let inserted = txn
            .query_opt(
                "INSERT INTO addresses (name, localpart, domain) VALUES ($1, $2, $3) \
                 ON CONFLICT (name, localpart, domain) DO NOTHING RETURNING id",
                &[&name, &localpart, &domain],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;

        if let Some(row) = inserted {
            let id: i64 = row.get(0);
            return id_from_i64(id);
        }

        self.select(txn, &name, &localpart, &domain)
            .await?
            .ok_or_else(|| {
                MailError::Database(
                    "address row vanished after uniqueness race resolution".to_string(),
                )
            })
    }

    async fn select(
        &self,
        txn: &Transaction<'_>,
        name: &str,
        localpart: &str,
        domain: &str,
    ) -> MailResult<Option<AddressId>> {
        let row = txn
            .query_opt(
                "SELECT id FROM addresses WHERE name = $1 AND localpart = $2 AND domain = $3",
                &[&name, &localpart, &domain],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        row.map(|r| id_from_i64(r.get(0))).transpose()
    }
}

fn id_from_i64(v: i64) -> MailResult<AddressId> {
    AddressId::new(v as u32)
        .ok_or_else(|| MailError::Database("address id 0 returned by sequence".to_string()))
}

/// A shareable handle, since the Injector and SMTP session both need one
/// reference to the same process-wide cache.
pub type SharedAddressCache = Arc<AddressCache>;
