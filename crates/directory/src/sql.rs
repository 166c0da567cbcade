//! SQL-backed `Directory`, grounded on the `aliases`→`mailboxes`→`users`→
//! `scripts` join shape exercised by `tests/src/smtp/lookup/sql.rs`'s
//! `[directory."sql".query]` fixtures, adapted to the relational schema in
//! `store::schema` rather than the teacher's pluggable query-string config.

use async_trait::async_trait;

use common::error::{MailError, MailResult};
use common::ids::MailboxId;
use message::Address;
use store::Pool;

use crate::Directory;

#[derive(Debug, Clone)]
pub struct RecipientLookup {
    pub mailbox: MailboxId,
    pub sieve_script: Option<String>,
    pub owner_login: String,
}

pub struct SqlDirectory {
    pool: Pool,
    use_subaddressing: bool,
    address_separator: String,
}

impl SqlDirectory {
    pub fn new(pool: Pool, use_subaddressing: bool, address_separator: String) -> Self {
        SqlDirectory {
            pool,
            use_subaddressing,
            address_separator,
        }
    }

    fn canonical_address(&self, address: &Address) -> String {
        let localpart = if self.use_subaddressing {
            address.canonical_localpart(&self.address_separator)
        } else {
            address.localpart_lower()
        };
        format!("{}@{}", localpart, address.domain_lower())
    }
}

#[async_trait]
impl Directory for SqlDirectory {
    async fn resolve_recipient(&self, address: &Address) -> MailResult<Option<RecipientLookup>> {
        let key = self.canonical_address(address);
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT m.id, u.login, s.script \
                 FROM aliases a \
                 JOIN mailboxes m ON m.id = a.mailbox \
                 LEFT JOIN users u ON u.id = m.owner \
                 LEFT JOIN scripts s ON s.owner = m.owner AND s.active \
                 WHERE a.address = $1 AND m.deleted = false",
                &[&key],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let mailbox_id: i64 = row.get(0);
        let mailbox = MailboxId::new(mailbox_id as u32)
            .ok_or_else(|| MailError::Database("mailbox id 0 in aliases row".to_string()))?;
        let owner_login: Option<String> = row.get(1);
        let sieve_script: Option<String> = row.get(2);

        Ok(Some(RecipientLookup {
            mailbox,
            sieve_script,
            owner_login: owner_login.unwrap_or_default(),
        }))
    }

    async fn permitted_senders(&self, login: &str) -> MailResult<Vec<Address>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT a.address FROM aliases a \
                 JOIN mailboxes m ON m.id = a.mailbox \
                 JOIN users u ON u.id = m.owner \
                 WHERE u.login = $1 AND m.deleted = false",
                &[&login],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let address: String = row.get(0);
                Address::parse_bare(&address)
            })
            .collect())
    }

    /// Stored secrets are the hex digest of `blake3(secret)` (see DESIGN.md's
    /// Open Question decision on AUTH credential storage — the spec leaves
    /// the SASL backend unspecified, so user provisioning is out of scope
    /// and this only needs to verify, not hash-and-store, a secret).
    async fn authenticate(&self, login: &str, secret: &str) -> MailResult<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT secret FROM users WHERE login = $1", &[&login])
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        let Some(row) = row else {
            return Ok(false);
        };
        let stored: String = row.get(0);
        if stored.is_empty() {
            return Ok(false);
        }
        Ok(stored == blake3::hash(secret.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_address_strips_subaddress_when_enabled() {
        let pool_placeholder = ();
        let _ = pool_placeholder;
        let addr = Address::parse_bare("user+detail@example.com");
        let dir = SqlDirectoryParts {
            use_subaddressing: true,
            address_separator: "+".to_string(),
        };
        assert_eq!(dir.canonical(&addr), "user@example.com");
    }

    #[test]
    fn canonical_address_keeps_subaddress_when_disabled() {
        let addr = Address::parse_bare("user+detail@example.com");
        let dir = SqlDirectoryParts {
            use_subaddressing: false,
            address_separator: "+".to_string(),
        };
        assert_eq!(dir.canonical(&addr), "user+detail@example.com");
    }

    /// Mirrors `SqlDirectory::canonical_address` without needing a live
    /// pool, so the canonicalization rule can be unit-tested directly.
    struct SqlDirectoryParts {
        use_subaddressing: bool,
        address_separator: String,
    }

    impl SqlDirectoryParts {
        fn canonical(&self, address: &Address) -> String {
            let localpart = if self.use_subaddressing {
                address.canonical_localpart(&self.address_separator)
            } else {
                address.localpart_lower()
            };
            format!("{}@{}", localpart, address.domain_lower())
        }
    }
}
