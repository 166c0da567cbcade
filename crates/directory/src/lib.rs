//! Recipient and sender-permission resolution against the `aliases`,
//! `users`, and `scripts` tables (spec §4.1 RCPT TO contract, §6 schema).
//! Grounded on the query shape in `tests/src/smtp/lookup/sql.rs`'s
//! `[directory."sql".query]` test fixtures.

pub mod sql;

pub use sql::{RecipientLookup, SqlDirectory};

use async_trait::async_trait;
use common::error::MailResult;
use message::Address;

/// Abstracts recipient resolution so the SMTP session doesn't depend on the
/// SQL query shape directly — a second backend (LDAP, a flat alias file)
/// could implement the same trait without touching session code.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolves `address` to its target mailbox, owner login, and active
    /// Sieve script (if any). `None` means the address has no local
    /// mailbox — the caller treats this per dialect (spec §4.1 RCPT TO).
    async fn resolve_recipient(&self, address: &Address) -> MailResult<Option<RecipientLookup>>;

    /// The set of addresses `login` is permitted to use in From/Sender
    /// (spec §4.1 AUTH contract, §4.2 normalization rules 3/4).
    async fn permitted_senders(&self, login: &str) -> MailResult<Vec<Address>>;

    /// Verifies a login/secret pair for the SASL subsystem (spec §4.1 "AUTH:
    /// delegated to a SASL subsystem"). `Ok(false)` for both a wrong secret
    /// and an unknown login — the caller must not distinguish the two in its
    /// response.
    async fn authenticate(&self, login: &str, secret: &str) -> MailResult<bool>;
}
