//! URLAUTH key store backing the `UrlAuthVerifier` trait `crates/store`
//! leaves abstract (spec §6 URLAUTH rules; see DESIGN.md's Open Question
//! decision on key persistence). Kept in memory and per-process: a key
//! minted by one instance is only verifiable against that same instance.

use async_trait::async_trait;
use dashmap::DashMap;

use common::ids::MailboxId;
use store::UrlAuthVerifier;

#[derive(Default)]
pub struct InMemoryUrlAuthStore {
    tokens: DashMap<(MailboxId, String), String>,
}

impl InMemoryUrlAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, mailbox: MailboxId, mechanism: &str, token: impl Into<String>) {
        self.tokens
            .insert((mailbox, mechanism.to_string()), token.into());
    }
}

#[async_trait]
impl UrlAuthVerifier for InMemoryUrlAuthStore {
    async fn verify(&self, mailbox: MailboxId, mechanism: &str, token: &str) -> bool {
        self.tokens
            .get(&(mailbox, mechanism.to_string()))
            .map(|v| v.as_str() == token)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_token_verifies_and_wrong_one_fails() {
        let store = InMemoryUrlAuthStore::new();
        let mailbox = MailboxId::new(7).unwrap();
        store.issue(mailbox, "internal", "tok123");
        assert!(store.verify(mailbox, "internal", "tok123").await);
        assert!(!store.verify(mailbox, "internal", "wrong").await);
    }
}
