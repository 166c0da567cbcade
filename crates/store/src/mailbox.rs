//! In-memory mirror of the `mailboxes` table (spec §4.5), grounded on
//! `original_source/server/mailbox.h`'s id/name/uidnext/modseq shape and
//! reworked around an explicit shared registry rather than a singleton,
//! per spec §9's "Global mutable state" note.

use std::sync::Arc;

use common::error::{MailError, MailResult};
use common::ids::{MailboxId, UserId};
use dashmap::DashMap;
use tokio_postgres::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    Ordinary,
    Synthetic,
    Deleted,
    View,
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    pub id: MailboxId,
    pub name: String,
    /// `None` means owner id 0, the system mailbox owner (spec §3).
    pub owner: Option<UserId>,
    pub parent: Option<MailboxId>,
    pub kind: MailboxKind,
    pub uidvalidity: i64,
    pub uidnext: i64,
    pub next_modseq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    PrefixMatch,
    ExactMatch,
}

/// Shared, process-wide mirror of the mailbox hierarchy. Injected into each
/// session rather than reached through a static (spec §9).
pub struct MailboxRegistry {
    by_id: DashMap<MailboxId, Arc<Mailbox>>,
    by_name: DashMap<(Option<UserId>, String), MailboxId>,
}

impl Default for MailboxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxRegistry {
    pub fn new() -> Self {
        MailboxRegistry {
            by_id: DashMap::new(),
            by_name: DashMap::new(),
        }
    }

    pub fn insert(&self, mailbox: Mailbox) {
        let key = (mailbox.owner, mailbox.name.clone());
        let id = mailbox.id;
        self.by_name.insert(key, id);
        self.by_id.insert(id, Arc::new(mailbox));
    }

    pub fn by_id(&self, id: MailboxId) -> Option<Arc<Mailbox>> {
        self.by_id.get(&id).map(|r| r.clone())
    }

    pub fn by_name(&self, owner: Option<UserId>, name: &str) -> Option<Arc<Mailbox>> {
        let id = *self.by_name.get(&(owner, name.to_string()))?;
        self.by_id(id)
    }

    pub fn children(&self, parent: MailboxId) -> Vec<Arc<Mailbox>> {
        self.by_id
            .iter()
            .filter(|e| e.value().parent == Some(parent))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Reflects a committed allocation or rename into the in-memory mirror.
    /// Called from the Injector's announce phase (spec §4.6 phase 9), never
    /// before the owning transaction has committed.
    pub fn update_counters(&self, id: MailboxId, uidnext: i64, next_modseq: i64) {
        if let Some(entry) = self.by_id.get(&id) {
            let mut updated = (**entry).clone();
            updated.uidnext = uidnext;
            updated.next_modseq = next_modseq;
            drop(entry);
            self.by_id.insert(id, Arc::new(updated));
        }
    }

    /// Marks `id` deleted (spec §4.5): the row keeps its id and uidvalidity,
    /// and the name becomes free for a later `create` to claim under a
    /// fresh id. The in-memory `by_id` entry is kept (kind flips to
    /// `Deleted`) so a subsequent `undelete` has something to restore.
    pub async fn delete(&self, txn: &Transaction<'_>, id: MailboxId) -> MailResult<()> {
        txn.execute(
            "UPDATE mailboxes SET deleted = true WHERE id = $1",
            &[&(id.get() as i64)],
        )
        .await
        .map_err(|e| MailError::Database(e.to_string()))?;

        if let Some(entry) = self.by_id.get(&id) {
            let mut updated = (**entry).clone();
            let key = (updated.owner, updated.name.clone());
            updated.kind = MailboxKind::Deleted;
            drop(entry);
            self.by_name.remove(&key);
            self.by_id.insert(id, Arc::new(updated));
        }
        Ok(())
    }

    /// Restores a deleted mailbox under the same id, bumping uidvalidity
    /// strictly (spec §4.5) so clients that cached the old uidvalidity
    /// notice the gap. Fails if another mailbox has since claimed the name.
    pub async fn undelete(&self, txn: &Transaction<'_>, id: MailboxId) -> MailResult<()> {
        let row = txn
            .query_one(
                "UPDATE mailboxes SET deleted = false, uidvalidity = uidvalidity + 1 \
                 WHERE id = $1 RETURNING uidvalidity",
                &[&(id.get() as i64)],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        let uidvalidity: i64 = row.get(0);

        if let Some(entry) = self.by_id.get(&id) {
            let mut updated = (**entry).clone();
            let key = (updated.owner, updated.name.clone());
            if self.by_name.contains_key(&key) {
                return Err(MailError::MailboxNameInUse(updated.name));
            }
            updated.kind = MailboxKind::Ordinary;
            updated.uidvalidity = uidvalidity;
            drop(entry);
            self.by_name.insert(key, id);
            self.by_id.insert(id, Arc::new(updated));
        }
        Ok(())
    }

    /// Atomically reserves `count` UIDs in `mailbox` and bumps its modseq by
    /// one, within `txn` (spec §4.5's allocation contract). Returns
    /// `(first_uid, new_modseq)`. The caller persists the mirror update only
    /// after the transaction commits.
    pub async fn allocate(
        &self,
        txn: &Transaction<'_>,
        mailbox: MailboxId,
        count: i64,
    ) -> MailResult<(i64, i64)> {
        let row = txn
            .query_one(
                "UPDATE mailboxes SET uidnext = uidnext + $1, next_modseq = next_modseq + 1 \
                 WHERE id = $2 RETURNING uidnext - $1, next_modseq",
                &[&count, &(mailbox.get() as i64)],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        let first_uid: i64 = row.get(0);
        let new_modseq: i64 = row.get(1);
        Ok((first_uid, new_modseq))
    }
}

fn normalize_segment(s: &str) -> String {
    s.chars().flat_map(|c| c.to_uppercase()).collect()
}

fn percent_match(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('%') => {
            percent_match(&pattern[1..], name)
                || (!name.is_empty() && percent_match(pattern, &name[1..]))
        }
        Some(c) => !name.is_empty() && name[0] == *c && percent_match(&pattern[1..], &name[1..]),
    }
}

fn segment_matches(pattern_seg: &str, name_seg: &str) -> bool {
    let p: Vec<char> = normalize_segment(pattern_seg).chars().collect();
    let n: Vec<char> = normalize_segment(name_seg).chars().collect();
    percent_match(&p, &n)
}

fn classify<'a>(pattern: &[&'a str], name: &[&'a str]) -> MatchResult {
    match (pattern.first(), name.first()) {
        (None, None) => MatchResult::ExactMatch,
        (None, Some(_)) => MatchResult::NoMatch,
        (Some(&"*"), _) => {
            let consume_zero = classify(&pattern[1..], name);
            if consume_zero == MatchResult::ExactMatch {
                return MatchResult::ExactMatch;
            }
            let consume_one = if !name.is_empty() {
                classify(pattern, &name[1..])
            } else {
                MatchResult::NoMatch
            };
            if consume_one == MatchResult::ExactMatch {
                return MatchResult::ExactMatch;
            }
            if consume_zero == MatchResult::PrefixMatch || consume_one == MatchResult::PrefixMatch
            {
                MatchResult::PrefixMatch
            } else {
                MatchResult::NoMatch
            }
        }
        (Some(_), None) => MatchResult::PrefixMatch,
        (Some(seg), Some(name_seg)) => {
            if segment_matches(seg, name_seg) {
                classify(&pattern[1..], &name[1..])
            } else {
                MatchResult::NoMatch
            }
        }
    }
}

/// `%` matches within one hierarchy segment, `*` matches across segments
/// (spec §4.5).
pub fn match_name(pattern: &str, name: &str) -> MatchResult {
    let pattern_segs: Vec<&str> = pattern.split('/').collect();
    let name_segs: Vec<&str> = name.split('/').collect();
    classify(&pattern_segs, &name_segs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_name_matches_exactly() {
        assert_eq!(match_name("INBOX/Junk", "INBOX/Junk"), MatchResult::ExactMatch);
    }

    #[test]
    fn percent_confined_to_one_segment() {
        assert_eq!(match_name("INBOX/%", "INBOX/Junk"), MatchResult::ExactMatch);
        assert_eq!(match_name("INBOX/%", "INBOX/Junk/2024"), MatchResult::NoMatch);
    }

    #[test]
    fn star_crosses_segments() {
        assert_eq!(match_name("INBOX/*", "INBOX/Junk/2024"), MatchResult::ExactMatch);
    }

    #[test]
    fn shorter_name_is_prefix_candidate() {
        assert_eq!(match_name("INBOX/Junk/2024", "INBOX"), MatchResult::PrefixMatch);
    }

    #[test]
    fn case_fold_is_title_case() {
        assert_eq!(match_name("inbox", "INBOX"), MatchResult::ExactMatch);
    }
}
