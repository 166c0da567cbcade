//! `SieveAction` — the accumulated outcome of evaluating a script against one
//! recipient, applied by the store's Injector once evaluation completes.
//! Grounded on `original_source/sieved/sieveaction.h`'s `SieveAction::Type`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SieveAction {
    FileInto { mailbox: String },
    Redirect { address: String },
    Reject { reason: String },
    Discard,
    Keep,
    Vacation { reason: String },
}

impl SieveAction {
    /// `true` for actions that satisfy the implicit `keep` requirement on
    /// their own (spec §4.3: a script that takes no explicit delivery action
    /// falls back to `keep`; `fileinto`/`keep` both count as delivering,
    /// `redirect` and `reject` do not deliver to the mailbox and `discard`
    /// explicitly cancels delivery).
    pub fn satisfies_implicit_keep(&self) -> bool {
        matches!(self, SieveAction::FileInto { .. } | SieveAction::Keep)
    }

    pub fn cancels_implicit_keep(&self) -> bool {
        matches!(
            self,
            SieveAction::Discard | SieveAction::Redirect { .. } | SieveAction::Reject { .. }
        )
    }
}
