//! From accumulated DATA/BDAT octets to a persisted message (spec §4.2,
//! §4.3, §4.6, §4.9): parses the raw message, normalizes it (Submit dialect
//! only), evaluates each local recipient's Sieve script against the now
//! fully-available data, and assembles the `Injectee`/`DeliveryRequest`
//! batch the Injector persists in one transaction.

use std::sync::Arc;

use chrono::Utc;

use common::error::MailResult;
use message::{Address, Message, MessageState};
use sieve_filter::{parse_script, EvalContext, PartialView, SieveAction, Trilean};
use store::{Injectee, MailboxRegistry};

use crate::core::{Dialect, RcptTarget, ServerCore, SessionData};
use crate::normalize::normalize_submission;
use crate::spool::{build_delivery_requests, SpoolEntry};

/// The per-recipient disposition returned to the caller once the batch has
/// been through the Injector — what the session should put in its response
/// (one line per recipient for LMTP, spec §4.9; a single aggregate reply
/// otherwise).
pub enum RecipientOutcome {
    Accepted,
    Rejected(String),
}

pub struct InjectionResult {
    /// Same length and order as `SessionData::rcpt_to`.
    pub outcomes: Vec<RecipientOutcome>,
    pub raw: Vec<u8>,
}

/// Prepends the synthetic trace headers a receiving server adds before
/// parsing (spec §4.2): a `Received` line always, a `Return-Path` for
/// anything other than the Submit dialect (submission servers leave that to
/// the server that performs final delivery).
fn build_raw_message(core: &ServerCore, data: &SessionData) -> Vec<u8> {
    let mut raw = Vec::with_capacity(data.body.len() + 256);
    let from_path = data
        .mail_from
        .as_ref()
        .map(Address::as_path)
        .unwrap_or_default();

    if data.dialect != Dialect::Submit {
        raw.extend_from_slice(format!("Return-Path: <{from_path}>\r\n").as_bytes());
    }
    raw.extend_from_slice(
        format!(
            "Received: from {} by {} with {}; {}\r\n",
            if data.helo_domain.is_empty() {
                "unknown"
            } else {
                &data.helo_domain
            },
            core.config.hostname,
            data.dialect.greeting_protocol(),
            Utc::now().to_rfc2822()
        )
        .as_bytes(),
    );
    raw.extend_from_slice(&data.body);
    raw
}

/// Runs one recipient's active Sieve script (if any) to completion against
/// `message`, with no script, or a script that fails to parse without
/// `hard_fail_on_parse_error`, treated as an empty script rather than as an
/// empty action list: the implicit-keep rule (spec §4.3) still has to run so
/// the recipient's home mailbox gets the message. All message data is
/// available post-DATA, so a single `run` call always resolves to
/// `Trilean::True` — anything else is a script bug, and is treated the same
/// as a parse failure.
fn evaluate_recipient(
    script_source: Option<&str>,
    hard_fail_on_parse_error: bool,
    message: &Message,
    envelope_from: &str,
    envelope_to: &str,
) -> Result<Vec<SieveAction>, String> {
    let block = match script_source {
        None => Vec::new(),
        Some(source) => match parse_script(source) {
            Ok(block) => block,
            Err(e) => {
                if hard_fail_on_parse_error {
                    return Err(format!("sieve script does not parse: {e}"));
                }
                Vec::new()
            }
        },
    };

    let view = PartialView {
        envelope_from,
        envelope_to,
        headers: Some(&message.headers),
        addresses: Some(&message.address_fields),
        size: Some(message.size as u64),
    };
    let mut ctx = EvalContext::new(block);
    let resolved = ctx.run(&view);
    debug_assert!(
        !matches!(resolved, Trilean::Undecidable),
        "every test should resolve once full message data is available"
    );

    let mut actions = ctx.actions.clone();
    if ctx.implicit_keep_applies() {
        actions.push(SieveAction::Keep);
    }
    Ok(actions)
}

/// Resolves a recipient's Sieve actions into the mailboxes the message
/// should land in plus any `redirect` targets, or a rejection reason.
enum ActionPlan {
    Deliver {
        mailboxes: Vec<common::ids::MailboxId>,
        redirects: Vec<String>,
    },
    Reject(String),
}

fn plan_actions(
    registry: &MailboxRegistry,
    owner: Option<common::ids::UserId>,
    actions: &[SieveAction],
) -> ActionPlan {
    let mut mailboxes = Vec::new();
    let mut redirects = Vec::new();

    for action in actions {
        match action {
            SieveAction::Reject { reason } => return ActionPlan::Reject(reason.clone()),
            SieveAction::Discard => {}
            SieveAction::Keep => {
                if let Some(inbox) = registry.by_name(owner, "INBOX") {
                    if !mailboxes.contains(&inbox.id) {
                        mailboxes.push(inbox.id);
                    }
                }
            }
            SieveAction::FileInto { mailbox } => {
                let resolved = registry
                    .by_name(owner, mailbox)
                    .or_else(|| registry.by_name(owner, "INBOX"));
                if let Some(target) = resolved {
                    if !mailboxes.contains(&target.id) {
                        mailboxes.push(target.id);
                    }
                }
            }
            SieveAction::Redirect { address } => redirects.push(address.clone()),
            SieveAction::Vacation { .. } => {
                // Auto-reply generation is outside this crate's scope
                // (spec Non-goals: no outbound transport here).
            }
        }
    }

    ActionPlan::Deliver {
        mailboxes,
        redirects,
    }
}

/// Builds the raw message, evaluates Sieve per local recipient, and hands
/// the resulting batch to `core.injector`. Returns one outcome per entry in
/// `data.rcpt_to`, in the same order.
pub async fn inject_message(core: &Arc<ServerCore>, data: &SessionData) -> MailResult<InjectionResult> {
    let raw = build_raw_message(core, data);
    let parsed = Message::parse(raw.clone(), Utc::now().timestamp());
    let base_message = if parsed.state == MessageState::Unparsable {
        // Submit dialect never wraps unparsable input — it rejects
        // permanently so clients learn about their bugs (spec §4.2/§7).
        if data.dialect == Dialect::Submit {
            return Err(common::error::MailError::InjectionPermanent(
                parsed.error.clone(),
            ));
        }
        let from = data
            .mail_from
            .as_ref()
            .map(Address::as_path)
            .unwrap_or_default();
        let to = data
            .rcpt_to
            .first()
            .map(|r| r.address.as_path())
            .unwrap_or_default();
        Message::wrap_unparsable(&raw, &parsed.error, &from, &to, Utc::now().timestamp())
    } else {
        parsed
    };

    let mut message = base_message;
    if data.dialect == Dialect::Submit {
        normalize_submission(
            &mut message,
            &core.config.hostname,
            data.transaction_id,
            &data.permitted_senders,
            core.config.check_sender_addresses,
        );
    }

    let mut items: Vec<Injectee> = Vec::new();
    let mut fallback_item_index: Option<usize> = None;
    let mut spool_entries: Vec<SpoolEntry> = Vec::new();
    let mut outcomes = Vec::with_capacity(data.rcpt_to.len());

    let from_path = data
        .mail_from
        .as_ref()
        .map(Address::as_path)
        .unwrap_or_default();

    for entry in &data.rcpt_to {
        match &entry.target {
            RcptTarget::Remote => {
                let index = *fallback_item_index.get_or_insert_with(|| {
                    items.push(Injectee::new(message.clone(), Vec::new()));
                    items.len() - 1
                });
                spool_entries.push(SpoolEntry {
                    item_index: index,
                    sender: from_path.clone(),
                    recipient: entry.address.as_path(),
                });
                outcomes.push(RecipientOutcome::Accepted);
            }
            RcptTarget::Local(lookup) => {
                let owner = core
                    .registry
                    .by_id(lookup.mailbox)
                    .and_then(|mb| mb.owner);

                let actions = evaluate_recipient(
                    lookup.sieve_script.as_deref(),
                    core.config.sieve.hard_fail_on_parse_error,
                    &message,
                    &from_path,
                    &entry.address.as_path(),
                );
                let actions = match actions {
                    Ok(actions) => actions,
                    Err(reason) => {
                        outcomes.push(RecipientOutcome::Rejected(reason));
                        continue;
                    }
                };

                match plan_actions(&core.registry, owner, &actions) {
                    ActionPlan::Reject(reason) => {
                        outcomes.push(RecipientOutcome::Rejected(reason));
                    }
                    ActionPlan::Deliver {
                        mailboxes,
                        redirects,
                    } => {
                        let index = items.len();
                        items.push(Injectee::new(message.clone(), mailboxes));
                        fallback_item_index.get_or_insert(index);
                        for address in redirects {
                            spool_entries.push(SpoolEntry {
                                item_index: index,
                                sender: from_path.clone(),
                                recipient: address,
                            });
                        }
                        outcomes.push(RecipientOutcome::Accepted);
                    }
                }
            }
        }
    }

    if !items.is_empty() || !spool_entries.is_empty() {
        let deliveries = build_delivery_requests(spool_entries);
        core.injector.inject(items, deliveries).await?;
    }

    Ok(InjectionResult { outcomes, raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{Mailbox, MailboxKind};

    fn registry_with_inbox(owner: Option<common::ids::UserId>) -> MailboxRegistry {
        let registry = MailboxRegistry::new();
        registry.insert(Mailbox {
            id: common::ids::MailboxId::new(1).unwrap(),
            name: "INBOX".to_string(),
            owner,
            parent: None,
            kind: MailboxKind::Ordinary,
            uidvalidity: 1,
            uidnext: 1,
            next_modseq: 1,
        });
        registry
    }

    #[test]
    fn no_script_falls_back_to_implicit_keep() {
        let actions = evaluate_recipient(None, false, &Message::parse(b"a\r\n".to_vec(), 0), "s@a", "u@b")
            .unwrap();
        assert_eq!(actions, vec![SieveAction::Keep]);
    }

    #[test]
    fn unparsable_script_without_hard_fail_falls_back_to_implicit_keep() {
        let actions = evaluate_recipient(
            Some("if header :garbage"),
            false,
            &Message::parse(b"a\r\n".to_vec(), 0),
            "s@a",
            "u@b",
        )
        .unwrap();
        assert_eq!(actions, vec![SieveAction::Keep]);
    }

    #[test]
    fn unparsable_script_with_hard_fail_rejects() {
        let result = evaluate_recipient(
            Some("if header :garbage"),
            true,
            &Message::parse(b"a\r\n".to_vec(), 0),
            "s@a",
            "u@b",
        );
        assert!(result.is_err());
    }

    #[test]
    fn envelope_from_is_wired_to_the_real_mail_from() {
        let script = r#"if envelope :is "from" "s@a" { discard; } else { keep; }"#;
        let actions = evaluate_recipient(
            Some(script),
            false,
            &Message::parse(b"a\r\n".to_vec(), 0),
            "s@a",
            "u@b",
        )
        .unwrap();
        assert_eq!(actions, vec![SieveAction::Discard]);
    }

    #[test]
    fn envelope_to_is_wired_to_the_specific_recipient() {
        let script = r#"if envelope :is "to" "u@b" { discard; } else { keep; }"#;
        let actions = evaluate_recipient(
            Some(script),
            false,
            &Message::parse(b"a\r\n".to_vec(), 0),
            "s@a",
            "u@b",
        )
        .unwrap();
        assert_eq!(actions, vec![SieveAction::Discard]);
    }

    #[test]
    fn keep_action_resolves_to_inbox() {
        let owner = common::ids::UserId::new(5);
        let registry = registry_with_inbox(owner);
        match plan_actions(&registry, owner, &[SieveAction::Keep]) {
            ActionPlan::Deliver { mailboxes, redirects } => {
                assert_eq!(mailboxes.len(), 1);
                assert!(redirects.is_empty());
            }
            ActionPlan::Reject(_) => panic!("keep should not reject"),
        }
    }

    #[test]
    fn discard_action_yields_no_mailboxes() {
        let owner = common::ids::UserId::new(5);
        let registry = registry_with_inbox(owner);
        match plan_actions(&registry, owner, &[SieveAction::Discard]) {
            ActionPlan::Deliver { mailboxes, .. } => assert!(mailboxes.is_empty()),
            ActionPlan::Reject(_) => panic!("discard should not reject"),
        }
    }

    #[test]
    fn reject_action_short_circuits_with_reason() {
        let owner = common::ids::UserId::new(5);
        let registry = registry_with_inbox(owner);
        let actions = vec![
            SieveAction::Keep,
            SieveAction::Reject {
                reason: "spam".to_string(),
            },
        ];
        match plan_actions(&registry, owner, &actions) {
            ActionPlan::Reject(reason) => assert_eq!(reason, "spam"),
            ActionPlan::Deliver { .. } => panic!("reject should win"),
        }
    }

    #[test]
    fn redirect_action_is_collected_separately_from_mailboxes() {
        let owner = common::ids::UserId::new(5);
        let registry = registry_with_inbox(owner);
        let actions = vec![SieveAction::Redirect {
            address: "forward@elsewhere.example".to_string(),
        }];
        match plan_actions(&registry, owner, &actions) {
            ActionPlan::Deliver { mailboxes, redirects } => {
                assert!(mailboxes.is_empty());
                assert_eq!(redirects, vec!["forward@elsewhere.example".to_string()]);
            }
            ActionPlan::Reject(_) => panic!("redirect should not reject"),
        }
    }
}
