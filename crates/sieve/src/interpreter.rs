//! Tri-state Sieve evaluation (spec §4.3): a script is evaluated against
//! whatever message data is available at the time, and a test whose inputs
//! are not yet known (headers/size before `DATA` completes) yields
//! [`Trilean::Undecidable`] rather than forcing a premature decision.
//! Grounded on the `Sieve::evaluate`/`done` staged-evaluation API in
//! `original_source/sieve/sieve.h`.

use std::collections::HashMap;

use message::{Address, AddressFieldKind};

use crate::action::SieveAction;
use crate::ast::{AddressPart, Block, Branch, Comparator, Command, EnvelopePart, MatchType, Test};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trilean {
    True,
    False,
    Undecidable,
}

impl Trilean {
    fn from_bool(b: bool) -> Self {
        if b {
            Trilean::True
        } else {
            Trilean::False
        }
    }

    fn and(self, other: Trilean) -> Trilean {
        match (self, other) {
            (Trilean::False, _) | (_, Trilean::False) => Trilean::False,
            (Trilean::True, Trilean::True) => Trilean::True,
            _ => Trilean::Undecidable,
        }
    }

    fn or(self, other: Trilean) -> Trilean {
        match (self, other) {
            (Trilean::True, _) | (_, Trilean::True) => Trilean::True,
            (Trilean::False, Trilean::False) => Trilean::False,
            _ => Trilean::Undecidable,
        }
    }

    fn negate(self) -> Trilean {
        match self {
            Trilean::True => Trilean::False,
            Trilean::False => Trilean::True,
            Trilean::Undecidable => Trilean::Undecidable,
        }
    }
}

/// The message data visible to the interpreter at a given evaluation point.
/// `headers`/`addresses`/`size` are `None` until the data they describe has
/// actually arrived (partial RCPT-time evaluation per spec §4.3); the
/// envelope sender/recipient are always known.
pub struct PartialView<'a> {
    pub envelope_from: &'a str,
    pub envelope_to: &'a str,
    pub headers: Option<&'a [(String, String)]>,
    pub addresses: Option<&'a HashMap<AddressFieldKind, Vec<Address>>>,
    pub size: Option<u64>,
}

fn compare(comparator: Comparator, match_type: MatchType, candidate: &str, key: &str) -> bool {
    let (c, k) = match comparator {
        Comparator::AsciiCasemap => (candidate.to_ascii_lowercase(), key.to_ascii_lowercase()),
        Comparator::Octet => (candidate.to_string(), key.to_string()),
    };
    match match_type {
        MatchType::Is => c == k,
        MatchType::Contains => c.contains(&k),
        MatchType::Matches => crate::glob::matches(&k, &c),
    }
}

fn eval_test(test: &Test, view: &PartialView) -> Trilean {
    match test {
        Test::True => Trilean::True,
        Test::False => Trilean::False,
        Test::Not(inner) => eval_test(inner, view).negate(),
        Test::AllOf(tests) => tests
            .iter()
            .fold(Trilean::True, |acc, t| acc.and(eval_test(t, view))),
        Test::AnyOf(tests) => tests
            .iter()
            .fold(Trilean::False, |acc, t| acc.or(eval_test(t, view))),
        Test::Size { over, limit } => match view.size {
            None => Trilean::Undecidable,
            Some(size) => Trilean::from_bool(if *over { size > *limit } else { size < *limit }),
        },
        Test::Exists { header_names } => match view.headers {
            None => Trilean::Undecidable,
            Some(headers) => Trilean::from_bool(header_names.iter().all(|name| {
                headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
            })),
        },
        Test::Header {
            header_names,
            comparator,
            match_type,
            keys,
        } => match view.headers {
            None => Trilean::Undecidable,
            Some(headers) => {
                let found = header_names.iter().any(|name| {
                    headers
                        .iter()
                        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                        .any(|(_, v)| keys.iter().any(|k| compare(*comparator, *match_type, v, k)))
                });
                Trilean::from_bool(found)
            }
        },
        Test::Address {
            header_names,
            address_part,
            comparator,
            match_type,
            keys,
        } => match view.addresses {
            None => Trilean::Undecidable,
            Some(map) => {
                let found = header_names.iter().any(|name| {
                    AddressFieldKind::ALL
                        .iter()
                        .find(|kind| kind.header_name().eq_ignore_ascii_case(name))
                        .and_then(|kind| map.get(kind))
                        .map(|addrs| {
                            addrs.iter().any(|a| {
                                let candidate = match address_part {
                                    AddressPart::All => a.as_path(),
                                    AddressPart::Localpart => a.localpart.clone(),
                                    AddressPart::Domain => a.domain.clone(),
                                };
                                keys.iter()
                                    .any(|k| compare(*comparator, *match_type, &candidate, k))
                            })
                        })
                        .unwrap_or(false)
                });
                Trilean::from_bool(found)
            }
        },
        Test::Envelope {
            parts,
            comparator,
            match_type,
            keys,
        } => {
            let found = parts.iter().any(|part| {
                let candidate = match part {
                    EnvelopePart::From => view.envelope_from,
                    EnvelopePart::To => view.envelope_to,
                };
                keys.iter()
                    .any(|k| compare(*comparator, *match_type, candidate, k))
            });
            Trilean::from_bool(found)
        }
    }
}

struct Frame {
    block: Block,
    index: usize,
}

/// Whether the branch dispatch for an `if`/`elsif`/`else` chain could be
/// resolved against the current view.
enum BranchOutcome {
    Decided(Option<Block>),
    Undecidable,
}

fn select_branch(branches: &[Branch], view: &PartialView) -> BranchOutcome {
    for branch in branches {
        match &branch.test {
            None => return BranchOutcome::Decided(Some(branch.body.clone())),
            Some(test) => match eval_test(test, view) {
                Trilean::True => return BranchOutcome::Decided(Some(branch.body.clone())),
                Trilean::False => continue,
                Trilean::Undecidable => return BranchOutcome::Undecidable,
            },
        }
    }
    BranchOutcome::Decided(None)
}

/// Resumable evaluation state for one script against one recipient. Spec
/// §4.3's "evaluated per-recipient at reception time" requirement means one
/// `EvalContext` exists per envelope recipient, each progressing
/// independently as more of the message becomes available.
pub struct EvalContext {
    stack: Vec<Frame>,
    pub actions: Vec<SieveAction>,
    pub stopped: bool,
}

impl EvalContext {
    pub fn new(script: Block) -> Self {
        EvalContext {
            stack: vec![Frame {
                block: script,
                index: 0,
            }],
            actions: Vec::new(),
            stopped: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stopped || self.stack.is_empty()
    }

    /// Whether the executed actions so far satisfy the implicit-keep
    /// requirement (spec §4.3): delivered if any action already delivers, or
    /// if evaluation is complete and nothing cancelled it.
    pub fn implicit_keep_applies(&self) -> bool {
        if self.actions.iter().any(|a| a.satisfies_implicit_keep()) {
            return false;
        }
        !self.actions.iter().any(|a| a.cancels_implicit_keep())
    }

    /// Runs as far as possible given `view`, returning `Trilean::Undecidable`
    /// if it had to suspend on a test it could not yet resolve (the caller
    /// should call `run` again once more data is available), or
    /// `Trilean::True`/`Trilean::False` once execution has fully completed
    /// (the boolean distinguishes nothing special — both mean "done").
    pub fn run(&mut self, view: &PartialView) -> Trilean {
        loop {
            if self.stopped {
                return Trilean::True;
            }
            let cmd = {
                let Some(frame) = self.stack.last_mut() else {
                    return Trilean::True;
                };
                if frame.index >= frame.block.len() {
                    None
                } else {
                    let cmd = frame.block[frame.index].clone();
                    frame.index += 1;
                    Some(cmd)
                }
            };
            let Some(cmd) = cmd else {
                self.stack.pop();
                if self.stack.is_empty() {
                    return Trilean::True;
                }
                continue;
            };
            match cmd {
                Command::Require(_) => {}
                Command::Stop => {
                    self.stopped = true;
                    return Trilean::True;
                }
                Command::Keep => self.actions.push(SieveAction::Keep),
                Command::Discard => self.actions.push(SieveAction::Discard),
                Command::FileInto { mailbox } => {
                    self.actions.push(SieveAction::FileInto { mailbox })
                }
                Command::Redirect { address } => {
                    self.actions.push(SieveAction::Redirect { address })
                }
                Command::Reject { reason } => {
                    self.actions.push(SieveAction::Reject { reason });
                    self.stopped = true;
                    return Trilean::True;
                }
                Command::Vacation { reason } => {
                    self.actions.push(SieveAction::Vacation { reason })
                }
                Command::If(branches) => match select_branch(&branches, view) {
                    BranchOutcome::Undecidable => {
                        if let Some(frame) = self.stack.last_mut() {
                            frame.index -= 1;
                        }
                        return Trilean::Undecidable;
                    }
                    BranchOutcome::Decided(Some(body)) => {
                        self.stack.push(Frame { block: body, index: 0 });
                    }
                    BranchOutcome::Decided(None) => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_script;

    fn view_envelope_only<'a>(from: &'a str, to: &'a str) -> PartialView<'a> {
        PartialView {
            envelope_from: from,
            envelope_to: to,
            headers: None,
            addresses: None,
            size: None,
        }
    }

    #[test]
    fn envelope_test_decides_without_headers() {
        let script = parse_script(r#"if envelope :is "from" "a@b.com" { discard; } else { keep; }"#)
            .unwrap();
        let mut ctx = EvalContext::new(script);
        let view = view_envelope_only("a@b.com", "u@b.com");
        let outcome = ctx.run(&view);
        assert_eq!(outcome, Trilean::True);
        assert_eq!(ctx.actions, vec![SieveAction::Discard]);
    }

    #[test]
    fn header_test_suspends_until_headers_available() {
        let script =
            parse_script(r#"if header :contains "subject" "spam" { discard; } else { keep; }"#)
                .unwrap();
        let mut ctx = EvalContext::new(script);
        let view = view_envelope_only("a@b.com", "u@b.com");
        assert_eq!(ctx.run(&view), Trilean::Undecidable);
        assert!(ctx.actions.is_empty());

        let headers = vec![("subject".to_string(), "this is SPAM".to_string())];
        let view2 = PartialView {
            envelope_from: "a@b.com",
            envelope_to: "u@b.com",
            headers: Some(&headers),
            addresses: None,
            size: None,
        };
        assert_eq!(ctx.run(&view2), Trilean::True);
        assert_eq!(ctx.actions, vec![SieveAction::Discard]);
    }

    #[test]
    fn stop_short_circuits_remaining_commands() {
        let script = parse_script(r#"keep; stop; discard;"#).unwrap();
        let mut ctx = EvalContext::new(script);
        let view = view_envelope_only("a@b.com", "u@b.com");
        ctx.run(&view);
        assert_eq!(ctx.actions, vec![SieveAction::Keep]);
        assert!(!ctx.implicit_keep_applies());
    }

    #[test]
    fn no_explicit_action_falls_back_to_implicit_keep() {
        let script = parse_script(r#"if false { discard; }"#).unwrap();
        let mut ctx = EvalContext::new(script);
        let view = view_envelope_only("a@b.com", "u@b.com");
        ctx.run(&view);
        assert!(ctx.actions.is_empty());
        assert!(ctx.implicit_keep_applies());
    }
}
