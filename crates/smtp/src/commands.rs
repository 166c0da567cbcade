//! Hand-rolled ESMTP/LMTP/Submit command line parsing and dispatch (spec
//! §4.1, §6). There is no cached, verifiable copy of an off-the-shelf ESMTP
//! parser crate available to ground this on, so commands are parsed the
//! direct way: split the verb, match it, parse its own argument grammar.

use base64::Engine;

use common::error::{MailError, MailResult};
use message::Address;

use crate::core::{Dialect, InputMode, RcptEntry, RcptTarget, Session};
use crate::response::{Reply, ReplyBatch};

/// What the connection-driving loop in `lib.rs` should do after a command
/// line has been dispatched.
pub enum Outcome {
    Reply(ReplyBatch),
    /// Switch to `InputMode::Data`; the loop reads a dot-terminated body next.
    EnterData(ReplyBatch),
    /// Switch to `InputMode::Chunk`; the loop reads exactly `size` octets.
    EnterChunk { size: usize, last: bool },
    /// Switch to `InputMode::Sasl`; the loop reads one base64 continuation line.
    EnterSasl(ReplyBatch),
    Quit(ReplyBatch),
}

fn reply(code: u16, enhanced: &str, text: impl Into<String>) -> Outcome {
    Outcome::Reply(ReplyBatch::single(Reply::new(code, enhanced, text)))
}

fn err_reply(err: MailError, soft_bounce: bool) -> Outcome {
    Outcome::Reply(ReplyBatch::single(Reply::from_error(&err, soft_bounce)))
}

/// Splits `"VERB rest"` into an uppercase verb and the untouched remainder.
fn split_verb(line: &str) -> (String, &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.find(' ') {
        Some(idx) => (line[..idx].to_ascii_uppercase(), line[idx + 1..].trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// Parses `esmtp-params` after a `MAIL FROM`/`RCPT TO` path, rejecting any
/// parameter name not in `allowed` with 501 (spec §4.1).
fn parse_params<'a>(rest: &'a str, allowed: &[&str]) -> Result<Vec<(&'a str, &'a str)>, ()> {
    let mut params = Vec::new();
    for token in rest.split_whitespace() {
        let (name, value) = token.split_once('=').unwrap_or((token, ""));
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            return Err(());
        }
        params.push((name, value));
    }
    Ok(params)
}

/// Extracts the angle-bracket path from `FROM:<path>` / `TO:<path>`, plus
/// whatever parameter text follows.
fn extract_path<'a>(rest: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let rest = rest.strip_prefix(keyword)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':')?;
    let rest = rest.trim_start();
    let (path, tail) = if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        (&stripped[..end], stripped[end + 1..].trim())
    } else {
        match rest.find(' ') {
            Some(idx) => (&rest[..idx], rest[idx + 1..].trim()),
            None => (rest, ""),
        }
    };
    Some((path, tail))
}

fn capability_lines(session: &Session<impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>) -> Vec<String> {
    let mut caps = vec![
        "PIPELINING".to_string(),
        "8BITMIME".to_string(),
        format!("SIZE {}", session.core.config.max_message_size),
        "CHUNKING".to_string(),
        "BURL imap".to_string(),
        "DSN".to_string(),
        "ENHANCEDSTATUSCODES".to_string(),
    ];
    if session.data.dialect.offers_auth() {
        caps.push("AUTH PLAIN".to_string());
    }
    caps.push("STARTTLS".to_string());
    caps
}

/// `EHLO`/`LHLO`/`HELO`: resets the envelope, records the hello name,
/// advertises capabilities (spec §4.1).
fn handle_hello<T>(session: &mut Session<T>, hello_name: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    session.data.reset_transaction();
    session.data.helo_domain = hello_name.to_string();

    let greeting = format!(
        "{} Hello {}",
        session.core.config.hostname,
        if hello_name.is_empty() {
            "there"
        } else {
            hello_name
        }
    );
    let mut lines = vec![greeting];
    lines.extend(capability_lines(session));
    Outcome::Reply(ReplyBatch::single(Reply::new(250, "", lines.join("\n"))))
}

fn handle_mail<T>(session: &mut Session<T>, rest: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    if session.data.mail_from.is_some() {
        return err_reply(
            MailError::ProtocolSequence("sender already set".to_string()),
            session.core.config.soft_bounce,
        );
    }
    let Some((path, tail)) = extract_path(rest, "FROM") else {
        return err_reply(
            MailError::ProtocolSyntax("malformed MAIL FROM".to_string()),
            false,
        );
    };
    let params = match parse_params(tail, &["RET", "ENVID", "BODY", "SIZE"]) {
        Ok(params) => params,
        Err(()) => return reply(501, "5.5.4", "unrecognized MAIL FROM parameter"),
    };
    match check_size_param(&params, session.core.config.max_message_size) {
        Ok(()) => {}
        Err(SizeCheckError::Malformed) => {
            return reply(501, "5.5.4", "malformed SIZE parameter");
        }
        Err(SizeCheckError::TooLarge(declared)) => {
            return err_reply(
                MailError::MessageTooLarge {
                    declared,
                    max: session.core.config.max_message_size,
                },
                false,
            );
        }
    }
    session.data.mail_from = Some(Address::parse_bare(path));
    reply(250, "2.1.0", "sender ok")
}

enum SizeCheckError {
    Malformed,
    TooLarge(usize),
}

/// Validates a `SIZE=` MAIL FROM parameter against `max_message_size`
/// (SPEC_FULL.md §2 supplemental rejection rule). Absent `SIZE` is fine.
fn check_size_param(params: &[(&str, &str)], max: usize) -> Result<(), SizeCheckError> {
    let Some((_, value)) = params.iter().find(|(name, _)| name.eq_ignore_ascii_case("SIZE")) else {
        return Ok(());
    };
    match value.parse::<usize>() {
        Ok(declared) if declared > max => Err(SizeCheckError::TooLarge(declared)),
        Ok(_) => Ok(()),
        Err(_) => Err(SizeCheckError::Malformed),
    }
}

async fn handle_rcpt<T>(session: &mut Session<T>, rest: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    if session.data.mail_from.is_none() {
        return err_reply(
            MailError::ProtocolSequence("no sender set".to_string()),
            false,
        );
    }
    let Some((path, tail)) = extract_path(rest, "TO") else {
        return err_reply(
            MailError::ProtocolSyntax("malformed RCPT TO".to_string()),
            false,
        );
    };
    if parse_params(tail, &["NOTIFY", "ORCPT"]).is_err() {
        return reply(501, "5.5.4", "unrecognized RCPT TO parameter");
    }

    let address = Address::parse_bare(path);
    match session.core.directory.resolve_recipient(&address).await {
        Ok(Some(lookup)) => {
            session.data.rcpt_to.push(RcptEntry {
                address,
                target: RcptTarget::Local(lookup),
            });
            reply(250, "2.1.5", "recipient ok")
        }
        Ok(None) if session.data.dialect == Dialect::Submit => {
            session.data.rcpt_to.push(RcptEntry {
                address,
                target: RcptTarget::Remote,
            });
            reply(250, "2.1.5", "recipient ok (onward delivery)")
        }
        Ok(None) => {
            session.data.rcpt_errors += 1;
            reply(450, "4.1.1", "mailbox unavailable")
        }
        Err(e) => err_reply(e, session.core.config.soft_bounce),
    }
}

fn handle_rset<T>(session: &mut Session<T>) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    session.data.reset_transaction();
    reply(250, "2.0.0", "reset ok")
}

/// Parses `BDAT <size> [LAST]`.
fn parse_bdat(rest: &str) -> Option<(usize, bool)> {
    let mut parts = rest.split_whitespace();
    let size: usize = parts.next()?.parse().ok()?;
    let last = matches!(parts.next(), Some(tok) if tok.eq_ignore_ascii_case("LAST"));
    Some((size, last))
}

/// Parses `AUTH PLAIN [initial-response]`, decoding the SASL PLAIN buffer
/// `\0authzid\0authcid\0passwd` (only `authcid`/`passwd` are used; the spec
/// leaves SASL mechanism plumbing otherwise unspecified).
fn decode_auth_plain(initial: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(initial)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let mut parts = text.split('\0');
    let _authzid = parts.next()?;
    let authcid = parts.next()?.to_string();
    let passwd = parts.next()?.to_string();
    Some((authcid, passwd))
}

async fn finish_auth_plain<T>(session: &mut Session<T>, login: &str, secret: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match session.core.directory.authenticate(login, secret).await {
        Ok(true) => match session.core.directory.permitted_senders(login).await {
            Ok(senders) => {
                session.data.authenticated_as = Some(login.to_string());
                session.data.permitted_senders = senders;
                reply(235, "2.7.0", "authentication successful")
            }
            Err(e) => err_reply(e, false),
        },
        Ok(false) => {
            session.data.auth_errors += 1;
            reply(535, "5.7.8", "authentication failed")
        }
        Err(e) => err_reply(e, false),
    }
}

/// Runs injection over the accumulated body, composes the response (one
/// line per RCPT in LMTP, per spec §4.9; a single aggregate reply
/// otherwise), fires the message-copy sink, and resets the envelope for the
/// next transaction. Shared by the DATA terminator, `BDAT ... LAST`, and
/// `BURL ... LAST`.
pub async fn finalize_transaction<T>(session: &mut Session<T>) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let soft_bounce = session.core.config.soft_bounce;
    let from = session
        .data
        .mail_from
        .as_ref()
        .map(message::Address::as_path)
        .unwrap_or_default();
    let to: Vec<String> = session
        .data
        .rcpt_to
        .iter()
        .map(|r| r.address.as_path())
        .collect();

    let result = crate::injection::inject_message(&session.core, &session.data).await;

    let batch = match result {
        Err(e) => {
            let reply = Reply::from_error(&e, soft_bounce);
            crate::copy_sink::maybe_write_copy(
                session.core.config.message_copy,
                session.core.config.message_copy_directory.as_deref(),
                crate::copy_sink::CopyRequest {
                    transaction_id: session.data.transaction_id,
                    from: &from,
                    to: &to,
                    error: Some(&e.to_string()),
                    raw: &session.data.body,
                },
            )
            .await;
            ReplyBatch::single(reply)
        }
        Ok(result) => {
            let mut had_error = false;
            let mut batch = ReplyBatch::default();
            if session.data.dialect == Dialect::Lmtp {
                for outcome in &result.outcomes {
                    match outcome {
                        crate::injection::RecipientOutcome::Accepted => {
                            batch.push(Reply::ok("delivered"));
                        }
                        crate::injection::RecipientOutcome::Rejected(reason) => {
                            had_error = true;
                            batch.push(Reply::new(550, "5.1.1", reason.clone()));
                        }
                    }
                }
            } else {
                let first_rejection = result.outcomes.iter().find_map(|o| match o {
                    crate::injection::RecipientOutcome::Rejected(reason) => Some(reason.clone()),
                    crate::injection::RecipientOutcome::Accepted => None,
                });
                match first_rejection {
                    Some(reason) => {
                        had_error = true;
                        batch.push(Reply::new(551, "5.7.1", reason));
                    }
                    None => batch.push(Reply::ok("message accepted for delivery")),
                }
            }

            crate::copy_sink::maybe_write_copy(
                session.core.config.message_copy,
                session.core.config.message_copy_directory.as_deref(),
                crate::copy_sink::CopyRequest {
                    transaction_id: session.data.transaction_id,
                    from: &from,
                    to: &to,
                    error: if had_error { Some("one or more recipients rejected") } else { None },
                    raw: &result.raw,
                },
            )
            .await;
            batch
        }
    };

    session.data.reset_transaction();
    session.mode = InputMode::Command;
    Outcome::Reply(batch)
}

/// Dispatches one fully-read command line. `Outcome::EnterData`/
/// `Outcome::EnterChunk`/`Outcome::EnterSasl` tell the connection loop to
/// switch `session.mode` and read the associated payload before coming back
/// for the next command line.
pub async fn dispatch<T>(session: &mut Session<T>, line: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    if line.len() > 998 {
        return Outcome::Quit(ReplyBatch::single(Reply::from_error(
            &MailError::OversizeLine,
            false,
        )));
    }

    let (verb, rest) = split_verb(line);
    match verb.as_str() {
        "EHLO" | "LHLO" | "HELO" => handle_hello(session, rest),
        "MAIL" => handle_mail(session, rest),
        "RCPT" => handle_rcpt(session, rest).await,
        "DATA" => {
            if !session.data.dialect.accepts_data() {
                return err_reply(
                    MailError::ProtocolSequence("DATA not valid in this dialect".to_string()),
                    false,
                );
            }
            if session.data.mail_from.is_none() || session.data.rcpt_to.is_empty() {
                return err_reply(
                    MailError::ProtocolSequence("no valid recipients".to_string()),
                    false,
                );
            }
            session.mode = InputMode::Data;
            Outcome::EnterData(ReplyBatch::single(Reply::new(
                354,
                "",
                "start mail input; end with <CRLF>.<CRLF>",
            )))
        }
        "BDAT" => match parse_bdat(rest) {
            Some((size, last)) => {
                session.mode = InputMode::Chunk;
                session.chunk_remaining = size;
                session.chunk_last = last;
                Outcome::EnterChunk { size, last }
            }
            None => err_reply(
                MailError::ProtocolSyntax("malformed BDAT".to_string()),
                false,
            ),
        },
        "BURL" => {
            let mut parts = rest.split_whitespace();
            let Some(url_str) = parts.next() else {
                return err_reply(
                    MailError::ProtocolSyntax("missing URL".to_string()),
                    false,
                );
            };
            let last = matches!(parts.next(), Some(tok) if tok.eq_ignore_ascii_case("LAST"));

            let url = match store::ImapUrl::parse(url_str) {
                Ok(url) => url,
                Err(e) => return err_reply(e, false),
            };
            let fetched = session
                .core
                .url_fetcher
                .fetch(
                    &url,
                    session.data.authenticated_as.as_deref(),
                    session.core.url_auth.as_ref(),
                )
                .await;
            match fetched {
                Ok(bytes) => {
                    session.data.body.extend_from_slice(&bytes);
                    if last {
                        finalize_transaction(session).await
                    } else {
                        reply(250, "2.0.0", "burl accepted")
                    }
                }
                Err(e) => err_reply(e, false),
            }
        }
        "RSET" => handle_rset(session),
        "NOOP" => reply(250, "2.0.0", "ok"),
        "VRFY" | "EXPN" => reply(252, "2.1.5", "cannot verify, but will attempt delivery"),
        "HELP" => reply(214, "2.0.0", "see the documentation"),
        "STARTTLS" => reply(454, "4.7.0", "TLS negotiation is not available"),
        "AUTH" => {
            let (mechanism, arg) = split_verb(rest);
            if !session.data.dialect.offers_auth() {
                return err_reply(
                    MailError::ProtocolSequence("AUTH not offered on this dialect".to_string()),
                    false,
                );
            }
            if !mechanism.eq_ignore_ascii_case("PLAIN") {
                return reply(504, "5.5.4", "unrecognized authentication mechanism");
            }
            if arg.is_empty() {
                session.mode = InputMode::Sasl;
                return Outcome::EnterSasl(ReplyBatch::single(Reply::new(334, "", "")));
            }
            match decode_auth_plain(arg) {
                Some((login, secret)) => finish_auth_plain(session, &login, &secret).await,
                None => reply(501, "5.5.2", "malformed initial response"),
            }
        }
        "QUIT" => Outcome::Quit(ReplyBatch::single(Reply::new(
            221,
            "2.0.0",
            format!("{} closing connection", session.core.config.hostname),
        ))),
        _ => reply(500, "5.5.1", "unrecognized command"),
    }
}

/// Continuation handler for a `334` SASL challenge issued by a bare
/// `AUTH PLAIN` (no initial response).
pub async fn finish_sasl_plain<T>(session: &mut Session<T>, line: &str) -> Outcome
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    session.mode = InputMode::Command;
    match decode_auth_plain(line.trim_end_matches(['\r', '\n'])) {
        Some((login, secret)) => finish_auth_plain(session, &login, &secret).await,
        None => reply(501, "5.5.2", "malformed SASL response"),
    }
}

/// Undoes DATA dot-stuffing in place: a line consisting solely of `"."`
/// terminates the body and is not part of it; any other line beginning
/// with `"."` has that first octet stripped (spec §4.1).
pub fn unstuff_dot(body: &mut Vec<u8>, line: &[u8]) -> bool {
    if line == b"." {
        return true;
    }
    if let Some(rest) = line.strip_prefix(b".") {
        body.extend_from_slice(rest);
    } else {
        body.extend_from_slice(line);
    }
    body.extend_from_slice(b"\r\n");
    false
}
