//! Session state shared by every dialect (spec §4.1), grounded on the
//! teacher's `Session`/`SessionData`/`State` split in its own (now removed)
//! `core/mod.rs` — kept here as one module since this crate no longer needs
//! the teacher's queue/report/resolver machinery alongside it.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};

use common::error::MailResult;
use common::Config;
use directory::{Directory, RecipientLookup};
use message::Address;
use store::{Injector, MailboxRegistry, Pool, SharedAddressCache, UrlAuthVerifier, UrlFetcher};

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Smtp,
    Lmtp,
    Submit,
}

impl Dialect {
    /// LMTP advertises no AUTH and answers `LHLO` instead of `EHLO` (spec
    /// §4.1).
    pub fn offers_auth(self) -> bool {
        !matches!(self, Dialect::Lmtp)
    }

    pub fn hello_keyword(self) -> &'static str {
        match self {
            Dialect::Lmtp => "LHLO",
            Dialect::Smtp | Dialect::Submit => "EHLO",
        }
    }

    pub fn greeting_protocol(self) -> &'static str {
        match self {
            Dialect::Lmtp => "LMTP",
            Dialect::Smtp | Dialect::Submit => "ESMTP",
        }
    }

    /// Whether `DATA` is a valid command — `false` for none of our dialects
    /// today, but BDAT/BURL are additionally accepted in all three per §6.
    pub fn accepts_data(self) -> bool {
        matches!(self, Dialect::Smtp | Dialect::Lmtp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Command,
    Data,
    Chunk,
    Sasl,
}

/// Process-wide handles a session needs, assembled once at startup and
/// cloned (cheaply, via `Arc`) into every accepted connection.
pub struct ServerCore {
    pub config: Arc<Config>,
    pub pool: Pool,
    pub registry: Arc<MailboxRegistry>,
    pub address_cache: SharedAddressCache,
    pub injector: Injector,
    pub directory: Arc<dyn Directory>,
    pub url_fetcher: UrlFetcher,
    pub url_auth: Arc<dyn UrlAuthVerifier>,
}

pub enum RcptTarget {
    Local(RecipientLookup),
    /// Accepted for onward delivery — only reachable in the Submit dialect
    /// (spec §4.1 RCPT TO contract).
    Remote,
}

pub struct RcptEntry {
    pub address: Address,
    pub target: RcptTarget,
}

pub struct SessionData {
    pub dialect: Dialect,
    pub transaction_id: u64,
    pub helo_domain: String,
    pub mail_from: Option<Address>,
    pub rcpt_to: Vec<RcptEntry>,
    pub rcpt_errors: usize,
    pub body: Vec<u8>,
    pub authenticated_as: Option<String>,
    pub permitted_senders: Vec<Address>,
    pub auth_errors: usize,
    pub valid_until: Instant,
}

impl SessionData {
    pub fn new(dialect: Dialect, transaction_id: u64, timeout: std::time::Duration) -> Self {
        SessionData {
            dialect,
            transaction_id,
            helo_domain: String::new(),
            mail_from: None,
            rcpt_to: Vec::new(),
            rcpt_errors: 0,
            body: Vec::new(),
            authenticated_as: None,
            permitted_senders: Vec::new(),
            auth_errors: 0,
            valid_until: Instant::now() + timeout,
        }
    }

    /// `RSET` and the start of a new transaction after a completed `DATA`/
    /// `BDAT LAST` both clear envelope and body state (spec §4.1).
    pub fn reset_transaction(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        self.rcpt_errors = 0;
        self.body.clear();
    }
}

pub struct Session<T> {
    pub stream: tokio::io::BufStream<T>,
    pub core: Arc<ServerCore>,
    pub data: SessionData,
    pub mode: InputMode,
    pub pipeline: Pipeline,
    pub chunk_remaining: usize,
    pub chunk_last: bool,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, core: Arc<ServerCore>, dialect: Dialect, transaction_id: u64) -> Self {
        let timeout = core.config.timeouts.command();
        Session {
            stream: tokio::io::BufStream::new(stream),
            core,
            data: SessionData::new(dialect, transaction_id, timeout),
            mode: InputMode::Command,
            pipeline: Pipeline::new(),
            chunk_remaining: 0,
            chunk_last: false,
        }
    }
}

/// Applies the permitted-sender set derived at AUTH success (spec §4.1:
/// "the user's registered addresses plus any aliases bound to the user's
/// home mailbox").
pub async fn permitted_senders_for(
    directory: &dyn Directory,
    login: &str,
) -> MailResult<Vec<Address>> {
    directory.permitted_senders(login).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmtp_does_not_offer_auth_or_ehlo() {
        assert!(!Dialect::Lmtp.offers_auth());
        assert_eq!(Dialect::Lmtp.hello_keyword(), "LHLO");
        assert_eq!(Dialect::Lmtp.greeting_protocol(), "LMTP");
    }

    #[test]
    fn smtp_and_submit_offer_auth_and_ehlo() {
        for dialect in [Dialect::Smtp, Dialect::Submit] {
            assert!(dialect.offers_auth());
            assert_eq!(dialect.hello_keyword(), "EHLO");
            assert_eq!(dialect.greeting_protocol(), "ESMTP");
        }
    }

    #[test]
    fn only_smtp_and_lmtp_accept_data() {
        assert!(Dialect::Smtp.accepts_data());
        assert!(Dialect::Lmtp.accepts_data());
        assert!(!Dialect::Submit.accepts_data());
    }

    #[test]
    fn reset_transaction_clears_envelope_and_body_but_not_auth() {
        let mut data = SessionData::new(Dialect::Smtp, 1, std::time::Duration::from_secs(300));
        data.mail_from = Some(Address::parse_bare("s@a"));
        data.body = b"hi".to_vec();
        data.authenticated_as = Some("alice".to_string());

        data.reset_transaction();

        assert!(data.mail_from.is_none());
        assert!(data.rcpt_to.is_empty());
        assert!(data.body.is_empty());
        assert_eq!(data.authenticated_as.as_deref(), Some("alice"));
    }
}
