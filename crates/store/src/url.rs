//! IMAP URL parsing and resolution for BURL (spec §4.7, §6 "IMAP URL
//! grammar"). Grounded on `original_source/imap/handlers/urlfetch.cpp`'s
//! per-URL failure model (one bad URL fails only that URL, not the whole
//! fetch batch — the caller decides whether to abort, which BURL does).

use async_trait::async_trait;

use common::error::{MailError, MailResult};
use common::ids::MailboxId;

use crate::mailbox::MailboxRegistry;
use crate::pool::Pool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlAccess {
    Anonymous,
    AuthUser,
    User(String),
    Submit(String),
}

#[derive(Debug, Clone)]
pub struct ImapUrl {
    pub user: Option<String>,
    pub host: String,
    pub mailbox: String,
    pub uidvalidity: u32,
    pub uid: u32,
    pub section: Option<String>,
    pub partial: Option<(u64, u64)>,
    pub access: UrlAccess,
    pub mechanism: String,
    pub token: String,
}

impl ImapUrl {
    /// Parses `imap://[<user>@]<host>/<mailbox>;UIDVALIDITY=<n>/;UID=<n>
    /// [/;SECTION=<s>][/;PARTIAL=<a.b>];URLAUTH=<access>:<mech>:<token>`
    /// (spec §6).
    pub fn parse(raw: &str) -> MailResult<Self> {
        let rest = raw
            .strip_prefix("imap://")
            .ok_or_else(|| MailError::UrlResolution("missing imap:// scheme".to_string()))?;

        let (authority_and_path, urlauth) = rest
            .split_once(";URLAUTH=")
            .ok_or_else(|| MailError::UrlResolution("missing URLAUTH clause".to_string()))?;
        let (access, mech_and_token) = urlauth
            .split_once(':')
            .ok_or_else(|| MailError::UrlResolution("malformed URLAUTH clause".to_string()))?;
        let (mechanism, token) = mech_and_token
            .split_once(':')
            .ok_or_else(|| MailError::UrlResolution("malformed URLAUTH clause".to_string()))?;
        let access = parse_access(access)?;

        let mut segments = authority_and_path.split('/');
        let authority = segments
            .next()
            .ok_or_else(|| MailError::UrlResolution("missing authority".to_string()))?;
        let (user, host) = match authority.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h.to_string()),
            None => (None, authority.to_string()),
        };

        let mailbox_and_uidvalidity = segments
            .next()
            .ok_or_else(|| MailError::UrlResolution("missing mailbox path".to_string()))?;
        let (mailbox, uidvalidity) = mailbox_and_uidvalidity
            .split_once(";UIDVALIDITY=")
            .ok_or_else(|| MailError::UrlResolution("missing UIDVALIDITY".to_string()))?;
        let uidvalidity: u32 = uidvalidity
            .parse()
            .map_err(|_| MailError::UrlResolution("non-numeric UIDVALIDITY".to_string()))?;

        let mut uid = None;
        let mut section = None;
        let mut partial = None;
        for segment in segments {
            if let Some(v) = segment.strip_prefix(";UID=") {
                uid = Some(
                    v.parse()
                        .map_err(|_| MailError::UrlResolution("non-numeric UID".to_string()))?,
                );
            } else if let Some(v) = segment.strip_prefix(";SECTION=") {
                section = Some(v.to_string());
            } else if let Some(v) = segment.strip_prefix(";PARTIAL=") {
                let (a, b) = v
                    .split_once('.')
                    .ok_or_else(|| MailError::UrlResolution("malformed PARTIAL".to_string()))?;
                partial = Some((
                    a.parse()
                        .map_err(|_| MailError::UrlResolution("non-numeric PARTIAL".to_string()))?,
                    b.parse()
                        .map_err(|_| MailError::UrlResolution("non-numeric PARTIAL".to_string()))?,
                ));
            }
        }
        let uid = uid.ok_or_else(|| MailError::UrlResolution("missing UID".to_string()))?;

        Ok(ImapUrl {
            user,
            host,
            mailbox: mailbox.to_string(),
            uidvalidity,
            uid,
            section,
            partial,
            access,
            mechanism: mechanism.to_string(),
            token: token.to_string(),
        })
    }
}

fn parse_access(raw: &str) -> MailResult<UrlAccess> {
    if raw == "anonymous" {
        Ok(UrlAccess::Anonymous)
    } else if raw == "authuser" {
        Ok(UrlAccess::AuthUser)
    } else if let Some(name) = raw.strip_prefix("user+") {
        Ok(UrlAccess::User(name.to_string()))
    } else if let Some(name) = raw.strip_prefix("submit+") {
        Ok(UrlAccess::Submit(name.to_string()))
    } else {
        Err(MailError::UrlResolution(format!(
            "unrecognized access token {raw:?}"
        )))
    }
}

/// Checks a URLAUTH verifier token against the per-mailbox key. The key
/// storage mechanism is intentionally abstracted behind this trait — see
/// DESIGN.md's Open Question decision on URLAUTH key persistence.
#[async_trait]
pub trait UrlAuthVerifier: Send + Sync {
    async fn verify(&self, mailbox: MailboxId, mechanism: &str, token: &str) -> bool;
}

/// Checks the access-control rule in spec §4.7 independent of the token
/// itself: who is allowed to dereference this URL at all.
pub fn access_permitted(access: &UrlAccess, authenticated_user: Option<&str>) -> bool {
    match access {
        UrlAccess::Anonymous => true,
        UrlAccess::AuthUser => authenticated_user.is_some(),
        UrlAccess::User(name) => authenticated_user == Some(name.as_str()),
        UrlAccess::Submit(name) => authenticated_user == Some(name.as_str()),
    }
}

pub struct UrlFetcher {
    pool: Pool,
    registry: std::sync::Arc<MailboxRegistry>,
}

impl UrlFetcher {
    pub fn new(pool: Pool, registry: std::sync::Arc<MailboxRegistry>) -> Self {
        UrlFetcher { pool, registry }
    }

    /// Resolves one URL to literal octets (spec §4.7). Each URL fails
    /// independently; batching and abort-on-first-failure is the caller's
    /// decision (BURL aborts, a hypothetical multi-URL FETCH need not).
    pub async fn fetch(
        &self,
        url: &ImapUrl,
        authenticated_user: Option<&str>,
        verifier: &dyn UrlAuthVerifier,
    ) -> MailResult<Vec<u8>> {
        if !access_permitted(&url.access, authenticated_user) {
            return Err(MailError::UrlResolution(format!(
                "access {:?} denied for {:?}",
                url.access, authenticated_user
            )));
        }

        let mailbox = self
            .registry
            .by_name(None, &url.mailbox)
            .ok_or_else(|| MailError::UrlResolution(format!("no such mailbox {}", url.mailbox)))?;

        if !verifier
            .verify(mailbox.id, &url.mechanism, &url.token)
            .await
        {
            return Err(MailError::UrlResolution(
                "URLAUTH verifier mismatch".to_string(),
            ));
        }

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT message FROM mailbox_messages WHERE mailbox = $1 AND uid = $2",
                &[&(mailbox.id.get() as i64), &(url.uid as i64)],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?
            .ok_or_else(|| MailError::UrlResolution("no such uid".to_string()))?;
        let message_id: i64 = row.get(0);

        let section = url.section.as_deref().unwrap_or("1");
        let row = client
            .query_opt(
                "SELECT b.bytes FROM message_parts p JOIN bodyparts b ON b.id = p.bodypart \
                 WHERE p.message = $1 AND p.part = $2",
                &[&message_id, &section],
            )
            .await
            .map_err(|e| MailError::Database(e.to_string()))?
            .ok_or_else(|| MailError::UrlResolution("no such section".to_string()))?;
        let bytes: Vec<u8> = row.get(0);

        Ok(match url.partial {
            Some((offset, len)) => {
                let start = (offset as usize).min(bytes.len());
                let end = (start + len as usize).min(bytes.len());
                bytes[start..end].to_vec()
            }
            None => bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_url() {
        let url = ImapUrl::parse(
            "imap://alice@h/Drafts;UIDVALIDITY=7/;UID=12;URLAUTH=user+alice:internal:tok123",
        )
        .unwrap();
        assert_eq!(url.user.as_deref(), Some("alice"));
        assert_eq!(url.host, "h");
        assert_eq!(url.mailbox, "Drafts");
        assert_eq!(url.uidvalidity, 7);
        assert_eq!(url.uid, 12);
        assert_eq!(url.access, UrlAccess::User("alice".to_string()));
        assert_eq!(url.mechanism, "internal");
        assert_eq!(url.token, "tok123");
    }

    #[test]
    fn parses_section_and_partial() {
        let url = ImapUrl::parse(
            "imap://h/Drafts;UIDVALIDITY=1/;UID=1/;SECTION=2/;PARTIAL=10.20;URLAUTH=anonymous:internal:tok",
        )
        .unwrap();
        assert_eq!(url.section.as_deref(), Some("2"));
        assert_eq!(url.partial, Some((10, 20)));
    }

    #[test]
    fn access_rule_matches_authenticated_login() {
        assert!(access_permitted(
            &UrlAccess::User("alice".to_string()),
            Some("alice")
        ));
        assert!(!access_permitted(
            &UrlAccess::User("alice".to_string()),
            Some("bob")
        ));
        assert!(access_permitted(&UrlAccess::Anonymous, None));
        assert!(!access_permitted(&UrlAccess::AuthUser, None));
    }
}
