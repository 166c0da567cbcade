//! Error taxonomy, one variant per row of spec §7.
//!
//! Each variant carries the SMTP reply code and enhanced status it surfaces
//! as, so a session only has to ask `err.code()` / `err.enhanced_status()`
//! instead of re-deriving the mapping at every call site.

use thiserror::Error;

pub type MailResult<T> = Result<T, MailError>;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("syntax error: {0}")]
    ProtocolSyntax(String),

    #[error("command out of sequence: {0}")]
    ProtocolSequence(String),

    #[error("line exceeds 998 octets")]
    OversizeLine,

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("URL resolution failed: {0}")]
    UrlResolution(String),

    #[error("sieve script does not parse: {0}")]
    SieveParse(String),

    #[error("sieve runtime failure: {0}")]
    SieveRuntime(String),

    #[error("injection transient failure after {attempts} attempts: {source}")]
    InjectionTransient {
        attempts: u32,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("injection permanent failure: {0}")]
    InjectionPermanent(String),

    #[error("message copy sink failure: {0}")]
    CopySink(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("mailbox name already in use: {0}")]
    MailboxNameInUse(String),

    #[error("declared message size {declared} exceeds the {max} octet limit")]
    MessageTooLarge { declared: usize, max: usize },
}

impl MailError {
    /// The 3-digit SMTP reply code this error surfaces as (spec §7).
    ///
    /// `soft_bounce` promotes permanent injection failures to transient,
    /// matching the `soft-bounce` config key in spec §6.
    pub fn code(&self, soft_bounce: bool) -> u16 {
        match self {
            MailError::ProtocolSyntax(_) => 500,
            MailError::ProtocolSequence(_) => 503,
            MailError::OversizeLine => 500,
            MailError::Permission(_) => 554,
            MailError::UrlResolution(_) => 554,
            MailError::SieveParse(_) => 451,
            MailError::SieveRuntime(_) => 550,
            MailError::InjectionTransient { .. } => 451,
            MailError::InjectionPermanent(_) => {
                if soft_bounce {
                    451
                } else {
                    551
                }
            }
            MailError::CopySink(_) => 250,
            MailError::Database(_) => 451,
            MailError::MailboxNameInUse(_) => 550,
            MailError::MessageTooLarge { .. } => 552,
        }
    }

    pub fn enhanced_status(&self, soft_bounce: bool) -> &'static str {
        match self {
            MailError::ProtocolSyntax(_) => "5.5.2",
            MailError::ProtocolSequence(_) => "5.5.1",
            MailError::OversizeLine => "5.5.2",
            MailError::Permission(_) => "5.7.0",
            MailError::UrlResolution(_) => "5.7.0",
            MailError::SieveParse(_) => "4.3.0",
            MailError::SieveRuntime(_) => "5.1.1",
            MailError::InjectionTransient { .. } => "4.6.0",
            MailError::InjectionPermanent(_) => {
                if soft_bounce {
                    "4.6.0"
                } else {
                    "5.6.0"
                }
            }
            MailError::CopySink(_) => "2.0.0",
            MailError::Database(_) => "4.3.0",
            MailError::MailboxNameInUse(_) => "5.1.1",
            MailError::MessageTooLarge { .. } => "5.3.4",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MailError::InjectionTransient { .. } | MailError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_bounce_promotes_permanent_to_transient() {
        let err = MailError::InjectionPermanent("unique violation".into());
        assert_eq!(err.code(false), 551);
        assert_eq!(err.code(true), 451);
        assert_eq!(err.enhanced_status(false), "5.6.0");
        assert_eq!(err.enhanced_status(true), "4.6.0");
    }

    #[test]
    fn oversize_line_is_500() {
        assert_eq!(MailError::OversizeLine.code(false), 500);
        assert_eq!(MailError::OversizeLine.enhanced_status(false), "5.5.2");
    }
}
