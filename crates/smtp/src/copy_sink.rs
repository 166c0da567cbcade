//! Message-copy sink (spec §4.8): best-effort archival of accepted/failed
//! messages to a configured directory, keyed by transaction id.

use tokio::io::AsyncWriteExt;
use tracing::error;

use common::config::MessageCopyPolicy;

pub struct CopyRequest<'a> {
    pub transaction_id: u64,
    pub from: &'a str,
    pub to: &'a [String],
    pub error: Option<&'a str>,
    pub raw: &'a [u8],
}

/// Whether `policy` fires given whether this message was ultimately
/// delivered without error.
fn should_copy(policy: MessageCopyPolicy, had_error: bool) -> bool {
    match policy {
        MessageCopyPolicy::None => false,
        MessageCopyPolicy::All => true,
        MessageCopyPolicy::Delivered => !had_error,
        MessageCopyPolicy::Errors => had_error,
    }
}

/// Writes the copy file if `policy` says this outcome should be copied.
/// Failures are logged, never surfaced to the SMTP response (spec §4.8).
pub async fn maybe_write_copy(
    policy: MessageCopyPolicy,
    directory: Option<&std::path::Path>,
    request: CopyRequest<'_>,
) {
    if !should_copy(policy, request.error.is_some()) {
        return;
    }
    let Some(dir) = directory else {
        return;
    };

    let filename = format!("{}.eml", request.transaction_id);
    let path = dir.join(filename);

    if let Err(e) = write_copy_file(&path, &request).await {
        error!(error = %e, path = %path.display(), "message-copy sink failed to write");
    }
}

async fn write_copy_file(
    path: &std::path::Path,
    request: &CopyRequest<'_>,
) -> std::io::Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("From: {}\r\n", request.from).as_bytes());
    for to in request.to {
        out.extend_from_slice(format!("To: {to}\r\n").as_bytes());
    }
    if let Some(err) = request.error {
        out.extend_from_slice(format!("Error: {err}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(request.raw);

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(&out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_policy_skips_errored_messages() {
        assert!(!should_copy(MessageCopyPolicy::Delivered, true));
        assert!(should_copy(MessageCopyPolicy::Delivered, false));
    }

    #[test]
    fn errors_policy_skips_clean_messages() {
        assert!(should_copy(MessageCopyPolicy::Errors, true));
        assert!(!should_copy(MessageCopyPolicy::Errors, false));
    }

    #[test]
    fn all_policy_always_copies() {
        assert!(should_copy(MessageCopyPolicy::All, true));
        assert!(should_copy(MessageCopyPolicy::All, false));
    }
}
