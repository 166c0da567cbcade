//! Response composition (spec §4.9): a command accumulates zero or more
//! reply lines, each carrying a 3-digit code and an enhanced status, and
//! they are written together only once the command finalizes.

use common::error::MailError;

#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    pub enhanced: String,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, enhanced: impl Into<String>, text: impl Into<String>) -> Self {
        Reply {
            code,
            enhanced: enhanced.into(),
            text: text.into(),
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Reply::new(250, "2.0.0", text)
    }

    pub fn from_error(err: &MailError, soft_bounce: bool) -> Self {
        Reply::new(
            err.code(soft_bounce),
            err.enhanced_status(soft_bounce),
            err.to_string(),
        )
    }
}

/// The full set of lines a single command emits. LMTP's DATA command is the
/// only case with more than one line per spec §4.9 (one per RCPT); every
/// other command produces exactly one.
#[derive(Debug, Clone, Default)]
pub struct ReplyBatch {
    pub lines: Vec<Reply>,
}

impl ReplyBatch {
    pub fn single(reply: Reply) -> Self {
        ReplyBatch { lines: vec![reply] }
    }

    pub fn push(&mut self, reply: Reply) {
        self.lines.push(reply);
    }

    /// Renders the batch as wire octets. Each `Reply` is a complete,
    /// independent response (LMTP's one-line-per-RCPT batching produces
    /// several in one `ReplyBatch`); within one `Reply`'s own multi-line
    /// text, `<code>-` continues and `<code> ` marks its last line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for reply in &self.lines {
            let text_lines: Vec<&str> = reply.text.split('\n').collect();
            for (j, line) in text_lines.iter().enumerate() {
                let sep = if j + 1 == text_lines.len() { ' ' } else { '-' };
                // Continuation lines inside a multi-line EHLO-style reply
                // advertise bare capability keywords, not an enhanced
                // status — only the first line (and single-line replies)
                // carry one, and only when `enhanced` is non-empty.
                if j == 0 && !reply.enhanced.is_empty() {
                    out.push_str(&format!(
                        "{}{}{} {}\r\n",
                        reply.code, sep, reply.enhanced, line
                    ));
                } else {
                    out.push_str(&format!("{}{}{}\r\n", reply.code, sep, line));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reply_renders_one_line() {
        let batch = ReplyBatch::single(Reply::ok("queued"));
        assert_eq!(batch.render(), "250 2.0.0 queued\r\n");
    }

    #[test]
    fn multiple_replies_use_final_line_space_separator() {
        let mut batch = ReplyBatch::default();
        batch.push(Reply::ok("jane@foobar.org"));
        batch.push(Reply::new(550, "5.1.1", "no such user"));
        let rendered = batch.render();
        assert_eq!(
            rendered,
            "250 2.0.0 jane@foobar.org\r\n550 5.1.1 no such user\r\n"
        );
    }
}
