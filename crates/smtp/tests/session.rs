//! End-to-end session scenarios (spec §8 "End-to-end scenarios" 1-6),
//! driven entirely in-process over a `tokio::io::duplex` pipe against a
//! real Postgres instance, mirroring how the teacher's own SQL-backed
//! lookup tests assume a reachable backing store. Each test reads
//! `DATABASE_URL` and is skipped (not failed) when it is unset or
//! unreachable, so `cargo test` stays usable without a database nearby;
//! CI is expected to point `DATABASE_URL` at a disposable, freshly
//! migrated database per run — these tests insert fixture rows without
//! cleaning them up first, so rerunning against a database that already
//! has the same fixture data will hit unique-constraint violations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use common::ids::{MailboxId, UserId};
use common::Config;
use directory::{Directory, SqlDirectory};
use smtp::urlauth::InMemoryUrlAuthStore;
use smtp::{Dialect, ServerCore, Session};
use store::{AddressCache, Injector, Mailbox, MailboxKind, MailboxRegistry, Pool, UrlFetcher};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

struct TestEnv {
    core: Arc<ServerCore>,
    pool: Pool,
    url_auth: Arc<InMemoryUrlAuthStore>,
}

/// Connects to `DATABASE_URL` and assembles a real `ServerCore`. Returns
/// `None` (never panics) when no reachable database is configured, so
/// these tests degrade to a no-op outside an environment set up for them.
async fn try_setup() -> Option<TestEnv> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let mut config = Config::default();
    config.hostname = "mx.test.example".to_string();
    config.database.url = url;
    let config = Arc::new(config);

    let pool = Pool::connect(&config).ok()?;
    if pool.migrate().await.is_err() {
        return None;
    }

    let registry = Arc::new(MailboxRegistry::new());
    let address_cache = Arc::new(AddressCache::new());
    let injector = Injector::new(pool.clone(), registry.clone(), address_cache.clone());
    let url_fetcher = UrlFetcher::new(pool.clone(), registry.clone());
    let directory: Arc<dyn Directory> = Arc::new(SqlDirectory::new(
        pool.clone(),
        config.use_subaddressing,
        config.address_separator.clone(),
    ));
    let url_auth = Arc::new(InMemoryUrlAuthStore::new());

    let core = Arc::new(ServerCore {
        config,
        pool: pool.clone(),
        registry,
        address_cache,
        injector,
        directory,
        url_fetcher,
        url_auth: url_auth.clone(),
    });

    Some(TestEnv {
        core,
        pool,
        url_auth,
    })
}

/// Inserts a user, their INBOX, the `address` alias pointing at it, and
/// (optionally) an active Sieve script, then reflects the mailbox into
/// the shared in-memory registry the way `main.rs`'s startup load does.
/// `login`/`address` must be unique across the whole fixture set — no
/// cleanup runs first (see the module doc comment).
async fn seed_recipient(
    env: &TestEnv,
    login: &str,
    address: &str,
    script: Option<&str>,
) -> (MailboxId, UserId) {
    let client = env.pool.get().await.expect("pool connection");

    let owner: i64 = client
        .query_one(
            "INSERT INTO users (login, secret) VALUES ($1, '') RETURNING id",
            &[&login],
        )
        .await
        .expect("insert user")
        .get(0);

    let mailbox_row: i64 = client
        .query_one(
            "INSERT INTO mailboxes (name, owner) VALUES ('INBOX', $1) RETURNING id",
            &[&owner],
        )
        .await
        .expect("insert mailbox")
        .get(0);

    client
        .execute(
            "INSERT INTO aliases (address, mailbox) VALUES ($1, $2)",
            &[&address, &mailbox_row],
        )
        .await
        .expect("insert alias");

    if let Some(script) = script {
        client
            .execute(
                "INSERT INTO scripts (owner, name, active, script) VALUES ($1, 'main', true, $2)",
                &[&owner, &script],
            )
            .await
            .expect("insert script");
    }

    let mailbox = MailboxId::new(mailbox_row as u32).expect("nonzero mailbox id");
    let user = UserId::new(owner as u32).expect("nonzero user id");
    env.core.registry.insert(Mailbox {
        id: mailbox,
        name: "INBOX".to_string(),
        owner: Some(user),
        parent: None,
        kind: MailboxKind::Ordinary,
        uidvalidity: 1,
        uidnext: 1,
        next_modseq: 1,
    });
    (mailbox, user)
}

/// Adds a named child mailbox (e.g. `INBOX/Junk`) for an already-seeded
/// owner, registered the same way `seed_recipient`'s INBOX is.
async fn seed_child_mailbox(env: &TestEnv, owner: UserId, parent: MailboxId, name: &str) -> MailboxId {
    let client = env.pool.get().await.expect("pool connection");
    let id: i64 = client
        .query_one(
            "INSERT INTO mailboxes (name, owner, parent) VALUES ($1, $2, $3) RETURNING id",
            &[&name, &(owner.get() as i64), &(parent.get() as i64)],
        )
        .await
        .expect("insert child mailbox")
        .get(0);
    let mailbox = MailboxId::new(id as u32).expect("nonzero mailbox id");
    env.core.registry.insert(Mailbox {
        id: mailbox,
        name: name.to_string(),
        owner: Some(owner),
        parent: Some(parent),
        kind: MailboxKind::Ordinary,
        uidvalidity: 1,
        uidnext: 1,
        next_modseq: 1,
    });
    mailbox
}

fn next_transaction_id() -> u64 {
    NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Drives one `Session` over an in-memory duplex pipe — the teacher's own
/// `TestSession` pattern without a real socket, since `Session<T>` only
/// needs `AsyncRead + AsyncWrite + Unpin`.
struct TestSession {
    peer: DuplexStream,
}

impl TestSession {
    fn spawn(core: Arc<ServerCore>, dialect: Dialect) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::new(server, core, dialect, next_transaction_id());
        tokio::spawn(async move {
            let _ = smtp::run_session(session).await;
        });
        TestSession { peer: client }
    }

    async fn read_line(&mut self) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.peer
                .read_exact(&mut byte)
                .await
                .expect("peer closed before a full line arrived");
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n") {
                break;
            }
        }
        String::from_utf8(buf).expect("reply is not utf8")
    }

    /// Reads one complete (possibly multi-line) reply: `code-` continues,
    /// `code ` (space) marks the final line.
    async fn read_reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let ended = line.as_bytes().get(3) == Some(&b' ');
            lines.push(line);
            if ended {
                break;
            }
        }
        lines
    }

    async fn greeting(&mut self) -> Vec<String> {
        self.read_reply().await
    }

    /// Reads exactly `n` independent reply lines. Needed for LMTP's DATA
    /// finalization, which answers once per RCPT with `n` single-line
    /// replies that each end in a space separator (see `ReplyBatch::render`)
    /// — nothing in the wire bytes distinguishes "last line of this reply"
    /// from "last reply of the batch", so the count has to come from the
    /// caller, exactly as a real LMTP client tracks its own RCPT count.
    async fn read_n_replies(&mut self, n: usize) -> Vec<String> {
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            lines.push(self.read_line().await);
        }
        lines
    }

    async fn cmd(&mut self, line: &str) -> Vec<String> {
        self.peer.write_all(line.as_bytes()).await.unwrap();
        self.peer.write_all(b"\r\n").await.unwrap();
        self.read_reply().await
    }

    async fn raw(&mut self, bytes: &[u8]) {
        self.peer.write_all(bytes).await.unwrap();
    }
}

fn assert_code(lines: &[String], code: u16) {
    let got: u16 = lines[0]
        .get(0..3)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("reply has no 3-digit code: {lines:?}"));
    assert_eq!(got, code, "unexpected reply: {lines:?}");
}

#[tokio::test]
async fn simple_delivery_lands_one_row_in_the_recipients_inbox() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let (mailbox, _owner) = seed_recipient(&env, "bob-scenario1", "bob1@ex.test", None).await;

    let mut sess = TestSession::spawn(env.core.clone(), Dialect::Smtp);
    assert_code(&sess.greeting().await, 220);
    assert_code(&sess.cmd("EHLO client.example").await, 250);
    assert_code(&sess.cmd("MAIL FROM:<s@ex.test>").await, 250);
    assert_code(&sess.cmd("RCPT TO:<bob1@ex.test>").await, 250);
    assert_code(&sess.cmd("DATA").await, 354);
    assert_code(
        &sess
            .cmd("From: s@ex.test\r\nTo: bob1@ex.test\r\nSubject: x\r\n\r\nhi\r\n.")
            .await,
        250,
    );

    let client = env.pool.get().await.unwrap();
    let row = client
        .query_one(
            "SELECT uid, modseq FROM mailbox_messages WHERE mailbox = $1",
            &[&(mailbox.get() as i64)],
        )
        .await
        .expect("exactly one row landed in the recipient's inbox");
    let uid: i64 = row.get(0);
    assert_eq!(uid, 1);
}

#[tokio::test]
async fn sieve_fileinto_routes_into_the_named_mailbox_not_the_inbox() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let script = r#"require ["fileinto"];
if header :contains "Subject" "spam" {
    fileinto "INBOX/Junk";
    stop;
}"#;
    let (inbox, owner) =
        seed_recipient(&env, "bob-scenario2", "bob2@ex.test", Some(script)).await;
    let junk = seed_child_mailbox(&env, owner, inbox, "INBOX/Junk").await;

    let mut sess = TestSession::spawn(env.core.clone(), Dialect::Smtp);
    sess.greeting().await;
    sess.cmd("EHLO client.example").await;
    sess.cmd("MAIL FROM:<s@ex.test>").await;
    assert_code(&sess.cmd("RCPT TO:<bob2@ex.test>").await, 250);
    sess.cmd("DATA").await;
    assert_code(
        &sess
            .cmd("From: s@ex.test\r\nTo: bob2@ex.test\r\nSubject: spam alert\r\n\r\nhi\r\n.")
            .await,
        250,
    );

    let client = env.pool.get().await.unwrap();
    let junk_rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(junk.get() as i64)],
        )
        .await
        .unwrap();
    assert_eq!(junk_rows.len(), 1);
    let inbox_rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(inbox.get() as i64)],
        )
        .await
        .unwrap();
    assert!(inbox_rows.is_empty(), "stop after fileinto must cancel the implicit keep");
}

#[tokio::test]
async fn lmtp_multi_recipient_split_writes_one_row_for_the_surviving_recipient() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let (discarder_inbox, _) =
        seed_recipient(&env, "carol-scenario3", "carol3@ex.test", Some("discard;")).await;
    let (keeper_inbox, _) = seed_recipient(&env, "dave-scenario3", "dave3@ex.test", None).await;

    let mut sess = TestSession::spawn(env.core.clone(), Dialect::Lmtp);
    sess.greeting().await;
    sess.cmd("LHLO client.example").await;
    sess.cmd("MAIL FROM:<s@ex.test>").await;
    assert_code(&sess.cmd("RCPT TO:<carol3@ex.test>").await, 250);
    assert_code(&sess.cmd("RCPT TO:<dave3@ex.test>").await, 250);
    sess.cmd("DATA").await;
    sess.raw(b"From: s@ex.test\r\nTo: carol3@ex.test\r\nSubject: x\r\n\r\nhi\r\n.\r\n")
        .await;
    let reply = sess.read_n_replies(2).await;
    assert_eq!(reply.len(), 2, "LMTP answers once per RCPT");
    assert_code(&reply[0..1], 250);
    assert_code(&reply[1..2], 250);

    let client = env.pool.get().await.unwrap();
    let discarder_rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(discarder_inbox.get() as i64)],
        )
        .await
        .unwrap();
    assert!(discarder_rows.is_empty());
    let keeper_rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(keeper_inbox.get() as i64)],
        )
        .await
        .unwrap();
    assert_eq!(keeper_rows.len(), 1);
}

#[tokio::test]
async fn burl_last_appends_fetched_octets_and_finalizes_in_one_injection() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let (_alice_inbox, _alice_owner) =
        seed_recipient(&env, "alice-scenario4", "alice4@ex.test", None).await;
    let (bob_inbox, _) = seed_recipient(&env, "bob-scenario4", "bob4@ex.test", None).await;

    // A stand-alone "Drafts" mailbox with no owner, holding the body the
    // BURL fetch pulls in, matching `UrlFetcher::fetch`'s unqualified
    // `registry.by_name(None, &url.mailbox)` lookup.
    let client = env.pool.get().await.unwrap();
    client
        .execute(
            "UPDATE users SET secret = $1 WHERE login = 'alice-scenario4'",
            &[&blake3::hash(b"hunter2").to_hex().to_string()],
        )
        .await
        .unwrap();
    let drafts_id: i64 = client
        .query_one(
            "INSERT INTO mailboxes (name, owner) VALUES ('Drafts', 0) RETURNING id",
            &[],
        )
        .await
        .unwrap()
        .get(0);
    let drafts_mailbox = MailboxId::new(drafts_id as u32).unwrap();
    env.core.registry.insert(Mailbox {
        id: drafts_mailbox,
        name: "Drafts".to_string(),
        owner: None,
        parent: None,
        kind: MailboxKind::Ordinary,
        uidvalidity: 7,
        uidnext: 1,
        next_modseq: 1,
    });

    let drafted_body = b"hello from drafts\r\n".to_vec();
    let fingerprint = blake3::hash(&drafted_body);
    let message_id: i64 = client
        .query_one(
            "INSERT INTO messages (fingerprint, rfc822_size, internal_date) \
             VALUES ($1, $2, 0) RETURNING id",
            &[&fingerprint.as_bytes().as_slice(), &(drafted_body.len() as i64)],
        )
        .await
        .unwrap()
        .get(0);
    let bodypart_id: i64 = client
        .query_one(
            "INSERT INTO bodyparts (fingerprint, content_type, is_text, bytes) \
             VALUES ($1, 'text/plain', true, $2) RETURNING id",
            &[&fingerprint.as_bytes().as_slice(), &drafted_body],
        )
        .await
        .unwrap()
        .get(0);
    client
        .execute(
            "INSERT INTO message_parts (message, part, bodypart) VALUES ($1, '1', $2)",
            &[&message_id, &bodypart_id],
        )
        .await
        .unwrap();
    client
        .execute(
            "INSERT INTO mailbox_messages (mailbox, uid, modseq, message) VALUES ($1, 12, 1, $2)",
            &[&drafts_id, &message_id],
        )
        .await
        .unwrap();
    env.url_auth.issue(drafts_mailbox, "internal", "tok123");

    let mut sess = TestSession::spawn(env.core.clone(), Dialect::Submit);
    sess.greeting().await;
    sess.cmd("EHLO client.example").await;
    let initial = base64::engine::general_purpose::STANDARD.encode(b"\0alice-scenario4\0hunter2");
    assert_code(&sess.cmd(&format!("AUTH PLAIN {initial}")).await, 235);
    assert_code(&sess.cmd("MAIL FROM:<alice4@ex.test>").await, 250);
    assert_code(&sess.cmd("RCPT TO:<bob4@ex.test>").await, 250);

    let headers = b"From: alice4@ex.test\r\nTo: bob4@ex.test\r\nSubject: via burl\r\n\r\n".to_vec();
    // BDAT's payload is read as exactly `size` raw octets once the command
    // line is seen, so the line and the chunk are written before any reply
    // is read back (unlike `cmd`, which assumes one reply per line sent).
    sess.raw(format!("BDAT {}\r\n", headers.len()).as_bytes())
        .await;
    sess.raw(&headers).await;
    let reply = sess.read_reply().await;
    assert_code(&reply, 250);

    let url = "imap://alice-scenario4@h/Drafts;UIDVALIDITY=7/;UID=12;URLAUTH=user+alice-scenario4:internal:tok123";
    assert_code(&sess.cmd(&format!("BURL {url} LAST")).await, 250);

    let rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(bob_inbox.get() as i64)],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "the combined BDAT+BURL body injects exactly once");
}

#[tokio::test]
async fn unparsable_body_is_wrapped_and_still_accepted() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let (inbox, _) = seed_recipient(&env, "erin-scenario5", "erin5@ex.test", None).await;

    let mut sess = TestSession::spawn(env.core.clone(), Dialect::Smtp);
    sess.greeting().await;
    sess.cmd("EHLO client.example").await;
    sess.cmd("MAIL FROM:<s@ex.test>").await;
    assert_code(&sess.cmd("RCPT TO:<erin5@ex.test>").await, 250);
    sess.cmd("DATA").await;
    // No header/body separator at all — mail-parser cannot build a tree.
    assert_code(&sess.cmd("this is not a message, just bare text\r\n.").await, 250);

    let client = env.pool.get().await.unwrap();
    let rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1",
            &[&(inbox.get() as i64)],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "the wrapped message still lands in the inbox");
}

#[tokio::test]
async fn concurrent_injections_into_one_mailbox_never_reuse_a_uid() {
    let Some(env) = try_setup().await else {
        eprintln!("skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let (inbox, _) = seed_recipient(&env, "frank-scenario6", "frank6@ex.test", None).await;

    let run_batch = |core: Arc<ServerCore>, tag: &'static str| {
        let inbox = inbox;
        async move {
            for i in 0..3 {
                let mut sess = TestSession::spawn(core.clone(), Dialect::Smtp);
                sess.greeting().await;
                sess.cmd("EHLO client.example").await;
                sess.cmd(&format!("MAIL FROM:<{tag}{i}@ex.test>")).await;
                sess.cmd("RCPT TO:<frank6@ex.test>").await;
                sess.cmd("DATA").await;
                sess.cmd(&format!(
                    "From: {tag}{i}@ex.test\r\nTo: frank6@ex.test\r\nSubject: {tag}{i}\r\n\r\nhi\r\n."
                ))
                .await;
            }
            let _ = inbox;
        }
    };

    let a = tokio::spawn(run_batch(env.core.clone(), "a"));
    let b = tokio::spawn(run_batch(env.core.clone(), "b"));
    let _ = tokio::join!(a, b);

    let client = env.pool.get().await.unwrap();
    let rows = client
        .query(
            "SELECT uid FROM mailbox_messages WHERE mailbox = $1 ORDER BY uid",
            &[&(inbox.get() as i64)],
        )
        .await
        .unwrap();
    let uids: Vec<i64> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(uids.len(), 6, "all six messages from both sessions committed");
    let mut sorted = uids.clone();
    sorted.dedup();
    assert_eq!(sorted.len(), uids.len(), "no uid was reused across the two concurrent sessions");
}
