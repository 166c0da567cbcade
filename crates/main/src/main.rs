//! Process entrypoint: loads configuration, applies the schema, warms the
//! in-memory mailbox mirror, and accepts connections on each configured
//! listener (spec §4.1, §6).

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use common::error::{MailError, MailResult};
use common::Config;
use directory::{Directory, SqlDirectory};
use store::{AddressCache, Injector, Mailbox, MailboxKind, MailboxRegistry, Pool, UrlFetcher};

use smtp::urlauth::InMemoryUrlAuthStore;
use smtp::{Dialect, ServerCore, Session};

fn load_config() -> Config {
    let path = std::env::var("MAILCORE_CONFIG").unwrap_or_else(|_| "mailcore.toml".to_string());
    match std::fs::read_to_string(&path) {
        Ok(text) => match Config::parse(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to parse {path}: {e}, falling back to defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

/// Populates the shared mailbox mirror from the persisted table at startup
/// (spec §9: "no global mutable state" — the registry is built once here
/// and handed to every session as an `Arc`).
async fn load_mailbox_registry(pool: &Pool) -> MailResult<MailboxRegistry> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, owner, parent, uidvalidity, uidnext, next_modseq, deleted \
             FROM mailboxes",
            &[],
        )
        .await
        .map_err(|e| MailError::Database(e.to_string()))?;

    let registry = MailboxRegistry::new();
    for row in rows {
        let id: i64 = row.get(0);
        let name: String = row.get(1);
        let owner: i64 = row.get(2);
        let parent: Option<i64> = row.get(3);
        let uidvalidity: i64 = row.get(4);
        let uidnext: i64 = row.get(5);
        let next_modseq: i64 = row.get(6);
        let deleted: bool = row.get(7);

        registry.insert(Mailbox {
            id: common::ids::MailboxId::new(id as u32)
                .ok_or_else(|| MailError::Database("mailbox id 0".to_string()))?,
            name,
            owner: common::ids::UserId::new(owner as u32),
            parent: parent.and_then(|p| common::ids::MailboxId::new(p as u32)),
            kind: if deleted {
                MailboxKind::Deleted
            } else {
                MailboxKind::Ordinary
            },
            uidvalidity,
            uidnext,
            next_modseq,
        });
    }
    Ok(registry)
}

async fn accept_loop(
    listener: TcpListener,
    dialect: Dialect,
    core: Arc<ServerCore>,
    next_transaction_id: Arc<std::sync::atomic::AtomicU64>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let core = core.clone();
                let transaction_id =
                    next_transaction_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                info!(%peer, ?dialect, "accepted connection");
                tokio::spawn(async move {
                    let session = Session::new(socket, core, dialect, transaction_id);
                    if let Err(e) = smtp::run_session(session).await {
                        error!(%peer, error = %e, "session ended with I/O error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> MailResult<()> {
    common::telemetry::init();

    let config = Arc::new(load_config());
    let pool = Pool::connect(&config)?;
    pool.migrate().await?;

    let registry = Arc::new(load_mailbox_registry(&pool).await?);
    let address_cache = Arc::new(AddressCache::new());
    let injector = Injector::new(pool.clone(), registry.clone(), address_cache.clone());
    let url_fetcher = UrlFetcher::new(pool.clone(), registry.clone());
    let directory: Arc<dyn Directory> = Arc::new(SqlDirectory::new(
        pool.clone(),
        config.use_subaddressing,
        config.address_separator.clone(),
    ));

    let core = Arc::new(ServerCore {
        config: config.clone(),
        pool,
        registry,
        address_cache,
        injector,
        directory,
        url_fetcher,
        url_auth: Arc::new(InMemoryUrlAuthStore::new()),
    });

    let next_transaction_id = Arc::new(std::sync::atomic::AtomicU64::new(1));

    let mut listeners = Vec::new();

    let smtp_listener = TcpListener::bind(&config.listener.smtp_bind)
        .await
        .map_err(|e| MailError::Database(e.to_string()))?;
    info!(bind = %config.listener.smtp_bind, "SMTP listening");
    listeners.push(tokio::spawn(accept_loop(
        smtp_listener,
        Dialect::Smtp,
        core.clone(),
        next_transaction_id.clone(),
    )));

    if let Some(bind) = &config.listener.lmtp_bind {
        let lmtp_listener = TcpListener::bind(bind)
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        info!(%bind, "LMTP listening");
        listeners.push(tokio::spawn(accept_loop(
            lmtp_listener,
            Dialect::Lmtp,
            core.clone(),
            next_transaction_id.clone(),
        )));
    }

    if let Some(bind) = &config.listener.submission_bind {
        let submission_listener = TcpListener::bind(bind)
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        info!(%bind, "Submission listening");
        listeners.push(tokio::spawn(accept_loop(
            submission_listener,
            Dialect::Submit,
            core.clone(),
            next_transaction_id.clone(),
        )));
    }

    for handle in listeners {
        let _ = handle.await;
    }
    Ok(())
}
