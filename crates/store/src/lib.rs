//! The relational mail store: schema, connection pool, mailbox registry,
//! address cache, transactional injector, and IMAP URL resolution
//! (spec §4.4–§4.7, §6).

pub mod address_cache;
pub mod injector;
pub mod mailbox;
pub mod pool;
pub mod schema;
pub mod url;

pub use address_cache::{AddressCache, SharedAddressCache};
pub use injector::{DeliveryRequest, Injectee, Injector};
pub use mailbox::{Mailbox, MailboxKind, MailboxRegistry, MatchResult};
pub use pool::Pool;
pub use url::{ImapUrl, UrlAccess, UrlAuthVerifier, UrlFetcher};
