//! DDL for the persisted schema (spec §6). Applied once at startup by
//! [`crate::pool::Pool::migrate`]; kept as a single idempotent script rather
//! than a migration chain since the schema has no prior version to migrate
//! from.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    localpart TEXT NOT NULL,
    domain TEXT NOT NULL,
    UNIQUE (name, localpart, domain)
);

CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    login TEXT NOT NULL UNIQUE,
    home_mailbox BIGINT,
    secret TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS mailboxes (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    owner BIGINT NOT NULL DEFAULT 0,
    parent BIGINT,
    uidvalidity BIGINT NOT NULL DEFAULT 1,
    uidnext BIGINT NOT NULL DEFAULT 1,
    next_modseq BIGINT NOT NULL DEFAULT 1,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (owner, name)
);

CREATE TABLE IF NOT EXISTS bodyparts (
    id BIGSERIAL PRIMARY KEY,
    fingerprint BYTEA NOT NULL UNIQUE,
    content_type TEXT NOT NULL,
    is_text BOOLEAN NOT NULL,
    bytes BYTEA NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    fingerprint BYTEA NOT NULL UNIQUE,
    rfc822_size BIGINT NOT NULL,
    internal_date BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS mailbox_messages (
    mailbox BIGINT NOT NULL REFERENCES mailboxes(id),
    uid BIGINT NOT NULL,
    modseq BIGINT NOT NULL,
    message BIGINT NOT NULL REFERENCES messages(id),
    PRIMARY KEY (mailbox, uid)
);

CREATE TABLE IF NOT EXISTS header_fields (
    message BIGINT NOT NULL REFERENCES messages(id),
    part TEXT NOT NULL,
    position INTEGER NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_parts (
    message BIGINT NOT NULL REFERENCES messages(id),
    part TEXT NOT NULL,
    bodypart BIGINT NOT NULL REFERENCES bodyparts(id),
    PRIMARY KEY (message, part)
);

CREATE TABLE IF NOT EXISTS address_fields (
    message BIGINT NOT NULL REFERENCES messages(id),
    part TEXT NOT NULL,
    position INTEGER NOT NULL,
    field TEXT NOT NULL,
    address BIGINT NOT NULL REFERENCES addresses(id),
    number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS flags (
    mailbox BIGINT NOT NULL,
    uid BIGINT NOT NULL,
    flag TEXT NOT NULL,
    PRIMARY KEY (mailbox, uid, flag)
);

CREATE TABLE IF NOT EXISTS annotations (
    mailbox BIGINT NOT NULL,
    uid BIGINT NOT NULL,
    entry TEXT NOT NULL,
    owner BIGINT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (mailbox, uid, entry, owner)
);

CREATE TABLE IF NOT EXISTS aliases (
    address TEXT NOT NULL PRIMARY KEY,
    mailbox BIGINT NOT NULL REFERENCES mailboxes(id)
);

CREATE TABLE IF NOT EXISTS scripts (
    owner BIGINT NOT NULL,
    name TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT FALSE,
    script TEXT NOT NULL,
    PRIMARY KEY (owner, name)
);

CREATE TABLE IF NOT EXISTS deliveries (
    id BIGSERIAL PRIMARY KEY,
    message BIGINT NOT NULL REFERENCES messages(id),
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    queued_at BIGINT NOT NULL
);
"#;
