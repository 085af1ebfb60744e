//! Advisory edit locks.
//!
//! Locks coordinate editing sessions between cooperating clients; they do
//! not gate writes. A lock whose `expires_at` has passed is treated as
//! absent everywhere and can be taken over by anyone.

use crate::core::error::{Conflict, RegistryError, Result};
use crate::core::names;
use crate::core::store::Store;
use crate::core::time;
use crate::registry::model::Lock;
use rusqlite::{Connection, OptionalExtension, params};

fn lock_row(conn: &Connection, key: &str) -> Result<Option<Lock>> {
    Ok(conn
        .query_row(
            "SELECT key, locked_by, locked_at, expires_at FROM ess_locks WHERE key = ?1",
            params![key],
            |row| {
                Ok(Lock {
                    key: row.get(0)?,
                    locked_by: row.get(1)?,
                    locked_at: row.get(2)?,
                    expires_at: row.get(3)?,
                })
            },
        )
        .optional()?)
}

fn live_lock(conn: &Connection, key: &str, now: i64) -> Result<Option<Lock>> {
    Ok(lock_row(conn, key)?.filter(|lock| !lock.is_expired(now)))
}

/// Take or refresh the lock on `key`.
pub fn acquire_lock(store: &Store, key: &str, locked_by: &str) -> Result<Lock> {
    acquire_lock_at(store, key, locked_by, time::now_epoch())
}

/// `acquire_lock` against an explicit clock reading.
///
/// The same owner re-acquiring keeps `locked_at` and extends `expires_at`.
/// A live lock held by anyone else fails with `Conflict::AlreadyLocked`
/// carrying the holder's lock, and is left untouched.
pub fn acquire_lock_at(store: &Store, key: &str, locked_by: &str, now: i64) -> Result<Lock> {
    names::require("key", key)?;
    names::require("lockedBy", locked_by)?;
    let ttl = store.lock_ttl_secs();

    let lock = store.broker().with_tx(locked_by, "lock.acquire", |conn| {
        let locked_at = match live_lock(conn, key, now)? {
            Some(existing) if existing.locked_by != locked_by => {
                tracing::info!(key, holder = %existing.locked_by, requester = locked_by, "lock held");
                return Err(RegistryError::Conflict(Conflict::AlreadyLocked(existing)));
            }
            Some(existing) => existing.locked_at,
            None => now,
        };

        let lock = Lock {
            key: key.to_string(),
            locked_by: locked_by.to_string(),
            locked_at,
            expires_at: now + ttl,
        };
        conn.execute(
            "INSERT INTO ess_locks (key, locked_by, locked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                locked_by = excluded.locked_by,
                locked_at = excluded.locked_at,
                expires_at = excluded.expires_at",
            params![lock.key, lock.locked_by, lock.locked_at, lock.expires_at],
        )?;
        Ok(lock)
    })?;

    tracing::info!(key, locked_by, expires_at = lock.expires_at, "lock acquired");
    Ok(lock)
}

/// Release a lock. Only the holder may release; a missing or expired lock
/// is `NotFound`, another holder is `Conflict::NotOwner`.
pub fn release_lock(store: &Store, key: &str, locked_by: &str) -> Result<()> {
    names::require("key", key)?;
    names::require("lockedBy", locked_by)?;
    let now = time::now_epoch();

    store.broker().with_tx(locked_by, "lock.release", |conn| {
        let existing = live_lock(conn, key, now)?
            .ok_or_else(|| RegistryError::NotFound(format!("lock {}", key)))?;
        if existing.locked_by != locked_by {
            return Err(RegistryError::Conflict(Conflict::NotOwner(existing)));
        }
        conn.execute("DELETE FROM ess_locks WHERE key = ?1", params![key])?;
        Ok(())
    })?;

    tracing::info!(key, locked_by, "lock released");
    Ok(())
}

pub fn get_lock(store: &Store, key: &str) -> Result<Option<Lock>> {
    let now = time::now_epoch();
    store.broker().with_conn(|conn| live_lock(conn, key, now))
}

/// All live locks ordered by key.
pub fn list_locks(store: &Store) -> Result<Vec<Lock>> {
    let now = time::now_epoch();
    store.broker().with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT key, locked_by, locked_at, expires_at FROM ess_locks
             WHERE expires_at > ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![now], |row| {
            Ok(Lock {
                key: row.get(0)?,
                locked_by: row.get(1)?,
                locked_at: row.get(2)?,
                expires_at: row.get(3)?,
            })
        })?;
        let mut locks = Vec::new();
        for r in rows {
            locks.push(r?);
        }
        Ok(locks)
    })
}

/// Delete expired lock rows; returns how many were removed.
pub fn purge_expired_locks(store: &Store) -> Result<usize> {
    let now = time::now_epoch();
    let purged = store.broker().with_tx("registry", "lock.purge", |conn| {
        Ok(conn.execute(
            "DELETE FROM ess_locks WHERE expires_at <= ?1",
            params![now],
        )?)
    })?;
    if purged > 0 {
        tracing::info!(purged, "expired locks purged");
    }
    Ok(purged)
}
