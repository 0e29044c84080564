//! Cross-tab coordination
//!
//! Several stores (tabs) share one sync area. Coordination has three parts:
//!
//! 1. An optional named lock so only one tab runs a commit at a time
//! 2. Revision tokens so a tab recognises the echo of its own writes
//! 3. Classification of foreign changes into the smallest reload needed
//!
//! Without a lock provider tabs still converge: the last commit wins and
//! every other tab reloads when it sees the change.

mod changes;
mod lock;
mod revision;

pub use changes::{classify, ChangeAction};
pub use lock::{LockProvider, NamedLocks, NoopLocks, ScopedLock};
pub use revision::{RevisionToken, RevisionTracker, TOKEN_PREFIX};
