//! Process-wide table of live sessions.
//!
//! Every connection registers on accept and deregisters in its teardown. An
//! account is bound to at most one session; binding a second session hands
//! back the displaced one so the caller can terminate it ("last login wins").
//! All access goes through one mutex, never held across an await.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::session::SessionId;

/// Outbound notifications to live sessions.
pub trait Notifier: Send + Sync {
    /// Returns how many sessions the message was queued for.
    fn broadcast(&self, msg: &str) -> usize;
    fn send_to(&self, session: SessionId, msg: &str) -> bool;
}

/// Account-to-connection bookkeeping used by login.
pub trait SessionDirectory: Send + Sync {
    fn live_connection_for(&self, account: &str) -> Option<SessionId>;
    /// Bind `account` to `session`, returning the session it was bound to before, if any.
    fn bind_connection(&self, account: &str, session: SessionId) -> Option<SessionId>;
    /// Send `notice` and ask the session's task to disconnect.
    fn terminate(&self, session: SessionId, notice: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub peer_ip: IpAddr,
    pub account: Option<String>,
    write_tx: mpsc::Sender<Bytes>,
    disconnect_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(
        peer_ip: IpAddr,
        write_tx: mpsc::Sender<Bytes>,
        disconnect_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            peer_ip,
            account: None,
            write_tx,
            disconnect_tx,
        }
    }

    fn send(&self, msg: &str) -> bool {
        // Never wait on a slow client while holding the registry lock.
        match self.write_tx.try_send(Bytes::copy_from_slice(msg.as_bytes())) {
            Ok(()) => true,
            Err(e) => {
                debug!(err = %e, "dropping notification");
                false
            }
        }
    }

    fn disconnect(&self) {
        let _ = self.disconnect_tx.send(true);
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionHandle>,
    // account name (lowercase) -> session
    by_account: HashMap<String, SessionId>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

fn account_key(account: &str) -> String {
    account.trim().to_ascii_lowercase()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session: SessionId, handle: SessionHandle) {
        self.lock().sessions.insert(session, handle);
    }

    /// Remove a session. Its account binding goes too, unless a newer session already took it.
    pub fn deregister(&self, session: SessionId) -> Option<SessionHandle> {
        let mut m = self.lock();
        let removed = m.sessions.remove(&session)?;
        if let Some(acct) = removed.account.as_deref() {
            let k = account_key(acct);
            if m.by_account.get(&k) == Some(&session) {
                m.by_account.remove(&k);
            }
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn account_of(&self, session: SessionId) -> Option<String> {
        self.lock()
            .sessions
            .get(&session)
            .and_then(|h| h.account.clone())
    }

    /// Names of bound accounts, sorted.
    pub fn bound_accounts(&self) -> Vec<String> {
        let m = self.lock();
        let mut v = m
            .sessions
            .values()
            .filter_map(|h| h.account.clone())
            .collect::<Vec<_>>();
        v.sort_by_key(|a| a.to_ascii_lowercase());
        v
    }

    /// Notify and disconnect every session. Returns how many were signalled.
    pub fn disconnect_all(&self, notice: &str) -> usize {
        let m = self.lock();
        for h in m.sessions.values() {
            if !notice.is_empty() {
                h.send(notice);
            }
            h.disconnect();
        }
        m.sessions.len()
    }
}

impl Notifier for SessionRegistry {
    fn broadcast(&self, msg: &str) -> usize {
        let m = self.lock();
        m.sessions.values().filter(|h| h.send(msg)).count()
    }

    fn send_to(&self, session: SessionId, msg: &str) -> bool {
        self.lock()
            .sessions
            .get(&session)
            .is_some_and(|h| h.send(msg))
    }
}

impl SessionDirectory for SessionRegistry {
    fn live_connection_for(&self, account: &str) -> Option<SessionId> {
        self.lock().by_account.get(&account_key(account)).copied()
    }

    fn bind_connection(&self, account: &str, session: SessionId) -> Option<SessionId> {
        let k = account_key(account);
        let mut m = self.lock();
        let Inner {
            sessions,
            by_account,
        } = &mut *m;

        let prev = by_account.insert(k, session).filter(|p| *p != session);
        if let Some(p) = prev {
            if let Some(h) = sessions.get_mut(&p) {
                h.account = None;
            }
        }
        if let Some(h) = sessions.get_mut(&session) {
            h.account = Some(account.to_string());
        }
        prev
    }

    fn terminate(&self, session: SessionId, notice: &str) -> bool {
        let m = self.lock();
        let Some(h) = m.sessions.get(&session) else {
            return false;
        };
        h.send(notice);
        h.disconnect();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct Peer {
        rx: mpsc::Receiver<Bytes>,
        disc: watch::Receiver<bool>,
    }

    fn add(reg: &SessionRegistry, id: u128) -> Peer {
        let (tx, rx) = mpsc::channel(8);
        let (dtx, disc) = watch::channel(false);
        reg.register(
            SessionId(id),
            SessionHandle::new(IpAddr::V4(Ipv4Addr::LOCALHOST), tx, dtx),
        );
        Peer { rx, disc }
    }

    #[test]
    fn last_login_wins() {
        let reg = SessionRegistry::new();
        let mut a = add(&reg, 1);
        let _b = add(&reg, 2);

        assert_eq!(reg.bind_connection("Alice", SessionId(1)), None);
        assert_eq!(reg.live_connection_for("alice"), Some(SessionId(1)));

        let displaced = reg.bind_connection("alice", SessionId(2));
        assert_eq!(displaced, Some(SessionId(1)));
        assert!(reg.terminate(SessionId(1), "bye\r\n"));
        assert_eq!(&a.rx.try_recv().unwrap()[..], b"bye\r\n");
        assert!(*a.disc.borrow_and_update());

        // The displaced session's teardown must not unbind the new one.
        reg.deregister(SessionId(1));
        assert_eq!(reg.live_connection_for("ALICE"), Some(SessionId(2)));
        assert_eq!(reg.bound_accounts(), vec!["alice".to_string()]);
    }

    #[test]
    fn rebinding_same_session_is_not_a_displacement() {
        let reg = SessionRegistry::new();
        let _a = add(&reg, 1);
        reg.bind_connection("bob", SessionId(1));
        assert_eq!(reg.bind_connection("bob", SessionId(1)), None);
    }

    #[test]
    fn deregister_releases_binding() {
        let reg = SessionRegistry::new();
        let _a = add(&reg, 7);
        reg.bind_connection("carol", SessionId(7));
        assert_eq!(reg.account_of(SessionId(7)).as_deref(), Some("carol"));
        assert!(reg.deregister(SessionId(7)).is_some());
        assert_eq!(reg.live_connection_for("carol"), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn broadcast_and_send_to() {
        let reg = SessionRegistry::new();
        let mut a = add(&reg, 1);
        let mut b = add(&reg, 2);

        assert_eq!(reg.broadcast("hi\r\n"), 2);
        assert_eq!(&a.rx.try_recv().unwrap()[..], b"hi\r\n");
        assert_eq!(&b.rx.try_recv().unwrap()[..], b"hi\r\n");

        assert!(reg.send_to(SessionId(2), "psst\r\n"));
        assert!(!reg.send_to(SessionId(9), "nobody\r\n"));
        assert_eq!(&b.rx.try_recv().unwrap()[..], b"psst\r\n");
        assert!(a.rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_all_signals_everyone() {
        let reg = SessionRegistry::new();
        let mut a = add(&reg, 1);
        let mut b = add(&reg, 2);
        assert_eq!(reg.disconnect_all(""), 2);
        assert!(*a.disc.borrow_and_update());
        assert!(*b.disc.borrow_and_update());
        assert!(a.rx.try_recv().is_err());
    }
}
