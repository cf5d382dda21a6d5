//! Login and registration.
//!
//! [`login_workflow`] builds the name / password dialogue; its completion
//! callback is [`AuthFinalizer::finalize`], which checks or creates the
//! account, resolves duplicate sessions (last login wins) and binds the
//! account to the connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::accounts::{AccountRec, AccountStore, NewAccount};
use crate::conn::{Identity, Scope};
use crate::registry::SessionDirectory;
use crate::template::DataBag;
use crate::throttle::{LoginThrottle, wait_seconds};
use crate::workflow::{Answers, Completion, Memory, OnEmpty, Step, Workflow, WorkflowError};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 20;
const PASSWORD_MIN: usize = 8;
const PRONOUNS: &[&str] = &["he", "she", "they", "it"];

const DISPLACED_NOTICE: &str = "\r\n# logged in elsewhere\r\nbye\r\n";
const UNAVAILABLE: &str = "\r\nlogin unavailable right now; try again\r\n";

fn validate_name(s: &str, _: &Answers) -> Result<String, String> {
    let ok = (NAME_MIN..=NAME_MAX).contains(&s.len())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(format!(
            "names are {NAME_MIN}-{NAME_MAX} letters, digits, _ or -"
        ));
    }
    Ok(s.to_string())
}

fn yes_no(s: &str, _: &Answers) -> Result<String, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok("y".to_string()),
        "n" | "no" => Ok("n".to_string()),
        _ => Err("please answer y or n".to_string()),
    }
}

fn creating(a: &Answers) -> bool {
    a.get("create") == Some("y")
}

fn validate_password(s: &str, a: &Answers) -> Result<String, String> {
    if s.is_empty() {
        return Err("password required".to_string());
    }
    if creating(a) && s.chars().count() < PASSWORD_MIN {
        return Err(format!("password must be at least {PASSWORD_MIN} characters"));
    }
    Ok(s.to_string())
}

fn validate_confirm(s: &str, a: &Answers) -> Result<String, String> {
    let pw = a.get("password").unwrap_or_default();
    if bool::from(s.as_bytes().ct_eq(pw.as_bytes())) {
        Ok(s.to_string())
    } else {
        Err("passwords don't match".to_string())
    }
}

fn normalize_pronouns(s: &str, _: &Answers) -> Result<String, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "he" | "him" => Ok("he".to_string()),
        "she" | "her" => Ok("she".to_string()),
        "they" | "them" => Ok("they".to_string()),
        "it" | "its" => Ok("it".to_string()),
        _ => Err(format!("pick one of: {}", PRONOUNS.join(", "))),
    }
}

/// The login / registration dialogue for one connection.
pub fn login_workflow(auth: Arc<AuthFinalizer>) -> Result<Workflow<Scope>, WorkflowError> {
    let lookup = auth.accounts.clone();
    let steps = vec![
        Step::new("name", "login.name")
            .on_empty(OnEmpty::Reprompt)
            .validate(validate_name),
        Step::new("create", "login.create")
            .when(move |a| {
                // Lookup errors fall through to the password step; finalize reports them.
                a.get("name")
                    .is_some_and(|n| matches!(lookup.find_by_name(n), Ok(None)))
            })
            .validate(yes_no),
        Step::new("password", "login.password")
            .masked()
            .when(|a| a.get("create") != Some("n"))
            .validate(validate_password),
        Step::new("confirm", "login.confirm")
            .masked()
            .when(creating)
            .validate(validate_confirm),
        Step::new("pronouns", "login.pronouns")
            .when(creating)
            .on_empty(OnEmpty::Default("they".to_string()))
            .extra(|_| {
                let mut b = DataBag::new();
                b.insert("choices".into(), Value::from(PRONOUNS.join("/")));
                b
            })
            .validate(normalize_pronouns),
    ];
    Workflow::new(steps, move |a: &Answers, m: &mut Memory, cx: &mut Scope| {
        auth.finalize(a, m, cx)
    })
}

/// Completion callback of the login dialogue.
pub struct AuthFinalizer {
    accounts: Arc<dyn AccountStore>,
    directory: Arc<dyn SessionDirectory>,
    throttle: Arc<Mutex<LoginThrottle>>,
    max_attempts: u32,
}

impl AuthFinalizer {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        directory: Arc<dyn SessionDirectory>,
        throttle: Arc<Mutex<LoginThrottle>>,
        max_attempts: u32,
    ) -> Self {
        Self {
            accounts,
            directory,
            throttle,
            max_attempts: max_attempts.max(1),
        }
    }

    fn throttle(&self) -> MutexGuard<'_, LoginThrottle> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn finalize(&self, a: &Answers, mem: &mut Memory, cx: &mut Scope) -> Completion {
        let Some(name) = a.get("name") else {
            return Completion::Rewind("name".to_string());
        };
        if a.get("create") == Some("n") {
            return Completion::Rewind("name".to_string());
        }
        let password = a.get("password").unwrap_or_default().as_bytes();

        let rec = match self.accounts.find_by_name(name) {
            Err(e) => {
                warn!(session = %cx.session, peer = %cx.peer_ip, account = %name, err = %e, "account lookup failed");
                cx.write_str(UNAVAILABLE);
                return Completion::Clear;
            }
            Ok(Some(_)) if creating(a) => {
                // Taken between the name step and now.
                warn!(session = %cx.session, account = %name, "registration raced an existing account");
                cx.write_str(UNAVAILABLE);
                return Completion::Clear;
            }
            Ok(Some(rec)) => {
                let now = Instant::now();
                let wait = self.throttle().wait(cx.peer_ip, name, now);
                if !wait.is_zero() {
                    cx.write_str(&format!("rate limit: retry in {}s\r\n", wait_seconds(wait)));
                    return Completion::Rewind("password".to_string());
                }
                if !self.accounts.verify_credential(&rec, password) {
                    return self.bad_password(name, mem, cx, now);
                }
                self.throttle().note_success(cx.peer_ip, name);
                rec
            }
            Ok(None) if creating(a) => {
                let pronouns = a.get("pronouns").unwrap_or("they");
                match self.accounts.create(NewAccount {
                    name,
                    password,
                    pronouns,
                }) {
                    Ok(rec) => {
                        info!(session = %cx.session, peer = %cx.peer_ip, account = %rec.name, "account created");
                        rec
                    }
                    Err(e) => {
                        warn!(session = %cx.session, account = %name, err = %e, "account create failed");
                        cx.write_str(UNAVAILABLE);
                        return Completion::Clear;
                    }
                }
            }
            Ok(None) => {
                // Gone since the name step (reload).
                warn!(session = %cx.session, account = %name, "account vanished during login");
                cx.write_str(UNAVAILABLE);
                return Completion::Clear;
            }
        };

        mem.forget("attempts");
        self.bind(rec, cx);
        Completion::Clear
    }

    fn bad_password(&self, name: &str, mem: &mut Memory, cx: &mut Scope, now: Instant) -> Completion {
        let attempts = mem
            .recall("attempts")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
            + 1;
        mem.remember("attempts", attempts.to_string());
        let delay = self.throttle().note_failure(cx.peer_ip, name, now);
        warn!(
            session = %cx.session,
            peer = %cx.peer_ip,
            account = %name,
            attempts,
            "bad password"
        );

        if attempts >= self.max_attempts {
            cx.write_str("too many failed attempts\r\nbye\r\n");
            return Completion::Disconnect;
        }
        cx.write_str(&format!("bad password; retry in {}s\r\n", wait_seconds(delay)));
        Completion::Rewind("password".to_string())
    }

    /// Last login wins: any other session holding the account is told and dropped first.
    fn bind(&self, rec: AccountRec, cx: &mut Scope) {
        let mut displaced = None;
        if let Some(old) = self
            .directory
            .live_connection_for(&rec.name)
            .filter(|s| *s != cx.session)
        {
            self.directory.terminate(old, DISPLACED_NOTICE);
            displaced = Some(old);
        }
        if let Some(old) = self.directory.bind_connection(&rec.name, cx.session) {
            if displaced != Some(old) {
                self.directory.terminate(old, DISPLACED_NOTICE);
            }
            displaced = Some(old);
        }
        if let Some(old) = displaced {
            info!(session = %cx.session, displaced = %old, account = %rec.name, "duplicate login; older session terminated");
        }

        info!(session = %cx.session, peer = %cx.peer_ip, account = %rec.name, "login");
        cx.write_str(&format!("welcome, {}.\r\n", rec.name));
        cx.identity = Some(Identity {
            caps: rec.caps(),
            account: rec.name,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::tests::MemStore;
    use crate::session::SessionId;
    use crate::template::Prompts;
    use crate::workflow::Submit;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Default)]
    struct FakeDirectory {
        bound: Mutex<HashMap<String, SessionId>>,
        terminated: Mutex<Vec<SessionId>>,
    }

    impl SessionDirectory for FakeDirectory {
        fn live_connection_for(&self, account: &str) -> Option<SessionId> {
            self.bound.lock().unwrap().get(account).copied()
        }

        fn bind_connection(&self, account: &str, session: SessionId) -> Option<SessionId> {
            self.bound
                .lock()
                .unwrap()
                .insert(account.to_string(), session)
                .filter(|p| *p != session)
        }

        fn terminate(&self, session: SessionId, _: &str) -> bool {
            self.terminated.lock().unwrap().push(session);
            true
        }
    }

    struct Fixture {
        store: Arc<MemStore>,
        dir: Arc<FakeDirectory>,
        auth: Arc<AuthFinalizer>,
        prompts: Prompts,
    }

    fn fixture(store: MemStore) -> Fixture {
        let store = Arc::new(store);
        let dir = Arc::new(FakeDirectory::default());
        let auth = Arc::new(AuthFinalizer::new(
            store.clone(),
            dir.clone(),
            Arc::new(Mutex::new(LoginThrottle::default())),
            3,
        ));
        Fixture {
            store,
            dir,
            auth,
            prompts: Prompts::builtin(),
        }
    }

    fn scope(id: u128) -> Scope {
        Scope::new(SessionId(id), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 10)
    }

    fn run(f: &Fixture, cx: &mut Scope, answers: &[&str]) -> (Workflow<Scope>, Vec<Submit>) {
        let mut wf = login_workflow(f.auth.clone()).unwrap();
        wf.begin(&f.prompts, cx);
        let res = answers
            .iter()
            .map(|a| wf.submit(a, &f.prompts, cx))
            .collect();
        (wf, res)
    }

    #[test]
    fn registration_creates_and_binds() {
        let f = fixture(MemStore::default());
        let mut cx = scope(1);
        let (_, res) = run(&f, &mut cx, &["Zed", "y", "longpass1", "longpass1", ""]);

        assert_eq!(res.last(), Some(&Submit::Completed(Completion::Clear)));
        let id = cx.identity.as_ref().unwrap();
        assert_eq!(id.account, "Zed");
        assert!(!id.is_admin());
        let rec = f.store.find_by_name("zed").unwrap().unwrap();
        assert_eq!(rec.pronouns.as_deref(), Some("they"));
        assert_eq!(f.dir.live_connection_for("Zed"), Some(SessionId(1)));
        assert!(cx.echo.is_enabled());
    }

    #[test]
    fn registration_rejects_short_and_mismatched_passwords() {
        let f = fixture(MemStore::default());
        let mut cx = scope(1);
        let (wf, res) = run(&f, &mut cx, &["Zed", "y", "short", "longpass1", "longpass2"]);
        assert!(matches!(&res[2], Submit::Rejected { key, .. } if key == "password"));
        assert!(matches!(&res[4], Submit::Rejected { key, .. } if key == "confirm"));
        assert_eq!(wf.current_step().map(Step::key), Some("confirm"));
        assert!(cx.identity.is_none());
    }

    #[test]
    fn declining_registration_asks_name_again() {
        let f = fixture(MemStore::default());
        let mut cx = scope(1);
        let (wf, res) = run(&f, &mut cx, &["Zed", "n"]);
        assert_eq!(res[1], Submit::Rewound { key: "name".into() });
        assert!(wf.answers().is_empty());
        assert!(f.store.find_by_name("zed").unwrap().is_none());
    }

    #[test]
    fn bad_passwords_are_bounded() {
        let f = fixture(MemStore::with("alice", "hunter22", &[]));
        let mut cx = scope(1);
        let mut wf = login_workflow(f.auth.clone()).unwrap();
        wf.begin(&f.prompts, &mut cx);
        wf.submit("alice", &f.prompts, &mut cx);

        for _ in 0..2 {
            let res = wf.submit("wrong", &f.prompts, &mut cx);
            assert_eq!(res, Submit::Rewound { key: "password".into() });
            // Skip the backoff so the next try is checked, not throttled.
            f.auth.throttle().note_success(cx.peer_ip, "alice");
        }
        let res = wf.submit("wrong", &f.prompts, &mut cx);
        assert_eq!(res, Submit::Completed(Completion::Disconnect));
        let out = String::from_utf8_lossy(&cx.take_output()).into_owned();
        assert!(out.contains("too many failed attempts"));
        assert!(!out.contains("wrong"));
        assert!(cx.identity.is_none());
    }

    #[test]
    fn throttled_password_is_refused() {
        let f = fixture(MemStore::with("alice", "hunter22", &[]));
        let mut cx = scope(1);
        let (mut wf, res) = run(&f, &mut cx, &["alice", "wrong"]);
        assert_eq!(res[1], Submit::Rewound { key: "password".into() });
        cx.take_output();

        let res = wf.submit("hunter22", &f.prompts, &mut cx);
        assert_eq!(res, Submit::Rewound { key: "password".into() });
        let out = String::from_utf8_lossy(&cx.take_output()).into_owned();
        assert!(out.contains("rate limit: retry in 1s"), "{out:?}");
        assert!(cx.identity.is_none());
    }

    #[test]
    fn last_login_wins() {
        let f = fixture(MemStore::with("root", "password1", &["admin"]));
        f.dir
            .bound
            .lock()
            .unwrap()
            .insert("root".to_string(), SessionId(7));

        let mut cx = scope(8);
        run(&f, &mut cx, &["root", "password1"]);
        assert_eq!(*f.dir.terminated.lock().unwrap(), vec![SessionId(7)]);
        assert_eq!(f.dir.live_connection_for("root"), Some(SessionId(8)));
        assert!(cx.identity.as_ref().unwrap().is_admin());
    }

    #[test]
    fn invalid_names_are_reprompted() {
        let f = fixture(MemStore::default());
        let mut cx = scope(1);
        let (wf, res) = run(&f, &mut cx, &["", "x", "bad name!"]);
        assert_eq!(res[0], Submit::Reprompted { key: "name".into() });
        assert!(matches!(&res[1], Submit::Rejected { key, .. } if key == "name"));
        assert!(matches!(&res[2], Submit::Rejected { key, .. } if key == "name"));
        assert_eq!(wf.current_step().map(Step::key), Some("name"));
    }
}
