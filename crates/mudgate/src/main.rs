use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mudio::ansi::filter_outbound;
use mudio::decoder::Decoder;
use mudio::line::InputReader;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod accounts;
mod auth;
mod config;
mod conn;
mod control;
mod interceptor;
mod lobby;
mod registry;
mod session;
mod template;
mod throttle;
mod workflow;

use accounts::{AccountStore, JsonAccounts};
use auth::AuthFinalizer;
use conn::{Conn, Flow, Services};
use control::Control;
use lobby::Lobby;
use registry::{SessionHandle, SessionRegistry};
use session::SessionId;
use template::Prompts;
use throttle::LoginThrottle;

const SHUTDOWN_NOTICE: &str = "\r\n# server shutting down\r\nbye\r\n";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mudgate=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = Arc::new(config::parse_args());
    let listener = TcpListener::bind(cfg.bind).await?;

    let accounts: Arc<dyn AccountStore> = Arc::new(JsonAccounts::load(cfg.accounts_path.clone())?);
    let registry = Arc::new(SessionRegistry::new());
    let control = Arc::new(Control::new(registry.clone(), cfg.shutdown_default));
    let auth = Arc::new(AuthFinalizer::new(
        accounts.clone(),
        registry.clone(),
        Arc::new(Mutex::new(LoginThrottle::default())),
        cfg.max_login_attempts,
    ));
    let svc = Arc::new(Services {
        cfg: cfg.clone(),
        registry: registry.clone(),
        auth,
        prompts: Arc::new(Prompts::builtin()),
        control: control.clone(),
        dispatcher: Arc::new(Lobby::new(registry.clone())),
    });

    tokio::spawn(reload_task(accounts.clone(), control.reload_signal()));

    info!(
        bind = %cfg.bind,
        accounts_path = %cfg.accounts_path.display(),
        ansi = ?cfg.ansi,
        "session gateway listening"
    );

    accept_until_shutdown(
        || listener.accept(),
        control.shutdown_signal(),
        |stream, peer| {
            let svc = svc.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_conn(stream, peer, svc).await {
                    warn!(peer = %peer, err = %e, "connection ended with error");
                }
            });
        },
    )
    .await;

    let n = registry.disconnect_all(SHUTDOWN_NOTICE);
    info!(sessions = n, "shutting down");
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

/// Hand accepted streams to `on_conn` until the shutdown flag flips.
/// Accept errors (fd exhaustion, aborted handshakes) are logged and retried.
async fn accept_until_shutdown<S, A, Fut>(
    mut accept: A,
    mut shutdown: watch::Receiver<bool>,
    mut on_conn: impl FnMut(S, SocketAddr),
) where
    A: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, SocketAddr)>>,
{
    loop {
        let (stream, peer) = tokio::select! {
            res = accept() => match res {
                Ok(v) => v,
                Err(e) => {
                    warn!(err = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            _ = shutdown.wait_for(|v| *v) => break,
        };
        on_conn(stream, peer);
    }
}

async fn reload_task(accounts: Arc<dyn AccountStore>, mut rx: watch::Receiver<u64>) {
    while rx.changed().await.is_ok() {
        let generation = *rx.borrow_and_update();
        match accounts.reload() {
            Ok(n) => info!(generation, accounts = n, "accounts reloaded"),
            Err(e) => warn!(generation, err = %e, "account reload failed; keeping previous data"),
        }
    }
}

async fn flush(write_tx: &mpsc::Sender<Bytes>, conn: &mut Conn) {
    let out = conn.take_output();
    if !out.is_empty() {
        let _ = write_tx.send(Bytes::from(out)).await;
    }
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, svc: Arc<Services>) -> anyhow::Result<()> {
    let session = SessionId::random()?;
    let (rd, mut wr) = stream.into_split();

    let (disconnect_tx, mut disconnect_rx) = watch::channel(false);
    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(128);
    let ansi = svc.cfg.ansi;
    let writer = tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&filter_outbound(&b, ansi)).await.is_err() {
                break;
            }
        }
    });

    svc.registry.register(
        session,
        SessionHandle::new(peer.ip(), write_tx.clone(), disconnect_tx),
    );
    info!(session = %session, peer = %peer, "connected");

    let mut conn = Conn::new(session, peer.ip(), svc.clone());
    let mut reader = InputReader::new(rd, Decoder::new(svc.cfg.decoder()));
    conn.greet();
    flush(&write_tx, &mut conn).await;

    let res: anyhow::Result<()> = async {
        loop {
            let decoded = tokio::select! {
                res = reader.read_decoded() => match res? {
                    Some(d) => d,
                    None => return Ok(()),
                },
                _ = disconnect_rx.changed() => return Ok(()),
            };
            if !decoded.replies.is_empty() {
                let _ = write_tx.send(Bytes::from(decoded.replies)).await;
            }
            for input in decoded.inputs {
                let flow = conn.handle_input(input, reader.decoder_mut());
                flush(&write_tx, &mut conn).await;
                if flow == Flow::Disconnect {
                    return Ok(());
                }
            }
        }
    }
    .await;

    conn.teardown();
    flush(&write_tx, &mut conn).await;
    drop(write_tx);
    if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(session = %session, "writer did not drain");
    }
    info!(
        session = %session,
        peer = %peer,
        account = %conn.scope().who(),
        "disconnected"
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test(start_paused = true)]
    async fn accept_errors_do_not_end_the_loop() {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);
        let mut script: VecDeque<io::Result<(u32, SocketAddr)>> = VecDeque::from([
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::other("too many open files")),
            Ok((7, peer)),
        ]);
        let accept = || {
            let next = script.pop_front();
            async move {
                match next {
                    Some(r) => r,
                    None => std::future::pending().await,
                }
            }
        };

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        let mut accepted = Vec::new();
        accept_until_shutdown(accept, rx, |s, p| accepted.push((s, p))).await;
        assert_eq!(accepted, vec![(7, peer)]);
    }
}
