//! Per-connection state and the read-dispatch-write loop.

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::auth::{AuthHook, AuthzHook, Identity};
use crate::error::RedisError;
use crate::pubsub::{PubSubMessage, Registry as PubSubRegistry, SubscriberId};
use crate::resp::{self, Reply};
use crate::store::Store;
use crate::transactions::TransactionState;

/// State shared across every connection on the server.
pub struct ServerShared {
    pub store: Store,
    pub pubsub: PubSubRegistry,
    pub auth: Box<dyn AuthHook>,
    pub authz: Box<dyn AuthzHook>,
    pub start_time: std::time::Instant,
}

/// Per-connection state: current db, identity, transaction queue, and
/// subscriptions. Owned by the connection task; never shared.
pub struct Connection {
    pub db_index: usize,
    pub identity: Option<Identity>,
    pub tx_state: TransactionState,
    pub subscriber_id: SubscriberId,
    pub channels: HashSet<Bytes>,
    pub patterns: HashSet<Bytes>,
    pub pubsub_tx: mpsc::UnboundedSender<PubSubMessage>,
    pub pubsub_rx: mpsc::UnboundedReceiver<PubSubMessage>,
}

impl Connection {
    pub fn new(shared: &ServerShared) -> Connection {
        let id = shared.pubsub.new_subscriber_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = if shared.auth.requires_auth() { None } else { Some(Identity::default_user()) };
        Connection {
            db_index: 0,
            identity,
            tx_state: TransactionState::default(),
            subscriber_id: id,
            channels: HashSet::new(),
            patterns: HashSet::new(),
            pubsub_tx: tx,
            pubsub_rx: rx,
        }
    }

    pub fn in_subscriber_mode(&self) -> bool {
        !self.channels.is_empty() || !self.patterns.is_empty()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

const ALWAYS_ALLOWED_UNAUTHENTICATED: &[&str] = &["AUTH", "HELLO", "PING", "QUIT", "RESET"];
const SUBSCRIBER_MODE_ALLOWED: &[&str] =
    &["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE", "PING", "QUIT", "RESET"];

/// Runs the read-dispatch-write loop for one accepted connection until EOF,
/// a fatal protocol error, or QUIT.
pub async fn run<R, W>(shared: Arc<ServerShared>, mut reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut conn = Connection::new(&shared);

    loop {
        tokio::select! {
            biased;
            msg = conn.pubsub_rx.recv() => {
                if let Some(msg) = msg {
                    resp::write_reply(&mut writer, &msg.into_reply()).await?;
                }
            }
            line = resp::read_command(&mut reader) => {
                let args = match line? {
                    Ok(Some(args)) if !args.is_empty() => args,
                    Ok(Some(_)) => continue,
                    Ok(None) => return Ok(()),
                    Err(decode_err) => {
                        let err: RedisError = decode_err.into();
                        resp::write_reply(&mut writer, &Reply::from(err)).await?;
                        return Ok(());
                    }
                };

                let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                let rest = &args[1..];

                if name == "QUIT" {
                    resp::write_reply(&mut writer, &Reply::ok()).await?;
                    return Ok(());
                }

                if conn.in_subscriber_mode() && !SUBSCRIBER_MODE_ALLOWED.contains(&name.as_str()) {
                    let err = RedisError::Other(format!(
                        "only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context"
                    ));
                    resp::write_reply(&mut writer, &Reply::from(err)).await?;
                    continue;
                }

                if !conn.is_authenticated() && !ALWAYS_ALLOWED_UNAUTHENTICATED.contains(&name.as_str()) {
                    resp::write_reply(&mut writer, &Reply::from(RedisError::NoAuth)).await?;
                    continue;
                }

                if let Some(identity) = &conn.identity {
                    if let Err(e) = shared.authz.authorize(identity, &name).await {
                        resp::write_reply(&mut writer, &Reply::from(e)).await?;
                        continue;
                    }
                }

                let reply = crate::dispatch::dispatch(&shared, &mut conn, &name, rest).await;
                resp::write_reply(&mut writer, &reply).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, NoAuth};
    use std::io::Cursor;

    fn shared() -> Arc<ServerShared> {
        Arc::new(ServerShared {
            store: Store::new(16),
            pubsub: PubSubRegistry::default(),
            auth: Box::new(NoAuth),
            authz: Box::new(AllowAll),
            start_time: std::time::Instant::now(),
        })
    }

    #[tokio::test]
    async fn ping_roundtrip() {
        let shared = shared();
        let input = Cursor::new(b"*1\r\n$4\r\nPING\r\n".to_vec());
        let mut output = Vec::new();
        run(shared, input, &mut output).await.unwrap();
        assert_eq!(output, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn set_then_get() {
        let shared = shared();
        let input = Cursor::new(
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec(),
        );
        let mut output = Vec::new();
        run(shared, input, &mut output).await.unwrap();
        assert_eq!(output, b"+OK\r\n$1\r\nv\r\n");
    }
}
