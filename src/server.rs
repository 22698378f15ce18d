use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{future, pin_mut, StreamExt};
use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::broadcaster::broadcast;
use crate::config::Config;
use crate::error::RelayError;
use crate::message::{Message, SHUTDOWN_NOTICE};
use crate::metrics;
use crate::registry::UserRegistry;
use crate::session::Session;
use crate::sink::Sink;

pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::ListenBindFailure(addr, e))
}

async fn handle_connection(
    registry: Arc<UserRegistry>,
    config: Arc<Config>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), RelayError> {
    let _client = metrics::ConnectedClient::open(addr.ip(), config.ip_hash_salt.as_deref());
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let codec = LinesCodec::new_with_max_length(config.max_line_length);
    let (reader, writer) = stream.into_split();
    let incoming = FramedRead::new(reader, codec.clone());
    let outgoing = FramedWrite::new(writer, codec);
    let (sink, rx) = Sink::channel();

    let delivered = {
        let session = Session::new(addr, sink, registry).run(incoming);
        let send_to_peer = rx.map(Ok::<_, LinesCodecError>).forward(outgoing);
        pin_mut!(session, send_to_peer);
        match future::select(session, send_to_peer).await {
            // The session closed its sink; let queued lines reach the peer.
            future::Either::Left(((), send_to_peer)) => send_to_peer.await,
            future::Either::Right((delivered, _session)) => delivered,
        }
    };
    info!("{} disconnected", addr);
    delivered.map_err(|e| RelayError::WriteFailure(addr, e))
}

/// Accept connections until `shutdown` resolves, then tell every active user
/// the server is going away and stop listening.
///
/// Returns the still-running connection tasks; they are not interrupted.
pub(crate) async fn serve<F>(
    listener: TcpListener,
    registry: Arc<UserRegistry>,
    config: Arc<Config>,
    shutdown: F,
) -> JoinSet<()>
where
    F: Future<Output = ()>,
{
    let mut connections = JoinSet::new();
    let mut accepted: u64 = 0;
    pin_mut!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            incoming = listener.accept() => match incoming {
                Ok((stream, addr)) => {
                    accepted += 1;
                    info!("New connection #{} from {}", accepted, addr);
                    let connection =
                        handle_connection(registry.clone(), config.clone(), stream, addr);
                    connections.spawn(async move {
                        if let Err(e) = connection.await {
                            info!("{}", e);
                        }
                    });
                }
                Err(e) => error!("Error accepting client connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }

    broadcast(&Message::system(SHUTDOWN_NOTICE), &registry);
    drop(listener);
    info!("Chat server stopped. Total connections served: {}", accepted);
    connections
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;
    use crate::message::{GREETING, HELP_HINT, USERNAME_PROMPT};

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Client {
            let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut client = Client {
                lines: BufReader::new(reader).lines(),
                writer,
            };
            assert_eq!(client.line().await, GREETING);
            assert_eq!(client.line().await, USERNAME_PROMPT);
            client
        }

        async fn join(addr: SocketAddr, username: &str) -> Client {
            let mut client = Client::connect(addr).await;
            client.send(username).await;
            client.line().await;
            client.line().await;
            assert_eq!(client.line().await, HELP_HINT);
            client
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
        }

        async fn next(&mut self) -> Option<String> {
            timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for the server")
                .unwrap()
        }

        async fn line(&mut self) -> String {
            self.next().await.expect("connection closed")
        }
    }

    struct Running {
        addr: SocketAddr,
        registry: Arc<UserRegistry>,
        stop: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<JoinSet<()>>,
    }

    async fn start() -> Running {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(UserRegistry::new());
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            registry.clone(),
            Arc::new(Config::default()),
            async move {
                let _ = stopped.await;
            },
        ));
        Running {
            addr,
            registry,
            stop,
            server,
        }
    }

    #[tokio::test]
    async fn relays_between_users() {
        let server = start().await;
        let mut alice = Client::join(server.addr, "alice").await;
        let mut bob = Client::connect(server.addr).await;
        bob.send("bob").await;

        assert_eq!(
            bob.line().await,
            "Welcome to the chat, bob! This is your first time here."
        );
        assert_eq!(
            alice.line().await,
            "[SYSTEM] bob has joined the chat for the first time!"
        );

        alice.send("hi").await;
        bob.line().await;
        bob.line().await;
        assert_eq!(bob.line().await, "alice: hi");

        bob.send("hello alice").await;
        assert_eq!(alice.line().await, "bob: hello alice");
    }

    #[tokio::test]
    async fn rejects_active_username() {
        let server = start().await;
        let _alice = Client::join(server.addr, "alice").await;

        let mut imposter = Client::connect(server.addr).await;
        imposter.send("alice").await;

        assert_eq!(imposter.line().await, "Username 'alice' is already active");
        assert_eq!(imposter.next().await, None);
        assert!(server.registry.is_active("alice"));
    }

    #[tokio::test]
    async fn welcomes_back_after_quit() {
        let server = start().await;
        let mut alice = Client::join(server.addr, "alice").await;
        let mut bob = Client::join(server.addr, "bob").await;
        alice.line().await;

        alice.send("/quit").await;
        assert_eq!(
            alice.line().await,
            "Goodbye alice! You can reconnect anytime using the same username."
        );
        assert_eq!(alice.next().await, None);
        assert_eq!(bob.line().await, "[SYSTEM] alice has left the chat");

        let mut alice = Client::connect(server.addr).await;
        alice.send("alice").await;
        assert_eq!(
            alice.line().await,
            "Welcome back, alice! This is your connection #2"
        );
        assert_eq!(
            bob.line().await,
            "[SYSTEM] alice has returned to the chat (connection #2)"
        );
    }

    #[tokio::test]
    async fn connection_reports_clean_delivery() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(
                Arc::new(UserRegistry::new()),
                Arc::new(Config::default()),
                stream,
                peer,
            )
            .await
        });

        let mut alice = Client::join(addr, "alice").await;
        alice.send("/quit").await;
        assert!(alice.line().await.starts_with("Goodbye alice!"));
        assert_eq!(alice.next().await, None);

        let delivered = timeout(Duration::from_secs(5), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(delivered.is_ok(), "{:?}", delivered);
    }

    #[tokio::test]
    async fn peer_hangup_is_announced() {
        let server = start().await;
        let alice = Client::join(server.addr, "alice").await;
        let mut bob = Client::join(server.addr, "bob").await;

        drop(alice);

        assert_eq!(bob.line().await, "[SYSTEM] alice has left the chat");
        assert!(!server.registry.is_active("alice"));
        assert!(server.registry.is_active("bob"));
    }

    #[tokio::test]
    async fn shutdown_notifies_and_leaves_sessions_running() {
        let server = start().await;
        let mut alice = Client::join(server.addr, "alice").await;

        server.stop.send(()).unwrap();
        let mut connections = server.server.await.unwrap();

        assert_eq!(
            alice.line().await,
            "[SYSTEM] Server is shutting down. Goodbye!"
        );
        assert_eq!(connections.len(), 1);

        alice.send("still here").await;
        alice.send("/quit").await;
        assert!(alice.line().await.starts_with("Goodbye alice!"));
        assert_eq!(alice.next().await, None);

        let finished = timeout(Duration::from_secs(5), connections.join_next())
            .await
            .unwrap();
        assert!(matches!(finished, Some(Ok(()))));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        match bind(addr).await {
            Err(RelayError::ListenBindFailure(failed, _)) => assert_eq!(failed, addr),
            other => panic!("expected a bind failure, got {:?}", other.map(|_| ())),
        }
    }
}
