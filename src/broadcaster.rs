use log::{debug, info};

use crate::message::{Kind, Message};
use crate::metrics;
use crate::registry::UserRegistry;
use crate::sink::Sink;

/// Deliver `message` to every active user except the author of a chat line.
///
/// Recipients whose sink refuses the write are evicted from the registry
/// once every target has been tried. Returns the evicted usernames.
pub fn broadcast(message: &Message, registry: &UserRegistry) -> Vec<String> {
    let line = message.to_string();
    let mut failed = Vec::new();

    for (username, sink) in registry.snapshot_active() {
        if message.is_broadcast_from(&username) {
            continue;
        }
        if sink.send_line(&line).is_err() {
            failed.push((username, sink));
        }
    }

    if let Kind::Broadcast { .. } = message.kind {
        metrics::MESSAGES_RELAYED.inc();
        debug!("[{}] {}", message.sent_at.format("%H:%M:%S"), line);
    }
    failed
        .into_iter()
        .filter(|(username, sink)| evict(username, sink, registry))
        .map(|(username, _)| username)
        .collect()
}

/// Deliver `message` to `recipient` alone. Returns false if the recipient is
/// not active or could not be written to, in which case it is evicted.
pub fn deliver_to(recipient: &str, message: &Message, registry: &UserRegistry) -> bool {
    let sink = match registry.sink_of(recipient) {
        Some(sink) => sink,
        None => return false,
    };
    if sink.send_line(&message.to_string()).is_err() {
        evict(recipient, &sink, registry);
        return false;
    }
    true
}

/// Drop `username` only if it is still registered with the sink that failed.
fn evict(username: &str, sink: &Sink, registry: &UserRegistry) -> bool {
    if !registry.leave_if(username, sink) {
        return false;
    }
    metrics::EVICTED_SESSIONS.inc();
    info!("Removed disconnected user: {}", username);
    true
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::sink::Outgoing;

    fn join(registry: &UserRegistry, username: &str) -> (Sink, Outgoing) {
        let (sink, outgoing) = Sink::channel();
        registry.join(username, sink.clone()).unwrap();
        (sink, outgoing)
    }

    async fn drain(sink: &Sink, outgoing: Outgoing) -> Vec<String> {
        sink.close();
        outgoing.collect().await
    }

    #[tokio::test]
    async fn chat_line_skips_its_author() {
        let registry = UserRegistry::new();
        let (alice, alice_out) = join(&registry, "alice");
        let (bob, bob_out) = join(&registry, "bob");

        let evicted = broadcast(&Message::broadcast("alice", "hi"), &registry);

        assert!(evicted.is_empty());
        assert_eq!(drain(&bob, bob_out).await, vec!["alice: hi"]);
        assert!(drain(&alice, alice_out).await.is_empty());
    }

    #[tokio::test]
    async fn system_message_reaches_everyone() {
        let registry = UserRegistry::new();
        let (alice, alice_out) = join(&registry, "alice");

        broadcast(
            &Message::system("alice has joined the chat for the first time!"),
            &registry,
        );

        assert_eq!(
            drain(&alice, alice_out).await,
            vec!["[SYSTEM] alice has joined the chat for the first time!"]
        );
    }

    #[tokio::test]
    async fn failed_write_evicts_once() {
        let registry = UserRegistry::new();
        let (bob, bob_out) = join(&registry, "bob");
        let (_carol, carol_out) = join(&registry, "carol");
        drop(carol_out);

        let evicted = broadcast(&Message::broadcast("alice", "hi"), &registry);

        assert_eq!(evicted, vec!["carol"]);
        assert!(!registry.is_active("carol"));
        assert!(!registry.lookup_history("carol").unwrap().currently_active);
        assert!(registry.is_active("bob"));
        assert!(broadcast(&Message::system("again"), &registry).is_empty());
        assert_eq!(
            drain(&bob, bob_out).await,
            vec!["alice: hi", "[SYSTEM] again"]
        );
    }

    #[tokio::test]
    async fn sequential_messages_keep_their_order() {
        let registry = UserRegistry::new();
        let (bob, bob_out) = join(&registry, "bob");

        broadcast(&Message::broadcast("alice", "first"), &registry);
        broadcast(&Message::broadcast("alice", "second"), &registry);

        assert_eq!(drain(&bob, bob_out).await, vec!["alice: first", "alice: second"]);
    }

    #[tokio::test]
    async fn private_delivery() {
        let registry = UserRegistry::new();
        let (bob, bob_out) = join(&registry, "bob");
        let (_carol, carol_out) = join(&registry, "carol");
        drop(carol_out);

        assert!(deliver_to("bob", &Message::private("alice", "bob", "psst"), &registry));
        assert!(!deliver_to("dave", &Message::private("alice", "dave", "psst"), &registry));
        assert!(!deliver_to("carol", &Message::private("alice", "carol", "psst"), &registry));
        assert!(!registry.is_active("carol"));

        assert_eq!(drain(&bob, bob_out).await, vec!["[PRIVATE] alice -> bob: psst"]);
    }
}
