use failure::Fail;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

/// Receiving end of a [`Sink`], drained into the socket by the connection's writer.
pub type Outgoing = UnboundedReceiver<String>;

#[derive(Debug, Fail, PartialEq, Eq)]
#[fail(display = "sink is closed")]
pub struct SinkClosed;

/// Line-oriented handle to one peer's output.
///
/// Clones are cheap and share the same channel. The registry keeps a clone so
/// it can write to the peer, but only the owning session calls [`Sink::close`].
#[derive(Debug, Clone)]
pub struct Sink {
    sender: UnboundedSender<String>,
}

impl Sink {
    pub fn channel() -> (Sink, Outgoing) {
        let (sender, receiver) = unbounded();
        (Sink { sender }, receiver)
    }

    /// Queue one line (without its terminator) for the peer.
    ///
    /// Fails once the writer side has gone away or the sink was closed.
    pub fn send_line(&self, line: &str) -> Result<(), SinkClosed> {
        self.sender
            .unbounded_send(line.to_owned())
            .map_err(|_| SinkClosed)
    }

    /// True when both handles feed the same peer.
    pub fn same_channel(&self, other: &Sink) -> bool {
        self.sender.same_receiver(&other.sender)
    }

    /// Stop accepting lines. Lines already queued are still delivered.
    pub fn close(&self) {
        self.sender.close_channel();
    }
}
