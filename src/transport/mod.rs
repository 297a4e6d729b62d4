//! Topic-framed ZeroMQ transport
//!
//! Every wire message is a single ZMQ frame: the topic string, one space
//! separator, then the raw payload. Subscribers filter on the topic
//! prefix; the `_s<bytes>` suffix in the topic makes the payload length
//! checkable after the split. Keeping messages single-part is what lets
//! a lossy subscriber turn on `ZMQ_CONFLATE` (keep only the newest
//! message) without tearing frames apart.
//!
//! The state-machine nodes poll with `DONTWAIT` receives so no state
//! action ever blocks on the network; the async stream nodes use tmq on
//! top of the same wire format.

use serde_json::Value;
use tracing::warn;

use crate::common::envelope::CommandMessage;
use crate::common::error::{PipelineError, PipelineResult};
use crate::common::topic::Topic;

/// A received topic-framed message
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

/// Split one wire frame into topic and payload
pub fn split_frame(frame: &[u8]) -> PipelineResult<TopicMessage> {
    let space = frame
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| PipelineError::protocol("frame without topic separator"))?;

    let topic_str = std::str::from_utf8(&frame[..space])
        .map_err(|_| PipelineError::protocol("non-UTF-8 topic"))?;
    let topic = Topic::parse(topic_str)?;
    let payload = frame[space + 1..].to_vec();

    if payload.len() != topic.size {
        warn!(
            topic = topic_str,
            declared = topic.size,
            actual = payload.len(),
            "Payload length does not match the topic size suffix"
        );
    }

    Ok(TopicMessage { topic, payload })
}

/// Assemble one wire frame from topic and payload
pub fn join_frame(topic: &Topic, payload: &[u8]) -> Vec<u8> {
    let topic_str = topic.format();
    let mut frame = Vec::with_capacity(topic_str.len() + 1 + payload.len());
    frame.extend_from_slice(topic_str.as_bytes());
    frame.push(b' ');
    frame.extend_from_slice(payload);
    frame
}

/// PUB socket for status documents and data payloads
pub struct PubSocket {
    socket: zmq::Socket,
}

impl PubSocket {
    pub fn create(context: &zmq::Context) -> PipelineResult<Self> {
        Ok(Self {
            socket: context.socket(zmq::PUB)?,
        })
    }

    pub fn bind(&self, address: &str) -> PipelineResult<()> {
        self.socket.bind(address)?;
        Ok(())
    }

    /// Send one topic-framed binary payload
    pub fn send(&self, topic: &Topic, payload: &[u8]) -> PipelineResult<()> {
        self.socket.send(join_frame(topic, payload), 0)?;
        Ok(())
    }

    /// Serialize a JSON document and send it under a numbered topic
    pub fn send_json(&self, prefix: &str, msg_id: u64, value: &Value) -> PipelineResult<()> {
        let payload = serde_json::to_vec(value)?;
        let topic = Topic::numbered(prefix, msg_id, payload.len());
        self.send(&topic, &payload)
    }
}

/// SUB socket for the data stream
pub struct SubSocket {
    socket: zmq::Socket,
}

impl SubSocket {
    /// Create the subscriber
    ///
    /// With `discard_messages` the socket becomes conflating: only the
    /// most recent message is kept and the receive high-water mark is
    /// capped, so a slow analyzer drops whole bursts instead of growing
    /// an unbounded queue.
    pub fn create(context: &zmq::Context, discard_messages: bool) -> PipelineResult<Self> {
        let socket = context.socket(zmq::SUB)?;
        if discard_messages {
            socket.set_conflate(true)?;
            socket.set_rcvhwm(1)?;
        }
        Ok(Self { socket })
    }

    pub fn connect(&self, address: &str) -> PipelineResult<()> {
        self.socket.connect(address)?;
        Ok(())
    }

    pub fn subscribe(&self, prefix: &str) -> PipelineResult<()> {
        self.socket.set_subscribe(prefix.as_bytes())?;
        Ok(())
    }

    /// Non-blocking receive of one topic-framed message
    pub fn recv_nowait(&self) -> PipelineResult<Option<TopicMessage>> {
        match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(frame) => split_frame(&frame).map(Some),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// PULL socket for the command channel
pub struct PullSocket {
    socket: zmq::Socket,
}

impl PullSocket {
    pub fn create(context: &zmq::Context) -> PipelineResult<Self> {
        Ok(Self {
            socket: context.socket(zmq::PULL)?,
        })
    }

    pub fn bind(&self, address: &str) -> PipelineResult<()> {
        self.socket.bind(address)?;
        Ok(())
    }

    /// Non-blocking receive of one JSON command frame
    pub fn recv_command(&self) -> PipelineResult<Option<CommandMessage>> {
        match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(frame) => Ok(Some(CommandMessage::from_json(&frame)?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// PUSH socket used by command clients
pub struct PushSocket {
    socket: zmq::Socket,
}

impl PushSocket {
    pub fn create(context: &zmq::Context) -> PipelineResult<Self> {
        Ok(Self {
            socket: context.socket(zmq::PUSH)?,
        })
    }

    pub fn connect(&self, address: &str) -> PipelineResult<()> {
        self.socket.connect(address)?;
        Ok(())
    }

    pub fn send_command(&self, command: &CommandMessage) -> PipelineResult<()> {
        self.socket.send(command.to_json()?, 0)?;
        Ok(())
    }
}

/// Convert a bind address like `tcp://*:16180` into a connectable one
pub fn bind_to_connect(address: &str) -> String {
    address.replace('*', "127.0.0.1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::topic::TOPIC_EVENTS;

    #[test]
    fn frame_roundtrip() {
        let topic = Topic::numbered(TOPIC_EVENTS, 3, 4);
        let frame = join_frame(&topic, b"1234");

        let message = split_frame(&frame).unwrap();
        assert_eq!(message.topic, topic);
        assert_eq!(message.payload, b"1234");
    }

    #[test]
    fn frame_with_spaces_in_payload() {
        let topic = Topic::sized(TOPIC_EVENTS, 11);
        let frame = join_frame(&topic, b"hello world");
        let message = split_frame(&frame).unwrap();
        assert_eq!(message.payload, b"hello world");
    }

    #[test]
    fn frame_without_separator_rejected() {
        assert!(split_frame(b"no-separator-here").is_err());
    }

    #[test]
    fn bind_to_connect_rewrites_wildcard() {
        assert_eq!(bind_to_connect("tcp://*:16180"), "tcp://127.0.0.1:16180");
        assert_eq!(
            bind_to_connect("tcp://10.0.0.1:16180"),
            "tcp://10.0.0.1:16180"
        );
    }

    #[test]
    fn pub_pull_pair_over_inproc() {
        let context = zmq::Context::new();

        let pull = PullSocket::create(&context).unwrap();
        pull.bind("inproc://commands-test").unwrap();

        let push = PushSocket::create(&context).unwrap();
        push.connect("inproc://commands-test").unwrap();

        let cmd = CommandMessage::new(5, "start");
        push.send_command(&cmd).unwrap();

        // inproc delivery is synchronous once connected
        let mut received = None;
        for _ in 0..100 {
            if let Some(msg) = pull.recv_command().unwrap() {
                received = Some(msg);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let received = received.expect("command not delivered");
        assert_eq!(received.msg_id, 5);
        assert_eq!(received.command, "start");
    }

    #[test]
    fn pub_sub_pair_over_inproc() {
        let context = zmq::Context::new();

        let publisher = PubSocket::create(&context).unwrap();
        publisher.bind("inproc://data-test").unwrap();

        let subscriber = SubSocket::create(&context, false).unwrap();
        subscriber.connect("inproc://data-test").unwrap();
        subscriber.subscribe(TOPIC_EVENTS).unwrap();

        // Let the subscription propagate, then publish
        std::thread::sleep(std::time::Duration::from_millis(50));
        let topic = Topic::numbered(TOPIC_EVENTS, 0, 3);
        publisher.send(&topic, b"xyz").unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(msg) = subscriber.recv_nowait().unwrap() {
                received = Some(msg);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let received = received.expect("message not delivered");
        assert_eq!(received.topic.msg_id, Some(0));
        assert_eq!(received.payload, b"xyz");
    }
}
