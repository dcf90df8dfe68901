//! TCP protocol between a pose producer and the counter server.
//!
//! Length-delimited frames carrying bincode payloads.

use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::counter::Status;
use crate::pose::Pose;

/// Producer → server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Frame { timestamp_us: u64, poses: Vec<Pose> },
    StartDetection,
    StopDetection,
    ResetCount,
}

/// Server → producer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Status(Status),
    Keypoints { pose: Option<Pose> },
}

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(1024 * 1024) // 1MB
        .new_codec();
    Framed::new(stream, codec)
}

/// Send a serializable message (bincode + length prefix).
pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> anyhow::Result<()> {
    send_to_sink(stream, msg).await
}

/// Same as `send_message` for the write half of a split stream.
pub async fn send_to_sink<S, T>(sink: &mut S, msg: &T) -> anyhow::Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    T: Serialize,
{
    let data = bincode::serialize(msg)?;
    sink.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(bytes)) => Ok(bincode::deserialize(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Position;
    use crate::pose::{Keypoint, KeypointIndex};

    #[test]
    fn test_frame_message_bincode() {
        let mut pose = Pose::default();
        pose.keypoints[KeypointIndex::LeftShoulder as usize] = Keypoint::new(120.5, 88.0, 0.75);
        let msg = ClientMessage::Frame { timestamp_us: 33_000, poses: vec![pose] };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: ClientMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_status_message_bincode() {
        let msg = ServerMessage::Status(Status {
            count: 4,
            running: true,
            calibrated: true,
            position: Position::Down,
            message: "Good depth, hold...".to_string(),
        });
        let bytes = bincode::serialize(&msg).unwrap();
        assert_eq!(bincode::deserialize::<ServerMessage>(&bytes).unwrap(), msg);
    }
}
