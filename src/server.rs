//! Counter server session: one producer connection at a time.
//!
//! A reader task forwards client messages and keeps the latest frame on a
//! watch channel for calibration. A writer task drains server messages into
//! the socket. The detector itself runs on the session task only.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::counter::{Baseline, CalibrationError, Detector, LogSink, Status, StatusSink};
use crate::pose::{LatestFrameSource, Pose};
use crate::protocol::{self, ClientMessage, ServerMessage};

/// Forwards statuses and keypoints to the connection's writer task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
    log: LogSink,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { tx, log: LogSink::new() }
    }
}

impl StatusSink for ChannelSink {
    fn publish(&mut self, status: &Status) {
        self.log.publish(status);
        // the writer is gone only once the connection is closing
        let _ = self.tx.send(ServerMessage::Status(status.clone()));
    }

    fn keypoints(&mut self, pose: Option<&Pose>) {
        let _ = self.tx.send(ServerMessage::Keypoints { pose: pose.cloned() });
    }
}

enum Calibration {
    Finished(Result<Baseline, CalibrationError>),
    Cancelled,
    Disconnected,
}

/// Serve one connection until the client disconnects. Returns the final count.
pub async fn serve_connection(stream: TcpStream, config: &Config) -> Result<u32> {
    let framed = protocol::message_stream(stream);
    let (mut sink, mut reader) = framed.split();

    let (event_tx, mut event_rx) = mpsc::channel::<ClientMessage>(64);
    let (frame_tx, frame_rx) = watch::channel(Vec::<Pose>::new());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let reader_task = tokio::spawn(async move {
        while let Some(result) = reader.next().await {
            let bytes = match result {
                Ok(b) => b,
                Err(e) => {
                    warn!("[tcp] reader error: {}", e);
                    break;
                }
            };
            let msg: ClientMessage = match bincode::deserialize(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!("[tcp] deserialize error: {}", e);
                    continue;
                }
            };
            if let ClientMessage::Frame { poses, .. } = &msg {
                frame_tx.send_replace(poses.clone());
            }
            if event_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = protocol::send_to_sink(&mut sink, &msg).await {
                warn!("[tcp] send failed: {:#}", e);
                break;
            }
        }
    });

    let mut detector = Detector::new(config, ChannelSink::new(out_tx));

    while let Some(msg) = event_rx.recv().await {
        match msg {
            ClientMessage::Frame { timestamp_us, poses } => {
                detector.process_frame(&poses, Duration::from_micros(timestamp_us));
            }
            ClientMessage::StartDetection => {
                info!("start detection");
                detector.begin_calibration();
                let calibrator = detector.calibrator().clone();
                let mut source = LatestFrameSource::new(frame_rx.clone());
                let calibration = calibrator.calibrate(&mut source);
                tokio::pin!(calibration);

                let outcome = loop {
                    tokio::select! {
                        result = &mut calibration => break Calibration::Finished(result),
                        event = event_rx.recv() => match event {
                            Some(ClientMessage::StopDetection) => break Calibration::Cancelled,
                            Some(ClientMessage::ResetCount) => detector.reset_count(),
                            Some(other) => debug!("ignored during calibration: {:?}", other),
                            None => break Calibration::Disconnected,
                        },
                    }
                };

                match outcome {
                    Calibration::Finished(result) => {
                        let _ = detector.finish_calibration(result);
                    }
                    Calibration::Cancelled => {
                        info!("calibration cancelled");
                        detector.stop();
                    }
                    Calibration::Disconnected => break,
                }
            }
            ClientMessage::StopDetection => {
                info!("stop detection");
                detector.stop();
            }
            ClientMessage::ResetCount => detector.reset_count(),
        }
    }

    // capture ended: the baseline must not outlive the connection
    if detector.is_running() || detector.is_calibrated() {
        detector.stop();
    }
    let count = detector.count();
    drop(detector);

    reader_task.abort();
    if let Err(e) = writer_task.await {
        warn!("[tcp] writer task failed: {}", e);
    }
    Ok(count)
}
