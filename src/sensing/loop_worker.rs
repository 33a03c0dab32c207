use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    detection::{Detector, Frame},
    tracker::{PendingSip, SipQueue, SipTracker},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub type DetectorSlot = Arc<Mutex<Box<dyn Detector>>>;

/// Single ordered consumer of the frame stream.
///
/// Frames are processed strictly in arrival order. Confirmed sips are handed to
/// `queue`; this loop never waits on storage. The queue is closed on exit so
/// the persistence worker can drain and stop.
pub async fn detection_loop(
    mut frames: mpsc::Receiver<Frame>,
    detector: DetectorSlot,
    tracker: SipTracker,
    queue: Arc<SipQueue>,
    session_id: String,
    cancel_token: CancellationToken,
) {
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("detection loop cancelled after {processed} frames (session {session_id})");
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    log_info!("frame source closed after {processed} frames (session {session_id})");
                    break;
                };
                processed += 1;
                process_frame(&frame, &detector, &tracker, &queue, &session_id);
            }
        }
    }

    queue.close();
}

fn process_frame(
    frame: &Frame,
    detector: &DetectorSlot,
    tracker: &SipTracker,
    queue: &SipQueue,
    session_id: &str,
) {
    // Held across detect + observe so a detector swap cannot interleave.
    let (confirmed, kind) = {
        let mut engine = match detector.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let signal = engine.detect(frame);
        (tracker.observe(&signal), engine.kind())
    };

    let Some(sip) = confirmed else {
        return;
    };

    log_debug!(
        "sip confirmed at {} (confidence {:.2})",
        sip.timestamp.to_rfc3339(),
        sip.confidence
    );

    let pending = PendingSip {
        sip,
        detector: Some(kind),
        session_id: Some(session_id.to_string()),
    };

    if let Some(dropped) = queue.push(pending) {
        log_warn!(
            "sip write queue full, dropping sip at {}",
            dropped.sip.timestamp.to_rfc3339()
        );
        tracker.report_dropped("write queue full");
    }
}

/// Drains confirmed sips into storage until the queue is closed and empty.
pub async fn persistence_worker(queue: Arc<SipQueue>, tracker: SipTracker) {
    let mut written: u64 = 0;
    while let Some(pending) = queue.pop().await {
        if tracker.record_auto_sip(pending).await.is_some() {
            written += 1;
        }
    }
    log_info!("persistence worker finished ({written} sips written)");
}
