use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use log::info;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    detection::{Detector, DetectorKind, DetectorTuning, Frame, HeuristicDetector},
    tracker::{SipQueue, SipTracker},
};

use super::loop_worker::{detection_loop, persistence_worker, DetectorSlot};

/// Owns the detection loop and its persistence worker for one capture stream.
pub struct DetectionController {
    tracker: SipTracker,
    detector: DetectorSlot,
    queue_capacity: usize,
    loop_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    session_id: Option<String>,
}

impl DetectionController {
    /// The heuristic engine is installed until [`DetectionController::start`]
    /// or [`DetectionController::swap_detector`] provides another.
    pub fn new(tracker: SipTracker) -> Self {
        let detector: Box<dyn Detector> =
            Box::new(HeuristicDetector::new(DetectorTuning::default()));
        Self {
            tracker,
            detector: Arc::new(Mutex::new(detector)),
            queue_capacity: SipQueue::DEFAULT_CAPACITY,
            loop_handle: None,
            writer_handle: None,
            cancel_token: None,
            session_id: None,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn detector_kind(&self) -> DetectorKind {
        self.lock_detector().kind()
    }

    /// Start consuming `frames` with `detector`. Returns the detection session id
    /// recorded on every sip of this run.
    pub fn start(
        &mut self,
        frames: mpsc::Receiver<Frame>,
        detector: Box<dyn Detector>,
    ) -> Result<String> {
        if self.loop_handle.is_some() {
            bail!("detection already active");
        }
        if !detector.is_available() {
            bail!("detector {} is not available", detector.kind().as_str());
        }

        {
            let mut slot = self.lock_detector();
            *slot = detector;
            self.tracker.reset_detection();
        }

        let session_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        let queue = Arc::new(SipQueue::new(self.queue_capacity));

        let writer_handle = tokio::spawn(persistence_worker(
            Arc::clone(&queue),
            self.tracker.clone(),
        ));
        let loop_handle = tokio::spawn(detection_loop(
            frames,
            Arc::clone(&self.detector),
            self.tracker.clone(),
            queue,
            session_id.clone(),
            cancel_token.clone(),
        ));

        info!(
            "detection started with {} engine (session {session_id})",
            self.detector_kind().as_str()
        );

        self.loop_handle = Some(loop_handle);
        self.writer_handle = Some(writer_handle);
        self.cancel_token = Some(cancel_token);
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// Replace the engine. The aggregator is reset under the same lock the
    /// frame loop holds, so no frame is judged half by the old engine and half
    /// by the new one.
    pub fn swap_detector(&self, detector: Box<dyn Detector>) -> Result<DetectorKind> {
        if !detector.is_available() {
            bail!("detector {} is not available", detector.kind().as_str());
        }

        let mut slot = self.lock_detector();
        let previous = slot.kind();
        *slot = detector;
        self.tracker.reset_detection();

        info!(
            "detector swapped: {} -> {}",
            previous.as_str(),
            slot.kind().as_str()
        );
        Ok(previous)
    }

    /// Cancel the loop, wait for pending writes, and reset the aggregator.
    /// Frames still buffered in the channel are discarded.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.join().await
    }

    /// Process every frame until the sender side closes, then shut down like
    /// [`DetectionController::stop`].
    pub async fn drain(&mut self) -> Result<()> {
        self.cancel_token = None;
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        let loop_result = match self.loop_handle.take() {
            Some(handle) => handle.await.context("detection loop task failed to join"),
            None => Ok(()),
        };
        let writer_result = match self.writer_handle.take() {
            Some(handle) => handle.await.context("persistence worker failed to join"),
            None => Ok(()),
        };

        {
            let _slot = self.lock_detector();
            self.tracker.reset_detection();
        }
        if let Some(session_id) = self.session_id.take() {
            info!("detection stopped (session {session_id})");
        }

        loop_result?;
        writer_result
    }

    fn lock_detector(&self) -> std::sync::MutexGuard<'_, Box<dyn Detector>> {
        match self.detector.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
