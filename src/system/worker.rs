//! Pose worker: geometric matching and pose estimation.
//!
//! [`WorkerState`] holds the worker's own copy of the matching data and
//! answers requests. It runs either on a dedicated thread behind
//! [`WorkerClient`] or directly on the caller's thread via [`InlineBackend`].

use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::debug::MatchDebug;
use crate::estimation::PoseEstimator;
use crate::matching::Matcher;
use crate::target::Keyframe;

use super::messages::{MatchOutcome, WorkerRequest, WorkerResponse, WorkerSetup};

/// Capacity of both worker channels.
const WORKER_CHANNEL_CAPACITY: usize = 4;

/// Poll interval of the worker loop.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Matching side of the pipeline.
pub trait PoseBackend: Send {
    /// Hand the matching data to the backend. Fire-and-forget.
    fn setup(&mut self, setup: WorkerSetup) -> Result<()>;

    /// Issue a request and wait for its response. `Ok(None)` when the
    /// response did not arrive in time; it will be discarded if it shows up
    /// later.
    fn request(&mut self, request: WorkerRequest) -> Result<Option<WorkerResponse>>;
}

/// Worker-side state.
#[derive(Debug, Default)]
pub struct WorkerState {
    targets: Vec<Vec<Keyframe>>,
    matcher: Option<Matcher>,
    estimator: Option<PoseEstimator>,
    debug: bool,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer one request. `Setup` and `Shutdown` produce no response.
    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::Setup(setup) => {
                info!(targets = setup.targets.len(), "worker setup");
                self.matcher = Some(Matcher::new(setup.query_width, setup.query_height, setup.matcher));
                self.estimator = Some(PoseEstimator::new(setup.camera, setup.refine));
                self.targets = setup.targets;
                self.debug = setup.debug;
                None
            }
            WorkerRequest::Match { tag, points, candidates } => {
                let (result, debug) = self.match_candidates(&points, &candidates);
                Some(WorkerResponse::Matched { tag, result, debug })
            }
            WorkerRequest::RefinePose {
                tag,
                prior,
                correspondences,
            } => {
                let pose = self.estimator.as_ref().and_then(|e| e.refine(&prior, &correspondences));
                Some(WorkerResponse::Refined { tag, pose })
            }
            WorkerRequest::Shutdown => None,
        }
    }

    /// First candidate that matches and yields a pose wins.
    fn match_candidates(
        &self,
        points: &[crate::detector::FeaturePoint],
        candidates: &[usize],
    ) -> (Option<MatchOutcome>, Vec<MatchDebug>) {
        let mut debug = Vec::new();
        let (Some(matcher), Some(estimator)) = (&self.matcher, &self.estimator) else {
            warn!("match request before setup");
            return (None, debug);
        };

        for &target_index in candidates {
            let Some(keyframes) = self.targets.get(target_index) else {
                continue;
            };
            let mut stats = MatchDebug {
                target_index,
                ..Default::default()
            };
            let found = matcher.match_detection(keyframes, points, self.debug.then_some(&mut stats));
            if self.debug {
                debug.push(stats);
            }
            let Some(found) = found else {
                continue;
            };
            let Some(pose) = estimator.estimate(&found.correspondences) else {
                debug!(target_index, "matched but pose estimation failed");
                continue;
            };
            return (
                Some(MatchOutcome {
                    target_index,
                    keyframe_index: found.keyframe_index,
                    pose,
                }),
                debug,
            );
        }
        (None, debug)
    }
}

/// Same-thread backend.
#[derive(Debug, Default)]
pub struct InlineBackend {
    state: WorkerState,
}

impl InlineBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PoseBackend for InlineBackend {
    fn setup(&mut self, setup: WorkerSetup) -> Result<()> {
        self.state.handle(WorkerRequest::Setup(Box::new(setup)));
        Ok(())
    }

    fn request(&mut self, request: WorkerRequest) -> Result<Option<WorkerResponse>> {
        Ok(self.state.handle(request))
    }
}

/// Handle to the worker thread.
pub struct WorkerClient {
    requests: Sender<WorkerRequest>,
    responses: Receiver<WorkerResponse>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn the worker thread.
    pub fn spawn(timeout: Duration) -> Result<Self> {
        let (req_tx, req_rx) = bounded::<WorkerRequest>(WORKER_CHANNEL_CAPACITY);
        let (resp_tx, resp_rx) = bounded::<WorkerResponse>(WORKER_CHANNEL_CAPACITY);
        let handle = thread::Builder::new()
            .name("artrack-worker".into())
            .spawn(move || run(req_rx, resp_tx))
            .context("failed to spawn pose worker")?;
        Ok(Self::with_channels(req_tx, resp_rx, Some(handle), timeout))
    }

    fn with_channels(
        requests: Sender<WorkerRequest>,
        responses: Receiver<WorkerResponse>,
        handle: Option<JoinHandle<()>>,
        timeout: Duration,
    ) -> Self {
        Self {
            requests,
            responses,
            handle,
            timeout,
        }
    }

    /// Stop the worker and wait for it. Unread responses are discarded so
    /// the worker is never left blocked on a full channel.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        loop {
            let dropped = self.responses.try_iter().count();
            if dropped > 0 {
                debug!(dropped, "discarding unread worker responses");
            }
            match self.requests.send_timeout(WorkerRequest::Shutdown, RECV_TIMEOUT) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => break,
                Err(SendTimeoutError::Timeout(_)) => continue,
            }
        }
        if handle.join().is_err() {
            warn!("pose worker panicked");
        }
    }
}

impl PoseBackend for WorkerClient {
    fn setup(&mut self, setup: WorkerSetup) -> Result<()> {
        self.requests
            .send(WorkerRequest::Setup(Box::new(setup)))
            .context("pose worker is gone")
    }

    fn request(&mut self, request: WorkerRequest) -> Result<Option<WorkerResponse>> {
        let id = match &request {
            WorkerRequest::Match { tag, .. } | WorkerRequest::RefinePose { tag, .. } => tag.id,
            WorkerRequest::Setup(_) | WorkerRequest::Shutdown => bail!("request has no response"),
        };
        self.requests.send(request).context("pose worker is gone")?;

        loop {
            match self.responses.recv_timeout(self.timeout) {
                Ok(response) if response.tag().id == id => return Ok(Some(response)),
                Ok(response) => {
                    debug!(stale = response.tag().id, expected = id, "dropping stale worker response");
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(id, "pose worker timed out");
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => bail!("pose worker disconnected"),
            }
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread loop.
fn run(requests: Receiver<WorkerRequest>, responses: Sender<WorkerResponse>) {
    let mut state = WorkerState::new();
    info!("pose worker started");
    loop {
        match requests.recv_timeout(RECV_TIMEOUT) {
            Ok(WorkerRequest::Shutdown) => break,
            Ok(request) => {
                let Some(response) = state.handle(request) else {
                    continue;
                };
                match responses.send_timeout(response, RECV_TIMEOUT) {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(response)) => {
                        debug!(id = response.tag().id, "response channel full, dropping response");
                    }
                    Err(SendTimeoutError::Disconnected(_)) => break,
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("pose worker stopped");
}
