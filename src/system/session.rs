//! Session: the public entry point of the tracking engine.
//!
//! The session owns the loaded targets and, while tracking, a loop thread
//! that pulls frames from a [`FrameSource`], drives the [`Controller`] and
//! delivers [`TrackingEvent`]s to the registered callbacks.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::compiler::container;
use crate::config::SessionConfig;
use crate::image::GreyImage;
use crate::io::FrameSource;
use crate::target::Target;
use crate::tracking::result::TrackingEvent;

use super::controller::Controller;
use super::shared_state::{SessionStatus, SharedState};
use super::worker::{InlineBackend, PoseBackend, WorkerClient};

type Listener = Box<dyn FnMut(&TrackingEvent) + Send>;

/// Callbacks shared with the loop thread; they stay registered across runs.
type Listeners = Arc<Mutex<Vec<Listener>>>;

pub struct Session {
    config: SessionConfig,
    targets: Vec<Target>,
    listeners: Listeners,
    /// Controller prepared by `warm_up`, reused by `start_tracking` when the
    /// frame size matches.
    prepared: Option<Controller>,
    shared: Arc<SharedState>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let shared = SharedState::new();
        shared.set_interested_target(config.interested_target);
        Self {
            config,
            targets: Vec::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            prepared: None,
            shared,
            handle: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Load targets from a compiled container and return their dimensions.
    ///
    /// The container is validated as a whole; on error nothing is added.
    pub fn add_targets(&mut self, bytes: &[u8]) -> Result<Vec<(usize, usize)>> {
        if self.is_running() {
            bail!("cannot add targets while tracking");
        }
        let targets = container::decode(bytes).context("failed to load targets")?;
        let dims = targets.iter().map(Target::dimensions).collect();
        info!(added = targets.len(), total = self.targets.len() + targets.len(), "targets loaded");
        self.targets.extend(targets);
        self.prepared = None;
        Ok(dims)
    }

    pub fn add_targets_from_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<(usize, usize)>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        self.add_targets(&bytes)
    }

    /// Register an event callback. Callbacks run on the loop thread and stay
    /// registered for later runs.
    pub fn on_update(&mut self, listener: impl FnMut(&TrackingEvent) + Send + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Restrict acquisition to one target, or lift the restriction.
    pub fn set_interested_target(&mut self, target: Option<usize>) {
        self.config.interested_target = target;
        self.shared.set_interested_target(target);
    }

    /// Synthesize every kernel plan for frames shaped like `frame`.
    pub fn warm_up(&mut self, frame: &GreyImage) -> Result<()> {
        let controller = self.controller_for(frame.width, frame.height)?;
        controller.warm_up(frame)
    }

    /// Start the tracking loop on its own thread.
    pub fn start_tracking<S: FrameSource + 'static>(&mut self, mut source: S) -> Result<()> {
        if self.is_running() {
            bail!("tracking already started");
        }
        if self.targets.is_empty() {
            bail!("no targets loaded");
        }
        let (width, height) = source.dimensions();
        self.controller_for(width, height)?;
        let mut controller = self.prepared.take().ok_or_else(|| anyhow!("controller unavailable"))?;
        let listeners = Arc::clone(&self.listeners);
        let shared = Arc::clone(&self.shared);

        shared.set_running(true);
        let handle = thread::Builder::new().name("artrack-loop".into()).spawn(move || {
            let result = (|| -> Result<()> {
                loop {
                    if shared.is_stop_requested() {
                        info!("tracking stopped");
                        break;
                    }
                    let Some(frame) = source.next_frame()? else {
                        info!("frame source exhausted");
                        break;
                    };
                    controller.set_interested_target(shared.interested_target());
                    let events = controller.process_frame(&frame.image, frame.timestamp_ns as f64 / 1e6)?;
                    shared.publish(controller.status());
                    let mut listeners = listeners.lock();
                    for event in &events {
                        for listener in listeners.iter_mut() {
                            listener(event);
                        }
                    }
                }
                Ok(())
            })();
            shared.set_running(false);
            result
        });
        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_running(false);
                Err(e).context("failed to spawn tracking loop")
            }
        }
    }

    /// Ask the loop to stop after the current frame and wait for it.
    pub fn stop_tracking(&mut self) -> Result<()> {
        self.shared.request_stop();
        self.wait()
    }

    /// Wait for the loop to end on its own (source exhausted or error).
    pub fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => bail!("tracking loop panicked"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Latest per-slot status published by the loop.
    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    fn controller_for(&mut self, width: usize, height: usize) -> Result<&mut Controller> {
        let reusable = self
            .prepared
            .as_ref()
            .is_some_and(|c| c.dimensions() == (width, height) && c.num_targets() == self.targets.len());
        if !reusable {
            let backend: Box<dyn PoseBackend> = if self.config.inline_worker {
                Box::new(InlineBackend::new())
            } else {
                Box::new(WorkerClient::spawn(self.config.worker_timeout())?)
            };
            self.prepared = Some(Controller::new(&self.config, width, height, &self.targets, backend)?);
        }
        self.prepared.as_mut().ok_or_else(|| anyhow!("controller unavailable"))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop_tracking() {
            warn!("tracking loop ended with error: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_target;
    use crate::geometry::{CameraModel, ModelViewTransform};
    use crate::io::MemorySource;
    use crate::test_support::{textured_image, warp_with_pose};
    use nalgebra::{Matrix3, Vector3};

    fn container_bytes(image: &GreyImage) -> Vec<u8> {
        container::encode(&[compile_target(image)]).unwrap()
    }

    #[test]
    fn test_add_targets_reports_dimensions() {
        let mut session = Session::new(SessionConfig::default());
        let dims = session.add_targets(&container_bytes(&textured_image(160, 120, 2))).unwrap();
        assert_eq!(dims, vec![(160, 120)]);
        assert!(session.add_targets(b"not a container").is_err());
        assert_eq!(session.targets().len(), 1);
    }

    #[test]
    fn test_start_without_targets_fails() {
        let mut session = Session::new(SessionConfig::default());
        let source = MemorySource::new(64, 48, Vec::new(), 1);
        assert!(session.start_tracking(source).is_err());
    }

    #[test]
    fn test_tracking_loop_delivers_events() {
        let image = textured_image(256, 256, 51);
        let mut session = Session::new(SessionConfig {
            warmup_tolerance: 1,
            ..Default::default()
        });
        session.add_targets(&container_bytes(&image)).unwrap();

        let cam = CameraModel::from_resolution(640, 480);
        let truth = ModelViewTransform::from_parts(&Matrix3::identity(), &Vector3::new(-128.0, -128.0, cam.fx));
        let frame = warp_with_pose(&image, &cam, &truth, 640, 480, 0.0);
        session.warm_up(&frame).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.on_update(move |e| sink.lock().push(e.clone()));

        let source = MemorySource::new(640, 480, vec![frame; 5], 33_000_000);
        session.start_tracking(source).unwrap();
        session.wait().unwrap();

        let events = events.lock();
        assert_eq!(events.iter().filter(|e| e.is_frame_done()).count(), 5);
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackingEvent::PoseUpdated { target_index: 0, pose: Some(_) })));
        assert_eq!(session.status().frames_processed, 5);
        assert!(!session.is_running());
    }

    #[test]
    fn test_listeners_survive_restart() {
        let mut session = Session::new(SessionConfig {
            inline_worker: true,
            ..Default::default()
        });
        session.add_targets(&container_bytes(&textured_image(128, 128, 6))).unwrap();

        let frames_done = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&frames_done);
        session.on_update(move |e| {
            if e.is_frame_done() {
                *sink.lock() += 1;
            }
        });

        let blank = GreyImage::filled(320, 240, 90.0);
        for run in 1..=2 {
            let source = MemorySource::new(320, 240, vec![blank.clone(); 2], 33_000_000);
            session.start_tracking(source).unwrap();
            session.wait().unwrap();
            assert_eq!(*frames_done.lock(), 2 * run);
        }
        assert_eq!(session.status().frames_processed, 2);
    }

    #[test]
    fn test_stop_tracking_is_idempotent() {
        let mut session = Session::new(SessionConfig::default());
        session.stop_tracking().unwrap();
        session.stop_tracking().unwrap();
    }
}
