//! Synthetic frame producer feeding mock input surfaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Frame, PlatformShared};
use crate::error::StreamError;
use crate::platform::{StreamSource, SurfaceId};

#[derive(Debug, Clone, Copy, Default)]
struct StreamParams {
    resolution: Option<(u32, u32)>,
    frame_rate: Option<u32>,
    frame_count: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Production {
    width: u32,
    height: u32,
    frame_count: u32,
    frame_interval: Duration,
    frame_duration_us: u64,
}

/// Pushes `frame_count` frames into a surface at `1/frame_rate`, then an
/// end-of-stream frame.
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    shared: Arc<PlatformShared>,
    params: Arc<Mutex<StreamParams>>,
    running: Arc<Mutex<HashMap<SurfaceId, JoinHandle<()>>>>,
    time_scale: f64,
}

impl SyntheticStream {
    pub(crate) fn new(shared: Arc<PlatformShared>) -> Self {
        Self {
            shared,
            params: Arc::new(Mutex::new(StreamParams::default())),
            running: Arc::new(Mutex::new(HashMap::new())),
            time_scale: 1.0,
        }
    }

    pub(crate) fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Whether production into `surface` is still in progress.
    pub fn is_streaming(&self, surface: &SurfaceId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(surface)
            .is_some_and(|task| !task.is_finished())
    }

    fn production(&self) -> Result<Production, StreamError> {
        let params = *self.params.lock().unwrap_or_else(|e| e.into_inner());
        let (width, height) = params
            .resolution
            .ok_or(StreamError::NotConfigured("resolution"))?;
        let frame_rate = params
            .frame_rate
            .filter(|rate| *rate > 0)
            .ok_or(StreamError::NotConfigured("frame_rate"))?;
        let frame_count = params
            .frame_count
            .ok_or(StreamError::NotConfigured("frame_count"))?;

        let frame_duration = Duration::from_secs(1) / frame_rate;
        Ok(Production {
            width,
            height,
            frame_count,
            frame_interval: frame_duration.mul_f64(self.time_scale),
            frame_duration_us: frame_duration.as_micros() as u64,
        })
    }
}

async fn pace(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

async fn produce(shared: Arc<PlatformShared>, surface: SurfaceId, production: Production) {
    for seq in 0..production.frame_count {
        pace(production.frame_interval).await;
        let frame = Frame::Data {
            payload: format!(
                "{}x{} frame {seq}\n",
                production.width, production.height
            )
            .into_bytes(),
            pts_us: u64::from(seq) * production.frame_duration_us,
        };
        if !shared.deliver(&surface, frame) {
            debug!(surface = %surface, seq, "surface detached, ending stream");
            return;
        }
    }

    pace(production.frame_interval).await;
    let pts_us = u64::from(production.frame_count) * production.frame_duration_us;
    if shared.deliver(&surface, Frame::EndOfStream { pts_us }) {
        debug!(surface = %surface, frames = production.frame_count, "stream reached EOS");
    }
}

impl StreamSource for SyntheticStream {
    fn set_resolution(&self, width: u32, height: u32) {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolution = Some((width, height));
    }

    fn set_frame_rate(&self, frame_rate: u32) {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frame_rate = Some(frame_rate);
    }

    fn set_frame_count(&self, frame_count: u32) {
        self.params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frame_count = Some(frame_count);
    }

    fn start_stream(&self, surface: &SurfaceId) -> Result<(), StreamError> {
        if !self.shared.is_attached(surface) {
            return Err(StreamError::UnknownSurface(surface.to_string()));
        }
        let production = self.production()?;

        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running
            .get(surface)
            .is_some_and(|task| !task.is_finished())
        {
            debug!(surface = %surface, "stream already running, ignoring start");
            return Ok(());
        }

        info!(
            surface = %surface,
            frames = production.frame_count,
            interval_us = production.frame_interval.as_micros() as u64,
            "starting synthetic stream"
        );
        let task = tokio::spawn(produce(
            Arc::clone(&self.shared),
            surface.clone(),
            production,
        ));
        running.insert(surface.clone(), task);
        Ok(())
    }

    fn close_stream(&self, surface: &SurfaceId) {
        let task = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(surface);
        if let Some(task) = task {
            task.abort();
            debug!(surface = %surface, "stream closed");
        }
    }
}
