use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::services::upscaler::{UpscaleError, Upscaler};

/// Small fixed-size pool for CPU-bound work.
///
/// Each slot is one blocking thread running one job step at a time. A model
/// call that outlives its timeout is abandoned by the caller but keeps its
/// slot until the computation returns, so the pool is never oversubscribed.
pub struct UpscalePool {
    upscaler: Arc<dyn Upscaler>,
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

impl UpscalePool {
    pub fn new(upscaler: Arc<dyn Upscaler>, size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            upscaler,
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    pub fn upscaler(&self) -> &dyn Upscaler {
        self.upscaler.as_ref()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on a pool slot and wait for it without a deadline.
    pub async fn run<T, F>(&self, task: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(task, None).await
    }

    /// Invoke the model on a pool slot, waiting at most the configured timeout.
    pub async fn enhance(&self, image: DynamicImage) -> Result<DynamicImage, PoolError> {
        let upscaler = self.upscaler.clone();
        self.spawn(move || upscaler.enhance(&image), Some(self.timeout))
            .await?
            .map_err(PoolError::Model)
    }

    /// Run the model once on a small synthetic image so first-job latency
    /// does not include lazy initialisation.
    pub async fn warm_up(&self) -> Result<Duration, PoolError> {
        let start = Instant::now();
        let sample = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
        }));
        self.enhance(sample).await?;
        Ok(start.elapsed())
    }

    async fn spawn<T, F>(&self, task: F, timeout: Option<Duration>) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = limit.as_secs_f64(),
                        "Model call exceeded its timeout; abandoning it, slot stays busy until it returns"
                    );
                    return Err(PoolError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| PoolError::Crashed(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("model invocation timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error(transparent)]
    Model(UpscaleError),

    #[error("processing task crashed: {0}")]
    Crashed(String),

    #[error("worker pool is closed")]
    Closed,
}
