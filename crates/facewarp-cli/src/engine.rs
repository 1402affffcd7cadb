use facewarp_core::raster::{self, RasterError};
use facewarp_core::{AlignError, Alignment, PointSet, SimilarityAligner, Size};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const WORKER_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread exited")]
    ChannelClosed,
}

/// How a job obtains its transform.
#[derive(Debug, Clone)]
pub enum Fit {
    /// Solve from this image's own landmarks.
    Landmarks(PointSet),
    /// Reuse a transform fitted elsewhere (e.g. across a whole clip).
    Shared(Alignment),
}

/// Align one image file and write the crop.
#[derive(Debug, Clone)]
pub struct AlignJob {
    pub image: PathBuf,
    pub output: PathBuf,
    pub fit: Fit,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub output: PathBuf,
    pub alignment: Alignment,
}

struct EngineRequest {
    job: AlignJob,
    reply: oneshot::Sender<Result<JobResult, EngineError>>,
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    workers: Arc<[mpsc::Sender<EngineRequest>]>,
    next: Arc<AtomicUsize>,
}

impl EngineHandle {
    /// Queue a job on the next worker and await its result.
    pub async fn align(&self, job: AlignJob) -> Result<JobResult, EngineError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.workers[idx]
            .send(EngineRequest {
                job,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Spawn `workers` dedicated OS threads that align jobs against `target`.
///
/// Workers exit once every handle has been dropped.
pub fn spawn_engine(
    workers: usize,
    aligner: SimilarityAligner,
    target: PointSet,
    output_size: Size,
) -> Result<EngineHandle, EngineError> {
    let workers = workers.max(1);
    let target = Arc::new(target);
    let mut senders = Vec::with_capacity(workers);

    for id in 0..workers {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(WORKER_QUEUE_DEPTH);
        let target = Arc::clone(&target);

        std::thread::Builder::new()
            .name(format!("facewarp-worker-{id}"))
            .spawn(move || {
                tracing::debug!(worker = id, "worker thread started");
                while let Some(req) = rx.blocking_recv() {
                    let result = run_job(&aligner, &target, output_size, req.job);
                    let _ = req.reply.send(result);
                }
                tracing::debug!(worker = id, "worker thread exiting");
            })?;

        senders.push(tx);
    }

    tracing::info!(workers, size = %output_size, "alignment workers started");
    Ok(EngineHandle {
        workers: senders.into(),
        next: Arc::new(AtomicUsize::new(0)),
    })
}

fn run_job(
    aligner: &SimilarityAligner,
    target: &PointSet,
    output_size: Size,
    job: AlignJob,
) -> Result<JobResult, EngineError> {
    let source = image::open(&job.image)?;
    let raster = raster::from_dynamic(&source)?;

    let alignment = match job.fit {
        Fit::Landmarks(landmarks) => aligner.solve(&landmarks, target)?,
        Fit::Shared(alignment) => alignment,
    };

    let warped = aligner.warp(raster.view(), &alignment.forward, output_size)?;
    raster::to_dynamic(&warped)?.save(&job.output)?;

    tracing::debug!(
        input = %job.image.display(),
        output = %job.output.display(),
        reflected = alignment.reflected,
        residual = alignment.residual,
        "aligned"
    );

    Ok(JobResult {
        output: job.output,
        alignment,
    })
}
