//! Mini-batch assembly and bounded prefetching.
//!
//! Worker threads only read the [`SampleStore`]; they never see model state.
//! The queue between workers and the training thread is a bounded
//! `sync_channel`, so producers block once `prefetch_batches` batches wait.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::samples::subsample;
use super::store::SampleStore;
use crate::cancel::CancellationToken;
use crate::error::{DeepSdfError, Result};

/// Host-side mini-batch.
///
/// Rows are grouped by shape: rows `[i * samples_per_scene, (i + 1) * samples_per_scene)`
/// belong to `shape_ids[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Shape id per scene.
    pub shape_ids: Vec<usize>,
    /// Label per scene.
    pub labels: Vec<f32>,
    /// Rows per scene.
    pub samples_per_scene: usize,
    /// Coordinates, `[rows * 3]` row-major.
    pub xyz: Vec<f32>,
    /// Signed distances, `[rows]`.
    pub sdf: Vec<f32>,
}

impl SampleBatch {
    /// Subsample every shape in `shape_ids` from `store`.
    pub fn from_store<R: Rng + ?Sized>(
        store: &dyn SampleStore,
        shape_ids: &[usize],
        samples_per_scene: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let rows = shape_ids.len() * samples_per_scene;
        let mut xyz = Vec::with_capacity(rows * 3);
        let mut sdf = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(shape_ids.len());

        for &id in shape_ids {
            let samples = store.samples(id)?;
            let drawn = subsample(&samples, samples_per_scene, rng);
            if drawn.len() != samples_per_scene {
                return Err(DeepSdfError::InvalidData(format!(
                    "shape {} ({}) has no samples",
                    id,
                    store.name(id).unwrap_or("?")
                )));
            }
            for row in drawn {
                xyz.extend_from_slice(&row[..3]);
                sdf.push(row[3]);
            }
            labels.push(store.label(id));
        }

        Ok(Self {
            shape_ids: shape_ids.to_vec(),
            labels,
            samples_per_scene,
            xyz,
            sdf,
        })
    }

    /// Number of scenes.
    pub fn num_scenes(&self) -> usize {
        self.shape_ids.len()
    }

    /// Number of sample rows.
    pub fn num_rows(&self) -> usize {
        self.sdf.len()
    }

    /// Cut into `parts` contiguous sub-batches of whole scenes.
    pub fn split(&self, parts: usize) -> Result<Vec<SampleBatch>> {
        if parts == 0 || self.num_scenes() % parts != 0 {
            return Err(DeepSdfError::config(format!(
                "cannot split {} scenes into {} sub-batches",
                self.num_scenes(),
                parts
            )));
        }
        let scenes = self.num_scenes() / parts;
        let rows = scenes * self.samples_per_scene;

        Ok((0..parts)
            .map(|p| SampleBatch {
                shape_ids: self.shape_ids[p * scenes..(p + 1) * scenes].to_vec(),
                labels: self.labels[p * scenes..(p + 1) * scenes].to_vec(),
                samples_per_scene: self.samples_per_scene,
                xyz: self.xyz[p * rows * 3..(p + 1) * rows * 3].to_vec(),
                sdf: self.sdf[p * rows..(p + 1) * rows].to_vec(),
            })
            .collect())
    }
}

/// Shuffled shape ids of one epoch, chunked into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochPlan {
    batches: Vec<Vec<usize>>,
}

impl EpochPlan {
    /// Shuffle `0..num_shapes` and chunk it; an incomplete last chunk is dropped.
    pub fn shuffled<R: Rng + ?Sized>(num_shapes: usize, scenes_per_batch: usize, rng: &mut R) -> Self {
        let mut ids: Vec<usize> = (0..num_shapes).collect();
        ids.shuffle(rng);
        let batches = ids
            .chunks_exact(scenes_per_batch.max(1))
            .map(<[usize]>::to_vec)
            .collect();
        Self { batches }
    }

    /// Batches in order.
    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Loader settings.
#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig {
    /// Rows drawn per shape.
    pub samples_per_scene: usize,
    /// Worker threads; 0 loads on the calling thread.
    pub num_workers: usize,
    /// Queue capacity.
    pub prefetch_batches: usize,
    /// Base seed; each batch derives its own generator from it.
    pub seed: u64,
}

fn batch_rng(seed: u64, batch: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (batch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

enum Source {
    Inline {
        store: Arc<dyn SampleStore>,
        plan: EpochPlan,
        next: usize,
    },
    Workers {
        receiver: Receiver<(usize, Result<SampleBatch>)>,
        handles: Vec<JoinHandle<()>>,
        pending: Vec<Option<Result<SampleBatch>>>,
        next: usize,
        total: usize,
    },
}

/// Iterator over the batches of one epoch, in plan order.
///
/// Each batch is drawn with its own seeded generator, so the result does not
/// depend on the number of workers. Dropping the loader stops the workers,
/// drains the queue and joins the threads. A worker that dies without
/// delivering its batches surfaces as an error item, not a shorter epoch.
pub struct BatchLoader {
    source: Source,
    config: LoaderConfig,
    stop: CancellationToken,
    cancel: CancellationToken,
}

impl BatchLoader {
    /// Start loading the batches of `plan`.
    pub fn spawn(
        store: Arc<dyn SampleStore>,
        plan: EpochPlan,
        config: LoaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();

        if config.num_workers == 0 {
            return Self {
                source: Source::Inline {
                    store,
                    plan,
                    next: 0,
                },
                config,
                stop,
                cancel,
            };
        }

        let total = plan.len();
        let (sender, receiver) = sync_channel(config.prefetch_batches.max(1));
        let num_workers = config.num_workers.min(total.max(1));
        let handles = (0..num_workers)
            .map(|worker| {
                let assigned: Vec<(usize, Vec<usize>)> = plan
                    .batches()
                    .iter()
                    .enumerate()
                    .filter(|(b, _)| b % num_workers == worker)
                    .map(|(b, ids)| (b, ids.clone()))
                    .collect();
                let ctx = WorkerContext {
                    store: Arc::clone(&store),
                    sender: sender.clone(),
                    stop: stop.clone(),
                    cancel: cancel.clone(),
                    config,
                };
                std::thread::spawn(move || ctx.run(assigned))
            })
            .collect();

        Self {
            source: Source::Workers {
                receiver,
                handles,
                pending: (0..total).map(|_| None).collect(),
                next: 0,
                total,
            },
            config,
            stop,
            cancel,
        }
    }

    /// Stop the workers and join them, failing if any of them panicked.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.cancel();
        let mut panicked = 0usize;
        if let Source::Workers {
            receiver, handles, ..
        } = &mut self.source
        {
            let mut drained = 0usize;
            while receiver.recv().is_ok() {
                drained += 1;
            }
            for handle in handles.drain(..) {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }
            if drained > 0 {
                log::debug!("discarded {} prefetched batches", drained);
            }
        }
        if panicked > 0 {
            return Err(DeepSdfError::InvalidData(format!(
                "{panicked} sample loader worker(s) panicked"
            )));
        }
        Ok(())
    }
}

impl Iterator for BatchLoader {
    type Item = Result<SampleBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Inline { store, plan, next } => {
                let ids = plan.batches().get(*next)?;
                let mut rng = batch_rng(self.config.seed, *next);
                *next += 1;
                Some(SampleBatch::from_store(
                    store.as_ref(),
                    ids,
                    self.config.samples_per_scene,
                    &mut rng,
                ))
            }
            Source::Workers {
                receiver,
                pending,
                next,
                total,
                ..
            } => {
                if *next >= *total {
                    return None;
                }
                while pending[*next].is_none() {
                    match receiver.recv() {
                        Ok((index, batch)) => pending[index] = Some(batch),
                        Err(_) => {
                            // Every worker is gone but batches are still owed.
                            let missing = *total - *next;
                            *next = *total;
                            if self.cancel.is_cancelled() || self.stop.is_cancelled() {
                                return None;
                            }
                            return Some(Err(DeepSdfError::InvalidData(format!(
                                "sample loader worker exited early, {missing} batches missing"
                            ))));
                        }
                    }
                }
                let batch = pending[*next].take();
                *next += 1;
                batch
            }
        }
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}

struct WorkerContext {
    store: Arc<dyn SampleStore>,
    sender: SyncSender<(usize, Result<SampleBatch>)>,
    stop: CancellationToken,
    cancel: CancellationToken,
    config: LoaderConfig,
}

impl WorkerContext {
    fn run(self, assigned: Vec<(usize, Vec<usize>)>) {
        for (index, ids) in assigned {
            if self.stop.is_cancelled() || self.cancel.is_cancelled() {
                break;
            }
            let mut rng = batch_rng(self.config.seed, index);
            let batch = SampleBatch::from_store(
                self.store.as_ref(),
                &ids,
                self.config.samples_per_scene,
                &mut rng,
            );
            let failed = batch.is_err();
            if self.sender.send((index, batch)).is_err() || failed {
                break;
            }
        }
    }
}
