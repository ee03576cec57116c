//! Cross-batch diversity pool.
//!
//! Degradation parameters are drawn once per batch, so every sample in a batch
//! shares the same resize, noise and compression settings. The pool breaks
//! that correlation by holding recently degraded pairs and handing back a
//! random selection of them in place of each new batch once it is full.

use ndarray::{s, Array4, Axis};
use tracing::{debug, error};

use crate::error::{DegradeError, Result};
use crate::rng::RandomSource;

/// Fixed-capacity circular buffer of `(lq, gt)` pairs.
///
/// Storage is allocated lazily from the shape of the first batch. Every later
/// batch must have the same shape.
#[derive(Debug, Clone)]
pub struct DiversityPool {
    capacity: usize,
    cursor: usize,
    lq: Option<Array4<f32>>,
    gt: Option<Array4<f32>>,
    batch_shape: Option<([usize; 3], [usize; 3], usize)>,
}

impl DiversityPool {
    /// Pool holding up to `capacity` samples; `0` disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cursor: 0,
            lq: None,
            gt: None,
            batch_shape: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples currently stored.
    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.cursor == self.capacity
    }

    /// Stored `(lq, gt)` buffers, if allocated.
    pub fn stored(&self) -> Option<(&Array4<f32>, &Array4<f32>)> {
        self.lq.as_ref().zip(self.gt.as_ref())
    }

    /// Submit a batch and receive the batch to train on.
    ///
    /// Until the pool is full the submitted batch is stored and returned
    /// unchanged. Afterwards the pool is shuffled, its first `b` entries are
    /// returned, and the submitted batch takes their slots.
    pub fn exchange<R: RandomSource + ?Sized>(
        &mut self,
        lq: Array4<f32>,
        gt: Array4<f32>,
        rng: &mut R,
    ) -> Result<(Array4<f32>, Array4<f32>)> {
        if self.capacity == 0 {
            return Ok((lq, gt));
        }
        self.check_shapes(&lq, &gt)?;

        let b = lq.len_of(Axis(0));
        let (mut queue_lq, mut queue_gt) = match (self.lq.take(), self.gt.take()) {
            (Some(l), Some(g)) => (l, g),
            _ => {
                let (_, c, h, w) = lq.dim();
                let (_, gc, gh, gw) = gt.dim();
                debug!(capacity = self.capacity, batch = b, "Allocating diversity pool");
                (
                    Array4::zeros((self.capacity, c, h, w)),
                    Array4::zeros((self.capacity, gc, gh, gw)),
                )
            }
        };

        if self.cursor < self.capacity {
            let range = self.cursor..self.cursor + b;
            queue_lq.slice_mut(s![range.clone(), .., .., ..]).assign(&lq);
            queue_gt.slice_mut(s![range, .., .., ..]).assign(&gt);
            self.cursor += b;
            debug!(stored = self.cursor, capacity = self.capacity, "Enqueued batch");
            self.lq = Some(queue_lq);
            self.gt = Some(queue_gt);
            return Ok((lq, gt));
        }

        let perm = rng.permutation(self.capacity);
        queue_lq = queue_lq.select(Axis(0), &perm);
        queue_gt = queue_gt.select(Axis(0), &perm);

        let out_lq = queue_lq.slice(s![0..b, .., .., ..]).to_owned();
        let out_gt = queue_gt.slice(s![0..b, .., .., ..]).to_owned();
        queue_lq.slice_mut(s![0..b, .., .., ..]).assign(&lq);
        queue_gt.slice_mut(s![0..b, .., .., ..]).assign(&gt);
        debug!(batch = b, "Exchanged batch with shuffled pool");

        self.lq = Some(queue_lq);
        self.gt = Some(queue_gt);
        Ok((out_lq, out_gt))
    }

    /// Validate divisibility on first use and shape consistency afterwards.
    fn check_shapes(&mut self, lq: &Array4<f32>, gt: &Array4<f32>) -> Result<()> {
        let (b, c, h, w) = lq.dim();
        let (gb, gc, gh, gw) = gt.dim();
        let lq_shape = [c, h, w];
        let gt_shape = [gc, gh, gw];

        match self.batch_shape {
            None => {
                if b == 0 || self.capacity % b != 0 {
                    error!(capacity = self.capacity, batch = b, "Pool capacity not divisible by batch size");
                    return Err(DegradeError::PoolBatchMismatch {
                        capacity: self.capacity,
                        batch: b,
                    });
                }
                if gb != b {
                    return Err(DegradeError::PoolShapeMismatch {
                        expected: [b, gc, gh, gw],
                        actual: [gb, gc, gh, gw],
                    });
                }
                self.batch_shape = Some((lq_shape, gt_shape, b));
                Ok(())
            }
            Some((expected_lq, expected_gt, expected_b)) => {
                if b != expected_b || lq_shape != expected_lq {
                    return Err(DegradeError::PoolShapeMismatch {
                        expected: [expected_b, expected_lq[0], expected_lq[1], expected_lq[2]],
                        actual: [b, c, h, w],
                    });
                }
                if gb != expected_b || gt_shape != expected_gt {
                    return Err(DegradeError::PoolShapeMismatch {
                        expected: [expected_b, expected_gt[0], expected_gt[1], expected_gt[2]],
                        actual: [gb, gc, gh, gw],
                    });
                }
                Ok(())
            }
        }
    }
}
