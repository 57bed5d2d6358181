//! Ragged containers for batches where every environment owns a different
//! number of items.
//!
//! A [`RaggedBuffer`] stores `size0` sequences. Sequence `i` holds `size1[i]`
//! items and every item is `features` scalars wide. Data lives in one flat,
//! row-major vector so it can be handed to `tch` without copying item by item.

use std::ops::Add;

use crate::error::HeadError;

#[derive(Debug, Clone, PartialEq)]
pub struct RaggedBuffer<T> {
    data: Vec<T>,
    lengths: Vec<usize>,
    features: usize,
}

impl<T: Copy> RaggedBuffer<T> {
    /// Creates an empty buffer with no sequences.
    pub fn new(features: usize) -> Self {
        Self {
            data: Vec::new(),
            lengths: Vec::new(),
            features,
        }
    }

    /// Builds a buffer from one flat slice per sequence.
    /// Each slice must contain a whole number of items.
    pub fn from_sequences(features: usize, sequences: &[Vec<T>]) -> Result<Self, HeadError> {
        let mut buffer = Self::new(features);
        for seq in sequences {
            buffer.push_sequence(seq)?;
        }
        Ok(buffer)
    }

    /// Builds a buffer from already flattened data and per-sequence item counts.
    pub fn from_flattened(
        features: usize,
        data: Vec<T>,
        lengths: Vec<usize>,
    ) -> Result<Self, HeadError> {
        let items: usize = lengths.iter().sum();
        if data.len() != items * features {
            return Err(HeadError::RaggedShape(format!(
                "{} scalars cannot hold {items} items of width {features}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            lengths,
            features,
        })
    }

    /// Appends a new sequence.
    pub fn push_sequence(&mut self, seq: &[T]) -> Result<(), HeadError> {
        if self.features == 0 {
            if !seq.is_empty() {
                return Err(HeadError::RaggedShape(
                    "cannot push scalars into a zero-width buffer".into(),
                ));
            }
            self.lengths.push(0);
            return Ok(());
        }
        if seq.len() % self.features != 0 {
            return Err(HeadError::RaggedShape(format!(
                "sequence of {} scalars is not a multiple of item width {}",
                seq.len(),
                self.features
            )));
        }
        self.data.extend_from_slice(seq);
        self.lengths.push(seq.len() / self.features);
        Ok(())
    }

    /// Number of sequences.
    pub fn size0(&self) -> usize {
        self.lengths.len()
    }

    /// Number of items in each sequence.
    pub fn size1(&self) -> Vec<i64> {
        self.lengths.iter().map(|&l| l as i64).collect()
    }

    /// Width of every item.
    pub fn features(&self) -> usize {
        self.features
    }

    /// Total number of items across all sequences.
    pub fn items(&self) -> usize {
        self.lengths.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items() == 0
    }

    /// Flat view of sequence `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size0()`.
    pub fn sequence(&self, index: usize) -> &[T] {
        let start: usize = self.lengths[..index].iter().sum::<usize>() * self.features;
        let end = start + self.lengths[index] * self.features;
        &self.data[start..end]
    }

    /// All items of all sequences, flattened.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<'a> Add<&'a RaggedBuffer<i64>> for &'a RaggedBuffer<i64> {
    type Output = Result<RaggedBuffer<i64>, HeadError>;

    /// Adds `rhs` to every item. If `rhs` holds exactly one item per sequence
    /// it is broadcast over that sequence, otherwise both sides must share the
    /// same layout.
    fn add(self, rhs: &'a RaggedBuffer<i64>) -> Self::Output {
        if self.size0() != rhs.size0() || self.features != rhs.features {
            return Err(HeadError::RaggedShape(format!(
                "cannot add buffer of {} sequences (width {}) to one of {} sequences (width {})",
                rhs.size0(),
                rhs.features,
                self.size0(),
                self.features
            )));
        }

        let width = self.features;
        let broadcast = rhs.lengths.iter().all(|&l| l == 1);
        let mut data = Vec::with_capacity(self.data.len());
        if self.lengths == rhs.lengths {
            data.extend(self.data.iter().zip(&rhs.data).map(|(a, b)| a + b));
        } else if broadcast {
            let mut start = 0;
            for (len, offset) in self.lengths.iter().zip(rhs.data.chunks(width.max(1))) {
                let end = start + len * width;
                for item in self.data[start..end].chunks(width.max(1)) {
                    data.extend(item.iter().zip(offset).map(|(a, b)| a + b));
                }
                start = end;
            }
        } else {
            return Err(HeadError::RaggedShape(format!(
                "sequence lengths {:?} and {:?} are neither equal nor broadcastable",
                self.size1(),
                rhs.size1()
            )));
        }

        RaggedBuffer::from_flattened(width, data, self.lengths.clone())
    }
}

/// Dense per-actor embeddings produced by the network body.
/// Row `i` of `data` is the feature vector of flattened actor `i`.
#[derive(Debug)]
pub struct RaggedTensor {
    pub data: tch::Tensor,
    pub lengths: Vec<i64>,
}

impl RaggedTensor {
    pub fn new(data: tch::Tensor, lengths: Vec<i64>) -> Self {
        Self { data, lengths }
    }

    pub fn device(&self) -> tch::Device {
        self.data.device()
    }
}
