//! Action masks supplied by a vectorized environment.

use crate::ragged::RaggedBuffer;

/// Mask for a categorical action: which actors act, and optionally which
/// choices each of them may pick.
#[derive(Debug, Clone)]
pub struct VecCategoricalActionMask {
    /// Local actor indices, one item (width 1) per acting actor.
    pub actors: RaggedBuffer<i64>,
    /// Legality of every (actor, choice) pair. `true` means legal.
    /// Item width is the number of choices.
    pub mask: Option<RaggedBuffer<bool>>,
}

impl VecCategoricalActionMask {
    pub fn new(actors: RaggedBuffer<i64>, mask: Option<RaggedBuffer<bool>>) -> Self {
        Self { actors, mask }
    }
}

/// Mask for an action that selects another entity (the actee).
#[derive(Debug, Clone)]
pub struct VecSelectEntityActionMask {
    pub actors: RaggedBuffer<i64>,
    pub actees: RaggedBuffer<i64>,
}

#[derive(Debug, Clone)]
pub enum VecActionMask {
    Categorical(VecCategoricalActionMask),
    SelectEntity(VecSelectEntityActionMask),
}

impl VecActionMask {
    pub fn kind_name(&self) -> &'static str {
        match self {
            VecActionMask::Categorical(_) => "categorical",
            VecActionMask::SelectEntity(_) => "select-entity",
        }
    }

    pub fn actors(&self) -> &RaggedBuffer<i64> {
        match self {
            VecActionMask::Categorical(m) => &m.actors,
            VecActionMask::SelectEntity(m) => &m.actors,
        }
    }

    /// Number of acting actors in each environment.
    pub fn actor_lengths(&self) -> Vec<i64> {
        self.actors().size1()
    }
}

impl From<VecCategoricalActionMask> for VecActionMask {
    fn from(mask: VecCategoricalActionMask) -> Self {
        VecActionMask::Categorical(mask)
    }
}

impl From<VecSelectEntityActionMask> for VecActionMask {
    fn from(mask: VecSelectEntityActionMask) -> Self {
        VecActionMask::SelectEntity(mask)
    }
}
