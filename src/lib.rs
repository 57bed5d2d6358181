//! Policy heads for entity-based environments, where every environment in a
//! batch exposes a variable number of actors.

pub mod action_head;
pub mod action_mask;
pub mod distributions;
pub mod error;
pub mod model_utils;
pub mod ragged;

pub use action_head::{ActionHead, ActionHeadConfig, ActionHeadOutput, HeadKind};
pub use action_mask::{VecActionMask, VecCategoricalActionMask, VecSelectEntityActionMask};
pub use error::HeadError;
pub use model_utils::Placement;
pub use ragged::{RaggedBuffer, RaggedTensor};
