//! Project and feeding buffers: sizing and consumption tracking.

mod sizing;
mod tracker;

pub use sizing::{plan_buffers, root_square_error, size_chain};
pub use tracker::{
    chain_complete_percent, classify_zone, consumed_percent, evaluate, evaluate_project,
    BufferHealth, BufferZone, ProjectBufferHealth,
};
