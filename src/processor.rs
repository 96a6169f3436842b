//! Decision engine: shared agent state, batch construction, per-block
//! control flow, and outcome tracking of submitted batches.

pub mod batch;
pub mod controller;
pub mod outcome;
pub mod state;
