//! Cache invalidation graph
//!
//! Every permission and config cache entry is derived from database rows.
//! `InvalidationGraph::standard` lists, in one place, which mutations make
//! which entries stale; `Invalidator::dispatch` deletes them synchronously
//! within the mutating call.

pub mod dispatch;
pub mod events;
pub mod graph;

pub use dispatch::{InvalidationPlan, InvalidationReport, Invalidator};
pub use events::{ChangeEvent, M2mPhase, Source};
pub use graph::{DerivedCache, Edge, Fanout, InvalidationGraph};
