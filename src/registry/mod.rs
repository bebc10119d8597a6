//! Subject registry
//!
//! Current state of every tracked subject, written by source adapters and
//! read by broadcast cycles.
//!
//! # Architecture
//!
//! ```text
//!   [Adapter A]     [Adapter B]
//!   apply_update()  apply_update()
//!        │               │
//!        ▼               ▼
//!      Arc<SubjectRegistry>
//!   ┌──────────────────────────┐
//!   │ RwLock<                  │
//!   │   index: name -> slot    │
//!   │   order: [Arc<Subject>]  │
//!   │ >                        │
//!   └────────────┬─────────────┘
//!                │ snapshot()  (clones Arcs only)
//!                ▼
//!         [Broadcast cycle]
//! ```
//!
//! Subjects are never removed automatically. A source going offline leaves
//! its subjects frozen at their last state.

pub mod store;
pub mod subject;

pub use store::SubjectRegistry;
pub use subject::{Marker, Segment, Snapshot, Subject};
