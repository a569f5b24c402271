//! Shift training: learning a delta vector from labeled pairs, and the
//! persistence contract for the resulting artifacts.

pub mod posneg;
pub mod store;

pub use posneg::{PosNegTrainer, TrainerConfig};
pub use store::{FsResultStore, MemoryResultStore, ResultStore};
