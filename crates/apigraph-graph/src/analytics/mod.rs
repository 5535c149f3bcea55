//! Time-period index and metric denormalization.

pub mod denormalize;
pub mod periods;

pub use denormalize::Denormalizer;
pub use periods::PeriodIndex;
