//! Domain types for Pairwatch

pub mod ids;
pub mod pair;
pub mod series;
pub mod user;

pub use ids::DocumentId;
pub use pair::{Pair, PairParseError};
pub use series::{MarketChart, PricePoint, SeriesRecord, SAMPLES_PER_DAY};
pub use user::{User, MIN_PAIR_QUOTA};

/// Telegram chat id / user id type alias
pub type UserId = i64;
