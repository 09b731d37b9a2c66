use serde::{Deserialize, Serialize};

/// Smallest pair quota a user can be created with.
pub const MIN_PAIR_QUOTA: u32 = 3;

/// A chat user and the pairs they track.
///
/// Field names match the stored document layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Maximum number of pairs this user may track.
    pub n_pairs: u32,
    #[serde(default)]
    pub pairs: Vec<String>,
}

impl User {
    pub fn new(user_id: i64, user_name: Option<String>, n_pairs: u32) -> Self {
        Self {
            user_id,
            user_name,
            n_pairs,
            pairs: Vec::new(),
        }
    }

    pub fn tracks(&self, pair_name: &str) -> bool {
        self.pairs.iter().any(|p| p == pair_name)
    }

    /// True if one more pair fits under the quota.
    pub fn has_capacity(&self) -> bool {
        self.pairs.len() < self.n_pairs as usize
    }

    /// Pairs left before the quota is reached.
    pub fn remaining(&self) -> u32 {
        (self.n_pairs as usize).saturating_sub(self.pairs.len()) as u32
    }
}
