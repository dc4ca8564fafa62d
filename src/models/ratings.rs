use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive bounds for a rating value.
pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;

/// The `ratings/{ratingId}` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub rating_id: String,
    pub client_id: String,
    pub client_name: String,
    pub provider_id: String,
    pub provider_name: String,
    pub request_id: String,
    #[serde(rename = "rating")]
    pub rating_value: f64,
    #[serde(default)]
    pub comment: String,
    pub created_at: i64,
}

impl Rating {
    /// One rating per client per request: the id is derived from both.
    pub fn id_for(request_id: &str, client_id: &str) -> String {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("rating/{request_id}/{client_id}").as_bytes(),
        )
        .to_string()
    }
}

/// Rating counters kept on the provider's `users/{providerId}` document.
///
/// The sum is held in thousandths of a point, so adding and removing the same
/// rating always cancels out exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingCounters {
    #[serde(default)]
    pub rating_count: u64,
    #[serde(default)]
    pub rating_sum_millis: i64,
    /// Set when an event could not be folded in; the next reader rebuilds.
    #[serde(default)]
    pub summary_stale: bool,
}

impl RatingCounters {
    /// Tally every rating value from scratch.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        values.into_iter().fold(Self::default(), |acc, v| Self {
            rating_count: acc.rating_count + 1,
            rating_sum_millis: acc.rating_sum_millis + to_millis(v),
            summary_stale: false,
        })
    }

    /// Counters after one rating event, or `None` if they would leave the valid range.
    pub fn apply(&self, sum_delta_millis: i64, count_delta: i64) -> Option<Self> {
        let count = i64::try_from(self.rating_count).ok()?.checked_add(count_delta)?;
        let next = Self {
            rating_count: u64::try_from(count).ok()?,
            rating_sum_millis: self.rating_sum_millis.checked_add(sum_delta_millis)?,
            summary_stale: false,
        };
        next.is_consistent().then_some(next)
    }

    /// The sum must be reachable by `rating_count` in-range ratings.
    pub fn is_consistent(&self) -> bool {
        let Ok(count) = i64::try_from(self.rating_count) else {
            return false;
        };
        let low = to_millis(MIN_RATING).saturating_mul(count);
        let high = to_millis(MAX_RATING).saturating_mul(count);
        (low..=high).contains(&self.rating_sum_millis)
    }

    pub fn summary(&self) -> ProviderRatingSummary {
        let average_rating = if self.rating_count == 0 {
            0.0
        } else {
            self.rating_sum_millis as f64 / (self.rating_count as f64 * 1000.0)
        };
        ProviderRatingSummary {
            average_rating,
            rating_count: self.rating_count,
        }
    }
}

/// A rating value in thousandths of a point.
pub fn to_millis(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

/// What clients see of a provider's ratings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRatingSummary {
    pub average_rating: f64,
    pub rating_count: u64,
}

// ── DTOs ──

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRating {
    pub client_id: String,
    pub client_name: String,
    pub provider_id: String,
    pub provider_name: String,
    pub request_id: String,
    pub value: f64,
    #[serde(default)]
    pub comment: String,
}
