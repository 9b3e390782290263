use serde::{Deserialize, Serialize};
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Output classes of the fingerprint classifier.
///
/// Declaration order is the model's output order: variant `i` is the label
/// for probability index `i`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    strum_macros::EnumCount,
)]
pub enum BloodGroup {
    #[strum(serialize = "A+")]
    #[serde(rename = "A+")]
    APositive,
    #[strum(serialize = "A-")]
    #[serde(rename = "A-")]
    ANegative,
    #[strum(serialize = "AB+")]
    #[serde(rename = "AB+")]
    AbPositive,
    #[strum(serialize = "AB-")]
    #[serde(rename = "AB-")]
    AbNegative,
    #[strum(serialize = "B+")]
    #[serde(rename = "B+")]
    BPositive,
    #[strum(serialize = "B-")]
    #[serde(rename = "B-")]
    BNegative,
    #[strum(serialize = "O+")]
    #[serde(rename = "O+")]
    OPositive,
    #[strum(serialize = "O-")]
    #[serde(rename = "O-")]
    ONegative,
}

pub const CLASS_COUNT: usize = BloodGroup::COUNT;

impl BloodGroup {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn labels() -> Vec<String> {
        Self::iter().map(|group| group.to_string()).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub predicted_class: usize,
    pub predicted_label: BloodGroup,
    pub confidence: f32,
    pub confidence_percentage: f64,
    /// Milliseconds from request arrival to response.
    pub processing_time: f64,
    pub image_quality_score: f64,
    pub timestamp: String,
    pub filename: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model_path: String,
    pub class_labels: Vec<String>,
    pub input_shape: [usize; 4],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn labels_follow_model_output_order() {
        assert_eq!(
            BloodGroup::labels(),
            vec!["A+", "A-", "AB+", "AB-", "B+", "B-", "O+", "O-"]
        );
        assert_eq!(CLASS_COUNT, 8);
    }

    #[test]
    fn index_round_trips_through_from_index() {
        for group in BloodGroup::iter() {
            assert_eq!(BloodGroup::from_index(group.index()), Some(group));
        }
        assert_eq!(BloodGroup::from_index(CLASS_COUNT), None);
    }

    #[test]
    fn label_serializes_as_display_string() {
        let json = serde_json::to_string(&BloodGroup::AbNegative).unwrap();
        assert_eq!(json, "\"AB-\"");
        assert_eq!(BloodGroup::AbNegative.as_ref(), "AB-");
        assert_eq!(BloodGroup::from_str("O+").unwrap(), BloodGroup::OPositive);
    }
}
