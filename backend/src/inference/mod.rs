pub mod model;
pub mod preprocess;
pub mod quality;

use std::path::Path;

pub use model::{Classifier, InferenceError, Prediction, TorchClassifier};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analysis {
    pub prediction: Prediction,
    pub quality_score: f64,
}

/// Runs one stored upload through preprocessing, the classifier and the
/// quality heuristic.
pub fn analyze(classifier: &dyn Classifier, image_path: &Path) -> Result<Analysis, InferenceError> {
    let tensor = preprocess::load_tensor(image_path)?;
    let predictions = classifier.predict(&tensor)?;
    let prediction = model::calculate_result(&predictions)?;
    let quality_score = quality::quality_score(image_path);

    Ok(Analysis {
        prediction,
        quality_score,
    })
}
