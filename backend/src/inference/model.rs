use ndarray::Array4;
use shared::{BloodGroup, CLASS_COUNT};
use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::preprocess::{INPUT_CHANNELS, INPUT_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Model returned {0} outputs, expected {expected}", expected = CLASS_COUNT)]
    UnexpectedOutput(usize),
    #[error("Model returned non-finite probabilities")]
    NonFinite,
    #[error("Model output is not a probability distribution (sum {sum:.4})")]
    NotProbabilities { sum: f32 },
    #[error("Model lock poisoned")]
    Poisoned,
    #[error("Upload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque image classifier: NHWC batch-of-one in, class probabilities out.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// TorchScript classifier, loaded once at startup and shared read-only.
pub struct TorchClassifier {
    model: Mutex<CModule>,
    device: Device,
    apply_softmax: bool,
}

impl TorchClassifier {
    pub fn load(model_path: &Path, apply_softmax: bool) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut model = CModule::load_on_device(model_path, device)?;
        model.set_eval();
        log::info!(
            "Loaded classifier from {} on {:?}",
            model_path.display(),
            device
        );
        Ok(Self {
            model: Mutex::new(model),
            device,
            apply_softmax,
        })
    }
}

impl Classifier for TorchClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let data = input
            .as_slice()
            .ok_or_else(|| InferenceError::Preprocessing("input tensor is not contiguous".into()))?;
        let side = INPUT_SIZE as i64;
        let tensor = Tensor::from_slice(data)
            .view([1, side, side, INPUT_CHANNELS as i64])
            .to_device(self.device);

        let output = {
            let model = self.model.lock().map_err(|_| InferenceError::Poisoned)?;
            tch::no_grad(|| model.forward_ts(&[tensor]))?
        };
        let output_flat = output.to_device(Device::Cpu).to_kind(Kind::Float).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);

        if self.apply_softmax {
            Ok(softmax(&output_vec))
        } else {
            Ok(output_vec)
        }
    }
}

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

const PROBABILITY_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: BloodGroup,
    pub confidence: f32,
}

/// Picks the most probable class. Ties resolve to the lowest index.
pub fn calculate_result(predictions: &[f32]) -> Result<Prediction, InferenceError> {
    if predictions.len() != CLASS_COUNT {
        return Err(InferenceError::UnexpectedOutput(predictions.len()));
    }
    if predictions.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::NonFinite);
    }
    let sum: f32 = predictions.iter().sum();
    let in_unit_range = predictions
        .iter()
        .all(|&p| (-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&p));
    if !in_unit_range || (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(InferenceError::NotProbabilities { sum });
    }

    let (class_index, confidence) = predictions
        .iter()
        .copied()
        .enumerate()
        .fold((0, predictions[0]), |best, (i, p)| if p > best.1 { (i, p) } else { best });
    let confidence = confidence.clamp(0.0, 1.0);

    let label = BloodGroup::from_index(class_index)
        .ok_or(InferenceError::UnexpectedOutput(predictions.len()))?;

    Ok(Prediction {
        class_index,
        label,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_probability() {
        let probs = [0.01, 0.02, 0.03, 0.04, 0.05, 0.7, 0.1, 0.05];
        let prediction = calculate_result(&probs).unwrap();
        assert_eq!(prediction.class_index, 5);
        assert_eq!(prediction.label, BloodGroup::BNegative);
        assert_eq!(prediction.confidence, 0.7);
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let probs = [0.0, 0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(calculate_result(&probs).unwrap().label, BloodGroup::ANegative);
    }

    #[test]
    fn wrong_output_length_is_rejected() {
        let err = calculate_result(&[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, InferenceError::UnexpectedOutput(2)));
        assert_eq!(err.to_string(), "Model returned 2 outputs, expected 8");
    }

    #[test]
    fn nan_output_is_rejected() {
        let mut probs = [0.125f32; 8];
        probs[3] = f32::NAN;
        assert!(matches!(calculate_result(&probs), Err(InferenceError::NonFinite)));
    }

    #[test]
    fn raw_logits_are_rejected() {
        let logits = [5.3, -1.0, 0.2, 0.0, 1.1, -2.0, 0.4, 0.9];
        let err = calculate_result(&logits).unwrap_err();
        assert!(matches!(err, InferenceError::NotProbabilities { .. }));
    }

    #[test]
    fn scores_in_range_that_do_not_sum_to_one_are_rejected() {
        let probs = [0.9f32; 8];
        assert!(matches!(
            calculate_result(&probs),
            Err(InferenceError::NotProbabilities { .. })
        ));
    }

    #[test]
    fn softmax_turns_logits_into_a_distribution() {
        let logits = [5.3, -1.0, 0.2, 0.0, 1.1, -2.0, 0.4, 0.9];
        let probs = softmax(&logits);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

        let prediction = calculate_result(&probs).unwrap();
        assert_eq!(prediction.class_index, 0);
        assert!(prediction.confidence > 0.9 && prediction.confidence <= 1.0);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        assert!(TorchClassifier::load(Path::new("no/such/model.pt"), false).is_err());
    }
}
