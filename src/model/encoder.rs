//! Label encoding between colours and classifier class indices.

use serde::{Deserialize, Serialize};

use crate::types::Color;

/// Maps the colours seen at training time to dense class indices.
///
/// Fitted once per training run and persisted alongside the classifier.
/// Decoding always goes through the encoder saved with the classifier
/// that produced the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<Color>,
}

impl LabelEncoder {
    /// Fit on a label column. Classes are the sorted distinct labels.
    pub fn fit(labels: &[Color]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[Color] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, color: Color) -> Option<u32> {
        self.classes.iter().position(|&c| c == color).map(|i| i as u32)
    }

    pub fn decode(&self, index: u32) -> Option<Color> {
        self.classes.get(index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorted_distinct() {
        let enc = LabelEncoder::fit(&[Color::Violet, Color::Red, Color::Violet]);
        assert_eq!(enc.classes(), &[Color::Red, Color::Violet]);
        assert_eq!(enc.len(), 2);
    }

    #[test]
    fn test_encode_decode() {
        let enc = LabelEncoder::fit(&[Color::Green, Color::Red, Color::Violet]);
        for c in Color::ALL {
            let idx = enc.encode(c).unwrap();
            assert_eq!(enc.decode(idx), Some(c));
        }
    }

    #[test]
    fn test_unseen_class() {
        let enc = LabelEncoder::fit(&[Color::Green, Color::Red]);
        assert_eq!(enc.encode(Color::Violet), None);
        assert_eq!(enc.decode(2), None);
    }

    #[test]
    fn test_serde_keeps_mapping() {
        let enc = LabelEncoder::fit(&[Color::Red, Color::Violet]);
        let json = serde_json::to_string(&enc).unwrap();
        let back: LabelEncoder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, enc);
        assert_eq!(back.encode(Color::Violet), Some(1));
    }
}
