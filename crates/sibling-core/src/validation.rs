//! # Validation Module
//!
//! Shape checks applied to concept records before they reach storage.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Signature + serde decode (sibling-sync)                       │
//! │  ├── Envelope is authentic                                              │
//! │  └── Message has a known type and required fields                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Text key present and bounded                                       │
//! │  └── Floats finite, confidence in [0, 1]                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL constraints                                               │
//! │  └── UNIQUE (text)                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::ConceptRecord;
use crate::MAX_CONCEPT_TEXT_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a concept's text key.
///
/// ## Example
/// ```rust
/// use sibling_core::validation::validate_concept_text;
///
/// assert!(validate_concept_text("ownership").is_ok());
/// assert!(validate_concept_text("   ").is_err());
/// ```
pub fn validate_concept_text(text: &str) -> ValidationResult<()> {
    if text.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "text".to_string(),
        });
    }

    if text.chars().count() > MAX_CONCEPT_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: "text".to_string(),
            max: MAX_CONCEPT_TEXT_LEN,
        });
    }

    Ok(())
}

/// Validates a confidence value as received, before any clamping.
pub fn validate_confidence(confidence: f64) -> ValidationResult<()> {
    if !confidence.is_finite() {
        return Err(ValidationError::NotFinite {
            field: "confidence".to_string(),
        });
    }

    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::OutOfRange {
            field: "confidence".to_string(),
            min: 0.0,
            max: 1.0,
            value: confidence,
        });
    }

    Ok(())
}

/// Validates every field of a concept record.
pub fn validate_concept(concept: &ConceptRecord) -> ValidationResult<()> {
    validate_concept_text(&concept.text)?;
    validate_confidence(concept.confidence)?;

    if let Some(embedding) = &concept.embedding {
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(ValidationError::NotFinite {
                field: "embedding".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_rules() {
        assert!(validate_concept_text("borrowck").is_ok());
        assert!(validate_concept_text("").is_err());

        let long = "a".repeat(MAX_CONCEPT_TEXT_LEN + 1);
        assert_eq!(
            validate_concept_text(&long),
            Err(ValidationError::TooLong {
                field: "text".to_string(),
                max: MAX_CONCEPT_TEXT_LEN,
            })
        );
    }

    #[test]
    fn test_confidence_rules() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(-0.1).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
        assert!(validate_confidence(f64::INFINITY).is_err());
    }

    #[test]
    fn test_embedding_must_be_finite() {
        let concept = ConceptRecord::new("x", "topic", 0).with_embedding(vec![0.1, f32::NAN]);
        assert!(matches!(
            validate_concept(&concept),
            Err(ValidationError::NotFinite { .. })
        ));

        let concept = ConceptRecord::new("x", "topic", 0).with_embedding(vec![0.1, 0.2]);
        assert!(validate_concept(&concept).is_ok());
    }
}
