use crate::error::ReportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the per-tumor-type treatment table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StagedTreatment {
    pub stage: String,
    pub treatment: String,
    pub explanation: String,
}

/// Staged treatment tables keyed by tumor class.
#[derive(Debug, Clone)]
pub struct TumorGuide {
    entries: BTreeMap<String, Vec<StagedTreatment>>,
}

/// Structured MRI finding report: simulated tumor extent, the derived stage
/// and the treatment table for the predicted class.
#[derive(Debug, Clone, Serialize)]
pub struct MriReport {
    pub predicted_tumor_type: String,
    pub confidence: f32,
    pub tumor_size_cm2: f32,
    pub stage: String,
    pub stage_explanation: String,
    pub treatments: Vec<StagedTreatment>,
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

fn stage_for(size_cm2: f32) -> (&'static str, &'static str) {
    if size_cm2 < 2.0 {
        (
            "Stage I",
            "Stage I tumors are small and localized within a confined area. \
             They typically do not invade surrounding brain tissue aggressively. \
             Early treatment at this stage usually produces excellent outcomes.",
        )
    } else if size_cm2 < 4.0 {
        (
            "Stage II",
            "Stage II tumors show moderate growth and may begin to infiltrate nearby tissues. \
             Treatment may require a combination of approaches to prevent progression.",
        )
    } else {
        (
            "Stage III",
            "Stage III tumors are large or aggressively growing. \
             They may compress or invade surrounding brain areas and require urgent and intensive treatment.",
        )
    }
}

impl TumorGuide {
    pub fn builtin() -> Result<Self, ReportError> {
        Self::from_json(include_str!("../data/mri_guide.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ReportError> {
        let entries: BTreeMap<String, Vec<StagedTreatment>> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    /// Every model class must have a treatment table, checked at startup.
    pub fn validate_labels(&self, labels: &[String]) -> Result<(), ReportError> {
        for label in labels {
            if !self.entries.contains_key(&label.to_lowercase()) {
                return Err(ReportError::MissingLabel(label.clone()));
            }
        }
        Ok(())
    }

    /// Build the report for a predicted class, drawing a simulated tumor
    /// extent in [1.0, 5.5) cm^2.
    pub fn generate(&self, predicted: &str, confidence: f32) -> Result<MriReport, ReportError> {
        let size = 1.0 + fastrand::f32() * 4.5;
        self.generate_with_size(predicted, confidence, size)
    }

    pub fn generate_with_size(
        &self,
        predicted: &str,
        confidence: f32,
        size_cm2: f32,
    ) -> Result<MriReport, ReportError> {
        let class = predicted.to_lowercase();
        let treatments = self
            .entries
            .get(&class)
            .ok_or_else(|| ReportError::MissingLabel(predicted.to_string()))?;

        let size_cm2 = round2(size_cm2);
        let (stage, explanation) = stage_for(size_cm2);
        Ok(MriReport {
            predicted_tumor_type: class,
            confidence: round2(confidence),
            tumor_size_cm2: size_cm2,
            stage: stage.to_string(),
            stage_explanation: explanation.to_string(),
            treatments: treatments.clone(),
        })
    }
}
