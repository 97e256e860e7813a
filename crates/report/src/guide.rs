use crate::error::ReportError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Precaution and stage-wise treatment lines for one finding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuideEntry {
    pub precautions: Vec<String>,
    pub treatment: Vec<String>,
}

/// Per-label guidance for the chest X-ray findings, keyed by label name.
#[derive(Debug, Clone)]
pub struct DiseaseGuide {
    entries: BTreeMap<String, GuideEntry>,
}

impl DiseaseGuide {
    /// The guide shipped with the service.
    pub fn builtin() -> Result<Self, ReportError> {
        Self::from_json(include_str!("../data/chest_guide.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ReportError> {
        let entries: BTreeMap<String, GuideEntry> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn entry(&self, label: &str) -> Option<&GuideEntry> {
        self.entries.get(label)
    }

    /// Check that every model label has a guidance entry. A gap here is a
    /// deployment configuration error and refuses startup.
    pub fn validate_labels(&self, labels: &[String]) -> Result<(), ReportError> {
        for label in labels {
            if !self.entries.contains_key(label) {
                return Err(ReportError::MissingLabel(label.clone()));
            }
        }
        Ok(())
    }

    /// Render the plain-text analysis report for the detected labels.
    pub fn render_report(&self, detected: &[&str]) -> String {
        if detected.is_empty() {
            return "No disease detected. The chest X-ray appears NORMAL.".to_string();
        }
        let mut report = String::from("===== LUNG XRAY ANALYSIS REPORT =====\n\n");
        for label in detected {
            report.push_str(&format!("\n=== {} ===\n", label));
            if let Some(entry) = self.entries.get(*label) {
                report.push_str("\nPrecautions:\n");
                for p in &entry.precautions {
                    report.push_str(&format!(" - {}\n", p));
                }
                report.push_str("\nTreatment (stage-wise):\n");
                for s in &entry.treatment {
                    report.push_str(&format!(" - {}\n", s));
                }
            }
        }
        report
    }
}
