//! Canned clinical guidance rendered from prediction results.

pub mod error;
pub mod guide;
pub mod mri;

pub use error::ReportError;
pub use guide::{DiseaseGuide, GuideEntry};
pub use mri::{MriReport, StagedTreatment, TumorGuide};
