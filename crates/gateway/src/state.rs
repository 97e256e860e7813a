use crate::config::GatewayConfig;
use attribution::AttributionEngine;
use model::ClassifierModel;
use report::{DiseaseGuide, TumorGuide};
use std::path::Path;
use std::sync::Arc;

/// One deployed classifier with its saliency engine.
pub struct ModelService {
    engine: AttributionEngine,
}

impl ModelService {
    pub fn new(engine: AttributionEngine) -> Self {
        Self { engine }
    }

    pub fn model(&self) -> &Arc<ClassifierModel> {
        self.engine.model()
    }

    pub fn engine(&self) -> &AttributionEngine {
        &self.engine
    }
}

pub struct Inner {
    pub mri: ModelService,
    pub chest: ModelService,
    pub mri_guide: TumorGuide,
    pub chest_guide: DiseaseGuide,
    pub chest_threshold: f32,
    pub mri_overlay_alpha: f32,
    pub chest_overlay_alpha: f32,
}

#[derive(Clone)]
pub struct AppState(pub Arc<Inner>);

impl AppState {
    /// Load both models, validate the attribution pipelines and guidance
    /// tables, and assemble the shared state. Any failure here refuses
    /// startup.
    pub fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        tracing::info!(path = %config.mri_spec_path, "Loading MRI classifier");
        let mri_model = Arc::new(ClassifierModel::load(Path::new(&config.mri_spec_path))?);

        tracing::info!(path = %config.chest_spec_path, "Loading chest classifier");
        let chest_model = Arc::new(ClassifierModel::load(Path::new(&config.chest_spec_path))?);

        let mri_guide = match &config.mri_guide_path {
            Some(path) => TumorGuide::from_file(Path::new(path))?,
            None => TumorGuide::builtin()?,
        };
        mri_guide.validate_labels(mri_model.labels())?;

        let chest_guide = match &config.chest_guide_path {
            Some(path) => DiseaseGuide::from_file(Path::new(path))?,
            None => DiseaseGuide::builtin()?,
        };
        chest_guide.validate_labels(chest_model.labels())?;

        let mri = ModelService::new(AttributionEngine::with_options(mri_model, config.tta_flip)?);
        let chest = ModelService::new(AttributionEngine::with_options(
            chest_model,
            config.tta_flip,
        )?);

        Ok(Self::from_parts(
            mri,
            chest,
            mri_guide,
            chest_guide,
            config,
        ))
    }

    pub fn from_parts(
        mri: ModelService,
        chest: ModelService,
        mri_guide: TumorGuide,
        chest_guide: DiseaseGuide,
        config: &GatewayConfig,
    ) -> Self {
        Self(Arc::new(Inner {
            mri,
            chest,
            mri_guide,
            chest_guide,
            chest_threshold: config.chest_threshold,
            mri_overlay_alpha: config.mri_overlay_alpha,
            chest_overlay_alpha: config.chest_overlay_alpha,
        }))
    }
}
