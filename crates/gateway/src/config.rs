use common::config::env_or;
use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub listen_addr: String,
    pub mri_spec_path: String,
    pub chest_spec_path: String,
    /// Detection threshold for the multi-label chest model.
    pub chest_threshold: f32,
    /// Mirror each rotated variant during test-time augmentation.
    pub tta_flip: bool,
    pub mri_overlay_alpha: f32,
    pub chest_overlay_alpha: f32,
    /// Optional overrides for the built-in guidance tables.
    pub chest_guide_path: Option<String>,
    pub mri_guide_path: Option<String>,
    pub otel_endpoint: Option<String>,
}

impl GatewayConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            environment: Environment::from_env(),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            mri_spec_path: env::var("MRI_MODEL_SPEC")
                .unwrap_or_else(|_| "models/brain_mri/model.json".to_string()),
            chest_spec_path: env::var("CHEST_MODEL_SPEC")
                .unwrap_or_else(|_| "models/chest_xray/model.json".to_string()),
            chest_threshold: env_or("CHEST_THRESHOLD", 0.001),
            tta_flip: env_or("TTA_FLIP", true),
            mri_overlay_alpha: env_or("MRI_OVERLAY_ALPHA", 0.5),
            chest_overlay_alpha: env_or("CHEST_OVERLAY_ALPHA", 0.4),
            chest_guide_path: env::var("CHEST_GUIDE_PATH").ok(),
            mri_guide_path: env::var("MRI_GUIDE_PATH").ok(),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            listen_addr: "127.0.0.1:5000".to_string(),
            mri_spec_path: "models/brain_mri/model.json".to_string(),
            chest_spec_path: "models/chest_xray/model.json".to_string(),
            chest_threshold: 0.001,
            tta_flip: true,
            mri_overlay_alpha: 0.5,
            chest_overlay_alpha: 0.4,
            chest_guide_path: None,
            mri_guide_path: None,
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = GatewayConfig::test_default();
        assert_eq!(config.chest_threshold, 0.001);
        assert!(config.tta_flip);
        assert_eq!(config.mri_overlay_alpha, 0.5);
        assert_eq!(config.chest_overlay_alpha, 0.4);
    }
}
