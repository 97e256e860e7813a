pub mod backbone;
pub mod classifier;
pub mod error;
pub mod head;
pub mod labels;
pub mod preprocess;
pub mod spec;

// Re-export commonly used types for convenience
pub use backbone::Backbone;
pub use classifier::ClassifierModel;
pub use error::ModelError;
pub use head::{Head, HeadOp};
pub use labels::{argmax, detect_labels};
pub use preprocess::Preprocessing;
pub use spec::{HeadLayerSpec, ModelSpec, TaskKind};
