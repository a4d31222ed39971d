// Signal Generation (Layer 2)
// Merges cached source snapshots into composite signals and classifies them

pub mod classification;
pub mod merger;

pub use classification::{
    ClassificationConfig, ClassificationEngine, ClassificationResult, ExitInputs, ExitReason,
    ExitTransition, ExitWindow, Grade, Recommendation, RiskLevel, ThetaUrgency, Tier,
};
pub use merger::{merge, ViewKind, ViewSpec};
