//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Vec3};

pub use crate::{Error, GridAttr, Geometry, Mask, Result, VolumeGrid};

pub use crate::registration::{
    apply_transform, CancellationToken, CenterInit, ProgressCallback, Registrar,
    RegistrationConfig, RegistrationOutcome, RigidTransform,
};

pub use crate::segmentation::{SegmentationConfig, SegmentationReport, TumorSegmenter};

pub use crate::analysis::{ChangeAnalyzer, ComparisonResult, GrowthStatus, ReportValue};

pub use crate::pipeline::{AnalysisReport, LongitudinalPipeline, PipelineConfig, PipelineOutput};

pub use crate::dataset::{self, home_dataset_dir_with, ScanPair};
