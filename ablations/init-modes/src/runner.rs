//! 程序运行函数.

use crate::result::{AblationResult, Variant};
use brain_berry::prelude::*;
use std::thread;
use std::time::Instant;
use utils::loader;

/// 参与对比的配置: 名称, 是否配准, 旋转中心初始化方式.
const VARIANTS: [(&str, bool, CenterInit); 3] = [
    ("geometry", true, CenterInit::Geometry),
    ("moments", true, CenterInit::Moments),
    ("no-registration", false, CenterInit::Geometry),
];

/// 以单个配置运行完整流水线.
fn run_variant(register: bool, center_init: CenterInit, scan1: &VolumeGrid, scan2: &VolumeGrid) -> Variant {
    let config = PipelineConfig {
        register,
        registration: RegistrationConfig {
            center_init,
            ..Default::default()
        },
        ..Default::default()
    };
    let start = Instant::now();
    let report = LongitudinalPipeline::new(config)
        .and_then(|p| p.run(scan1, scan2))
        .map(|out| out.report)
        .map_err(|e| e.to_string());
    Variant {
        elapsed: start.elapsed(),
        report,
    }
}

/// 实际运行.
pub fn run() -> AblationResult {
    let pair = loader::scan_pair_from_env_or_home();
    assert!(pair.exists(), "找不到扫描文件: {pair:?}");

    let (scan1, scan2) = pair.open().expect("Loading scan pair error");
    let (a, b) = (&scan1, &scan2);

    println!("Running ablation studies on case {}...", pair.case);
    thread::scope(|s| {
        let handles = VARIANTS.map(|(_, register, init)| s.spawn(move || run_variant(register, init, a, b)));

        AblationResult::from_iter(
            VARIANTS.map(|v| v.0).into_iter().zip(
                handles
                    .into_iter()
                    .map(|th| th.join().expect("Thread joining error")),
            ),
        )
    })
}
