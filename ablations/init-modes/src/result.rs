//! 实验结果.

use brain_berry::pipeline::{AnalysisReport, RegistrationStatus};
use brain_berry::segmentation::{Rejection, SegmentationReport};
use std::io::{self, Write};
use std::time::Duration;

/// 单个配置的运行结果.
#[derive(Debug)]
pub struct Variant {
    /// 整条流水线的耗时.
    pub elapsed: Duration,
    /// 报告, 或者非法输入时的错误信息.
    pub report: Result<AnalysisReport, String>,
}

/// 将 `variant` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, v: &Variant, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Variant `{name}`:")?;
    writeln!(w, "{S4}Total time: {} ms", v.elapsed.as_millis())?;
    let r = match &v.report {
        Ok(r) => r,
        Err(e) => return write!(w, "{S4}Failed: {e}"),
    };

    writeln!(w, "{S4}Registration: {}", r.registration.label())?;
    match &r.registration {
        RegistrationStatus::Success { transform, metric } => {
            writeln!(w, "{S4}Final metric: {metric:.6}")?;
            writeln!(w, "{S4}Rotation (rad): {:?}", transform.angles())?;
            writeln!(w, "{S4}Translation (mm): {:?}", transform.translation())?;
        }
        RegistrationStatus::Degraded { reason } => writeln!(w, "{S4}Reason: {reason}")?,
        RegistrationStatus::Skipped => {}
    }
    let q = r.quality.as_ref();
    writeln!(
        w,
        "{S4}Mutual information: {}",
        f64_to_display(q.map(|q| q.mutual_information))
    )?;
    writeln!(
        w,
        "{S4}Cross correlation: {}",
        f64_to_display(q.map(|q| q.correlation))
    )?;

    for (i, s) in [&r.segmentation1, &r.segmentation2].into_iter().enumerate() {
        segmentation_into(i + 1, s, w)?;
    }

    let c = &r.comparison;
    writeln!(
        w,
        "{S4}Volume: {:.1} -> {:.1} mm^3 ({:+.1}%, {})",
        c.tumor1.volume_mm3, c.tumor2.volume_mm3, c.volume_change_percent, c.growth
    )?;
    writeln!(w, "{S4}Dice: {:.3} ({})", c.dice, c.overlap)?;
    writeln!(w, "{S4}Hausdorff (mm): {}", f64_to_display(c.hausdorff_mm))?;
    write!(w, "{S4}Fallbacks: {}", r.fallbacks.len())?;
    for f in &r.fallbacks {
        write!(w, "\n{S4}{S4}{f}")?;
    }
    Ok(())
}

/// 将第 `scan` 次扫描的分割诊断写进 `w` 中.
fn segmentation_into<W: Write>(scan: usize, s: &SegmentationReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";
    const REASONS: [(Rejection, &str); 5] = [
        (Rejection::TooSmall, "small"),
        (Rejection::TooLarge, "large"),
        (Rejection::Elongated, "elongated"),
        (Rejection::Sparse, "sparse"),
        (Rejection::Peripheral, "peripheral"),
    ];

    write!(
        w,
        "{S4}Scan {scan}: {} voxels, {}/{} components accepted",
        s.tumor_voxels, s.accepted_components, s.candidate_components
    )?;
    for (reason, name) in REASONS {
        let n = s.rejected_by(reason);
        if n > 0 {
            write!(w, ", {n} {name}")?;
        }
    }
    match s.empty_reason {
        Some(e) => writeln!(w, " (empty: {e:?})"),
        None => writeln!(w),
    }
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(&'static str, Variant)>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = (&'static str, Variant)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, variant) in self.data.iter() {
            describe_into(key, variant, &mut buf).unwrap();
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
    }
}
