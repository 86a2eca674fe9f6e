//! 数据集路径与扫描对加载器.
//!
//! 同一病人的两次扫描按 `case{N}_gre1.nii.gz` 与 `case{N}_gre2.nii.gz` 命名,
//! 位于同一目录下. 其他命名方式可以通过 [`FilenameBuilder`] 指定.

use std::path::{Path, PathBuf};

use crate::{Result, VolumeGrid};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 文件名构造器. 接受病例编号与扫描序号 (1 或 2), 获得文件名.
pub type FilenameBuilder = fn(u32, u8) -> String;

/// 默认文件名: `case{N}_gre{scan}.nii.gz`.
pub fn default_filename(case: u32, scan: u8) -> String {
    format!("case{case}_gre{scan}.nii.gz")
}

/// 同一病例的两次扫描文件.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScanPair {
    /// 病例编号.
    pub case: u32,
    /// 第一次扫描 (基线).
    pub first: PathBuf,
    /// 第二次扫描 (随访).
    pub second: PathBuf,
}

impl ScanPair {
    /// 由目录与文件名构造器确定病例 `case` 的两个文件路径.
    pub fn locate<P: AsRef<Path>>(dir: P, case: u32, builder: FilenameBuilder) -> Self {
        let dir = dir.as_ref();
        Self {
            case,
            first: dir.join(builder(case, 1)),
            second: dir.join(builder(case, 2)),
        }
    }

    /// 两个文件是否都存在.
    pub fn exists(&self) -> bool {
        self.first.is_file() && self.second.is_file()
    }

    /// 加载两次扫描.
    pub fn open(&self) -> Result<(VolumeGrid, VolumeGrid)> {
        Ok((VolumeGrid::open(&self.first)?, VolumeGrid::open(&self.second)?))
    }
}

/// 从指定病例编号, 路径, 文件名构造器创建扫描对加载器.
///
/// # 注意
///
/// `cases` 的所有取值都必须在 `dir` 下有对应的两个 nifti 文件,
/// 否则加载器在迭代时会返回 `Err`.
pub fn pair_loader<I: IntoIterator<Item = u32>, P: AsRef<Path>>(
    cases: I,
    dir: P,
    builder: FilenameBuilder,
) -> PairLoader {
    let mut cases: Vec<u32> = cases.into_iter().collect();
    cases.reverse();
    PairLoader {
        dir: dir.as_ref().to_owned(),
        cases_rev: cases,
        builder,
    }
}

/// 扫描对加载器. 按给定顺序逐个病例加载.
#[derive(Debug, Clone)]
pub struct PairLoader {
    dir: PathBuf,
    cases_rev: Vec<u32>,
    builder: FilenameBuilder,
}

impl Iterator for PairLoader {
    type Item = (u32, Result<(VolumeGrid, VolumeGrid)>);

    fn next(&mut self) -> Option<Self::Item> {
        let case = self.cases_rev.pop()?;
        let pair = ScanPair::locate(&self.dir, case, self.builder);
        Some((case, pair.open()))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cases_rev.len(), Some(self.cases_rev.len()))
    }
}

impl ExactSizeIterator for PairLoader {}
