//! 对 `brain-berry::dataset` 的更一层封装. 提供更直接的扫描对加载器.

use brain_berry::dataset::{self, ScanPair};
use std::env;
use std::path::{Path, PathBuf};

/// 未指定病例时使用的病例编号.
pub const DEFAULT_CASE: u32 = 6;

/// 获取扫描数据基本路径.
///
/// 1. 若环境变量 `$BRAIN_SCAN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brain`.
pub fn scan_dir_from_env_or_home() -> PathBuf {
    match env::var("BRAIN_SCAN_DIR") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => dataset::home_dataset_dir_with(["brain"]).expect("无法确定用户主目录"),
    }
}

/// 获取病例编号.
///
/// 若环境变量 `$BRAIN_CASE` 是合法的非负整数则返回其值, 否则返回 [`DEFAULT_CASE`].
pub fn case_from_env() -> u32 {
    env::var("BRAIN_CASE")
        .ok()
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(DEFAULT_CASE)
}

/// 获取 `dir` 下病例 `case` 的扫描对.
#[inline]
pub fn scan_pair<P: AsRef<Path>>(dir: P, case: u32) -> ScanPair {
    ScanPair::locate(dir, case, dataset::default_filename)
}

/// 从 `$BRAIN_SCAN_DIR` 或者 `$HOME/dataset/brain` 下获取 `$BRAIN_CASE` 病例的扫描对.
#[inline]
pub fn scan_pair_from_env_or_home() -> ScanPair {
    scan_pair(scan_dir_from_env_or_home(), case_from_env())
}
