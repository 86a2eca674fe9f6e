//! 配准初始化方式的消融实验.
//!
//! 在同一对扫描上分别以几何中心, 强度质心作为旋转中心进行配准,
//! 并与不配准的结果对比.

mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Info).expect("日志初始化失败");
    log::info!("可并行核心数: {}", utils::cpus());
    runner::run().analyze();
}
