//! 测试支持 crate
//!
//! 提供单 CPU 协作式调度的模拟器和中断控制的 Mock 实现，
//! 让 `ksync` 的睡眠型同步原语可以在宿主机上用 `cargo test` 验证。

pub mod mock;
pub mod sim;

pub use sim::Sim;
