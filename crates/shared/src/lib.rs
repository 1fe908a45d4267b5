//! 共享库
//!
//! 自动化规则服务共用的配置、数据库连接、可观测性与重试等基础设施代码。

pub mod config;
pub mod database;
pub mod observability;
pub mod retry;
