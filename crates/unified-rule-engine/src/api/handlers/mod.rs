//! HTTP 请求处理器模块

pub mod execution;
pub mod rule;
pub mod stats;
pub mod template;
