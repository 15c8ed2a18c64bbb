// Monitor 监控数据模型

use serde::{Deserialize, Serialize};

/// 任一探测项失败时使用的占位值
pub const UNKNOWN: &str = "unknown";

/// 服务器系统信息（连接成功后获取一次）
///
/// 形状固定；某一项命令失败或输出无法解析时保留 `"unknown"`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// CPU 型号
    pub cpu: String,
    /// 总内存（如 "7.6Gi"）
    pub memory_total: String,
    /// 已用内存
    pub memory_used: String,
    /// 内存使用率（如 "42.3%"）
    pub memory_percent: String,
    /// 根分区总量
    pub disk_total: String,
    /// 根分区已用
    pub disk_used: String,
    /// 根分区使用率（如 "37%"）
    pub disk_percent: String,
    /// 操作系统名称
    pub os: String,
    /// 运行时间
    pub uptime: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            cpu: UNKNOWN.to_string(),
            memory_total: UNKNOWN.to_string(),
            memory_used: UNKNOWN.to_string(),
            memory_percent: UNKNOWN.to_string(),
            disk_total: UNKNOWN.to_string(),
            disk_used: UNKNOWN.to_string(),
            disk_percent: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            uptime: UNKNOWN.to_string(),
        }
    }
}

impl SystemInfo {
    /// 单行摘要，供状态栏展示
    pub fn summary(&self) -> String {
        format!(
            "CPU: {}  |  Memory: {}/{} ({})  |  Disk: {}/{} ({})  |  OS: {}",
            self.cpu,
            self.memory_used,
            self.memory_total,
            self.memory_percent,
            self.disk_used,
            self.disk_total,
            self.disk_percent,
            self.os
        )
    }
}
