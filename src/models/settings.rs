// Settings 配置数据结构

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

// ======================== 主配置结构 ========================

/// 核心设置（持久化用），缺省字段取默认值
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreSettings {
    pub connection: ConnectionSettings,
    pub terminal: TerminalSettings,
    pub probe: ProbeSettings,
    pub sftp: SftpSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// 0 表示关闭心跳
    pub keepalive_interval_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: constants::CONNECT_TIMEOUT.as_secs(),
            command_timeout_secs: constants::COMMAND_TIMEOUT.as_secs(),
            keepalive_interval_secs: 60,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

// ======================== 终端设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalSettings {
    /// 交互命令轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// PTY 终端类型
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::POLL_INTERVAL.as_millis() as u64,
            term: constants::DEFAULT_TERM.to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl TerminalSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ======================== 探测设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeSettings {
    pub latency_timeout_secs: u64,
    /// 连接成功后是否自动获取系统信息
    pub fetch_system_info: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            latency_timeout_secs: constants::LATENCY_TIMEOUT.as_secs(),
            fetch_system_info: true,
        }
    }
}

impl ProbeSettings {
    pub fn latency_timeout(&self) -> Duration {
        Duration::from_secs(self.latency_timeout_secs.max(1))
    }
}

// ======================== SFTP 设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SftpSettings {
    pub transfer_chunk_size: usize,
    /// 连接成功后 SFTP 面板打开的初始目录
    pub initial_path: String,
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            transfer_chunk_size: constants::TRANSFER_CHUNK_SIZE,
            initial_path: "/".to_string(),
        }
    }
}
