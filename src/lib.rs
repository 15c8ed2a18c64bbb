// sshdeck - SSH/SFTP 多会话管理核心
//
// 模块结构:
// - ssh: 传输层（握手、认证、通道、连接）
// - services: 交互命令、SFTP、探测与本地存储
// - state: 会话注册表
// - models: 纯数据类型

pub mod constants;
pub mod models;
pub mod services;
pub mod ssh;
pub mod state;

pub use models::{ConnectionConfig, CoreSettings, DirectoryEntry, SystemInfo};
pub use services::{
    clean_output, CommandSession, ConfigStore, LatencyProbe, SftpPane, SystemInfoProbe,
    TransferSession,
};
pub use ssh::{Connection, CoreEvent, EventSink, SessionEvent, SshError};
pub use state::{CloseOutcome, SessionRegistry, SessionStatus};
