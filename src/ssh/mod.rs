// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod)
// - error: 错误类型与分类 (SshError, ErrorKind)
// - event: 会话事件 (CoreEvent, SessionEvent, ConnectionStage, EventSink)
// - handler: russh Handler 实现
// - client: 握手与认证
// - session: 通道封装 (InteractiveChannel, ExecChannel)
// - connection: 单台主机的连接 (Connection)

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod session;

#[cfg(test)]
pub(crate) mod test_server;

// 公开导出
pub use client::SshClient;
pub use config::{AuthMethod, KeepaliveConfig, SshConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{ErrorKind, NetworkFailure, SshError};
pub use event::{ConnectionStage, CoreEvent, EventSink, SessionEvent};
pub use session::{ChannelRead, CommandOutput, ExecChannel, InteractiveChannel, PtyRequest};
