// SSH 错误类型定义

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// SFTP 子系统错误
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// 尚未连接
    #[error("Not connected to server")]
    NotConnected,

    /// 会话已断开
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// 连接已取消
    #[error("Connection cancelled")]
    Cancelled,
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::IO(io) => SshError::Io(io),
            other => SshError::Protocol(other.to_string()),
        }
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        SshError::Sftp(e.to_string())
    }
}

/// 面向用户的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Protocol,
    Timeout,
    Network(NetworkFailure),
    Generic,
}

/// 网络错误细分（根据系统错误文本判断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Unreachable,
    Refused,
    Other,
}

fn classify_io(e: &std::io::Error) -> ErrorKind {
    let text = e.to_string();
    if text.to_lowercase().contains("timed out") || e.kind() == std::io::ErrorKind::TimedOut {
        return ErrorKind::Timeout;
    }
    if text.contains("No route to host") || text.contains("Network is unreachable") {
        ErrorKind::Network(NetworkFailure::Unreachable)
    } else if text.contains("Connection refused")
        || e.kind() == std::io::ErrorKind::ConnectionRefused
    {
        ErrorKind::Network(NetworkFailure::Refused)
    } else {
        ErrorKind::Network(NetworkFailure::Other)
    }
}

impl SshError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            SshError::Auth(_) | SshError::Key(_) => ErrorKind::Authentication,
            SshError::Protocol(msg) if msg.to_lowercase().contains("timed out") => {
                ErrorKind::Timeout
            }
            SshError::Protocol(_) => ErrorKind::Protocol,
            SshError::Timeout(_) => ErrorKind::Timeout,
            SshError::Io(e) => classify_io(e),
            _ => ErrorKind::Generic,
        }
    }

    /// 分类后的用户可读消息（不含原始异常文本以外的堆栈信息）
    pub fn user_message(&self, host: &str, port: u16) -> String {
        match self.kind() {
            ErrorKind::Authentication => {
                "Authentication failed: wrong username, password or key".to_string()
            }
            ErrorKind::Protocol => format!("SSH error: {}", self.detail()),
            ErrorKind::Timeout => {
                format!("Connection timed out: cannot reach {}:{}", host, port)
            }
            ErrorKind::Network(NetworkFailure::Unreachable) => {
                format!("Network error: {} is unreachable", host)
            }
            ErrorKind::Network(NetworkFailure::Refused) => {
                format!("Connection refused: check that port {} is correct", port)
            }
            ErrorKind::Network(NetworkFailure::Other) => {
                format!("Connection error: {}", self.detail())
            }
            ErrorKind::Generic => format!("Operation failed: {}", self.detail()),
        }
    }

    /// 去掉变体前缀的错误详情
    fn detail(&self) -> String {
        match self {
            SshError::Config(msg)
            | SshError::Auth(msg)
            | SshError::Protocol(msg)
            | SshError::Key(msg)
            | SshError::Channel(msg)
            | SshError::Sftp(msg)
            | SshError::Disconnected(msg) => msg.clone(),
            SshError::Io(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
