// 会话事件定义
// 核心层通过消息通道把事件异步推送给界面层

use tokio::sync::mpsc;

use crate::models::{DirectoryEntry, SystemInfo};

/// 推送给界面层的顶层事件
#[derive(Clone, Debug)]
pub enum CoreEvent {
    /// 某个会话产生的事件
    Session {
        session_id: String,
        event: SessionEvent,
    },
    /// 会话表由非空变为空
    AllSessionsClosed,
}

/// 单个会话的事件
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// 连接阶段变化
    StageChanged(ConnectionStage),
    /// 连接成功
    Connected,
    /// 连接断开
    Disconnected,
    /// 分类后的错误消息
    Error(String),
    /// 命令输出（已清洗）
    Output { text: String, is_error: bool },
    /// 检测到确认提示，等待用户输入
    InputRequested,
    /// 交互命令结束
    CommandFinished,
    /// 传输进度
    TransferProgress {
        transfer_id: String,
        transferred: u64,
        total: u64,
    },
    /// 传输结束
    TransferFinished {
        transfer_id: String,
        success: bool,
        message: String,
    },
    /// 目录列表就绪
    DirectoryListed {
        path: String,
        entries: Vec<DirectoryEntry>,
    },
    /// 系统信息就绪
    SystemInfoReady(SystemInfo),
}

/// 连接阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStage {
    /// 初始化（解析配置、准备连接）
    Initializing = 0,
    /// TCP 连接目标主机
    ConnectingHost = 1,
    /// SSH 握手（密钥交换）
    Handshaking = 2,
    /// 身份认证
    Authenticating = 3,
    /// 连接完成
    Connected = 4,
}

impl ConnectionStage {
    /// 阶段名称
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::ConnectingHost => "Connecting to host",
            Self::Handshaking => "SSH handshake",
            Self::Authenticating => "Authenticating",
            Self::Connected => "Connected",
        }
    }

    /// 获取进度百分比 (0.0 - 1.0)
    pub fn progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::ConnectingHost => 0.3,
            Self::Handshaking => 0.5,
            Self::Authenticating => 0.7,
            Self::Connected => 1.0,
        }
    }
}

/// 事件发送端，绑定一个会话 ID
///
/// 发送永不阻塞；接收端已关闭时静默丢弃。
#[derive(Clone, Debug)]
pub struct EventSink {
    session_id: String,
    sender: mpsc::UnboundedSender<CoreEvent>,
}

impl EventSink {
    pub fn new(session_id: impl Into<String>, sender: mpsc::UnboundedSender<CoreEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            sender,
        }
    }

    /// 创建独立的事件通道（不经过会话注册表时使用）
    pub fn channel(session_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session_id, tx), rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 发送会话事件
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(CoreEvent::Session {
            session_id: self.session_id.clone(),
            event,
        });
    }

    /// 发送错误事件
    pub fn error(&self, message: impl Into<String>) {
        self.emit(SessionEvent::Error(message.into()));
    }

    /// 发送输出事件
    pub fn output(&self, text: impl Into<String>, is_error: bool) {
        self.emit(SessionEvent::Output {
            text: text.into(),
            is_error,
        });
    }
}
