// SSH 通道封装
// 交互式 PTY 通道与一次性执行通道

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::error::SshError;
use super::handler::SshClientHandler;

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// PTY 请求参数
#[derive(Clone, Debug)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub col_width: u32,
    /// 行数
    pub row_height: u32,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: crate::constants::DEFAULT_TERM.to_string(),
            col_width: 80,
            row_height: 24,
        }
    }
}

/// 一次读取的结果
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelRead {
    /// 标准输出数据
    Stdout(Vec<u8>),
    /// 标准错误数据
    Stderr(Vec<u8>),
    /// 远端进程已退出
    Exited(u32),
    /// 通道已关闭（EOF / Close）
    Closed,
    /// 等待期内没有数据
    Idle,
}

/// 交互式命令通道（PTY + exec）
/// 读写分离：
/// - 读：需要 channel.wait()，持有 channel 锁
/// - 写：直接使用 handle.data()，不需要持有 channel 锁
pub struct InteractiveChannel {
    id: russh::ChannelId,
    handle: Arc<Handle<SshClientHandler>>,
    channel: Mutex<RusshChannel>,
    closed: AtomicBool,
}

impl InteractiveChannel {
    /// 打开通道、请求 PTY 并启动命令
    pub(crate) async fn open(
        handle: Arc<Handle<SshClientHandler>>,
        pty: &PtyRequest,
        command: &str,
    ) -> Result<Self, SshError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(SshError::from)?;

        // 请求 PTY，使远端进程能收到 Ctrl+C
        channel
            .request_pty(
                false,
                &pty.term,
                pty.col_width,
                pty.row_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(SshError::from)?;

        channel.exec(true, command).await.map_err(SshError::from)?;

        Ok(Self {
            id: channel.id(),
            channel: Mutex::new(channel),
            handle,
            closed: AtomicBool::new(false),
        })
    }

    /// 写入数据到远端进程
    /// 直接通过 handle 发送，不阻塞读取循环
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SshError::Channel("Channel is closed".to_string()));
        }
        self.handle
            .data(self.id, data.to_vec().into())
            .await
            .map_err(|_| SshError::Channel("Failed to send data to channel".to_string()))
    }

    /// 发送中断字节（Ctrl+C）
    pub async fn interrupt(&self) -> Result<(), SshError> {
        self.write(&[crate::constants::INTERRUPT_BYTE]).await
    }

    /// 在给定时长内等待一条通道消息
    pub async fn read_timeout(&self, wait: Duration) -> Result<ChannelRead, SshError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(ChannelRead::Closed);
        }

        let mut channel = self.channel.lock().await;
        let msg = match timeout(wait, channel.wait()).await {
            Ok(msg) => msg,
            Err(_) => return Ok(ChannelRead::Idle),
        };

        let read = match msg {
            Some(ChannelMsg::Data { data }) => ChannelRead::Stdout(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                ChannelRead::Stderr(data.to_vec())
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => ChannelRead::Exited(exit_status),
            Some(ChannelMsg::ExitSignal { .. }) => ChannelRead::Exited(255),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => ChannelRead::Closed,
            Some(_) => ChannelRead::Idle,
        };
        Ok(read)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 关闭通道（幂等）
    pub async fn close(&self) -> Result<(), SshError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let channel = self.channel.lock().await;
        channel
            .close()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }
}

/// 执行通道（用于诊断等需要执行单个命令的场景）
pub struct ExecChannel {
    channel: RusshChannel,
}

impl ExecChannel {
    pub(crate) async fn open(handle: &Handle<SshClientHandler>) -> Result<Self, SshError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(SshError::from)?;
        Ok(Self { channel })
    }

    /// 执行命令并收集输出
    pub async fn exec(mut self, command: &str) -> Result<CommandOutput, SshError> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(channel_msg) = self.channel.wait().await {
            match channel_msg {
                ChannelMsg::Data { data } => {
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                }
                // 退出码可能在 EOF 之后到达，读到 Close 为止
                ChannelMsg::Close => {
                    break;
                }
                _ => {}
            }
        }

        let _ = self.channel.close().await;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
        })
    }
}

/// 一次性命令输出
///
/// 执行失败时不返回错误，而是把消息放进 `stderr`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码（未收到时为 None）
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// 构造一个只带错误消息的结果
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
        }
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
