// 交互式命令会话
// 在 PTY 通道上运行一条命令：流式输出、确认提示检测、输入注入与中断

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::DRAIN_TIMEOUT;
use crate::ssh::event::SessionEvent;
use crate::ssh::session::{ChannelRead, InteractiveChannel};
use crate::ssh::Connection;

/// ANSI 转义序列：CSI 序列或单字符序列
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ANSI pattern is valid")
});

/// 除换行和制表符以外的控制字符（含回车）
static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B-\x1F\x7F]").expect("control pattern is valid")
});

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("space pattern is valid"));

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

/// 清洗一段输出
///
/// 有损：去掉 ANSI 序列与控制字符，合并水平空白，逐行去首尾空白，
/// 3 个以上连续换行压缩为 2 个。原始字节不保留。
pub fn clean_output(text: &str) -> String {
    let text = ANSI_ESCAPE.replace_all(text, "");
    let text = CONTROL_CHARS.replace_all(&text, "");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = text.split('\n').map(str::trim).collect::<Vec<_>>().join("\n");
    EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned()
}

/// 是否包含确认提示（启发式：`[y/n]` 任意大小写或 `yes/no`）
pub fn detect_prompt(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("[y/n]") || lower.contains("yes/no")
}

/// 命令会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Running,
    AwaitingInput,
    Finished,
}

/// 一条交互命令
///
/// 读写循环在独立任务中运行；`send_input` 与 `stop` 只是投递，不等待远端。
pub struct CommandSession {
    command: String,
    state: watch::Receiver<CommandState>,
    input_tx: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
}

struct CommandLoop {
    connection: Arc<Connection>,
    command: String,
    poll_interval: Duration,
    state: watch::Sender<CommandState>,
    input_rx: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
}

impl CommandSession {
    /// 在给定运行时上启动命令
    pub fn execute(connection: Arc<Connection>, command: impl Into<String>, runtime: &Handle) -> Self {
        let command = command.into();
        let (state_tx, state_rx) = watch::channel(CommandState::Idle);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let poll_interval = connection.settings().terminal.poll_interval();
        let worker = CommandLoop {
            connection,
            command: command.clone(),
            poll_interval,
            state: state_tx,
            input_rx,
            stop: stop.clone(),
        };
        runtime.spawn(worker.run());

        Self {
            command,
            state: state_rx,
            input_tx,
            stop,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> CommandState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == CommandState::Finished
    }

    /// 排队一段输入，下一轮循环按提交顺序写入
    pub fn send_input(&self, text: impl Into<String>) {
        if self.input_tx.send(text.into()).is_err() {
            debug!("[Command] Input dropped, '{}' already finished", self.command);
        }
    }

    /// 请求中断：发送 0x03 后关闭通道，不等待远端确认
    pub fn stop(&self) {
        info!("[Command] Stop requested for '{}'", self.command);
        self.stop.cancel();
    }

    /// 等待命令结束
    pub async fn wait(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == CommandState::Finished).await;
    }
}

impl CommandLoop {
    async fn run(mut self) {
        self.state.send_replace(CommandState::Running);
        info!("[Command] Running '{}'", self.command);

        let Some(channel) = self.connection.open_interactive_channel(&self.command).await else {
            self.output("Unable to execute command\n", true);
            self.finish();
            return;
        };

        self.poll(&channel).await;

        if self.stop.is_cancelled() {
            if let Err(e) = channel.interrupt().await {
                debug!("[Command] Interrupt not delivered: {}", e);
            }
        } else {
            self.drain(&channel).await;
        }

        if let Err(e) = channel.close().await {
            warn!("[Command] Failed to close channel: {}", e);
        }
        self.connection.release_interactive_channel(&channel);
        self.finish();
    }

    /// 主循环：先写入排队的输入，再在轮询间隔内等待输出
    async fn poll(&mut self, channel: &InteractiveChannel) {
        loop {
            if self.stop.is_cancelled() {
                return;
            }

            while let Ok(text) = self.input_rx.try_recv() {
                if let Err(e) = channel.write(text.as_bytes()).await {
                    self.output(&format!("\nError: {}\n", e), true);
                    return;
                }
                if *self.state.borrow() == CommandState::AwaitingInput {
                    self.state.send_replace(CommandState::Running);
                }
            }

            let read = tokio::select! {
                _ = self.stop.cancelled() => return,
                read = channel.read_timeout(self.poll_interval) => read,
            };

            match read {
                Ok(ChannelRead::Stdout(data)) => {
                    let text = String::from_utf8_lossy(&data);
                    self.output(&text, false);
                    if detect_prompt(&text) {
                        debug!("[Command] Confirmation prompt detected");
                        self.state.send_replace(CommandState::AwaitingInput);
                        self.connection.events().emit(SessionEvent::InputRequested);
                    }
                }
                Ok(ChannelRead::Stderr(data)) => {
                    self.output(&String::from_utf8_lossy(&data), true);
                }
                Ok(ChannelRead::Exited(code)) => {
                    debug!("[Command] '{}' exited with {}", self.command, code);
                    return;
                }
                Ok(ChannelRead::Closed) => return,
                Ok(ChannelRead::Idle) => {}
                Err(e) => {
                    self.output(&format!("\nError: {}\n", e), true);
                    return;
                }
            }
        }
    }

    /// 结束后读完缓冲中剩余的输出
    async fn drain(&self, channel: &InteractiveChannel) {
        loop {
            match channel.read_timeout(DRAIN_TIMEOUT).await {
                Ok(ChannelRead::Stdout(data)) => self.output(&String::from_utf8_lossy(&data), false),
                Ok(ChannelRead::Stderr(data)) => self.output(&String::from_utf8_lossy(&data), true),
                Ok(ChannelRead::Exited(_)) => {}
                Ok(ChannelRead::Closed) | Ok(ChannelRead::Idle) | Err(_) => break,
            }
        }
    }

    fn output(&self, raw: &str, is_error: bool) {
        let text = clean_output(raw);
        if !text.is_empty() {
            self.connection.events().output(text, is_error);
        }
    }

    fn finish(&self) {
        self.state.send_replace(CommandState::Finished);
        self.connection.events().emit(SessionEvent::CommandFinished);
        debug!("[Command] '{}' finished", self.command);
    }
}
