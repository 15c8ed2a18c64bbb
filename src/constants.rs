// 固定超时与尺寸常量

use std::time::Duration;

/// SSH 连接超时
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 一次性命令执行超时
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// 交互命令轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 命令结束后排空剩余输出的等待上限
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// 关闭会话时等待命令发出中断并关闭通道的上限
pub const COMMAND_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// 延迟探测超时
pub const LATENCY_TIMEOUT: Duration = Duration::from_secs(3);

/// 连接状态巡检间隔（检测断线）
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// 文件传输分块大小
pub const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;

/// 中断字节（Ctrl+C）
pub const INTERRUPT_BYTE: u8 = 0x03;

/// 默认终端类型
pub const DEFAULT_TERM: &str = "xterm";

/// 配置目录名
pub const APP_DIR_NAME: &str = "sshdeck";
