// SFTP 传输相关类型
// 定义传输方向、请求、进度和结果

use std::path::PathBuf;
use std::time::Instant;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn is_upload(&self) -> bool {
        matches!(self, TransferDirection::Upload)
    }
}

/// 传输请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 远程文件路径
    pub remote_path: String,
    /// 传输方向
    pub direction: TransferDirection,
}

impl TransferRequest {
    /// 创建上传请求
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: TransferDirection::Upload,
        }
    }

    /// 创建下载请求
    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: TransferDirection::Download,
        }
    }

    /// 获取文件名
    pub fn file_name(&self) -> String {
        if self.direction.is_upload() {
            self.local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.local_path.to_string_lossy().to_string())
        } else {
            self.remote_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.remote_path)
                .to_string()
        }
    }
}

/// 传输进度
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    /// 已传输字节数
    pub bytes_transferred: u64,
    /// 总字节数
    pub bytes_total: u64,
    /// 开始时间
    pub started_at: Option<Instant>,
}

impl TransferProgress {
    /// 更新进度
    pub fn update(&mut self, bytes_transferred: u64, bytes_total: u64) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.bytes_transferred = bytes_transferred;
        self.bytes_total = bytes_total;
    }

    /// 获取进度百分比 (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.bytes_total as f64) * 100.0
    }

    /// 平均速度 (bytes/s)
    pub fn speed_bytes_per_sec(&self) -> u64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let elapsed = started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes_transferred as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// 传输结果（不会向外抛出错误）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
}

impl TransferOutcome {
    pub fn completed() -> Self {
        Self {
            success: true,
            message: "Transfer complete".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
