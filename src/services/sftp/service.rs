// SFTP 服务 - 封装 russh-sftp 客户端

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::Handle;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::sftp::{sort_entries, DirectoryEntry};
use crate::ssh::error::SshError;
use crate::ssh::handler::SshClientHandler;

/// SFTP 服务
/// 一个连接上唯一的文件传输子通道，打开后被所有文件操作复用
pub struct SftpService {
    /// 会话 ID
    session_id: String,
    /// russh-sftp 客户端会话（线程安全）
    sftp: Arc<SftpSession>,
    /// 传输分块大小
    chunk_size: usize,
}

impl SftpService {
    /// 打开 SFTP 子系统
    pub async fn open(
        session_id: String,
        handle: &Handle<SshClientHandler>,
        chunk_size: usize,
    ) -> Result<Self, SshError> {
        info!("[SFTP] Opening SFTP subsystem for session {}", session_id);

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open channel: {}", e)))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::Sftp(format!("Failed to request sftp subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream()).await?;

        info!("[SFTP] SFTP subsystem ready for session {}", session_id);

        Ok(Self {
            session_id,
            sftp: Arc::new(sftp),
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 获取用户主目录，失败时回退到根目录
    pub async fn home_dir(&self) -> String {
        match self.sftp.canonicalize(".").await {
            Ok(path) => {
                debug!("[SFTP] Home directory: {}", path);
                path
            }
            Err(e) => {
                error!("[SFTP] Failed to get home directory: {}", e);
                "/".to_string()
            }
        }
    }

    /// 读取目录内容，目录在前、名称不区分大小写升序
    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirectoryEntry>, SshError> {
        debug!("[SFTP] Reading directory: {}", path);

        let dir = self.sftp.read_dir(path).await?;

        let mut entries: Vec<DirectoryEntry> = dir
            .into_iter()
            .filter_map(|entry| {
                let name = entry.file_name();
                // 跳过 . 和 ..
                if name == "." || name == ".." {
                    return None;
                }
                let attrs = entry.metadata();
                Some(DirectoryEntry::new(
                    name,
                    attrs.is_dir(),
                    attrs.size.unwrap_or(0),
                ))
            })
            .collect();

        sort_entries(&mut entries);

        debug!("[SFTP] Read {} entries from {}", entries.len(), path);
        Ok(entries)
    }

    /// 创建目录
    pub async fn mkdir(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Creating directory: {}", path);
        Ok(self.sftp.create_dir(path).await?)
    }

    /// 删除文件
    pub async fn remove_file(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Removing file: {}", path);
        Ok(self.sftp.remove_file(path).await?)
    }

    /// 删除目录（必须为空）
    pub async fn remove_dir(&self, path: &str) -> Result<(), SshError> {
        info!("[SFTP] Removing directory: {}", path);
        Ok(self.sftp.remove_dir(path).await?)
    }

    /// 重命名文件或目录
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SshError> {
        info!("[SFTP] Renaming {} -> {}", from, to);
        Ok(self.sftp.rename(from, to).await?)
    }

    /// 分块下载远程文件
    ///
    /// 数据先写入同目录下的临时文件，完成后改名覆盖目标；失败或取消时只删除临时文件。
    /// 每写完一块调用一次 `progress(已传输, 总大小)`；每块之前检查取消令牌。
    pub async fn download_file<F>(
        &self,
        remote_path: &str,
        local_path: &Path,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<u64, SshError>
    where
        F: Fn(u64, u64) + Send,
    {
        info!(
            "[SFTP] Downloading {} -> {}",
            remote_path,
            local_path.display()
        );

        let total = self
            .sftp
            .metadata(remote_path)
            .await?
            .size
            .unwrap_or(0);
        let remote = self.sftp.open(remote_path).await?;

        let partial = partial_path(local_path);
        let received = match self.receive(remote, &partial, total, cancel, progress).await {
            Ok(transferred) => tokio::fs::rename(&partial, local_path)
                .await
                .map(|_| transferred)
                .map_err(SshError::from),
            Err(e) => Err(e),
        };

        match received {
            Ok(transferred) => {
                info!(
                    "[SFTP] Download complete: {} ({} bytes)",
                    remote_path, transferred
                );
                Ok(transferred)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!("[SFTP] No partial file to remove at {}: {}", partial.display(), cleanup);
                } else {
                    warn!("[SFTP] Removed partial download {}", partial.display());
                }
                Err(e)
            }
        }
    }

    /// 把远程文件内容写入本地临时文件
    async fn receive<F>(
        &self,
        mut remote: File,
        partial: &Path,
        total: u64,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<u64, SshError>
    where
        F: Fn(u64, u64) + Send,
    {
        let mut local = tokio::fs::File::create(partial).await?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut transferred = 0u64;
        progress(transferred, total);

        loop {
            if cancel.is_cancelled() {
                return Err(SshError::Cancelled);
            }
            let n = remote.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            local.write_all(&buffer[..n]).await?;
            transferred += n as u64;
            progress(transferred, total.max(transferred));
        }

        local.flush().await?;
        Ok(transferred)
    }

    /// 分块上传本地文件（覆盖远程同名文件）
    pub async fn upload_file<F>(
        &self,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<u64, SshError>
    where
        F: Fn(u64, u64) + Send,
    {
        info!(
            "[SFTP] Uploading {} -> {}",
            local_path.display(),
            remote_path
        );

        let mut local = tokio::fs::File::open(local_path).await?;
        let total = local.metadata().await?.len();

        let mut remote = self
            .sftp
            .open_with_flags(
                remote_path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut transferred = 0u64;
        progress(transferred, total);

        loop {
            if cancel.is_cancelled() {
                return Err(SshError::Cancelled);
            }
            let n = local.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            remote.write_all(&buffer[..n]).await?;
            transferred += n as u64;
            progress(transferred, total.max(transferred));
        }

        remote.flush().await?;
        remote.shutdown().await?;
        info!(
            "[SFTP] Upload complete: {} ({} bytes)",
            remote_path, transferred
        );
        Ok(transferred)
    }
}

/// 下载用的临时文件：与目标同目录，以 `.` 开头并带随机后缀
fn partial_path(local_path: &Path) -> PathBuf {
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    local_path.with_file_name(format!(".{}.{}.part", name, &suffix[..8]))
}

impl Drop for SftpService {
    fn drop(&mut self) {
        debug!(
            "[SFTP] Dropping SFTP service for session {}",
            self.session_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let target = Path::new("/tmp/downloads/report.pdf");
        let partial = partial_path(target);
        assert_eq!(partial.parent(), target.parent());

        let name = partial.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".report.pdf."));
        assert!(name.ends_with(".part"));
        assert_ne!(partial_path(target), partial);
    }
}
