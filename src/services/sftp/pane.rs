// SFTP 面板状态
// 跟踪一个会话的当前远程目录，负责列目录与目录导航

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, error};

use super::transfer::TransferSession;
use crate::models::sftp::{get_parent_path, join_path, DirectoryEntry, TransferRequest};
use crate::ssh::event::SessionEvent;
use crate::ssh::Connection;

/// 一个会话的 SFTP 面板
pub struct SftpPane {
    connection: Arc<Connection>,
    current_path: Mutex<String>,
    /// 主目录（首次 go_home 时获取）
    home: tokio::sync::OnceCell<String>,
}

impl SftpPane {
    pub fn new(connection: Arc<Connection>, initial_path: impl Into<String>) -> Self {
        Self {
            connection,
            current_path: Mutex::new(initial_path.into()),
            home: tokio::sync::OnceCell::new(),
        }
    }

    pub fn current_path(&self) -> String {
        self.current_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 当前目录下某个条目的完整路径
    pub fn child_path(&self, name: &str) -> String {
        join_path(&self.current_path(), name)
    }

    /// 列出目录并切换到该目录
    ///
    /// 成功时发出 `DirectoryListed`；失败时发出错误事件，当前目录不变，返回 None。
    pub async fn load_directory(&self, path: &str) -> Option<Vec<DirectoryEntry>> {
        let result = async { self.connection.sftp().await?.read_dir(path).await }.await;

        match result {
            Ok(entries) => {
                debug!("[SFTP] Pane {} now at {}", self.connection.id(), path);
                *self
                    .current_path
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = path.to_string();
                self.connection.events().emit(SessionEvent::DirectoryListed {
                    path: path.to_string(),
                    entries: entries.clone(),
                });
                Some(entries)
            }
            Err(e) => {
                error!("[SFTP] Failed to list {}: {}", path, e);
                self.connection
                    .events()
                    .error(self.connection.describe_error(&e));
                None
            }
        }
    }

    /// 重新列出当前目录
    pub async fn refresh(&self) -> Option<Vec<DirectoryEntry>> {
        let path = self.current_path();
        self.load_directory(&path).await
    }

    /// 进入上级目录
    pub async fn go_up(&self) -> Option<Vec<DirectoryEntry>> {
        let parent = get_parent_path(&self.current_path());
        self.load_directory(&parent).await
    }

    /// 进入用户主目录
    pub async fn go_home(&self) -> Option<Vec<DirectoryEntry>> {
        let home = self
            .home
            .get_or_init(|| async { self.connection.home_dir().await })
            .await
            .clone();
        self.load_directory(&home).await
    }

    /// 进入当前目录下的子目录
    pub async fn enter(&self, name: &str) -> Option<Vec<DirectoryEntry>> {
        let path = self.child_path(name);
        self.load_directory(&path).await
    }

    /// 把本地文件上传到当前目录
    pub fn upload_here(&self, local_path: &Path, runtime: &Handle) -> TransferSession {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let request = TransferRequest::upload(local_path, self.child_path(&name));
        TransferSession::start(self.connection.clone(), request, runtime)
    }

    /// 把当前目录下的文件下载到本地目录
    pub fn download_here(&self, name: &str, local_dir: &Path, runtime: &Handle) -> TransferSession {
        let request = TransferRequest::download(self.child_path(name), local_dir.join(name));
        TransferSession::start(self.connection.clone(), request, runtime)
    }
}
