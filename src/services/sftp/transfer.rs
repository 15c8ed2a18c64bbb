// 文件传输会话
// 每个传输在独立任务中运行，不阻塞命令交互

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::sftp::{TransferOutcome, TransferProgress, TransferRequest};
use crate::ssh::error::SshError;
use crate::ssh::event::SessionEvent;
use crate::ssh::Connection;

/// 一次上传或下载
pub struct TransferSession {
    id: String,
    request: TransferRequest,
    progress: watch::Receiver<TransferProgress>,
    outcome: watch::Receiver<Option<TransferOutcome>>,
    cancel: CancellationToken,
}

impl TransferSession {
    /// 在给定运行时上启动传输
    pub fn start(connection: Arc<Connection>, request: TransferRequest, runtime: &Handle) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::default());
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        info!(
            "[Transfer] {} {:?}: {} <-> {}",
            id,
            request.direction,
            request.local_path.display(),
            request.remote_path
        );

        let task_id = id.clone();
        let task_request = request.clone();
        let task_cancel = cancel.clone();
        runtime.spawn(async move {
            let events = connection.events().clone();
            let result = connection
                .transfer(&task_request, &task_cancel, |transferred, total| {
                    progress_tx.send_modify(|p| p.update(transferred, total));
                    events.emit(SessionEvent::TransferProgress {
                        transfer_id: task_id.clone(),
                        transferred,
                        total,
                    });
                })
                .await;

            let outcome = match result {
                Ok(bytes) => {
                    info!("[Transfer] {} complete ({} bytes)", task_id, bytes);
                    TransferOutcome::completed()
                }
                Err(e) => {
                    warn!("[Transfer] {} failed: {}", task_id, e);
                    match e {
                        SshError::Cancelled => TransferOutcome::failed("Transfer cancelled"),
                        other => TransferOutcome::failed(connection.describe_error(&other)),
                    }
                }
            };

            events.emit(SessionEvent::TransferFinished {
                transfer_id: task_id,
                success: outcome.success,
                message: outcome.message.clone(),
            });
            outcome_tx.send_replace(Some(outcome));
        });

        Self {
            id,
            request,
            progress: progress_rx,
            outcome: outcome_rx,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// 最新进度
    pub fn progress(&self) -> TransferProgress {
        self.progress.borrow().clone()
    }

    /// 请求取消，在下一个分块前生效
    pub fn cancel(&self) {
        info!("[Transfer] Cancel requested for {}", self.id);
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// 等待传输结束
    pub async fn wait(&self) -> TransferOutcome {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(|o| o.is_some()).await {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| TransferOutcome::failed("Transfer aborted")),
            Err(_) => TransferOutcome::failed("Transfer aborted"),
        };
        result
    }
}
