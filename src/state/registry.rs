// 会话注册表
// 管理所有会话标签：创建、重命名、关闭与索引压缩

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::COMMAND_STOP_TIMEOUT;
use crate::models::monitor::SystemInfo;
use crate::models::sftp::TransferRequest;
use crate::models::{ConnectionConfig, CoreSettings};
use crate::services::command::CommandSession;
use crate::services::monitor::SystemInfoProbe;
use crate::services::sftp::{SftpPane, TransferSession};
use crate::ssh::event::{CoreEvent, EventSink, SessionEvent};
use crate::ssh::{Connection, SshError};

/// 会话连接状态
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Failed(String),
}

/// 关闭请求的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// 另一个关闭操作正在进行，本次请求被忽略
    Busy,
    NotFound,
}

/// 单个会话标签
struct SessionEntry {
    id: String,
    display_name: String,
    status: SessionStatus,
    connection: Arc<Connection>,
    /// 当前交互命令
    command: Option<Arc<CommandSession>>,
    /// 连接成功后挂载
    sftp_pane: Option<Arc<SftpPane>>,
    system_info: Option<SystemInfo>,
    connected_at: Option<DateTime<Local>>,
}

struct RegistryInner {
    runtime: Handle,
    settings: CoreSettings,
    sender: mpsc::UnboundedSender<CoreEvent>,
    /// Vec 中的位置就是逻辑索引，删除后自然保持 [0, N) 连续
    entries: Mutex<Vec<SessionEntry>>,
    /// 整个注册表共用的关闭中标志
    closing: AtomicBool,
}

/// 关闭期间持有，离开作用域时清除关闭中标志
struct ClosingGuard<'a>(&'a AtomicBool);

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 会话注册表
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// 创建注册表，返回事件接收端
    pub fn new(runtime: Handle, settings: CoreSettings) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = RegistryInner {
            runtime,
            settings,
            sender,
            entries: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.inner.settings
    }

    fn entries(&self) -> MutexGuard<'_, Vec<SessionEntry>> {
        self.inner.entries()
    }

    /// 在索引处读取条目的一部分；索引不存在时记录警告
    fn with_entry<T>(&self, index: usize, f: impl FnOnce(&SessionEntry) -> T) -> Option<T> {
        let entries = self.entries();
        match entries.get(index) {
            Some(entry) => Some(f(entry)),
            None => {
                warn!("[Registry] No session at index {}", index);
                None
            }
        }
    }

    // ======================== 创建 ========================

    /// 添加会话并开始异步连接，立即返回索引
    pub fn add_session(&self, config: ConnectionConfig, display_name: Option<&str>) -> usize {
        let id = uuid::Uuid::new_v4().to_string();
        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| config.display_name())
            .to_string();

        let sink = EventSink::new(id.clone(), self.inner.sender.clone());
        let connection = Connection::new(config, self.inner.settings.clone(), sink);

        let index = {
            let mut entries = self.entries();
            entries.push(SessionEntry {
                id: id.clone(),
                display_name: display_name.clone(),
                status: SessionStatus::Connecting,
                connection: connection.clone(),
                command: None,
                sftp_pane: None,
                system_info: None,
                connected_at: None,
            });
            entries.len() - 1
        };

        info!(
            "[Registry] Session {} '{}' added at index {}",
            id, display_name, index
        );

        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            match connection.connect().await {
                Ok(()) => RegistryInner::on_connected(inner, id, connection).await,
                Err(SshError::Cancelled) => {
                    debug!("[Registry] Connect of {} cancelled", id);
                }
                Err(e) => {
                    let message = connection.describe_error(&e);
                    inner.update(&id, |entry| entry.status = SessionStatus::Failed(message));
                }
            }
        });

        index
    }

    // ======================== 关闭 ========================

    /// 关闭会话：先停止命令，再断开连接，最后移除并压缩索引
    ///
    /// 已有关闭操作进行中时直接忽略本次请求。
    pub async fn close_session(&self, index: usize) -> CloseOutcome {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            warn!("[Registry] Close of index {} ignored, another close is in progress", index);
            return CloseOutcome::Busy;
        }
        let _guard = ClosingGuard(&self.inner.closing);

        let Some((id, connection, command)) = self.with_entry(index, |e| {
            (e.id.clone(), e.connection.clone(), e.command.clone())
        }) else {
            return CloseOutcome::NotFound;
        };

        info!("[Registry] Closing session {} at index {}", id, index);
        if let Some(command) = command {
            stop_command(&command).await;
        }
        connection.disconnect().await;
        self.inner.remove_entry(&id);
        CloseOutcome::Closed
    }

    /// 断开并移除会话（不需要确认，用于 `exit` 命令）
    pub async fn disconnect_session(&self, index: usize) -> bool {
        let Some(id) = self.with_entry(index, |e| e.id.clone()) else {
            return false;
        };
        self.inner.teardown(&id).await;
        true
    }

    /// 关闭全部会话（退出时使用）
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.entries().iter().map(|e| e.id.clone()).collect();
        for id in ids {
            self.inner.teardown(&id).await;
        }
    }

    // ======================== 元数据 ========================

    /// 重命名，名称去首尾空白后不能为空
    pub fn rename_session(&self, index: usize, new_name: &str) -> bool {
        let name = new_name.trim();
        if name.is_empty() {
            warn!("[Registry] Rename of index {} rejected: empty name", index);
            return false;
        }
        let mut entries = self.entries();
        match entries.get_mut(index) {
            Some(entry) => {
                info!(
                    "[Registry] Session {} renamed '{}' -> '{}'",
                    entry.id, entry.display_name, name
                );
                entry.display_name = name.to_string();
                true
            }
            None => {
                warn!("[Registry] No session at index {}", index);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// 当前所有会话 ID，顺序即索引顺序
    pub fn session_ids(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.id.clone()).collect()
    }

    pub fn session_id(&self, index: usize) -> Option<String> {
        self.with_entry(index, |e| e.id.clone())
    }

    pub fn index_of(&self, session_id: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.id == session_id)
    }

    pub fn display_name(&self, index: usize) -> Option<String> {
        self.with_entry(index, |e| e.display_name.clone())
    }

    pub fn status(&self, index: usize) -> Option<SessionStatus> {
        self.with_entry(index, |e| e.status.clone())
    }

    /// 标签标题
    pub fn tab_title(&self, index: usize) -> Option<String> {
        self.with_entry(index, |e| match e.status {
            SessionStatus::Connecting => format!("{} (connecting...)", e.display_name),
            SessionStatus::Connected => e.display_name.clone(),
            SessionStatus::Failed(_) => format!("{} (connection failed)", e.display_name),
        })
    }

    pub fn connection(&self, index: usize) -> Option<Arc<Connection>> {
        self.with_entry(index, |e| e.connection.clone())
    }

    pub fn sftp_pane(&self, index: usize) -> Option<Arc<SftpPane>> {
        self.with_entry(index, |e| e.sftp_pane.clone()).flatten()
    }

    pub fn system_info(&self, index: usize) -> Option<SystemInfo> {
        self.with_entry(index, |e| e.system_info.clone()).flatten()
    }

    pub fn connected_at(&self, index: usize) -> Option<DateTime<Local>> {
        self.with_entry(index, |e| e.connected_at).flatten()
    }

    /// 终端提示符
    pub fn prompt(&self, index: usize) -> Option<String> {
        self.with_entry(index, |e| e.connection.prompt())
    }

    // ======================== 命令 ========================

    /// 执行用户输入的一行命令
    ///
    /// `exit` 断开会话；有命令仍在运行时，这一行作为输入转交给该命令。
    pub fn execute_command(&self, index: usize, text: &str) -> bool {
        let Some((id, connection, running)) = self.with_entry(index, |e| {
            let running = e.command.clone().filter(|c| !c.is_finished());
            (e.id.clone(), e.connection.clone(), running)
        }) else {
            return false;
        };

        let command = text.trim();
        if command.is_empty() {
            return false;
        }

        if !connection.is_connected() {
            connection
                .events()
                .output(SshError::NotConnected.to_string(), true);
            return false;
        }

        if let Some(running) = running {
            running.send_input(format!("{}\n", command));
            return true;
        }

        if command == "exit" {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(async move { inner.teardown(&id).await });
            return true;
        }

        let session = Arc::new(CommandSession::execute(
            connection,
            command,
            &self.inner.runtime,
        ));
        self.inner.update(&id, |entry| entry.command = Some(session));
        true
    }

    /// 向当前命令投递输入
    pub fn send_input(&self, index: usize, text: &str) -> bool {
        match self.with_entry(index, |e| e.command.clone()).flatten() {
            Some(command) if !command.is_finished() => {
                command.send_input(text);
                true
            }
            _ => false,
        }
    }

    /// 中断当前命令
    pub fn interrupt(&self, index: usize) -> bool {
        match self.with_entry(index, |e| e.command.clone()).flatten() {
            Some(command) if !command.is_finished() => {
                command.stop();
                true
            }
            _ => false,
        }
    }

    // ======================== 文件操作 ========================

    fn pane_or_warn(&self, index: usize) -> Option<Arc<SftpPane>> {
        let pane = self.sftp_pane(index);
        if pane.is_none() {
            debug!("[Registry] Session at index {} has no SFTP pane yet", index);
        }
        pane
    }

    /// 列出目录，结果通过 `DirectoryListed` 事件返回
    pub fn list_dir(&self, index: usize, path: &str) -> bool {
        let Some(pane) = self.pane_or_warn(index) else {
            return false;
        };
        let path = path.to_string();
        self.inner.runtime.spawn(async move {
            pane.load_directory(&path).await;
        });
        true
    }

    pub fn mkdir(&self, index: usize, path: &str) -> bool {
        let Some(pane) = self.pane_or_warn(index) else {
            return false;
        };
        let Some(connection) = self.connection(index) else {
            return false;
        };
        let path = path.to_string();
        self.inner.runtime.spawn(async move {
            if connection.mkdir(&path).await {
                pane.refresh().await;
            }
        });
        true
    }

    /// 删除文件或空目录
    pub fn remove(&self, index: usize, path: &str, is_directory: bool) -> bool {
        let Some(pane) = self.pane_or_warn(index) else {
            return false;
        };
        let Some(connection) = self.connection(index) else {
            return false;
        };
        let path = path.to_string();
        self.inner.runtime.spawn(async move {
            let removed = if is_directory {
                connection.remove_dir(&path).await
            } else {
                connection.remove_file(&path).await
            };
            if removed {
                pane.refresh().await;
            }
        });
        true
    }

    pub fn rename_path(&self, index: usize, from: &str, to: &str) -> bool {
        let Some(pane) = self.pane_or_warn(index) else {
            return false;
        };
        let Some(connection) = self.connection(index) else {
            return false;
        };
        let (from, to) = (from.to_string(), to.to_string());
        self.inner.runtime.spawn(async move {
            if connection.rename(&from, &to).await {
                pane.refresh().await;
            }
        });
        true
    }

    pub fn upload_file(
        &self,
        index: usize,
        local_path: impl Into<PathBuf>,
        remote_path: &str,
    ) -> Option<TransferSession> {
        self.start_transfer(index, TransferRequest::upload(local_path, remote_path))
    }

    pub fn download_file(
        &self,
        index: usize,
        remote_path: &str,
        local_path: impl Into<PathBuf>,
    ) -> Option<TransferSession> {
        self.start_transfer(index, TransferRequest::download(remote_path, local_path))
    }

    fn start_transfer(&self, index: usize, request: TransferRequest) -> Option<TransferSession> {
        let connection = self.connection(index)?;
        if !connection.is_connected() {
            connection.events().error(SshError::NotConnected.to_string());
            return None;
        }
        Some(TransferSession::start(
            connection,
            request,
            &self.inner.runtime,
        ))
    }
}

/// 中断命令并等待其关闭通道，之后才能断开连接
async fn stop_command(command: &CommandSession) {
    if command.is_finished() {
        return;
    }
    command.stop();
    if tokio::time::timeout(COMMAND_STOP_TIMEOUT, command.wait())
        .await
        .is_err()
    {
        warn!(
            "[Registry] Command '{}' did not stop within {:?}",
            command.command(),
            COMMAND_STOP_TIMEOUT
        );
    }
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, Vec<SessionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 按 ID 修改条目；条目已被移除时不做任何事
    fn update(&self, id: &str, f: impl FnOnce(&mut SessionEntry)) -> bool {
        let mut entries = self.entries();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// 按 ID 移除条目；列表由非空变为空时发出一次 `AllSessionsClosed`
    fn remove_entry(&self, id: &str) -> bool {
        let became_empty = {
            let mut entries = self.entries();
            let Some(pos) = entries.iter().position(|e| e.id == id) else {
                return false;
            };
            entries.remove(pos);
            entries.is_empty()
        };

        info!("[Registry] Session {} removed", id);
        if became_empty {
            info!("[Registry] All sessions closed");
            let _ = self.sender.send(CoreEvent::AllSessionsClosed);
        }
        true
    }

    /// 停止命令、断开连接并移除
    async fn teardown(&self, id: &str) {
        let parts = self
            .entries()
            .iter()
            .find(|e| e.id == id)
            .map(|e| (e.connection.clone(), e.command.clone()));
        let Some((connection, command)) = parts else {
            return;
        };
        if let Some(command) = command {
            stop_command(&command).await;
        }
        connection.disconnect().await;
        self.remove_entry(id);
    }

    /// 连接成功：挂载 SFTP 面板、列出初始目录、获取系统信息并监视断线
    async fn on_connected(inner: Arc<Self>, id: String, connection: Arc<Connection>) {
        let pane = Arc::new(SftpPane::new(
            connection.clone(),
            inner.settings.sftp.initial_path.clone(),
        ));

        let attached = inner.update(&id, |entry| {
            entry.status = SessionStatus::Connected;
            entry.connected_at = Some(Local::now());
            entry.sftp_pane = Some(pane.clone());
        });
        if !attached {
            // 连接期间条目已被移除
            connection.disconnect().await;
            return;
        }

        let initial_path = inner.settings.sftp.initial_path.clone();
        inner.runtime.spawn(async move {
            pane.load_directory(&initial_path).await;
        });

        if inner.settings.probe.fetch_system_info {
            let probe_inner = inner.clone();
            let probe_id = id.clone();
            let probe = SystemInfoProbe::new(connection.clone());
            let events = connection.events().clone();
            inner.runtime.spawn(async move {
                let info = probe.collect().await;
                probe_inner.update(&probe_id, |entry| entry.system_info = Some(info.clone()));
                events.emit(SessionEvent::SystemInfoReady(info));
            });
        }

        // 传输自行关闭时自动移除该会话
        let mut state = connection.watch_state();
        let runtime = inner.runtime.clone();
        runtime.spawn(async move {
            let _ = state.wait_for(|s| s.is_terminal()).await;
            if inner.remove_entry(&id) {
                info!("[Registry] Session {} removed after disconnect", id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::test_server::{collect_until, wait_until, TestServer, PASSWORD};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn unreachable(name: &str) -> ConnectionConfig {
        ConnectionConfig::with_password(name, "127.0.0.1", 1, "tester", "secret")
    }

    fn registry() -> (SessionRegistry, mpsc::UnboundedReceiver<CoreEvent>) {
        SessionRegistry::new(Handle::current(), CoreSettings::default())
    }

    fn server_settings(fetch_system_info: bool) -> CoreSettings {
        let mut settings = CoreSettings::default();
        settings.probe.fetch_system_info = fetch_system_info;
        settings
    }

    fn count_all_closed(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> usize {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, CoreEvent::AllSessionsClosed))
            .count()
    }

    async fn wait_until_settled(registry: &SessionRegistry, index: usize) {
        for _ in 0..250 {
            if registry.status(index) != Some(SessionStatus::Connecting) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} never left connecting state", index);
    }

    #[tokio::test]
    async fn test_add_returns_dense_indices() {
        let (registry, _rx) = registry();
        assert_eq!(registry.add_session(unreachable("a"), None), 0);
        assert_eq!(registry.add_session(unreachable("b"), None), 1);
        assert_eq!(registry.add_session(unreachable("c"), Some("  custom ")), 2);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.display_name(2).as_deref(), Some("custom"));
        assert_eq!(registry.tab_title(0).as_deref(), Some("a (connecting...)"));
    }

    #[tokio::test]
    async fn test_close_compacts_indices_preserving_order() {
        let (registry, _rx) = registry();
        for name in ["a", "b", "c"] {
            registry.add_session(unreachable(name), None);
        }
        let ids = registry.session_ids();

        assert_eq!(registry.close_session(1).await, CloseOutcome::Closed);

        assert_eq!(registry.session_ids(), vec![ids[0].clone(), ids[2].clone()]);
        assert_eq!(registry.index_of(&ids[0]), Some(0));
        assert_eq!(registry.index_of(&ids[2]), Some(1));
        assert_eq!(registry.index_of(&ids[1]), None);
        assert_eq!(registry.display_name(1).as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_all_sessions_closed_fires_once() {
        let (registry, mut rx) = registry();
        for name in ["a", "b", "c"] {
            registry.add_session(unreachable(name), None);
        }

        assert_eq!(registry.close_session(2).await, CloseOutcome::Closed);
        assert_eq!(registry.close_session(0).await, CloseOutcome::Closed);
        assert_eq!(count_all_closed(&mut rx), 0);

        assert_eq!(registry.close_session(0).await, CloseOutcome::Closed);
        assert!(registry.is_empty());
        assert_eq!(count_all_closed(&mut rx), 1);

        assert_eq!(registry.close_session(0).await, CloseOutcome::NotFound);
        assert_eq!(count_all_closed(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_close_while_busy_is_ignored() {
        let (registry, _rx) = registry();
        registry.add_session(unreachable("a"), None);

        registry.inner.closing.store(true, Ordering::Release);
        assert_eq!(registry.close_session(0).await, CloseOutcome::Busy);
        assert_eq!(registry.len(), 1);

        registry.inner.closing.store(false, Ordering::Release);
        assert_eq!(registry.close_session(0).await, CloseOutcome::Closed);
    }

    #[tokio::test]
    async fn test_rename() {
        let (registry, _rx) = registry();
        registry.add_session(unreachable("a"), None);

        assert!(registry.rename_session(0, "  prod-db  "));
        assert_eq!(registry.display_name(0).as_deref(), Some("prod-db"));
        assert!(!registry.rename_session(0, "   "));
        assert_eq!(registry.display_name(0).as_deref(), Some("prod-db"));
        assert!(!registry.rename_session(5, "x"));
    }

    #[tokio::test]
    async fn test_failed_connection_stays_until_closed() {
        let (registry, mut rx) = registry();
        registry.add_session(unreachable("a"), None);
        wait_until_settled(&registry, 0).await;

        match registry.status(0) {
            Some(SessionStatus::Failed(message)) => {
                assert!(message.starts_with("Connection refused"))
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(registry.tab_title(0).as_deref(), Some("a (connection failed)"));
        assert!(registry.sftp_pane(0).is_none());

        // 未连接时的命令只产生错误输出
        assert!(!registry.execute_command(0, "ls"));
        let not_connected = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(
                e,
                CoreEvent::Session {
                    event: SessionEvent::Output { is_error: true, ref text },
                    ..
                } if text == "Not connected to server"
            )
        });
        assert!(not_connected);
        assert!(!registry.list_dir(0, "/"));
        assert!(!registry.rename_path(0, "/tmp/a", "/tmp/b"));
        assert!(registry.system_info(0).is_none());
        assert!(registry.upload_file(0, "/tmp/a", "/tmp/a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_session_removes_entry() {
        let (registry, mut rx) = registry();
        registry.add_session(unreachable("a"), None);
        assert!(registry.disconnect_session(0).await);
        assert!(registry.is_empty());
        assert_eq!(count_all_closed(&mut rx), 1);
        assert!(!registry.disconnect_session(0).await);
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let (registry, mut rx) = registry();
        for name in ["a", "b", "c"] {
            registry.add_session(unreachable(name), None);
        }
        registry.close_all().await;
        assert!(registry.is_empty());
        assert_eq!(count_all_closed(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_close_interrupts_running_command_before_disconnect() {
        let server = TestServer::start().await;
        let (registry, mut rx) = SessionRegistry::new(Handle::current(), server_settings(false));
        registry.add_session(server.config(PASSWORD), None);
        wait_until_settled(&registry, 0).await;
        assert_eq!(registry.status(0), Some(SessionStatus::Connected));

        assert!(registry.execute_command(0, "cat"));
        assert!(registry.send_input(0, "ping\n"));
        let recorded = server.recorded.clone();
        wait_until("command input", || recorded.input() == b"ping\n").await;

        assert_eq!(registry.close_session(0).await, CloseOutcome::Closed);
        wait_until("interrupt byte", || recorded.interrupted()).await;
        assert_eq!(recorded.input(), b"ping\n\x03".to_vec());
        assert!(registry.is_empty());
        assert_eq!(count_all_closed(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_system_info_collected_after_connect() {
        let server = TestServer::start().await;
        let (registry, mut rx) = SessionRegistry::new(Handle::current(), server_settings(true));
        registry.add_session(server.config(PASSWORD), None);

        collect_until(&mut rx, |e| matches!(e, SessionEvent::SystemInfoReady(_))).await;
        // 测试服务器不认识探测命令，各项保留默认值
        assert_eq!(registry.system_info(0), Some(SystemInfo::default()));
        assert!(registry.connected_at(0).is_some());

        registry.close_all().await;
        assert!(registry.is_empty());
    }
}
