// SSH 连接
// 一个 Connection 对应一台主机的一条传输，负责认证、命令执行与文件操作

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use russh::client::Handle;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::SshClient;
use super::config::SshConfig;
use super::error::SshError;
use super::event::{EventSink, SessionEvent};
use super::handler::SshClientHandler;
use super::session::{CommandOutput, ExecChannel, InteractiveChannel, PtyRequest};
use crate::constants::LIVENESS_INTERVAL;
use crate::models::sftp::{DirectoryEntry, TransferDirection, TransferRequest};
use crate::models::{ConnectionConfig, CoreSettings};
use crate::services::sftp::SftpService;

/// 获取主机名的超时
const HOSTNAME_TIMEOUT: Duration = Duration::from_secs(5);

/// 连接生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

/// SSH 连接
pub struct Connection {
    id: String,
    config: ConnectionConfig,
    ssh_config: SshConfig,
    settings: CoreSettings,
    events: EventSink,
    state: watch::Sender<ConnectionState>,
    handle: RwLock<Option<Arc<Handle<SshClientHandler>>>>,
    /// 文件传输子通道，首次使用时打开，之后复用
    sftp: tokio::sync::Mutex<Option<Arc<SftpService>>>,
    /// 当前交互通道（同一时刻最多一个）
    interactive: Mutex<Option<Arc<InteractiveChannel>>>,
    hostname: RwLock<String>,
    /// 服务器公钥指纹（SHA-256）
    host_key: RwLock<Option<String>>,
    current_path: RwLock<String>,
    disconnect_requested: AtomicBool,
}

impl Connection {
    /// 创建连接（尚未建立传输）
    pub fn new(config: ConnectionConfig, settings: CoreSettings, events: EventSink) -> Arc<Self> {
        let ssh_config = SshConfig::from_connection(&config, &settings.connection);
        let (state, _) = watch::channel(ConnectionState::Created);
        let hostname = config.host.clone();

        Arc::new(Self {
            id: events.session_id().to_string(),
            config,
            ssh_config,
            settings,
            events,
            state,
            handle: RwLock::new(None),
            sftp: tokio::sync::Mutex::new(None),
            interactive: Mutex::new(None),
            hostname: RwLock::new(hostname),
            host_key: RwLock::new(None),
            current_path: RwLock::new("~".to_string()),
            disconnect_requested: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 建立连接
    ///
    /// 成功时发出 `Connected`，失败时发出分类后的 `Error` 消息。
    pub async fn connect(self: &Arc<Self>) -> Result<(), SshError> {
        if self.is_connected() {
            return Ok(());
        }
        // 断开后的连接不能再次使用，状态保持在终止态
        if self.disconnect_requested.load(Ordering::Acquire) {
            debug!("[SSH] Connection {} already disconnected, connect ignored", self.id);
            return Err(SshError::Cancelled);
        }
        self.state.send_replace(ConnectionState::Connecting);

        info!(
            "[SSH] Connecting to {}@{}:{}",
            self.ssh_config.username, self.ssh_config.host, self.ssh_config.port
        );

        let client = SshClient::new(&self.ssh_config, &self.events);
        let result = match self.ssh_config.validate() {
            Ok(()) => client.connect().await,
            Err(e) => Err(e),
        };

        let handle = match result {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                error!(
                    "[SSH] Connection to {}:{} failed: {}",
                    self.ssh_config.host, self.ssh_config.port, e
                );
                if self.disconnect_requested.load(Ordering::Acquire) {
                    self.state.send_replace(ConnectionState::Disconnected);
                } else {
                    self.state.send_replace(ConnectionState::Error);
                    self.events.error(self.describe_error(&e));
                }
                return Err(e);
            }
        };

        let cancelled = {
            let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
            // 连接过程中已请求断开：丢弃新传输
            if self.disconnect_requested.load(Ordering::Acquire) {
                true
            } else {
                *slot = Some(handle.clone());
                self.state.send_replace(ConnectionState::Connected);
                false
            }
        };
        if cancelled {
            info!("[SSH] Connection {} cancelled during connect", self.id);
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "English")
                .await;
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(SshError::Cancelled);
        }

        *self.host_key.write().unwrap_or_else(PoisonError::into_inner) =
            client.host_key_fingerprint();
        self.fetch_hostname().await;
        self.events.emit(SessionEvent::Connected);
        info!("[SSH] Connection {} established", self.id);

        self.spawn_liveness_watch();
        Ok(())
    }

    /// 尽力获取远端主机名，失败时保留配置中的主机地址
    async fn fetch_hostname(&self) {
        let output = self.execute_command("hostname", HOSTNAME_TIMEOUT).await;
        let name = output.stdout.trim();
        if name.is_empty() {
            debug!("[SSH] Hostname lookup failed, using {}", self.config.host);
            return;
        }
        *self.hostname.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    /// 传输被远端关闭时把连接标记为断开
    fn spawn_liveness_watch(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIVENESS_INTERVAL).await;
                let Some(conn) = weak.upgrade() else { break };
                if conn.state() != ConnectionState::Connected {
                    break;
                }
                let closed = conn
                    .handle()
                    .map(|h| h.is_closed())
                    .unwrap_or(true);
                if closed {
                    warn!("[SSH] Transport of connection {} closed by peer", conn.id);
                    conn.disconnect().await;
                    break;
                }
            }
        });
    }

    /// 断开连接（幂等）
    ///
    /// 依次关闭文件传输子通道、交互通道、传输；某一步出错时发出错误事件，后续步骤照常执行。
    pub async fn disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::Release);
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Disconnected {
            return;
        }

        info!("[SSH] Disconnecting {}", self.id);

        if let Some(sftp) = self.sftp.lock().await.take() {
            debug!("[SFTP] Closing SFTP subsystem for {}", sftp.session_id());
            drop(sftp);
        }

        let channel = self
            .interactive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!("[SSH] Failed to close interactive channel: {}", e);
                self.events.error(self.describe_error(&e));
            }
        }

        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "English")
                .await
            {
                warn!("[SSH] Failed to close transport: {}", e);
                self.events.error(self.describe_error(&SshError::from(e)));
            }
        }

        if previous == ConnectionState::Connected {
            self.events.emit(SessionEvent::Disconnected);
        }
    }

    /// 传输存在且连接成功后未断开
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.handle().is_some()
    }

    fn handle(&self) -> Option<Arc<Handle<SshClientHandler>>> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 远端主机名（未知时为配置的主机地址）
    pub fn hostname(&self) -> String {
        self.hostname
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 本次连接接受的服务器公钥指纹
    pub fn host_key_fingerprint(&self) -> Option<String> {
        self.host_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_path(&self) -> String {
        self.current_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_current_path(&self, path: impl Into<String>) {
        *self
            .current_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    /// 终端提示符 `user@host:path$ `，root 用户为 `#`
    pub fn prompt(&self) -> String {
        let symbol = if self.config.username == "root" {
            '#'
        } else {
            '$'
        };
        format!(
            "{}@{}:{}{} ",
            self.config.username,
            self.hostname(),
            self.current_path(),
            symbol
        )
    }

    /// 面向用户的错误消息
    pub fn describe_error(&self, e: &SshError) -> String {
        e.user_message(&self.ssh_config.host, self.ssh_config.port)
    }

    // ======================== 命令执行 ========================

    /// 一次性执行命令（用于短诊断命令）
    ///
    /// 未连接或出错时不返回错误，消息写入 `stderr`。
    pub async fn execute_command(&self, command: &str, limit: Duration) -> CommandOutput {
        let Some(handle) = self.handle() else {
            return CommandOutput::failure(SshError::NotConnected.to_string());
        };

        debug!("[SSH] exec on {}: {}", self.id, command);
        let run = async {
            let channel = ExecChannel::open(&handle).await?;
            channel.exec(command).await
        };

        match timeout(limit, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("[SSH] exec '{}' failed: {}", command, e);
                CommandOutput::failure(self.describe_error(&e))
            }
            Err(_) => {
                warn!("[SSH] exec '{}' timed out after {:?}", command, limit);
                CommandOutput::failure(format!(
                    "Command timed out after {}s",
                    limit.as_secs()
                ))
            }
        }
    }

    /// 打开交互式通道并启动命令；失败时发出错误事件并返回 None
    pub async fn open_interactive_channel(&self, command: &str) -> Option<Arc<InteractiveChannel>> {
        let Some(handle) = self.handle() else {
            self.events.error(SshError::NotConnected.to_string());
            return None;
        };

        let pty = PtyRequest {
            term: self.settings.terminal.term.clone(),
            col_width: self.settings.terminal.cols,
            row_height: self.settings.terminal.rows,
        };

        match InteractiveChannel::open(handle, &pty, command).await {
            Ok(channel) => {
                let channel = Arc::new(channel);
                *self
                    .interactive
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(channel.clone());
                Some(channel)
            }
            Err(e) => {
                error!("[SSH] Failed to open interactive channel: {}", e);
                self.events.error(self.describe_error(&e));
                None
            }
        }
    }

    /// 交互通道已由持有者关闭
    pub fn release_interactive_channel(&self, channel: &Arc<InteractiveChannel>) {
        let mut slot = self
            .interactive
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, channel)) {
            *slot = None;
        }
    }

    // ======================== 文件操作 ========================

    /// 获取（必要时打开）文件传输子通道
    pub async fn sftp(&self) -> Result<Arc<SftpService>, SshError> {
        let mut slot = self.sftp.lock().await;
        if let Some(sftp) = slot.as_ref() {
            return Ok(sftp.clone());
        }
        let handle = self.handle().ok_or(SshError::NotConnected)?;
        let service = Arc::new(
            SftpService::open(
                self.id.clone(),
                &handle,
                self.settings.sftp.transfer_chunk_size,
            )
            .await?,
        );
        *slot = Some(service.clone());
        Ok(service)
    }

    fn report<T>(&self, op: &str, result: Result<T, SshError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!("[SFTP] {} failed on {}: {}", op, self.id, e);
                self.events.error(self.describe_error(&e));
                None
            }
        }
    }

    /// 列出目录；任何失败返回空列表
    pub async fn list_dir(&self, path: &str) -> Vec<DirectoryEntry> {
        let result = async { self.sftp().await?.read_dir(path).await }.await;
        self.report("list_dir", result).unwrap_or_default()
    }

    /// 用户主目录（无法获取时为 `/`）
    pub async fn home_dir(&self) -> String {
        match self.sftp().await {
            Ok(sftp) => sftp.home_dir().await,
            Err(_) => "/".to_string(),
        }
    }

    pub async fn mkdir(&self, path: &str) -> bool {
        let result = async { self.sftp().await?.mkdir(path).await }.await;
        self.report("mkdir", result).is_some()
    }

    pub async fn remove_file(&self, path: &str) -> bool {
        let result = async { self.sftp().await?.remove_file(path).await }.await;
        self.report("remove_file", result).is_some()
    }

    pub async fn remove_dir(&self, path: &str) -> bool {
        let result = async { self.sftp().await?.remove_dir(path).await }.await;
        self.report("remove_dir", result).is_some()
    }

    pub async fn rename(&self, from: &str, to: &str) -> bool {
        let result = async { self.sftp().await?.rename(from, to).await }.await;
        self.report("rename", result).is_some()
    }

    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> bool {
        let request = TransferRequest::download(remote_path, local_path);
        let result = self
            .transfer(&request, &CancellationToken::new(), |_, _| {})
            .await;
        self.report("download", result).is_some()
    }

    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> bool {
        let request = TransferRequest::upload(local_path, remote_path);
        let result = self
            .transfer(&request, &CancellationToken::new(), |_, _| {})
            .await;
        self.report("upload", result).is_some()
    }

    /// 执行一次传输，返回传输的字节数
    pub async fn transfer<F>(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<u64, SshError>
    where
        F: Fn(u64, u64) + Send,
    {
        let sftp = self.sftp().await?;
        match request.direction {
            TransferDirection::Download => {
                sftp.download_file(&request.remote_path, &request.local_path, cancel, progress)
                    .await
            }
            TransferDirection::Upload => {
                sftp.upload_file(&request.local_path, &request.remote_path, cancel, progress)
                    .await
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("[SSH] Dropping connection {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::event::{ConnectionStage, CoreEvent};
    use crate::ssh::test_server::{self, drain_events, TestServer, PASSWORD};

    fn unreachable_config() -> ConnectionConfig {
        ConnectionConfig::with_password("local", "127.0.0.1", 1, "tester", "secret")
    }

    #[tokio::test]
    async fn test_new_connection_is_not_connected() {
        let (sink, _rx) = EventSink::channel("c1");
        let conn = Connection::new(unreachable_config(), CoreSettings::default(), sink);
        assert_eq!(conn.state(), ConnectionState::Created);
        assert!(!conn.is_connected());
        assert_eq!(conn.hostname(), "127.0.0.1");
        assert!(conn.host_key_fingerprint().is_none());
        assert_eq!(conn.prompt(), "tester@127.0.0.1:~$ ");
    }

    #[tokio::test]
    async fn test_connect_refused_emits_error() {
        let (sink, mut rx) = EventSink::channel("c1");
        let conn = Connection::new(unreachable_config(), CoreSettings::default(), sink);

        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(!conn.is_connected());

        let mut errors = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Session {
                event: SessionEvent::Error(message),
                ..
            } = event
            {
                errors.push(message);
            }
        }
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Connection refused"));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_network() {
        let (sink, _rx) = EventSink::channel("c1");
        let mut config = unreachable_config();
        config.host = String::new();
        let conn = Connection::new(config, CoreSettings::default(), sink);
        assert!(matches!(conn.connect().await, Err(SshError::Config(_))));
    }

    #[tokio::test]
    async fn test_operations_when_not_connected() {
        let (sink, _rx) = EventSink::channel("c1");
        let conn = Connection::new(unreachable_config(), CoreSettings::default(), sink);

        let output = conn.execute_command("uptime", Duration::from_secs(1)).await;
        assert_eq!(output.stderr, "Not connected to server");
        assert!(conn.list_dir("/").await.is_empty());
        assert!(!conn.mkdir("/tmp/x").await);
        assert!(conn.open_interactive_channel("ls").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (sink, mut rx) = EventSink::channel("c1");
        let conn = Connection::new(unreachable_config(), CoreSettings::default(), sink);
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        // 从未连接过，不发出 Disconnected
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_with_valid_password() {
        let server = TestServer::start().await;
        let (sink, mut rx) = EventSink::channel("c1");
        let conn = Connection::new(server.config(PASSWORD), CoreSettings::default(), sink);

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.hostname(), test_server::HOSTNAME);
        assert!(conn
            .host_key_fingerprint()
            .is_some_and(|f| f.starts_with("SHA256:")));

        let events = drain_events(&mut rx);
        let connected = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Connected))
            .count();
        assert_eq!(connected, 1);

        // 阶段按顺序推进，进度单调递增并以 1.0 结束
        let stages: Vec<ConnectionStage> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StageChanged(stage) => Some(*stage),
                _ => None,
            })
            .collect();
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
        assert!(stages
            .windows(2)
            .all(|w| w[0].progress() < w[1].progress()));
        assert_eq!(stages.last().map(|s| s.progress()), Some(1.0));

        let output = conn.execute_command("hostname", Duration::from_secs(5)).await;
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), test_server::HOSTNAME);
        let missing = conn
            .execute_command("no-such-command", Duration::from_secs(5))
            .await;
        assert_eq!(missing.exit_code, Some(127));
        assert!(!missing.is_success());

        conn.disconnect().await;
        assert!(!conn.is_connected());
        let disconnected = drain_events(&mut rx)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Disconnected))
            .count();
        assert_eq!(disconnected, 1);
    }

    #[tokio::test]
    async fn test_connect_with_wrong_password() {
        let server = TestServer::start().await;
        let (sink, mut rx) = EventSink::channel("c1");
        let conn = Connection::new(server.config("wrong"), CoreSettings::default(), sink);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, SshError::Auth(_)));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(!conn.is_connected());

        let events = drain_events(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Connected)));
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            errors,
            vec!["Authentication failed: wrong username, password or key"]
        );
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_stays_terminal() {
        let server = TestServer::start().await;
        let (sink, _rx) = EventSink::channel("c1");
        let conn = Connection::new(server.config(PASSWORD), CoreSettings::default(), sink);

        conn.disconnect().await;
        assert!(matches!(conn.connect().await, Err(SshError::Cancelled)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.state().is_terminal());

        // 等待终止态的订阅者不会卡住
        let mut state = conn.watch_state();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_teardown_errors_are_reported() {
        let server = TestServer::start().await;
        let (sink, mut rx) = EventSink::channel("c1");
        let conn = Connection::new(server.config(PASSWORD), CoreSettings::default(), sink);
        conn.connect().await.unwrap();
        drain_events(&mut rx);

        // 服务器在交互通道仍打开时丢弃整条连接
        let channel = conn.open_interactive_channel("cat").await.unwrap();
        channel.write(b"drop\n").await.unwrap();

        let mut state = conn.watch_state();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Disconnected)));
    }

    #[test]
    fn test_root_prompt() {
        let (sink, _rx) = EventSink::channel("c1");
        let config = ConnectionConfig::with_password("a", "10.0.0.1", 22, "root", "");
        let conn = Connection::new(config, CoreSettings::default(), sink);
        conn.set_current_path("/var/log");
        assert_eq!(conn.prompt(), "root@10.0.0.1:/var/log# ");
    }
}
