// SSH 客户端核心实现
// 负责 TCP 连接、握手与认证，成功后交出 russh Handle

use std::path::Path;
use std::sync::{Arc, OnceLock};

use russh::client::{AuthResult, Handle};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::event::{ConnectionStage, EventSink, SessionEvent};
use super::handler::SshClientHandler;

/// SSH 客户端
pub struct SshClient<'a> {
    /// 连接配置
    config: &'a SshConfig,
    /// 事件发送器
    events: &'a EventSink,
    /// 握手时由 Handler 写入
    fingerprint: Arc<OnceLock<String>>,
}

impl<'a> SshClient<'a> {
    /// 创建新的 SSH 客户端
    pub fn new(config: &'a SshConfig, events: &'a EventSink) -> Self {
        Self {
            config,
            events,
            fingerprint: Arc::new(OnceLock::new()),
        }
    }

    /// 服务器公钥指纹（握手完成后可用）
    pub fn host_key_fingerprint(&self) -> Option<String> {
        self.fingerprint.get().cloned()
    }

    /// 发送阶段变化事件
    fn emit_stage(&self, stage: ConnectionStage) {
        debug!(
            "[SSH] {}@{}:{} stage: {}",
            self.config.username,
            self.config.host,
            self.config.port,
            stage.label()
        );
        self.events.emit(SessionEvent::StageChanged(stage));
    }

    /// 执行连接（异步），握手和 TCP 连接各自受连接超时约束
    pub async fn connect(&self) -> Result<Handle<SshClientHandler>, SshError> {
        self.emit_stage(ConnectionStage::Initializing);

        let addr = (self.config.host.as_str(), self.config.port);
        let connect_timeout = self.config.timeout();

        self.emit_stage(ConnectionStage::ConnectingHost);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
            .map_err(SshError::Io)?;

        info!(
            "[SSH] TCP connection established to {}:{}",
            self.config.host, self.config.port
        );

        self.emit_stage(ConnectionStage::Handshaking);
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = SshClientHandler::new(
            &self.config.host,
            self.config.port,
            self.fingerprint.clone(),
        );

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
        .map_err(SshError::from)?;

        self.emit_stage(ConnectionStage::Authenticating);
        timeout(connect_timeout, self.authenticate(&mut handle))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))??;

        info!(
            "[SSH] Authenticated as '{}' on {}",
            self.config.username, self.config.host
        );
        self.emit_stage(ConnectionStage::Connected);

        Ok(handle)
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        let auth_result = match &self.config.auth {
            AuthMethod::Password(password) => {
                debug!("[SSH] Using password authentication");
                handle
                    .authenticate_password(&self.config.username, password)
                    .await
                    .map_err(SshError::from)?
            }
            AuthMethod::PublicKey {
                key_path,
                passphrase,
            } => {
                debug!("[SSH] Using public key authentication: {:?}", key_path);

                let key = load_private_key(key_path, passphrase.as_deref()).await?;
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_alg)
                    .await
                    .map_err(SshError::from)?
            }
        };

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(SshError::Auth(format!(
                    "Server rejected credentials. Server suggests: {:?}",
                    remaining_methods
                )))
            }
        }
    }
}

/// 加载私钥文件
async fn load_private_key(
    key_path: &Path,
    passphrase: Option<&str>,
) -> Result<russh::keys::PrivateKey, SshError> {
    let key_data = tokio::fs::read(key_path)
        .await
        .map_err(|e| SshError::Key(format!("Failed to read key file: {}", e)))?;

    russh::keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
        .map_err(|e| SshError::Key(format!("Failed to decode key: {}", e)))
}
