// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use super::error::SshError;
use crate::models::settings::ConnectionSettings;
use crate::models::ConnectionConfig;

/// SSH 连接配置（由 ConnectionConfig 与连接设置派生）
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证方式
    pub auth: AuthMethod,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: AuthMethod::Password(String::new()),
            connect_timeout: crate::constants::CONNECT_TIMEOUT.as_secs(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// 认证方式
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// 密码认证
    Password(String),
    /// 公钥认证
    PublicKey {
        /// 私钥文件路径
        key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<String>,
    },
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

impl SshConfig {
    /// 从服务器配置构建；勾选密钥且填写了路径时走公钥认证，否则走密码
    pub fn from_connection(config: &ConnectionConfig, settings: &ConnectionSettings) -> Self {
        let auth = if config.uses_key_auth() {
            AuthMethod::PublicKey {
                key_path: PathBuf::from(config.key_file.trim()),
                // 私钥口令复用密码字段
                passphrase: Some(config.password.clone()).filter(|p| !p.is_empty()),
            }
        } else {
            AuthMethod::Password(config.password.clone())
        };

        Self {
            host: config.host.trim().to_string(),
            port: config.port,
            username: config.username.clone(),
            auth,
            connect_timeout: settings.connect_timeout().as_secs(),
            keepalive: KeepaliveConfig {
                enabled: settings.keepalive_interval_secs > 0,
                interval: settings.keepalive_interval_secs,
                max_retries: 3,
            },
        }
    }

    /// 校验连接所需的最少字段
    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.is_empty() {
            return Err(SshError::Config("host is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::Config("username is empty".to_string()));
        }
        if self.port == 0 {
            return Err(SshError::Config("port must be within 1-65535".to_string()));
        }
        Ok(())
    }

    /// 连接超时
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}
