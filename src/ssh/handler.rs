// russh 回调
// 主机密钥策略：未知主机直接接受，只记录指纹

use std::future::Future;
use std::sync::{Arc, OnceLock};

use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

/// 连接握手期间的回调处理
pub struct SshClientHandler {
    /// `host:port`，只用于日志
    target: String,
    /// 握手时看到的服务器公钥指纹（SHA-256）
    fingerprint: Arc<OnceLock<String>>,
}

impl SshClientHandler {
    pub fn new(host: &str, port: u16, fingerprint: Arc<OnceLock<String>>) -> Self {
        Self {
            target: format!("{}:{}", host, port),
            fingerprint,
        }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        info!("[SSH] Accepting host key of {}: {}", self.target, fingerprint);
        debug!("[SSH] Host key algorithm: {}", server_public_key.algorithm());

        // 重新握手时保留第一次看到的指纹
        let _ = self.fingerprint.set(fingerprint);
        async { Ok(true) }
    }
}
