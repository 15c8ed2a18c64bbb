// 服务器连接配置（持久化与导入导出共用）

use serde::{Deserialize, Serialize};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_port() -> u16 {
    22
}

/// 服务器连接配置
///
/// 交给 `Connection` 后不再修改；字段名即导入导出的 JSON 字段名。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// 服务器描述
    #[serde(default)]
    pub description: String,
    /// SSH 私钥文件路径
    #[serde(default)]
    pub key_file: String,
    /// 是否使用密钥认证
    #[serde(default)]
    pub use_key: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: new_id(),
            name: String::new(),
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            description: String::new(),
            key_file: String::new(),
            use_key: false,
        }
    }
}

impl ConnectionConfig {
    /// 创建密码认证的配置
    pub fn with_password(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// 是否走密钥认证（勾选且填写了密钥路径）
    pub fn uses_key_auth(&self) -> bool {
        self.use_key && !self.key_file.trim().is_empty()
    }

    /// 显示名称，未命名时回退为 host
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.host
        } else {
            &self.name
        }
    }
}

/// 隐藏主机和端口的部分信息，用于界面展示
///
/// IPv4 保留前两段（`192.168.***.***`），域名保留前缀；端口只保留首位。
pub fn mask_host(host: &str, port: u16) -> String {
    let parts: Vec<&str> = host.split('.').collect();
    let masked_host = if parts.len() >= 2 {
        format!("{}.{}.***.***", parts[0], parts[1])
    } else {
        let keep = if host.chars().count() > 10 { 6 } else { 3 };
        let prefix: String = host.chars().take(keep).collect();
        format!("{}***", prefix)
    };

    let port_str = port.to_string();
    let masked_port = if port_str.len() > 2 {
        let mut s = port_str[..1].to_string();
        s.push_str(&"*".repeat(port_str.len() - 1));
        s
    } else {
        "**".to_string()
    };

    format!("{}:{}", masked_host, masked_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"name":"web","host":"10.0.0.1","username":"root"}"#)
                .unwrap();
        assert_eq!(config.port, 22);
        assert!(!config.use_key);
        assert!(!config.id.is_empty());
        assert_eq!(config.password, "");
    }

    #[test]
    fn test_serialized_field_names() {
        let config = ConnectionConfig::with_password("web", "10.0.0.1", 2222, "root", "pw");
        let value = serde_json::to_value(&config).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "description",
                "host",
                "id",
                "key_file",
                "name",
                "password",
                "port",
                "use_key",
                "username"
            ]
        );
    }

    #[test]
    fn test_uses_key_auth_requires_path() {
        let mut config = ConnectionConfig::with_password("a", "h", 22, "u", "p");
        config.use_key = true;
        assert!(!config.uses_key_auth());
        config.key_file = "/home/u/.ssh/id_ed25519".to_string();
        assert!(config.uses_key_auth());
    }

    #[test]
    fn test_mask_host() {
        assert_eq!(mask_host("192.168.1.20", 22), "192.168.***.***:**");
        assert_eq!(mask_host("192.168.1.20", 2222), "192.168.***.***:2***");
        assert_eq!(mask_host("localhost", 22), "loc***:**");
        assert_eq!(mask_host("my-long-hostname", 22), "my-lon***:**");
    }
}
