// 本地数据持久化服务

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::APP_DIR_NAME;
use crate::models::{ConnectionConfig, CoreSettings};

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/sshdeck
/// Linux: ~/.config/sshdeck
/// Windows: C:\Users\<用户名>\AppData\Roaming\sshdeck
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Cannot locate the system config directory")?
        .join(APP_DIR_NAME);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("Cannot create config directory")?;
    }
    Ok(config_dir)
}

/// 读取 JSON 数组形式的服务器列表
fn read_servers(path: &Path) -> Result<Vec<ConnectionConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Cannot read server file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Cannot parse server file {}", path.display()))
}

fn write_servers(path: &Path, servers: &[ConnectionConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).context("Cannot create config directory")?;
        }
    }
    let content = serde_json::to_string_pretty(servers).context("Cannot serialize servers")?;
    fs::write(path, content)
        .with_context(|| format!("Cannot write server file {}", path.display()))?;
    Ok(())
}

/// 导入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// 文件中的记录数
    pub read: usize,
    /// 实际新增的记录数（已存在的 ID 被跳过）
    pub added: usize,
}

/// 服务器配置存储
///
/// 显式构造后交给会话注册表的创建者，没有全局实例。
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    servers: Vec<ConnectionConfig>,
}

impl ConfigStore {
    /// 打开指定文件；文件不存在时为空存储
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let servers = if path.exists() {
            read_servers(&path)?
        } else {
            Vec::new()
        };
        info!(
            "[Storage] Loaded {} servers from {}",
            servers.len(),
            path.display()
        );
        Ok(Self { path, servers })
    }

    /// 打开默认位置的 servers.json
    pub fn open_default() -> Result<Self> {
        Self::open(get_config_dir()?.join("servers.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn all(&self) -> &[ConnectionConfig] {
        &self.servers
    }

    pub fn get(&self, id: &str) -> Option<&ConnectionConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn add(&mut self, server: ConnectionConfig) {
        self.servers.push(server);
    }

    /// 按 ID 更新；不存在时不做任何事，返回 false
    pub fn update(&mut self, server: ConnectionConfig) -> bool {
        match self.servers.iter().position(|s| s.id == server.id) {
            Some(pos) => {
                self.servers[pos] = server;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        self.servers.len() != before
    }

    pub fn save(&self) -> Result<()> {
        write_servers(&self.path, &self.servers)
    }

    /// 导出全部配置为 JSON 数组，返回导出条数
    pub fn export_to(&self, path: &Path) -> Result<usize> {
        if self.servers.is_empty() {
            warn!("[Storage] Export requested with no servers");
            bail!("There are no server configurations to export");
        }
        write_servers(path, &self.servers)?;
        info!(
            "[Storage] Exported {} servers to {}",
            self.servers.len(),
            path.display()
        );
        Ok(self.servers.len())
    }

    /// 导入 JSON 数组并按 ID 合并，已存在的 ID 跳过；之后保存
    pub fn import_from(&mut self, path: &Path) -> Result<ImportSummary> {
        let incoming = read_servers(path)?;
        let read = incoming.len();

        let mut known: HashSet<String> = self.servers.iter().map(|s| s.id.clone()).collect();
        let mut added = 0;
        for server in incoming {
            if known.insert(server.id.clone()) {
                self.servers.push(server);
                added += 1;
            }
        }

        self.save()?;
        info!(
            "[Storage] Imported {} of {} servers from {}",
            added,
            read,
            path.display()
        );
        Ok(ImportSummary { read, added })
    }
}

// ======================== Settings 配置持久化 ========================

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 从指定文件加载设置；文件不存在时返回默认值
pub fn load_settings_from(path: &Path) -> Result<CoreSettings> {
    if !path.exists() {
        return Ok(CoreSettings::default());
    }
    let content = fs::read_to_string(path).context("Cannot read settings file")?;
    let settings: CoreSettings =
        serde_json::from_str(&content).context("Cannot parse settings file")?;
    Ok(settings)
}

/// 加载应用设置
pub fn load_settings() -> Result<CoreSettings> {
    load_settings_from(&get_settings_file()?)
}

/// 保存设置到指定文件
pub fn save_settings_to(path: &Path, settings: &CoreSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("Cannot serialize settings")?;
    fs::write(path, content).context("Cannot write settings file")?;
    Ok(())
}

/// 保存应用设置
pub fn save_settings(settings: &CoreSettings) -> Result<()> {
    save_settings_to(&get_settings_file()?, settings)
}
