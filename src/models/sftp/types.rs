// SFTP 基础数据类型

use std::cmp::Ordering;

/// 远程目录条目
///
/// 只在一次列目录调用中产生，由界面层负责渲染，不做缓存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// 文件名
    pub name: String,
    /// 是否是目录
    pub is_directory: bool,
    /// 文件大小（字节）
    pub size_bytes: u64,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, is_directory: bool, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            is_directory,
            size_bytes,
        }
    }

    /// 是否是隐藏文件（以 . 开头）
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// 格式化文件大小，目录显示为 "-"
    pub fn display_size(&self) -> String {
        if self.is_directory {
            "-".to_string()
        } else {
            format_size(self.size_bytes)
        }
    }

    /// 类型说明
    pub fn kind_label(&self) -> &'static str {
        if self.is_directory {
            "Folder"
        } else {
            "File"
        }
    }
}

/// 列表排序规则：目录在前，其次按名称（不区分大小写）升序
pub fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

/// 按列表规则原地排序
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(compare_entries);
}

/// 格式化字节数（B/KB/MB/GB/TB/PB，保留一位小数）
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB", value)
}

// ============================================================================
// 路径工具函数
// ============================================================================

/// 获取父目录路径
pub fn get_parent_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }

    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => "/".to_string(),
    }
}

/// 连接路径
pub fn join_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}
