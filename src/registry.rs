//! 服务注册表: 目录中一个服务一个配置文件
//!
//! 文件名 `{kind}-{domain}.{ext}` 由服务类型和域名确定。写入直接覆盖，
//! 没有加锁，后写者生效。

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::{DeployError, Result};

/// 服务类型，决定文件名前缀
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    Xray,
    Static,
    /// 通用服务，前缀取服务名
    Named(String),
}

/// 内置服务占用的前缀，通用服务不能使用
const RESERVED_PREFIXES: [&str; 2] = ["xray", "static"];

impl ServiceKind {
    pub fn prefix(&self) -> String {
        match self {
            ServiceKind::Xray => "xray".to_string(),
            ServiceKind::Static => "static".to_string(),
            ServiceKind::Named(name) => normalize(name),
        }
    }

    /// 检查通用服务的前缀不会与内置服务的文件重名
    pub fn check(&self) -> Result<()> {
        let ServiceKind::Named(name) = self else {
            return Ok(());
        };
        let prefix = self.prefix();
        if prefix.trim_matches('-').is_empty() {
            return Err(DeployError::InvalidInput(format!(
                "服务名称无效: {:?}",
                name
            )));
        }
        let reserved = RESERVED_PREFIXES
            .iter()
            .any(|r| prefix == *r || prefix.starts_with(&format!("{}-", r)));
        if reserved {
            return Err(DeployError::InvalidInput(format!(
                "服务名称 {:?} 与内置服务前缀冲突 ({})",
                name,
                RESERVED_PREFIXES.join(", ")
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// 小写，`[a-z0-9-]` 以外的字符替换为 `-`
pub fn normalize(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    dir: PathBuf,
    extension: String,
}

impl ServiceRegistry {
    /// 打开注册表目录 (不存在则创建)，管理 `.conf` 文件
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_extension(dir, "conf")
    }

    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| DeployError::io(&dir, e))?;
        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// 计算服务对应的文件名
    pub fn filename(&self, kind: &ServiceKind, domain: &str) -> String {
        format!("{}-{}.{}", kind.prefix(), normalize(domain), self.extension)
    }

    /// 写入服务配置，覆盖同名文件，返回文件名
    pub fn add(&self, kind: &ServiceKind, domain: &str, content: &str) -> Result<String> {
        kind.check()?;
        let filename = self.filename(kind, domain);
        let path = self.dir.join(&filename);
        fs::write(&path, content).map_err(|e| DeployError::io(&path, e))?;
        info!("📝 服务配置已写入: {}", path.display());
        Ok(filename)
    }

    /// 列出目录中所有受管文件 (按文件系统枚举顺序)
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| DeployError::io(&self.dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(&self.dir, e))?;
            let file_type = entry.file_type().map_err(|e| DeployError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.is_managed(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// 读取服务配置，不存在时返回 None
    pub fn read(&self, filename: &str) -> Result<Option<String>> {
        let path = self.managed_path(filename)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::io(&path, e)),
        }
    }

    /// 删除服务配置，返回是否真的删除了文件
    pub fn remove(&self, filename: &str) -> Result<bool> {
        let path = self.managed_path(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("🗑️  服务配置已删除: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("服务配置不存在: {}", path.display());
                Ok(false)
            }
            Err(e) => Err(DeployError::io(&path, e)),
        }
    }

    fn is_managed(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.extension)
    }

    /// 只接受目录内、扩展名匹配的文件名
    fn managed_path(&self, filename: &str) -> Result<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(DeployError::InvalidInput(format!(
                "无效的配置文件名: {:?}",
                filename
            )));
        }
        if !self.is_managed(filename) {
            return Err(DeployError::InvalidInput(format!(
                "配置文件必须以 .{} 结尾: {}",
                self.extension, filename
            )));
        }
        Ok(self.dir.join(filename))
    }
}
