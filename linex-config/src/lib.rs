use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use linex_core::feature::BufferDistance;
use linex_core::geometry::LinearUnit;
use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "LINEX_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.toml";
const RUN_SECTION: &str = "config";

/// 一次运行的完整配置，加载后不可变，按引用传入各组件。
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// 输入/输出集合所在目录，相对路径以配置文件所在目录为基准。
    pub workspace: PathBuf,
    pub input: String,
    pub output: String,
    pub buffer_start: BufferDistance,
    pub buffer_end: BufferDistance,
    /// `None` 表示缓冲距离已是空间参考的坐标单位。
    pub buffer_unit: Option<LinearUnit>,
    pub wkid: u32,
    pub unique_id: String,
    pub join_fields: Option<Vec<String>>,
    pub logging: LoggingConfig,
    pub run: RunSettings,
}

impl RunConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// 解析配置内容；`path` 用于错误信息和相对路径解析。
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let section = file.config.ok_or_else(|| ConfigError::MissingSection {
            path: path.to_path_buf(),
            section: RUN_SECTION.to_string(),
        })?;
        let validator = Validator { path };

        let gdb_path = validator.required("gdb_path", section.gdb_path)?;
        let fc_name = validator.required("fc_name", section.fc_name)?;
        let output = validator.required("output", section.output)?;
        let buffer_start = validator.required("buffer_start", section.buffer_start)?;
        let buffer_end = validator.required("buffer_end", section.buffer_end)?;
        let wkid = validator.required("wkid", section.wkid)?;
        let unique_id = validator.required("unique_id", section.unique_id)?;

        let mut logging = file.logging;
        if logging.file.is_relative() {
            logging.file = base_dir.join(&logging.file);
        }

        Ok(Self {
            workspace: if gdb_path.is_relative() {
                base_dir.join(gdb_path)
            } else {
                gdb_path
            },
            input: validator.name("fc_name", fc_name)?,
            output: validator.name("output", output)?,
            buffer_start: validator.buffer("buffer_start", buffer_start)?,
            buffer_end: validator.buffer("buffer_end", buffer_end)?,
            buffer_unit: validator.unit(section.buffer_unit)?,
            wkid: validator.wkid(wkid)?,
            unique_id: validator.name("unique_id", unique_id)?,
            join_fields: validator.join_fields(section.join_fields)?,
            logging,
            run: file.run,
        })
    }

    /// 确定配置文件路径：显式参数 > 环境变量 `LINEX_CONFIG` > `./config.toml`。
    pub fn discover_path(override_path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = override_path {
            return Ok(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        env::current_dir()
            .map(|dir| dir.join(DEFAULT_CONFIG_FILE))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })
    }

    pub fn discover(override_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::from_file(Self::discover_path(override_path)?)
    }
}

/// 日志配置：等级、日志文件以及是否追加写入。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub append: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_file() -> PathBuf {
        PathBuf::from("linex.log")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            file: Self::default_file(),
            append: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnRecordError {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub on_record_error: OnRecordError,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置文件 {path:?} 缺少 [{section}] 段")]
    MissingSection { path: PathBuf, section: String },
    #[error("配置文件 {path:?} 缺少必填项 `{key}`")]
    MissingKey { path: PathBuf, key: String },
    #[error("配置文件 {path:?} 中 `{key}` 取值无效: {message}")]
    InvalidValue {
        path: PathBuf,
        key: String,
        message: String,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    config: Option<RawRunSection>,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    run: RunSettings,
}

#[derive(Debug, Deserialize)]
struct RawRunSection {
    gdb_path: Option<PathBuf>,
    fc_name: Option<String>,
    output: Option<String>,
    buffer_start: Option<BufferDistance>,
    buffer_end: Option<BufferDistance>,
    wkid: Option<i64>,
    unique_id: Option<String>,
    buffer_unit: Option<String>,
    join_fields: Option<Vec<String>>,
}

struct Validator<'a> {
    path: &'a Path,
}

impl Validator<'_> {
    fn required<T>(&self, key: &str, value: Option<T>) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingKey {
            path: self.path.to_path_buf(),
            key: key.to_string(),
        })
    }

    fn invalid(&self, key: &str, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            path: self.path.to_path_buf(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    fn name(&self, key: &str, value: String) -> Result<String, ConfigError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(self.invalid(key, "不能为空"));
        }
        Ok(trimmed.to_string())
    }

    /// 数值即固定半径；字符串能解析为数字时同样视为固定半径，否则为字段名。
    fn buffer(&self, key: &str, value: BufferDistance) -> Result<BufferDistance, ConfigError> {
        let value = match value {
            BufferDistance::Field(text) => match text.trim().parse::<f64>() {
                Ok(number) => BufferDistance::Literal(number),
                Err(_) => BufferDistance::Field(self.name(key, text)?),
            },
            literal => literal,
        };
        if let BufferDistance::Literal(radius) = value {
            if !radius.is_finite() || radius < 0.0 {
                return Err(self.invalid(key, format!("缓冲半径必须为非负数，实际为 {radius}")));
            }
        }
        Ok(value)
    }

    fn unit(&self, value: Option<String>) -> Result<Option<LinearUnit>, ConfigError> {
        let Some(name) = value else {
            return Ok(None);
        };
        if name.trim().eq_ignore_ascii_case("map_units") {
            return Ok(None);
        }
        LinearUnit::parse(&name)
            .map(Some)
            .ok_or_else(|| self.invalid("buffer_unit", format!("未知的长度单位 `{name}`")))
    }

    fn wkid(&self, value: i64) -> Result<u32, ConfigError> {
        u32::try_from(value)
            .ok()
            .filter(|wkid| *wkid > 0)
            .ok_or_else(|| self.invalid("wkid", format!("{value} 不是有效的空间参考编号")))
    }

    fn join_fields(&self, value: Option<Vec<String>>) -> Result<Option<Vec<String>>, ConfigError> {
        value
            .map(|fields| {
                fields
                    .into_iter()
                    .map(|field| self.name("join_fields", field))
                    .collect()
            })
            .transpose()
    }
}
