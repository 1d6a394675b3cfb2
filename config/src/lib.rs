//! Configuration for rtag.
//!
//! Loaded from `~/.rtag/config.toml` (or the file named by `RTAG_CONFIG`).
//! A missing file is not an error: every section has defaults.
//!
//! ```toml
//! [rc]
//! executable = "${HOME}/bin/rc"
//!
//! [daemon]
//! auto_launch = false
//!
//! [diagnostics]
//! open_files_only = false
//!
//! [projects."/home/me/src/app"]
//! compilation_database_directory = "/home/me/build/app"
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

/// File name the daemon loads a project from.
pub const COMPILE_COMMANDS_FILENAME: &str = "compile_commands.json";

const CONFIG_ENV_VAR: &str = "RTAG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(
        "the compilation_database_directory setting for project {} must be an absolute path (got {directory:?})",
        project.display()
    )]
    RelativeDatabaseDirectory { project: PathBuf, directory: String },
    #[error("the {setting} setting must be an absolute path or an executable name on the PATH (got {value:?})")]
    InvalidExecutable { setting: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RtagConfig {
    /// Directory for persisted coordinator state and logs.
    pub state_dir: Option<PathBuf>,
    pub rc: RcConfig,
    pub daemon: DaemonConfig,
    pub diagnostics: DiagnosticsConfig,
    pub files: FilesConfig,
    /// Per-project overrides, keyed by project root.
    pub projects: HashMap<PathBuf, ProjectConfig>,
}

/// The daemon's command-line client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RcConfig {
    pub executable: String,
}

/// The indexing daemon itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub executable: String,
    pub arguments: Vec<String>,
    /// Launch the daemon when the client cannot connect to it.
    pub auto_launch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    /// Only publish diagnostics for files open in the editor.
    pub open_files_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Extensions (without the dot) treated as C/C++ sources.
    pub source_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Absolute directory containing `compile_commands.json`, when it is not
    /// the project root.
    pub compilation_database_directory: Option<String>,
}

/// Where a project's compilation database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommandsInfo {
    pub directory: PathBuf,
    /// The directory came from configuration rather than the project root.
    pub from_config: bool,
}

impl CompileCommandsInfo {
    #[must_use]
    pub fn compile_file(&self) -> PathBuf {
        self.directory.join(COMPILE_COMMANDS_FILENAME)
    }
}

impl Default for RtagConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            rc: RcConfig::default(),
            daemon: DaemonConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            files: FilesConfig::default(),
            projects: HashMap::new(),
        }
    }
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            executable: "rc".to_string(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            executable: "rdm".to_string(),
            arguments: Vec::new(),
            auto_launch: true,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            open_files_only: true,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        let extensions = [
            "c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "inl", "ipp",
        ];
        Self {
            source_extensions: extensions.iter().map(ToString::to_string).collect(),
        }
    }
}

impl RtagConfig {
    /// Load the configuration file, falling back to defaults when it is absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.rc.executable = expand_env_vars(&config.rc.executable);
        config.daemon.executable = expand_env_vars(&config.daemon.executable);
        Ok(config)
    }

    /// `RTAG_CONFIG` if set, else `~/.rtag/config.toml`.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".rtag").join("config.toml"))
    }

    /// Configured state directory, else `~/.rtag/state`, else `./.rtag/state`.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(".rtag").join("state"))
            .unwrap_or_else(|| PathBuf::from(".rtag").join("state"))
    }

    /// Check the client executable setting.
    pub fn validate_rc_executable(&self) -> Result<(), ConfigError> {
        validate_executable("rc.executable", &self.rc.executable)
    }

    /// Check the daemon executable setting.
    pub fn validate_daemon_executable(&self) -> Result<(), ConfigError> {
        validate_executable("daemon.executable", &self.daemon.executable)
    }

    /// Resolve where `project`'s `compile_commands.json` is expected.
    pub fn compile_commands_info(&self, project: &Path) -> Result<CompileCommandsInfo, ConfigError> {
        let configured = self
            .projects
            .get(project)
            .and_then(|p| p.compilation_database_directory.as_deref())
            .map(str::trim)
            .filter(|dir| !dir.is_empty());

        let Some(dir) = configured else {
            return Ok(CompileCommandsInfo {
                directory: project.to_path_buf(),
                from_config: false,
            });
        };

        let dir_path = Path::new(dir);
        if !dir_path.is_absolute() {
            return Err(ConfigError::RelativeDatabaseDirectory {
                project: project.to_path_buf(),
                directory: dir.to_string(),
            });
        }
        Ok(CompileCommandsInfo {
            directory: normalize_path(dir_path),
            from_config: true,
        })
    }

    /// Whether `project`'s compilation database setting differs in `other`.
    #[must_use]
    pub fn database_directory_changed(&self, other: &Self, project: &Path) -> bool {
        let setting = |config: &Self| {
            config
                .projects
                .get(project)
                .and_then(|p| p.compilation_database_directory.clone())
                .map(|dir| dir.trim().to_string())
                .filter(|dir| !dir.is_empty())
        };
        setting(self) != setting(other)
    }

    /// Whether `path` has one of the configured source extensions.
    #[must_use]
    pub fn is_source_file(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.files
            .source_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }
}

fn validate_executable(setting: &'static str, value: &str) -> Result<(), ConfigError> {
    if is_absolute_path_or_filename(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidExecutable {
            setting,
            value: value.to_string(),
        })
    }
}

/// An absolute path, or a bare file name to be looked up on the PATH.
#[must_use]
pub fn is_absolute_path_or_filename(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let path = Path::new(value);
    path.is_absolute() || (path.components().count() == 1 && path.file_name().is_some())
}

/// Lexically resolve `.` and `..` components and drop trailing separators.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Replace `${VAR}` references with environment values (missing vars become empty).
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = RtagConfig::parse("").unwrap();
        assert_eq!(config, RtagConfig::default());
        assert_eq!(config.rc.executable, "rc");
        assert_eq!(config.daemon.executable, "rdm");
        assert!(config.daemon.auto_launch);
        assert!(config.diagnostics.enabled);
        assert!(config.diagnostics.open_files_only);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RtagConfig::parse(
            r#"
            [diagnostics]
            open_files_only = false

            [projects."/repo"]
            compilation_database_directory = "/build/repo"
            "#,
        )
        .unwrap();
        assert!(config.diagnostics.enabled);
        assert!(!config.diagnostics.open_files_only);
        assert_eq!(
            config.projects[Path::new("/repo")]
                .compilation_database_directory
                .as_deref(),
            Some("/build/repo")
        );
    }

    #[test]
    fn compile_commands_info_defaults_to_project_root() {
        let config = RtagConfig::default();
        let info = config.compile_commands_info(Path::new("/repo")).unwrap();
        assert_eq!(info.directory, PathBuf::from("/repo"));
        assert!(!info.from_config);
        assert_eq!(
            info.compile_file(),
            PathBuf::from("/repo/compile_commands.json")
        );
    }

    #[test]
    fn compile_commands_info_uses_normalized_config_dir() {
        let config =
            RtagConfig::parse("[projects.\"/repo\"]\ncompilation_database_directory = \"/build/x/../repo/\"\n")
                .unwrap();
        let info = config.compile_commands_info(Path::new("/repo")).unwrap();
        assert_eq!(info.directory, PathBuf::from("/build/repo"));
        assert!(info.from_config);
    }

    #[test]
    fn compile_commands_info_rejects_relative_dir() {
        let config =
            RtagConfig::parse("[projects.\"/repo\"]\ncompilation_database_directory = \"build\"\n")
                .unwrap();
        let err = config.compile_commands_info(Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::RelativeDatabaseDirectory { .. }));
        assert!(err.to_string().contains("must be an absolute path"));
    }

    #[test]
    fn blank_config_dir_falls_back_to_root() {
        let config =
            RtagConfig::parse("[projects.\"/repo\"]\ncompilation_database_directory = \"  \"\n")
                .unwrap();
        let info = config.compile_commands_info(Path::new("/repo")).unwrap();
        assert!(!info.from_config);
    }

    #[test]
    fn database_directory_change_detection() {
        let old = RtagConfig::default();
        let new =
            RtagConfig::parse("[projects.\"/repo\"]\ncompilation_database_directory = \"/build\"\n")
                .unwrap();
        assert!(old.database_directory_changed(&new, Path::new("/repo")));
        assert!(!old.database_directory_changed(&new, Path::new("/other")));
        assert!(!new.database_directory_changed(&new, Path::new("/repo")));
    }

    #[test]
    fn source_file_detection() {
        let config = RtagConfig::default();
        assert!(config.is_source_file(Path::new("/repo/a.cpp")));
        assert!(config.is_source_file(Path::new("/repo/a.H")));
        assert!(!config.is_source_file(Path::new("/repo/notes.md")));
        assert!(!config.is_source_file(Path::new("/repo/Makefile")));
    }

    #[test]
    fn executable_validation() {
        assert!(is_absolute_path_or_filename("rc"));
        assert!(is_absolute_path_or_filename("/usr/bin/rc"));
        assert!(!is_absolute_path_or_filename("bin/rc"));
        assert!(!is_absolute_path_or_filename(""));

        let mut config = RtagConfig::default();
        config.rc.executable = "./rc".to_string();
        assert!(config.validate_rc_executable().is_err());
    }

    #[test]
    fn expand_env_vars_substitutes_and_drops_missing() {
        unsafe {
            env::set_var("RTAG_TEST_PREFIX", "/opt/rtags");
            env::remove_var("RTAG_TEST_MISSING");
        }
        assert_eq!(expand_env_vars("${RTAG_TEST_PREFIX}/bin/rc"), "/opt/rtags/bin/rc");
        assert_eq!(expand_env_vars("${RTAG_TEST_MISSING}rc"), "rc");
        assert_eq!(expand_env_vars("plain"), "plain");
        assert_eq!(expand_env_vars("${unterminated"), "${unterminated");
        unsafe {
            env::remove_var("RTAG_TEST_PREFIX");
        }
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[rc\nexecutable = 1").unwrap();
        let err = RtagConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[rc]\nexecutable = \"/usr/local/bin/rc\"\n").unwrap();
        let config = RtagConfig::load_from(&path).unwrap();
        assert_eq!(config.rc.executable, "/usr/local/bin/rc");
    }
}
