//! Daemon client protocol: argument builders and output parsers.
//!
//! Project arguments always carry a trailing path separator; the daemon
//! matches projects by string prefix and would otherwise confuse `/repo`
//! with `/repo2`.

use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static COMPILE_FILE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"File: (.*)[/\\]compile_commands\.json").ok());

static PROJECT_ROOT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"=> \[(.*)\]").ok());

const SUSPENDED_SUFFIX: &str = " is suspended";

fn arg(path: &Path) -> String {
    path.display().to_string()
}

fn millis(timeout: Duration) -> String {
    timeout.as_millis().to_string()
}

/// `path` rendered with exactly one trailing separator.
#[must_use]
pub fn project_arg(path: &Path) -> String {
    let mut text = arg(path);
    while text.len() > 1 && (text.ends_with('/') || text.ends_with(MAIN_SEPARATOR)) {
        text.pop();
    }
    text.push(MAIN_SEPARATOR);
    text
}

pub fn list_projects() -> Vec<String> {
    vec!["--project".to_string()]
}

pub fn project_status(project: &Path) -> Vec<String> {
    vec![
        "--project".to_string(),
        project_arg(project),
        "--status".to_string(),
        "project".to_string(),
    ]
}

pub fn is_indexing(project: &Path, timeout: Duration) -> Vec<String> {
    // `--is-indexing=<path>` keeps older daemons, which take no path
    // argument, from swallowing the next flag.
    vec![
        format!("--is-indexing={}", arg(project)),
        "--timeout".to_string(),
        millis(timeout),
    ]
}

pub fn load_compile_commands(compile_file: &Path) -> Vec<String> {
    vec!["--load-compile-commands".to_string(), arg(compile_file)]
}

pub fn reindex_project(project: &Path) -> Vec<String> {
    vec![
        "--project".to_string(),
        project_arg(project),
        "--reindex".to_string(),
    ]
}

/// Reindex one file, unconditionally when `force`.
pub fn reindex_file(file: &Path, force: bool) -> Vec<String> {
    let flag = if force { "--reindex" } else { "--check-reindex" };
    vec![flag.to_string(), arg(file)]
}

pub fn delete_projects<'a>(projects: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
    let mut args = Vec::new();
    for project in projects {
        args.push("--delete-project".to_string());
        args.push(project_arg(project));
    }
    args
}

pub fn find_project_root(file: &Path, realpath: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if !realpath {
        args.push("--no-realpath".to_string());
    }
    args.push("--find-project-root".to_string());
    args.push(arg(file));
    args
}

/// List suspended files in `project`, optionally bounded by `timeout`.
pub fn list_suspended(project: &Path, timeout: Option<Duration>) -> Vec<String> {
    let mut args = vec![
        "--project".to_string(),
        project_arg(project),
        "--suspend".to_string(),
    ];
    if let Some(timeout) = timeout {
        args.push("--timeout".to_string());
        args.push(millis(timeout));
    }
    args
}

/// Toggle the daemon's watch suspension for `file`.
pub fn toggle_suspend(file: &Path, timeout: Option<Duration>) -> Vec<String> {
    let mut args = vec!["--suspend".to_string(), arg(file)];
    if let Some(timeout) = timeout {
        args.push("--timeout".to_string());
        args.push(millis(timeout));
    }
    args
}

pub fn diagnose_files<'a>(files: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
    let mut args = Vec::new();
    for file in files {
        args.push("--diagnose".to_string());
        args.push(arg(file));
    }
    args
}

pub fn diagnose_all(project: &Path) -> Vec<String> {
    vec![
        "--project".to_string(),
        project_arg(project),
        "--diagnose-all".to_string(),
    ]
}

pub fn diagnostics_stream() -> Vec<String> {
    vec!["--diagnostics".to_string(), "--json".to_string()]
}

pub fn version() -> Vec<String> {
    vec!["--version".to_string()]
}

pub fn current_project() -> Vec<String> {
    vec!["--current-project".to_string()]
}

/// Parse `--project` output: one project per line, the current one marked
/// with ` <=`.
#[must_use]
pub fn parse_project_list(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(|line| line.trim_end().trim_end_matches(" <=").trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            let trimmed = line.trim_end_matches(['/', MAIN_SEPARATOR]);
            PathBuf::from(if trimmed.is_empty() { line } else { trimmed })
        })
        .collect()
}

/// Parse `--status project` output into the directories holding the
/// compilation databases the daemon has loaded.
#[must_use]
pub fn parse_compile_directories(output: &str) -> Vec<PathBuf> {
    let Some(re) = COMPILE_FILE_RE.as_ref() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|dir| PathBuf::from(dir.as_str()))
        .collect()
}

/// Parse `--find-project-root` output (`... => [<root>]`).
#[must_use]
pub fn parse_project_root(output: &str) -> Option<PathBuf> {
    let caps = PROJECT_ROOT_RE.as_ref()?.captures(output)?;
    let root = caps.get(1)?.as_str();
    (!root.is_empty()).then(|| PathBuf::from(root))
}

/// Parse a `--suspend` listing: lines of `<path> is suspended`.
#[must_use]
pub fn parse_suspended(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.find(SUSPENDED_SUFFIX).map(|idx| &line[..idx]))
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .collect()
}

#[must_use]
pub fn is_now_suspended(output: &str, file: &Path) -> bool {
    output.trim() == format!("{} is now suspended", arg(file))
}

#[must_use]
pub fn is_no_longer_suspended(output: &str, file: &Path) -> bool {
    output.trim() == format!("{} is no longer suspended", arg(file))
}

/// `--is-indexing` answers `1` while the project is indexing; anything else
/// means idle.
#[must_use]
pub fn indexing_finished(output: &str) -> bool {
    output.trim() != "1"
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_project_arg_adds_single_trailing_slash() {
        assert_eq!(project_arg(Path::new("/repo")), "/repo/");
        assert_eq!(project_arg(Path::new("/repo/")), "/repo/");
        assert_eq!(project_arg(Path::new("/")), "/");
    }

    #[test]
    fn test_parse_project_list_strips_markers() {
        let output = "/repo/\n/other/ <=\n\n";
        assert_eq!(
            parse_project_list(output),
            vec![PathBuf::from("/repo"), PathBuf::from("/other")]
        );
    }

    #[test]
    fn test_parse_compile_directories() {
        let output = "Project: /repo/\nFile: /repo/build/compile_commands.json\nIndexed: 12\n";
        assert_eq!(
            parse_compile_directories(output),
            vec![PathBuf::from("/repo/build")]
        );
    }

    #[test]
    fn test_parse_project_root() {
        let output = "/repo/src/a.cpp => [/repo/]\n";
        assert_eq!(parse_project_root(output), Some(PathBuf::from("/repo/")));
        assert_eq!(parse_project_root("nothing here"), None);
        assert_eq!(parse_project_root("a => []"), None);
    }

    #[test]
    fn test_parse_suspended_listing() {
        let output = "/repo/a.cpp is suspended\nsome noise\n/repo/b.cpp is suspended\n";
        assert_eq!(
            parse_suspended(output),
            vec![PathBuf::from("/repo/a.cpp"), PathBuf::from("/repo/b.cpp")]
        );
    }

    #[test]
    fn test_suspend_toggle_responses() {
        let file = Path::new("/repo/a.cpp");
        assert!(is_now_suspended("/repo/a.cpp is now suspended\n", file));
        assert!(!is_now_suspended("/repo/a.cpp is no longer suspended", file));
        assert!(is_no_longer_suspended(" /repo/a.cpp is no longer suspended ", file));
    }

    #[test]
    fn test_indexing_finished() {
        assert!(!indexing_finished("1\n"));
        assert!(indexing_finished("0"));
        assert!(indexing_finished(""));
    }

    #[test]
    fn test_command_shapes() {
        assert_eq!(
            is_indexing(Path::new("/repo"), Duration::from_millis(1000)),
            ["--is-indexing=/repo", "--timeout", "1000"]
        );
        assert_eq!(
            list_suspended(Path::new("/repo"), Some(Duration::from_millis(100))),
            ["--project", "/repo/", "--suspend", "--timeout", "100"]
        );
        assert_eq!(
            toggle_suspend(Path::new("/repo/a.cpp"), None),
            ["--suspend", "/repo/a.cpp"]
        );
        assert_eq!(
            reindex_file(Path::new("/repo/a.cpp"), false),
            ["--check-reindex", "/repo/a.cpp"]
        );
        assert_eq!(
            find_project_root(Path::new("/repo/a.cpp"), false),
            ["--no-realpath", "--find-project-root", "/repo/a.cpp"]
        );
        let projects = [PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(
            delete_projects(&projects),
            ["--delete-project", "/a/", "--delete-project", "/b/"]
        );
    }
}
