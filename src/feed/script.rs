//! Runs user scripts that print an RSS/Atom document on stdout.
//!
//! Scripts live under a single scripts directory and are referenced by a path
//! relative to it. The interpreter is chosen from the file extension using a
//! fixed table; extensions without an entry (and files without an extension)
//! are executed directly.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::error::{FetchError, Platform};
use super::parser::{parse_feed, RawFeed};

/// How to launch a script on one platform. The script path is appended to `args`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launcher {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

struct Interpreter {
    extension: &'static str,
    unix: Option<Launcher>,
    windows: Option<Launcher>,
}

const fn launcher(program: &'static str, args: &'static [&'static str]) -> Option<Launcher> {
    Some(Launcher { program, args })
}

const INTERPRETERS: &[Interpreter] = &[
    Interpreter {
        extension: "py",
        unix: launcher("python3", &[]),
        windows: launcher("python", &[]),
    },
    Interpreter {
        extension: "sh",
        unix: launcher("bash", &[]),
        windows: None,
    },
    Interpreter {
        extension: "ps1",
        unix: launcher("pwsh", &["-File"]),
        windows: launcher("powershell.exe", &["-ExecutionPolicy", "Bypass", "-File"]),
    },
    Interpreter {
        extension: "js",
        unix: launcher("node", &[]),
        windows: launcher("node", &[]),
    },
    Interpreter {
        extension: "rb",
        unix: launcher("ruby", &[]),
        windows: launcher("ruby", &[]),
    },
];

/// Look up the launcher for a script.
///
/// Returns `Ok(None)` when the script should be executed directly.
pub fn launcher_for(path: &Path, platform: Platform) -> Result<Option<Launcher>, FetchError> {
    let Some(extension) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
    else {
        return Ok(None);
    };

    let Some(interpreter) = INTERPRETERS.iter().find(|i| i.extension == extension) else {
        return Ok(None);
    };

    let launcher = match platform {
        Platform::Unix => interpreter.unix,
        Platform::Windows => interpreter.windows,
    };

    launcher
        .map(Some)
        .ok_or(FetchError::UnsupportedPlatform {
            extension,
            platform,
        })
}

/// Executes feed scripts from a fixed root directory.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    root: PathBuf,
    platform: Platform,
}

impl ScriptRunner {
    /// Hard ceiling on a single script run, regardless of the caller's deadline.
    pub const MAX_RUNTIME: Duration = Duration::from_secs(30);

    /// A relative root is made absolute against the current directory, since
    /// scripts run with the root as their working directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            root: std::path::absolute(&root).unwrap_or(root),
            platform: Platform::current(),
        }
    }

    /// Override the platform used for interpreter selection.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a script reference to a path inside the scripts root.
    ///
    /// Rejects absolute paths, `..` segments that climb out of the root, and
    /// symlinks whose target lies outside the root.
    pub fn resolve(&self, script: &str) -> Result<PathBuf, FetchError> {
        let invalid = || FetchError::InvalidPath(script.to_string());

        let mut relative = PathBuf::new();
        for component in Path::new(script.trim()).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(invalid());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(invalid()),
            }
        }

        if relative.as_os_str().is_empty() {
            return Err(invalid());
        }

        let full = self.root.join(&relative);

        // Lexical containment holds at this point; canonicalize to catch symlinks.
        if let (Ok(root), Ok(target)) = (self.root.canonicalize(), full.canonicalize()) {
            if !target.starts_with(&root) {
                return Err(invalid());
            }
        }

        Ok(full)
    }

    /// Run a script and parse its stdout as a feed.
    ///
    /// `deadline` is the caller's time budget; the effective limit is the
    /// smaller of it and [`Self::MAX_RUNTIME`].
    pub async fn execute(
        &self,
        script: &str,
        deadline: Option<Duration>,
    ) -> Result<RawFeed, FetchError> {
        let stdout = self.run(script, deadline).await?;
        parse_feed(&stdout)
    }

    /// Run a script and return its raw stdout.
    pub async fn run(
        &self,
        script: &str,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(script)?;

        let (program, args): (OsString, Vec<OsString>) = match launcher_for(&path, self.platform)? {
            Some(launcher) => {
                let mut args: Vec<OsString> = launcher.args.iter().map(OsString::from).collect();
                args.push(path.clone().into_os_string());
                (OsString::from(launcher.program), args)
            }
            None => (path.clone().into_os_string(), Vec::new()),
        };

        let limit = deadline.map_or(Self::MAX_RUNTIME, |d| d.min(Self::MAX_RUNTIME));

        tracing::debug!(
            script = %script,
            program = ?program,
            timeout_ms = limit.as_millis() as u64,
            "Running feed script"
        );

        let child = Command::new(&program)
            .args(&args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::ScriptExecutionFailed {
                reason: format!("failed to launch {}: {}", program.to_string_lossy(), e),
                stderr: None,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FetchError::ScriptExecutionFailed {
                    reason: format!("failed to wait for script: {}", e),
                    stderr: None,
                })
            }
            Err(_) => {
                tracing::warn!(
                    script = %script,
                    timeout_ms = limit.as_millis() as u64,
                    "Feed script timed out"
                );
                return Err(FetchError::ScriptExecutionFailed {
                    reason: format!("timed out after {}ms", limit.as_millis()),
                    stderr: None,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::ScriptExecutionFailed {
                reason: output.status.to_string(),
                stderr: (!stderr.is_empty()).then_some(stderr),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_table_unix() {
        let py = launcher_for(Path::new("a/fetch.py"), Platform::Unix).unwrap();
        assert_eq!(py.map(|l| l.program), Some("python3"));

        let ps = launcher_for(Path::new("fetch.PS1"), Platform::Unix).unwrap();
        assert_eq!(
            ps,
            Some(Launcher {
                program: "pwsh",
                args: &["-File"]
            })
        );

        assert_eq!(launcher_for(Path::new("fetch"), Platform::Unix).unwrap(), None);
        assert_eq!(
            launcher_for(Path::new("fetch.bin"), Platform::Unix).unwrap(),
            None
        );
    }

    #[test]
    fn test_launcher_table_windows() {
        let py = launcher_for(Path::new("fetch.py"), Platform::Windows).unwrap();
        assert_eq!(py.map(|l| l.program), Some("python"));

        let ps = launcher_for(Path::new("fetch.ps1"), Platform::Windows).unwrap();
        assert_eq!(ps.map(|l| l.program), Some("powershell.exe"));
    }

    #[test]
    fn test_shell_unsupported_on_windows() {
        let err = launcher_for(Path::new("fetch.sh"), Platform::Windows).unwrap_err();
        match err {
            FetchError::UnsupportedPlatform {
                extension,
                platform,
            } => {
                assert_eq!(extension, "sh");
                assert_eq!(platform, Platform::Windows);
            }
            e => panic!("Expected UnsupportedPlatform, got {:?}", e),
        }
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new(dir.path());

        for bad in [
            "../../etc/passwd",
            "..",
            "a/../../b.sh",
            "/etc/passwd",
            "",
            ".",
        ] {
            assert!(
                matches!(runner.resolve(bad), Err(FetchError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_accepts_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new(dir.path());

        assert_eq!(
            runner.resolve("feeds/news.py").unwrap(),
            dir.path().join("feeds/news.py")
        );
        assert_eq!(
            runner.resolve("feeds/../news.py").unwrap(),
            dir.path().join("news.py")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("evil.sh");
        std::fs::write(&target, "echo hi").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.sh")).unwrap();

        let runner = ScriptRunner::new(dir.path());
        assert!(matches!(
            runner.resolve("link.sh"),
            Err(FetchError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new(dir.path());

        let result = runner.execute("../../etc/passwd", None).await;
        assert!(matches!(result, Err(FetchError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_unsupported_platform_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("feed.sh"), "exit 0").unwrap();
        let runner = ScriptRunner::new(dir.path()).with_platform(Platform::Windows);

        let result = runner.execute("feed.sh", None).await;
        assert!(matches!(
            result,
            Err(FetchError::UnsupportedPlatform { .. })
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Scripted</title>
<item><title>From script</title><link>https://example.com/s1</link></item>
</channel></rss>"#;

        fn write_script(dir: &Path, name: &str, body: &str) {
            std::fs::write(dir.join(name), body).unwrap();
        }

        #[tokio::test]
        async fn test_execute_parses_stdout() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "feed.sh", &format!("cat <<'EOF'\n{}\nEOF\n", FEED));

            let runner = ScriptRunner::new(dir.path());
            let feed = runner.execute("feed.sh", None).await.unwrap();
            assert_eq!(feed.title, "Scripted");
            assert_eq!(feed.entries.len(), 1);
            assert_eq!(feed.entries[0].title, "From script");
        }

        #[tokio::test]
        async fn test_runs_in_scripts_root() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "feed.xml", FEED);
            write_script(dir.path(), "cat_local.sh", "cat feed.xml\n");

            let runner = ScriptRunner::new(dir.path());
            let feed = runner.execute("cat_local.sh", None).await.unwrap();
            assert_eq!(feed.title, "Scripted");
        }

        #[tokio::test]
        async fn test_relative_root_runs_script() {
            let dir = tempfile::Builder::new().tempdir_in(".").unwrap();
            write_script(dir.path(), "feed.sh", &format!("cat <<'EOF'\n{}\nEOF\n", FEED));

            let relative = dir.path().strip_prefix(".").unwrap_or(dir.path());
            assert!(relative.is_relative());

            let runner = ScriptRunner::new(relative);
            assert!(runner.root().is_absolute());

            let feed = runner.execute("feed.sh", None).await.unwrap();
            assert_eq!(feed.title, "Scripted");
        }

        #[tokio::test]
        async fn test_nonzero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "fail.sh", "echo 'upstream down' >&2\nexit 3\n");

            let runner = ScriptRunner::new(dir.path());
            let err = runner.execute("fail.sh", None).await.unwrap_err();
            match &err {
                FetchError::ScriptExecutionFailed { stderr, .. } => {
                    assert_eq!(stderr.as_deref(), Some("upstream down"));
                }
                e => panic!("Expected ScriptExecutionFailed, got {:?}", e),
            }
            assert!(err.to_string().contains("upstream down"));
        }

        #[tokio::test]
        async fn test_nonzero_exit_without_stderr() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "quiet.sh", "exit 1\n");

            let runner = ScriptRunner::new(dir.path());
            let err = runner.execute("quiet.sh", None).await.unwrap_err();
            assert!(matches!(
                err,
                FetchError::ScriptExecutionFailed { stderr: None, .. }
            ));
        }

        #[tokio::test]
        async fn test_invalid_output_is_parse_failure() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "garbage.sh", "echo 'not a feed'\n");

            let runner = ScriptRunner::new(dir.path());
            let err = runner.execute("garbage.sh", None).await.unwrap_err();
            assert!(matches!(err, FetchError::FeedParseFailed(_)));
        }

        #[tokio::test]
        async fn test_missing_script_fails_to_launch() {
            let dir = tempfile::tempdir().unwrap();
            let runner = ScriptRunner::new(dir.path());

            // No extension: executed directly, which fails because it doesn't exist
            let err = runner.execute("missing", None).await.unwrap_err();
            assert!(matches!(err, FetchError::ScriptExecutionFailed { .. }));
        }

        #[tokio::test]
        async fn test_caller_deadline_caps_runtime() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "slow.sh", "sleep 10\n");

            let runner = ScriptRunner::new(dir.path());
            let started = std::time::Instant::now();
            let err = runner
                .execute("slow.sh", Some(Duration::from_millis(200)))
                .await
                .unwrap_err();

            assert!(started.elapsed() < Duration::from_secs(5));
            match err {
                FetchError::ScriptExecutionFailed { reason, .. } => {
                    assert!(reason.contains("timed out"), "reason was {reason}");
                }
                e => panic!("Expected ScriptExecutionFailed, got {:?}", e),
            }
        }
    }
}
