//! 7z binary integration.
//!
//! Runs the external `7z` tool for extraction, archive creation and listing.
//! Every invocation captures stdout and stderr, checks the exit code, and
//! kills the child if the calling future is dropped.
//!
//! # 7z Commands Reference
//!
//! - Extract all to directory: `7z x -y -bd -o/output/dir archive.7z`
//!   - `-o{dir}`: Output directory
//!   - `-y`: Yes to all prompts
//!   - `-bd`: Disable progress indicator
//!   - `-snld`: Restore links with absolute or `..` targets (7-Zip 25 and later)
//!
//! - Create archive from a directory's contents: `7z a -y -bd out.7z /input/dir/.`
//!   - The trailing `/.` stores entries relative to the directory
//!   - `-snl`: Store symlinks as links (7-Zip only; p7zip does this by default)
//!
//! - List files: `7z l -slt -ba archive.7z`
//!   - `-slt`: Technical listing (key=value format)
//!   - `-ba`: Bare output (no headers)
//!
//! Both 7-Zip and p7zip are supported. Which one a binary is comes from the
//! banner it prints when run without arguments, not from its name: Debian
//! ships 7-Zip 25 as `/usr/bin/7z`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::AdapterConfig;
use crate::error::{Error, ProcessDiagnostics, Result};

/// Binary names tried on PATH, in order.
const ARCHIVER_CANDIDATES: &[&str] = &["7zz", "7z", "7za"];

/// Which 7z implementation a binary is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// 7-Zip (`7zz`, `7zzs`, and `7z` on recent Debian)
    SevenZip,
    /// p7zip
    P7zip,
}

impl Flavor {
    /// Fallback when the banner is not recognizable.
    fn from_program(program: &Path) -> Self {
        match program.file_stem().and_then(|s| s.to_str()) {
            Some("7zz") | Some("7zzs") => Flavor::SevenZip,
            _ => Flavor::P7zip,
        }
    }
}

/// What a binary reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Identity {
    flavor: Flavor,
    /// `(major, minor)` from the banner
    version: Option<(u32, u32)>,
}

impl Identity {
    /// Parse the banner printed by `7z` with no arguments.
    ///
    /// p7zip prints the 7-Zip line followed by `p7zip Version ...`.
    fn from_banner(banner: &str) -> Option<Self> {
        let line = banner
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("7-Zip"))?;

        let flavor = if banner.contains("p7zip Version") {
            Flavor::P7zip
        } else {
            Flavor::SevenZip
        };
        let version = line.split_whitespace().find_map(parse_version);

        Some(Self { flavor, version })
    }

    /// Links with absolute or `..` targets are only restored with `-snld`,
    /// which 7-Zip understands from 25.00 on. Unknown versions get it too.
    fn restores_unsafe_links(&self) -> bool {
        self.flavor == Flavor::SevenZip && self.version.map_or(true, |v| v >= (25, 0))
    }
}

fn parse_version(token: &str) -> Option<(u32, u32)> {
    let (major, minor) = token.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Information about an entry in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    /// Path within the archive (case-preserved)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// A located 7z binary.
#[derive(Debug, Clone)]
pub struct Archiver {
    program: PathBuf,
    timeout: Option<Duration>,
    identity: OnceCell<Identity>,
}

impl Archiver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            identity: OnceCell::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Find the 7z binary.
    ///
    /// Uses the configured path or name if there is one, otherwise the first
    /// of `7zz`, `7z`, `7za` on PATH.
    pub fn locate(config: &AdapterConfig) -> Result<Self> {
        let program = match &config.archiver {
            Some(configured) => which::which(configured)
                .map_err(|e| Error::ArchiverNotFound(format!("{}: {}", configured.display(), e)))?,
            None => ARCHIVER_CANDIDATES
                .iter()
                .find_map(|name| which::which(name).ok())
                .ok_or_else(|| {
                    Error::ArchiverNotFound(format!("tried {}", ARCHIVER_CANDIDATES.join(", ")))
                })?,
        };

        debug!("Using 7z binary {}", program.display());
        Ok(Self::new(program).with_timeout(config.timeout))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Which implementation the binary is, probed once and cached.
    pub async fn flavor(&self) -> Result<Flavor> {
        Ok(self.identity().await?.flavor)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn identity(&self) -> Result<Identity> {
        self.identity
            .get_or_try_init(|| async {
                // No arguments: print the banner and usage
                let mut cmd = Command::new(&self.program);
                let output = self.run(&mut cmd).await?;
                let banner = String::from_utf8_lossy(&output.stdout);

                let identity = Identity::from_banner(&banner).unwrap_or_else(|| Identity {
                    flavor: Flavor::from_program(&self.program),
                    version: None,
                });
                debug!(
                    "{} is {:?} (version {:?})",
                    self.program.display(),
                    identity.flavor,
                    identity.version
                );
                Ok::<_, Error>(identity)
            })
            .await
            .copied()
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand)
            .arg("-y") // Yes to all prompts
            .arg("-bd"); // Disable progress indicator
        cmd
    }

    /// Extract `archive` with full paths into `output_dir`.
    pub async fn extract(&self, archive: &Path, output_dir: &Path) -> Result<()> {
        let mut out_arg = OsString::from("-o");
        out_arg.push(output_dir);

        let identity = self.identity().await?;
        let mut cmd = self.command("x");
        if identity.restores_unsafe_links() {
            cmd.arg("-snld"); // Restore links pointing outside the output dir
        }
        cmd.arg(out_arg).arg(archive);

        let output = self.run(&mut cmd).await?;
        if !output.status.success() {
            return Err(Error::Unpack(self.diagnostics(&cmd, &output)));
        }
        Ok(())
    }

    /// Create `archive` from the contents of `input_dir`.
    pub async fn add(&self, archive: &Path, input_dir: &Path) -> Result<()> {
        let identity = self.identity().await?;
        let mut cmd = self.command("a");
        if identity.flavor == Flavor::SevenZip {
            cmd.arg("-snl"); // Store symlinks as links
        }
        cmd.arg(archive).arg(input_dir.join("."));

        let output = self.run(&mut cmd).await?;
        if !output.status.success() {
            return Err(Error::Pack(self.diagnostics(&cmd, &output)));
        }
        Ok(())
    }

    /// List all entries in an archive, directories included.
    pub async fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("l")
            .arg("-slt") // Technical listing format (key=value)
            .arg("-ba") // Bare output (no headers)
            .arg(archive);

        let output = self.run(&mut cmd).await?;
        if !output.status.success() {
            return Err(Error::List(self.diagnostics(&cmd, &output)));
        }

        parse_7z_list(&output.stdout)
    }

    async fn run(&self, cmd: &mut Command) -> Result<Output> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {:?}", cmd.as_std());

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| Error::Timeout {
                    program: self.program.clone(),
                    timeout,
                })?,
            None => cmd.output().await,
        };

        output.map_err(Error::io(format!("Failed to run {}", self.program.display())))
    }

    fn diagnostics(&self, cmd: &Command, output: &Output) -> ProcessDiagnostics {
        let std_cmd = cmd.as_std();
        let mut line = std_cmd.get_program().to_string_lossy().into_owned();
        for arg in std_cmd.get_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        ProcessDiagnostics::from_output(line, output)
    }
}

/// Parse 7z technical listing output into ArchiveEntry structs.
fn parse_7z_list(output: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    for line in BufReader::new(output).lines() {
        let line = line.map_err(Error::io("Failed to read 7z listing"))?;
        let line = line.trim();

        if line.is_empty() {
            // End of entry
            push_entry(&mut entries, &current);
            current.clear();
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        } else if let Some(key) = line.strip_suffix(" =") {
            current.insert(key.to_string(), String::new());
        }
    }

    // Handle last entry if no trailing newline
    push_entry(&mut entries, &current);

    Ok(entries)
}

fn push_entry(entries: &mut Vec<ArchiveEntry>, fields: &HashMap<String, String>) {
    let Some(path) = fields.get("Path").filter(|p| !p.is_empty()) else {
        return;
    };

    let is_dir = fields.get("Folder").map(|v| v == "+").unwrap_or(false)
        || fields
            .get("Attributes")
            .map(|v| v.starts_with('D'))
            .unwrap_or(false);
    let size = fields
        .get("Size")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    entries.push(ArchiveEntry {
        path: path.clone(),
        size,
        is_dir,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_7z_list() {
        let sample = b"\
Path = dir
Folder = +
Size = 0
Attributes = D_ drwxr-xr-x

Path = dir/a.txt
Folder = -
Size = 5
Attributes = A_ -rw-r--r--

Path = dir/link
Size = 5
Attributes = A_ lrwxrwxrwx
Symbolic Link = a.txt
";
        let entries = parse_7z_list(sample).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            ArchiveEntry {
                path: "dir".into(),
                size: 0,
                is_dir: true
            }
        );
        assert_eq!(entries[1].path, "dir/a.txt");
        assert_eq!(entries[1].size, 5);
        assert!(!entries[1].is_dir);
        assert_eq!(entries[2].path, "dir/link");
    }

    #[test]
    fn test_flavor_from_program() {
        assert_eq!(Flavor::from_program(Path::new("/usr/bin/7zz")), Flavor::SevenZip);
        assert_eq!(Flavor::from_program(Path::new("bin/7zzs")), Flavor::SevenZip);
        assert_eq!(Flavor::from_program(Path::new("/usr/bin/7z")), Flavor::P7zip);
        assert_eq!(Flavor::from_program(Path::new("7za")), Flavor::P7zip);
    }

    #[test]
    fn test_identity_from_banner() {
        let modern = Identity::from_banner(
            "\n7-Zip 25.01 (x64) : Copyright (c) 1999-2025 Igor Pavlov : 2025-08-03\n\nUsage: 7z <command>",
        )
        .unwrap();
        assert_eq!(modern.flavor, Flavor::SevenZip);
        assert_eq!(modern.version, Some((25, 1)));
        assert!(modern.restores_unsafe_links());

        let standalone = Identity::from_banner(
            "7-Zip (z) 22.01 (x64) : Copyright (c) 1999-2022 Igor Pavlov : 2022-07-15",
        )
        .unwrap();
        assert_eq!(standalone.flavor, Flavor::SevenZip);
        assert_eq!(standalone.version, Some((22, 1)));
        assert!(!standalone.restores_unsafe_links());

        let p7zip = Identity::from_banner(
            "7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21\n\
             p7zip Version 16.02 (locale=C,Utf16=off,HugeFiles=on,64 bits,8 CPUs x64)",
        )
        .unwrap();
        assert_eq!(p7zip.flavor, Flavor::P7zip);
        assert!(!p7zip.restores_unsafe_links());

        assert!(Identity::from_banner("usage: something else").is_none());
    }

    /// Script named `name` that prints `banner` when run bare and fails
    /// otherwise, so the attempted command ends up in the error.
    #[cfg(unix)]
    fn fake_archiver(dir: &Path, name: &str, banner: &str) -> Archiver {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join(name);
        std::fs::write(
            &script,
            format!("#!/bin/sh\nif [ $# -eq 0 ]; then\n  echo '{banner}'\n  exit 0\nfi\nexit 2\n"),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Archiver::new(script)
    }

    #[cfg(unix)]
    async fn attempted_commands(archiver: &Archiver, dir: &Path) -> (String, String) {
        let add = archiver.add(&dir.join("o.7z"), dir).await;
        let extract = archiver.extract(&dir.join("i.7z"), &dir.join("out")).await;
        match (add, extract) {
            (Err(Error::Pack(add)), Err(Error::Unpack(extract))) => (add.command, extract.command),
            other => panic!("expected both commands to fail, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_modern_7z_named_7z_stores_and_restores_links() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = fake_archiver(
            dir.path(),
            "7z",
            "7-Zip 25.01 (x64) : Copyright (c) 1999-2025 Igor Pavlov : 2025-08-03",
        );

        assert_eq!(archiver.flavor().await.unwrap(), Flavor::SevenZip);
        let (add, extract) = attempted_commands(&archiver, dir.path()).await;
        assert!(add.contains(" -snl "), "{add}");
        assert!(extract.contains(" -snld "), "{extract}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_p7zip_gets_no_link_switches() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = fake_archiver(
            dir.path(),
            "7z",
            "7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21\np7zip Version 16.02",
        );

        assert_eq!(archiver.flavor().await.unwrap(), Flavor::P7zip);
        let (add, extract) = attempted_commands(&archiver, dir.path()).await;
        assert!(!add.contains("-snl"), "{add}");
        assert!(!extract.contains("-snl"), "{extract}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_older_7zz_skips_snld() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = fake_archiver(
            dir.path(),
            "7zz",
            "7-Zip (z) 22.01 (x64) : Copyright (c) 1999-2022 Igor Pavlov : 2022-07-15",
        );

        let (add, extract) = attempted_commands(&archiver, dir.path()).await;
        assert!(add.contains(" -snl "), "{add}");
        assert!(!extract.contains("-snld"), "{extract}");
    }

    #[test]
    fn test_locate_reports_missing_binary() {
        let config = AdapterConfig {
            archiver: Some(PathBuf::from("/nonexistent/bin/7zz")),
            ..Default::default()
        };
        assert!(matches!(
            Archiver::locate(&config),
            Err(Error::ArchiverNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_slow_archiver() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("7z");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let archiver = Archiver::new(&script).with_timeout(Some(Duration::from_millis(200)));
        let result = archiver
            .extract(&dir.path().join("in.7z"), &dir.path().join("out"))
            .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_list_real_archive() {
        // Skip if 7z not available
        let Ok(archiver) = Archiver::locate(&AdapterConfig::default()) else {
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        std::fs::create_dir_all(input.join("sub")).unwrap();
        std::fs::write(input.join("sub/file.bin"), [7u8; 16]).unwrap();
        let archive = dir.path().join("test.7z");

        archiver.add(&archive, &input).await.unwrap();
        let entries = archiver.list(&archive).await.unwrap();

        let file = entries.iter().find(|e| e.path == "sub/file.bin").unwrap();
        assert_eq!(file.size, 16);
        assert!(entries.iter().any(|e| e.path == "sub" && e.is_dir));
    }
}
