use super::{CollaboratorError, ScanCredentials, ScanExecutor, ScanReport};
use crate::config::ScanConfig;
use std::fs;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const TARGET_ENV: &str = "SCANWARD_SCAN_TARGET";
pub const USER_ENV: &str = "SCANWARD_SCAN_USER";
pub const PASSWORD_ENV: &str = "SCANWARD_SCAN_PASSWORD";

const STDERR_TAIL_CHARS: usize = 400;

/// Runs the configured scan program once per host. The program receives the
/// profile path followed by `-i <address>, -u <user>`, and must leave its
/// report at `<profile dir>/reports/<address>_report.json`.
#[derive(Debug, Clone)]
pub struct CommandScanExecutor {
    command: Vec<String>,
    profile_root: PathBuf,
    timeout: Duration,
}

impl CommandScanExecutor {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.command.clone(), config.profile_root.clone(), config.timeout())
    }

    pub fn new(command: Vec<String>, profile_root: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            profile_root,
            timeout,
        }
    }

    pub fn profile_path(&self, profile: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(profile);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if profile.trim().is_empty() || !contained {
            return Err(CollaboratorError::failed(
                "scan",
                format!("scan profile `{profile}` must be a relative path inside the profile root"),
            ));
        }
        Ok(self.profile_root.join(relative))
    }

    pub fn expected_report_path(profile_path: &Path, address: &str) -> PathBuf {
        profile_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("reports")
            .join(format!("{address}_report.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CollaboratorError {
    CollaboratorError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
}

impl ScanExecutor for CommandScanExecutor {
    fn scan(
        &self,
        profile: &str,
        address: &str,
        credentials: &ScanCredentials,
    ) -> Result<ScanReport, CollaboratorError> {
        let profile_path = self.profile_path(profile)?;
        if !profile_path.is_file() {
            return Ok(ScanReport::failed(format!(
                "scan profile not found at {}",
                profile_path.display()
            )));
        }
        let Some((program, leading_args)) = self.command.split_first() else {
            return Err(CollaboratorError::NotConfigured {
                service: "scan".to_string(),
                reason: "scan command is empty".to_string(),
            });
        };

        let report_path = Self::expected_report_path(&profile_path, address);
        match fs::remove_file(&report_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&report_path, err)),
        }
        let inventory = format!("{address},");
        let mut command = Command::new(program);
        command
            .args(leading_args)
            .arg(&profile_path)
            .args(["-i", inventory.as_str(), "-u", credentials.user.as_str()])
            .env(TARGET_ENV, address)
            .env(USER_ENV, &credentials.user)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = credentials.password.as_deref() {
            command.env(PASSWORD_ENV, password);
        }

        tracing::debug!(program = %program, address, profile = %profile_path.display(), "starting scan");
        let mut child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                CollaboratorError::NotConfigured {
                    service: "scan".to_string(),
                    reason: format!("scan program `{program}` was not found"),
                }
            } else {
                io_error(&profile_path, err)
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(&profile_path, std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(&profile_path, std::io::Error::other("missing stderr pipe")))?;
        let stdout_reader = thread::spawn(move || {
            let mut sink = Vec::new();
            let _ = BufReader::new(stdout).read_to_end(&mut sink);
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf);
            buf
        });

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        return Err(CollaboratorError::Timeout {
                            operation: format!("scan of {address}"),
                            timeout_secs: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(io_error(&profile_path, err)),
            }
        };
        let _ = stdout_reader.join();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            let code = status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Ok(ScanReport::failed(format!(
                "scan command exited with status {code}: {}",
                tail(&stderr)
            )));
        }
        if !report_path.is_file() {
            return Ok(ScanReport::failed(format!(
                "scan finished but no report was found at {}",
                report_path.display()
            )));
        }
        Ok(ScanReport::completed(report_path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_paths_must_stay_inside_root() {
        let executor = CommandScanExecutor::new(
            vec!["true".to_string()],
            PathBuf::from("/srv/playbooks"),
            Duration::from_secs(5),
        );
        assert!(executor.profile_path("../secrets.yml").is_err());
        assert!(executor.profile_path("/etc/passwd").is_err());
        assert_eq!(
            executor.profile_path("openscap_scan.yml").expect("path"),
            PathBuf::from("/srv/playbooks/openscap_scan.yml")
        );
    }

    #[test]
    fn report_lands_next_to_profile() {
        let path = CommandScanExecutor::expected_report_path(
            Path::new("/srv/playbooks/openscap_scan.yml"),
            "10.0.0.5",
        );
        assert_eq!(path, PathBuf::from("/srv/playbooks/reports/10.0.0.5_report.json"));
    }
}
