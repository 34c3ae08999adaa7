//! Resource policy applied to every tool execution
//!
//! "Restricted" and "unconstrained" are two values of the same struct; the
//! executor and the tools only ever consult the fields.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named starting point for a [`ResourcePolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Restricted,
    Unconstrained,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Restricted => write!(f, "restricted"),
            Profile::Unconstrained => write!(f, "unconstrained"),
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restricted" | "sandboxed" => Ok(Profile::Restricted),
            "unconstrained" | "unrestricted" => Ok(Profile::Unconstrained),
            other => Err(format!("unknown policy profile '{other}'")),
        }
    }
}

/// A side effect the policy does not allow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("path '{path}' is outside the allowed root {root}")]
    OutsideRoot { path: String, root: String },
    #[error("network access is disabled")]
    NetworkDisabled,
    #[error("host '{0}' is not in the network allow-list")]
    HostNotAllowed(String),
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("tool '{0}' is disabled by policy")]
    ToolDisabled(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePolicy {
    pub profile: Profile,
    /// Timeout for tools that declare none of their own
    pub default_timeout: Duration,
    /// Maximum bytes of tool output kept in a result
    pub output_cap: usize,
    /// Filesystem confinement root
    pub root: PathBuf,
    /// Relative paths and subprocesses start here
    pub working_dir: PathBuf,
    pub allow_network: bool,
    /// Empty means any host when the network is allowed
    pub allowed_hosts: Vec<String>,
    pub disabled_tools: BTreeSet<String>,
    /// Per-tool overrides, taking precedence over the tool's own timeout
    pub tool_timeouts: HashMap<String, Duration>,
}

impl ResourcePolicy {
    /// 30 s timeout, 16 KiB output, confined to `root`, no network
    pub fn restricted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            profile: Profile::Restricted,
            default_timeout: Duration::from_secs(30),
            output_cap: 16 * 1024,
            working_dir: root.clone(),
            root,
            allow_network: false,
            allowed_hosts: Vec::new(),
            disabled_tools: BTreeSet::new(),
            tool_timeouts: HashMap::new(),
        }
    }

    /// 600 s timeout, 1 MiB output, whole filesystem, any host
    pub fn unconstrained(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile: Profile::Unconstrained,
            default_timeout: Duration::from_secs(600),
            output_cap: 1024 * 1024,
            root: PathBuf::from("/"),
            working_dir: working_dir.into(),
            allow_network: true,
            allowed_hosts: Vec::new(),
            disabled_tools: BTreeSet::new(),
            tool_timeouts: HashMap::new(),
        }
    }

    pub fn for_profile(profile: Profile, working_dir: impl Into<PathBuf>) -> Self {
        match profile {
            Profile::Restricted => Self::restricted(working_dir),
            Profile::Unconstrained => Self::unconstrained(working_dir),
        }
    }

    /// Effective timeout: config override, then the tool's own, then the default
    pub fn timeout_for(&self, tool_id: &str, declared: Option<Duration>) -> Duration {
        self.tool_timeouts
            .get(tool_id)
            .copied()
            .or(declared)
            .unwrap_or(self.default_timeout)
    }

    pub fn check_tool(&self, tool_id: &str) -> Result<(), PolicyViolation> {
        if self.disabled_tools.contains(tool_id) {
            return Err(PolicyViolation::ToolDisabled(tool_id.to_string()));
        }
        Ok(())
    }

    pub fn check_host(&self, host: &str) -> Result<(), PolicyViolation> {
        if !self.allow_network {
            return Err(PolicyViolation::NetworkDisabled);
        }
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if self.allowed_hosts.is_empty() {
            return Ok(());
        }
        let allowed = self.allowed_hosts.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_prefix("*.") {
                Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
                None => host == pattern,
            }
        });
        if allowed {
            Ok(())
        } else {
            Err(PolicyViolation::HostNotAllowed(host))
        }
    }

    /// Check an outbound URL; only http and https are accepted
    pub fn check_url(&self, url: &str) -> Result<reqwest::Url, PolicyViolation> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| PolicyViolation::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PolicyViolation::InvalidUrl(url.to_string()));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| PolicyViolation::InvalidUrl(url.to_string()))?;
        self.check_host(host)?;
        Ok(parsed)
    }

    /// Resolve a user-supplied path and confirm it stays inside the root
    ///
    /// Relative paths start at `working_dir`, `~` expands to `$HOME`,
    /// `..` is resolved lexically and symlinks are followed for the part
    /// of the path that exists, so a link pointing outside is rejected too.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, PolicyViolation> {
        let expanded = expand_home(raw.trim());
        let candidate = if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir.join(expanded)
        };

        let resolved = canonicalize_existing(&normalize(&candidate));
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| normalize(&self.root));

        if !resolved.starts_with(&root) {
            return Err(PolicyViolation::OutsideRoot {
                path: raw.to_string(),
                root: root.display().to_string(),
            });
        }
        Ok(resolved)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

/// Lexically remove `.` and `..`; `..` never climbs above the filesystem root
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize the longest existing prefix and re-append the rest
fn canonicalize_existing(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_profiles_are_one_struct() {
        let restricted = ResourcePolicy::restricted("/tmp");
        assert_eq!(restricted.default_timeout, Duration::from_secs(30));
        assert_eq!(restricted.output_cap, 16 * 1024);
        assert!(!restricted.allow_network);

        let open = ResourcePolicy::unconstrained("/tmp");
        assert_eq!(open.default_timeout, Duration::from_secs(600));
        assert_eq!(open.root, PathBuf::from("/"));
        assert!(open.allow_network);
        assert_eq!("unrestricted".parse::<Profile>(), Ok(Profile::Unconstrained));
    }

    #[test]
    fn test_timeout_precedence() {
        let mut policy = ResourcePolicy::restricted("/tmp");
        assert_eq!(policy.timeout_for("ping", None), Duration::from_secs(30));
        assert_eq!(
            policy.timeout_for("ping", Some(Duration::from_secs(20))),
            Duration::from_secs(20)
        );
        policy
            .tool_timeouts
            .insert("ping".into(), Duration::from_secs(2));
        assert_eq!(
            policy.timeout_for("ping", Some(Duration::from_secs(20))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_network_checks() {
        let restricted = ResourcePolicy::restricted("/tmp");
        assert_eq!(
            restricted.check_url("https://example.com/x"),
            Err(PolicyViolation::NetworkDisabled)
        );

        let mut open = ResourcePolicy::unconstrained("/tmp");
        assert!(open.check_url("https://example.com/x").is_ok());
        assert!(open.check_url("file:///etc/passwd").is_err());

        open.allowed_hosts = vec!["*.example.com".into(), "api.duckduckgo.com".into()];
        assert!(open.check_host("docs.example.com").is_ok());
        assert!(open.check_host("example.com").is_ok());
        assert!(open.check_host("API.duckduckgo.com").is_ok());
        assert_eq!(
            open.check_host("evil.com"),
            Err(PolicyViolation::HostNotAllowed("evil.com".into()))
        );
    }

    #[test]
    fn test_resolve_path_inside_root() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();
        let policy = ResourcePolicy::restricted(temp.path());

        let root = temp.path().canonicalize().unwrap();
        assert_eq!(policy.resolve_path("notes.txt").unwrap(), root.join("notes.txt"));
        assert_eq!(
            policy.resolve_path("./sub/../new.txt").unwrap(),
            root.join("new.txt")
        );
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        let temp = TempDir::new().unwrap();
        let policy = ResourcePolicy::restricted(temp.path());

        assert!(matches!(
            policy.resolve_path("../../../etc/passwd"),
            Err(PolicyViolation::OutsideRoot { .. })
        ));
        assert!(policy.resolve_path("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_path_rejects_symlink_escape() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();
        let policy = ResourcePolicy::restricted(temp.path());

        assert!(policy.resolve_path("link/secret.txt").is_err());
    }

    #[test]
    fn test_unconstrained_allows_absolute_paths() {
        let temp = TempDir::new().unwrap();
        let policy = ResourcePolicy::unconstrained(temp.path());
        assert!(policy.resolve_path("/etc").is_ok());
    }
}
