//! Filesystem tools, confined to the policy root

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexBuilder;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use super::registry::{ArgSpec, Constraint, ToolSpec};
use super::{opt_str, opt_u64, str_arg, Arguments, ToolContext, ToolError, ToolHandler};

const MAX_LISTED: usize = 50;
const BINARY_SNIFF_BYTES: usize = 8192;

struct ReadFile;

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = ctx.policy.resolve_path(str_arg(args, "path")?)?;
        let cannot_read = |e: std::io::Error| {
            ToolError::Fault(format!("cannot read {}: {e}", path.display()))
        };
        let file = tokio::fs::File::open(&path).await.map_err(cannot_read)?;
        let size = file.metadata().await.map_err(cannot_read)?.len();

        // Never hold more than the output cap allows, whatever the file size
        let requested = opt_u64(args, "max_bytes");
        let budget = ctx.policy.output_cap as u64 + 1;
        let read_limit = requested.map_or(budget, |n| n.min(budget));
        let mut bytes = Vec::new();
        file.take(read_limit.max(BINARY_SNIFF_BYTES as u64))
            .read_to_end(&mut bytes)
            .await
            .map_err(cannot_read)?;

        if bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0) {
            return Ok(format!(
                "{} is a binary file ({size} bytes); not displayed",
                path.display()
            ));
        }

        bytes.truncate(read_limit as usize);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        match requested {
            Some(limit) if limit < size && limit < budget => {
                Ok(format!("{text}\n[showing {limit} of {size} bytes]"))
            }
            _ => Ok(text),
        }
    }
}

pub fn read_file() -> ToolSpec {
    ToolSpec::new(
        "read_file",
        "Read a text file and return its contents. Use when the user asks to open, show, \
         cat or read a file.",
        vec![
            ArgSpec::string("path", "Path of the file to read").required(),
            ArgSpec::integer("max_bytes", "Only return the first N bytes").constraint(
                Constraint::Range {
                    min: 1.0,
                    max: 10_485_760.0,
                },
            ),
        ],
        Arc::new(ReadFile),
    )
}

struct WriteFile;

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = ctx.policy.resolve_path(str_arg(args, "path")?)?;
        let content = str_arg(args, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Fault(format!("cannot write {}: {e}", path.display())))?;

        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

pub fn write_file() -> ToolSpec {
    ToolSpec::new(
        "write_file",
        "Write text content to a file, creating parent directories. Use when the user asks \
         to save, create or write a file.",
        vec![
            ArgSpec::string("path", "Path of the file to write").required(),
            ArgSpec::string("content", "Text to write").required().sensitive(),
        ],
        Arc::new(WriteFile),
    )
}

struct ListDirectory;

#[async_trait]
impl ToolHandler for ListDirectory {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let dir = ctx.policy.resolve_path(opt_str(args, "path").unwrap_or("."))?;

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ToolError::Fault(format!("cannot list {}: {e}", dir.display())))?;
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push((
                metadata.is_dir(),
                entry.file_name().to_string_lossy().into_owned(),
                metadata.len(),
            ));
        }
        // directories first, then by name
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        if entries.is_empty() {
            return Ok(format!("{} is empty", dir.display()));
        }

        let mut lines = vec![format!("{} ({} entries)", dir.display(), entries.len())];
        for (is_dir, name, size) in entries.iter().take(MAX_LISTED) {
            if *is_dir {
                lines.push(format!("  [dir]  {name}/"));
            } else {
                lines.push(format!("  [file] {name} ({})", human_size(*size)));
            }
        }
        if entries.len() > MAX_LISTED {
            lines.push(format!("  ... and {} more", entries.len() - MAX_LISTED));
        }
        Ok(lines.join("\n"))
    }
}

pub fn list_directory() -> ToolSpec {
    ToolSpec::new(
        "list_directory",
        "List the files and folders in a directory (default: the working directory). Use \
         when the user asks what is in a folder.",
        vec![ArgSpec::string("path", "Directory to list")],
        Arc::new(ListDirectory),
    )
}

struct FindFiles;

#[async_trait]
impl ToolHandler for FindFiles {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let pattern = str_arg(args, "pattern")?.trim().to_string();
        let root = ctx.policy.resolve_path(opt_str(args, "path").unwrap_or("."))?;

        let search_root = root.clone();
        let matches = tokio::task::spawn_blocking(move || find_matching(&search_root, &pattern))
            .await
            .map_err(|e| ToolError::Fault(format!("search task failed: {e}")))??;

        if matches.is_empty() {
            return Ok(format!("No files matching the pattern under {}", root.display()));
        }
        let mut lines: Vec<String> = matches
            .iter()
            .take(MAX_LISTED)
            .map(|p| format!("  {}", p.display()))
            .collect();
        if matches.len() > MAX_LISTED {
            lines.push(format!("  ... and {} more", matches.len() - MAX_LISTED));
        }
        Ok(format!(
            "Found {} file(s) under {}:\n{}",
            matches.len(),
            root.display(),
            lines.join("\n")
        ))
    }
}

/// Case-insensitive regex over file names; an invalid regex matches literally
fn find_matching(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ToolError> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .map_err(|e| ToolError::InvalidArguments(format!("bad pattern: {e}")))?;

    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(12)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker.filter_map(Result::ok) {
        if entry.file_type().is_file() && regex.is_match(&entry.file_name().to_string_lossy()) {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            found.push(relative.to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

pub fn find_files() -> ToolSpec {
    ToolSpec::new(
        "find_files",
        "Find files whose names match a pattern (case-insensitive regular expression) under \
         a directory. Use when the user asks to find or locate files.",
        vec![
            ArgSpec::string("pattern", "File name pattern, e.g. '\\.rs$' or 'config'").required(),
            ArgSpec::string("path", "Directory to search (default: the working directory)"),
        ],
        Arc::new(FindFiles),
    )
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
