//! Directory tree snapshot stored inside template artifacts.

use crate::{Error, Result};
use async_recursion::async_recursion;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// One node of a captured directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    /// UTF-8 text file stored verbatim.
    File { content: String, size: u64 },
    /// Any other file, stored as standard base64.
    Binary { content: String, size: u64 },
    Directory { entries: BTreeMap<String, TreeNode> },
}

impl TreeNode {
    pub fn empty_dir() -> Self {
        TreeNode::Directory {
            entries: BTreeMap::new(),
        }
    }

    /// Node for raw file bytes: text when valid UTF-8 without NUL bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        if bytes.contains(&0) {
            return TreeNode::Binary {
                content: BASE64.encode(&bytes),
                size,
            };
        }
        match String::from_utf8(bytes) {
            Ok(content) => TreeNode::File { content, size },
            Err(e) => TreeNode::Binary {
                content: BASE64.encode(e.as_bytes()),
                size,
            },
        }
    }

    /// Files contained in this subtree.
    pub fn file_count(&self) -> usize {
        match self {
            TreeNode::File { .. } | TreeNode::Binary { .. } => 1,
            TreeNode::Directory { entries } => entries.values().map(TreeNode::file_count).sum(),
        }
    }

    /// Uncompressed bytes of all files in this subtree.
    pub fn logical_size(&self) -> u64 {
        match self {
            TreeNode::File { size, .. } | TreeNode::Binary { size, .. } => *size,
            TreeNode::Directory { entries } => entries.values().map(TreeNode::logical_size).sum(),
        }
    }
}

/// Reject names that would escape the extraction directory.
pub(crate) fn check_entry_name(name: &str) -> Result<()> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if unsafe_name {
        return Err(Error::Integrity(format!("unsafe tree entry name {:?}", name)));
    }
    Ok(())
}

/// Snapshot `dir` recursively. Entries named in `ignore` are skipped, as are
/// symlinks and special files.
#[async_recursion]
pub async fn capture(dir: &Path, ignore: &[String]) -> Result<TreeNode> {
    let mut entries = BTreeMap::new();
    let mut reader = fs::read_dir(dir)
        .await
        .map_err(|e| Error::io("read_dir", dir, e))?;

    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| Error::io("read_dir", dir, e))?
    {
        let Some(name) = item.file_name().to_str().map(str::to_owned) else {
            debug!(path = %item.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        if ignore.iter().any(|i| i == &name) {
            continue;
        }

        let path = item.path();
        let file_type = item
            .file_type()
            .await
            .map_err(|e| Error::io("file_type", &path, e))?;

        let node = if file_type.is_dir() {
            capture(&path, ignore).await?
        } else if file_type.is_file() {
            let bytes = fs::read(&path).await.map_err(|e| Error::io("read", &path, e))?;
            TreeNode::from_bytes(bytes)
        } else {
            debug!(path = %path.display(), "skipping symlink or special file");
            continue;
        };
        entries.insert(name, node);
    }

    Ok(TreeNode::Directory { entries })
}

/// Write `node` below `target`, creating directories as needed.
/// Returns the number of files written.
#[async_recursion]
pub async fn materialize(node: &TreeNode, target: &Path) -> Result<usize> {
    match node {
        TreeNode::Directory { entries } => {
            fs::create_dir_all(target)
                .await
                .map_err(|e| Error::io("create_dir_all", target, e))?;
            let mut written = 0;
            for (name, child) in entries {
                check_entry_name(name)?;
                written += materialize(child, &target.join(name)).await?;
            }
            Ok(written)
        }
        TreeNode::File { content, .. } => {
            fs::write(target, content.as_bytes())
                .await
                .map_err(|e| Error::io("write", target, e))?;
            Ok(1)
        }
        TreeNode::Binary { content, .. } => {
            let bytes = BASE64
                .decode(content)
                .map_err(|e| Error::Integrity(format!("bad base64 for {}: {}", target.display(), e)))?;
            fs::write(target, bytes)
                .await
                .map_err(|e| Error::io("write", target, e))?;
            Ok(1)
        }
    }
}
