//! Artifact encoding: JSON tree wrapped in a gzip stream.

use super::tree::TreeNode;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Encode a tree as a gzip-compressed JSON artifact. `level` is clamped to 0..=9.
pub fn compress(tree: &TreeNode, level: u32) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(tree)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(&json)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Compression(e.to_string()))
}

pub fn decompress(bytes: &[u8]) -> Result<TreeNode> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Lowercase hex SHA-256 of the artifact bytes.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> TreeNode {
        let mut nested = BTreeMap::new();
        nested.insert("logo.bin".to_string(), TreeNode::from_bytes(vec![0, 1, 2, 255]));
        let mut entries = BTreeMap::new();
        entries.insert("README.md".to_string(), TreeNode::from_bytes(b"# Tool\n".to_vec()));
        entries.insert("assets".to_string(), TreeNode::Directory { entries: nested });
        TreeNode::Directory { entries }
    }

    #[test]
    fn test_decompress_inverts_compress() {
        let tree = sample();
        for level in [0, 6, 9, 42] {
            let bytes = compress(&tree, level).unwrap();
            assert_eq!(decompress(&bytes).unwrap(), tree);
        }
    }

    #[test]
    fn test_empty_tree_is_small_but_valid() {
        let bytes = compress(&TreeNode::empty_dir(), 6).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.len() < 128);
        assert_eq!(decompress(&bytes).unwrap(), TreeNode::empty_dir());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decompress(b"not gzip"), Err(Error::Compression(_))));
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let bytes = compress(&sample(), 6).unwrap();
        let sum = checksum(&bytes);
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, checksum(&bytes));
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
