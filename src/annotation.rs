//! Depth-prefixed key encoding.
//!
//! An annotation maps a path to `<depth>/<path>` (the root maps to `"0"`),
//! which lets callers keep per-path side data in a flat namespace while
//! still being able to recover the original path unambiguously: the leading
//! depth says exactly how many segments belong to it.

use crate::error::{Error, Result};
use crate::path;

/// Encode a target path as a depth-prefixed annotation key.
///
/// `annotation("/") == "0"`, `annotation("/one/two") == "2/one/two"`.
pub fn annotation(target: &str) -> String {
    let target = path::canonical(target);
    if target == "/" {
        return "0".to_string();
    }
    format!("{}/{}", target.split('/').count(), target)
}

/// Decode an annotation key back to the target path.
///
/// Fails if the leading segment is not an integer or if the remainder does
/// not have exactly that many segments.
pub fn parse_annotation(annot: &str) -> Result<String> {
    let annot = path::canonical(annot);
    let (head, rest) = path::first(&annot);
    let depth: usize = head
        .parse()
        .map_err(|_| Error::InvalidPath(format!("bad annotation: {}", annot)))?;
    if depth == 0 {
        return Ok("/".to_string());
    }
    if path::parts(&rest).len() != depth {
        return Err(Error::InvalidPath(format!("bad annotation: {}", annot)));
    }
    Ok(rest)
}
