//! Request validation
//!
//! Strict input validation for the HTTP surface: string fields are
//! length-limited and rejected when they carry control characters, path
//! fields must normalise to a subpath of the configured base directory,
//! and cross-origin requests are only accepted from loopback and private
//! IPv4 ranges.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Component, Path, PathBuf};

use crate::errors::{EngineError, Result};

/// Maximum length of any string field in a request body
pub const MAX_FIELD_BYTES: usize = 16 * 1024;

/// Validate a free-text request field
///
/// Rejects empty and oversized values and any control character outside
/// `\t`, `\r`, `\n`.
pub fn validate_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} must not be empty", field)));
    }

    if value.len() > MAX_FIELD_BYTES {
        return Err(EngineError::Validation(format!(
            "{} exceeds {} bytes",
            field, MAX_FIELD_BYTES
        )));
    }

    if let Some(bad) = value
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
    {
        return Err(EngineError::Validation(format!(
            "{} contains control character U+{:04X}",
            field, bad as u32
        )));
    }

    Ok(())
}

/// Validate a structured context mapping
///
/// Every key and value passes the text rules; keys ending in `path` are
/// additionally held to the path sandbox.
pub fn validate_context(context: &BTreeMap<String, String>, base_dir: &Path) -> Result<()> {
    for (key, value) in context {
        validate_text("context key", key)?;
        validate_text(&format!("context[{}]", key), value)?;

        if key.to_lowercase().ends_with("path") {
            safe_path(base_dir, value)?;
        }
    }
    Ok(())
}

/// Resolve a user-supplied path inside the configured base directory
///
/// Rejects absolute paths and any `..` component. When the joined path
/// exists, symlinks that escape the base after canonicalization are
/// rejected too.
pub fn safe_path(base_dir: &Path, candidate: &str) -> Result<PathBuf> {
    let path = Path::new(candidate);

    if path.is_absolute() {
        return Err(EngineError::Validation(format!(
            "absolute paths are not allowed: {}",
            candidate
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(EngineError::Validation(format!(
                    "path traversal is not allowed: {}",
                    candidate
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(EngineError::Validation(format!(
                    "absolute paths are not allowed: {}",
                    candidate
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    let joined = base_dir.join(path);

    // A symlink inside the base may still point outside it; canonicalize
    // whatever already exists and re-check containment.
    if joined.exists() {
        let canonical = joined
            .canonicalize()
            .map_err(|e| EngineError::Validation(format!("unresolvable path {}: {}", candidate, e)))?;
        let canonical_base = base_dir
            .canonicalize()
            .map_err(|e| EngineError::Validation(format!("invalid base directory: {}", e)))?;

        if !canonical.starts_with(&canonical_base) {
            return Err(EngineError::Validation(format!(
                "path escapes the base directory: {}",
                candidate
            )));
        }

        return Ok(canonical);
    }

    Ok(joined)
}

/// Whether a CORS origin is acceptable
///
/// Accepts loopback (including `localhost`) and the private IPv4 ranges
/// 10/8, 172.16/12 and 192.168/16. Anything else is rejected, including
/// public addresses and unparseable origins.
pub fn origin_allowed(origin: &str) -> bool {
    let rest = match origin.split_once("://") {
        Some((scheme, rest)) if scheme == "http" || scheme == "https" => rest,
        _ => return false,
    };

    let host = rest.split('/').next().unwrap_or("");
    let host = strip_port(host);

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // Bracketed IPv6 literal, possibly with a port suffix.
        return host.split(']').next().map(|h| &h[..]).unwrap_or(host);
    }
    host.rsplit_once(':')
        .map(|(h, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                h
            } else {
                host
            }
        })
        .unwrap_or(host)
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_rules() {
        assert!(validate_text("task", "build the thing").is_ok());
        assert!(validate_text("task", "multi\nline\ttext\r\n").is_ok());

        assert!(validate_text("task", "").is_err());
        assert!(validate_text("task", "   ").is_err());
        assert!(validate_text("task", "null\u{0}byte").is_err());
        assert!(validate_text("task", "\u{1b}[31mred").is_err());
        assert!(validate_text("task", &"x".repeat(MAX_FIELD_BYTES + 1)).is_err());
    }

    #[test]
    fn test_safe_path_accepts_subpaths() {
        let base = tempfile::TempDir::new().unwrap();
        let resolved = safe_path(base.path(), "notes/todo.txt").unwrap();
        assert!(resolved.starts_with(base.path()));
    }

    #[test]
    fn test_safe_path_rejects_traversal_and_absolutes() {
        let base = tempfile::TempDir::new().unwrap();

        assert!(safe_path(base.path(), "../escape").is_err());
        assert!(safe_path(base.path(), "a/../../escape").is_err());
        assert!(safe_path(base.path(), "/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_safe_path_rejects_escaping_symlink() {
        let base = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();

        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();

        assert!(safe_path(base.path(), "link").is_err());
    }

    #[test]
    fn test_context_path_keys_are_sandboxed() {
        let base = tempfile::TempDir::new().unwrap();

        let mut context = BTreeMap::new();
        context.insert("session_id".to_string(), "abc".to_string());
        assert!(validate_context(&context, base.path()).is_ok());

        context.insert("config_path".to_string(), "../../etc/passwd".to_string());
        let err = validate_context(&context, base.path()).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_origin_loopback_and_private_accepted() {
        assert!(origin_allowed("http://localhost:3000"));
        assert!(origin_allowed("http://127.0.0.1"));
        assert!(origin_allowed("https://10.1.2.3:8443"));
        assert!(origin_allowed("http://172.16.0.9"));
        assert!(origin_allowed("http://172.31.255.1:8080"));
        assert!(origin_allowed("http://192.168.1.10:8080"));
    }

    #[test]
    fn test_origin_public_rejected() {
        assert!(!origin_allowed("http://8.8.8.8"));
        assert!(!origin_allowed("https://example.com"));
        assert!(!origin_allowed("http://172.32.0.1"));
        assert!(!origin_allowed("http://11.0.0.1"));
        assert!(!origin_allowed("ftp://127.0.0.1"));
        assert!(!origin_allowed("garbage"));
    }
}
