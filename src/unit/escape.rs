//! Path escaping for unit names.

/// Escapes a filesystem path into a unit name component.
///
/// Follows the service manager's path escaping: redundant slashes are
/// collapsed, leading and trailing slashes dropped, remaining slashes become
/// `-`, and every byte outside `[A-Za-z0-9:_.]` (plus a leading `.`) is
/// written as `\xNN`. The root path escapes to `-`.
///
/// ```
/// use nspawn_fleet::unit::escape_path;
///
/// assert_eq!(escape_path("/var/lib/machines/data"), "var-lib-machines-data");
/// assert_eq!(escape_path("/dev/disk/by-label/data"), "dev-disk-by\\x2dlabel-data");
/// ```
pub fn escape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());

    for (i, component) in path.split('/').filter(|c| !c.is_empty()).enumerate() {
        if i > 0 {
            out.push('-');
        }
        for (j, byte) in component.bytes().enumerate() {
            let leading_dot = i == 0 && j == 0 && byte == b'.';
            if !leading_dot && (byte.is_ascii_alphanumeric() || matches!(byte, b':' | b'_' | b'.'))
            {
                out.push(byte as char);
            } else {
                out.push_str(&format!("\\x{byte:02x}"));
            }
        }
    }

    if out.is_empty() {
        out.push('-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_simple_path() {
        assert_eq!(escape_path("/srv/data"), "srv-data");
    }

    #[test]
    fn test_escape_root() {
        assert_eq!(escape_path("/"), "-");
        assert_eq!(escape_path(""), "-");
    }

    #[test]
    fn test_escape_collapses_slashes() {
        assert_eq!(escape_path("//srv///data/"), "srv-data");
    }

    #[test]
    fn test_escape_dash_and_space() {
        assert_eq!(escape_path("/mnt/my-disk"), "mnt-my\\x2ddisk");
        assert_eq!(escape_path("/mnt/a b"), "mnt-a\\x20b");
    }

    #[test]
    fn test_escape_leading_dot() {
        assert_eq!(escape_path("/.hidden/x.y"), "\\x2ehidden-x.y");
    }
}
