//! Unit fragment text format.

use super::UnitOption;
use crate::error::{Error, Result};
use std::path::Path;

/// Parses fragment text into options in file order.
///
/// Blank lines and lines starting with `#` or `;` are ignored. A trailing
/// backslash continues the value on the next line, joined by a single space.
/// `path` is only used for error reporting.
pub fn parse_unit(path: &Path, text: &str) -> Result<Vec<UnitOption>> {
    let mut options = Vec::new();
    let mut section: Option<String> = None;
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();

        let (start, logical) = match pending.take() {
            Some((start, mut acc)) => {
                acc.push(' ');
                acc.push_str(line.trim_start());
                (start, acc)
            }
            None => (line_no, line.trim_start().to_string()),
        };

        if let Some(stripped) = logical.strip_suffix('\\') {
            pending = Some((start, stripped.trim_end().to_string()));
            continue;
        }

        if logical.is_empty() || logical.starts_with('#') || logical.starts_with(';') {
            continue;
        }

        if logical.starts_with('[') {
            let name = logical
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| Error::UnitParse {
                    path: path.to_path_buf(),
                    line: start,
                    reason: "unterminated section header".to_string(),
                })?;
            section = Some(name.to_string());
            continue;
        }

        let Some(current) = section.as_ref() else {
            return Err(Error::UnitParse {
                path: path.to_path_buf(),
                line: start,
                reason: "option outside of a section".to_string(),
            });
        };

        let (name, value) = logical.split_once('=').ok_or_else(|| Error::UnitParse {
            path: path.to_path_buf(),
            line: start,
            reason: "expected Name=Value".to_string(),
        })?;

        options.push(UnitOption::new(
            current.clone(),
            name.trim(),
            value.trim(),
        ));
    }

    if let Some((start, _)) = pending {
        return Err(Error::UnitParse {
            path: path.to_path_buf(),
            line: start,
            reason: "line continuation at end of file".to_string(),
        });
    }

    Ok(options)
}

/// Renders options as fragment text.
///
/// A section header is emitted whenever the section changes from the previous
/// option, so sorted input yields one header per section.
pub fn serialize_unit(options: &[UnitOption]) -> String {
    let mut out = String::new();
    let mut section: Option<&str> = None;

    for opt in options {
        if section != Some(opt.section.as_str()) {
            if section.is_some() {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&opt.section);
            out.push_str("]\n");
            section = Some(&opt.section);
        }
        out.push_str(&opt.name);
        out.push('=');
        out.push_str(&opt.value);
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<UnitOption>> {
        parse_unit(Path::new("test.conf"), text)
    }

    #[test]
    fn test_parse_sections_and_comments() {
        let text = "# header\n[Unit]\nDescription=Data volume\n\n; note\n[Mount]\nWhat=/dev/vdb\nWhere = /srv/data\n";
        let opts = parse(text).unwrap();
        assert_eq!(
            opts,
            vec![
                UnitOption::new("Unit", "Description", "Data volume"),
                UnitOption::new("Mount", "What", "/dev/vdb"),
                UnitOption::new("Mount", "Where", "/srv/data"),
            ]
        );
    }

    #[test]
    fn test_parse_value_keeps_equals_sign() {
        let opts = parse("[Service]\nEnvironment=A=1\n").unwrap();
        assert_eq!(opts[0].value, "A=1");
    }

    #[test]
    fn test_parse_continuation() {
        let opts = parse("[Service]\nExecStart=/bin/foo \\\n  --bar\n").unwrap();
        assert_eq!(opts[0].value, "/bin/foo --bar");
    }

    #[test]
    fn test_parse_rejects_option_without_section() {
        let err = parse("Name=value\n").unwrap_err();
        assert!(matches!(err, Error::UnitParse { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_missing_equals() {
        let err = parse("[Unit]\nbogus\n").unwrap_err();
        assert!(matches!(err, Error::UnitParse { line: 2, .. }));
    }

    #[test]
    fn test_serialize_groups_sections() {
        let opts = vec![
            UnitOption::new("Files", "Bind", "/a:/b:idmap"),
            UnitOption::new("Network", "Private", "yes"),
            UnitOption::new("Network", "VirtualEthernet", "yes"),
        ];
        assert_eq!(
            serialize_unit(&opts),
            "[Files]\nBind=/a:/b:idmap\n\n[Network]\nPrivate=yes\nVirtualEthernet=yes\n"
        );
    }

    #[test]
    fn test_serialize_then_parse_preserves_options() {
        let opts = vec![
            UnitOption::new("Exec", "Boot", "yes"),
            UnitOption::new("Files", "Bind", "/var/lib/machines/data:/data:idmap"),
        ];
        let text = serialize_unit(&opts);
        assert_eq!(parse(&text).unwrap(), opts);
    }
}
