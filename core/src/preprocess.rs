//! Include discovery: the transitive closure over `#include "…"` edges,
//! depth-first post-order so dependencies come first. Cycles are broken
//! silently by a visited set. IO is injected as a read callback so the
//! traversal can be tested against in-memory file maps.

use crate::error::Diagnostics;
use log::debug;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

pub type ReadFn<'a> = dyn FnMut(&Path) -> io::Result<String> + 'a;

/// Gathers every source file reachable from the entry file, dependencies
/// first. Unreadable includes are reported at the offending directive and
/// skipped.
pub fn gather_sources(
    entry: &Path,
    read: &mut ReadFn<'_>,
    diags: &Diagnostics,
) -> Vec<(PathBuf, String)> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    visit(entry.to_path_buf(), read, diags, &mut visited, &mut out, None);
    debug!("preprocessor gathered {} file(s)", out.len());
    out
}

fn visit(
    path: PathBuf,
    read: &mut ReadFn<'_>,
    diags: &Diagnostics,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<(PathBuf, String)>,
    origin: Option<(&Path, usize)>,
) {
    if !visited.insert(path.clone()) {
        return;
    }
    let source = match read(&path) {
        Ok(source) => source,
        Err(err) => {
            match origin {
                Some((from, line)) => diags.error(
                    &from.display().to_string(),
                    line,
                    1,
                    format!(
                        "Cannot read included file '{}': {}",
                        path.display(),
                        err
                    ),
                ),
                None => diags.error(
                    &path.display().to_string(),
                    0,
                    0,
                    format!("Cannot read file: {}", err),
                ),
            }
            return;
        }
    };

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for (idx, line) in source.lines().enumerate() {
        if let Some(target) = parse_include(line) {
            visit(
                dir.join(target),
                read,
                diags,
                visited,
                out,
                Some((&path, idx + 1)),
            );
        }
    }
    out.push((path, source));
}

/// Matches a `#include "relative/path"` line. Anything else, including
/// `#import`, is left to the parser.
fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?;
    let rest = rest.trim_start().strip_prefix("include")?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn gather(
        files: &[(&str, &str)],
        entry: &str,
    ) -> (Vec<String>, Vec<crate::error::Diagnostic>) {
        let map: HashMap<String, String> = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut read = |p: &Path| {
            map.get(&p.display().to_string()).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no such file")
            })
        };
        let diags = Diagnostics::new();
        let sources = gather_sources(Path::new(entry), &mut read, &diags);
        let order = sources
            .into_iter()
            .map(|(p, _)| p.display().to_string())
            .collect();
        (order, diags.all())
    }

    #[test]
    fn test_dependencies_come_first() {
        let (order, diags) = gather(
            &[
                ("main.ct", "#include \"a.ct\"\n#include \"b.ct\"\n"),
                ("a.ct", "#include \"c.ct\"\n"),
                ("b.ct", ""),
                ("c.ct", ""),
            ],
            "main.ct",
        );
        assert!(diags.is_empty());
        assert_eq!(order, vec!["c.ct", "a.ct", "b.ct", "main.ct"]);
    }

    #[test]
    fn test_shared_dependency_gathered_once() {
        let (order, diags) = gather(
            &[
                ("main.ct", "#include \"a.ct\"\n#include \"b.ct\"\n"),
                ("a.ct", "#include \"shared.ct\"\n"),
                ("b.ct", "#include \"shared.ct\"\n"),
                ("shared.ct", ""),
            ],
            "main.ct",
        );
        assert!(diags.is_empty());
        assert_eq!(order, vec!["shared.ct", "a.ct", "b.ct", "main.ct"]);
    }

    #[test]
    fn test_cycles_terminate() {
        let (order, diags) = gather(
            &[
                ("a.ct", "#include \"b.ct\"\n"),
                ("b.ct", "#include \"a.ct\"\n"),
            ],
            "a.ct",
        );
        assert!(diags.is_empty());
        assert_eq!(order, vec!["b.ct", "a.ct"]);
    }

    #[test]
    fn test_missing_include_reported_at_directive() {
        let (order, diags) = gather(
            &[("main.ct", "int x;\n#include \"gone.ct\"\n")],
            "main.ct",
        );
        assert_eq!(order, vec!["main.ct"]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].path, "main.ct");
        assert_eq!(diags[0].line, 2);
        assert!(diags[0].message.contains("gone.ct"));
    }

    #[test]
    fn test_missing_entry_reported() {
        let (order, diags) = gather(&[], "main.ct");
        assert!(order.is_empty());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 0);
    }

    #[test]
    fn test_relative_includes_resolve_against_including_file() {
        let (order, diags) = gather(
            &[
                ("src/main.ct", "#include \"lib/util.ct\"\n"),
                ("src/lib/util.ct", ""),
            ],
            "src/main.ct",
        );
        assert!(diags.is_empty());
        assert_eq!(order, vec!["src/lib/util.ct", "src/main.ct"]);
    }
}
