//! Region scanner for annotated source files.
//!
//! Annotations are C comments of the form `/*@ begin Name ( body ) @*/`
//! and `/*@ end @*/`. The scanner pairs them into a tree of regions and
//! records byte ranges; it does not look inside annotation bodies.

use crate::utils::errors::AnnotationError;
use crate::utils::location::{SourceMap, Span};
use std::ops::Range;

const OPEN: &str = "/*@";
const CLOSE: &str = "@*/";

/// A `begin`/`end` pair and everything between.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Block name (`PerfTuning`, `Loop`, ...)
    pub name: String,
    /// Text inside the parentheses of the `begin` marker
    pub body: Range<usize>,
    /// The whole `begin` marker comment
    pub begin: Range<usize>,
    /// The whole `end` marker comment
    pub end: Range<usize>,
    /// Regions nested between the markers
    pub children: Vec<Region>,
    /// Location of the `begin` marker
    pub span: Span,
}

impl Region {
    /// Text between the `begin` and `end` markers.
    pub fn content(&self) -> Range<usize> {
        self.begin.end..self.end.start
    }
}

enum Marker {
    Begin { name: String, body: Range<usize> },
    End,
}

/// Find every annotation region in `source`.
pub fn scan(map: &SourceMap) -> Result<Vec<Region>, AnnotationError> {
    let source = map.source();
    let mut stack: Vec<Region> = Vec::new();
    let mut top: Vec<Region> = Vec::new();
    let mut pos = 0;

    while let Some(found) = source[pos..].find(OPEN) {
        let start = pos + found;
        let inner_start = start + OPEN.len();
        let inner_end = match source[inner_start..].find(CLOSE) {
            Some(i) => inner_start + i,
            None => {
                return Err(AnnotationError::malformed(
                    "unterminated annotation comment",
                    map.span(start, inner_start),
                ))
            }
        };
        let end = inner_end + CLOSE.len();
        let span = map.span(start, end);

        match parse_marker(source, inner_start..inner_end, span)? {
            Marker::Begin { name, body } => stack.push(Region {
                name,
                body,
                begin: start..end,
                end: end..end,
                children: Vec::new(),
                span,
            }),
            Marker::End => {
                let mut region = stack
                    .pop()
                    .ok_or_else(|| AnnotationError::malformed("'end' without matching 'begin'", span))?;
                region.end = start..end;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(region),
                    None => top.push(region),
                }
            }
        }
        pos = end;
    }

    if let Some(open) = stack.pop() {
        return Err(AnnotationError::malformed(
            format!("block '{}' is never closed with /*@ end @*/", open.name),
            open.span,
        ));
    }
    Ok(top)
}

fn parse_marker(source: &str, inner: Range<usize>, span: Span) -> Result<Marker, AnnotationError> {
    let text = &source[inner.clone()];
    let trimmed = text.trim_start();
    let lead = text.len() - trimmed.len();

    if let Some(rest) = trimmed.strip_prefix("end") {
        if rest.trim().is_empty() {
            return Ok(Marker::End);
        }
        return Err(AnnotationError::malformed(
            format!("unexpected text after 'end': '{}'", rest.trim()),
            span,
        ));
    }

    let rest = trimmed.strip_prefix("begin").ok_or_else(|| {
        AnnotationError::malformed("annotation must start with 'begin' or 'end'", span)
    })?;
    if !rest.starts_with(char::is_whitespace) {
        return Err(AnnotationError::malformed("expected a block name after 'begin'", span));
    }
    let after_begin = rest.trim_start();
    let name_len = after_begin
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(after_begin.len());
    if name_len == 0 {
        return Err(AnnotationError::malformed("expected a block name after 'begin'", span));
    }
    let name = after_begin[..name_len].to_string();

    let after_name = &after_begin[name_len..];
    let args = after_name.trim();
    if !(args.starts_with('(') && args.ends_with(')')) {
        return Err(AnnotationError::malformed(
            format!("block '{}' needs a parenthesized body", name),
            span,
        ));
    }
    // Absolute offsets of the text inside the outer parentheses.
    let name_start = inner.start + lead + (trimmed.len() - after_begin.len());
    let args_start = name_start + name_len + (after_name.len() - after_name.trim_start().len());
    let body = args_start + 1..args_start + args.len() - 1;
    Ok(Marker::Begin { name, body })
}

/// Byte ranges of `source` outside every marker and every region's body.
///
/// Text between the markers of a `Loop` region is a placeholder for
/// generated code and is excluded as well.
pub fn host_segments(source_len: usize, regions: &[Region]) -> Vec<Range<usize>> {
    let mut cuts: Vec<Range<usize>> = Vec::new();
    fn collect(regions: &[Region], cuts: &mut Vec<Range<usize>>) {
        for r in regions {
            if r.name == "Loop" {
                cuts.push(r.begin.start..r.end.end);
            } else {
                cuts.push(r.begin.clone());
                cuts.push(r.end.clone());
                collect(&r.children, cuts);
            }
        }
    }
    collect(regions, &mut cuts);
    cuts.sort_by_key(|r| r.start);

    let mut out = Vec::new();
    let mut pos = 0;
    for cut in cuts {
        if cut.start > pos {
            out.push(pos..cut.start);
        }
        pos = pos.max(cut.end);
    }
    if pos < source_len {
        out.push(pos..source_len);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::AnnotationErrorKind;

    const FILE: &str = "void f() {\n/*@ begin PerfTuning ( def search { arg total_runs = 4; } ) @*/\nint n = N;\n/*@ begin Loop ( for (i=0; i<=n-1; i++) a[i] = 0; ) @*/\n/*@ end @*/\n/*@ end @*/\n}\n";

    #[test]
    fn test_nested_regions() {
        let map = SourceMap::new(FILE);
        let regions = scan(&map).unwrap();
        assert_eq!(regions.len(), 1);
        let tuning = &regions[0];
        assert_eq!(tuning.name, "PerfTuning");
        assert_eq!(FILE[tuning.body.clone()].trim(), "def search { arg total_runs = 4; }");
        assert_eq!(tuning.children.len(), 1);
        let lp = &tuning.children[0];
        assert_eq!(lp.name, "Loop");
        assert_eq!(FILE[lp.body.clone()].trim(), "for (i=0; i<=n-1; i++) a[i] = 0;");
        assert_eq!(FILE[lp.content()].trim(), "");
        assert_eq!(lp.span.start_line, 4);
    }

    #[test]
    fn test_host_segments() {
        let map = SourceMap::new(FILE);
        let regions = scan(&map).unwrap();
        let text: String = host_segments(FILE.len(), &regions)
            .into_iter()
            .map(|r| FILE[r].to_string())
            .collect();
        assert!(text.contains("int n = N;"));
        assert!(!text.contains("a[i]"));
        assert!(!text.contains("def search"));
    }

    #[test]
    fn test_unterminated_block() {
        let src = "/*@ begin Loop ( x = 1; ) @*/\n";
        let err = scan(&SourceMap::new(src)).unwrap_err();
        assert_eq!(err.kind, AnnotationErrorKind::MalformedAnnotation);
        assert_eq!(err.span.start_line, 1);
    }

    #[test]
    fn test_end_without_begin() {
        let err = scan(&SourceMap::new("int x;\n/*@ end @*/")).unwrap_err();
        assert_eq!(err.kind, AnnotationErrorKind::MalformedAnnotation);
        assert_eq!(err.span.start_line, 2);
    }

    #[test]
    fn test_unterminated_comment() {
        assert!(scan(&SourceMap::new("/*@ begin Loop ( ")).is_err());
    }
}
