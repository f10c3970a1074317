//! Text formatting helpers for generated code and reports.

use std::fmt;

/// Indent every non-empty line of a block of text.
pub fn indent(s: &str, prefix: &str) -> String {
    s.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A simple code formatter for generated code.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a new formatter with the given indent string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Create a formatter with default settings (2 spaces).
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    /// Increase indentation level.
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decrease indentation level.
    pub fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    /// Write text.
    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
            } else {
                if self.at_line_start {
                    for _ in 0..self.indent_level {
                        self.output.push_str(&self.indent_str);
                    }
                    self.at_line_start = false;
                }
                self.output.push(c);
            }
        }
    }

    /// Write a line.
    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Write a preprocessor line at column zero.
    pub fn directive(&mut self, s: &str) {
        if !self.at_line_start {
            self.output.push('\n');
        }
        self.output.push_str(s);
        self.output.push('\n');
        self.at_line_start = true;
    }

    /// Write an empty line.
    pub fn newline(&mut self) {
        self.write("\n");
    }

    /// Write a block with braces.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        f(self);
        self.dedent();
        self.writeln("}");
    }

    /// Get the formatted output.
    pub fn finish(self) -> String {
        self.output
    }
}

impl fmt::Write for CodeFormatter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block() {
        let mut fmt = CodeFormatter::new("  ");
        fmt.block("for (i=0; i<=N-1; i++)", |f| {
            f.writeln("y[i] = y[i]+a1*x1[i];");
        });

        let output = fmt.finish();
        assert!(output.contains("for (i=0; i<=N-1; i++) {"));
        assert!(output.contains("  y[i] = y[i]+a1*x1[i];"));
    }

    #[test]
    fn test_directive_ignores_indent() {
        let mut fmt = CodeFormatter::new("  ");
        fmt.block("for (i=0; i<=9; i++)", |f| {
            f.directive("#pragma ivdep");
            f.writeln("x[i] = 0;");
        });
        let output = fmt.finish();
        assert!(output.contains("\n#pragma ivdep\n"));
        assert!(output.contains("  x[i] = 0;"));
    }

    #[test]
    fn test_indent_helper() {
        let indented = indent("a;\n\nb;", "    ");
        assert_eq!(indented, "    a;\n\n    b;");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1, 2, 3], ","), "1,2,3");
    }
}
