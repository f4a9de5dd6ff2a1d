//! Source path derivation and command template substitution

use std::path::{Path, PathBuf};

/// Paths derived once from the source file a runner works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    /// File name with extension (`prog.py`)
    pub file: String,
    /// Full path as given (`/tmp/a/prog.py`)
    pub source_file: String,
    /// Containing directory (`/tmp/a`), empty for a bare file name
    pub source_file_dir: String,
    /// File name without extension (`prog`)
    pub file_name: String,
    /// Text after the last dot, exact case, without the dot (`py`)
    pub extension: String,
}

impl SourcePaths {
    pub fn new(source: impl AsRef<Path>) -> Self {
        let path = source.as_ref();
        let lossy = |p: Option<&std::ffi::OsStr>| {
            p.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        };

        Self {
            file: lossy(path.file_name()),
            source_file: path.to_string_lossy().into_owned(),
            source_file_dir: path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_name: lossy(path.file_stem()),
            extension: lossy(path.extension()),
        }
    }

    /// Directory the child process runs in, `None` to inherit the caller's
    pub fn working_dir(&self) -> Option<PathBuf> {
        if self.source_file_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.source_file_dir))
        }
    }

    /// Substitute `{file}`, `{source_file}`, `{source_file_dir}`, `{file_name}`
    /// and `{args}` in a command template.
    ///
    /// `{{` and `}}` produce literal braces. Unknown placeholders are kept as
    /// written so shell syntax like `${HOME}` survives.
    pub fn substitute(&self, template: &str, args: &str) -> String {
        let mut out = String::with_capacity(template.len() + args.len());
        let mut rest = template;

        while let Some(idx) = rest.find(|c: char| c == '{' || c == '}') {
            out.push_str(&rest[..idx]);
            let tail = &rest[idx..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
                continue;
            }
            if tail.starts_with('{') {
                if let Some(close) = tail.find('}') {
                    if let Some(value) = self.placeholder(&tail[1..close], args) {
                        out.push_str(value);
                        rest = &tail[close + 1..];
                        continue;
                    }
                }
            }

            out.push_str(&tail[..1]);
            rest = &tail[1..];
        }

        out.push_str(rest);
        out
    }

    fn placeholder<'a>(&'a self, key: &str, args: &'a str) -> Option<&'a str> {
        match key {
            "file" => Some(self.file.as_str()),
            "source_file" => Some(self.source_file.as_str()),
            "source_file_dir" => Some(self.source_file_dir.as_str()),
            "file_name" => Some(self.file_name.as_str()),
            "args" => Some(args),
            _ => None,
        }
    }
}

/// Join argument tokens into the editor's argument string.
///
/// Flags (`-x`) get a leading space and no quotes, relative fragments (`.x`)
/// are appended with no separator, everything else is wrapped as ` "x" `.
/// This is a convenience format, not shell escaping.
pub fn format_arg_list<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::new();
    for token in tokens {
        let token = token.as_ref();
        if token.starts_with('-') {
            out.push(' ');
            out.push_str(token);
        } else if token.starts_with('.') {
            out.push_str(token);
        } else {
            out.push_str(" \"");
            out.push_str(token);
            out.push_str("\" ");
        }
    }
    out
}
