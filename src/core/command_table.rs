//! Command table - per-extension compile/run templates supplied by the host
//!
//! Rules are scanned in order and the first rule listing the file's
//! extension wins. A matching rule without a template means "nothing to do",
//! which is different from no rule matching at all.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which template of a rule to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Compile,
    Run,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Compile => write!(f, "compile"),
            CommandKind::Run => write!(f, "run"),
        }
    }
}

/// One entry of the command table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRule {
    /// Extensions without the dot, matched case-sensitively
    pub extensions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_cmd: Option<String>,
}

impl CommandRule {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            compile_cmd: None,
            run_cmd: None,
        }
    }

    pub fn compile(mut self, template: impl Into<String>) -> Self {
        self.compile_cmd = Some(template.into());
        self
    }

    pub fn run(mut self, template: impl Into<String>) -> Self {
        self.run_cmd = Some(template.into());
        self
    }

    pub fn matches(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }

    pub fn template(&self, kind: CommandKind) -> Option<&str> {
        match kind {
            CommandKind::Compile => self.compile_cmd.as_deref(),
            CommandKind::Run => self.run_cmd.as_deref(),
        }
    }
}

/// Outcome of looking up a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// No rule lists the extension
    Unresolved,
    /// The first matching rule has no template for this kind
    NoOp,
    Template(&'a str),
}

/// Ordered, read-only list of command rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    #[serde(default, rename = "rule")]
    rules: Vec<CommandRule>,
}

impl CommandTable {
    pub fn new(rules: Vec<CommandRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CommandRule] {
        &self.rules
    }

    /// First-match lookup by extension
    pub fn lookup(&self, extension: &str, kind: CommandKind) -> Lookup<'_> {
        match self.rules.iter().find(|rule| rule.matches(extension)) {
            None => Lookup::Unresolved,
            Some(rule) => match rule.template(kind) {
                None => Lookup::NoOp,
                Some(template) => Lookup::Template(template),
            },
        }
    }

    /// Parse a TOML table of `[[rule]]` entries
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Parse the editor's JSON array of rules
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let rules: Vec<CommandRule> = serde_json::from_str(s)?;
        Ok(Self::new(rules))
    }

    /// Load a table from disk, choosing the parser by file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let read = || {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        };

        let table = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&read()?)?,
            Some("json") => Self::from_json_str(&read()?)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };

        tracing::debug!(path = %path.display(), rules = table.rules.len(), "Loaded command table");
        Ok(table)
    }

    /// `<config dir>/coderunner/commands.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("coderunner").join("commands.toml"))
    }

    /// Table used when the host supplies none
    pub fn builtin() -> Self {
        Self::new(vec![
            CommandRule::new(["c"])
                .compile("gcc \"{file}\" -o \"{file_name}\"")
                .run("\"./{file_name}\" {args}"),
            CommandRule::new(["cpp", "cc", "cxx"])
                .compile("g++ -std=c++17 -O2 \"{file}\" -o \"{file_name}\"")
                .run("\"./{file_name}\" {args}"),
            CommandRule::new(["rs"])
                .compile("rustc -O \"{file}\" -o \"{file_name}\"")
                .run("\"./{file_name}\" {args}"),
            CommandRule::new(["py"]).run("python3 -u \"{file}\" {args}"),
            CommandRule::new(["go"]).run("go run \"{file}\" {args}"),
            CommandRule::new(["js"]).run("node \"{file}\" {args}"),
            CommandRule::new(["sh"]).run("sh \"{file}\" {args}"),
        ])
    }
}
