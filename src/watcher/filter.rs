use glob::{MatchOptions, Pattern};

use crate::error::ConfigError;

/// Gate deciding whether a changed filename can trigger a restart.
///
/// Built once per configuration from `*.<ext>` globs; a filename matches if
/// any glob does.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    patterns: Vec<Pattern>,
}

impl ChangeFilter {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Result<Self, ConfigError> {
        let patterns = extensions
            .iter()
            .map(|ext| {
                let ext = ext.as_ref();
                Pattern::new(&format!("*.{ext}")).map_err(|err| ConfigError::InvalidExtension {
                    extension: ext.to_string(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// `false` when the native watcher did not report a filename. Dotfiles
    /// such as `.eslintrc.json` or editor lock files never match.
    pub fn matches(&self, filename: Option<&str>) -> bool {
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..MatchOptions::new()
        };
        match filename {
            Some(name) => self.patterns.iter().any(|p| p.matches_with(name, options)),
            None => false,
        }
    }
}
