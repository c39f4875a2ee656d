//! Required-path existence checks
//!
//! Every input a job references is checked before the pipeline is built.

use crate::config::RequiredPath;
use std::fmt;
use std::path::{Path, PathBuf};

/// Existence result for one labelled path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCheck {
    pub label: String,
    pub path: PathBuf,
    pub exists: bool,
}

impl PathCheck {
    /// Status marker shown in front of the label
    pub fn marker(&self) -> &'static str {
        if self.exists { "✓" } else { "✗ MISSING" }
    }
}

impl fmt::Display for PathCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.marker(),
            self.label,
            self.path.display()
        )
    }
}

/// Ordered label → existence report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathReport {
    checks: Vec<PathCheck>,
}

impl PathReport {
    /// Stat every path in order
    pub fn check<'a>(paths: impl IntoIterator<Item = &'a RequiredPath>) -> Self {
        Self::check_with(paths, |p| p.exists())
    }

    /// Same as [`PathReport::check`] with a custom existence probe
    pub fn check_with<'a>(
        paths: impl IntoIterator<Item = &'a RequiredPath>,
        exists: impl Fn(&Path) -> bool,
    ) -> Self {
        let checks = paths
            .into_iter()
            .map(|required| PathCheck {
                label: required.label.clone(),
                path: required.path.clone(),
                exists: exists(&required.path),
            })
            .collect();
        Self { checks }
    }

    pub fn checks(&self) -> &[PathCheck] {
        &self.checks
    }

    pub fn all_present(&self) -> bool {
        self.checks.iter().all(|c| c.exists)
    }

    /// Checks whose path was not found
    pub fn missing(&self) -> Vec<&PathCheck> {
        self.checks.iter().filter(|c| !c.exists).collect()
    }

    /// Human-readable report, one indented line per path plus a summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            out.push_str("  ");
            out.push_str(&check.to_string());
            out.push('\n');
        }
        if self.all_present() {
            out.push_str("✓ All paths validated!");
        } else {
            out.push_str("\n✗ Some paths are missing! Fix them before running.");
        }
        out
    }
}
