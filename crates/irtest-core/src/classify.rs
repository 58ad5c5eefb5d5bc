//! Console output classifiers.
//!
//! A classifier matches a line of captured server output (optionally
//! requiring a pattern on the very next line) and raises a flag on the run
//! result. Classifiers are evaluated in order and each fires at most once per
//! result. The built-in set can be extended from configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::{LEGACY_JAVA_FIXER, TestResult};

/// A classifier pattern failed to compile.
#[derive(Debug, Error)]
#[error("invalid pattern for classifier {name}: {source}")]
pub struct PatternError {
    /// Classifier name.
    pub name: String,
    /// Regex error.
    #[source]
    pub source: regex::Error,
}

/// Declarative form of a classifier, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    /// Name, used in log lines.
    pub name: String,
    /// Regex matched against each line.
    pub pattern: String,
    /// Regex the following line must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_by: Option<String>,
    /// Flag raised on a match.
    pub flag: String,
    /// Failure message recorded on a match; `None` only raises the flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

impl ClassifierSpec {
    /// Compiles the patterns.
    pub fn compile(&self) -> Result<Classifier, PatternError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| PatternError {
                name: self.name.clone(),
                source,
            })
        };
        Ok(Classifier {
            name: self.name.clone(),
            pattern: compile(&self.pattern)?,
            followed_by: self.followed_by.as_deref().map(compile).transpose()?,
            flag: self.flag.clone(),
            fail: self.fail.clone(),
        })
    }
}

/// A compiled classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    name: String,
    pattern: Regex,
    followed_by: Option<Regex>,
    flag: String,
    fail: Option<String>,
}

impl Classifier {
    /// Classifier name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flag raised on a match.
    #[must_use]
    pub fn flag(&self) -> &str {
        &self.flag
    }

    /// Index of the first matching line.
    #[must_use]
    pub fn find(&self, lines: &[String]) -> Option<usize> {
        lines.iter().enumerate().position(|(i, line)| {
            self.pattern.is_match(line)
                && self.followed_by.as_ref().is_none_or(|next| {
                    lines.get(i + 1).is_some_and(|following| next.is_match(following))
                })
        })
    }

    fn apply(&self, result: &mut TestResult) {
        if self.flag == LEGACY_JAVA_FIXER {
            result.needs_legacy_java_fixer();
        } else {
            result.add_global(self.flag.clone());
        }
        if let Some(message) = &self.fail {
            result.fail(message.clone());
        }
    }
}

/// An ordered list of classifiers.
#[derive(Debug, Clone, Default)]
pub struct ClassifierSet {
    classifiers: Vec<Classifier>,
}

impl ClassifierSet {
    /// Definitions of the classifiers every run starts with.
    #[must_use]
    pub fn builtin_specs() -> Vec<ClassifierSpec> {
        vec![ClassifierSpec {
            name: "legacy-java-fixer".to_string(),
            pattern: r"java\.util\.ConcurrentModificationException".to_string(),
            followed_by: Some(
                r"at java\.util\.ArrayList\$Itr\.checkForComodification\(ArrayList".to_string(),
            ),
            flag: LEGACY_JAVA_FIXER.to_string(),
            fail: None,
        }]
    }

    /// The built-in classifiers followed by `extra`.
    pub fn with_extra(extra: &[ClassifierSpec]) -> Result<Self, PatternError> {
        let classifiers = Self::builtin_specs()
            .iter()
            .chain(extra)
            .map(ClassifierSpec::compile)
            .collect::<Result<_, _>>()?;
        Ok(Self { classifiers })
    }

    /// Number of classifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    /// Runs every classifier over `result`'s captured log, returning the names
    /// of those that matched.
    pub fn classify(&self, result: &mut TestResult) -> Vec<String> {
        let mut matched = Vec::new();
        for classifier in &self.classifiers {
            if let Some(line) = classifier.find(result.log()) {
                tracing::debug!(classifier = %classifier.name, line, "classifier matched");
                matched.push(classifier.name.clone());
                classifier.apply(result);
            }
        }
        matched
    }
}
