//! Snippet catalog model.
//!
//! In-memory representation of catalogued snippets and their declared
//! behavioral contracts. Snippets are immutable once loaded and are
//! validated eagerly: a catalog that parses but carries a contradictory
//! expectation shape is rejected before anything executes.
//!
//! An Expectation is a tagged union, not a bag of optional fields. Each
//! variant carries exactly the fields meaningful to it, so an invalid
//! combination (exact-stdout expectation on a must-not-compile snippet)
//! is unrepresentable.

use crate::config::LanguageStandard;
use crate::types::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One (stdout, exit code) pair accepted by an
/// implementation-defined expectation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowedOutcome {
    pub stdout: String,
    pub exit_code: i32,
}

/// The behavioral contract a snippet claims to satisfy.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Compilation must succeed; runtime behavior is not judged.
    MustCompile,

    /// Compilation must fail. When `diagnostic_contains` is set, the
    /// compiler's diagnostics must mention it, otherwise the failure is
    /// judged to be for the wrong reason.
    MustNotCompile {
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostic_contains: Option<String>,
    },

    /// Behavior fully determined by the standard: exactly this stdout
    /// and exit code, under every conforming configuration.
    DefinedOutcome {
        expected_stdout: String,
        expected_exit_code: i32,
    },

    /// Any member of the declared set is acceptable; anything else is
    /// a divergence from the claim.
    ImplementationDefinedOutcome { allowed_outcomes: Vec<AllowedOutcome> },

    /// No fixed expected output. Only policy-violating outcomes are
    /// flagged: a signal from the forbidden set, or (when declared) an
    /// infinite hang. Everything else is tolerated, by construction.
    UndefinedOutcomeTolerant {
        forbidden_signals: Vec<i32>,
        must_not_hang: bool,
    },
}

// An internally tagged derive ignores fields the variant does not
// declare, which would let a contradictory shape (runtime-outcome
// fields on a compile-only expectation) load silently. Deserialization
// walks the object first and rejects stray keys, then defers to the
// derived shape.
impl<'de> Deserialize<'de> for Expectation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        const KINDS: &[&str] = &[
            "must_compile",
            "must_not_compile",
            "defined_outcome",
            "implementation_defined_outcome",
            "undefined_outcome_tolerant",
        ];

        let value = serde_json::Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| D::Error::custom("expectation must be a JSON object"))?;
        let kind = object
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| D::Error::missing_field("kind"))?;

        let declared: &[&str] = match kind {
            "must_compile" => &[],
            "must_not_compile" => &["diagnostic_contains"],
            "defined_outcome" => &["expected_stdout", "expected_exit_code"],
            "implementation_defined_outcome" => &["allowed_outcomes"],
            "undefined_outcome_tolerant" => &["forbidden_signals", "must_not_hang"],
            other => return Err(D::Error::unknown_variant(other, KINDS)),
        };
        if let Some(stray) = object
            .keys()
            .find(|key| *key != "kind" && !declared.contains(&key.as_str()))
        {
            return Err(D::Error::custom(format!(
                "expectation kind \"{kind}\" does not accept field \"{stray}\""
            )));
        }

        serde_json::from_value::<ExpectationShape>(value)
            .map(Expectation::from)
            .map_err(D::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ExpectationShape {
    MustCompile,
    MustNotCompile {
        #[serde(default)]
        diagnostic_contains: Option<String>,
    },
    DefinedOutcome {
        expected_stdout: String,
        expected_exit_code: i32,
    },
    ImplementationDefinedOutcome {
        allowed_outcomes: Vec<AllowedOutcome>,
    },
    UndefinedOutcomeTolerant {
        #[serde(default)]
        forbidden_signals: Vec<i32>,
        must_not_hang: bool,
    },
}

impl From<ExpectationShape> for Expectation {
    fn from(shape: ExpectationShape) -> Self {
        match shape {
            ExpectationShape::MustCompile => Expectation::MustCompile,
            ExpectationShape::MustNotCompile {
                diagnostic_contains,
            } => Expectation::MustNotCompile {
                diagnostic_contains,
            },
            ExpectationShape::DefinedOutcome {
                expected_stdout,
                expected_exit_code,
            } => Expectation::DefinedOutcome {
                expected_stdout,
                expected_exit_code,
            },
            ExpectationShape::ImplementationDefinedOutcome { allowed_outcomes } => {
                Expectation::ImplementationDefinedOutcome { allowed_outcomes }
            }
            ExpectationShape::UndefinedOutcomeTolerant {
                forbidden_signals,
                must_not_hang,
            } => Expectation::UndefinedOutcomeTolerant {
                forbidden_signals,
                must_not_hang,
            },
        }
    }
}

impl Expectation {
    /// Compile-only expectations never execute the artifact.
    pub fn needs_execution(&self) -> bool {
        !matches!(
            self,
            Expectation::MustCompile | Expectation::MustNotCompile { .. }
        )
    }

    fn validate(&self, id: &str) -> std::result::Result<(), CatalogError> {
        match self {
            Expectation::MustNotCompile {
                diagnostic_contains: Some(needle),
            } if needle.is_empty() => Err(CatalogError::Invalid {
                id: id.to_string(),
                reason: "diagnostic_contains must not be empty when present".to_string(),
            }),
            Expectation::ImplementationDefinedOutcome { allowed_outcomes }
                if allowed_outcomes.is_empty() =>
            {
                Err(CatalogError::Invalid {
                    id: id.to_string(),
                    reason: "implementation-defined expectation declares no allowed outcomes"
                        .to_string(),
                })
            }
            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals, ..
            } if forbidden_signals.iter().any(|s| *s <= 0 || *s > 64) => {
                Err(CatalogError::Invalid {
                    id: id.to_string(),
                    reason: "forbidden_signals entries must be valid signal numbers".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// One catalogued code example under test. Created once at catalog load,
/// never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snippet {
    /// Stable identifier used in reports.
    pub id: String,
    /// Source text, materialized verbatim into the cell workspace.
    pub source: String,
    /// Minimum language standard the snippet requires.
    pub standard: LanguageStandard,
    /// Free-form tags ("signed-overflow", "iterator-invalidation", ...).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared behavioral contract. Never inferred from observed
    /// results; that would let expectations drift toward whatever the
    /// toolchains happen to do.
    pub expectation: Expectation,
}

impl Snippet {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Deserialize)]
struct CatalogDocument {
    snippets: Vec<Snippet>,
}

/// The loaded, validated snippet catalog.
#[derive(Clone, Debug)]
pub struct Catalog {
    snippets: Vec<Snippet>,
}

impl Catalog {
    /// Parse and eagerly validate a catalog document.
    ///
    /// Fails with `CatalogError` when metadata is malformed, an
    /// expectation variant is unrecognized, or a snippet carries a
    /// contradictory expectation shape. No side effects beyond
    /// validation.
    pub fn load_str(input: &str) -> std::result::Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(input)?;

        let mut seen = HashSet::new();
        for snippet in &document.snippets {
            if snippet.id.is_empty() {
                return Err(CatalogError::Invalid {
                    id: "<unnamed>".to_string(),
                    reason: "snippet identifier must not be empty".to_string(),
                });
            }
            if !seen.insert(snippet.id.clone()) {
                return Err(CatalogError::DuplicateId(snippet.id.clone()));
            }
            if snippet.source.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    id: snippet.id.clone(),
                    reason: "snippet source must not be empty".to_string(),
                });
            }
            snippet.expectation.validate(&snippet.id)?;
        }

        log::info!("catalog loaded: {} snippets", document.snippets.len());
        Ok(Self {
            snippets: document.snippets,
        })
    }

    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Subset of the catalog matching any of the given tags or
    /// identifiers. Empty filters match nothing on their axis.
    pub fn filter(&self, tags: &[String], ids: &[String]) -> Vec<Snippet> {
        self.snippets
            .iter()
            .filter(|s| {
                ids.iter().any(|id| *id == s.id) || tags.iter().any(|tag| s.has_tag(tag))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(snippets_json: &str) -> String {
        format!(r#"{{"snippets": [{snippets_json}]}}"#)
    }

    // Double-hash delimiters: the embedded source contains `"#include`,
    // which would close a plain r#"..."# literal.
    const WRAPAROUND: &str = r##"{
        "id": "unsigned_wraparound",
        "source": "#include <stdio.h>\n#include <limits.h>\nint main(void){printf(\"%u\", UINT_MAX + 1u);return 0;}",
        "standard": "c11",
        "tags": ["unsigned-wraparound"],
        "expectation": {"kind": "defined_outcome", "expected_stdout": "0", "expected_exit_code": 0}
    }"##;

    #[test]
    fn loads_defined_outcome_snippet() {
        let catalog = Catalog::load_str(&doc(WRAPAROUND)).unwrap();
        assert_eq!(catalog.len(), 1);
        let snippet = &catalog.snippets()[0];
        assert_eq!(snippet.id, "unsigned_wraparound");
        assert!(snippet.has_tag("unsigned-wraparound"));
        assert!(snippet.expectation.needs_execution());
    }

    #[test]
    fn compile_only_expectations_skip_execution() {
        let input = doc(
            r#"{
            "id": "rvalue_bind",
            "source": "void f(int&);\nint main(){f(1);}",
            "standard": "c++17",
            "expectation": {"kind": "must_not_compile", "diagnostic_contains": "cannot bind"}
        }"#,
        );
        let catalog = Catalog::load_str(&input).unwrap();
        assert!(!catalog.snippets()[0].expectation.needs_execution());
    }

    #[test]
    fn unrecognized_expectation_variant_is_rejected() {
        let input = doc(
            r#"{
            "id": "x",
            "source": "int main(){}",
            "standard": "c11",
            "expectation": {"kind": "probably_fine"}
        }"#,
        );
        match Catalog::load_str(&input) {
            Err(CatalogError::Parse(_)) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn must_not_compile_cannot_carry_runtime_fields() {
        // The tagged union rejects runtime-outcome fields on
        // compile-only variants at parse time.
        let input = doc(
            r#"{
            "id": "x",
            "source": "int main(){}",
            "standard": "c11",
            "expectation": {"kind": "must_not_compile", "expected_stdout": "0"}
        }"#,
        );
        assert!(matches!(
            Catalog::load_str(&input),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn defined_outcome_rejects_stray_tolerance_fields() {
        let input = doc(
            r#"{
            "id": "x",
            "source": "int main(){}",
            "standard": "c11",
            "expectation": {"kind": "defined_outcome", "expected_stdout": "0",
                            "expected_exit_code": 0, "must_not_hang": true}
        }"#,
        );
        assert!(matches!(
            Catalog::load_str(&input),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn empty_allowed_outcome_set_is_invalid() {
        let input = doc(
            r#"{
            "id": "impl_def",
            "source": "int main(){}",
            "standard": "c11",
            "expectation": {"kind": "implementation_defined_outcome", "allowed_outcomes": []}
        }"#,
        );
        match Catalog::load_str(&input) {
            Err(CatalogError::Invalid { id, .. }) => assert_eq!(id, "impl_def"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let input = format!(r#"{{"snippets": [{WRAPAROUND}, {WRAPAROUND}]}}"#);
        assert!(matches!(
            Catalog::load_str(&input),
            Err(CatalogError::DuplicateId(id)) if id == "unsigned_wraparound"
        ));
    }

    #[test]
    fn bogus_forbidden_signal_is_invalid() {
        let input = doc(
            r#"{
            "id": "ub",
            "source": "int main(){}",
            "standard": "c11",
            "expectation": {"kind": "undefined_outcome_tolerant", "forbidden_signals": [-4], "must_not_hang": true}
        }"#,
        );
        assert!(matches!(
            Catalog::load_str(&input),
            Err(CatalogError::Invalid { .. })
        ));
    }

    #[test]
    fn filter_matches_tags_and_ids() {
        let second = r#"{
            "id": "signed_overflow",
            "source": "int main(){int x = 2147483647; return (x + 1) != 0;}",
            "standard": "c11",
            "tags": ["signed-overflow"],
            "expectation": {"kind": "undefined_outcome_tolerant", "forbidden_signals": [], "must_not_hang": true}
        }"#;
        let input = format!(r#"{{"snippets": [{WRAPAROUND}, {second}]}}"#);
        let catalog = Catalog::load_str(&input).unwrap();

        let by_tag = catalog.filter(&["signed-overflow".to_string()], &[]);
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, "signed_overflow");

        let by_id = catalog.filter(&[], &["unsigned_wraparound".to_string()]);
        assert_eq!(by_id.len(), 1);

        assert!(catalog.filter(&[], &[]).is_empty());
    }
}
