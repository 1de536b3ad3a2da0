//! Lexical triple extraction.
//!
//! A fixed, ordered list of templates mined with regular expressions. Precision
//! is low; extracted triples are stored with a reduced confidence.

use regex::Regex;

use crate::memory::core::errors::MemoryResult;

/// Up to two words captured as an entity.
const ENTITY: &str = r"(\w+(?:\s+\w+)?)";

/// A candidate fact found in text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedTriple {
    /// Subject entity.
    pub subject: String,
    /// Relation name.
    pub predicate: String,
    /// Object entity.
    pub object: String,
}

enum Shape {
    /// Groups 1 and 2 are subject and object.
    Binary,
    /// Group 1 is the object; the subject is fixed.
    FixedSubject(&'static str),
}

struct Template {
    regex: Regex,
    predicate: &'static str,
    shape: Shape,
}

/// Applies the extraction templates in order.
pub struct TripleExtractor {
    templates: Vec<Template>,
}

impl TripleExtractor {
    /// Compile the built-in templates.
    ///
    /// # Errors
    /// Returns an error if a template fails to compile.
    pub fn new() -> MemoryResult<Self> {
        let binary = |connector: &str| format!(r"(?i){ENTITY}\s+{connector}\s+{ENTITY}");
        let specs: Vec<(String, &'static str, Shape)> = vec![
            (binary(r"is\s+an?"), "is_a", Shape::Binary),
            (binary(r"est\s+une?"), "is_a", Shape::Binary),
            (binary("uses"), "uses", Shape::Binary),
            (binary("utilise"), "uses", Shape::Binary),
            (binary(r"depends\s+on"), "depends_on", Shape::Binary),
            (binary(r"dépend\s+de"), "depends_on", Shape::Binary),
            (
                format!(r"(?i)\buser\s+prefers\s+{ENTITY}"),
                "prefers",
                Shape::FixedSubject("user"),
            ),
            (
                format!(r"(?i)\bl'?utilisateur\s+préfère\s+{ENTITY}"),
                "prefers",
                Shape::FixedSubject("user"),
            ),
            (binary("has"), "has", Shape::Binary),
            (binary("can"), "can", Shape::Binary),
            (binary("peut"), "can", Shape::Binary),
        ];
        let mut templates = Vec::with_capacity(specs.len());
        for (pattern, predicate, shape) in specs {
            templates.push(Template {
                regex: Regex::new(&pattern)?,
                predicate,
                shape,
            });
        }
        Ok(Self { templates })
    }

    /// Candidate triples in template order, then match order.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<ExtractedTriple> {
        let mut found = Vec::new();
        for template in &self.templates {
            for captures in template.regex.captures_iter(text) {
                let (subject, object) = match template.shape {
                    Shape::Binary => (
                        captures.get(1).map(|m| m.as_str()),
                        captures.get(2).map(|m| m.as_str()),
                    ),
                    Shape::FixedSubject(subject) => {
                        (Some(subject), captures.get(1).map(|m| m.as_str()))
                    }
                };
                if let (Some(subject), Some(object)) = (subject, object) {
                    found.push(ExtractedTriple {
                        subject: subject.trim().to_string(),
                        predicate: template.predicate.to_string(),
                        object: object.trim().to_string(),
                    });
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples(text: &str) -> Vec<(String, String, String)> {
        TripleExtractor::new()
            .unwrap()
            .extract(text)
            .into_iter()
            .map(|t| (t.subject, t.predicate, t.object))
            .collect()
    }

    fn t(s: &str, p: &str, o: &str) -> (String, String, String) {
        (s.to_string(), p.to_string(), o.to_string())
    }

    #[test]
    fn test_english_templates() {
        assert_eq!(triples("Rust is a language"), vec![t("Rust", "is_a", "language")]);
        assert_eq!(triples("Aura uses Qdrant"), vec![t("Aura", "uses", "Qdrant")]);
        assert_eq!(
            triples("backend depends on postgres"),
            vec![t("backend", "depends_on", "postgres")]
        );
        assert_eq!(triples("the user prefers vim"), vec![t("user", "prefers", "vim")]);
    }

    #[test]
    fn test_french_templates() {
        assert_eq!(
            triples("Python est un langage"),
            vec![t("Python", "is_a", "langage")]
        );
        assert_eq!(
            triples("L'utilisateur préfère neovim"),
            vec![t("user", "prefers", "neovim")]
        );
        assert_eq!(triples("Aura peut parler"), vec![t("Aura", "can", "parler")]);
    }

    #[test]
    fn test_no_match() {
        assert!(triples("nothing relevant here").is_empty());
        assert!(triples("").is_empty());
    }
}
