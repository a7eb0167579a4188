use serde::Serialize;

pub const DEFAULT_MODEL_ANNOTATIONS: &[&str] = &[
    "javax.persistence.Entity",
    "javax.persistence.MappedSuperclass",
    "javax.persistence.Embeddable",
    "jakarta.persistence.Entity",
    "jakarta.persistence.MappedSuperclass",
    "jakarta.persistence.Embeddable",
];

pub const DEFAULT_CONVERTER_ANNOTATIONS: &[&str] = &[
    "javax.persistence.Converter",
    "jakarta.persistence.Converter",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Categorization {
    Model,
    Converter,
    Other,
}

impl Categorization {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Converter => "converter",
            Self::Other => "other",
        }
    }
}

/// Maps class-level annotation names to a [`Categorization`].
///
/// Model markers win over converter markers when a class carries both.
#[derive(Debug, Clone)]
pub struct Categorizer {
    model: Vec<String>,
    converter: Vec<String>,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_MODEL_ANNOTATIONS.iter().map(|s| s.to_string()),
            DEFAULT_CONVERTER_ANNOTATIONS.iter().map(|s| s.to_string()),
        )
    }
}

impl Categorizer {
    pub fn new(
        model: impl IntoIterator<Item = String>,
        converter: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            model: model.into_iter().collect(),
            converter: converter.into_iter().collect(),
        }
    }

    pub fn categorize<S: AsRef<str>>(&self, annotations: &[S]) -> Categorization {
        let has = |markers: &[String]| {
            annotations
                .iter()
                .any(|a| markers.iter().any(|m| m == a.as_ref()))
        };

        if has(&self.model) {
            Categorization::Model
        } else if has(&self.converter) {
            Categorization::Converter
        } else {
            Categorization::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_markers_categorize_as_model() {
        let c = Categorizer::default();
        for marker in DEFAULT_MODEL_ANNOTATIONS {
            assert_eq!(c.categorize(&[*marker]), Categorization::Model, "{marker}");
        }
    }

    #[test]
    fn converter_marker_alone_is_converter() {
        let c = Categorizer::default();
        assert_eq!(
            c.categorize(&["java.lang.Deprecated", "jakarta.persistence.Converter"]),
            Categorization::Converter
        );
    }

    #[test]
    fn model_wins_over_converter() {
        let c = Categorizer::default();
        assert_eq!(
            c.categorize(&["javax.persistence.Converter", "javax.persistence.Embeddable"]),
            Categorization::Model
        );
    }

    #[test]
    fn unrelated_or_missing_annotations_are_other() {
        let c = Categorizer::default();
        assert_eq!(c.categorize::<&str>(&[]), Categorization::Other);
        assert_eq!(
            c.categorize(&["javax.persistence.Table", "org.example.Entity"]),
            Categorization::Other
        );
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let c = Categorizer::new(
            vec!["org.example.Model".to_string()],
            vec!["org.example.Conv".to_string()],
        );
        assert_eq!(c.categorize(&["org.example.Model"]), Categorization::Model);
        assert_eq!(c.categorize(&["org.example.Conv"]), Categorization::Converter);
        assert_eq!(
            c.categorize(&["javax.persistence.Entity"]),
            Categorization::Other
        );
    }
}
