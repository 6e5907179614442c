use super::{CollaboratorError, ReportParser};
use crate::orchestration::state::Finding;
use serde::Deserialize;
use std::fs;
use std::path::Path;

const SERVICE: &str = "report parser";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportDocument {
    Definitions { definitions: Vec<DefinitionResult> },
    Bare(Vec<DefinitionResult>),
}

#[derive(Debug, Deserialize)]
struct DefinitionResult {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "class")]
    classification: String,
    #[serde(default)]
    references: References,
    result: ResultValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum References {
    #[default]
    None,
    Text(String),
    List(Vec<String>),
}

impl References {
    fn render(self) -> String {
        match self {
            Self::None => String::new(),
            Self::Text(text) => text.replace(['[', ']'], "").trim().to_string(),
            Self::List(items) => items.join(", "),
        }
    }
}

/// Definition outcomes as scanners emit them: a boolean, or a word such as
/// `true`, `false` or `error`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultValue {
    Flag(bool),
    Word(String),
}

impl ResultValue {
    fn matched(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Word(word) => word.trim().eq_ignore_ascii_case("true"),
        }
    }
}

/// Reads definition-result reports and keeps the definitions whose result is
/// true, meaning the host matched the vulnerable condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportParser;

impl JsonReportParser {
    pub fn parse_str(raw: &str) -> Result<Vec<Finding>, CollaboratorError> {
        let document: ReportDocument = serde_json::from_str(raw)
            .map_err(|err| CollaboratorError::invalid(SERVICE, err.to_string()))?;
        let definitions = match document {
            ReportDocument::Definitions { definitions } => definitions,
            ReportDocument::Bare(definitions) => definitions,
        };
        Ok(definitions
            .into_iter()
            .filter(|definition| definition.result.matched())
            .map(|definition| Finding {
                title: if definition.title.trim().is_empty() {
                    definition.id.clone()
                } else {
                    definition.title
                },
                id: definition.id,
                classification: definition.classification,
                references: definition.references.render(),
            })
            .collect())
    }
}

impl ReportParser for JsonReportParser {
    fn parse(&self, artifact_ref: &str) -> Result<Vec<Finding>, CollaboratorError> {
        let path = Path::new(artifact_ref);
        let raw = fs::read_to_string(path).map_err(|source| CollaboratorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str(&raw)
    }
}
