//! Minimal Gherkin parser for the `specifications` block of a procedure.
//!
//! Supports `Feature:`, `Background:`, `Scenario:`, and the step keywords
//! `Given`/`When`/`Then` with `And`/`But` continuation. Comment lines start
//! with `#`.

use thiserror::Error;

/// Gherkin parse failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("line {line}: step '{text}' appears outside a scenario")]
    StepOutsideScenario { line: usize, text: String },

    #[error("line {line}: '{keyword}' continuation without a preceding step")]
    DanglingContinuation { line: usize, keyword: String },

    #[error("no scenarios found")]
    Empty,
}

/// Primary step keyword; `And`/`But` inherit the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKeyword {
    Given,
    When,
    Then,
}

/// One parsed step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub keyword: StepKeyword,
    pub text: String,
}

/// One scenario with background steps prepended.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

/// One feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub scenarios: Vec<Scenario>,
}

/// A parsed specifications block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GherkinDocument {
    pub features: Vec<Feature>,
}

impl GherkinDocument {
    /// Every scenario across all features, in document order.
    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.features.iter().flat_map(|f| f.scenarios.iter())
    }

    /// Total step count.
    pub fn step_count(&self) -> usize {
        self.scenarios().map(|s| s.steps.len()).sum()
    }
}

enum Section {
    None,
    Background,
    Scenario,
}

/// Parse a Gherkin document.
pub fn parse(text: &str) -> Result<GherkinDocument, ParseError> {
    let mut features: Vec<Feature> = Vec::new();
    let mut background: Vec<Step> = Vec::new();
    let mut section = Section::None;
    let mut last_keyword: Option<StepKeyword> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('@') {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix("Feature:") {
            features.push(Feature {
                name: name.trim().to_string(),
                scenarios: Vec::new(),
            });
            background.clear();
            section = Section::None;
            last_keyword = None;
            continue;
        }
        if trimmed.strip_prefix("Background:").is_some() {
            section = Section::Background;
            last_keyword = None;
            continue;
        }
        let scenario_name = trimmed
            .strip_prefix("Scenario Outline:")
            .or_else(|| trimmed.strip_prefix("Scenario:"));
        if let Some(name) = scenario_name {
            if features.is_empty() {
                features.push(Feature {
                    name: String::new(),
                    scenarios: Vec::new(),
                });
            }
            let feature = features.last_mut().expect("feature exists");
            feature.scenarios.push(Scenario {
                name: name.trim().to_string(),
                steps: background.clone(),
            });
            section = Section::Scenario;
            last_keyword = None;
            continue;
        }

        let (keyword, rest) = match split_keyword(trimmed) {
            Some(parsed) => parsed,
            None => continue, // docstrings/tables are not supported; skip
        };
        let keyword = match keyword {
            ParsedKeyword::Primary(primary) => {
                last_keyword = Some(primary);
                primary
            }
            ParsedKeyword::Continuation(label) => last_keyword.ok_or_else(|| {
                ParseError::DanglingContinuation {
                    line,
                    keyword: label.to_string(),
                }
            })?,
        };
        let step = Step {
            keyword,
            text: rest.trim().to_string(),
        };
        match section {
            Section::Background => background.push(step),
            Section::Scenario => {
                let feature = features.last_mut().expect("feature exists");
                let scenario = feature.scenarios.last_mut().expect("scenario exists");
                scenario.steps.push(step);
            }
            Section::None => {
                return Err(ParseError::StepOutsideScenario {
                    line,
                    text: trimmed.to_string(),
                })
            }
        }
    }

    if features.iter().all(|f| f.scenarios.is_empty()) {
        return Err(ParseError::Empty);
    }
    Ok(GherkinDocument { features })
}

enum ParsedKeyword {
    Primary(StepKeyword),
    Continuation(&'static str),
}

fn split_keyword(line: &str) -> Option<(ParsedKeyword, &str)> {
    for (prefix, parsed) in [
        ("Given ", ParsedKeyword::Primary(StepKeyword::Given)),
        ("When ", ParsedKeyword::Primary(StepKeyword::When)),
        ("Then ", ParsedKeyword::Primary(StepKeyword::Then)),
        ("And ", ParsedKeyword::Continuation("And")),
        ("But ", ParsedKeyword::Continuation("But")),
    ] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return Some((parsed, rest));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
Feature: Greeting

  Background:
    Given the name parameter is "World"

  Scenario: greets and finishes
    When the procedure runs
    Then the done tool should be called
    And the procedure should complete successfully

  Scenario: stays under budget
    Then iterations should be less than 5
"#;

    #[test]
    fn parses_features_scenarios_and_steps() {
        let doc = parse(DOC).unwrap();
        assert_eq!(doc.features.len(), 1);
        assert_eq!(doc.features[0].name, "Greeting");
        let scenarios: Vec<_> = doc.scenarios().collect();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].name, "greets and finishes");
        // Background step is prepended.
        assert_eq!(scenarios[0].steps[0].keyword, StepKeyword::Given);
        assert_eq!(scenarios[0].steps.len(), 4);
    }

    #[test]
    fn and_inherits_the_previous_keyword() {
        let doc = parse(DOC).unwrap();
        let steps = &doc.features[0].scenarios[0].steps;
        assert_eq!(steps[3].keyword, StepKeyword::Then);
    }

    #[test]
    fn dangling_and_is_an_error() {
        let err = parse("Feature: x\nScenario: y\nAnd something\n").unwrap_err();
        assert!(matches!(err, ParseError::DanglingContinuation { .. }));
    }

    #[test]
    fn empty_document_is_an_error() {
        assert_eq!(parse("Feature: lonely\n").unwrap_err(), ParseError::Empty);
    }
}
