//! Prompt texts: per-language answer preambles, the HyDE task, and the
//! answer-comparison judge instructions.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target language of a generated answer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    It,
    Es,
    Fr,
}

impl Language {
    pub const ALL: [Language; 4] =
        [Language::En, Language::It, Language::Es, Language::Fr];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::It => "it",
            Language::Es => "es",
            Language::Fr => "fr",
        }
    }

    /// System instructions used for the grounded answer.
    pub fn preamble(self) -> &'static str {
        match self {
            Language::En => PREAMBLE_EN,
            Language::It => PREAMBLE_IT,
            Language::Es => PREAMBLE_ES,
            Language::Fr => PREAMBLE_FR,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unsupported language '{s}' (expected one of: en, it, es, fr)"
                ))
            })
    }
}

const PREAMBLE_EN: &str = "\
## Task & Context
You are an assistant responsible for answering questions using the provided \
documents. Respond with detailed information and compose a comprehensive and \
thorough one-page document.
";

const PREAMBLE_IT: &str = "\
## Task & Context
Sei un assistente responsabile per rispondere a domande utilizzando i \
documenti forniti. Rispondi in italiano, con informazioni dettagliate e \
componi un esauriente documento di almeno una pagina.
";

const PREAMBLE_ES: &str = "\
## Task & Context
Eres un asistente responsable de responder preguntas utilizando los \
documentos proporcionados. Responde en español, con información detallada y \
compón un documento exhaustivo de al menos una página.
";

const PREAMBLE_FR: &str = "\
## Task & Context
Vous êtes un assistant responsable de répondre aux questions en utilisant \
les documents fournis. Répondez en français, avec des informations \
détaillées et rédigez un document exhaustif d'au moins une page.
";

/// The stage-1 HyDE request: ask for a passage that would answer `query`.
///
/// # Examples
///
/// ```
/// use hydrag::preamble::hyde_task;
///
/// let task = hyde_task("What is redb?");
/// assert!(task.contains("Question: What is redb?"));
/// assert!(task.ends_with("Passage:"));
/// ```
pub fn hyde_task(query: &str) -> String {
    format!(
        "Given a question, write a documentation passage to answer the question\n\
         Question: {query}\n\
         Passage:"
    )
}

/// Instructions for comparing two candidate answers to the same question.
pub const JUDGE_PREAMBLE: &str = "\
## Task
Based on the provided criteria, evaluate and compare the two answers. \
Do not answer the question itself. Instead, follow these instructions:

1. Comparison and Analysis:
Highlight the strengths and weaknesses of each answer in relation to the \
provided documentation and criteria.

2. Scoring:
Assign a score for each criterion (Accuracy, Completeness, Relevance, \
Clarity) on a scale from 0 to 10 for each answer. Summarize the scores in a \
table with a column for each answer and a row for each criterion.

## Comparison criteria
Accuracy: Which answer more accurately reflects the information in the documentation?
Completeness: Which answer provides a more comprehensive response?
Relevance: Which answer is more relevant to the question asked?
Clarity: Which answer is clearer and easier to understand?

## Formatting rules
The \"Criteria\" column must be 14 characters wide, values left-aligned:

| Criteria     | Answer 1 | Answer 2 |
|--------------|----------|----------|
| Accuracy     |    7     |    9     |
| Completeness |    7     |   10     |
| Relevance    |    8     |    9     |
| Clarity      |    8     |    9     |
";

/// Render the judge request for one question and its two candidate answers.
pub fn judge_request(question: &str, first: &str, second: &str) -> String {
    format!(
        "Question:\n{question}\n\nAnswer1:\n{first}\n\nAnswer2:\n{second}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_codes() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("IT".parse::<Language>().unwrap(), Language::It);
        assert_eq!(" fr ".parse::<Language>().unwrap(), Language::Fr);
    }

    #[test]
    fn rejects_unsupported_code() {
        let err = "de".parse::<Language>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn every_language_has_a_preamble() {
        for lang in Language::ALL {
            assert!(lang.preamble().starts_with("## Task & Context"));
        }
    }

    #[test]
    fn judge_request_lists_both_answers() {
        let req = judge_request("q?", "one", "two");
        assert_eq!(req, "Question:\nq?\n\nAnswer1:\none\n\nAnswer2:\ntwo\n");
    }

    #[test]
    fn language_serializes_lowercase() {
        let json = serde_json::to_string(&Language::Es).unwrap();
        assert_eq!(json, "\"es\"");
        let lang: Language = serde_json::from_str("\"it\"").unwrap();
        assert_eq!(lang, Language::It);
    }
}
