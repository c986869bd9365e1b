//! Question/answer reports for batch runs, as markdown and JSON.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    citations::reconcile_generation,
    error::Result,
    hyde::{PipelineOutcome, RetrievalMode},
    preamble::Language,
};

/// One answered (or failed) question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub question: String,
    /// The final answer, annotated with citations when the model cited.
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEntry {
    pub fn answered(question: &str, outcome: &PipelineOutcome) -> Self {
        let answer = reconcile_generation(
            outcome.generation.as_ref(),
            &outcome.references,
        )
        .map(|reconciled| reconciled.annotated_text)
        .or_else(|| outcome.generation.as_ref().map(|g| g.text.clone()));

        Self {
            question: question.to_string(),
            answer,
            error: None,
        }
    }

    pub fn failed(question: &str, error: &crate::Error) -> Self {
        Self {
            question: question.to_string(),
            answer: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub collection: String,
    pub mode: RetrievalMode,
    pub language: Language,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn new(collection: &str, mode: RetrievalMode, language: Language) -> Self {
        Self {
            collection: collection.to_string(),
            mode,
            language,
            entries: Vec::new(),
        }
    }

    /// Questions that produced an answer.
    pub fn answered(&self) -> usize {
        self.entries.iter().filter(|e| e.answer.is_some()).count()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Answers from {}\n", self.collection);
        let _ = writeln!(
            out,
            "Retrieval: {}, language: {}, answered {} of {}\n",
            self.mode,
            self.language,
            self.answered(),
            self.entries.len()
        );

        for (i, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(out, "## {}. {}\n", i + 1, entry.question);
            match (&entry.answer, &entry.error) {
                (Some(answer), _) => {
                    let _ = writeln!(out, "{answer}\n");
                }
                (None, Some(error)) => {
                    let _ = writeln!(out, "_Failed: {error}_\n");
                }
                (None, None) => {
                    let _ = writeln!(out, "_No answer._\n");
                }
            }
        }
        out
    }

    /// Write `<stem>.md` and `<stem>.json` into `dir`.
    pub fn write(&self, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let markdown = dir.join(format!("{stem}.md"));
        let json = dir.join(format!("{stem}.json"));
        std::fs::write(&markdown, self.to_markdown())?;
        std::fs::write(&json, serde_json::to_vec_pretty(self)?)?;
        Ok((markdown, json))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error,
        generator::{Citation, Generation, ReferenceDocument, Span},
    };

    fn outcome(generation: Option<Generation>) -> PipelineOutcome {
        PipelineOutcome {
            mode: RetrievalMode::Hyde,
            hypothetical: Some("passage".into()),
            references: vec![ReferenceDocument {
                id: "1".into(),
                snippet: "A cat sat.".into(),
                source: "A.pdf".into(),
                page: "1".into(),
            }],
            generation,
        }
    }

    #[test]
    fn cited_answers_are_annotated() {
        let entry = ReportEntry::answered(
            "Who sat?",
            &outcome(Some(Generation {
                text: "A cat sat.".into(),
                citations: Some(vec![Citation {
                    interval: Span { start: 0, end: 5 },
                    text: "A cat".into(),
                    document_ids: vec!["1".into()],
                }]),
            })),
        );
        assert_eq!(
            entry.answer.as_deref(),
            Some("A cat [1] sat.\n\n[1] A.pdf, page 1")
        );
    }

    #[test]
    fn uncited_answers_are_kept_verbatim() {
        let entry = ReportEntry::answered(
            "Who sat?",
            &outcome(Some(Generation {
                text: "A cat.".into(),
                citations: None,
            })),
        );
        assert_eq!(entry.answer.as_deref(), Some("A cat."));

        let missing = ReportEntry::answered("Who sat?", &outcome(None));
        assert!(missing.answer.is_none());
    }

    #[test]
    fn markdown_lists_every_question() {
        let mut report = Report::new("KB1", RetrievalMode::Classic, Language::En);
        report.entries.push(ReportEntry {
            question: "First?".into(),
            answer: Some("Yes.".into()),
            error: None,
        });
        report.entries.push(ReportEntry::failed(
            "Second?",
            &Error::Config("bad".into()),
        ));

        let md = report.to_markdown();
        assert!(md.contains("answered 1 of 2"));
        assert!(md.contains("## 1. First?\n\nYes."));
        assert!(md.contains("## 2. Second?\n\n_Failed: configuration error: bad_"));
    }

    #[test]
    fn json_report_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = Report::new("KB1", RetrievalMode::Hyde, Language::Fr);
        report.entries.push(ReportEntry {
            question: "Q?".into(),
            answer: None,
            error: None,
        });

        let (md, json) = report.write(tmp.path(), "run").unwrap();
        assert!(md.exists());
        assert_eq!(Report::load(&json).unwrap(), report);
    }
}
