//! Side-by-side answer comparison.
//!
//! The judge sees the question, both candidate answers and the documents
//! retrieved for the question, and scores the answers on a fixed rubric.
//! Judging always decodes greedily so repeated runs agree.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    error::{Error, Result},
    generator::{DecodingParams, GenerationRequest, Generator, ReferenceDocument},
    preamble::{JUDGE_PREAMBLE, judge_request},
    report::Report,
    retriever::Retrieve,
};

/// The judge's verdict on one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub question: String,
    /// `None` if either answer is missing or the judge produced nothing.
    pub verdict: Option<String>,
    /// Set when judging this question failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AnswerJudge {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retrieve>,
    params: DecodingParams,
}

impl AnswerJudge {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retrieve>,
        params: DecodingParams,
    ) -> Self {
        Self {
            generator,
            retriever,
            params: params.deterministic(),
        }
    }

    /// Judge two answers to `question` against freshly retrieved context.
    pub fn compare(
        &self,
        question: &str,
        first: &str,
        second: &str,
    ) -> Result<Option<String>> {
        let chunks = self.retriever.retrieve(question)?;
        let references = ReferenceDocument::from_chunks(&chunks);
        let prompt = judge_request(question, first, second);

        let request = GenerationRequest::new(&prompt, &self.params)
            .with_documents(&references)
            .with_preamble(JUDGE_PREAMBLE);
        let verdict = self.generator.generate(&request).map(|g| g.text);
        if verdict.is_none() {
            warn!(question, "judge produced no verdict");
        }
        Ok(verdict)
    }

    /// Compare two reports question by question. Both must list the same
    /// questions in the same order. A question whose judging fails keeps
    /// its error and the remaining questions are still judged.
    pub fn compare_reports(
        &self,
        first: &Report,
        second: &Report,
    ) -> Result<Vec<Comparison>> {
        if first.entries.len() != second.entries.len() {
            return Err(Error::Config(format!(
                "reports differ in length: {} vs {} questions",
                first.entries.len(),
                second.entries.len()
            )));
        }

        let mut comparisons = Vec::with_capacity(first.entries.len());
        for (a, b) in first.entries.iter().zip(&second.entries) {
            if a.question != b.question {
                return Err(Error::Config(format!(
                    "reports disagree on question: '{}' vs '{}'",
                    a.question, b.question
                )));
            }
            let (verdict, failure) = match (&a.answer, &b.answer) {
                (Some(x), Some(y)) => match self.compare(&a.question, x, y) {
                    Ok(verdict) => (verdict, None),
                    Err(e) => {
                        error!(
                            question = %a.question,
                            error = %e,
                            "judging failed"
                        );
                        (None, Some(e.to_string()))
                    }
                },
                _ => {
                    warn!(question = %a.question, "missing answer, not judged");
                    (None, None)
                }
            };
            comparisons.push(Comparison {
                question: a.question.clone(),
                verdict,
                error: failure,
            });
        }
        info!(questions = comparisons.len(), "comparison finished");
        Ok(comparisons)
    }
}

impl std::fmt::Debug for AnswerJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerJudge")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Render verdicts as a markdown document.
pub fn comparisons_to_markdown(comparisons: &[Comparison]) -> String {
    let mut out = String::from("# Answer comparison\n\n");
    for (i, c) in comparisons.iter().enumerate() {
        out.push_str(&format!("## {}. {}\n\n", i + 1, c.question));
        match (&c.verdict, &c.error) {
            (Some(verdict), _) => out.push_str(verdict),
            (None, Some(e)) => out.push_str(&format!("_Failed: {e}_")),
            (None, None) => out.push_str("_Not judged._"),
        }
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        chunking::Chunk,
        generator::Generation,
        hyde::RetrievalMode,
        preamble::Language,
        report::ReportEntry,
    };

    #[derive(Default)]
    struct Judge {
        seen: Mutex<Vec<(String, Option<String>, DecodingParams, usize)>>,
    }

    impl Generator for Judge {
        fn generate(&self, request: &GenerationRequest<'_>) -> Option<Generation> {
            self.seen.lock().unwrap().push((
                request.query.to_string(),
                request.preamble.map(String::from),
                *request.params,
                request.documents.len(),
            ));
            Some(Generation {
                text: "| Accuracy | 7 | 9 |".into(),
                citations: None,
            })
        }
    }

    struct OneChunk;

    impl Retrieve for OneChunk {
        fn retrieve(&self, _query: &str) -> Result<Vec<Chunk>> {
            Ok(vec![Chunk {
                text: "context".into(),
                source: "A.pdf".into(),
                page: 1,
                sequence_index: 0,
            }])
        }
    }

    /// Fails for one question, returns a chunk for the others.
    struct FailsOn(&'static str);

    impl Retrieve for FailsOn {
        fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
            if query == self.0 {
                return Err(Error::NotFound {
                    kind: "collection",
                    name: "KB1".into(),
                });
            }
            OneChunk.retrieve(query)
        }
    }

    fn report(answers: &[(&str, Option<&str>)]) -> Report {
        let mut report = Report::new("KB1", RetrievalMode::Hyde, Language::En);
        for (question, answer) in answers {
            report.entries.push(ReportEntry {
                question: question.to_string(),
                answer: answer.map(String::from),
                error: None,
            });
        }
        report
    }

    #[test]
    fn judge_decodes_greedily_with_rubric_and_context() {
        let judge = Arc::new(Judge::default());
        let evaluator = AnswerJudge::new(
            judge.clone(),
            Arc::new(OneChunk),
            DecodingParams::default(),
        );

        let verdict = evaluator.compare("Q?", "one", "two").unwrap();
        assert_eq!(verdict.as_deref(), Some("| Accuracy | 7 | 9 |"));

        let seen = judge.seen.lock().unwrap();
        let (prompt, preamble, params, docs) = &seen[0];
        assert!(prompt.contains("Answer1:\none"));
        assert!(prompt.contains("Answer2:\ntwo"));
        assert_eq!(preamble.as_deref(), Some(JUDGE_PREAMBLE));
        assert_eq!(params.temperature, 0.0);
        assert_eq!(*docs, 1);
    }

    #[test]
    fn reports_are_compared_pairwise() {
        let judge = Arc::new(Judge::default());
        let evaluator = AnswerJudge::new(
            judge.clone(),
            Arc::new(OneChunk),
            DecodingParams::default(),
        );

        let first = report(&[("Q1", Some("a")), ("Q2", None)]);
        let second = report(&[("Q1", Some("b")), ("Q2", Some("c"))]);
        let comparisons = evaluator.compare_reports(&first, &second).unwrap();

        assert_eq!(comparisons.len(), 2);
        assert!(comparisons[0].verdict.is_some());
        assert!(comparisons[1].verdict.is_none());
        assert_eq!(judge.seen.lock().unwrap().len(), 1);

        let md = comparisons_to_markdown(&comparisons);
        assert!(md.contains("## 2. Q2\n\n_Not judged._"));
    }

    #[test]
    fn mismatched_reports_are_rejected() {
        let evaluator = AnswerJudge::new(
            Arc::new(Judge::default()),
            Arc::new(OneChunk),
            DecodingParams::default(),
        );
        let first = report(&[("Q1", Some("a"))]);
        let second = report(&[("Other", Some("b"))]);
        assert!(matches!(
            evaluator.compare_reports(&first, &second),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn one_failed_question_does_not_stop_the_comparison() {
        let judge = Arc::new(Judge::default());
        let evaluator = AnswerJudge::new(
            judge.clone(),
            Arc::new(FailsOn("Q2")),
            DecodingParams::default(),
        );

        let answers = [("Q1", Some("a")), ("Q2", Some("b")), ("Q3", Some("c"))];
        let comparisons = evaluator
            .compare_reports(&report(&answers), &report(&answers))
            .unwrap();

        assert_eq!(comparisons.len(), 3);
        assert!(comparisons[0].verdict.is_some());
        assert!(comparisons[0].error.is_none());
        assert!(comparisons[1].verdict.is_none());
        assert!(comparisons[1].error.as_deref().unwrap().contains("KB1"));
        assert!(comparisons[2].verdict.is_some());
        assert_eq!(judge.seen.lock().unwrap().len(), 2);

        let md = comparisons_to_markdown(&comparisons);
        assert!(md.contains("## 2. Q2\n\n_Failed: "));
    }
}
