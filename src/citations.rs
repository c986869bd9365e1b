//! Citation reconciliation.
//!
//! A grounded model answers with character spans that it attributes to
//! reference documents by id. [`reconcile`] resolves those ids against the
//! documents of the same request, splices ` [id, ...]` markers into the
//! answer after each cited span, and appends one source line per cited id.
//!
//! ```
//! use hydrag::citations::reconcile;
//! use hydrag::generator::{Citation, ReferenceDocument, Span};
//!
//! let docs = vec![ReferenceDocument {
//!     id: "1".into(),
//!     snippet: "A cat sat on the mat.".into(),
//!     source: "cats.pdf".into(),
//!     page: "4".into(),
//! }];
//! let citations = vec![Citation {
//!     interval: Span { start: 0, end: 5 },
//!     text: "A cat".into(),
//!     document_ids: vec!["1".into()],
//! }];
//!
//! let answer = reconcile("A cat sat.", &citations, &docs);
//! assert_eq!(answer.annotated_text, "A cat [1] sat.\n\n[1] cats.pdf, page 4");
//! ```

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap, HashSet},
};

use serde::Serialize;
use tracing::warn;

use crate::generator::{Citation, Generation, ReferenceDocument, Span};

/// A cited document id with its provenance, when the id is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDocument {
    pub id: String,
    pub source: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledCitation {
    pub interval: Span,
    pub text: String,
    pub documents: Vec<ResolvedDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledAnswer {
    pub annotated_text: String,
    pub citations: Vec<ReconciledCitation>,
}

/// Reconcile a generation, if there is anything to reconcile.
///
/// Returns `None` when the answer is absent or carries no citations; the
/// caller then shows the raw text, if any.
pub fn reconcile_generation(
    generation: Option<&Generation>,
    references: &[ReferenceDocument],
) -> Option<ReconciledAnswer> {
    let generation = generation?;
    let citations = generation.citations.as_deref()?;
    if citations.is_empty() {
        return None;
    }
    Some(reconcile(&generation.text, citations, references))
}

/// Resolve `citations` against `references` and annotate `answer`.
///
/// Text outside the splice points is left byte-identical. Spans that are
/// empty, inverted or reach past the end of the answer are not annotated
/// but are still resolved. Overlapping spans share one marker.
pub fn reconcile(
    answer: &str,
    citations: &[Citation],
    references: &[ReferenceDocument],
) -> ReconciledAnswer {
    let by_id: HashMap<&str, &ReferenceDocument> = references
        .iter()
        .map(|doc| (doc.id.as_str(), doc))
        .collect();

    let mut warned = HashSet::new();
    let resolved: Vec<ReconciledCitation> = citations
        .iter()
        .map(|citation| ReconciledCitation {
            interval: citation.interval,
            text: citation.text.clone(),
            documents: citation
                .document_ids
                .iter()
                .map(|id| resolve(id, &by_id, &mut warned))
                .collect(),
        })
        .collect();

    let mut annotated = annotate(answer, citations);

    let mut cited: Vec<&ResolvedDocument> = Vec::new();
    let mut seen = BTreeSet::new();
    for doc in resolved.iter().flat_map(|c| &c.documents) {
        if seen.insert(doc.id.as_str()) {
            cited.push(doc);
        }
    }
    cited.sort_by(|a, b| compare_ids(&a.id, &b.id));

    if !cited.is_empty() {
        annotated.push_str("\n\n");
        let lines: Vec<String> = cited.iter().map(|doc| source_line(doc)).collect();
        annotated.push_str(&lines.join("\n"));
    }

    ReconciledAnswer {
        annotated_text: annotated,
        citations: resolved,
    }
}

fn resolve<'a>(
    id: &'a str,
    by_id: &HashMap<&str, &ReferenceDocument>,
    warned: &mut HashSet<&'a str>,
) -> ResolvedDocument {
    match by_id.get(id) {
        Some(doc) => ResolvedDocument {
            id: id.to_string(),
            source: Some(doc.source.clone()),
            page: Some(doc.page.clone()),
        },
        None => {
            if warned.insert(id) {
                warn!(id, "citation refers to an unknown reference document");
            }
            ResolvedDocument {
                id: id.to_string(),
                source: None,
                page: None,
            }
        }
    }
}

/// A marker to splice in after `end`, in character offsets.
#[derive(Debug)]
struct Marker<'a> {
    start: usize,
    end: usize,
    ids: Vec<&'a str>,
}

fn annotate(answer: &str, citations: &[Citation]) -> String {
    // boundaries[i] is the byte offset of character i; the last entry is
    // the end of the text.
    let boundaries: Vec<usize> = answer
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(answer.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut valid: Vec<&Citation> = citations
        .iter()
        .filter(|citation| {
            let Span { start, end } = citation.interval;
            let ok = start < end && end <= char_len;
            if !ok {
                warn!(
                    start,
                    end,
                    answer_chars = char_len,
                    "skipping citation with an invalid span"
                );
            }
            ok
        })
        .collect();
    valid.sort_by_key(|c| (c.interval.start, c.interval.end));

    let mut markers: Vec<Marker<'_>> = Vec::new();
    for citation in valid {
        let Span { start, end } = citation.interval;
        match markers.last_mut() {
            Some(last) if start < last.end => {
                last.end = last.end.max(end);
                for id in &citation.document_ids {
                    if !last.ids.contains(&id.as_str()) {
                        last.ids.push(id);
                    }
                }
            }
            _ => {
                let mut ids: Vec<&str> = Vec::new();
                for id in &citation.document_ids {
                    if !ids.contains(&id.as_str()) {
                        ids.push(id);
                    }
                }
                markers.push(Marker { start, end, ids });
            }
        }
    }

    // Splice from the back so earlier offsets stay valid.
    let mut text = answer.to_string();
    for marker in markers.iter().rev() {
        debug_assert!(marker.start < marker.end);
        let at = boundaries[marker.end];
        text.insert_str(at, &format!(" [{}]", marker.ids.join(", ")));
    }
    text
}

fn source_line(doc: &ResolvedDocument) -> String {
    match (&doc.source, &doc.page) {
        (Some(source), Some(page)) => {
            format!("[{}] {source}, page {page}", doc.id)
        }
        (Some(source), None) => format!("[{}] {source}", doc.id),
        _ => format!("[{}] unresolved", doc.id),
    }
}

/// Numeric ids in numeric order, ahead of any non-numeric ones.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, source: &str, page: &str) -> ReferenceDocument {
        ReferenceDocument {
            id: id.into(),
            snippet: format!("snippet {id}"),
            source: source.into(),
            page: page.into(),
        }
    }

    fn cite(start: usize, end: usize, ids: &[&str]) -> Citation {
        Citation {
            interval: Span { start, end },
            text: String::new(),
            document_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The annotated text without the trailing source listing.
    fn body(answer: &ReconciledAnswer) -> &str {
        answer
            .annotated_text
            .split("\n\n")
            .next()
            .unwrap_or_default()
    }

    #[test]
    fn marker_goes_after_the_span_and_leaves_the_rest_alone() {
        let docs = vec![doc("1", "A.pdf", "1")];
        let answer = reconcile("A cat sat.", &[cite(0, 5, &["1"])], &docs);
        assert_eq!(answer.annotated_text, "A cat [1] sat.\n\n[1] A.pdf, page 1");
    }

    #[test]
    fn multiple_markers_land_on_their_own_spans() {
        let docs = vec![doc("1", "A.pdf", "1"), doc("2", "B.pdf", "3")];
        let text = "Alpha beta gamma delta.";
        let citations = vec![cite(0, 5, &["1"]), cite(11, 16, &["2"])];

        let answer = reconcile(text, &citations, &docs);
        assert_eq!(body(&answer), "Alpha [1] beta gamma [2] delta.");
    }

    #[test]
    fn input_order_of_citations_does_not_matter() {
        let docs = vec![doc("1", "A.pdf", "1"), doc("2", "B.pdf", "3")];
        let text = "Alpha beta gamma delta.";
        let forward = reconcile(
            text,
            &[cite(0, 5, &["1"]), cite(11, 16, &["2"])],
            &docs,
        );
        let backward = reconcile(
            text,
            &[cite(11, 16, &["2"]), cite(0, 5, &["1"])],
            &docs,
        );
        assert_eq!(body(&forward), body(&backward));
    }

    #[test]
    fn offsets_are_characters_not_bytes() {
        let docs = vec![doc("1", "cafe.pdf", "2")];
        let answer = reconcile("Café au lait.", &[cite(0, 4, &["1"])], &docs);
        assert_eq!(body(&answer), "Café [1] au lait.");
    }

    #[test]
    fn unknown_id_resolves_to_nothing() {
        let docs = vec![doc("1", "A.pdf", "1")];
        let answer =
            reconcile("A cat sat.", &[cite(0, 5, &["1", "7"])], &docs);

        let documents = &answer.citations[0].documents;
        assert_eq!(documents[0].source.as_deref(), Some("A.pdf"));
        assert_eq!(
            documents[1],
            ResolvedDocument {
                id: "7".into(),
                source: None,
                page: None,
            }
        );
        assert_eq!(
            answer.annotated_text,
            "A cat [1, 7] sat.\n\n[1] A.pdf, page 1\n[7] unresolved"
        );
    }

    #[test]
    fn overlapping_spans_share_one_marker() {
        let docs = vec![doc("1", "A.pdf", "1"), doc("2", "B.pdf", "2")];
        let citations = vec![cite(0, 9, &["1"]), cite(6, 12, &["2", "1"])];
        let answer = reconcile("One two three four.", &citations, &docs);
        assert_eq!(body(&answer), "One two thre [1, 2]e four.");
    }

    #[test]
    fn invalid_spans_are_skipped_but_still_listed() {
        let docs = vec![doc("1", "A.pdf", "1"), doc("2", "B.pdf", "2")];
        let citations = vec![
            cite(4, 4, &["1"]),
            cite(6, 2, &["1"]),
            cite(0, 99, &["2"]),
        ];
        let answer = reconcile("A cat sat.", &citations, &docs);

        assert_eq!(body(&answer), "A cat sat.");
        assert_eq!(answer.citations.len(), 3);
        assert!(answer.annotated_text.ends_with("[1] A.pdf, page 1\n[2] B.pdf, page 2"));
    }

    #[test]
    fn listing_sorts_ids_numerically() {
        let docs: Vec<_> = (1..=10)
            .map(|i| doc(&i.to_string(), "A.pdf", &i.to_string()))
            .collect();
        let citations = vec![cite(0, 1, &["10"]), cite(2, 3, &["2"])];
        let answer = reconcile("a b c", &citations, &docs);

        let listing: Vec<_> =
            answer.annotated_text.lines().skip(2).collect();
        assert_eq!(listing, vec!["[2] A.pdf, page 2", "[10] A.pdf, page 10"]);
    }

    #[test]
    fn id_ordering() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("9", "x"), Ordering::Less);
        assert_eq!(compare_ids("b", "a"), Ordering::Greater);
    }

    #[test]
    fn nothing_to_reconcile() {
        let docs = vec![doc("1", "A.pdf", "1")];
        assert!(reconcile_generation(None, &docs).is_none());

        let plain = Generation {
            text: "No citations here.".into(),
            citations: None,
        };
        assert!(reconcile_generation(Some(&plain), &docs).is_none());

        let empty = Generation {
            text: "Grounded but uncited.".into(),
            citations: Some(Vec::new()),
        };
        assert!(reconcile_generation(Some(&empty), &docs).is_none());
    }

    #[test]
    fn reconciles_cited_generation() {
        let docs = vec![doc("1", "A.pdf", "1")];
        let generation = Generation {
            text: "A cat sat.".into(),
            citations: Some(vec![cite(0, 5, &["1"])]),
        };
        let answer = reconcile_generation(Some(&generation), &docs).unwrap();
        assert_eq!(body(&answer), "A cat [1] sat.");
    }
}
