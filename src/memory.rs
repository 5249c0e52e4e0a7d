//! In-memory [`Retriever`] for small corpora and tests.
//!
//! A linear scan over every document. The raw score is the share of query
//! tokens a document is missing, so lower is better and `0.0` means every
//! token was found.

use std::collections::HashSet;

use crate::{
    error::Result,
    retriever::{CandidateDocument, Retriever, ScoreOrder},
    tantivy_index::IndexDocument,
    text_util,
};

struct StoredDoc {
    doc: IndexDocument,
    title_tokens: HashSet<String>,
    tokens: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryRetriever {
    docs: Vec<StoredDoc>,
}

impl MemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document, replacing any earlier one with the same id.
    pub fn insert(&mut self, doc: IndexDocument) {
        self.docs.retain(|stored| stored.doc.id != doc.id);

        let title_tokens: HashSet<String> =
            text_util::tokens(&doc.title).into_iter().collect();
        let mut tokens = title_tokens.clone();
        tokens.extend(text_util::tokens(&doc.description));
        tokens.extend(doc.keywords.iter().flat_map(|k| text_util::tokens(k)));
        tokens.extend(text_util::tokens(&doc.body));

        self.docs.push(StoredDoc {
            doc,
            title_tokens,
            tokens,
        });
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl FromIterator<IndexDocument> for MemoryRetriever {
    fn from_iter<I: IntoIterator<Item = IndexDocument>>(iter: I) -> Self {
        let mut retriever = Self::new();
        for doc in iter {
            retriever.insert(doc);
        }
        retriever
    }
}

impl Retriever for MemoryRetriever {
    fn score_order(&self) -> ScoreOrder {
        ScoreOrder::LowerIsBetter
    }

    fn retrieve(
        &self,
        query: &str,
        sources: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateDocument>> {
        let mut query_tokens = text_util::tokens(query);
        query_tokens.sort();
        query_tokens.dedup();
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(f32, usize, &IndexDocument)> = self
            .docs
            .iter()
            .filter(|stored| {
                sources.is_empty() || sources.contains(&stored.doc.source_id)
            })
            .filter_map(|stored| {
                let found = query_tokens
                    .iter()
                    .filter(|t| stored.tokens.contains(*t))
                    .count();
                if found == 0 {
                    return None;
                }
                let in_title = query_tokens
                    .iter()
                    .filter(|t| stored.title_tokens.contains(*t))
                    .count();
                let missing = 1.0 - found as f32 / query_tokens.len() as f32;
                Some((missing, in_title, &stored.doc))
            })
            .collect();

        hits.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.id.cmp(&b.2.id))
        });

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(missing, _, doc)| doc.to_candidate(missing))
            .collect())
    }
}
