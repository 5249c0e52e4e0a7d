use std::path::Path;

use serde::Deserialize;
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    doc,
    query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    error::{Error, Result},
    retriever::{CandidateDocument, Retriever, ScoreOrder},
};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const SOURCE_ID: &str = "source_id";
    pub const PATH: &str = "path";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const KEYWORDS: &str = "keywords";
    pub const BODY: &str = "body";
    pub const HEADING_LEVEL: &str = "heading_level";
}

/// Characters the query parser treats as syntax.
const QUERY_SYNTAX: &[char] = &[
    ':', '"', '\'', '(', ')', '[', ']', '{', '}', '+', '-', '^', '~', '*',
    '!', '\\', '/', '<', '>', '=',
];

/// A documentation page or section as stored in the index.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexDocument {
    pub id: String,
    pub source_id: String,
    pub path: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub body: String,
    pub heading_level: u8,
}

impl IndexDocument {
    pub fn to_candidate(&self, raw_score: f32) -> CandidateDocument {
        CandidateDocument {
            id: self.id.clone(),
            source_id: self.source_id.clone(),
            path: self.path.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            keywords: self.keywords.clone(),
            heading_level: self.heading_level,
            raw_score,
        }
    }
}

/// Manages the Tantivy full-text index over all documentation sources.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub doc_id: Field,
    pub source_id: Field,
    pub path: Field,
    pub title: Field,
    pub description: Field,
    pub keywords: Field,
    pub body: Field,
    pub heading_level: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);
    let source_id =
        builder.add_text_field(fields::SOURCE_ID, STRING | STORED | FAST);
    let path = builder.add_text_field(fields::PATH, STRING | STORED);

    let indexing = TextFieldIndexing::default()
        .set_tokenizer("en_stem")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let stored_text = TextOptions::default()
        .set_indexing_options(indexing.clone())
        .set_stored();

    let title = builder.add_text_field(fields::TITLE, stored_text.clone());
    let description =
        builder.add_text_field(fields::DESCRIPTION, stored_text.clone());
    let keywords = builder.add_text_field(fields::KEYWORDS, stored_text);
    let body = builder.add_text_field(
        fields::BODY,
        TextOptions::default().set_indexing_options(indexing),
    );

    let heading_level =
        builder.add_u64_field(fields::HEADING_LEVEL, STORED | FAST);

    let schema = builder.build();
    let fields = SchemaFields {
        doc_id,
        source_id,
        path,
        title,
        description,
        keywords,
        body,
        heading_level,
    };

    (schema, fields)
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    Ok(SchemaFields {
        doc_id: schema.get_field(fields::DOC_ID)?,
        source_id: schema.get_field(fields::SOURCE_ID)?,
        path: schema.get_field(fields::PATH)?,
        title: schema.get_field(fields::TITLE)?,
        description: schema.get_field(fields::DESCRIPTION)?,
        keywords: schema.get_field(fields::KEYWORDS)?,
        body: schema.get_field(fields::BODY)?,
        heading_level: schema.get_field(fields::HEADING_LEVEL)?,
    })
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

/// Replace query-parser syntax with spaces so identifiers such as
/// `m:Button` or `/ui5/sap.m` search as plain words.
fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if QUERY_SYNTAX.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl SearchIndex {
    /// Open or create a search index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, _) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        // An index written by an older layout lacks some fields.
        let fields = resolve_fields(&index.schema()).map_err(|e| {
            Error::Config(format!(
                "index at {} does not match this version ({e}); \
                 delete it and ingest again",
                dir.display()
            ))
        })?;
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Create an in-memory search index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add a document, replacing any earlier one with the same id.
    pub fn add_document(
        &self,
        writer: &IndexWriter,
        document: &IndexDocument,
    ) -> Result<()> {
        let f = self.fields;

        writer.delete_term(Term::from_field_text(f.doc_id, &document.id));

        let mut tantivy_doc = doc!(
            f.doc_id => document.id.as_str(),
            f.source_id => document.source_id.as_str(),
            f.path => document.path.as_str(),
            f.title => document.title.as_str(),
            f.description => document.description.as_str(),
            f.body => document.body.as_str(),
            f.heading_level => u64::from(document.heading_level),
        );
        for keyword in &document.keywords {
            tantivy_doc.add_text(f.keywords, keyword);
        }
        writer.add_document(tantivy_doc)?;

        Ok(())
    }

    /// Delete all documents belonging to a source.
    pub fn delete_source(&self, writer: &IndexWriter, source_id: &str) {
        let term = Term::from_field_text(self.fields.source_id, source_id);
        writer.delete_term(term);
    }

    /// Delete a single document by id.
    pub fn delete_document(&self, writer: &IndexWriter, doc_id: &str) {
        let term = Term::from_field_text(self.fields.doc_id, doc_id);
        writer.delete_term(term);
    }

    /// Number of documents, optionally restricted to one source.
    pub fn count(&self, source_id: Option<&str>) -> Result<usize> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();
        let count = match source_id {
            Some(source) => {
                let term = Term::from_field_text(self.fields.source_id, source);
                let query = TermQuery::new(term, IndexRecordOption::Basic);
                searcher.search(&query, &Count)?
            }
            None => searcher.search(&AllQuery, &Count)?,
        };
        Ok(count)
    }

    /// BM25 search over title (boosted 2x), description, keywords, and
    /// body, restricted to `sources` when that is non-empty.
    pub fn search(
        &self,
        query_str: &str,
        sources: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateDocument>> {
        let query_str = sanitize_query(query_str);
        if query_str.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields;
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.title, f.description, f.keywords, f.body],
        );
        parser.set_field_boost(f.title, 2.0);
        let (user_query, _errors) = parser.parse_query_lenient(&query_str);

        let query: Box<dyn Query> = if sources.is_empty() {
            user_query
        } else {
            let source_clauses: Vec<(Occur, Box<dyn Query>)> = sources
                .iter()
                .map(|source| {
                    let term = Term::from_field_text(f.source_id, source);
                    let query: Box<dyn Query> = Box::new(TermQuery::new(
                        term,
                        IndexRecordOption::Basic,
                    ));
                    (Occur::Should, query)
                })
                .collect();
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, user_query),
                (Occur::Must, Box::new(BooleanQuery::new(source_clauses))),
            ]))
        };

        let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(CandidateDocument {
                id: extract_text(&doc, f.doc_id),
                source_id: extract_text(&doc, f.source_id),
                path: extract_text(&doc, f.path),
                title: extract_text(&doc, f.title),
                description: extract_text(&doc, f.description),
                keywords: extract_all_text(&doc, f.keywords),
                heading_level: u8::try_from(extract_u64(&doc, f.heading_level))
                    .unwrap_or(u8::MAX),
                raw_score: score,
            });
        }

        Ok(results)
    }
}

impl Retriever for SearchIndex {
    fn score_order(&self) -> ScoreOrder {
        ScoreOrder::HigherIsBetter
    }

    fn retrieve(
        &self,
        query: &str,
        sources: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateDocument>> {
        self.search(query, sources, limit)
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_all_text(doc: &TantivyDocument, field: Field) -> Vec<String> {
    doc.get_all(field)
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
