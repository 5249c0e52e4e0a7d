use std::{collections::BTreeMap, path::Path};

use rayon::prelude::*;
use tantivy::IndexWriter;
use tracing::{debug, info};

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    tantivy_index::{IndexDocument, SearchIndex},
};

/// Documents loaded per source by one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub per_source: BTreeMap<String, usize>,
}

/// Pick a title when the record has none.
///
/// Looks for the first markdown heading in the body, then falls back to
/// the last path segment without extension.
fn fallback_title(body: &str, path: &str) -> String {
    for line in body.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Parse one JSON line into a document, filling in the id and title.
fn parse_record(line_number: usize, line: &str) -> Result<IndexDocument> {
    let mut doc: IndexDocument =
        serde_json::from_str(line).map_err(|e| Error::Ingest {
            line: line_number,
            message: e.to_string(),
        })?;

    doc.source_id = doc.source_id.trim().to_string();
    if doc.source_id.is_empty() {
        return Err(Error::Ingest {
            line: line_number,
            message: "missing sourceId".to_string(),
        });
    }
    if doc.path.is_empty() && doc.id.is_empty() {
        return Err(Error::Ingest {
            line: line_number,
            message: "a record needs a path or an id".to_string(),
        });
    }
    if doc.id.is_empty() {
        doc.id = DocumentId::new(&doc.source_id, &doc.path).to_string();
    }
    if doc.title.trim().is_empty() {
        doc.title = fallback_title(&doc.body, &doc.path);
    }
    Ok(doc)
}

/// Parse a JSON-lines dump. Blank lines are skipped; any malformed line
/// fails the whole batch.
pub fn parse_records(text: &str) -> Result<Vec<IndexDocument>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| (i + 1, line))
        .collect();

    lines
        .par_iter()
        .map(|(line_number, line)| parse_record(*line_number, line))
        .collect()
}

/// Add `docs` to the index and commit.
///
/// With `replace_sources`, every source that appears in `docs` is emptied
/// first, so documents missing from the dump disappear from the index.
pub fn ingest_documents(
    index: &SearchIndex,
    writer: &mut IndexWriter,
    docs: &[IndexDocument],
    replace_sources: bool,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    for doc in docs {
        *summary.per_source.entry(doc.source_id.clone()).or_default() += 1;
    }

    if replace_sources {
        for source_id in summary.per_source.keys() {
            debug!(source = %source_id, "clearing source before ingest");
            index.delete_source(writer, source_id);
        }
    }

    for doc in docs {
        index.add_document(writer, doc)?;
    }
    writer.commit()?;

    summary.documents = docs.len();
    Ok(summary)
}

/// Load a JSON-lines file into the index.
pub fn ingest_file(
    index: &SearchIndex,
    writer: &mut IndexWriter,
    path: &Path,
    replace_sources: bool,
) -> Result<IngestSummary> {
    let text = std::fs::read_to_string(path)?;
    let docs = parse_records(&text)?;
    let summary = ingest_documents(index, writer, &docs, replace_sources)?;
    info!(
        path = %path.display(),
        documents = summary.documents,
        sources = summary.per_source.len(),
        "ingested documents"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r##"
{"sourceId": "ui5-api", "path": "sap.m.Wizard", "title": "Wizard", "keywords": ["Wizard"], "body": "A wizard control"}
{"sourceId": "ui5-api", "path": "sap.m.Button", "body": "# Button\n\nA button control", "headingLevel": 0}

{"id": "cap:custom", "sourceId": "cap", "path": "guides/services.md", "description": "Service definitions", "body": "cds services"}
"##;

    #[test]
    fn fallback_title_prefers_heading() {
        assert_eq!(fallback_title("# Button\n\nbody", "x.md"), "Button");
        assert_eq!(fallback_title("# \nplain", "guides/services.md"), "services");
        assert_eq!(fallback_title("", "sap.m.Table"), "sap.m");
        assert_eq!(fallback_title("", ""), "untitled");
    }

    #[test]
    fn parses_records_and_fills_defaults() {
        let docs = parse_records(DUMP).unwrap();
        assert_eq!(docs.len(), 3);

        assert_eq!(docs[0].title, "Wizard");
        assert_eq!(
            docs[0].id,
            DocumentId::new("ui5-api", "sap.m.Wizard").to_string()
        );
        assert_eq!(docs[1].title, "Button");
        assert_eq!(docs[2].id, "cap:custom");
        assert_eq!(docs[2].title, "services");
        assert_eq!(docs[2].description, "Service definitions");
    }

    #[test]
    fn reports_the_failing_line() {
        let text = "{\"sourceId\": \"a\", \"path\": \"x\"}\n\n{not json}\n";
        match parse_records(text) {
            Err(Error::Ingest { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected ingest error, got {other:?}"),
        }

        match parse_records("{\"path\": \"x\"}") {
            Err(Error::Ingest { line: 1, message }) => {
                assert!(message.contains("sourceId"));
            }
            other => panic!("expected missing sourceId, got {other:?}"),
        }
    }

    #[test]
    fn ingest_and_search() {
        let index = SearchIndex::open_in_ram().unwrap();
        let mut writer = index.writer(15_000_000).unwrap();
        let docs = parse_records(DUMP).unwrap();

        let summary = ingest_documents(&index, &mut writer, &docs, false).unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.per_source.get("ui5-api"), Some(&2));
        assert_eq!(summary.per_source.get("cap"), Some(&1));

        let results = index.search("button", &[], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Button");
        assert_eq!(results[0].source_id, "ui5-api");
    }

    #[test]
    fn replace_sources_drops_stale_documents() {
        let index = SearchIndex::open_in_ram().unwrap();
        let mut writer = index.writer(15_000_000).unwrap();
        ingest_documents(&index, &mut writer, &parse_records(DUMP).unwrap(), false)
            .unwrap();

        let update = parse_records(
            r#"{"sourceId": "ui5-api", "path": "sap.m.Table", "title": "Table"}"#,
        )
        .unwrap();
        ingest_documents(&index, &mut writer, &update, true).unwrap();

        assert_eq!(index.count(Some("ui5-api")).unwrap(), 1);
        assert_eq!(index.count(Some("cap")).unwrap(), 1);
    }

    #[test]
    fn ingest_file_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dump.jsonl");
        std::fs::write(&path, DUMP).unwrap();

        let index = SearchIndex::open_in_ram().unwrap();
        let mut writer = index.writer(15_000_000).unwrap();
        let summary = ingest_file(&index, &mut writer, &path, false).unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(index.count(None).unwrap(), 3);
    }
}
