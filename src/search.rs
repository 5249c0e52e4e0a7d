use std::{
    io::{self, Write},
    sync::Arc,
    time::{Duration, Instant},
};

use globset::Glob;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    classify::{ContextClassifier, ContextLabel},
    config::RankingConfig,
    error::Result,
    expand::QueryExpander,
    flavor::FlavorFilter,
    retriever::{CandidateRetriever, Retriever},
    score::{ScoredResult, Scorer},
    select::{self, SelectionLimits},
};

/// Caller-tunable knobs for one search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Overrides `selection.maxTotal`.
    pub max_total: Option<usize>,
    /// Overrides the context-dependent per-source cap.
    pub max_per_source: Option<usize>,
    /// Glob patterns over source ids and library ids; empty means all.
    pub sources: Vec<String>,
    /// Code or markup the query is about; identifiers found in it become
    /// extra variants.
    pub content: Option<String>,
    pub min_score: f32,
    /// Bound on the whole retrieval stage.
    pub timeout: Option<Duration>,
}

/// Why a search came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyReason {
    /// Every retrieval call failed or timed out.
    RetrievalUnavailable,
    /// The index returned nothing for any variant.
    NoCandidates,
    /// The source filter matched no source.
    NoMatchingSources,
    /// Candidates were found but none survived scoring and filtering.
    NoResults,
}

impl EmptyReason {
    /// A short suggestion for refining the query.
    pub fn hint(self) -> &'static str {
        match self {
            Self::RetrievalUnavailable => {
                "The search index could not be queried. Check it with \
                 `docmux status` and try again."
            }
            Self::NoCandidates => {
                "Nothing in the index matched. Try fewer or more general words."
            }
            Self::NoMatchingSources => {
                "No configured source matches the source filter. Run \
                 `docmux status` to list sources."
            }
            Self::NoResults => {
                "Some pages were found but none matched closely enough. Try \
                 the exact API, class, or page name."
            }
        }
    }
}

/// Everything one search produced, including why it is empty if it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub query: String,
    pub context: ContextLabel,
    pub variants: Vec<String>,
    pub results: Vec<ScoredResult>,
    pub reason: Option<EmptyReason>,
    /// Variant calls that failed or timed out.
    pub failed_variants: usize,
}

impl SearchOutcome {
    fn empty(query: &str, variants: Vec<String>, reason: EmptyReason) -> Self {
        Self {
            query: query.to_string(),
            context: ContextLabel::Mixed,
            variants,
            results: Vec::new(),
            reason: Some(reason),
            failed_variants: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// The ranking pipeline bound to one configuration and one engine.
pub struct Searcher<'a> {
    config: &'a RankingConfig,
    retriever: Arc<dyn Retriever>,
}

impl<'a> Searcher<'a> {
    pub fn new(config: &'a RankingConfig, retriever: Arc<dyn Retriever>) -> Self {
        Self { config, retriever }
    }

    /// Run the full pipeline for `query`.
    ///
    /// 1. Expand the query into variants
    /// 2. Retrieve and merge candidates for every variant
    /// 3. Classify the query's context
    /// 4. Score, then drop sibling dialects and low scores
    /// 5. Deduplicate and apply diversity caps
    ///
    /// Never fails: problems on the way show up as an [`EmptyReason`].
    pub fn search(&self, query: &str, options: &SearchOptions) -> SearchOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SearchOutcome::empty(query, Vec::new(), EmptyReason::NoCandidates);
        }

        let Some(sources) = self.resolve_sources(&options.sources) else {
            return SearchOutcome::empty(
                query,
                Vec::new(),
                EmptyReason::NoMatchingSources,
            );
        };

        let variants = QueryExpander::new(self.config)
            .expand_with_content(query, options.content.as_deref());

        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let retrieval = CandidateRetriever::new(Arc::clone(&self.retriever), &self.config.retrieval)
            .collect(&variants, &sources, deadline);
        let failed_variants = retrieval.failed;

        if retrieval.unavailable {
            let mut outcome =
                SearchOutcome::empty(query, variants, EmptyReason::RetrievalUnavailable);
            outcome.failed_variants = failed_variants;
            return outcome;
        }

        let context = ContextClassifier::new(self.config).classify(query, &variants);

        let mut outcome = SearchOutcome {
            query: query.to_string(),
            context: context.clone(),
            variants: Vec::new(),
            results: Vec::new(),
            reason: None,
            failed_variants,
        };
        if retrieval.candidates.is_empty() {
            outcome.variants = variants;
            outcome.reason = Some(EmptyReason::NoCandidates);
            return outcome;
        }

        let flavor = FlavorFilter::new(self.config);
        let selections = flavor.detect(query);
        let scorer = Scorer::new(
            self.config,
            context.clone(),
            self.retriever.score_order(),
            query,
            &variants,
        )
        .with_dialects(selections.clone());

        let mut scored = flavor.apply(scorer.score_all(retrieval.candidates), &selections);
        scored.retain(|r| r.final_score >= options.min_score);

        let limits = SelectionLimits::for_context(
            &self.config.selection,
            &context,
            options.max_total,
            options.max_per_source,
        );
        outcome.results = select::select(scored, limits);
        outcome.variants = variants;
        if outcome.results.is_empty() {
            outcome.reason = Some(EmptyReason::NoResults);
        }

        info!(
            query,
            context = %outcome.context,
            results = outcome.results.len(),
            failed_variants,
            "search finished"
        );
        outcome
    }

    /// Map source patterns to concrete source ids.
    ///
    /// An empty list means "all sources" and maps to an empty filter. A
    /// pattern without glob syntax that matches no registered source is
    /// kept as a literal id, so unregistered sources in the index stay
    /// reachable. `None` when nothing matches at all.
    fn resolve_sources(&self, patterns: &[String]) -> Option<Vec<String>> {
        if patterns.is_empty() {
            return Some(Vec::new());
        }

        let mut ids: Vec<String> = Vec::new();
        for pattern in patterns {
            let matcher = match Glob::new(pattern) {
                Ok(glob) => glob.compile_matcher(),
                Err(error) => {
                    warn!(pattern, %error, "ignoring invalid source pattern");
                    continue;
                }
            };

            let mut matched = false;
            for source in &self.config.sources {
                if matcher.is_match(&source.id)
                    || matcher.is_match(source.library_id())
                {
                    matched = true;
                    if !ids.contains(&source.id) {
                        ids.push(source.id.clone());
                    }
                }
            }

            let literal = !pattern.contains(['*', '?', '[', '{']);
            if !matched && literal && !ids.contains(pattern) {
                ids.push(pattern.clone());
            }
        }

        if ids.is_empty() { None } else { Some(ids) }
    }
}

/// Search `primary`, and repeat against `fallback` when the primary
/// engine could not answer at all.
pub fn search_with_fallback(
    config: &RankingConfig,
    primary: Arc<dyn Retriever>,
    fallback: Arc<dyn Retriever>,
    query: &str,
    options: &SearchOptions,
) -> SearchOutcome {
    let outcome = Searcher::new(config, primary).search(query, options);
    if outcome.reason != Some(EmptyReason::RetrievalUnavailable) {
        return outcome;
    }

    warn!(query, "primary retrieval unavailable; using fallback");
    let mut retried = Searcher::new(config, fallback).search(query, options);
    retried.failed_variants += outcome.failed_variants;
    retried
}

/// Write results for human-readable terminal output.
pub fn write_human(out: &mut impl Write, outcome: &SearchOutcome) -> io::Result<()> {
    if outcome.is_empty() {
        writeln!(out, "No results found.")?;
        if let Some(reason) = outcome.reason {
            writeln!(out, "hint: {}", reason.hint())?;
        }
        return Ok(());
    }

    for (i, r) in outcome.results.iter().enumerate() {
        writeln!(
            out,
            "{:>3}. [{:.1}] {}:{} ({})",
            i + 1,
            r.final_score,
            r.library_id,
            r.candidate.path,
            r.match_tier.name()
        )?;
        if !r.candidate.title.is_empty() {
            writeln!(out, "     {}", r.candidate.title)?;
        }
        if let Some(url) = &r.url {
            writeln!(out, "     {url}")?;
        }
    }
    writeln!(
        out,
        "\n{} result(s), context: {}",
        outcome.results.len(),
        outcome.context
    )?;
    if outcome.failed_variants > 0 {
        writeln!(
            out,
            "warning: {} query variant(s) failed; results may be incomplete",
            outcome.failed_variants
        )?;
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonResult<'a> {
    rank: usize,
    #[serde(flatten)]
    result: &'a ScoredResult,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonOutcome<'a> {
    query: &'a str,
    context: &'a ContextLabel,
    variants: &'a [String],
    result_count: usize,
    results: Vec<JsonResult<'a>>,
    reason: Option<EmptyReason>,
    hint: Option<&'static str>,
    failed_variants: usize,
}

/// Render an outcome as a JSON document.
pub fn format_json(outcome: &SearchOutcome) -> Result<String> {
    let view = JsonOutcome {
        query: &outcome.query,
        context: &outcome.context,
        variants: &outcome.variants,
        result_count: outcome.results.len(),
        results: outcome
            .results
            .iter()
            .enumerate()
            .map(|(i, result)| JsonResult { rank: i + 1, result })
            .collect(),
        reason: outcome.reason,
        hint: outcome.reason.map(EmptyReason::hint),
        failed_variants: outcome.failed_variants,
    };
    Ok(serde_json::to_string_pretty(&view)?)
}
