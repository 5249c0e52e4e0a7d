//! Candidate scoring: match tiers, static boosts, and context multipliers.
//!
//! Every tier owns a band of [`TIER_SPAN`] points starting at its floor.
//! The within-tier score is built from match quality, the engine's raw
//! relevance, the source's static boost, and the dialect bonus, then
//! multiplied by the context multiplier and mapped into the band by a
//! strictly increasing curve that never reaches the band's top. A
//! candidate in a higher tier therefore always outscores one in a lower
//! tier, whatever the boosts, and relevance still orders candidates whose
//! boosts are large.
//!
//! Candidates the engine returned that match no tier (typically a hit in
//! body text, which is not kept for tier detection) are ranked at the
//! bottom of the fuzzy band rather than dropped.

use std::collections::HashSet;

use serde::Serialize;

use crate::{
    classify::ContextLabel,
    config::RankingConfig,
    flavor::DialectSelection,
    retriever::{CandidateDocument, ScoreOrder},
    similarity,
    text_util,
};

/// Width of each tier's score band.
pub const TIER_SPAN: f32 = 1000.0;

/// Highest score any result can reach.
pub const MAX_SCORE: f32 = 9.0 * TIER_SPAN - 1.0;

/// Fuzzy matches below this similarity are not matches at all.
pub const FUZZY_THRESHOLD: f32 = 50.0;

/// Discount applied to fuzzy similarity relative to an exact match.
const FUZZY_DISCOUNT: f32 = 0.6;

/// Points per unit of match quality (quality is 0..=100).
const QUALITY_WEIGHT: f32 = 2.0;

/// Within-tier points that land at the middle of the band.
const BAND_KNEE: f32 = 500.0;

/// Upper bound of the raw-relevance contribution.
const RELEVANCE_CAP: f32 = 100.0;

/// Minimum share of query words found in the title for the overlap tier.
const MIN_OVERLAP_RATIO: f32 = 0.6;

/// How strongly a candidate's title or content matches the query.
///
/// Declared from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "tier")]
pub enum MatchTier {
    /// Title equals the query. Shallower headings rank higher.
    #[serde(rename_all = "camelCase")]
    ExactTitle { heading_level: u8 },
    HighWordOverlap,
    TitleContainsQuery,
    QueryContainsTitle,
    ExactKeyword,
    ContentContainsQuery,
    FuzzyPartial,
}

impl MatchTier {
    /// Position on the tier ladder; higher is stronger.
    pub fn rank(self) -> u8 {
        match self {
            Self::ExactTitle { heading_level: 0 } => 8,
            Self::ExactTitle { heading_level: 1 } => 7,
            Self::ExactTitle { .. } => 6,
            Self::HighWordOverlap => 5,
            Self::TitleContainsQuery => 4,
            Self::QueryContainsTitle => 3,
            Self::ExactKeyword => 2,
            Self::ContentContainsQuery => 1,
            Self::FuzzyPartial => 0,
        }
    }

    pub fn floor(self) -> f32 {
        f32::from(self.rank()) * TIER_SPAN
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ExactTitle { .. } => "exact-title",
            Self::HighWordOverlap => "word-overlap",
            Self::TitleContainsQuery => "title-contains-query",
            Self::QueryContainsTitle => "query-contains-title",
            Self::ExactKeyword => "exact-keyword",
            Self::ContentContainsQuery => "content-contains-query",
            Self::FuzzyPartial => "fuzzy",
        }
    }
}

/// A candidate with its final score and the reasons for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    #[serde(flatten)]
    pub candidate: CandidateDocument,
    pub library_id: String,
    pub url: Option<String>,
    pub match_tier: MatchTier,
    pub final_score: f32,
    pub context_label: ContextLabel,
}

/// Lowercased candidate fields, computed once per candidate.
struct PreparedDoc {
    title: String,
    title_tokens: HashSet<String>,
    description: String,
    keywords: Vec<String>,
    heading_level: u8,
}

impl PreparedDoc {
    fn new(candidate: &CandidateDocument) -> Self {
        let title = text_util::normalize(&candidate.title);
        Self {
            title_tokens: text_util::tokens(&title).into_iter().collect(),
            title,
            description: text_util::normalize(&candidate.description),
            keywords: candidate
                .keywords
                .iter()
                .map(|k| text_util::normalize(k))
                .filter(|k| !k.is_empty())
                .collect(),
            heading_level: candidate.heading_level,
        }
    }
}

/// Detect the strongest tier `query` reaches on `doc`, with a 0..=100
/// quality figure that orders matches inside the tier.
fn detect_tier(query: &str, doc: &PreparedDoc) -> Option<(MatchTier, f32)> {
    if query.is_empty() {
        return None;
    }
    let query_len = query.chars().count();
    let title_len = doc.title.chars().count();

    if !doc.title.is_empty() && doc.title == query {
        return Some((
            MatchTier::ExactTitle {
                heading_level: doc.heading_level,
            },
            100.0,
        ));
    }

    let mut query_words: Vec<String> = Vec::new();
    for token in text_util::tokens(query) {
        if token.chars().count() > 2 && !query_words.contains(&token) {
            query_words.push(token);
        }
    }
    if !query_words.is_empty() {
        let overlap = query_words
            .iter()
            .filter(|w| doc.title_tokens.contains(*w))
            .count();
        let ratio = overlap as f32 / query_words.len() as f32;
        if overlap >= 2 && ratio >= MIN_OVERLAP_RATIO {
            return Some((MatchTier::HighWordOverlap, ratio * 100.0));
        }
    }

    if query_len > 5 && doc.title.contains(query) {
        let quality = 100.0 * query_len as f32 / title_len.max(1) as f32;
        return Some((MatchTier::TitleContainsQuery, quality));
    }

    if title_len > 5 && query.contains(doc.title.as_str()) {
        let quality = 100.0 * title_len as f32 / query_len as f32;
        return Some((MatchTier::QueryContainsTitle, quality));
    }

    if doc.keywords.iter().any(|k| k == query) {
        return Some((MatchTier::ExactKeyword, 100.0));
    }

    if doc.keywords.iter().any(|k| k.contains(query)) {
        return Some((MatchTier::ContentContainsQuery, 100.0));
    }
    if text_util::contains_phrase(&doc.title, query) {
        return Some((MatchTier::ContentContainsQuery, 80.0));
    }
    if doc.description.contains(query) {
        return Some((MatchTier::ContentContainsQuery, 60.0));
    }

    let similarity = similarity::partial_ratio(query, &doc.title);
    if similarity > FUZZY_THRESHOLD {
        return Some((MatchTier::FuzzyPartial, similarity * FUZZY_DISCOUNT));
    }

    None
}

/// Map an engine score onto `0..RELEVANCE_CAP`, best results highest.
pub fn relevance_bonus(raw: f32, order: ScoreOrder) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let raw = raw.max(0.0);
    match order {
        ScoreOrder::HigherIsBetter => RELEVANCE_CAP * raw / (raw + 1.0),
        ScoreOrder::LowerIsBetter => RELEVANCE_CAP / (raw + 1.0),
    }
}

/// Map within-tier points onto `0..TIER_SPAN - 1`, keeping their order.
fn into_band(points: f32) -> f32 {
    let points = if points.is_finite() { points.max(0.0) } else { 0.0 };
    (TIER_SPAN - 1.0) * points / (points + BAND_KNEE)
}

/// Scores candidates for one query in one context.
pub struct Scorer<'a> {
    config: &'a RankingConfig,
    context: ContextLabel,
    order: ScoreOrder,
    original: String,
    queries: Vec<String>,
    dialects: Vec<DialectSelection>,
}

impl<'a> Scorer<'a> {
    /// `variants` are matched in order after the original query; duplicates
    /// after normalization are ignored.
    pub fn new(
        config: &'a RankingConfig,
        context: ContextLabel,
        order: ScoreOrder,
        original: &str,
        variants: &[String],
    ) -> Self {
        let original = text_util::normalize(original);
        let mut queries: Vec<String> = Vec::with_capacity(variants.len() + 1);
        for text in std::iter::once(original.as_str())
            .chain(variants.iter().map(String::as_str))
        {
            let normalized = text_util::normalize(text);
            if !normalized.is_empty() && !queries.contains(&normalized) {
                queries.push(normalized);
            }
        }
        Self {
            config,
            context,
            order,
            original,
            queries,
            dialects: Vec::new(),
        }
    }

    /// Enable the dialect bonus for explicitly requested dialects.
    ///
    /// The query with those dialects' keywords removed also becomes a
    /// query form, so "LOOP cloud" can match a page titled "LOOP AT".
    pub fn with_dialects(mut self, selections: Vec<DialectSelection>) -> Self {
        let mut stripped = format!(" {} ", self.original);
        for selection in selections.iter().filter(|s| s.explicit) {
            let keywords = selection.dialect.as_deref().and_then(|dialect| {
                self.config
                    .dialect_keywords
                    .get(&selection.group)?
                    .get(dialect)
            });
            for keyword in keywords.into_iter().flatten() {
                stripped = stripped.replace(&format!(" {keyword} "), " ");
            }
        }
        let stripped = text_util::normalize(&stripped);
        if !stripped.is_empty() && !self.queries.contains(&stripped) {
            self.queries.push(stripped);
        }

        self.dialects = selections;
        self
    }

    pub fn context(&self) -> &ContextLabel {
        &self.context
    }

    /// Best tier over all query forms, preferring earlier forms on ties.
    pub fn match_tier(&self, candidate: &CandidateDocument) -> Option<(MatchTier, f32)> {
        let doc = PreparedDoc::new(candidate);
        let mut best: Option<(MatchTier, f32)> = None;
        for query in &self.queries {
            if let Some((tier, quality)) = detect_tier(query, &doc) {
                let better = best.is_none_or(|(best_tier, best_quality)| {
                    (tier.rank(), quality) > (best_tier.rank(), best_quality)
                });
                if better {
                    best = Some((tier, quality));
                }
            }
        }
        best
    }

    /// Context multiplier for `source_id`, after penalty overrides.
    ///
    /// `None` when the source is hard-excluded in this context.
    pub fn multiplier(&self, source_id: &str) -> Option<f32> {
        let Some(multiplier) =
            self.config.context_multiplier(self.context.as_str(), source_id)
        else {
            return Some(1.0);
        };
        if multiplier == 0.0 {
            return None;
        }
        if multiplier < 1.0 && self.penalty_waived(source_id) {
            return Some(1.0);
        }
        Some(multiplier)
    }

    fn penalty_waived(&self, source_id: &str) -> bool {
        let Some(source) = self.config.source(source_id) else {
            return false;
        };
        source.tags.iter().any(|tag| {
            self.config
                .penalty_override_keywords(self.context.as_str(), tag)
                .is_some_and(|keywords| {
                    keywords
                        .iter()
                        .any(|k| text_util::contains_phrase(&self.original, k))
                })
        })
    }

    fn dialect_bonus(&self, source_id: &str) -> f32 {
        let Some(source) = self.config.source(source_id) else {
            return 0.0;
        };
        let (Some(group), Some(dialect)) =
            (source.dialect_group.as_deref(), source.dialect.as_deref())
        else {
            return 0.0;
        };
        let requested = self.dialects.iter().any(|s| {
            s.explicit && s.group == group && s.dialect.as_deref() == Some(dialect)
        });
        if requested { self.config.dialect_boost } else { 0.0 }
    }

    /// Score one candidate.
    ///
    /// Returns `None` when its source is excluded in this context. A
    /// candidate that matches no tier is kept as a zero-quality fuzzy match.
    pub fn score(&self, candidate: CandidateDocument) -> Option<ScoredResult> {
        let multiplier = self.multiplier(&candidate.source_id)?;
        let (tier, quality) = self
            .match_tier(&candidate)
            .unwrap_or((MatchTier::FuzzyPartial, 0.0));

        let within = (quality.clamp(0.0, 100.0) * QUALITY_WEIGHT
            + relevance_bonus(candidate.raw_score, self.order)
            + self.config.static_boost(&candidate.source_id)
            + self.dialect_bonus(&candidate.source_id))
            * multiplier;
        let final_score = (tier.floor() + into_band(within)).clamp(0.0, MAX_SCORE);

        let source = self.config.source(&candidate.source_id);
        let library_id = source
            .map_or(candidate.source_id.as_str(), |s| s.library_id())
            .to_string();
        let url = source.and_then(|s| s.url_for(&candidate.path, &candidate.id));

        Some(ScoredResult {
            candidate,
            library_id,
            url,
            match_tier: tier,
            final_score,
            context_label: self.context.clone(),
        })
    }

    pub fn score_all(&self, candidates: Vec<CandidateDocument>) -> Vec<ScoredResult> {
        candidates
            .into_iter()
            .filter_map(|candidate| self.score(candidate))
            .collect()
    }
}
