//! Ranking configuration: the source registry plus every table that drives
//! expansion, classification, and scoring.
//!
//! The configuration is a versioned JSON document. It is loaded once,
//! validated, and never mutated afterwards. Load failures degrade to
//! [`RankingConfig::default`], which carries no sources, no synonyms, and
//! no boosts, so base retrieval keeps working un-boosted.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    marker::PhantomData,
    path::Path,
    sync::OnceLock,
};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{
    Deserialize,
    Deserializer,
    de::{MapAccess, Visitor},
};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    text_util,
};

/// Highest configuration schema version this build understands.
pub const CONFIG_VERSION: u32 = 1;

/// Context label used when no indicator term matches the query.
pub const MIXED_CONTEXT: &str = "mixed";

/// Characters escaped when substituting values into a URL path.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

static GLOBAL: OnceLock<RankingConfig> = OnceLock::new();

/// Load the process-wide configuration from `path` on first call.
///
/// Later calls return the instance loaded by the first one, whatever path
/// they pass.
pub fn init_global(path: &Path) -> &'static RankingConfig {
    GLOBAL.get_or_init(|| RankingConfig::load_or_default(path))
}

/// The process-wide configuration, loading it lazily from `DOCMUX_CONFIG`
/// (or falling back to defaults) if [`init_global`] was never called.
pub fn global() -> &'static RankingConfig {
    GLOBAL.get_or_init(|| match std::env::var("DOCMUX_CONFIG") {
        Ok(path) => RankingConfig::load_or_default(Path::new(&path)),
        Err(_) => RankingConfig::default(),
    })
}

/// A JSON object deserialized with its declaration order preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.0.iter_mut().map(|(_, v)| v)
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<V> OrderedMap<V> {
    /// Insert or replace, keeping the original position of an existing key.
    fn insert(&mut self, key: String, value: V) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = OrderedMap(Vec::with_capacity(
                    access.size_hint().unwrap_or(0),
                ));
                while let Some((key, value)) =
                    access.next_entry::<String, V>()?
                {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// One physical documentation source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub id: String,
    /// Public namespace; several sources may present as one library.
    #[serde(default)]
    pub library_id: Option<String>,
    #[serde(default)]
    pub static_boost: f32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Sources sharing a group are mutually exclusive dialects.
    #[serde(default)]
    pub dialect_group: Option<String>,
    /// This source's member name within its dialect group.
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub url_template: Option<String>,
}

impl SourceDescriptor {
    pub fn library_id(&self) -> &str {
        self.library_id.as_deref().unwrap_or(&self.id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Build a link for a document of this source.
    ///
    /// Supports `{path}`, `{id}`, and `{library}` placeholders. `{path}`
    /// keeps its slashes; every value is percent-encoded.
    pub fn url_for(&self, path: &str, doc_id: &str) -> Option<String> {
        let template = self.url_template.as_deref()?;
        let encode = |s: &str| utf8_percent_encode(s, PATH_SEGMENT).to_string();
        Some(
            template
                .replace("{path}", &encode(path))
                .replace("{id}", &encode(doc_id).replace('/', "%2F"))
                .replace("{library}", &encode(self.library_id())),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SynonymEntry {
    pub from: String,
    pub to: Vec<String>,
}

/// Per-variant retrieval budgets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalSettings {
    /// Number of leading variants treated as authoritative.
    pub primary_variants: usize,
    pub primary_limit: usize,
    pub supplementary_limit: usize,
    /// Max new candidates a supplementary variant may add to a crowded pool.
    pub admission_cap: usize,
    pub crowded_pool_size: usize,
    pub target_pool_size: usize,
    /// Dispatch variant calls on the rayon pool instead of one by one.
    pub parallel: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            primary_variants: 3,
            primary_limit: 150,
            supplementary_limit: 50,
            admission_cap: 30,
            crowded_pool_size: 100,
            target_pool_size: 300,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionSettings {
    pub max_total: usize,
    /// Per-source cap when the query classifies as mixed.
    pub mixed_per_source: usize,
    /// Per-source cap when one context dominates.
    pub focused_per_source: usize,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            max_total: 10,
            mixed_per_source: 3,
            focused_per_source: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpansionSettings {
    pub max_variants: usize,
}

impl Default for ExpansionSettings {
    fn default() -> Self {
        Self { max_variants: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RankingConfig {
    pub version: u32,
    pub sources: Vec<SourceDescriptor>,
    pub synonyms: Vec<SynonymEntry>,
    pub acronyms: OrderedMap<Vec<String>>,
    /// Context label -> (source id -> multiplier).
    pub context_boosts: HashMap<String, HashMap<String, f32>>,
    pub context_indicator_terms: OrderedMap<Vec<String>>,
    /// Context label -> (other domain tag -> keywords that waive penalties).
    pub penalty_overrides: HashMap<String, HashMap<String, Vec<String>>>,
    /// Dialect group -> (dialect -> keywords).
    pub dialect_keywords: OrderedMap<OrderedMap<Vec<String>>>,
    pub dialect_defaults: HashMap<String, String>,
    /// Within-tier bonus for sources of an explicitly requested dialect.
    pub dialect_boost: f32,
    pub retrieval: RetrievalSettings,
    pub selection: SelectionSettings,
    pub expansion: ExpansionSettings,
    #[serde(skip)]
    source_index: HashMap<String, usize>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sources: Vec::new(),
            synonyms: Vec::new(),
            acronyms: OrderedMap::default(),
            context_boosts: HashMap::new(),
            context_indicator_terms: OrderedMap::default(),
            penalty_overrides: HashMap::new(),
            dialect_keywords: OrderedMap::default(),
            dialect_defaults: HashMap::new(),
            dialect_boost: 25.0,
            retrieval: RetrievalSettings::default(),
            selection: SelectionSettings::default(),
            expansion: ExpansionSettings::default(),
            source_index: HashMap::new(),
        }
    }
}

impl RankingConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Like [`RankingConfig::load`], but never fails: any error is logged
    /// and the default configuration is returned instead.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                debug!(
                    path = %path.display(),
                    sources = config.sources.len(),
                    "loaded ranking configuration"
                );
                config
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "using default ranking configuration"
                );
                Self::default()
            }
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants, normalize lookup keys, and build indexes.
    fn validate(&mut self) -> Result<()> {
        if self.version > CONFIG_VERSION {
            return Err(Error::Config(format!(
                "unsupported configuration version {} (max {CONFIG_VERSION})",
                self.version
            )));
        }

        self.source_index.clear();
        for (idx, source) in self.sources.iter_mut().enumerate() {
            if source.id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "source #{idx} has an empty id"
                )));
            }
            if !source.static_boost.is_finite() {
                return Err(Error::Config(format!(
                    "source '{}' has a non-finite staticBoost",
                    source.id
                )));
            }
            if self.source_index.insert(source.id.clone(), idx).is_some() {
                return Err(Error::Config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            source.tags = source.tags.iter().map(|t| t.to_lowercase()).collect();
            if source.dialect_group.is_some() != source.dialect.is_some() {
                warn!(
                    source = %source.id,
                    "dialectGroup and dialect should be set together"
                );
            }
        }

        for (label, boosts) in &self.context_boosts {
            for (source_id, multiplier) in boosts {
                if !multiplier.is_finite() || *multiplier < 0.0 {
                    return Err(Error::Config(format!(
                        "context '{label}' has invalid multiplier {multiplier} for '{source_id}'"
                    )));
                }
                if !self.source_index.contains_key(source_id) {
                    warn!(
                        context = %label,
                        source = %source_id,
                        "context boost names an unknown source"
                    );
                }
            }
            if label != MIXED_CONTEXT
                && self.context_indicator_terms.get(label).is_none()
            {
                warn!(
                    context = %label,
                    "context boost names a label with no indicator terms"
                );
            }
        }

        for entry in &mut self.synonyms {
            entry.from = text_util::normalize(&entry.from);
            sanitize_expansions(&entry.from, &mut entry.to);
        }
        self.synonyms.retain(|entry| !entry.from.is_empty());

        self.acronyms = std::mem::take(&mut self.acronyms)
            .0
            .into_iter()
            .map(|(key, mut expansions)| {
                let key = text_util::normalize(&key);
                sanitize_expansions(&key, &mut expansions);
                (key, expansions)
            })
            .filter(|(key, _)| !key.is_empty())
            .collect();

        for terms in self.context_indicator_terms.values_mut() {
            normalize_terms(terms);
        }
        for dialects in self.dialect_keywords.values_mut() {
            for keywords in dialects.values_mut() {
                normalize_terms(keywords);
            }
        }
        for overrides in self.penalty_overrides.values_mut() {
            for keywords in overrides.values_mut() {
                normalize_terms(keywords);
            }
        }

        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceDescriptor> {
        self.source_index.get(id).map(|&idx| &self.sources[idx])
    }

    pub fn static_boost(&self, source_id: &str) -> f32 {
        self.source(source_id).map_or(0.0, |s| s.static_boost)
    }

    /// Multiplier for `source_id` under `label`, if one is configured.
    pub fn context_multiplier(&self, label: &str, source_id: &str) -> Option<f32> {
        self.context_boosts.get(label)?.get(source_id).copied()
    }

    /// Keywords that waive a `label` penalty on sources tagged `other`.
    pub fn penalty_override_keywords(
        &self,
        label: &str,
        other: &str,
    ) -> Option<&[String]> {
        self.penalty_overrides
            .get(label)?
            .get(other)
            .map(Vec::as_slice)
    }

    /// Dialect groups declared by registered sources, in registry order.
    pub fn dialect_groups(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sources
            .iter()
            .filter_map(|s| s.dialect_group.as_deref())
            .filter(|group| seen.insert(*group))
            .collect()
    }

    pub fn has_dialect_groups(&self) -> bool {
        self.sources.iter().any(|s| s.dialect_group.is_some())
    }
}

fn sanitize_expansions(key: &str, expansions: &mut Vec<String>) {
    let before = expansions.len();
    expansions.retain(|e| !e.trim().is_empty());
    if expansions.len() != before {
        warn!(term = %key, "dropped empty expansion strings");
    }
}

fn normalize_terms(terms: &mut Vec<String>) {
    for term in terms.iter_mut() {
        *term = text_util::normalize(term);
    }
    terms.retain(|t| !t.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 1,
        "sources": [
            {"id": "ui5-api", "libraryId": "/ui5", "staticBoost": 40.0,
             "tags": ["UI"], "urlTemplate": "https://docs.example/{library}/{path}"},
            {"id": "abap-cloud", "libraryId": "/abap", "dialectGroup": "abap",
             "dialect": "cloud"},
            {"id": "abap-standard", "libraryId": "/abap", "dialectGroup": "abap",
             "dialect": "standard"}
        ],
        "synonyms": [{"from": "Smart Table", "to": ["SmartTable", "", "sap.ui.comp.smarttable"]}],
        "acronyms": {"CDS": ["core data services"], "ui": ["user interface"]},
        "contextBoosts": {"ui": {"ui5-api": 1.5, "abap-cloud": 0.4}},
        "contextIndicatorTerms": {"ui": ["Wizard", "button"], "abap": ["loop"], "cap": ["cds"]},
        "penaltyOverrides": {"ui": {"abap": ["ABAP"]}},
        "dialectKeywords": {"abap": {"cloud": ["Cloud", "btp"], "standard": ["on-premise"]}},
        "dialectDefaults": {"abap": "standard"}
    }"#;

    #[test]
    fn parses_sample() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.static_boost("ui5-api"), 40.0);
        assert_eq!(config.static_boost("unknown"), 0.0);
        assert_eq!(config.context_multiplier("ui", "ui5-api"), Some(1.5));
        assert_eq!(config.context_multiplier("abap", "ui5-api"), None);
        assert_eq!(config.source("abap-cloud").unwrap().library_id(), "/abap");
    }

    #[test]
    fn indicator_terms_keep_declaration_order() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();
        let labels: Vec<_> = config.context_indicator_terms.keys().collect();
        assert_eq!(labels, vec!["ui", "abap", "cap"]);
        assert_eq!(
            config.context_indicator_terms.get("ui").unwrap(),
            &vec!["wizard".to_string(), "button".to_string()]
        );
    }

    #[test]
    fn empty_expansions_are_dropped_and_keys_normalized() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.synonyms[0].from, "smart table");
        assert_eq!(config.synonyms[0].to.len(), 2);
        assert!(config.acronyms.get("cds").is_some());
    }

    #[test]
    fn tags_and_keywords_are_lowercased() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();
        assert!(config.source("ui5-api").unwrap().has_tag("ui"));
        let cloud = config
            .dialect_keywords
            .get("abap")
            .and_then(|d| d.get("cloud"))
            .unwrap();
        assert_eq!(cloud, &vec!["cloud".to_string(), "btp".to_string()]);
        assert_eq!(
            config.penalty_override_keywords("ui", "abap"),
            Some(&["abap".to_string()][..])
        );
    }

    #[test]
    fn dialect_groups_in_registry_order() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();
        assert!(config.has_dialect_groups());
        assert_eq!(config.dialect_groups(), vec!["abap"]);
    }

    #[test]
    fn duplicate_source_ids_are_rejected() {
        let json = r#"{"sources": [{"id": "a"}, {"id": "a"}]}"#;
        let err = RankingConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate source id"));
    }

    #[test]
    fn negative_multipliers_are_rejected() {
        let json = r#"{"sources": [{"id": "a"}], "contextBoosts": {"x": {"a": -1.0}}}"#;
        assert!(RankingConfig::from_json(json).is_err());
    }

    #[test]
    fn newer_versions_are_rejected() {
        let json = r#"{"version": 99}"#;
        assert!(RankingConfig::from_json(json).is_err());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let config = RankingConfig::from_json("{}").unwrap();
        assert_eq!(config.selection.max_total, 10);
        assert_eq!(config.selection.mixed_per_source, 3);
        assert_eq!(config.selection.focused_per_source, 5);
        assert_eq!(config.retrieval.primary_limit, 150);
        assert_eq!(config.retrieval.supplementary_limit, 50);
        assert_eq!(config.retrieval.admission_cap, 30);
        assert!(!config.has_dialect_groups());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RankingConfig::load_or_default(&tmp.path().join("nope.json"));
        assert!(config.sources.is_empty());
        assert!(config.context_boosts.is_empty());
    }

    #[test]
    fn malformed_file_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ranking.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(RankingConfig::load(&path).is_err());
        let config = RankingConfig::load_or_default(&path);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn url_template_is_percent_encoded() {
        let config = RankingConfig::from_json(SAMPLE).unwrap();
        let source = config.source("ui5-api").unwrap();
        let url = source.url_for("api/sap.m.Button#events", "x").unwrap();
        assert_eq!(url, "https://docs.example//ui5/api/sap.m.Button%23events");
        assert!(config.source("abap-cloud").unwrap().url_for("a", "b").is_none());
    }

    // The only test in this binary that touches the process-wide instance.
    #[test]
    fn first_global_initialization_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let first_path = tmp.path().join("first.json");
        let second_path = tmp.path().join("second.json");
        std::fs::write(&first_path, r#"{"sources": [{"id": "first"}]}"#).unwrap();
        std::fs::write(&second_path, r#"{"sources": [{"id": "second"}]}"#).unwrap();

        let first = init_global(&first_path);
        let second = init_global(&second_path);

        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(first, global()));
        assert!(second.source("first").is_some());
        assert!(second.source("second").is_none());
    }
}
