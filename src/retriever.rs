//! Candidate retrieval across query variants.
//!
//! The full-text engine sits behind the [`Retriever`] trait. A
//! [`CandidateRetriever`] runs every variant against it and merges the
//! answers into one pool keyed by document id, first occurrence wins.
//! Failures of individual variants are logged and skipped; only when every
//! attempted variant fails does the outcome report the engine as
//! unavailable.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        mpsc::{self, Sender},
    },
    thread,
    time::Instant,
};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    config::RetrievalSettings,
    error::{Error, Result},
};

/// Which direction of `raw_score` means "more relevant".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreOrder {
    HigherIsBetter,
    LowerIsBetter,
}

/// A document returned by the engine for one variant, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDocument {
    pub id: String,
    pub source_id: String,
    pub path: String,
    pub title: String,
    pub description: String,
    /// Structured metadata such as control or API names.
    pub keywords: Vec<String>,
    /// 0 for a document title, 1 for a section, 2+ for nested sections.
    pub heading_level: u8,
    pub raw_score: f32,
}

/// The full-text engine as seen by the ranking pipeline.
///
/// Results must be ordered best-first and contain at most `limit`
/// documents. An empty `sources` slice means "all sources".
pub trait Retriever: Send + Sync {
    fn score_order(&self) -> ScoreOrder;

    fn retrieve(
        &self,
        query: &str,
        sources: &[String],
        limit: usize,
    ) -> Result<Vec<CandidateDocument>>;
}

/// Merged pool of candidates plus bookkeeping about the variant calls.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub candidates: Vec<CandidateDocument>,
    pub attempted: usize,
    pub failed: usize,
    /// Every attempted variant failed.
    pub unavailable: bool,
}

/// One engine answer.
type Answer = Result<Vec<CandidateDocument>>;

pub struct CandidateRetriever<'a> {
    retriever: Arc<dyn Retriever>,
    settings: &'a RetrievalSettings,
}

impl<'a> CandidateRetriever<'a> {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        settings: &'a RetrievalSettings,
    ) -> Self {
        Self {
            retriever,
            settings,
        }
    }

    /// Engine-side limit for the variant at `position`.
    pub fn limit_for(&self, position: usize) -> usize {
        if position < self.settings.primary_variants {
            self.settings.primary_limit
        } else {
            self.settings.supplementary_limit
        }
    }

    /// Retrieve and merge candidates for `variants`, in priority order.
    ///
    /// Identical variant strings are retrieved once. With `deadline`, engine
    /// calls run on worker threads and `collect` returns by the deadline
    /// whatever the engine does: a call that has not answered by then
    /// counts as timed out, and the pool built so far is returned.
    pub fn collect(
        &self,
        variants: &[String],
        sources: &[String],
        deadline: Option<Instant>,
    ) -> RetrievalOutcome {
        let plan = self.plan(variants);
        let mut pool = Pool::new(self.settings);
        let mut outcome = RetrievalOutcome::default();

        if self.settings.parallel && plan.len() > 1 {
            let answers: Vec<Answer> = match deadline {
                Some(deadline) => self.call_all_bounded(&plan, sources, deadline),
                None => plan
                    .par_iter()
                    .map(|(_, variant, limit)| self.call(variant, sources, *limit))
                    .collect(),
            };

            for ((position, variant, _), answer) in plan.iter().zip(answers) {
                if pool.is_full() {
                    break;
                }
                outcome.attempted += 1;
                match answer {
                    Ok(docs) => pool.merge(*position, docs),
                    Err(error) => {
                        outcome.failed += 1;
                        log_failure(variant, &error);
                    }
                }
            }
        } else {
            for (position, variant, limit) in &plan {
                if pool.is_full() {
                    debug!(
                        pool = pool.len(),
                        "candidate pool full; skipping remaining variants"
                    );
                    break;
                }
                outcome.attempted += 1;
                let answer = match deadline {
                    Some(deadline) => {
                        self.call_bounded(variant, sources, *limit, deadline)
                    }
                    None => self.call(variant, sources, *limit),
                };
                match answer {
                    Ok(docs) => pool.merge(*position, docs),
                    Err(error) => {
                        outcome.failed += 1;
                        log_failure(variant, &error);
                    }
                }
            }
        }

        outcome.unavailable =
            outcome.attempted > 0 && outcome.failed == outcome.attempted;
        if outcome.unavailable {
            warn!(
                variants = outcome.attempted,
                "retrieval failed for every query variant"
            );
        }
        outcome.candidates = pool.into_candidates();
        outcome
    }

    /// `(position, variant, limit)` for each distinct variant.
    fn plan<'v>(&self, variants: &'v [String]) -> Vec<(usize, &'v str, usize)> {
        let mut seen = HashSet::new();
        variants
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.trim().is_empty() && seen.insert(v.as_str()))
            .map(|(position, v)| (position, v.as_str(), self.limit_for(position)))
            .collect()
    }

    fn call(&self, variant: &str, sources: &[String], limit: usize) -> Answer {
        let mut docs = self.retriever.retrieve(variant, sources, limit)?;
        docs.truncate(limit);
        Ok(docs)
    }

    /// One engine call on a worker, waiting for it at most until `deadline`.
    fn call_bounded(
        &self,
        variant: &str,
        sources: &[String],
        limit: usize,
        deadline: Instant,
    ) -> Answer {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout(variant));
        }

        let (tx, rx) = mpsc::channel();
        self.spawn_call(0, variant, sources, limit, tx)?;
        match rx.recv_timeout(remaining) {
            Ok((_, answer)) => answer,
            Err(_) => Err(timeout(variant)),
        }
    }

    /// Start every planned call at once and gather the answers that arrive
    /// by `deadline`, in plan order.
    fn call_all_bounded(
        &self,
        plan: &[(usize, &str, usize)],
        sources: &[String],
        deadline: Instant,
    ) -> Vec<Answer> {
        let mut answers: Vec<Option<Answer>> = plan.iter().map(|_| None).collect();
        if Instant::now() < deadline {
            let (tx, rx) = mpsc::channel();
            let mut pending = 0;
            for (slot, (_, variant, limit)) in plan.iter().enumerate() {
                match self.spawn_call(slot, variant, sources, *limit, tx.clone()) {
                    Ok(()) => pending += 1,
                    Err(error) => answers[slot] = Some(Err(error)),
                }
            }
            drop(tx);

            while pending > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok((slot, answer)) => {
                        answers[slot] = Some(answer);
                        pending -= 1;
                    }
                    Err(_) => break,
                }
            }
        }

        answers
            .into_iter()
            .zip(plan)
            .map(|(answer, (_, variant, _))| {
                answer.unwrap_or_else(|| Err(timeout(variant)))
            })
            .collect()
    }

    /// Run one engine call on its own thread, reporting to `tx` as `slot`.
    ///
    /// A call still running at the deadline is abandoned, not cancelled; its
    /// answer is dropped when it finally arrives.
    fn spawn_call(
        &self,
        slot: usize,
        variant: &str,
        sources: &[String],
        limit: usize,
        tx: Sender<(usize, Answer)>,
    ) -> Result<()> {
        let retriever = Arc::clone(&self.retriever);
        let variant = variant.to_string();
        let sources = sources.to_vec();
        thread::Builder::new()
            .name("docmux-retrieve".to_string())
            .spawn(move || {
                let answer = retriever
                    .retrieve(&variant, &sources, limit)
                    .map(|mut docs| {
                        docs.truncate(limit);
                        docs
                    });
                let _ = tx.send((slot, answer));
            })?;
        Ok(())
    }
}

fn timeout(variant: &str) -> Error {
    Error::Timeout {
        variant: variant.to_string(),
    }
}

fn log_failure(variant: &str, error: &Error) {
    warn!(variant, %error, "retrieval failed; skipping variant");
}

/// Candidate pool with first-seen-wins merging and admission limits.
struct Pool<'a> {
    settings: &'a RetrievalSettings,
    candidates: Vec<CandidateDocument>,
    seen: HashSet<String>,
}

impl<'a> Pool<'a> {
    fn new(settings: &'a RetrievalSettings) -> Self {
        Self {
            settings,
            candidates: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn len(&self) -> usize {
        self.candidates.len()
    }

    fn is_full(&self) -> bool {
        self.candidates.len() >= self.settings.target_pool_size
    }

    /// Admit the documents of the variant at `position`.
    ///
    /// Supplementary variants may add at most `admission_cap` new
    /// documents once the pool is crowded.
    fn merge(&mut self, position: usize, docs: Vec<CandidateDocument>) {
        let capped = position >= self.settings.primary_variants
            && self.candidates.len() >= self.settings.crowded_pool_size;
        let mut admitted = 0;

        for doc in docs {
            if self.is_full() || (capped && admitted >= self.settings.admission_cap) {
                break;
            }
            if !self.seen.insert(doc.id.clone()) {
                continue;
            }
            self.candidates.push(doc);
            admitted += 1;
        }

        debug!(position, admitted, pool = self.candidates.len(), "merged variant");
    }

    fn into_candidates(self) -> Vec<CandidateDocument> {
        self.candidates
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use super::*;

    pub(crate) fn doc(id: &str, source: &str, title: &str) -> CandidateDocument {
        CandidateDocument {
            id: id.to_string(),
            source_id: source.to_string(),
            path: format!("{id}.md"),
            title: title.to_string(),
            description: String::new(),
            keywords: Vec::new(),
            heading_level: 0,
            raw_score: 1.0,
        }
    }

    /// Scripted engine: answers by variant, records the limits it was given.
    struct Scripted {
        answers: HashMap<String, Result<Vec<CandidateDocument>>>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                answers: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn shared(self) -> Arc<Self> {
            Arc::new(self)
        }

        fn answer(mut self, variant: &str, ids: &[&str]) -> Self {
            let docs = ids.iter().map(|id| doc(id, "src", id)).collect();
            self.answers.insert(variant.to_string(), Ok(docs));
            self
        }

        fn fail(mut self, variant: &str) -> Self {
            self.answers.insert(
                variant.to_string(),
                Err(Error::Retrieval {
                    variant: variant.to_string(),
                    message: "index unavailable".to_string(),
                }),
            );
            self
        }
    }

    impl Retriever for Scripted {
        fn score_order(&self) -> ScoreOrder {
            ScoreOrder::HigherIsBetter
        }

        fn retrieve(
            &self,
            query: &str,
            _sources: &[String],
            limit: usize,
        ) -> Result<Vec<CandidateDocument>> {
            self.calls.lock().unwrap().push((query.to_string(), limit));
            match self.answers.get(query) {
                Some(Ok(docs)) => Ok(docs.clone()),
                Some(Err(_)) => Err(Error::Retrieval {
                    variant: query.to_string(),
                    message: "index unavailable".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn variants(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ids(outcome: &RetrievalOutcome) -> Vec<&str> {
        outcome.candidates.iter().map(|c| c.id.as_str()).collect()
    }

    fn sequential() -> RetrievalSettings {
        RetrievalSettings {
            parallel: false,
            ..RetrievalSettings::default()
        }
    }

    #[test]
    fn primary_variants_get_larger_limits() {
        let engine = Scripted::new().shared();
        let settings = sequential();
        let retriever = CandidateRetriever::new(engine.clone(), &settings);

        retriever.collect(&variants(&["A", "a", "b", "c", "d"]), &[], None);

        let calls = engine.calls.lock().unwrap().clone();
        let limits: Vec<usize> = calls.iter().map(|(_, l)| *l).collect();
        assert_eq!(limits, vec![150, 150, 150, 50, 50]);
    }

    #[test]
    fn duplicate_variants_are_retrieved_once() {
        let engine = Scripted::new().shared();
        let settings = sequential();
        let retriever = CandidateRetriever::new(engine.clone(), &settings);

        let outcome = retriever.collect(&variants(&["x", "x", "y"]), &[], None);

        assert_eq!(outcome.attempted, 2);
        assert_eq!(engine.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn first_seen_wins() {
        let engine = Scripted::new()
            .answer("one", &["d1", "d2"])
            .answer("two", &["d2", "d3"])
            .shared();
        let settings = sequential();
        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one", "two"]),
            &[],
            None,
        );

        assert_eq!(ids(&outcome), vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn failed_variant_is_skipped() {
        let engine = Scripted::new()
            .answer("one", &["d1"])
            .fail("two")
            .answer("three", &["d3"])
            .shared();
        let settings = sequential();
        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one", "two", "three"]),
            &[],
            None,
        );

        assert_eq!(ids(&outcome), vec!["d1", "d3"]);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.unavailable);
    }

    #[test]
    fn all_failures_mark_unavailable() {
        let engine = Scripted::new().fail("one").fail("two").shared();
        let settings = sequential();
        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one", "two"]),
            &[],
            None,
        );

        assert!(outcome.candidates.is_empty());
        assert!(outcome.unavailable);
    }

    #[test]
    fn no_variants_is_not_unavailable() {
        let engine = Scripted::new().shared();
        let settings = sequential();
        let outcome =
            CandidateRetriever::new(engine.clone(), &settings).collect(&[], &[], None);
        assert!(!outcome.unavailable);
        assert_eq!(outcome.attempted, 0);
    }

    #[test]
    fn crowded_pool_caps_supplementary_admissions() {
        let primary: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let extra: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
        let primary_refs: Vec<&str> = primary.iter().map(String::as_str).collect();
        let extra_refs: Vec<&str> = extra.iter().map(String::as_str).collect();
        let engine = Scripted::new()
            .answer("one", &primary_refs)
            .answer("four", &extra_refs)
            .shared();
        let settings = RetrievalSettings {
            primary_variants: 1,
            crowded_pool_size: 5,
            admission_cap: 3,
            parallel: false,
            ..RetrievalSettings::default()
        };

        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one", "four"]),
            &[],
            None,
        );

        assert_eq!(outcome.candidates.len(), 8);
    }

    #[test]
    fn stops_once_target_pool_is_reached() {
        let engine = Scripted::new()
            .answer("one", &["a", "b", "c"])
            .answer("two", &["d"])
            .shared();
        let settings = RetrievalSettings {
            target_pool_size: 2,
            parallel: false,
            ..RetrievalSettings::default()
        };

        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one", "two"]),
            &[],
            None,
        );

        assert_eq!(ids(&outcome), vec!["a", "b"]);
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn parallel_merge_matches_sequential() {
        let build = || {
            Scripted::new()
                .answer("one", &["d1", "d2"])
                .fail("two")
                .answer("three", &["d2", "d4", "d5"])
                .answer("four", &["d6", "d1"])
        };
        let list = variants(&["one", "two", "three", "four"]);

        let seq_engine = build().shared();
        let seq_settings = sequential();
        let sequential = CandidateRetriever::new(seq_engine.clone(), &seq_settings)
            .collect(&list, &[], None);

        let par_engine = build().shared();
        let par_settings = RetrievalSettings::default();
        let parallel = CandidateRetriever::new(par_engine.clone(), &par_settings)
            .collect(&list, &[], None);

        assert_eq!(ids(&sequential), ids(&parallel));
        assert_eq!(sequential.failed, parallel.failed);
    }

    #[test]
    fn expired_deadline_fails_every_variant() {
        let engine = Scripted::new().answer("one", &["d1"]).shared();
        let settings = sequential();
        let deadline = Instant::now();

        let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
            &variants(&["one"]),
            &[],
            Some(deadline),
        );

        assert!(outcome.unavailable);
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    /// Engine that takes `delay` to answer every call.
    struct Slow {
        delay: Duration,
    }

    impl Retriever for Slow {
        fn score_order(&self) -> ScoreOrder {
            ScoreOrder::HigherIsBetter
        }

        fn retrieve(
            &self,
            query: &str,
            _sources: &[String],
            _limit: usize,
        ) -> Result<Vec<CandidateDocument>> {
            std::thread::sleep(self.delay);
            Ok(vec![doc(query, "src", query)])
        }
    }

    #[test]
    fn hung_engine_does_not_outlive_deadline() {
        let engine = Arc::new(Slow {
            delay: Duration::from_millis(1500),
        });
        for settings in [sequential(), RetrievalSettings::default()] {
            let started = Instant::now();
            let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
                &variants(&["one", "two"]),
                &[],
                Some(started + Duration::from_millis(50)),
            );
            let elapsed = started.elapsed();

            assert!(
                elapsed < Duration::from_millis(500),
                "collect waited {elapsed:?} (parallel: {})",
                settings.parallel
            );
            assert!(outcome.unavailable);
            assert_eq!(outcome.failed, outcome.attempted);
        }
    }

    #[test]
    fn answers_within_deadline_are_kept() {
        let engine = Scripted::new()
            .answer("one", &["d1"])
            .answer("two", &["d2", "d1"])
            .shared();
        for settings in [sequential(), RetrievalSettings::default()] {
            let outcome = CandidateRetriever::new(engine.clone(), &settings).collect(
                &variants(&["one", "two"]),
                &[],
                Some(Instant::now() + Duration::from_secs(30)),
            );

            assert_eq!(ids(&outcome), vec!["d1", "d2"]);
            assert_eq!(outcome.failed, 0);
        }
    }
}
