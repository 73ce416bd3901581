use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::errors::{KgError, Result};
use crate::types::{IdMatch, IdRequest, MatchMap, MultiMatchBehavior, NoMatchBehavior, Node};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Append-only cache of resolved ids owned by one resolver instance.
///
/// An id resolved once is never sent to the backing strategy again for the
/// life of the instance. Empty results are cached too.
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: HashMap<String, Vec<IdMatch>>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Vec<IdMatch>> {
        self.entries.get(id)
    }

    /// Stores matches for an id unless it is already cached.
    pub fn insert(&mut self, id: String, matches: Vec<IdMatch>) {
        self.entries.entry(id).or_insert(matches);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver trait
// ---------------------------------------------------------------------------

/// A strategy that maps raw ids onto canonical ids.
pub trait IdResolver {
    /// Short name used in logs and `entity_resolution` stamps.
    fn name(&self) -> &str;

    /// Resolves ids that are not cached. Ids missing from the returned map
    /// are treated as unmatched.
    fn resolve_uncached(&mut self, requests: &[IdRequest]) -> Result<MatchMap>;

    fn cache(&self) -> &ResolveCache;

    fn cache_mut(&mut self) -> &mut ResolveCache;

    /// Resolves a batch, consulting the cache first and delegating only
    /// ids never seen before. The result holds an entry for every requested
    /// id.
    fn resolve(&mut self, requests: &[IdRequest]) -> Result<MatchMap> {
        let mut seen = HashSet::new();
        let fresh: Vec<IdRequest> = requests
            .iter()
            .filter(|r| !self.cache().contains(&r.id) && seen.insert(r.id.clone()))
            .cloned()
            .collect();

        if !fresh.is_empty() {
            debug!(
                resolver = self.name(),
                fresh = fresh.len(),
                requested = requests.len(),
                "resolving uncached ids"
            );
            let mut found = self.resolve_uncached(&fresh)?;
            let cache = self.cache_mut();
            for request in fresh {
                let matches = found.remove(&request.id).unwrap_or_default();
                cache.insert(request.id, matches);
            }
        }

        let mut result = MatchMap::new();
        for request in requests {
            if result.contains_key(&request.id) {
                continue;
            }
            let matches = self
                .cache()
                .get(&request.id)
                .cloned()
                .unwrap_or_default();
            result.insert(request.id.clone(), matches);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Settings and events
// ---------------------------------------------------------------------------

/// Policies applied to one resolver's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    pub no_match_behavior: NoMatchBehavior,
    pub multi_match_behavior: MultiMatchBehavior,
    pub use_equivalent_ids: bool,
    pub add_labels_for_resolver_events: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            no_match_behavior: NoMatchBehavior::Allow,
            multi_match_behavior: MultiMatchBehavior::All,
            use_equivalent_ids: true,
            add_labels_for_resolver_events: false,
        }
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            no_match_behavior: config.no_match_behavior,
            multi_match_behavior: config.multi_match_behavior,
            use_equivalent_ids: config.use_equivalent_ids,
            add_labels_for_resolver_events: config.add_labels_for_resolver_events,
        }
    }
}

/// What happened to one resolved id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverEvent {
    /// Best match differs from the input.
    Updated,
    /// Best match equals the input.
    Validated,
    /// A match beyond the first.
    Newborn,
    Unmatched,
}

impl ResolverEvent {
    /// Label added to records when resolver-event labelling is on.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Updated => "Updated_ID",
            Self::Validated => "Validated_ID",
            Self::Newborn => "Unmerged_ID",
            Self::Unmatched => "Unmatched_ID",
        }
    }
}

/// Per-stage counters for one or more resolve calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub updated: usize,
    pub validated: usize,
    pub newborn: usize,
    pub unmatched: usize,
    pub cached: usize,
}

impl ResolutionStats {
    fn record(&mut self, event: ResolverEvent) {
        match event {
            ResolverEvent::Updated => self.updated += 1,
            ResolverEvent::Validated => self.validated += 1,
            ResolverEvent::Newborn => self.newborn += 1,
            ResolverEvent::Unmatched => self.unmatched += 1,
        }
    }

    pub fn absorb(&mut self, other: &ResolutionStats) {
        self.updated += other.updated;
        self.validated += other.validated;
        self.newborn += other.newborn;
        self.unmatched += other.unmatched;
        self.cached += other.cached;
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where one input id landed after resolution, before policies apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    /// Best match kept, plus any extra matches as newborns.
    Matched {
        primary: IdMatch,
        newborns: Vec<IdMatch>,
    },
    Unmatched,
}

impl ResolutionState {
    pub fn from_matches(matches: &[IdMatch]) -> Self {
        match matches.split_first() {
            Some((primary, rest)) => ResolutionState::Matched {
                primary: primary.clone(),
                newborns: rest.to_vec(),
            },
            None => ResolutionState::Unmatched,
        }
    }
}

/// One surviving output id for an input id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub input: String,
    pub canonical: String,
    /// The match that produced `canonical`; `None` for pass-through.
    pub found: Option<IdMatch>,
    pub event: ResolverEvent,
}

/// Applies the match policies to the resolved `inputs` (unique, in order).
///
/// Offending ids under an `Error` policy are collected across the whole
/// batch and reported in one `PolicyViolation`.
pub fn flatten(
    kind: &str,
    settings: &ResolverSettings,
    inputs: &[String],
    matches: &MatchMap,
    stats: &mut ResolutionStats,
) -> Result<Vec<FlatEntry>> {
    let mut entries = Vec::with_capacity(inputs.len());
    let mut unmatched_errors = Vec::new();
    let mut degenerate_errors = Vec::new();
    let mut dropped_newborns = 0usize;
    let mut dropped_unmatched = 0usize;

    for input in inputs {
        let state = ResolutionState::from_matches(
            matches.get(input).map(Vec::as_slice).unwrap_or_default(),
        );
        match state {
            ResolutionState::Matched { primary, newborns } => {
                let event = if primary.matched == *input {
                    ResolverEvent::Validated
                } else {
                    ResolverEvent::Updated
                };
                stats.record(event);
                entries.push(FlatEntry {
                    input: input.clone(),
                    canonical: primary.matched.clone(),
                    found: Some(primary),
                    event,
                });

                if newborns.is_empty() {
                    continue;
                }
                for _ in &newborns {
                    stats.record(ResolverEvent::Newborn);
                }
                match settings.multi_match_behavior {
                    MultiMatchBehavior::All => {
                        for newborn in newborns {
                            entries.push(FlatEntry {
                                input: input.clone(),
                                canonical: newborn.matched.clone(),
                                found: Some(newborn),
                                event: ResolverEvent::Newborn,
                            });
                        }
                    }
                    MultiMatchBehavior::First => dropped_newborns += newborns.len(),
                    MultiMatchBehavior::Error => degenerate_errors.push(input.clone()),
                }
            }
            ResolutionState::Unmatched => {
                stats.record(ResolverEvent::Unmatched);
                match settings.no_match_behavior {
                    NoMatchBehavior::Allow => entries.push(FlatEntry {
                        input: input.clone(),
                        canonical: input.clone(),
                        found: None,
                        event: ResolverEvent::Unmatched,
                    }),
                    NoMatchBehavior::Skip => dropped_unmatched += 1,
                    NoMatchBehavior::Error => unmatched_errors.push(input.clone()),
                }
            }
        }
    }

    if !unmatched_errors.is_empty() || !degenerate_errors.is_empty() {
        return Err(KgError::PolicyViolation {
            kind: kind.to_string(),
            unmatched: unmatched_errors,
            degenerate: degenerate_errors,
        });
    }
    if dropped_newborns > 0 {
        warn!(kind, dropped = dropped_newborns, "discarding extra matches (multi_match_behavior=First)");
    }
    if dropped_unmatched > 0 {
        warn!(kind, dropped = dropped_unmatched, "discarding unmatched ids (no_match_behavior=Skip)");
    }
    Ok(entries)
}

/// Resolves `ids` of one type and applies policies, returning entries
/// grouped by input id.
fn resolve_and_flatten(
    resolver: &mut dyn IdResolver,
    settings: &ResolverSettings,
    kind: &str,
    ids: &[String],
    stats: &mut ResolutionStats,
) -> Result<HashMap<String, Vec<FlatEntry>>> {
    let mut unique = Vec::with_capacity(ids.len());
    let mut seen = HashSet::new();
    for id in ids {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }

    let requests: Vec<IdRequest> = unique
        .iter()
        .map(|id| IdRequest::new(id.clone(), kind))
        .collect();
    stats.cached += requests
        .iter()
        .filter(|r| resolver.cache().contains(&r.id))
        .count();
    let matches = resolver.resolve(&requests)?;

    let mut grouped: HashMap<String, Vec<FlatEntry>> = HashMap::new();
    for entry in flatten(kind, settings, &unique, &matches, stats)? {
        grouped.entry(entry.input.clone()).or_default().push(entry);
    }
    Ok(grouped)
}

// ---------------------------------------------------------------------------
// Node resolution
// ---------------------------------------------------------------------------

/// A resolved node and the raw id it came from.
///
/// `original_id` is `None` only for unmatched nodes passed through
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub node: Node,
    pub original_id: Option<String>,
}

/// Resolves nodes of one type, replacing ids with canonical ids.
///
/// Output preserves arrival order; a node with newborns is followed by its
/// newborn copies.
pub fn resolve_nodes(
    resolver: &mut dyn IdResolver,
    settings: &ResolverSettings,
    kind: &str,
    nodes: Vec<Node>,
    stats: &mut ResolutionStats,
) -> Result<Vec<ResolvedNode>> {
    let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let grouped = resolve_and_flatten(resolver, settings, kind, &ids, stats)?;

    let mut resolved = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Some(entries) = grouped.get(&node.id) else {
            continue;
        };
        for entry in entries {
            let mut copy = node.clone();
            copy.id = entry.canonical.clone();
            if settings.add_labels_for_resolver_events {
                copy.add_label(entry.event.label());
            }
            let original_id = match &entry.found {
                Some(found) => {
                    if settings.use_equivalent_ids {
                        let mut xref = Vec::new();
                        for x in found.equivalent_ids.iter().chain(std::iter::once(&entry.input)) {
                            if !xref.contains(x) {
                                xref.push(x.clone());
                            }
                        }
                        copy.xref = xref;
                    }
                    Some(entry.input.clone())
                }
                None => None,
            };
            resolved.push(ResolvedNode {
                node: copy,
                original_id,
            });
        }
    }
    Ok(resolved)
}

/// Maps each raw id to its surviving canonical ids.
///
/// An id dropped by policy maps to an empty list.
pub fn resolve_id_map(
    resolver: &mut dyn IdResolver,
    settings: &ResolverSettings,
    kind: &str,
    ids: &[String],
    stats: &mut ResolutionStats,
) -> Result<HashMap<String, Vec<String>>> {
    let grouped = resolve_and_flatten(resolver, settings, kind, ids, stats)?;
    let mut map = HashMap::with_capacity(ids.len());
    for id in ids {
        let canonical = grouped
            .get(id)
            .map(|entries| entries.iter().map(|e| e.canonical.clone()).collect())
            .unwrap_or_default();
        map.insert(id.clone(), canonical);
    }
    Ok(map)
}
