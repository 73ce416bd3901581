use std::collections::HashMap;

use super::resolver::{IdResolver, ResolveCache};
use crate::errors::Result;
use crate::reference::{ReferenceRow, EXACT};
use crate::types::{IdMatch, IdRequest, MatchMap};

/// Rank of a context tag; lower is stronger. Unknown tags rank last.
pub fn tag_priority(tag: &str) -> f64 {
    match tag {
        EXACT => 0.0,
        "primary accession" => 1.0,
        "secondary accession" => 2.0,
        "NCBI Gene ID" => 2.5,
        "uniprot kb" => 3.0,
        "symbol" => 4.0,
        "full name" => 5.0,
        "Ensembl" => 6.0,
        "STRING" => 7.0,
        "RefSeq" => 8.0,
        "short name" => 9.0,
        "synonym" => 10.0,
        _ => f64::MAX,
    }
}

/// Strongest rank among a match's context tags.
pub fn match_priority(m: &IdMatch) -> f64 {
    m.context
        .iter()
        .map(|tag| tag_priority(tag))
        .fold(f64::MAX, f64::min)
}

/// Orders matches strongest first and keeps only the best tier. Ties keep
/// their original order.
pub fn top_priority_tier(matches: &[IdMatch]) -> Vec<IdMatch> {
    let mut ranked: Vec<IdMatch> = matches
        .iter()
        .cloned()
        .map(|mut m| {
            m.context
                .sort_by(|a, b| tag_priority(a).total_cmp(&tag_priority(b)));
            m
        })
        .collect();
    ranked.sort_by(|a, b| match_priority(a).total_cmp(&match_priority(b)));

    let Some(best) = ranked.first().map(match_priority) else {
        return Vec::new();
    };
    ranked.retain(|m| match_priority(m) == best);
    ranked
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// In-memory reverse index from alias term to primary ids.
#[derive(Debug, Default)]
pub struct AliasIndex {
    entries: HashMap<String, Vec<IdMatch>>,
}

impl AliasIndex {
    /// Builds the index from reference rows.
    ///
    /// Every primary id maps to itself tagged `exact`. Each alias maps to
    /// its row's primary id with the alias tag; a second tag for an
    /// existing alias-to-primary pair is appended to that match's context.
    /// Every match carries all terms of its primary as equivalent ids.
    pub fn from_rows(rows: &[ReferenceRow]) -> Self {
        let mut index = AliasIndex::default();
        let mut terms_by_primary: HashMap<String, Vec<String>> = HashMap::new();

        for row in rows {
            index.add(&row.id, &row.id, EXACT);
            push_unique(terms_by_primary.entry(row.id.clone()).or_default(), &row.id);
            for alias in &row.aliases {
                index.add(&alias.term, &row.id, &alias.tag);
                push_unique(
                    terms_by_primary.entry(row.id.clone()).or_default(),
                    &alias.term,
                );
            }
        }

        for matches in index.entries.values_mut() {
            for m in matches.iter_mut() {
                if let Some(terms) = terms_by_primary.get(&m.matched) {
                    m.equivalent_ids = terms.clone();
                }
            }
        }
        index
    }

    fn add(&mut self, term: &str, primary: &str, tag: &str) {
        let matches = self.entries.entry(term.to_string()).or_default();
        match matches.iter_mut().find(|m| m.matched == primary) {
            Some(existing) => {
                if !existing.context.iter().any(|c| c == tag) {
                    existing.context.push(tag.to_string());
                }
            }
            None => matches.push(IdMatch::new(term, primary, tag)),
        }
    }

    pub fn get(&self, term: &str) -> Option<&[IdMatch]> {
        self.entries.get(term).map(Vec::as_slice)
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn push_unique(terms: &mut Vec<String>, term: &str) {
    if !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// How candidate matches for a term are narrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSelection {
    /// Every match, in index order.
    All,
    /// Only the strongest tier by tag priority.
    TopPriority,
}

/// Resolves ids against an [`AliasIndex`] built once from reference files.
pub struct AliasIndexResolver {
    name: String,
    index: AliasIndex,
    selection: MatchSelection,
    cache: ResolveCache,
}

impl AliasIndexResolver {
    pub fn new(name: impl Into<String>, index: AliasIndex) -> Self {
        Self {
            name: name.into(),
            index,
            selection: MatchSelection::All,
            cache: ResolveCache::new(),
        }
    }

    /// Selects only the top-priority tier for each term.
    pub fn prioritized(mut self) -> Self {
        self.selection = MatchSelection::TopPriority;
        self
    }

    pub fn index(&self) -> &AliasIndex {
        &self.index
    }
}

impl IdResolver for AliasIndexResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_uncached(&mut self, requests: &[IdRequest]) -> Result<MatchMap> {
        let mut result = MatchMap::new();
        for request in requests {
            let matches = match self.index.get(&request.id) {
                Some(found) => match self.selection {
                    MatchSelection::All => found.to_vec(),
                    MatchSelection::TopPriority => top_priority_tier(found),
                },
                None => Vec::new(),
            };
            result.insert(request.id.clone(), matches);
        }
        Ok(result)
    }

    fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ResolveCache {
        &mut self.cache
    }
}
