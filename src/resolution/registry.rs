use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use super::alias_index::{AliasIndex, AliasIndexResolver};
use super::lookup::LookupTableResolver;
use super::remote::RemoteResolver;
use super::resolver::{IdResolver, ResolverSettings};
use crate::config::{expand_file_patterns, EtlConfig, ResolverConfig, ResolverStrategy};
use crate::errors::{KgError, Result};
use crate::reference::ReferenceFile;

/// A resolver and the policies applied to its results.
pub struct RegisteredResolver {
    pub resolver: Box<dyn IdResolver>,
    pub settings: ResolverSettings,
}

/// Resolvers keyed by the node type they serve.
///
/// Built once per run and borrowed by the orchestrator; each resolver's
/// cache lives as long as the registry.
#[derive(Default)]
pub struct ResolverRegistry {
    entries: HashMap<String, RegisteredResolver>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every resolver named in the configuration.
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        let mut registry = Self::new();
        let cache_dir = config.resolver_cache_dir();
        for resolver_config in &config.resolvers {
            let resolver = build_resolver(resolver_config, &cache_dir)?;
            info!(
                kind = %resolver_config.label,
                resolver = resolver.name(),
                "registered resolver"
            );
            registry.register(
                resolver_config.label.clone(),
                resolver,
                ResolverSettings::from(resolver_config),
            );
        }
        Ok(registry)
    }

    /// Registers a resolver for `kind`, replacing any previous one.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        resolver: Box<dyn IdResolver>,
        settings: ResolverSettings,
    ) {
        self.entries
            .insert(kind.into(), RegisteredResolver { resolver, settings });
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn get_mut(&mut self, kind: &str) -> Option<&mut RegisteredResolver> {
        self.entries.get_mut(kind)
    }

    /// Configured node types, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.entries.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-system safe name for a resolver's lookup cache.
fn cache_file_name(label: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{safe}.sqlite")
}

fn reference_files(config: &ResolverConfig) -> Result<Vec<ReferenceFile>> {
    let paths: Vec<PathBuf> = expand_file_patterns(&config.files)?;
    Ok(paths
        .into_iter()
        .map(|p| ReferenceFile::new(p, config.layout.clone()))
        .collect())
}

fn build_resolver(config: &ResolverConfig, cache_dir: &Path) -> Result<Box<dyn IdResolver>> {
    let name = format!("{}:{}", strategy_name(config.strategy), config.label);

    match config.strategy {
        ResolverStrategy::Remote => {
            let base_url = config.base_url.clone().ok_or_else(|| KgError::Config {
                message: format!("remote resolver for '{}' needs base_url", config.label),
            })?;
            Ok(Box::new(
                RemoteResolver::new(name, base_url, config.remote_batch_size)
                    .with_conflate(config.conflate),
            ))
        }
        ResolverStrategy::LookupTable => {
            let files = reference_files(config)?;
            let db_path = cache_dir.join(cache_file_name(&config.label));
            Ok(Box::new(LookupTableResolver::open(name, &db_path, &files)?))
        }
        ResolverStrategy::AliasIndex | ResolverStrategy::PriorityAlias => {
            let mut rows = Vec::new();
            for file in reference_files(config)? {
                rows.extend(file.rows()?);
            }
            let resolver = AliasIndexResolver::new(name, AliasIndex::from_rows(&rows));
            if config.strategy == ResolverStrategy::PriorityAlias {
                Ok(Box::new(resolver.prioritized()))
            } else {
                Ok(Box::new(resolver))
            }
        }
    }
}

fn strategy_name(strategy: ResolverStrategy) -> &'static str {
    match strategy {
        ResolverStrategy::LookupTable => "lookup_table",
        ResolverStrategy::AliasIndex => "alias_index",
        ResolverStrategy::PriorityAlias => "priority_alias",
        ResolverStrategy::Remote => "remote",
    }
}

#[cfg(test)]
mod tests {
    use super::cache_file_name;

    #[test]
    fn test_cache_file_name() {
        assert_eq!(cache_file_name("Protein"), "protein.sqlite");
        assert_eq!(cache_file_name("biolink:Gene"), "biolink_gene.sqlite");
    }
}
