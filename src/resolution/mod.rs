/// Identifier resolution.
///
/// Maps raw source ids onto canonical entity ids. Every strategy implements
/// [`IdResolver`] and owns its cache; the state machine in `resolver`
/// applies match policies on top of any strategy.
mod alias_index;
mod lookup;
mod registry;
mod remote;
mod resolver;

pub use alias_index::{
    match_priority, tag_priority, top_priority_tier, AliasIndex, AliasIndexResolver,
    MatchSelection,
};
pub use lookup::LookupTableResolver;
pub use registry::{RegisteredResolver, ResolverRegistry};
pub use remote::{parse_response, request_body, RemoteResolver, NORMALIZED};
pub use resolver::{
    flatten, resolve_id_map, resolve_nodes, FlatEntry, IdResolver, ResolutionState,
    ResolutionStats, ResolveCache, ResolvedNode, ResolverEvent, ResolverSettings,
};
