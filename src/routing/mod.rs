//! Series-to-pane routing
//!
//! [`PaneRoutingTable::resolve`] maps a series id to the pane that displays
//! it. Precedence:
//!
//! 1. Explicit per-series rules (exact id)
//! 2. Pattern rules (prefix or `*` glob), first declared wins
//! 3. Namespace heuristics (`:ticks` → `price`, ...), only in fallback mode
//!
//! Anything else is a routing miss. The active rules live in an immutable
//! [`CompiledRules`] that is swapped as a whole on [`PaneRoutingTable::rebuild`],
//! so a concurrent `resolve` sees either the old or the new table. Routing
//! never touches buffers; a series keeps its buffer when its pane changes.
//!
//! # Main Types
//!
//! - [`PaneId`] - Destination identifier
//! - [`RulePattern`] - Exact / prefix / wildcard matcher
//! - [`RoutingRule`] - Pattern plus destination
//! - [`PaneRoutingTable`] - Thread-safe resolver

use crate::config::{FallbackRouteSpec, PipelineConfig, RouteSpec};
use crate::error::{FeedError, Result, ResultExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Destination pane identifier. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(Arc<str>);

impl PaneId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaneId({})", self.0)
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaneId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PaneId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl PartialEq<&str> for PaneId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// How a rule matches a series id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulePattern {
    /// Whole id equals the string
    Exact(String),
    /// Id starts with the string (`"AAPL:*"`)
    Prefix(String),
    /// `*` matches any run of characters, anywhere (`"*:ticks"`, `"A*:bars"`)
    Wildcard(String),
}

impl RulePattern {
    /// Classify a pattern: no `*` is exact, a single trailing `*` is a
    /// prefix, anything else is a glob.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(FeedError::InvalidArgument("empty routing pattern".into()));
        }
        let stars = pattern.matches('*').count();
        Ok(match stars {
            0 => RulePattern::Exact(pattern.to_string()),
            1 if pattern.ends_with('*') => {
                RulePattern::Prefix(pattern[..pattern.len() - 1].to_string())
            }
            _ => RulePattern::Wildcard(pattern.to_string()),
        })
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, RulePattern::Exact(_))
    }

    pub fn matches(&self, series_id: &str) -> bool {
        match self {
            RulePattern::Exact(s) => s == series_id,
            RulePattern::Prefix(p) => series_id.starts_with(p.as_str()),
            RulePattern::Wildcard(glob) => glob_match(glob, series_id),
        }
    }
}

impl fmt::Display for RulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePattern::Exact(s) => f.write_str(s),
            RulePattern::Prefix(p) => write!(f, "{}*", p),
            RulePattern::Wildcard(g) => f.write_str(g),
        }
    }
}

fn glob_match(glob: &str, text: &str) -> bool {
    let parts: Vec<&str> = glob.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return text.is_empty(),
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

/// One routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub pattern: RulePattern,
    pub destination: PaneId,
}

impl RoutingRule {
    pub fn new(pattern: &str, destination: impl Into<PaneId>) -> Result<Self> {
        Ok(Self {
            pattern: RulePattern::parse(pattern)?,
            destination: destination.into(),
        })
    }

    pub fn from_spec(spec: &RouteSpec) -> Result<Self> {
        Self::new(&spec.pattern, spec.destination.as_str())
            .with_context(|| format!("route -> '{}'", spec.destination))
    }
}

/// Which precedence level produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Explicit,
    Pattern,
    Fallback,
}

/// Immutable rule set
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    explicit: HashMap<String, PaneId>,
    patterns: Vec<RoutingRule>,
    fallback: Vec<(String, PaneId)>,
    fallback_enabled: bool,
}

impl CompiledRules {
    fn compile(
        rules: Vec<RoutingRule>,
        fallback: Vec<(String, PaneId)>,
        fallback_enabled: bool,
    ) -> Self {
        let mut explicit = HashMap::new();
        let mut patterns = Vec::new();
        for rule in rules {
            match rule.pattern {
                RulePattern::Exact(id) => {
                    if let Some(existing) = explicit.get(&id) {
                        tracing::warn!(
                            "Duplicate route for '{}': keeping '{}', ignoring '{}'",
                            id,
                            existing,
                            rule.destination
                        );
                    } else {
                        explicit.insert(id, rule.destination);
                    }
                }
                _ => patterns.push(rule),
            }
        }
        Self {
            explicit,
            patterns,
            fallback,
            fallback_enabled,
        }
    }

    /// Pure lookup
    pub fn lookup(&self, series_id: &str) -> Option<(PaneId, MatchKind)> {
        if let Some(pane) = self.explicit.get(series_id) {
            return Some((pane.clone(), MatchKind::Explicit));
        }
        if let Some(rule) = self.patterns.iter().find(|r| r.pattern.matches(series_id)) {
            return Some((rule.destination.clone(), MatchKind::Pattern));
        }
        if self.fallback_enabled {
            if let Some((_, pane)) = self
                .fallback
                .iter()
                .find(|(needle, _)| series_id.contains(needle.as_str()))
            {
                return Some((pane.clone(), MatchKind::Fallback));
            }
        }
        None
    }

    pub fn rule_count(&self) -> usize {
        self.explicit.len() + self.patterns.len()
    }
}

/// Thread-safe routing table with whole-table swaps
#[derive(Debug)]
pub struct PaneRoutingTable {
    active: RwLock<Arc<CompiledRules>>,
    misses: AtomicU64,
}

impl Default for PaneRoutingTable {
    fn default() -> Self {
        Self::new(false, &crate::config::default_fallback_routes())
    }
}

impl PaneRoutingTable {
    /// Empty table with the given fallback heuristics
    pub fn new(fallback_enabled: bool, fallback_routes: &[FallbackRouteSpec]) -> Self {
        let fallback = fallback_routes
            .iter()
            .map(|r| (r.needle.clone(), PaneId::new(&r.destination)))
            .collect();
        Self {
            active: RwLock::new(Arc::new(CompiledRules::compile(
                Vec::new(),
                fallback,
                fallback_enabled,
            ))),
            misses: AtomicU64::new(0),
        }
    }

    /// Table built from `routes`, `fallbackRoutes` and `routingFallbackEnabled`
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let table = Self::new(config.routing_fallback_enabled, &config.fallback_routes);
        table.rebuild_from_specs(&config.routes)?;
        Ok(table)
    }

    /// Replace every rule at once. Fallback settings are kept.
    pub fn rebuild(&self, rules: impl IntoIterator<Item = RoutingRule>) {
        let rules: Vec<RoutingRule> = rules.into_iter().collect();
        let mut active = self.active.write();
        let compiled = CompiledRules::compile(
            rules,
            active.fallback.clone(),
            active.fallback_enabled,
        );
        tracing::info!(
            "Routing table rebuilt: {} explicit, {} pattern rule(s)",
            compiled.explicit.len(),
            compiled.patterns.len()
        );
        *active = Arc::new(compiled);
    }

    /// Parse declarative specs and rebuild. Nothing changes if any spec is invalid.
    pub fn rebuild_from_specs(&self, specs: &[RouteSpec]) -> Result<()> {
        let rules = specs
            .iter()
            .map(RoutingRule::from_spec)
            .collect::<Result<Vec<_>>>()?;
        self.rebuild(rules);
        Ok(())
    }

    /// Toggle namespace heuristics
    pub fn set_fallback_enabled(&self, enabled: bool) {
        let mut active = self.active.write();
        if active.fallback_enabled != enabled {
            let mut next = (**active).clone();
            next.fallback_enabled = enabled;
            *active = Arc::new(next);
            tracing::info!("Fallback routing {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_fallback_enabled(&self) -> bool {
        self.active.read().fallback_enabled
    }

    /// Resolve a series to its pane. A miss is counted.
    pub fn resolve(&self, series_id: &str) -> Option<PaneId> {
        self.resolve_with_kind(series_id).map(|(pane, _)| pane)
    }

    /// Like [`Self::resolve`], also reporting which precedence level matched
    pub fn resolve_with_kind(&self, series_id: &str) -> Option<(PaneId, MatchKind)> {
        let rules = self.snapshot();
        let found = rules.lookup(series_id);
        if found.is_none() {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Current rule set
    pub fn snapshot(&self) -> Arc<CompiledRules> {
        self.active.read().clone()
    }

    pub fn rule_count(&self) -> usize {
        self.active.read().rule_count()
    }

    /// Lookups that found no destination
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset_misses(&self) {
        self.misses.store(0, Ordering::Relaxed);
    }
}
