//! Cross-provider entity identity: identifier links, name canonicalization
//! and deduplication into [`ResolvedEntity`] values.

use crate::instrument::{EntityType, Metadata, RawEntity, ResolvedEntity, SourceMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const ARTICLES: [&str; 3] = ["the", "a", "an"];
const EPITHETS: [&str; 10] = [
    "amazing",
    "uncanny",
    "incredible",
    "mighty",
    "spectacular",
    "astonishing",
    "invincible",
    "savage",
    "sensational",
    "ultimate",
];
const TITLES: [(&str, &str); 6] = [
    ("dr", "doctor"),
    ("mr", "mister"),
    ("capt", "captain"),
    ("prof", "professor"),
    ("sgt", "sergeant"),
    ("st", "saint"),
];
const PUBLISHER_NOISE: [&str; 6] = ["comics", "comic", "entertainment", "publishing", "inc", "group"];

/// Maps a field of one provider's records into another provider's id space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    /// Provider whose records carry the foreign id.
    pub provider: String,
    /// Metadata field (dot path) holding the foreign id.
    pub field: String,
    /// Provider namespace the id belongs to.
    pub target: String,
}

/// Identity configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identifier links.
    pub links: Vec<IdentityLink>,
    /// Whether records with equal canonical names may be merged.
    pub merge_by_name: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            links: vec![
                IdentityLink {
                    provider: "metron".to_string(),
                    field: "cv_id".to_string(),
                    target: "comicvine".to_string(),
                },
                IdentityLink {
                    provider: "gcd".to_string(),
                    field: "comicvine_id".to_string(),
                    target: "comicvine".to_string(),
                },
            ],
            merge_by_name: true,
        }
    }
}

/// Output of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// One entity per real-world identity, sorted by key.
    pub entities: Vec<ResolvedEntity>,
    /// Records folded into another record.
    pub duplicates: usize,
}

/// Groups raw records that describe the same real-world entity.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    config: IdentityConfig,
    priority: Vec<String>,
}

impl IdentityResolver {
    /// Creates a resolver. `priority` lists providers, most authoritative first.
    #[must_use]
    pub fn new(config: IdentityConfig, priority: Vec<String>) -> Self {
        Self { config, priority }
    }

    /// Provider names, most authoritative first.
    #[must_use]
    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    fn rank(&self, provider: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == provider)
            .unwrap_or(self.priority.len())
    }

    /// Keys a record is known under: its own key plus linked foreign keys.
    #[must_use]
    pub fn keys_of(&self, record: &RawEntity) -> Vec<String> {
        let mut keys = vec![record.source_key()];
        for link in self.config.links.iter().filter(|l| l.provider == record.provider) {
            if let Some(id) = lookup(&record.metadata, &link.field).and_then(id_string) {
                keys.push(format!("{}:{id}", link.target));
            }
        }
        keys
    }

    /// Deduplicates records.
    #[must_use]
    pub fn resolve(&self, records: Vec<RawEntity>) -> Resolution {
        let total = records.len();
        let mut sets = DisjointSet::new(total);

        let mut by_key: HashMap<String, usize> = HashMap::new();
        let keys: Vec<Vec<String>> = records.iter().map(|r| self.keys_of(r)).collect();
        for (i, record_keys) in keys.iter().enumerate() {
            for key in record_keys {
                match by_key.get(key) {
                    Some(&j) => sets.union(i, j),
                    None => {
                        by_key.insert(key.clone(), i);
                    }
                }
            }
        }

        if self.config.merge_by_name {
            self.merge_by_name(&records, &mut sets);
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..total {
            groups.entry(sets.find(i)).or_default().push(i);
        }

        let mut entities: Vec<ResolvedEntity> = groups
            .into_values()
            .map(|members| self.build(&records, &keys, members))
            .collect();
        entities.sort_by(|a, b| a.key.cmp(&b.key));

        Resolution {
            duplicates: total - entities.len(),
            entities,
        }
    }

    fn merge_by_name(&self, records: &[RawEntity], sets: &mut DisjointSet) {
        let mut buckets: BTreeMap<(EntityType, String), Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            if let Some(name) = record.display_name() {
                let canonical = canonicalize_name(name);
                if !canonical.is_empty() {
                    buckets
                        .entry((record.entity_type, canonical))
                        .or_default()
                        .push(i);
                }
            }
        }

        for members in buckets.values().filter(|m| m.len() > 1) {
            let publishers: Vec<Option<String>> = members
                .iter()
                .map(|&i| publisher_of(&records[i].metadata))
                .collect();
            let distinct: BTreeSet<&String> = publishers.iter().flatten().collect();

            if distinct.len() <= 1 {
                for &i in &members[1..] {
                    sets.union(members[0], i);
                }
                continue;
            }
            // Conflicting publishers: only merge records that agree.
            for (a, pa) in members.iter().zip(&publishers) {
                for (b, pb) in members.iter().zip(&publishers) {
                    if a < b && pa.is_some() && pa == pb {
                        sets.union(*a, *b);
                    }
                }
            }
        }
    }

    fn build(&self, records: &[RawEntity], keys: &[Vec<String>], mut members: Vec<usize>) -> ResolvedEntity {
        members.sort_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            self.rank(&ra.provider)
                .cmp(&self.rank(&rb.provider))
                .then_with(|| ra.provider.cmp(&rb.provider))
                .then_with(|| ra.upstream_id.cmp(&rb.upstream_id))
        });

        let lead = &records[members[0]];
        let mut alias_keys: Vec<String> = Vec::new();
        for &m in &members {
            for key in &keys[m] {
                if !alias_keys.contains(key) {
                    alias_keys.push(key.clone());
                }
            }
        }
        // Own keys first, linked foreign keys after.
        let own: Vec<String> = members.iter().map(|&m| records[m].source_key()).collect();
        alias_keys.sort_by_key(|k| !own.contains(k));

        let mut sources = SourceMetadata::new();
        for &m in &members {
            sources
                .entry(records[m].provider.clone())
                .or_insert_with(|| records[m].metadata.clone());
        }

        ResolvedEntity {
            key: lead.source_key(),
            alias_keys,
            name: members
                .iter()
                .find_map(|&m| records[m].display_name())
                .map(str::to_string),
            entity_type: lead.entity_type,
            sources,
        }
    }
}

/// Canonical form of a display name used for cross-provider matching.
///
/// Lowercases, drops parentheticals, un-inverts `Last, First`, drops leading
/// articles and epithets (unless nothing would remain), expands abbreviated
/// titles, strips punctuation and joins the words with `-`.
#[must_use]
pub fn canonicalize_name(name: &str) -> String {
    let mut text = String::with_capacity(name.len());
    let mut depth = 0u32;
    for c in name.to_lowercase().chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => text.push(c),
            _ => {}
        }
    }

    if let Some((last, first)) = text.split_once(',')
        && !first.contains(',')
        && !last.trim().is_empty()
        && !first.trim().is_empty()
    {
        text = format!("{} {}", first.trim(), last.trim());
    }

    let mut words: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == '/')
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect();

    if words.len() > 1 && ARTICLES.contains(&words[0].as_str()) {
        words.remove(0);
    }
    let kept: Vec<String> = words
        .iter()
        .filter(|w| !EPITHETS.contains(&w.as_str()))
        .cloned()
        .collect();
    if !kept.is_empty() {
        words = kept;
    }
    for word in &mut words {
        if let Some((_, full)) = TITLES.iter().find(|(abbr, _)| *abbr == word.as_str()) {
            *word = (*full).to_string();
        }
    }

    words.join("-")
}

/// Normalized publisher of a record, if it names one.
#[must_use]
pub fn publisher_of(metadata: &Metadata) -> Option<String> {
    let raw = ["publisher", "publisher.name", "biography.publisher"]
        .iter()
        .find_map(|path| lookup(metadata, path).and_then(Value::as_str))?;
    let canonical = canonicalize_name(raw);
    let words: Vec<&str> = canonical
        .split('-')
        .filter(|w| !PUBLISHER_NOISE.contains(w))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join("-"))
    }
}

pub(crate) fn lookup<'a>(metadata: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = metadata.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}
