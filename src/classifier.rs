//! Rule-based category classification.
//!
//! Rules are evaluated strictly in order and the first match wins, so the
//! category (and therefore the ticker) is reproducible for a given input.

use crate::instrument::{Category, EntityType, Metadata, ResolvedEntity};
use serde_json::Value;

/// Metadata fields inspected for role tags, including dotted nested paths.
const ROLE_FIELDS: [&str; 5] = [
    "role",
    "roles",
    "alignment",
    "biography.alignment",
    "character_type",
];

/// A predicate over an entity.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Entity type equals.
    EntityTypeIs(EntityType),
    /// Any role tag (case-insensitive) is in the list.
    RoleTagIn(Vec<&'static str>),
    /// Any word of the name (case-insensitive) is in the list. Entries
    /// starting with `-` are suffixes of the whole name with separators removed.
    NameHasWord(Vec<&'static str>),
    /// All conditions hold.
    All(Vec<Condition>),
    /// Any condition holds.
    Any(Vec<Condition>),
}

/// An ordered predicate → category pair.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Name used in logs.
    pub name: &'static str,
    /// Condition to match.
    pub condition: Condition,
    /// Category assigned on match.
    pub category: Category,
}

impl Rule {
    fn new(name: &'static str, condition: Condition, category: Category) -> Self {
        Self {
            name,
            condition,
            category,
        }
    }
}

/// Facts about an entity the rules operate on.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    entity_type: Option<EntityType>,
    roles: Vec<String>,
    words: Vec<String>,
    compact: String,
}

impl Facts {
    /// Collects facts from a resolved entity.
    #[must_use]
    pub fn from_entity(entity: &ResolvedEntity) -> Self {
        let mut roles = Vec::new();
        for metadata in entity.sources.values() {
            collect_roles(metadata, &mut roles);
        }
        let words = entity
            .name
            .as_deref()
            .map(split_words)
            .unwrap_or_default();
        let compact = words.concat();
        Self {
            entity_type: Some(entity.entity_type),
            roles,
            words,
            compact,
        }
    }

    fn matches(&self, condition: &Condition) -> bool {
        match condition {
            Condition::EntityTypeIs(t) => self.entity_type == Some(*t),
            Condition::RoleTagIn(tags) => self
                .roles
                .iter()
                .any(|r| tags.iter().any(|t| r.contains(t))),
            Condition::NameHasWord(words) => words.iter().any(|w| match w.strip_prefix('-') {
                Some(suffix) => {
                    self.compact.len() > suffix.len() && self.compact.ends_with(suffix)
                }
                None => self.words.iter().any(|n| n == w),
            }),
            Condition::All(cs) => cs.iter().all(|c| self.matches(c)),
            Condition::Any(cs) => cs.iter().any(|c| self.matches(c)),
        }
    }
}

/// First-match-wins classifier.
#[derive(Debug, Clone)]
pub struct CategoryClassifier {
    rules: Vec<Rule>,
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl CategoryClassifier {
    /// Creates a classifier over an ordered rule list.
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Classifies an entity; unmatched entities are [`Category::Other`].
    #[must_use]
    pub fn classify(&self, entity: &ResolvedEntity) -> Category {
        self.classify_facts(&Facts::from_entity(entity))
    }

    /// Classifies pre-collected facts.
    #[must_use]
    pub fn classify_facts(&self, facts: &Facts) -> Category {
        self.rules
            .iter()
            .find(|rule| facts.matches(&rule.condition))
            .map_or(Category::Other, |rule| rule.category)
    }

    /// Name of the first matching rule, for diagnostics.
    #[must_use]
    pub fn matching_rule(&self, entity: &ResolvedEntity) -> Option<&'static str> {
        let facts = Facts::from_entity(entity);
        self.rules
            .iter()
            .find(|rule| facts.matches(&rule.condition))
            .map(|rule| rule.name)
    }
}

/// The built-in rule list.
#[must_use]
pub fn default_rules() -> Vec<Rule> {
    use Condition::{All, EntityTypeIs, NameHasWord, RoleTagIn};

    let character = || EntityTypeIs(EntityType::Character);
    let creator = || EntityTypeIs(EntityType::Creator);

    vec![
        Rule::new("publisher", EntityTypeIs(EntityType::Publisher), Category::Publisher),
        Rule::new(
            "creator-writer",
            All(vec![creator(), RoleTagIn(vec!["writer", "script", "plot", "editor"])]),
            Category::CreatorWriter,
        ),
        Rule::new(
            "creator-artist",
            All(vec![
                creator(),
                RoleTagIn(vec![
                    "artist", "pencil", "inker", "ink", "color", "letter", "cover",
                ]),
            ]),
            Category::CreatorArtist,
        ),
        Rule::new("creator", creator(), Category::CreatorWriter),
        Rule::new("issue", EntityTypeIs(EntityType::Issue), Category::KeyIssue),
        Rule::new("location", EntityTypeIs(EntityType::Location), Category::Location),
        Rule::new("object", EntityTypeIs(EntityType::Object), Category::Gadget),
        Rule::new("team", EntityTypeIs(EntityType::Team), Category::Team),
        Rule::new(
            "henchman",
            All(vec![
                character(),
                RoleTagIn(vec!["henchman", "minion", "thug", "goon", "lackey"]),
            ]),
            Category::Henchman,
        ),
        Rule::new(
            "sidekick",
            All(vec![
                character(),
                Condition::Any(vec![
                    RoleTagIn(vec!["sidekick", "partner", "ward"]),
                    NameHasWord(vec!["kid", "boy", "robin", "bucky", "jr"]),
                ]),
            ]),
            Category::Sidekick,
        ),
        Rule::new(
            "villain",
            All(vec![
                character(),
                RoleTagIn(vec!["villain", "bad", "evil", "antagonist"]),
            ]),
            Category::Villain,
        ),
        Rule::new(
            "hero",
            All(vec![
                character(),
                RoleTagIn(vec!["hero", "good", "protagonist"]),
            ]),
            Category::Hero,
        ),
        Rule::new(
            "hero-name",
            All(vec![
                character(),
                NameHasWord(vec!["-man", "-woman", "-girl", "captain"]),
            ]),
            Category::Hero,
        ),
        Rule::new(
            "gadget-name",
            NameHasWord(vec![
                "hammer", "shield", "ring", "belt", "sword", "armor", "lasso", "gauntlet",
                "-mobile",
            ]),
            Category::Gadget,
        ),
    ]
}

fn collect_roles(metadata: &Metadata, out: &mut Vec<String>) {
    for field in ROLE_FIELDS {
        let mut parts = field.split('.');
        let Some(mut value) = parts.next().and_then(|p| metadata.get(p)) else {
            continue;
        };
        let mut found = true;
        for part in parts {
            match value.as_object().and_then(|o| o.get(part)) {
                Some(v) => value = v,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            push_tags(value, out);
        }
    }
}

fn push_tags(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.to_ascii_lowercase()),
        Value::Array(items) => items.iter().for_each(|v| push_tags(v, out)),
        Value::Object(o) => {
            if let Some(name) = o.get("name") {
                push_tags(name, out);
            }
        }
        _ => {}
    }
}

fn split_words(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::SourceMetadata;
    use serde_json::json;

    fn entity(name: &str, entity_type: EntityType, metadata: Value) -> ResolvedEntity {
        let mut sources = SourceMetadata::new();
        sources.insert(
            "comicvine".to_string(),
            metadata.as_object().cloned().unwrap_or_default(),
        );
        ResolvedEntity {
            key: "comicvine:1".to_string(),
            alias_keys: vec!["comicvine:1".to_string()],
            name: Some(name.to_string()),
            entity_type,
            sources,
        }
    }

    #[test]
    fn test_hero_by_role() {
        let c = CategoryClassifier::default();
        let batman = entity("Batman", EntityType::Character, json!({"role": "hero"}));
        assert_eq!(c.classify(&batman), Category::Hero);
        assert_eq!(c.matching_rule(&batman), Some("hero"));
    }

    #[test]
    fn test_villain_by_nested_alignment() {
        let c = CategoryClassifier::default();
        let joker = entity(
            "Joker",
            EntityType::Character,
            json!({"biography": {"alignment": "bad"}}),
        );
        assert_eq!(c.classify(&joker), Category::Villain);
    }

    #[test]
    fn test_sidekick_beats_hero() {
        let c = CategoryClassifier::default();
        let robin = entity("Robin", EntityType::Character, json!({"role": "hero"}));
        assert_eq!(c.classify(&robin), Category::Sidekick);
    }

    #[test]
    fn test_henchman_role_list() {
        let c = CategoryClassifier::default();
        let goon = entity(
            "Mr. Freeze's Thug",
            EntityType::Character,
            json!({"roles": ["villain", "henchman"]}),
        );
        assert_eq!(c.classify(&goon), Category::Henchman);
    }

    #[test]
    fn test_hero_by_name_suffix() {
        let c = CategoryClassifier::default();
        let spidey = entity("Spider-Man", EntityType::Character, json!({}));
        let supergirl = entity("Supergirl", EntityType::Character, json!({}));
        let man = entity("Man", EntityType::Character, json!({}));
        assert_eq!(c.classify(&spidey), Category::Hero);
        assert_eq!(c.classify(&supergirl), Category::Hero);
        assert_eq!(c.classify(&man), Category::Other);
    }

    #[test]
    fn test_creators() {
        let c = CategoryClassifier::default();
        let writer = entity("Stan Lee", EntityType::Creator, json!({"role": "Writer"}));
        let artist = entity(
            "Jack Kirby",
            EntityType::Creator,
            json!({"roles": [{"name": "Penciler"}]}),
        );
        let unknown = entity("Someone", EntityType::Creator, json!({}));
        assert_eq!(c.classify(&writer), Category::CreatorWriter);
        assert_eq!(c.classify(&artist), Category::CreatorArtist);
        assert_eq!(c.classify(&unknown), Category::CreatorWriter);
    }

    #[test]
    fn test_entity_type_rules() {
        let c = CategoryClassifier::default();
        let cases = [
            (EntityType::Publisher, Category::Publisher),
            (EntityType::Issue, Category::KeyIssue),
            (EntityType::Location, Category::Location),
            (EntityType::Object, Category::Gadget),
            (EntityType::Team, Category::Team),
        ];
        for (entity_type, expected) in cases {
            assert_eq!(c.classify(&entity("X", entity_type, json!({}))), expected);
        }
    }

    #[test]
    fn test_gadget_name_and_fallback() {
        let c = CategoryClassifier::default();
        let ring = entity("Green Lantern Ring", EntityType::Other, json!({}));
        let blob = entity("Blob", EntityType::Other, json!({}));
        assert_eq!(c.classify(&ring), Category::Gadget);
        assert_eq!(c.classify(&blob), Category::Other);
    }

    #[test]
    fn test_first_match_wins_with_custom_rules() {
        let rules = vec![
            Rule::new("a", Condition::EntityTypeIs(EntityType::Character), Category::Team),
            Rule::new("b", Condition::EntityTypeIs(EntityType::Character), Category::Hero),
        ];
        let c = CategoryClassifier::new(rules);
        let e = entity("Batman", EntityType::Character, json!({}));
        assert_eq!(c.classify(&e), Category::Team);
    }
}
