//! Fixed-depth parse tree for online log template mining.
//!
//! The tree is a trie over the leading tokens of a normalized line.
//! Internal nodes route on one token per level; the node reached after
//! `max_depth` tokens (or when the tokens run out) owns a list of leaf
//! groups, each holding one candidate template.
//!
//! Nodes and groups live in two arenas addressed by integer ids, so the
//! structure has no shared mutable references and no cycles. The tree
//! itself is single-threaded; [`TemplateMiner`](crate::miner::TemplateMiner)
//! puts the lock around it.
//!
//! # Matching
//!
//! 1. Walk the tree, trying the exact child before the `<*>` child at
//!    every level (the only backtracking point).
//! 2. At a leaf, put the tokens in template form (placeholders verbatim,
//!    other tokens cut to `prefix_len` characters) and score every
//!    candidate with Jaccard similarity.
//! 3. The best candidate at or above `similarity_threshold` absorbs the
//!    line. Otherwise a new group is created along the insert route.

use serde::Serialize;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::models::TemplateId;
use crate::tokenize::{is_placeholder, WILDCARD};

pub type NodeId = usize;
pub type GroupId = usize;

const ROOT: NodeId = 0;

/// Tree tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    /// Number of leading tokens consumed before a node becomes a leaf.
    pub max_depth: usize,
    /// Per-node fanout before new tokens fall back to the `<*>` child.
    pub max_children: usize,
    /// Minimum Jaccard similarity for a line to join an existing template.
    pub similarity_threshold: f64,
    /// Characters kept from literal tokens in a new template.
    pub prefix_len: usize,
    /// Route tokens containing digits through `<*>` instead of giving
    /// each value its own child.
    pub parametrize_numeric: bool,
    /// Cap on candidates scored per leaf. `None` scores them all.
    pub max_groups_per_leaf: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_children: 100,
            similarity_threshold: 0.5,
            prefix_len: 8,
            parametrize_numeric: true,
            max_groups_per_leaf: None,
        }
    }
}

#[derive(Debug)]
struct TreeNode {
    depth: usize,
    /// Routing token this node was created for; `None` at the root.
    token_label: Option<String>,
    children: HashMap<String, NodeId>,
    leaf_groups: Vec<GroupId>,
}

impl TreeNode {
    fn new(depth: usize, token_label: Option<String>) -> Self {
        Self {
            depth,
            token_label,
            children: HashMap::new(),
            leaf_groups: Vec::new(),
        }
    }

    /// Children excluding the wildcard, which does not count against fanout.
    fn fanout(&self) -> usize {
        self.children.len() - usize::from(self.children.contains_key(WILDCARD))
    }
}

/// One candidate template stored at a leaf.
#[derive(Debug, Clone)]
pub struct LeafGroup {
    pub pattern: Vec<String>,
    pub pattern_string: String,
    /// Lines merged into this group, including the one that created it.
    pub members: u64,
    pub example: String,
    /// Catalog id, once the catalog has resolved the pattern.
    pub template_id: Option<TemplateId>,
    pattern_set: HashSet<String>,
}

/// Outcome of [`DrainTree::insert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeInsert {
    pub group: GroupId,
    pub created: bool,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub groups: usize,
    pub max_depth: usize,
    pub max_children: usize,
    pub similarity_threshold: f64,
}

/// Arena-backed Drain parse tree.
#[derive(Debug)]
pub struct DrainTree {
    config: TreeConfig,
    nodes: Vec<TreeNode>,
    groups: Vec<LeafGroup>,
}

impl DrainTree {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: vec![TreeNode::new(0, None)],
            groups: Vec::new(),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Merge a line into its best template, creating one if nothing
    /// clears the similarity threshold. `example` is kept on new groups.
    pub fn insert(&mut self, tokens: &[String], example: &str) -> TreeInsert {
        let form = template_form(tokens, self.config.prefix_len);
        let form_set: HashSet<&str> = form.iter().map(String::as_str).collect();

        if let Some((group, similarity)) = self.find(ROOT, tokens, &form_set) {
            self.groups[group].members += 1;
            return TreeInsert {
                group,
                created: false,
                similarity,
            };
        }

        let leaf = self.route_for_insert(tokens);
        let group = self.groups.len();
        self.groups.push(LeafGroup {
            pattern_string: form.join(" "),
            pattern_set: form.iter().cloned().collect(),
            pattern: form,
            members: 1,
            example: example.to_string(),
            template_id: None,
        });
        self.nodes[leaf].leaf_groups.push(group);
        TreeInsert {
            group,
            created: true,
            similarity: 1.0,
        }
    }

    /// Read-only best match. Never creates nodes or groups.
    pub fn lookup(&self, tokens: &[String]) -> Option<GroupId> {
        let form = template_form(tokens, self.config.prefix_len);
        let form_set: HashSet<&str> = form.iter().map(String::as_str).collect();
        self.find(ROOT, tokens, &form_set).map(|(group, _)| group)
    }

    pub fn bind_template(&mut self, group: GroupId, template_id: TemplateId) {
        if let Some(g) = self.groups.get_mut(group) {
            g.template_id = Some(template_id);
        }
    }

    pub fn group(&self, group: GroupId) -> Option<&LeafGroup> {
        self.groups.get(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = &LeafGroup> {
        self.groups.iter()
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            nodes: self.nodes.len(),
            groups: self.groups.len(),
            max_depth: self.config.max_depth,
            max_children: self.config.max_children,
            similarity_threshold: self.config.similarity_threshold,
        }
    }

    /// Indented rendering of the tree for debugging: one line per node
    /// with its routing token, then `= pattern (members)` per leaf group.
    /// Children are listed in label order.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(ROOT, &mut out);
        out
    }

    fn dump_node(&self, node: NodeId, out: &mut String) {
        let n = &self.nodes[node];
        let indent = "  ".repeat(n.depth);
        out.push_str(&format!("{}{}\n", indent, n.token_label.as_deref().unwrap_or("<root>")));
        for &gid in &n.leaf_groups {
            let g = &self.groups[gid];
            out.push_str(&format!("{}  = {} ({})\n", indent, g.pattern_string, g.members));
        }
        let mut children: Vec<NodeId> = n.children.values().copied().collect();
        children.sort_by(|a, b| self.nodes[*a].token_label.cmp(&self.nodes[*b].token_label));
        for child in children {
            self.dump_node(child, out);
        }
    }

    fn is_leaf(&self, node: NodeId, remaining: &[String]) -> bool {
        self.nodes[node].depth >= self.config.max_depth || remaining.is_empty()
    }

    fn find(
        &self,
        node: NodeId,
        tokens: &[String],
        form_set: &HashSet<&str>,
    ) -> Option<(GroupId, f64)> {
        if self.is_leaf(node, tokens) {
            return self.best_group(node, form_set);
        }

        let children = &self.nodes[node].children;
        let token = tokens[0].as_str();
        if let Some(&child) = children.get(token) {
            if let Some(hit) = self.find(child, &tokens[1..], form_set) {
                return Some(hit);
            }
        }
        if token != WILDCARD {
            if let Some(&child) = children.get(WILDCARD) {
                return self.find(child, &tokens[1..], form_set);
            }
        }
        None
    }

    fn best_group(&self, node: NodeId, form_set: &HashSet<&str>) -> Option<(GroupId, f64)> {
        let groups = &self.nodes[node].leaf_groups;
        let limit = self.config.max_groups_per_leaf.unwrap_or(groups.len());

        let mut best: Option<(GroupId, f64)> = None;
        for &gid in groups.iter().take(limit) {
            let sim = jaccard(form_set, &self.groups[gid].pattern_set);
            if sim < self.config.similarity_threshold {
                continue;
            }
            if best.map(|(_, b)| sim > b).unwrap_or(true) {
                best = Some((gid, sim));
            }
        }
        best
    }

    /// Walk (and extend) the tree along the insert route, returning the leaf.
    fn route_for_insert(&mut self, tokens: &[String]) -> NodeId {
        let mut node = ROOT;
        for token in tokens.iter().take(self.config.max_depth) {
            let key = self.route_key(node, token);
            node = match self.nodes[node].children.get(&key) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    let depth = self.nodes[node].depth + 1;
                    self.nodes.push(TreeNode::new(depth, Some(key.clone())));
                    self.nodes[node].children.insert(key, child);
                    child
                }
            };
        }
        node
    }

    fn route_key(&self, node: NodeId, token: &str) -> String {
        let n = &self.nodes[node];
        if self.config.parametrize_numeric && token.bytes().any(|b| b.is_ascii_digit()) {
            return WILDCARD.to_string();
        }
        if n.children.contains_key(token) {
            return token.to_string();
        }
        if n.fanout() >= self.config.max_children {
            return WILDCARD.to_string();
        }
        token.to_string()
    }

    #[cfg(test)]
    fn child_labels(&self, path: &[&str]) -> Option<Vec<String>> {
        let mut node = ROOT;
        for label in path {
            node = *self.nodes[node].children.get(*label)?;
        }
        let mut labels: Vec<String> = self.nodes[node].children.keys().cloned().collect();
        labels.sort();
        Some(labels)
    }
}

/// Template form of a token sequence: placeholders verbatim, literal
/// tokens cut to their first `prefix_len` characters.
pub fn template_form(tokens: &[String], prefix_len: usize) -> Vec<String> {
    tokens
        .iter()
        .map(|t| {
            if is_placeholder(t) {
                t.clone()
            } else {
                t.chars().take(prefix_len).collect()
            }
        })
        .collect()
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|`. Two empty sets score `1.0`.
pub fn jaccard<A, B>(a: &HashSet<A>, b: &HashSet<B>) -> f64
where
    A: Borrow<str> + Eq + Hash,
    B: Borrow<str> + Eq + Hash,
{
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut intersection = 0;
    for token in a {
        if b.contains(Borrow::<str>::borrow(token)) {
            intersection += 1;
        }
    }
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::normalize;

    fn set<'a>(tokens: &[&'a str]) -> HashSet<&'a str> {
        tokens.iter().copied().collect()
    }

    fn literal_config() -> TreeConfig {
        TreeConfig {
            parametrize_numeric: false,
            ..TreeConfig::default()
        }
    }

    #[test]
    fn test_jaccard_bounds() {
        assert_eq!(jaccard(&set(&[]), &set(&[])), 1.0);
        assert_eq!(jaccard(&set(&["a"]), &set(&[])), 0.0);
        assert_eq!(jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
        let s = jaccard(&set(&["a", "b", "c"]), &set(&["b", "c", "d"]));
        assert!((s - 0.5).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn test_template_form_truncates_literals_only() {
        let tokens = normalize("Connection refused 42 0xff /tmp/x");
        let form = template_form(&tokens, 8);
        assert_eq!(form, vec!["Connecti", "refused", "<NUM>", "<HEX>", "<PATH>"]);
    }

    #[test]
    fn test_same_line_twice_one_group() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let tokens = normalize("disk quota exceeded for user 1001");
        let first = tree.insert(&tokens, "a");
        let second = tree.insert(&tokens, "a");
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.group, second.group);
        assert_eq!(tree.group(first.group).unwrap().members, 2);
        assert_eq!(tree.stats().groups, 1);
    }

    #[test]
    fn test_dump_shows_route_labels_and_groups() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let tokens = normalize("user alice logged in");
        tree.insert(&tokens, "a");
        tree.insert(&tokens, "a");
        tree.insert(&normalize("shutdown"), "b");

        let expected = "\
<root>
  shutdown
    = shutdown (1)
  user
    alice
      logged
        in
          = user alice logged in (2)
";
        assert_eq!(tree.dump(), expected);
    }

    #[test]
    fn test_timestamped_lines_collapse() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let a = normalize("2024-01-01 10:00:00 ERROR: Connection failed to 192.168.1.1:8080");
        let b = normalize("2024-01-01 10:00:01 ERROR: Connection failed to 192.168.1.2:8080");
        let first = tree.insert(&a, "a");
        let second = tree.insert(&b, "b");
        assert_eq!(first.group, second.group);
        let group = tree.group(first.group).unwrap();
        assert!(group.pattern.contains(&"<IP>".to_string()));
        assert_eq!(group.example, "a");
    }

    #[test]
    fn test_dissimilar_lines_split() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let a = tree.insert(&normalize("user alice logged in"), "");
        let b = tree.insert(&normalize("user alice deleted repository permanently"), "");
        assert_ne!(a.group, b.group);
    }

    #[test]
    fn test_lookup_is_pure_and_deterministic() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let tokens = normalize("cache miss for key session");
        let inserted = tree.insert(&tokens, "");
        let before = tree.stats();

        let query = normalize("cache miss for key token");
        let first = tree.lookup(&query);
        for _ in 0..5 {
            assert_eq!(tree.lookup(&query), first);
        }
        assert_eq!(first, Some(inserted.group));
        assert!(tree.lookup(&normalize("completely unrelated words here")).is_none());

        let after = tree.stats();
        assert_eq!(before.nodes, after.nodes);
        assert_eq!(before.groups, after.groups);
    }

    #[test]
    fn test_wildcard_fallback_past_fanout() {
        let config = TreeConfig {
            max_children: 3,
            ..literal_config()
        };
        let mut tree = DrainTree::new(config);
        for word in ["alpha", "beta", "gamma", "delta"] {
            tree.insert(&normalize(&format!("svc {} started", word)), "");
        }
        assert_eq!(
            tree.child_labels(&["svc"]).unwrap(),
            vec!["<*>", "alpha", "beta", "gamma"]
        );

        // Later values route through the wildcard, not new children.
        tree.insert(&normalize("svc epsilon started"), "");
        tree.insert(&normalize("svc zeta started"), "");
        assert_eq!(tree.child_labels(&["svc"]).unwrap().len(), 4);
        assert!(tree.child_labels(&["svc", "<*>"]).is_some());

        // Existing children keep their exact route.
        let hit = tree.lookup(&normalize("svc alpha started"));
        let again = tree.insert(&normalize("svc alpha started"), "");
        assert_eq!(hit, Some(again.group));
        assert_eq!(tree.child_labels(&["svc"]).unwrap().len(), 4);
    }

    #[test]
    fn test_lookup_prefers_exact_then_wildcard() {
        let config = TreeConfig {
            max_children: 1,
            ..literal_config()
        };
        let mut tree = DrainTree::new(config);
        let exact = tree.insert(&normalize("job alpha finished ok"), "");
        let wild = tree.insert(&normalize("job beta finished ok"), "");
        assert_ne!(exact.group, wild.group);

        assert_eq!(tree.lookup(&normalize("job alpha finished ok")), Some(exact.group));
        // No exact child for "gamma": the wildcard branch answers.
        assert_eq!(tree.lookup(&normalize("job gamma finished ok")), Some(wild.group));
    }

    #[test]
    fn test_numeric_tokens_route_through_wildcard() {
        let mut tree = DrainTree::new(TreeConfig::default());
        tree.insert(&normalize("worker-7 heartbeat ok"), "");
        assert_eq!(tree.child_labels(&[]).unwrap(), vec!["<*>"]);

        let mut literal = DrainTree::new(literal_config());
        literal.insert(&normalize("worker-7 heartbeat ok"), "");
        assert_eq!(literal.child_labels(&[]).unwrap(), vec!["worker-7"]);
    }

    #[test]
    fn test_short_and_empty_sequences() {
        let mut tree = DrainTree::new(TreeConfig::default());
        let empty = tree.insert(&[], "");
        assert!(empty.created);
        assert_eq!(tree.lookup(&[]), Some(empty.group));
        assert_eq!(tree.insert(&[], "").group, empty.group);

        let short = tree.insert(&normalize("shutdown"), "");
        assert_ne!(short.group, empty.group);
        assert_eq!(tree.lookup(&normalize("shutdown")), Some(short.group));
    }

    #[test]
    fn test_depth_matches_distance_from_root() {
        let mut tree = DrainTree::new(literal_config());
        tree.insert(&normalize("a b c d e f g"), "");
        let depths: Vec<usize> = tree.nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 4]);
        assert!(tree.nodes[4].children.is_empty());
        assert_eq!(tree.nodes[4].leaf_groups.len(), 1);
    }

    #[test]
    fn test_max_groups_per_leaf_limits_candidates() {
        let config = TreeConfig {
            max_groups_per_leaf: Some(1),
            similarity_threshold: 0.9,
            ..literal_config()
        };
        let mut tree = DrainTree::new(config);
        let a = tree.insert(&normalize("x y z w first"), "");
        let b = tree.insert(&normalize("x y z w second"), "");
        assert_ne!(a.group, b.group);
        // Only the first candidate is scored, so the second group is unreachable.
        assert_eq!(tree.lookup(&normalize("x y z w second")), None);
    }
}
