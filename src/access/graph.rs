/// Immutable permission graph with closest-match lookups
use crate::access::builder::PermissionGraphBuilder;
use crate::access::key::SymbolKey;
use crate::access::node::{Decision, PathNode, PermissionNode};
use crate::access::policy::PolicyParseError;
use crate::access::signature::MethodSignature;
use std::fmt;

/// Read-only after construction; share it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionGraph {
    root: PathNode,
}

/// Where a walk ended: the deepest path node reached and, if the walk got as
/// far as the last segment, every child carrying that segment's name.
struct Walk<'a> {
    node: &'a PathNode,
    candidates: Vec<&'a PermissionNode>,
}

impl PermissionGraph {
    /// Graph that denies everything
    pub fn empty() -> Self {
        Self {
            root: PathNode::new("", Decision::Denied),
        }
    }

    pub fn builder() -> PermissionGraphBuilder {
        PermissionGraphBuilder::new()
    }

    /// Build from policy lines, one rule per line
    pub fn of<I, S>(lines: I) -> Result<Self, PolicyParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(PermissionGraphBuilder::of(lines)?.build())
    }

    pub(crate) fn from_root(root: PathNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathNode {
        &self.root
    }

    pub fn is_permitted(&self, key: &SymbolKey) -> bool {
        let segments = key.split();
        let walk = self.walk(&segments);
        let decision = match walk.candidates.first() {
            Some(candidate) => candidate.decision(),
            None => walk.node.decision,
        };
        decision.is_permitted()
    }

    pub fn is_method_permitted(&self, call: &MethodSignature) -> bool {
        let key = SymbolKey::dot_separated(call.format_without_types());
        let segments = key.split();
        let walk = self.walk(&segments);
        let decision = match walk.candidates.as_slice() {
            [] => walk.node.decision,
            [PermissionNode::Path(path)] => path.decision,
            [PermissionNode::Method(method)] => {
                if method.signature.matches(call) {
                    method.decision
                } else {
                    Decision::NotSet
                }
            }
            overloads => overloads
                .iter()
                .find(|candidate| candidate.matches_method(call))
                .map(|candidate| candidate.decision())
                .unwrap_or(Decision::NotSet),
        };
        decision.is_permitted()
    }

    fn walk<'a>(&'a self, segments: &[&'a str]) -> Walk<'a> {
        let Some((last, parents)) = segments.split_last() else {
            panic!("permission lookup with an empty key");
        };

        // Method nodes are leaves: only the last segment can name a method,
        // so a class nested under a same-named method is not governed by it
        let mut node = &self.root;
        for segment in parents {
            match node.path_child(segment) {
                Some(child) => node = child,
                None => {
                    return Walk {
                        node,
                        candidates: Vec::new(),
                    }
                }
            }
        }
        Walk {
            node,
            candidates: node.children_named(*last).collect(),
        }
    }
}

impl fmt::Display for PermissionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(text: &str) -> MethodSignature {
        MethodSignature::parse(text).unwrap()
    }

    #[test]
    fn test_empty_graph_denies_everything() {
        let graph = PermissionGraph::empty();
        assert!(!graph.is_permitted(&SymbolKey::infer("java.lang.Object")));
        assert!(!graph.is_method_permitted(&signature("java.lang.Object#<init>()")));
    }

    #[test]
    fn test_closest_match() {
        let graph = PermissionGraph::of(["java.lang"]).unwrap();
        assert!(graph.is_permitted(&SymbolKey::infer("java/lang/String")));
        assert!(graph.is_permitted(&SymbolKey::infer("java.lang.invoke.MethodHandle")));
        assert!(!graph.is_permitted(&SymbolKey::infer("java.util.List")));
        assert!(graph.is_method_permitted(&signature("java.lang.Thread#sleep(long):void")));
    }

    #[test]
    fn test_intermediate_segment_skips_method_nodes() {
        let graph = PermissionGraph::of(["a.Foo", "!a.Foo#run(int)"]).unwrap();
        assert!(graph.is_permitted(&SymbolKey::infer("a.Foo.run.Inner")));
        assert!(!graph.is_method_permitted(&signature("a.Foo#run(int):void")));
    }

    #[test]
    fn test_overload_disambiguation() {
        let graph = PermissionGraph::of(["A#run(int)"]).unwrap();
        assert!(graph.is_method_permitted(&MethodSignature::new(
            "A",
            "run",
            "*",
            vec!["int".to_string()]
        )));
        assert!(!graph.is_method_permitted(&MethodSignature::new(
            "A",
            "run",
            "void",
            vec!["String".to_string()]
        )));
    }

    #[test]
    fn test_first_matching_overload_wins() {
        let graph = PermissionGraph::of(["a.Foo#run(int)", "!a.Foo#run(long)", "!a.Foo#run"]).unwrap();
        assert!(graph.is_method_permitted(&signature("a.Foo#run(int):void")));
        assert!(!graph.is_method_permitted(&signature("a.Foo#run(long):void")));
        assert!(!graph.is_method_permitted(&signature("a.Foo#run(java.lang.String):void")));
    }

    #[test]
    fn test_path_candidate_among_overloads_needs_literal_name() {
        let graph = PermissionGraph::of(["!a.Foo#size(int)", "a.Foo.size"]).unwrap();
        assert!(!graph.is_method_permitted(&signature("a.Foo#size(int):int")));
        assert!(graph.is_method_permitted(&signature("a.Foo#size():int")));
    }

    #[test]
    fn test_exact_signature_from_policy() {
        let graph = PermissionGraph::of(["a.b.c.Foo#run(String[], int):void"]).unwrap();
        assert!(graph.is_method_permitted(&signature("a.b.c.Foo#run(String[], int):void")));
        assert!(!graph.is_method_permitted(&signature("a.b.c.Foo#run():void")));
    }

    #[test]
    #[should_panic(expected = "empty key")]
    fn test_empty_key_is_a_programming_error() {
        PermissionGraph::empty().is_permitted(&SymbolKey::infer(""));
    }
}
