/// Permission tree nodes
use crate::access::signature::MethodSignature;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Permitted,
    Denied,
    NotSet,
}

impl Decision {
    pub fn is_permitted(self) -> bool {
        self == Decision::Permitted
    }
}

/// Named path segment (package, class, field). Owns its children in
/// insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    pub name: String,
    pub decision: Decision,
    pub children: Vec<PermissionNode>,
}

/// Method leaf, possibly one of several overloads sharing a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodNode {
    pub signature: MethodSignature,
    pub decision: Decision,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PermissionNode {
    Path(PathNode),
    Method(MethodNode),
}

impl PathNode {
    pub fn new(name: impl Into<String>, decision: Decision) -> Self {
        Self {
            name: name.into(),
            decision,
            children: Vec::new(),
        }
    }

    /// First path child with the given name
    pub fn path_child(&self, segment: &str) -> Option<&PathNode> {
        self.children.iter().find_map(|child| match child {
            PermissionNode::Path(path) if path.name == segment => Some(path),
            _ => None,
        })
    }

    /// All children (paths and overloads) named `segment`, in insertion order
    pub fn children_named<'a>(&'a self, segment: &'a str) -> impl Iterator<Item = &'a PermissionNode> {
        self.children
            .iter()
            .filter(move |child| child.matches_segment(segment))
    }

    /// Path child with the given name, created with `NotSet` if missing
    pub(crate) fn path_child_or_insert(&mut self, segment: &str) -> &mut PathNode {
        let index = self
            .children
            .iter()
            .position(|child| matches!(child, PermissionNode::Path(path) if path.name == segment));
        let index = match index {
            Some(index) => index,
            None => {
                self.children
                    .push(PermissionNode::Path(PathNode::new(segment, Decision::NotSet)));
                self.children.len() - 1
            }
        };
        match &mut self.children[index] {
            PermissionNode::Path(path) => path,
            PermissionNode::Method(_) => unreachable!("index points at a path child"),
        }
    }

    /// Update the existing node equal to `node` (same path name or same exact
    /// signature) or append `node`.
    pub(crate) fn upsert(&mut self, node: PermissionNode) {
        let existing = self.children.iter_mut().find(|child| match (&**child, &node) {
            (PermissionNode::Path(current), PermissionNode::Path(new)) => current.name == new.name,
            (PermissionNode::Method(current), PermissionNode::Method(new)) => {
                current.signature == new.signature
            }
            _ => false,
        });
        match existing {
            Some(child) => child.set_decision(node.decision()),
            None => self.children.push(node),
        }
    }
}

impl PermissionNode {
    /// Segment name: the path name, or the method name for method nodes
    pub fn name(&self) -> &str {
        match self {
            PermissionNode::Path(path) => &path.name,
            PermissionNode::Method(method) => &method.signature.method_name,
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            PermissionNode::Path(path) => path.decision,
            PermissionNode::Method(method) => method.decision,
        }
    }

    pub fn set_decision(&mut self, decision: Decision) {
        match self {
            PermissionNode::Path(path) => path.decision = decision,
            PermissionNode::Method(method) => method.decision = decision,
        }
    }

    pub fn is_method(&self) -> bool {
        matches!(self, PermissionNode::Method(_))
    }

    pub fn matches_segment(&self, segment: &str) -> bool {
        self.name() == segment
    }

    /// Path nodes only match a method whose name is literally their own.
    pub fn matches_method(&self, call: &MethodSignature) -> bool {
        match self {
            PermissionNode::Path(path) => path.name == call.method_name,
            PermissionNode::Method(method) => method.signature.matches(call),
        }
    }
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.decision)?;
        if self.children.is_empty() {
            return Ok(());
        }
        f.write_str(" [")?;
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{child}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for PermissionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionNode::Path(path) => write!(f, "{path}"),
            PermissionNode::Method(method) => write!(
                f,
                "{}={:?}",
                method.signature.format_name_and_parameters(),
                method.decision
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_updates_in_place() {
        let mut root = PathNode::new("root", Decision::NotSet);
        root.upsert(PermissionNode::Path(PathNode::new("java", Decision::Permitted)));
        root.upsert(PermissionNode::Path(PathNode::new("java", Decision::Denied)));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].decision(), Decision::Denied);
    }

    #[test]
    fn test_overloads_share_a_name() {
        let mut class = PathNode::new("Foo", Decision::NotSet);
        for parameter in ["int", "long"] {
            class.upsert(PermissionNode::Method(MethodNode {
                signature: MethodSignature::new("a.Foo", "run", "void", vec![parameter.to_string()]),
                decision: Decision::Permitted,
            }));
        }
        assert_eq!(class.children_named("run").count(), 2);
        assert!(class.path_child("run").is_none());
    }

    #[test]
    fn test_path_child_or_insert_creates_not_set() {
        let mut root = PathNode::new("root", Decision::NotSet);
        root.path_child_or_insert("a").path_child_or_insert("b");
        let a = root.path_child("a").unwrap();
        assert_eq!(a.decision, Decision::NotSet);
        assert!(a.path_child("b").is_some());
        root.path_child_or_insert("a");
        assert_eq!(root.children.len(), 1);
    }
}
