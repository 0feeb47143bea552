/// Incremental construction of a [`PermissionGraph`]
use crate::access::graph::PermissionGraph;
use crate::access::key::SymbolKey;
use crate::access::node::{Decision, MethodNode, PathNode, PermissionNode};
use crate::access::policy::{number_rules, PolicyParseError, PolicyRule};
use crate::access::signature::MethodSignature;

const ROOT_NAME: &str = "";

pub struct PermissionGraphBuilder {
    root: PathNode,
}

impl Default for PermissionGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGraphBuilder {
    pub fn new() -> Self {
        Self {
            root: PathNode::new(ROOT_NAME, Decision::NotSet),
        }
    }

    /// Builder pre-populated from policy lines (`!` prefix denies).
    /// Errors carry the 1-based position of the offending line.
    pub fn of<I, S>(lines: I) -> Result<Self, PolicyParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Self::new();
        builder.apply(number_rules(lines))?;
        Ok(builder)
    }

    /// Apply numbered rules in order; a failure reports the rule's line
    pub fn apply<I>(&mut self, rules: I) -> Result<&mut Self, PolicyParseError>
    where
        I: IntoIterator<Item = (usize, PolicyRule)>,
    {
        for (line, rule) in rules {
            self.rule(&rule).map_err(|err| err.at_line(line))?;
        }
        Ok(self)
    }

    pub fn rule(&mut self, rule: &PolicyRule) -> Result<&mut Self, PolicyParseError> {
        if rule.deny {
            self.deny(&rule.symbol)
        } else {
            self.permit(&rule.symbol)
        }
    }

    pub fn permit(&mut self, symbol: &str) -> Result<&mut Self, PolicyParseError> {
        self.insert(&SymbolKey::infer(symbol), Decision::Permitted)?;
        Ok(self)
    }

    pub fn deny(&mut self, symbol: &str) -> Result<&mut Self, PolicyParseError> {
        self.insert(&SymbolKey::infer(symbol), Decision::Denied)?;
        Ok(self)
    }

    pub fn build(self) -> PermissionGraph {
        PermissionGraph::from_root(self.root)
    }

    fn insert(&mut self, key: &SymbolKey, decision: Decision) -> Result<(), PolicyParseError> {
        let segments = key.split();
        let Some((last, parents)) = segments.split_last() else {
            return Err(PolicyParseError::EmptyName(key.value().to_string()));
        };

        // Parse before touching the tree so a bad rule leaves no NotSet debris
        let node = if key.denotes_method() {
            PermissionNode::Method(MethodNode {
                signature: MethodSignature::parse(key.value())?,
                decision,
            })
        } else {
            PermissionNode::Path(PathNode::new(*last, decision))
        };

        let mut parent = &mut self.root;
        for segment in parents {
            parent = parent.path_child_or_insert(segment);
        }
        parent.upsert(node);
        Ok(())
    }
}
