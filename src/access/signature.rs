/// Method signatures as they appear in policies and in observed calls
///
/// Grammar: `<class>#<method>[(<p1>, <p2>, ...)][:<return>]`. A missing
/// parameter list or return type is the wildcard `*`.
use crate::access::key::METHOD_SEPARATOR;
use crate::access::policy::PolicyParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WILDCARD: &str = "*";

const CONSTRUCTOR_NAME: &str = "<init>";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSignature {
    pub class_name: String,
    pub method_name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        return_type: impl Into<String>,
        parameter_types: Vec<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            return_type: return_type.into(),
            parameter_types,
        }
    }

    /// Signature matching any overload and return type
    pub fn wildcard(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self::new(
            class_name,
            method_name,
            WILDCARD,
            vec![WILDCARD.to_string()],
        )
    }

    pub fn parse(input: &str) -> std::result::Result<Self, PolicyParseError> {
        let normalized = input.trim().replace('/', ".");
        let Some((class_name, rest)) = normalized.split_once(METHOD_SEPARATOR) else {
            return Err(PolicyParseError::MissingMethodName(input.trim().to_string()));
        };
        let class_name = class_name.trim();

        let (method_name, parameter_types, trailer) = match rest.find('(') {
            Some(open) => {
                let close = rest
                    .rfind(')')
                    .filter(|close| *close > open)
                    .ok_or_else(|| PolicyParseError::UnterminatedParameters(input.trim().to_string()))?;
                (
                    &rest[..open],
                    parse_parameter_types(&rest[open + 1..close]),
                    &rest[close + 1..],
                )
            }
            None => match rest.find(':') {
                Some(colon) => (&rest[..colon], vec![WILDCARD.to_string()], &rest[colon..]),
                None => (rest, vec![WILDCARD.to_string()], ""),
            },
        };

        let method_name = method_name.trim();
        if class_name.is_empty() || method_name.is_empty() {
            return Err(PolicyParseError::EmptyName(input.trim().to_string()));
        }

        let return_type = match trailer.trim().strip_prefix(':') {
            Some(return_type) if !return_type.trim().is_empty() => return_type.trim().to_string(),
            _ => WILDCARD.to_string(),
        };

        Ok(Self::new(class_name, method_name, return_type, parameter_types))
    }

    pub fn has_wildcard_parameters(&self) -> bool {
        self.parameter_types.len() == 1 && self.parameter_types[0] == WILDCARD
    }

    pub fn has_wildcard_return_type(&self) -> bool {
        self.return_type == WILDCARD
    }

    /// Structural match with `self` as the rule: the rule's wildcards accept
    /// anything, everything else must be identical.
    pub fn matches(&self, call: &MethodSignature) -> bool {
        self.class_name == call.class_name
            && self.method_name == call.method_name
            && (self.has_wildcard_parameters() || self.parameter_types == call.parameter_types)
            && (self.has_wildcard_return_type() || self.return_type == call.return_type)
    }

    pub fn is_constructor(&self) -> bool {
        self.method_name == CONSTRUCTOR_NAME
    }

    pub fn format_name_and_parameters(&self) -> String {
        format!("{}({})", self.method_name, self.parameter_types.join(", "))
    }

    pub fn format_without_types(&self) -> String {
        format!("{}{}{}", self.class_name, METHOD_SEPARATOR, self.method_name)
    }
}

fn parse_parameter_types(input: &str) -> Vec<String> {
    if input.trim().is_empty() {
        return Vec::new();
    }
    input.split(',').map(|part| part.trim().to_string()).collect()
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}:{}",
            self.class_name,
            METHOD_SEPARATOR,
            self.format_name_and_parameters(),
            self.return_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_signature() {
        assert_eq!(
            MethodSignature::parse("java/lang/System#exit(int):void").unwrap(),
            MethodSignature::new("java.lang.System", "exit", "void", vec!["int".to_string()])
        );
    }

    #[test]
    fn test_parse_without_return_type() {
        assert_eq!(
            MethodSignature::parse("java/lang/String#join(java/lang/CharSequence, java/lang/Iterable)")
                .unwrap(),
            MethodSignature::new(
                "java.lang.String",
                "join",
                WILDCARD,
                vec![
                    "java.lang.CharSequence".to_string(),
                    "java.lang.Iterable".to_string()
                ]
            )
        );
    }

    #[test]
    fn test_parse_bare_method_is_wildcard() {
        let signature = MethodSignature::parse("  java.io.PrintStream#println ").unwrap();
        assert!(signature.has_wildcard_parameters());
        assert!(signature.has_wildcard_return_type());
        assert_eq!(signature, MethodSignature::wildcard("java.io.PrintStream", "println"));
    }

    #[test]
    fn test_parse_return_type_without_parameters() {
        let signature = MethodSignature::parse("a.Foo#size:int").unwrap();
        assert!(signature.has_wildcard_parameters());
        assert_eq!(signature.return_type, "int");
    }

    #[test]
    fn test_empty_parameter_list() {
        let signature = MethodSignature::parse("java/lang/Thread#sleep()").unwrap();
        assert!(signature.parameter_types.is_empty());
        assert!(!signature.has_wildcard_parameters());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            MethodSignature::parse("java.lang.System"),
            Err(PolicyParseError::MissingMethodName(_))
        ));
        assert!(matches!(
            MethodSignature::parse("a.Foo#run(int"),
            Err(PolicyParseError::UnterminatedParameters(_))
        ));
        assert!(matches!(
            MethodSignature::parse("a.Foo#"),
            Err(PolicyParseError::EmptyName(_))
        ));
    }

    #[test]
    fn test_rule_side_wildcards() {
        let rule = MethodSignature::wildcard("a.Foo", "run");
        let call = MethodSignature::new("a.Foo", "run", "void", vec!["int".to_string()]);
        assert!(rule.matches(&call));
        assert!(!call.matches(&rule));
        assert!(!rule.matches(&MethodSignature::new("a.Bar", "run", "void", Vec::new())));
    }

    #[test]
    fn test_format() {
        let signature = MethodSignature::parse("a.b.c.Foo#run(String[], int):void").unwrap();
        assert_eq!(signature.to_string(), "a.b.c.Foo#run(String[], int):void");
        assert_eq!(signature.format_without_types(), "a.b.c.Foo#run");
        assert!(MethodSignature::parse("a.Foo#<init>()").unwrap().is_constructor());
    }
}
