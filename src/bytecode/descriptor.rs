/// Field and method descriptors rendered as Java type names
///
/// `(I[Ljava/lang/String;)V` becomes parameters `["int", "java.lang.String[]"]`
/// and return type `void`.
use crate::bytecode::classfile::ClassFormatError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameter_types: Vec<String>,
    pub return_type: String,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, ClassFormatError> {
        let invalid = || ClassFormatError::InvalidDescriptor(descriptor.to_string());
        let rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let (parameters, return_part) = rest.split_once(')').ok_or_else(invalid)?;

        let mut parameter_types = Vec::new();
        let mut remaining = parameters;
        while !remaining.is_empty() {
            let (name, consumed) = parse_field_type(remaining).ok_or_else(invalid)?;
            parameter_types.push(name);
            remaining = &remaining[consumed..];
        }

        let return_type = match return_part {
            "V" => "void".to_string(),
            other => match parse_field_type(other) {
                Some((name, consumed)) if consumed == other.len() => name,
                _ => return Err(invalid()),
            },
        };

        Ok(Self {
            parameter_types,
            return_type,
        })
    }
}

/// Java name of a single field descriptor
pub fn field_type_name(descriptor: &str) -> Result<String, ClassFormatError> {
    match parse_field_type(descriptor) {
        Some((name, consumed)) if consumed == descriptor.len() => Ok(name),
        _ => Err(ClassFormatError::InvalidDescriptor(descriptor.to_string())),
    }
}

/// Dotted class name for an owner as it appears in a `Class` constant.
/// Array owners (`[Ljava/lang/String;`) render as `java.lang.String[]`.
pub fn owner_class_name(internal: &str) -> Result<String, ClassFormatError> {
    if internal.starts_with('[') {
        field_type_name(internal)
    } else {
        Ok(internal.replace('/', "."))
    }
}

/// Parse one field type from the front of `input`, returning its Java name
/// and the number of bytes consumed.
fn parse_field_type(input: &str) -> Option<(String, usize)> {
    let dimensions = input.bytes().take_while(|byte| *byte == b'[').count();
    let element = &input[dimensions..];
    let (base, consumed) = match element.as_bytes().first()? {
        b'B' => ("byte".to_string(), 1),
        b'C' => ("char".to_string(), 1),
        b'D' => ("double".to_string(), 1),
        b'F' => ("float".to_string(), 1),
        b'I' => ("int".to_string(), 1),
        b'J' => ("long".to_string(), 1),
        b'S' => ("short".to_string(), 1),
        b'Z' => ("boolean".to_string(), 1),
        b'L' => {
            let end = element.find(';')?;
            if end == 1 {
                return None;
            }
            (element[1..end].replace('/', "."), end + 1)
        }
        _ => return None,
    };
    Some((format!("{}{}", base, "[]".repeat(dimensions)), dimensions + consumed))
}
