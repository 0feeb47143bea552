/// JVM class-file decoding
///
/// Decodes just enough of a class file to walk method bodies: the constant
/// pool, the class/field/method tables and each method's `Code` attribute.
/// Other attributes are skipped by length.
use crate::bytecode::cursor::{Cursor, Truncated};
use thiserror::Error;

pub const MAGIC: u32 = 0xcafe_babe;

const CODE_ATTRIBUTE: &str = "Code";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("truncated at offset {offset} (wanted {wanted} bytes)")]
    Truncated { offset: usize, wanted: usize },

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("{kind} constant at index {index} has no second slot in a pool of {count}")]
    WideConstantOverflow {
        kind: &'static str,
        index: u16,
        count: u16,
    },

    #[error("constant pool index {index} is not a {expected}")]
    InvalidConstant { index: u16, expected: &'static str },

    #[error("unknown opcode {opcode:#04x} at code offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

impl From<Truncated> for ClassFormatError {
    fn from(err: Truncated) -> Self {
        ClassFormatError::Truncated {
            offset: err.offset,
            wanted: err.wanted,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    /// Slot 0 and the slot after a long/double
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

/// A resolved field or method reference. `owner` is the internal
/// (slash-separated) class name, or an array descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, ClassFormatError> {
        let count = cursor.read_u16()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(Constant::Unusable);
        // u32 so the slot after a wide constant cannot overflow
        let mut index = 1u32;
        while index < u32::from(count) {
            let slot = index as u16;
            let tag = cursor.read_u8()?;
            let constant = match tag {
                1 => {
                    let len = cursor.read_u16()?;
                    let bytes = cursor.take(usize::from(len))?;
                    Constant::Utf8(String::from_utf8_lossy(bytes).into_owned())
                }
                3 => Constant::Integer(cursor.read_i32()?),
                4 => Constant::Float(f32::from_bits(cursor.read_u32()?)),
                5 => Constant::Long(cursor.read_u64()? as i64),
                6 => Constant::Double(f64::from_bits(cursor.read_u64()?)),
                7 => Constant::Class {
                    name_index: cursor.read_u16()?,
                },
                8 => Constant::String {
                    string_index: cursor.read_u16()?,
                },
                9 => Constant::FieldRef {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                10 => Constant::MethodRef {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                12 => Constant::NameAndType {
                    name_index: cursor.read_u16()?,
                    descriptor_index: cursor.read_u16()?,
                },
                15 => Constant::MethodHandle {
                    kind: cursor.read_u8()?,
                    reference_index: cursor.read_u16()?,
                },
                16 => Constant::MethodType {
                    descriptor_index: cursor.read_u16()?,
                },
                17 => Constant::Dynamic {
                    bootstrap_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                19 => Constant::Module {
                    name_index: cursor.read_u16()?,
                },
                20 => Constant::Package {
                    name_index: cursor.read_u16()?,
                },
                tag => return Err(ClassFormatError::UnknownConstantTag { tag, index: slot }),
            };
            let wide = match constant {
                Constant::Long(_) => Some("Long"),
                Constant::Double(_) => Some("Double"),
                _ => None,
            };
            entries.push(constant);
            index += 1;
            if let Some(kind) = wide {
                if index >= u32::from(count) {
                    return Err(ClassFormatError::WideConstantOverflow {
                        kind,
                        index: slot,
                        count,
                    });
                }
                entries.push(Constant::Unusable);
                index += 1;
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(usize::from(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(value)) => Ok(value),
            _ => Err(ClassFormatError::InvalidConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Internal name of a `Class` constant
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class { name_index }) => self.utf8(*name_index),
            _ => Err(ClassFormatError::InvalidConstant {
                index,
                expected: "Class",
            }),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index) {
            Some(Constant::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassFormatError::InvalidConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a field, method or interface-method reference
    pub fn member_ref(&self, index: u16) -> Result<MemberRef, ClassFormatError> {
        let (class_index, name_and_type_index) = match self.get(index) {
            Some(Constant::FieldRef {
                class_index,
                name_and_type_index,
            })
            | Some(Constant::MethodRef {
                class_index,
                name_and_type_index,
            })
            | Some(Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            }) => (*class_index, *name_and_type_index),
            _ => {
                return Err(ClassFormatError::InvalidConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner: self.class_name(class_index)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    /// Bytecode of the `Code` attribute; `None` for abstract and native methods
    pub code: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    /// Internal (slash-separated) name
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constant_pool: ConstantPool,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = cursor.read_u16()?;
        let major_version = cursor.read_u16()?;
        let constant_pool = ConstantPool::decode(&mut cursor)?;

        let access_flags = cursor.read_u16()?;
        let this_class = constant_pool.class_name(cursor.read_u16()?)?.to_string();
        let super_index = cursor.read_u16()?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interface_count = cursor.read_u16()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(cursor.read_u16()?)?.to_string());
        }

        let field_count = cursor.read_u16()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            let access_flags = cursor.read_u16()?;
            let name = constant_pool.utf8(cursor.read_u16()?)?.to_string();
            let descriptor = constant_pool.utf8(cursor.read_u16()?)?.to_string();
            skip_attributes(&mut cursor)?;
            fields.push(FieldInfo {
                access_flags,
                name,
                descriptor,
            });
        }

        let method_count = cursor.read_u16()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            methods.push(decode_method(&mut cursor, &constant_pool)?);
        }

        skip_attributes(&mut cursor)?;

        Ok(Self {
            minor_version,
            major_version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            constant_pool,
        })
    }

    /// Dotted class name, as used in policies
    pub fn dotted_name(&self) -> String {
        self.this_class.replace('/', ".")
    }
}

fn decode_method(
    cursor: &mut Cursor<'_>,
    constant_pool: &ConstantPool,
) -> Result<MethodInfo, ClassFormatError> {
    let access_flags = cursor.read_u16()?;
    let name = constant_pool.utf8(cursor.read_u16()?)?.to_string();
    let descriptor = constant_pool.utf8(cursor.read_u16()?)?.to_string();

    let mut code = None;
    let attribute_count = cursor.read_u16()?;
    for _ in 0..attribute_count {
        let attribute_name = constant_pool.utf8(cursor.read_u16()?)?;
        let len = cursor.read_u32()? as usize;
        let body = cursor.take(len)?;
        if attribute_name == CODE_ATTRIBUTE {
            code = Some(decode_code(body)?);
        }
    }

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        code,
    })
}

fn decode_code(body: &[u8]) -> Result<Vec<u8>, ClassFormatError> {
    let mut cursor = Cursor::new(body);
    // max_stack, max_locals
    cursor.skip(4)?;
    let code_length = cursor.read_u32()? as usize;
    Ok(cursor.take(code_length)?.to_vec())
}

fn skip_attributes(cursor: &mut Cursor<'_>) -> Result<(), ClassFormatError> {
    let count = cursor.read_u16()?;
    for _ in 0..count {
        cursor.skip(2)?;
        let len = cursor.read_u32()? as usize;
        cursor.skip(len)?;
    }
    Ok(())
}
