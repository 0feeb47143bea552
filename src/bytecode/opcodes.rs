/// JVM opcodes and instruction-stream iteration
use crate::bytecode::classfile::ClassFormatError;

pub const ILOAD: u8 = 0x15;
pub const IINC: u8 = 0x84;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const WIDE: u8 = 0xc4;

/// One decoded instruction: opcode, offset within the method body and the
/// operand bytes that follow the opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub opcode: u8,
    pub operands: &'a [u8],
}

impl Instruction<'_> {
    /// Constant pool index carried by field and invoke instructions
    pub fn pool_index(&self) -> Option<u16> {
        match self.operands {
            [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }

    pub fn is_invoke(&self) -> bool {
        matches!(
            self.opcode,
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE
        )
    }

    pub fn is_field_access(&self) -> bool {
        matches!(self.opcode, GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD)
    }
}

/// Total encoded length (opcode included) of the instruction at `offset`
pub fn instruction_length(code: &[u8], offset: usize) -> Result<usize, ClassFormatError> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        TABLESWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let entries = i64::from(high) - i64::from(low) + 1;
            if entries < 0 {
                return Err(ClassFormatError::UnknownOpcode { opcode, offset });
            }
            1 + switch_padding(offset) + 12 + entries as usize * 4
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                return Err(ClassFormatError::UnknownOpcode { opcode, offset });
            }
            1 + switch_padding(offset) + 8 + pairs as usize * 8
        }
        0xac..=0xb1 => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        WIDE => match code.get(offset + 1) {
            Some(&IINC) => 6,
            Some(_) => 4,
            None => {
                return Err(ClassFormatError::Truncated {
                    offset: offset + 1,
                    wanted: 1,
                })
            }
        },
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca | 0xfe | 0xff => 1,
        _ => return Err(ClassFormatError::UnknownOpcode { opcode, offset }),
    };
    Ok(length)
}

/// Switch operands are 4-byte aligned relative to the start of the body
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, ClassFormatError> {
    match code.get(at..at + 4) {
        Some(bytes) => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(ClassFormatError::Truncated {
            offset: at,
            wanted: 4,
        }),
    }
}

/// Iterator over the instructions of one method body
pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
}

impl<'a> Instructions<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, offset: 0 }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ClassFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.code.len() {
            return None;
        }
        let offset = self.offset;
        let length = match instruction_length(self.code, offset) {
            Ok(length) => length,
            Err(err) => {
                self.offset = self.code.len();
                return Some(Err(err));
            }
        };
        let end = offset + length;
        if end > self.code.len() {
            self.offset = self.code.len();
            return Some(Err(ClassFormatError::Truncated {
                offset,
                wanted: length,
            }));
        }
        self.offset = end;
        Some(Ok(Instruction {
            offset,
            opcode: self.code[offset],
            operands: &self.code[offset + 1..end],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opcodes(code: &[u8]) -> Vec<(usize, u8)> {
        Instructions::new(code)
            .map(|instruction| instruction.map(|i| (i.offset, i.opcode)))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_simple_stream() {
        // aload_0; invokespecial #1; getstatic #2; ldc #3; return
        let code = [0x2a, 0xb7, 0, 1, 0xb2, 0, 2, 0x12, 3, 0xb1];
        assert_eq!(
            opcodes(&code),
            vec![(0, 0x2a), (1, INVOKESPECIAL), (4, GETSTATIC), (7, 0x12), (9, 0xb1)]
        );
        let invoke = Instructions::new(&code).nth(1).unwrap().unwrap();
        assert!(invoke.is_invoke());
        assert_eq!(invoke.pool_index(), Some(1));
    }

    #[test]
    fn test_tableswitch_padding() {
        // three iconst_0, tableswitch at 3: no padding, low 0, high 1, two targets
        let mut code = vec![0x03, 0x03, 0x03, TABLESWITCH];
        for value in [20i32, 0, 1, 20, 20] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        code.push(0xb1);
        assert_eq!(instruction_length(&code, 3).unwrap(), 1 + 12 + 8);
        assert_eq!(opcodes(&code).last(), Some(&(24, 0xb1)));

        // at offset 2 the operands need one byte of padding
        let mut code = vec![0x03, 0x03, TABLESWITCH, 0];
        for value in [20i32, 0, 0, 20] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        assert_eq!(instruction_length(&code, 2).unwrap(), 1 + 1 + 12 + 4);
    }

    #[test]
    fn test_lookupswitch_padding() {
        // lookupswitch at 0: three bytes of padding, default, one pair
        let mut code = vec![LOOKUPSWITCH, 0, 0, 0];
        for value in [10i32, 1, 7, 10] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        code.push(0xb1);
        assert_eq!(instruction_length(&code, 0).unwrap(), 4 + 8 + 8);
        assert_eq!(opcodes(&code).last(), Some(&(20, 0xb1)));
    }

    #[test]
    fn test_wide_forms() {
        let code = [WIDE, ILOAD, 1, 0, WIDE, IINC, 0, 1, 0, 5, 0xb1];
        assert_eq!(opcodes(&code), vec![(0, WIDE), (4, WIDE), (10, 0xb1)]);
    }

    #[test]
    fn test_unknown_and_truncated() {
        assert!(matches!(
            Instructions::new(&[0xcb]).next(),
            Some(Err(ClassFormatError::UnknownOpcode { opcode: 0xcb, offset: 0 }))
        ));
        assert!(matches!(
            Instructions::new(&[INVOKESTATIC, 0]).next(),
            Some(Err(ClassFormatError::Truncated { .. }))
        ));
    }
}
