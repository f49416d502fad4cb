//! Binary program image
//!
//! Layout (all integers little-endian):
//! - Header: magic `SVB\0` + version u16
//! - Constants: count u32, then each string as length u32 + UTF-8 bytes
//! - Functions: count u32, then per function:
//!   id u16, name, parent flag u8 (+ id u16), return type u8,
//!   params (count u16, then type u8 + name), scopes (count u16, then
//!   id u16 + slot count u16 + type u8 + name per slot), code length u32 + bytes
//!
//! The u16 counts always fit: [`Program::new`] rejects functions with more
//! than 65535 parameters, scopes or slots per scope.

use crate::program::{
    ConstantPool, Function, Program, ProgramError, ScopeDecl, Signature, SlotDecl,
};
use crate::value::VarType;
use thiserror::Error;

/// Magic bytes opening every image
pub const IMAGE_MAGIC: &[u8; 4] = b"SVB\0";

/// Current image format version
///
/// Incremented whenever the layout changes incompatibly; images with a
/// different version are rejected.
pub const IMAGE_VERSION: u16 = 1;

/// Errors raised while reading an image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("invalid image: too short")]
    TooShort,

    #[error("invalid image: bad magic number (expected 'SVB\\0')")]
    BadMagic,

    #[error("image version mismatch: file has version {found}, this runtime supports {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("invalid image: {0} truncated")]
    Truncated(&'static str),

    #[error("invalid image: {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("invalid image: unknown type tag {0}")]
    InvalidType(u8),

    #[error("invalid image: expected {expected} bytes, consumed {consumed}")]
    TrailingBytes { expected: usize, consumed: usize },

    #[error("invalid image: {0}")]
    Program(#[from] ProgramError),
}

impl Program {
    /// Serialize to the binary image format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(IMAGE_MAGIC);
        bytes.extend_from_slice(&IMAGE_VERSION.to_le_bytes());

        bytes.extend_from_slice(&(self.constants().len() as u32).to_le_bytes());
        for constant in self.constants().iter() {
            write_str(&mut bytes, constant);
        }

        bytes.extend_from_slice(&(self.functions().len() as u32).to_le_bytes());
        for function in self.functions() {
            write_function(&mut bytes, function);
        }
        bytes
    }

    /// Deserialize from the binary image format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < 6 {
            return Err(ImageError::TooShort);
        }
        if &bytes[0..4] != IMAGE_MAGIC {
            return Err(ImageError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != IMAGE_VERSION {
            return Err(ImageError::VersionMismatch {
                found: version,
                expected: IMAGE_VERSION,
            });
        }

        let mut reader = Reader { bytes, pos: 6 };

        let const_count = reader.u32("constant count")? as usize;
        let mut constants = Vec::with_capacity(const_count.min(bytes.len()));
        for _ in 0..const_count {
            constants.push(reader.string("constant")?);
        }

        let fn_count = reader.u32("function count")? as usize;
        let mut functions = Vec::with_capacity(fn_count.min(bytes.len()));
        for _ in 0..fn_count {
            functions.push(reader.function()?);
        }

        if reader.pos != bytes.len() {
            return Err(ImageError::TrailingBytes {
                expected: bytes.len(),
                consumed: reader.pos,
            });
        }

        Ok(Program::new(ConstantPool::from(constants), functions)?)
    }
}

fn write_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}

fn write_function(bytes: &mut Vec<u8>, function: &Function) {
    bytes.extend_from_slice(&function.id().to_le_bytes());
    write_str(bytes, function.name());
    match function.parent() {
        Some(parent) => {
            bytes.push(1);
            bytes.extend_from_slice(&parent.to_le_bytes());
        }
        None => bytes.push(0),
    }

    let signature = function.signature();
    bytes.push(signature.ret.to_byte());
    bytes.extend_from_slice(&(signature.params.len() as u16).to_le_bytes());
    for (ty, name) in &signature.params {
        bytes.push(ty.to_byte());
        write_str(bytes, name);
    }

    bytes.extend_from_slice(&(function.scopes().len() as u16).to_le_bytes());
    for scope in function.scopes() {
        bytes.extend_from_slice(&scope.id.to_le_bytes());
        bytes.extend_from_slice(&(scope.slots.len() as u16).to_le_bytes());
        for slot in &scope.slots {
            bytes.push(slot.ty.to_byte());
            write_str(bytes, &slot.name);
        }
    }

    bytes.extend_from_slice(&(function.bytecode().len() as u32).to_le_bytes());
    bytes.extend_from_slice(function.bytecode());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(n).ok_or(ImageError::Truncated(what))?;
        let slice = self.bytes.get(self.pos..end).ok_or(ImageError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ImageError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ImageError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ImageError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, what: &'static str) -> Result<String, ImageError> {
        let len = self.u32(what)? as usize;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ImageError::InvalidUtf8(what))
    }

    fn var_type(&mut self, what: &'static str) -> Result<VarType, ImageError> {
        let tag = self.u8(what)?;
        VarType::from_byte(tag).ok_or(ImageError::InvalidType(tag))
    }

    fn function(&mut self) -> Result<Function, ImageError> {
        let id = self.u16("function id")?;
        let name = self.string("function name")?;
        let parent = match self.u8("function parent")? {
            0 => None,
            _ => Some(self.u16("function parent")?),
        };

        let ret = self.var_type("return type")?;
        let param_count = self.u16("parameter count")?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            let ty = self.var_type("parameter type")?;
            params.push((ty, self.string("parameter name")?));
        }

        let scope_count = self.u16("scope count")?;
        let mut scopes = Vec::with_capacity(scope_count as usize);
        for _ in 0..scope_count {
            let scope_id = self.u16("scope id")?;
            let slot_count = self.u16("slot count")?;
            let mut slots = Vec::with_capacity(slot_count as usize);
            for _ in 0..slot_count {
                let ty = self.var_type("slot type")?;
                slots.push(SlotDecl::new(self.string("slot name")?, ty));
            }
            scopes.push(ScopeDecl::new(scope_id, slots));
        }

        let code_len = self.u32("code length")? as usize;
        let code = self.take(code_len, "code")?.to_vec();

        let function = Function::new(id, name, Signature::new(ret, params), scopes, code);
        Ok(match parent {
            Some(parent) => function.with_parent(parent),
            None => function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, Opcode};
    use pretty_assertions::assert_eq;

    fn sample() -> Program {
        let mut main = Bytecode::new();
        main.emit(Opcode::SLoad).emit_u16(0).emit(Opcode::SPrint);
        main.emit(Opcode::Call).emit_u16(1).emit(Opcode::Stop);
        let mut helper = Bytecode::new();
        helper.emit(Opcode::Return);

        Program::new(
            ConstantPool::from(vec!["héllo".to_string()]),
            vec![
                Function::new(
                    0,
                    "main",
                    Signature::void(),
                    vec![ScopeDecl::new(0, vec![SlotDecl::new("g", VarType::Double)])],
                    main.into_bytes(),
                ),
                Function::new(
                    1,
                    "helper",
                    Signature::new(VarType::Void, vec![(VarType::Int, "n".into())]),
                    vec![ScopeDecl::new(1, vec![SlotDecl::new("n", VarType::Int)])],
                    helper.into_bytes(),
                )
                .with_parent(0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_image_roundtrip() {
        let program = sample();
        let bytes = program.to_bytes();
        assert_eq!(&bytes[0..4], IMAGE_MAGIC);
        assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
    }

    #[test]
    fn test_image_rejects_bad_header() {
        assert_eq!(Program::from_bytes(b"SVB"), Err(ImageError::TooShort));
        assert_eq!(
            Program::from_bytes(b"ATB\0\x01\x00"),
            Err(ImageError::BadMagic)
        );
        assert_eq!(
            Program::from_bytes(b"SVB\0\x09\x00"),
            Err(ImageError::VersionMismatch {
                found: 9,
                expected: IMAGE_VERSION
            })
        );
    }

    #[test]
    fn test_image_rejects_truncation() {
        let bytes = sample().to_bytes();
        let cut = &bytes[..bytes.len() - 1];
        assert_eq!(Program::from_bytes(cut), Err(ImageError::Truncated("code")));
    }

    #[test]
    fn test_image_rejects_trailing_bytes() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(ImageError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn test_image_rejects_unknown_type_tag() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(IMAGE_MAGIC);
        bytes.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        bytes.push(7);
        assert_eq!(Program::from_bytes(&bytes), Err(ImageError::InvalidType(7)));
    }
}
