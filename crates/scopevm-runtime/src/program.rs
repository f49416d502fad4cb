//! Program model: constant pool, function table and scope layout
//!
//! A [`Program`] is the finished unit the VM executes. It is immutable once
//! constructed; [`Program::new`] checks the structural rules the VM relies on
//! so the dispatch loop never has to.

use crate::value::{Value, VarType};
use thiserror::Error;

/// Index into the function table
pub type FunctionId = u16;

/// Static scope identifier
pub type ScopeId = u16;

/// Ordered table of string literals referenced by `SLOAD`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    strings: Vec<String>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a literal and return its index
    ///
    /// Identical literals share one entry. Indices are 16-bit, so the pool
    /// holds at most 65536 literals.
    pub fn add(&mut self, s: impl Into<String>) -> Result<u16, ProgramError> {
        let s = s.into();
        if let Some(pos) = self.strings.iter().position(|existing| *existing == s) {
            return u16::try_from(pos).map_err(|_| ProgramError::TooManyConstants(pos + 1));
        }
        let index = u16::try_from(self.strings.len())
            .map_err(|_| ProgramError::TooManyConstants(self.strings.len() + 1))?;
        self.strings.push(s);
        Ok(index)
    }

    pub fn get(&self, index: u16) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for ConstantPool {
    fn from(strings: Vec<String>) -> Self {
        Self { strings }
    }
}

/// One typed variable slot of a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    pub name: String,
    pub ty: VarType,
}

impl SlotDecl {
    pub fn new(name: impl Into<String>, ty: VarType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A lexical scope declared by a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDecl {
    pub id: ScopeId,
    pub slots: Vec<SlotDecl>,
}

impl ScopeDecl {
    pub fn new(id: ScopeId, slots: Vec<SlotDecl>) -> Self {
        Self { id, slots }
    }

    /// Position of the slot bound to `name`
    pub fn slot_named(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }
}

/// Parameter and return types of a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub ret: VarType,
    pub params: Vec<(VarType, String)>,
}

impl Signature {
    pub fn new(ret: VarType, params: Vec<(VarType, String)>) -> Self {
        Self { ret, params }
    }

    /// `void ()`
    pub fn void() -> Self {
        Self::new(VarType::Void, Vec::new())
    }

    /// Number of values the function leaves for its caller (0 or 1)
    pub fn return_arity(&self) -> usize {
        usize::from(self.ret != VarType::Void)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, (ty, name)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", ty, name)?;
        }
        f.write_str(")")
    }
}

/// A compiled function: signature, scopes and instruction stream
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    id: FunctionId,
    name: String,
    signature: Signature,
    parent: Option<FunctionId>,
    scopes: Vec<ScopeDecl>,
    bytecode: Vec<u8>,
    /// Offset of each scope's slots within the frame's slot block
    scope_offsets: Vec<usize>,
    slot_count: usize,
}

impl Function {
    pub fn new(
        id: FunctionId,
        name: impl Into<String>,
        signature: Signature,
        scopes: Vec<ScopeDecl>,
        bytecode: Vec<u8>,
    ) -> Self {
        let mut scope_offsets = Vec::with_capacity(scopes.len());
        let mut slot_count = 0;
        for scope in &scopes {
            scope_offsets.push(slot_count);
            slot_count += scope.slots.len();
        }
        Self {
            id,
            name: name.into(),
            signature,
            parent: None,
            scopes,
            bytecode,
            scope_offsets,
            slot_count,
        }
    }

    /// Statically enclosing function
    ///
    /// Context lookups that miss this function's own scopes continue in
    /// the nearest live activation of `parent`. Without a parent the
    /// function nests directly in the top-level function.
    pub fn with_parent(mut self, parent: FunctionId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn parent(&self) -> Option<FunctionId> {
        self.parent
    }

    pub fn scopes(&self) -> &[ScopeDecl] {
        &self.scopes
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Total slots across every declared scope
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// The scope the non-context variable opcodes address
    pub fn local_scope(&self) -> Option<&ScopeDecl> {
        self.scopes.first()
    }

    /// Position of `scope` in the declaration list
    pub fn scope_index(&self, scope: ScopeId) -> Option<usize> {
        self.scopes.binary_search_by_key(&scope, |s| s.id).ok()
    }

    /// Frame-relative slot index of `(scope, slot)`, plus its declared type
    pub fn slot_location(&self, scope: ScopeId, slot: u16) -> Option<(usize, VarType)> {
        let idx = self.scope_index(scope)?;
        let decl = self.scopes[idx].slots.get(slot as usize)?;
        Some((self.scope_offsets[idx] + slot as usize, decl.ty))
    }

    /// Declared types of the whole slot block, in layout order
    pub fn slot_types(&self) -> impl Iterator<Item = VarType> + '_ {
        self.scopes
            .iter()
            .flat_map(|scope| scope.slots.iter().map(|slot| slot.ty))
    }
}

/// Structural problems detected while assembling a [`Program`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("program has no top-level function")]
    Empty,

    #[error("function at position {position} has id {id}; ids must be dense and ordered")]
    NonDenseId { position: usize, id: FunctionId },

    #[error("function '{function}' declares scope {scope} out of order or twice")]
    UnsortedScopes { function: String, scope: ScopeId },

    #[error("function '{function}' names unknown parent {parent}")]
    UnknownParent { function: String, parent: FunctionId },

    #[error("top-level function cannot have a parent")]
    TopLevelParent,

    #[error("too many functions ({0}); ids are 16-bit")]
    TooManyFunctions(usize),

    #[error("too many constants ({0}); indices are 16-bit")]
    TooManyConstants(usize),

    #[error("function '{function}' declares {count} {what}; at most 65535 allowed")]
    TooManyEntries {
        function: String,
        what: &'static str,
        count: usize,
    },
}

fn check_count(function: &Function, what: &'static str, count: usize) -> Result<(), ProgramError> {
    if count > usize::from(u16::MAX) {
        return Err(ProgramError::TooManyEntries {
            function: function.name.clone(),
            what,
            count,
        });
    }
    Ok(())
}

/// A bound initial (and, on success, final) global value
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub value: Value,
}

impl Global {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A finished bytecode unit
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    constants: ConstantPool,
    functions: Vec<Function>,
}

impl Program {
    /// Assemble a program, checking the function table
    pub fn new(constants: ConstantPool, functions: Vec<Function>) -> Result<Self, ProgramError> {
        if functions.is_empty() {
            return Err(ProgramError::Empty);
        }
        if functions.len() > usize::from(u16::MAX) + 1 {
            return Err(ProgramError::TooManyFunctions(functions.len()));
        }
        if constants.len() > usize::from(u16::MAX) + 1 {
            return Err(ProgramError::TooManyConstants(constants.len()));
        }
        for (position, function) in functions.iter().enumerate() {
            check_count(function, "parameters", function.signature.params.len())?;
            check_count(function, "scopes", function.scopes.len())?;
            for scope in &function.scopes {
                check_count(function, "slots in one scope", scope.slots.len())?;
            }
            if usize::from(function.id) != position {
                return Err(ProgramError::NonDenseId {
                    position,
                    id: function.id,
                });
            }
            for pair in function.scopes.windows(2) {
                if pair[0].id >= pair[1].id {
                    return Err(ProgramError::UnsortedScopes {
                        function: function.name.clone(),
                        scope: pair[1].id,
                    });
                }
            }
            match function.parent {
                Some(_) if position == 0 => return Err(ProgramError::TopLevelParent),
                Some(parent) if usize::from(parent) >= functions.len() => {
                    return Err(ProgramError::UnknownParent {
                        function: function.name.clone(),
                        parent,
                    })
                }
                _ => {}
            }
        }
        Ok(Self {
            constants,
            functions,
        })
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id as usize)
    }

    /// The top-level function (id 0)
    pub fn top_level(&self) -> &Function {
        &self.functions[0]
    }

    /// Scope whose slot names bind initial globals
    pub fn global_scope(&self) -> Option<&ScopeDecl> {
        self.top_level().local_scope()
    }
}
