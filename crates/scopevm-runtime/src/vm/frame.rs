//! Call frames and the lexical context chain
//!
//! Frames live in a fixed-capacity arena and refer to each other by index.
//! Each frame owns a block of scope slots in the VM's slot storage:
//!
//! ```text
//! slots: [main: g0 g1][f: n acc][g: t]
//!         ^            ^         ^
//!         frame 0      frame 1   frame 2
//! ```
//!
//! Scope lookups follow `static_link` (the enclosing function's live
//! activation), never `caller`.

use crate::error::RuntimeError;
use crate::program::{Function, FunctionId, Program, ScopeId};
use crate::value::VarType;

/// One live function activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallFrame {
    pub(crate) function: FunctionId,
    /// Offset of the next instruction in the function's stream
    pub(crate) pc: usize,
    /// Frame that executed the CALL (dynamic link)
    pub(crate) caller: Option<usize>,
    /// Frame running the statically enclosing function
    pub(crate) static_link: Option<usize>,
    /// First slot of this frame's scopes in slot storage
    pub(crate) slot_base: usize,
    /// Operand-stack depth when the frame was entered
    pub(crate) stack_base: usize,
}

/// Frame arena with a hard capacity
#[derive(Debug)]
pub(crate) struct FrameStack {
    frames: Vec<CallFrame>,
    capacity: usize,
}

impl FrameStack {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, frame: CallFrame) -> Result<usize, RuntimeError> {
        if self.frames.len() >= self.capacity {
            return Err(RuntimeError::FrameStackOverflow {
                capacity: self.capacity,
            });
        }
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }

    pub(crate) fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    pub(crate) fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// Static link for a new activation of `callee` called from `caller`
    ///
    /// The nearest frame running the callee's parent on the caller's
    /// static chain; functions without a parent nest in the top-level
    /// frame. The walk is bounded by static nesting depth.
    pub(crate) fn static_link_for(
        &self,
        program: &Program,
        callee: &Function,
        caller: Option<usize>,
    ) -> Result<Option<usize>, RuntimeError> {
        let Some(caller) = caller else {
            return Ok(None);
        };
        let Some(parent) = callee.parent() else {
            return Ok(Some(0));
        };
        let mut cursor = Some(caller);
        while let Some(index) = cursor {
            let frame = self.frames.get(index).ok_or(RuntimeError::StackUnderflow)?;
            if frame.function == parent {
                return Ok(Some(index));
            }
            cursor = frame.static_link;
        }
        Err(RuntimeError::DetachedCall {
            function: callee.name().to_string(),
            parent: program
                .function(parent)
                .map_or_else(|| parent.to_string(), |p| p.name().to_string()),
        })
    }

    /// Absolute slot index and declared type of `(scope, slot)` as seen
    /// from frame `from`
    ///
    /// Walks the static chain until a frame whose function declares
    /// `scope`. The walk is bounded by static nesting depth.
    pub(crate) fn resolve(
        &self,
        program: &Program,
        from: usize,
        scope: ScopeId,
        slot: u16,
    ) -> Result<(usize, VarType), RuntimeError> {
        let mut cursor = Some(from);
        while let Some(index) = cursor {
            let frame = self.frames.get(index).ok_or(RuntimeError::StackUnderflow)?;
            let function = program
                .function(frame.function)
                .ok_or(RuntimeError::UnknownFunction(frame.function))?;
            if let Some(scope_idx) = function.scope_index(scope) {
                let len = function.scopes()[scope_idx].slots.len();
                let (offset, ty) = function
                    .slot_location(scope, slot)
                    .ok_or(RuntimeError::SlotOutOfRange { scope, slot, len })?;
                return Ok((frame.slot_base + offset, ty));
            }
            cursor = frame.static_link;
        }
        let function = self
            .frames
            .get(from)
            .and_then(|f| program.function(f.function))
            .map_or_else(String::new, |f| f.name().to_string());
        Err(RuntimeError::UnresolvedScope { scope, function })
    }
}
