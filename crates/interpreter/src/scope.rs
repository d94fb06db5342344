//! Variable frames.
//!
//! Frames live in an arena and point at their parent by index. Entering a block
//! pushes a frame; leaving it pops the frame, so the arena only ever grows and
//! shrinks at the end.

use std::collections::HashMap;

use quill_values::Value;

use crate::errors::TypeError;

pub type FrameId = usize;

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<FrameId>,
}

/// The frames of one call. Variable names are stored without their `$` sigil.
#[derive(Debug)]
pub struct Scope {
    frames: Vec<Frame>,
    current: FrameId,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
            current: 0,
        }
    }

    /// Enters a child of the current frame.
    pub fn push(&mut self) -> FrameId {
        self.frames.push(Frame {
            vars: HashMap::new(),
            parent: Some(self.current),
        });
        self.current = self.frames.len() - 1;
        self.current
    }

    /// Leaves the current frame, discarding its variables. The root frame is never popped.
    pub fn pop(&mut self) {
        if let Some(parent) = self.frames[self.current].parent {
            self.frames.truncate(self.current);
            self.current = parent;
        }
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = Some(self.current);
        while let Some(id) = frame {
            depth += 1;
            frame = self.frames[id].parent;
        }
        depth
    }

    /// The frame that declared `name`, searching outwards from the current frame.
    pub fn find(&self, name: &str) -> Option<FrameId> {
        let mut frame = Some(self.current);
        while let Some(id) = frame {
            if self.frames[id].vars.contains_key(name) {
                return Some(id);
            }
            frame = self.frames[id].parent;
        }
        None
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.find(name).and_then(|id| self.frames[id].vars.get(name))
    }

    /// Binds `name` in the current frame. Shadowing an outer binding is allowed,
    /// redeclaring one in the same frame is not.
    pub fn declare(&mut self, name: &str, value: Value) -> Result<(), TypeError> {
        let vars = &mut self.frames[self.current].vars;
        if vars.contains_key(name) {
            return Err(TypeError::AlreadyDeclared(format!("${name}")));
        }
        vars.insert(name.to_owned(), value);
        Ok(())
    }

    /// Every visible binding, the innermost one for shadowed names.
    pub fn bindings(&self) -> Vec<(&str, &Value)> {
        let mut out: Vec<(&str, &Value)> = vec![];
        let mut frame = Some(self.current);
        while let Some(id) = frame {
            for (name, value) in &self.frames[id].vars {
                if !out.iter().any(|(n, _)| *n == name) {
                    out.push((name, value));
                }
            }
            frame = self.frames[id].parent;
        }
        out
    }

    /// Overwrites `name` in the frame that declared it.
    pub fn set(&mut self, frame: FrameId, name: &str, value: Value) {
        if let Some(slot) = self.frames[frame].vars.get_mut(name) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inner_frames_see_outer_variables() {
        let mut scope = Scope::new();
        scope.declare("a", Value::int(1)).unwrap();
        scope.push();
        scope.declare("b", Value::int(2)).unwrap();
        assert_eq!(scope.get("a"), Some(&Value::int(1)));
        assert_eq!(scope.depth(), 2);
        scope.pop();
        assert_eq!(scope.get("b"), None);
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn assignment_mutates_declaring_frame() {
        let mut scope = Scope::new();
        scope.declare("sum", Value::int(0)).unwrap();
        scope.push();
        let frame = scope.find("sum").unwrap();
        scope.set(frame, "sum", Value::int(10));
        scope.pop();
        assert_eq!(scope.get("sum"), Some(&Value::int(10)));
    }

    #[test]
    fn shadowing_and_redeclaring() {
        let mut scope = Scope::new();
        scope.declare("x", Value::int(1)).unwrap();
        assert!(matches!(
            scope.declare("x", Value::int(2)),
            Err(TypeError::AlreadyDeclared(name)) if name == "$x"
        ));
        scope.push();
        scope.declare("x", Value::text("inner")).unwrap();
        assert_eq!(scope.get("x"), Some(&Value::text("inner")));
        scope.pop();
        assert_eq!(scope.get("x"), Some(&Value::int(1)));
    }

    #[test]
    fn root_is_never_popped() {
        let mut scope = Scope::new();
        scope.declare("x", Value::int(1)).unwrap();
        scope.pop();
        assert_eq!(scope.get("x"), Some(&Value::int(1)));
    }
}
