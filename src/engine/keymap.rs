//! Layered key resolution.
//!
//! Layers form a stack: the base sits at the bottom and toggled layers pile on
//! top. A keycode resolves by walking the stack top-down, skipping transparent
//! cells, and taking the first concrete binding. Each binding cell also tracks
//! the last half of the press/release cycle it saw, so duplicate presses from
//! auto-repeat can be rejected.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::button::Button;
use crate::event::{KeyCode, Switch};

/// Interned layer name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerTag(pub String);

impl LayerTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for LayerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Already-resolved button tables, as handed over by the loader. Contains no
/// alias references.
pub struct ButtonMap {
    pub layers: HashMap<LayerTag, HashMap<KeyCode, Button>>,
    pub base: LayerTag,
}

/// Mutating operations on the layer stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOp {
    Push(LayerTag),
    Pop(LayerTag),
    SetBase(LayerTag),
}

/// Per-binding state: the button bound there and the last half of the cycle
/// it ran. Press and release must alternate.
pub struct KeyBinding {
    pub button: Button,
    pub last: Option<Switch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingId(usize);

pub struct Keymap {
    layers: HashMap<LayerTag, HashMap<KeyCode, BindingId>>,
    /// Index 0 is the base; the last element is the top of the stack.
    stack: Vec<LayerTag>,
    bindings: Vec<KeyBinding>,
}

impl Keymap {
    pub fn new(map: ButtonMap) -> Self {
        let mut bindings = Vec::new();
        let mut layers = HashMap::new();
        for (tag, table) in map.layers {
            let mut cells = HashMap::new();
            for (code, button) in table {
                let id = BindingId(bindings.len());
                bindings.push(KeyBinding { button, last: None });
                cells.insert(code, id);
            }
            layers.insert(tag, cells);
        }
        Self {
            layers,
            stack: vec![map.base],
            bindings,
        }
    }

    /// Walk the stack top-down, skipping transparent cells; the first concrete
    /// binding wins.
    pub fn lookup(&self, code: KeyCode) -> Option<BindingId> {
        for tag in self.stack.iter().rev() {
            let Some(cells) = self.layers.get(tag) else {
                continue;
            };
            if let Some(&id) = cells.get(&code) {
                if !matches!(self.bindings[id.0].button, Button::Trans) {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn binding(&self, id: BindingId) -> &KeyBinding {
        &self.bindings[id.0]
    }

    pub fn binding_mut(&mut self, id: BindingId) -> &mut KeyBinding {
        &mut self.bindings[id.0]
    }

    pub fn apply(&mut self, op: LayerOp) {
        match op {
            LayerOp::Push(tag) => {
                if !self.has_layer(&tag) {
                    warn!(layer = %tag, "cannot push unknown layer");
                    return;
                }
                debug!(layer = %tag, "layer pushed");
                self.stack.push(tag);
            }
            LayerOp::Pop(tag) => {
                // Topmost occurrence, so re-entrant toggles unwind correctly.
                match self.stack.iter().rposition(|t| t == &tag) {
                    Some(pos) if pos > 0 => {
                        self.stack.remove(pos);
                        debug!(layer = %tag, "layer popped");
                    }
                    _ => warn!(layer = %tag, "cannot pop layer that is not active"),
                }
            }
            LayerOp::SetBase(tag) => {
                if !self.has_layer(&tag) {
                    warn!(layer = %tag, "cannot set unknown layer as base");
                    return;
                }
                debug!(layer = %tag, "base layer set");
                self.stack[0] = tag;
            }
        }
    }

    pub fn has_layer(&self, tag: &LayerTag) -> bool {
        self.layers.contains_key(tag)
    }

    pub fn is_active(&self, tag: &LayerTag) -> bool {
        self.stack.contains(tag)
    }

    #[cfg(test)]
    pub fn stack(&self) -> &[LayerTag] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(layers: &[(&str, &[(u32, Button)])], base: &str) -> ButtonMap {
        ButtonMap {
            layers: layers
                .iter()
                .map(|(name, table)| {
                    (
                        LayerTag::new(*name),
                        table
                            .iter()
                            .map(|(code, b)| (KeyCode(*code), b.clone()))
                            .collect(),
                    )
                })
                .collect(),
            base: LayerTag::new(base),
        }
    }

    fn button_of(keymap: &Keymap, code: u32) -> Option<Button> {
        keymap
            .lookup(KeyCode(code))
            .map(|id| keymap.binding(id).button.clone())
    }

    #[test]
    fn lookup_prefers_the_top_layer() {
        let mut keymap = Keymap::new(map(
            &[
                ("base", &[(16, Button::Emit(KeyCode(30)))]),
                ("nav", &[(16, Button::Emit(KeyCode(44)))]),
            ],
            "base",
        ));

        assert_eq!(button_of(&keymap, 16), Some(Button::Emit(KeyCode(30))));
        keymap.apply(LayerOp::Push(LayerTag::new("nav")));
        assert_eq!(button_of(&keymap, 16), Some(Button::Emit(KeyCode(44))));
        keymap.apply(LayerOp::Pop(LayerTag::new("nav")));
        assert_eq!(button_of(&keymap, 16), Some(Button::Emit(KeyCode(30))));
    }

    #[test]
    fn transparent_cells_fall_through() {
        let mut keymap = Keymap::new(map(
            &[
                ("base", &[(16, Button::Emit(KeyCode(30)))]),
                ("nav", &[(16, Button::Trans), (17, Button::Emit(KeyCode(50)))]),
            ],
            "base",
        ));
        keymap.apply(LayerOp::Push(LayerTag::new("nav")));

        assert_eq!(button_of(&keymap, 16), Some(Button::Emit(KeyCode(30))));
        assert_eq!(button_of(&keymap, 17), Some(Button::Emit(KeyCode(50))));
        assert_eq!(button_of(&keymap, 18), None);
    }

    #[test]
    fn pop_removes_the_topmost_occurrence() {
        let mut keymap = Keymap::new(map(
            &[("base", &[]), ("nav", &[]), ("fun", &[])],
            "base",
        ));
        keymap.apply(LayerOp::Push(LayerTag::new("nav")));
        keymap.apply(LayerOp::Push(LayerTag::new("fun")));
        keymap.apply(LayerOp::Push(LayerTag::new("nav")));

        keymap.apply(LayerOp::Pop(LayerTag::new("nav")));
        let names: Vec<&str> = keymap.stack().iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["base", "nav", "fun"]);
    }

    #[test]
    fn bad_layer_ops_are_ignored() {
        let mut keymap = Keymap::new(map(&[("base", &[])], "base"));
        keymap.apply(LayerOp::Push(LayerTag::new("ghost")));
        keymap.apply(LayerOp::Pop(LayerTag::new("ghost")));
        keymap.apply(LayerOp::Pop(LayerTag::new("base")));
        keymap.apply(LayerOp::SetBase(LayerTag::new("ghost")));

        let names: Vec<&str> = keymap.stack().iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["base"]);
    }

    #[test]
    fn set_base_swaps_the_bottom_of_the_stack() {
        let mut keymap = Keymap::new(map(&[("base", &[]), ("game", &[])], "base"));
        keymap.apply(LayerOp::Push(LayerTag::new("game")));
        keymap.apply(LayerOp::SetBase(LayerTag::new("game")));

        let names: Vec<&str> = keymap.stack().iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["game", "game"]);
        // Re-applying the current base is fine.
        keymap.apply(LayerOp::SetBase(LayerTag::new("game")));
        assert_eq!(keymap.stack().len(), 2);
    }
}
