//! On-disk configuration and its resolution into engine tables.
//!
//! The file is RON. Buttons are written as an algebraic tree; `Ref("name")`
//! points into the alias table and is resolved away here, with cycle
//! detection, so the engine never sees a reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::button::Button;
use crate::engine::keymap::{ButtonMap, LayerTag};
use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::event::KeyCode;

/// `KeyCode` is a newtype; RON's default deserializer requires it spelled
/// out as `KeyCode(57)` rather than the bare `57` used throughout config
/// files, so `unwrap_newtypes` is enabled for every parse.
fn ron_options() -> ron::Options {
    ron::Options::default().with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
}

/// Button syntax as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ButtonSpec {
    Emit(KeyCode),
    LayerToggle(String),
    LayerSwitch(String),
    TapNext(Box<ButtonSpec>, Box<ButtonSpec>),
    TapHold(u64, Box<ButtonSpec>, Box<ButtonSpec>),
    MultiTap(Vec<(u64, ButtonSpec)>, Box<ButtonSpec>),
    /// MultiTap with every gap defaulted to `tap_gap_ms`.
    Taps(Vec<ButtonSpec>, Box<ButtonSpec>),
    Around(Box<ButtonSpec>, Box<ButtonSpec>),
    TapMacro(Vec<ButtonSpec>),
    ComposeSeq(Vec<ButtonSpec>),
    Pause(u64),
    Cmd(String),
    Trans,
    Block,
    Ref(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input device path; autodetected when absent.
    pub device: Option<PathBuf>,
    pub base_layer: String,
    /// Pass unmapped keys through unchanged instead of dropping them.
    pub fall_through: bool,
    /// Keycode tapped ahead of every ComposeSeq.
    pub compose_key: u32,
    /// Default gap between taps for `Taps` buttons.
    pub tap_gap_ms: u64,
    pub aliases: HashMap<String, ButtonSpec>,
    pub layers: HashMap<String, HashMap<KeyCode, ButtonSpec>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            base_layer: "base".into(),
            fall_through: true,
            compose_key: 127,
            tap_gap_ms: 200,
            aliases: HashMap::new(),
            layers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("keyflume").join("keyflume.ron"))
            .unwrap_or_else(|| PathBuf::from("keyflume.ron"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron_options()
            .from_str(&content)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Resolve aliases and validate layer references, producing the tables
    /// the engine consumes.
    pub fn resolve(&self) -> Result<(ButtonMap, EngineConfig), ConfigError> {
        if !self.layers.contains_key(&self.base_layer) {
            return Err(ConfigError::UnknownBaseLayer(self.base_layer.clone()));
        }
        let mut layers = HashMap::new();
        for (name, table) in &self.layers {
            let mut resolved = HashMap::new();
            for (code, spec) in table {
                let mut trail = Vec::new();
                resolved.insert(*code, self.resolve_spec(spec, &mut trail)?);
            }
            layers.insert(LayerTag::new(name.clone()), resolved);
        }
        for table in layers.values() {
            for button in table.values() {
                self.check_layer_refs(button)?;
            }
        }
        Ok((
            ButtonMap {
                layers,
                base: LayerTag::new(self.base_layer.clone()),
            },
            EngineConfig {
                fall_through: self.fall_through,
                compose_key: KeyCode(self.compose_key),
            },
        ))
    }

    fn resolve_spec(
        &self,
        spec: &ButtonSpec,
        trail: &mut Vec<String>,
    ) -> Result<Button, ConfigError> {
        Ok(match spec {
            ButtonSpec::Emit(code) => Button::Emit(*code),
            ButtonSpec::LayerToggle(name) => Button::LayerToggle(LayerTag::new(name.clone())),
            ButtonSpec::LayerSwitch(name) => Button::LayerSwitch(LayerTag::new(name.clone())),
            ButtonSpec::TapNext(tap, hold) => Button::TapNext {
                tap: Box::new(self.resolve_spec(tap, trail)?),
                hold: Box::new(self.resolve_spec(hold, trail)?),
            },
            ButtonSpec::TapHold(delay_ms, tap, hold) => Button::TapHold {
                delay_ms: *delay_ms,
                tap: Box::new(self.resolve_spec(tap, trail)?),
                hold: Box::new(self.resolve_spec(hold, trail)?),
            },
            ButtonSpec::MultiTap(steps, last) => Button::MultiTap {
                steps: steps
                    .iter()
                    .map(|(gap, s)| Ok((*gap, self.resolve_spec(s, trail)?)))
                    .collect::<Result<Vec<_>, ConfigError>>()?,
                last: Box::new(self.resolve_spec(last, trail)?),
            },
            ButtonSpec::Taps(steps, last) => Button::MultiTap {
                steps: steps
                    .iter()
                    .map(|s| Ok((self.tap_gap_ms, self.resolve_spec(s, trail)?)))
                    .collect::<Result<Vec<_>, ConfigError>>()?,
                last: Box::new(self.resolve_spec(last, trail)?),
            },
            ButtonSpec::Around(outer, inner) => Button::Around {
                outer: Box::new(self.resolve_spec(outer, trail)?),
                inner: Box::new(self.resolve_spec(inner, trail)?),
            },
            ButtonSpec::TapMacro(seq) => Button::TapMacro(
                seq.iter()
                    .map(|s| self.resolve_spec(s, trail))
                    .collect::<Result<Vec<_>, ConfigError>>()?,
            ),
            ButtonSpec::ComposeSeq(seq) => Button::ComposeSeq(
                seq.iter()
                    .map(|s| self.resolve_spec(s, trail))
                    .collect::<Result<Vec<_>, ConfigError>>()?,
            ),
            ButtonSpec::Pause(ms) => Button::Pause(*ms),
            ButtonSpec::Cmd(cmd) => Button::Cmd(cmd.clone()),
            ButtonSpec::Trans => Button::Trans,
            ButtonSpec::Block => Button::Block,
            ButtonSpec::Ref(name) => {
                if trail.iter().any(|n| n == name) {
                    return Err(ConfigError::AliasCycle(name.clone()));
                }
                let target = self
                    .aliases
                    .get(name)
                    .ok_or_else(|| ConfigError::DanglingAlias(name.clone()))?;
                trail.push(name.clone());
                let button = self.resolve_spec(target, trail)?;
                trail.pop();
                button
            }
        })
    }

    fn check_layer_refs(&self, button: &Button) -> Result<(), ConfigError> {
        match button {
            Button::LayerToggle(tag) | Button::LayerSwitch(tag) => {
                if !self.layers.contains_key(&tag.0) {
                    return Err(ConfigError::UnknownLayer(tag.0.clone()));
                }
                Ok(())
            }
            Button::TapNext { tap, hold }
            | Button::TapHold { tap, hold, .. } => {
                self.check_layer_refs(tap)?;
                self.check_layer_refs(hold)
            }
            Button::MultiTap { steps, last } => {
                for (_, b) in steps {
                    self.check_layer_refs(b)?;
                }
                self.check_layer_refs(last)
            }
            Button::Around { outer, inner } => {
                self.check_layer_refs(outer)?;
                self.check_layer_refs(inner)
            }
            Button::TapMacro(seq) | Button::ComposeSeq(seq) => {
                for b in seq {
                    self.check_layer_refs(b)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Config {
        ron_options().from_str(input).expect("config should parse")
    }

    #[test]
    fn parses_and_resolves_aliases() {
        let config = parse(
            r#"(
                base_layer: "base",
                aliases: {
                    "spc-nav": TapHold(180, Emit(57), LayerToggle("nav")),
                },
                layers: {
                    "base": { 57: Ref("spc-nav"), 30: Emit(30) },
                    "nav": { 30: Trans },
                },
            )"#,
        );
        let (map, engine_cfg) = config.resolve().unwrap();
        assert!(engine_cfg.fall_through);
        let base = &map.layers[&LayerTag::new("base")];
        assert_eq!(
            base[&KeyCode(57)],
            Button::TapHold {
                delay_ms: 180,
                tap: Box::new(Button::Emit(KeyCode(57))),
                hold: Box::new(Button::LayerToggle(LayerTag::new("nav"))),
            }
        );
    }

    #[test]
    fn alias_cycles_are_fatal() {
        let config = parse(
            r#"(
                base_layer: "base",
                aliases: { "a": Ref("b"), "b": Ref("a") },
                layers: { "base": { 30: Ref("a") } },
            )"#,
        );
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::AliasCycle(_))
        ));
    }

    #[test]
    fn dangling_aliases_are_fatal() {
        let config = parse(
            r#"(
                base_layer: "base",
                layers: { "base": { 30: Ref("missing") } },
            )"#,
        );
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::DanglingAlias(name)) if name == "missing"
        ));
    }

    #[test]
    fn unknown_layer_references_are_fatal() {
        let config = parse(
            r#"(
                base_layer: "base",
                layers: { "base": { 30: LayerToggle("ghost") } },
            )"#,
        );
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::UnknownLayer(name)) if name == "ghost"
        ));
    }

    #[test]
    fn missing_base_layer_is_fatal() {
        let config = parse(r#"(base_layer: "base")"#);
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::UnknownBaseLayer(_))
        ));
    }

    #[test]
    fn taps_sugar_uses_the_default_gap() {
        let config = parse(
            r#"(
                base_layer: "base",
                tap_gap_ms: 150,
                layers: {
                    "base": { 30: Taps([Emit(30), Emit(31)], Emit(32)) },
                },
            )"#,
        );
        let (map, _) = config.resolve().unwrap();
        let base = &map.layers[&LayerTag::new("base")];
        match &base[&KeyCode(30)] {
            Button::MultiTap { steps, last } => {
                assert_eq!(steps.len(), 2);
                assert!(steps.iter().all(|(gap, _)| *gap == 150));
                assert_eq!(**last, Button::Emit(KeyCode(32)));
            }
            other => panic!("expected MultiTap, got {other:?}"),
        }
    }
}
