//! Engine properties shown on the language bar (mode switches, menus).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::text::Text;

/// Sub-menus deeper than this are rejected on decode.
pub const MAX_PROPERTY_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum PropKind {
    Normal,
    Toggle,
    Radio,
    Menu,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum PropState {
    Unchecked,
    Checked,
    Inconsistent,
}

/// A single property, possibly carrying a sub-menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Property {
    /// Identifier the engine uses in `PropertyActivate`.
    pub name: String,
    pub kind: PropKind,
    pub label: Text,
    pub icon: String,
    pub tooltip: Text,
    pub sensitive: bool,
    pub visible: bool,
    pub state: PropState,
    pub sub_props: Vec<Property>,
}

impl Property {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropKind, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            label: Text::plain(label.into()),
            icon: String::new(),
            tooltip: Text::default(),
            sensitive: true,
            visible: true,
            state: PropState::Unchecked,
            sub_props: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), ValidationError> {
        if depth >= MAX_PROPERTY_DEPTH {
            return Err(ValidationError::PropertyTooDeep {
                max: MAX_PROPERTY_DEPTH,
            });
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyPropertyName);
        }
        self.label.validate()?;
        self.tooltip.validate()?;
        self.sub_props
            .iter()
            .try_for_each(|p| p.validate_at(depth + 1))
    }
}

/// The ordered set of properties an engine registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PropList(pub Vec<Property>);

impl PropList {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(Property::validate)
    }

    /// Replace the property with the same name, searching sub-menus too.
    ///
    /// Returns `false` if no property carries that name.
    pub fn update(&mut self, prop: &Property) -> bool {
        fn walk(list: &mut [Property], prop: &Property) -> bool {
            for p in list {
                if p.name == prop.name {
                    *p = prop.clone();
                    return true;
                }
                if walk(&mut p.sub_props, prop) {
                    return true;
                }
            }
            false
        }
        walk(&mut self.0, prop)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_mode_menu() -> PropList {
        let mut menu = Property::new("InputMode", PropKind::Menu, "あ");
        menu.sub_props = vec![
            Property::new("InputMode.Hiragana", PropKind::Radio, "Hiragana"),
            Property::new("InputMode.Latin", PropKind::Radio, "Latin"),
        ];
        PropList(vec![menu, Property::new("setup", PropKind::Normal, "Setup")])
    }

    #[test]
    fn update_replaces_nested_property() {
        let mut list = input_mode_menu();
        let mut latin = Property::new("InputMode.Latin", PropKind::Radio, "Latin");
        latin.state = PropState::Checked;
        assert!(list.update(&latin));
        assert_eq!(list.0[0].sub_props[1].state, PropState::Checked);
    }

    #[test]
    fn update_unknown_property_reports_false() {
        let mut list = input_mode_menu();
        let ghost = Property::new("ghost", PropKind::Normal, "?");
        assert!(!list.update(&ghost));
        assert_eq!(list, input_mode_menu());
    }

    #[test]
    fn empty_name_is_rejected() {
        let list = PropList(vec![Property::new("", PropKind::Normal, "x")]);
        assert_eq!(list.validate(), Err(ValidationError::EmptyPropertyName));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut prop = Property::new("leaf", PropKind::Normal, "leaf");
        for i in 0..MAX_PROPERTY_DEPTH {
            let mut parent = Property::new(format!("level{i}"), PropKind::Menu, "m");
            parent.sub_props.push(prop);
            prop = parent;
        }
        assert!(matches!(
            prop.validate(),
            Err(ValidationError::PropertyTooDeep { .. })
        ));
    }
}
