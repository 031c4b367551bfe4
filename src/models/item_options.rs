use std::collections::BTreeMap;

use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// A single chosen option on a menu item ("size" -> "large", "extra_shots" -> 2).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Number(i64),
    Text(String),
    Choices(Vec<String>),
}

impl OptionValue {
    fn canonical(self) -> Self {
        match self {
            OptionValue::Text(text) => OptionValue::Text(text.trim().to_string()),
            OptionValue::Choices(choices) => {
                let mut choices: Vec<String> = choices
                    .into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                choices.sort();
                choices.dedup();
                OptionValue::Choices(choices)
            }
            other => other,
        }
    }
}

/// Customisation chosen for a cart or order line.
///
/// Keys are kept in a `BTreeMap`, so two option sets that differ only in the
/// order the client sent them compare equal and serialise to the same JSON.
/// Multi-choice values are sorted and de-duplicated on construction.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, FromJsonQueryResult,
)]
#[serde(transparent)]
pub struct ItemOptions(BTreeMap<String, OptionValue>);

impl ItemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a canonical option set, rejecting blank keys.
    pub fn try_from_map(map: BTreeMap<String, OptionValue>) -> Result<Self, ServiceError> {
        let mut canonical = BTreeMap::new();
        for (key, value) in map {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ServiceError::InvalidInput(
                    "option names must not be blank".to_string(),
                ));
            }
            canonical.insert(key, value.canonical());
        }
        Ok(Self(canonical))
    }

    pub fn with(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.0.insert(key.into(), value.canonical());
        self
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_does_not_affect_equality_or_json() {
        let a: ItemOptions =
            serde_json::from_str(r#"{"size":"large","milk":"oat","shots":2}"#).unwrap();
        let b: ItemOptions =
            serde_json::from_str(r#"{"shots":2,"milk":"oat","size":"large"}"#).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn choices_are_sorted_and_deduplicated() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "toppings".to_string(),
            OptionValue::Choices(vec![
                "olives".into(),
                " basil".into(),
                "olives".into(),
            ]),
        );
        let options = ItemOptions::try_from_map(raw).unwrap();

        assert_eq!(
            options.get("toppings"),
            Some(&OptionValue::Choices(vec!["basil".into(), "olives".into()]))
        );
    }

    #[test]
    fn blank_option_name_is_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert("  ".to_string(), OptionValue::Flag(true));
        assert!(matches!(
            ItemOptions::try_from_map(raw),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn untagged_values_deserialize_by_shape() {
        let options: ItemOptions =
            serde_json::from_str(r#"{"spicy":true,"shots":3,"size":"m","extras":["a"]}"#)
                .unwrap();
        assert_eq!(options.get("spicy"), Some(&OptionValue::Flag(true)));
        assert_eq!(options.get("shots"), Some(&OptionValue::Number(3)));
        assert_eq!(options.get("size"), Some(&OptionValue::Text("m".into())));
        assert_eq!(
            options.get("extras"),
            Some(&OptionValue::Choices(vec!["a".into()]))
        );
    }
}
