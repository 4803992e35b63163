use crate::model::report::new_id;
use crate::model::Amount;
use serde::{Deserialize, Serialize};

/// One line of the quick calculator. The order of the items is the order the user arranged them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Amount,
    /// A display hint such as `#6366f1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CalculatorItem {
    pub fn new(description: impl Into<String>, amount: impl Into<Amount>) -> Self {
        Self {
            id: new_id(),
            description: description.into(),
            amount: amount.into(),
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Assigns ids to items that lack one.
pub(crate) fn ensure_ids(items: &mut [CalculatorItem]) {
    for item in items.iter_mut().filter(|i| i.id.trim().is_empty()) {
        item.id = new_id();
    }
}

/// Sum of all item amounts.
pub fn calculator_total(items: &[CalculatorItem]) -> Amount {
    items.iter().map(|i| i.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_ids_keeps_existing() {
        let mut items = vec![
            CalculatorItem::new("Rent", Amount::from(700)),
            CalculatorItem {
                id: String::new(),
                description: "Car".to_string(),
                amount: Amount::from(200),
                color: None,
            },
        ];
        let first = items[0].id.clone();
        ensure_ids(&mut items);
        assert_eq!(items[0].id, first);
        assert!(!items[1].id.is_empty());
        assert_ne!(items[0].id, items[1].id);
    }

    #[test]
    fn test_total() {
        let items = vec![
            CalculatorItem::new("A", Amount::from(10)).with_color("#fff"),
            CalculatorItem::new("B", Amount::from(5)),
        ];
        assert_eq!(calculator_total(&items), Amount::from(15));
    }

    #[test]
    fn test_color_omitted_when_none() {
        let item = CalculatorItem::new("A", Amount::from(1));
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("color"));
    }
}
