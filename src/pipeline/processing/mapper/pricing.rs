use serde_json::Value;

use crate::common::constants::FREE_COST_LABEL;

/// Build the display cost from every candidate pricing value, in priority order.
///
/// Accepts a list of ticket types (`{name, price}`), a flat number, a Humanitix
/// `pricing {minimumPrice, maximumPrice}` object, or an already formatted
/// string. Anything empty or all-zero degrades to `"Free"`.
pub fn cost_summary<'a>(candidates: impl Iterator<Item = &'a Value>, currency: &str) -> String {
    for candidate in candidates {
        if let Value::String(s) = candidate {
            let trimmed = s.trim();
            if parse_amount(trimmed).is_none() {
                return trimmed.to_string();
            }
        }

        let prices = collect_prices(candidate);
        if !prices.is_empty() {
            return format_range(&prices, currency);
        }
    }
    FREE_COST_LABEL.to_string()
}

fn collect_prices(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !is_withdrawn(item))
            .filter_map(ticket_price)
            .collect(),
        Value::Object(obj) => {
            let bounds: Vec<f64> = ["minimumPrice", "maximumPrice", "min", "max"]
                .iter()
                .filter_map(|key| obj.get(*key).and_then(amount))
                .collect();
            if bounds.is_empty() {
                obj.get("price").and_then(amount).into_iter().collect()
            } else {
                bounds
            }
        }
        other => amount(other).into_iter().collect(),
    }
}

fn ticket_price(item: &Value) -> Option<f64> {
    match item {
        Value::Object(obj) => obj.get("price").and_then(amount),
        other => amount(other),
    }
}

/// Ticket types switched off upstream do not contribute to the price range
fn is_withdrawn(item: &Value) -> bool {
    ["disabled", "deleted"]
        .iter()
        .any(|flag| item.get(*flag).and_then(Value::as_bool).unwrap_or(false))
}

fn amount(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s.trim()),
        _ => None,
    }?;
    (n.is_finite() && n >= 0.0).then_some(n)
}

fn parse_amount(s: &str) -> Option<f64> {
    s.trim_start_matches(['$', '£', '€'])
        .replace(',', "")
        .parse::<f64>()
        .ok()
}

fn format_range(prices: &[f64], currency: &str) -> String {
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max <= 0.0 {
        return FREE_COST_LABEL.to_string();
    }
    if (max - min).abs() < 0.005 {
        return money(max, currency);
    }
    let low = if min <= 0.0 {
        FREE_COST_LABEL.to_string()
    } else {
        money(min, currency)
    };
    format!("{} – {}", low, money(max, currency))
}

fn money(amount: f64, currency: &str) -> String {
    let symbol = match currency.to_uppercase().as_str() {
        "AUD" | "USD" | "NZD" | "CAD" | "SGD" | "HKD" | "FJD" => "$".to_string(),
        "GBP" => "£".to_string(),
        "EUR" => "€".to_string(),
        other => format!("{} ", other),
    };
    format!("{}{:.2}", symbol, amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(value: Value) -> String {
        cost_summary(std::iter::once(&value), "AUD")
    }

    #[test]
    fn test_ticket_type_list_produces_range() {
        let tickets = json!([
            {"name": "Concession", "price": 20},
            {"name": "General", "price": 45.5},
            {"name": "Old tier", "price": 5, "disabled": true}
        ]);
        assert_eq!(summary(tickets), "$20.00 – $45.50");
    }

    #[test]
    fn test_flat_number_and_zero() {
        assert_eq!(summary(json!(25)), "$25.00");
        assert_eq!(summary(json!(0)), "Free");
    }

    #[test]
    fn test_empty_sources_are_free() {
        assert_eq!(summary(json!([])), "Free");
        assert_eq!(cost_summary(std::iter::empty(), "AUD"), "Free");
        assert_eq!(summary(json!([{"name": "RSVP", "price": 0}])), "Free");
    }

    #[test]
    fn test_free_lower_bound() {
        let tickets = json!([{"name": "Kids", "price": 0}, {"name": "Adult", "price": 30}]);
        assert_eq!(summary(tickets), "Free – $30.00");
    }

    #[test]
    fn test_pricing_object_and_currency_symbol() {
        let pricing = json!({"minimumPrice": 10, "maximumPrice": 10});
        assert_eq!(cost_summary(std::iter::once(&pricing), "GBP"), "£10.00");
        assert_eq!(cost_summary(std::iter::once(&json!(12)), "JPY"), "JPY 12.00");
    }

    #[test]
    fn test_preformatted_strings_pass_through() {
        assert_eq!(summary(json!("Donation")), "Donation");
        assert_eq!(summary(json!("$20.00 – $45.00")), "$20.00 – $45.00");
        assert_eq!(summary(json!("$25")), "$25.00");
    }

    #[test]
    fn test_falls_through_to_next_candidate() {
        let empty = json!([]);
        let pricing = json!({"minimumPrice": 15, "maximumPrice": 40});
        assert_eq!(
            cost_summary([&empty, &pricing].into_iter(), "AUD"),
            "$15.00 – $40.00"
        );
    }
}
