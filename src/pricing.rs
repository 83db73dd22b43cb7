use std::sync::LazyLock;

use regex::Regex;

static BELOW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:below|under|less\s*than|cheaper\s*than|<)\s*(?:rs\.?|₹|inr)?\s*(\d+)")
        .expect("below price pattern is valid")
});

static ABOVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:above|over|more\s*than|greater\s*than|>)\s*(?:rs\.?|₹|inr)?\s*(\d+)")
        .expect("above price pattern is valid")
});

static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:between|from)?\s*(?:rs\.?|₹|inr)?\s*(\d+)\s*(?:to|and|-)\s*(?:rs\.?|₹|inr)?\s*(\d+)",
    )
    .expect("range price pattern is valid")
});

/// Price bounds pre-parsed from a shopper's message.
///
/// `None` means the bound was not mentioned, which is distinct from zero.
/// A range is taken in the order it was written: `min_price` may exceed
/// `max_price` and callers have to cope with that.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceHint {
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

impl PriceHint {
    pub fn is_empty(&self) -> bool {
        self.min_price.is_none() && self.max_price.is_none()
    }

    /// Prompt suffix that pins the extracted bounds for the deal search tool.
    pub fn annotation(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        format!(
            "\n\n[SYSTEM HINT: Extracted price filters from user message - minPrice={}, maxPrice={}. Use these values when calling get_deals tool.]",
            format_bound(self.min_price),
            format_bound(self.max_price)
        )
    }
}

pub fn extract_price_hint(message: &str) -> PriceHint {
    let max_price = first_number(&BELOW_PATTERN, message);
    let min_price = first_number(&ABOVE_PATTERN, message);

    if max_price.is_some() || min_price.is_some() {
        return PriceHint {
            min_price,
            max_price,
        };
    }

    // A range only counts when no one-sided bound was found, so "over 100
    // under 300" is not read a second time as "100 ... 300".
    RANGE_PATTERN
        .captures(message)
        .and_then(|captures| {
            let low = captures.get(1)?.as_str().parse::<u64>().ok()?;
            let high = captures.get(2)?.as_str().parse::<u64>().ok()?;
            Some(PriceHint {
                min_price: Some(low),
                max_price: Some(high),
            })
        })
        .unwrap_or_default()
}

fn first_number(pattern: &Regex, message: &str) -> Option<u64> {
    pattern
        .captures(message)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<u64>().ok())
}

fn format_bound(bound: Option<u64>) -> String {
    bound.map_or_else(|| "NULL".to_owned(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::{PriceHint, extract_price_hint};

    #[test]
    fn under_sets_only_max_price() {
        assert_eq!(
            extract_price_hint("Show me deals under 500"),
            PriceHint {
                min_price: None,
                max_price: Some(500)
            }
        );
    }

    #[test]
    fn over_sets_only_min_price() {
        assert_eq!(
            extract_price_hint("phones over 200 please"),
            PriceHint {
                min_price: Some(200),
                max_price: None
            }
        );
    }

    #[test]
    fn between_sets_both_bounds() {
        let hint = extract_price_hint("speakers between 100 and 300");
        assert_eq!(hint.min_price, Some(100));
        assert_eq!(hint.max_price, Some(300));
    }

    #[test]
    fn dash_range_sets_both_bounds() {
        let hint = extract_price_hint("headphones 100-300");
        assert_eq!(hint.min_price, Some(100));
        assert_eq!(hint.max_price, Some(300));
    }

    #[test]
    fn currency_markers_are_tolerated() {
        assert_eq!(extract_price_hint("below Rs. 999").max_price, Some(999));
        assert_eq!(extract_price_hint("less than ₹1500").max_price, Some(1500));
        assert_eq!(extract_price_hint("more than INR 40").min_price, Some(40));
        let hint = extract_price_hint("from rs 10 to rs 20");
        assert_eq!(hint.min_price, Some(10));
        assert_eq!(hint.max_price, Some(20));
    }

    #[test]
    fn one_sided_bounds_suppress_range_rule() {
        let hint = extract_price_hint("over 100 and under 300");
        assert_eq!(hint.min_price, Some(100));
        assert_eq!(hint.max_price, Some(300));

        let hint = extract_price_hint("under 300 from 1000 to 2000");
        assert_eq!(hint.min_price, None);
        assert_eq!(hint.max_price, Some(300));
    }

    #[test]
    fn inverted_range_is_kept_as_written() {
        let hint = extract_price_hint("between 900 and 100");
        assert_eq!(hint.min_price, Some(900));
        assert_eq!(hint.max_price, Some(100));
    }

    #[test]
    fn no_price_yields_empty_hint_and_annotation() {
        let hint = extract_price_hint("show me the latest deals");
        assert!(hint.is_empty());
        assert_eq!(hint.annotation(), "");
    }

    #[test]
    fn annotation_marks_unset_bounds_as_null() {
        let annotation = extract_price_hint("under 500").annotation();
        assert!(annotation.starts_with("\n\n[SYSTEM HINT:"));
        assert!(annotation.contains("minPrice=NULL"));
        assert!(annotation.contains("maxPrice=500"));
    }

    #[test]
    fn zero_is_a_real_bound() {
        let hint = extract_price_hint("above 0");
        assert_eq!(hint.min_price, Some(0));
        assert!(!hint.is_empty());
    }
}
