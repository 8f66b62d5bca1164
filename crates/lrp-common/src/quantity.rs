//! Kubernetes resource quantity helpers
//!
//! Quantities arrive as strings ("4205m", "420Ki", "1024M", "1e3"). We only
//! need them as plain numbers for metrics and for reading envelopes back
//! off a workload, so this parses to `f64` rather than modelling the exact
//! decimal semantics.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string into its base-unit value
pub fn parse(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * factor);
        }
    }

    // Exponent forms ("1e3") must be tried before the "E" suffix
    if let Ok(n) = raw.parse::<f64>() {
        return Some(n);
    }

    for (suffix, factor) in DECIMAL_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * factor);
        }
    }

    None
}

/// Value of a quantity in its base unit (cores, bytes)
pub fn value(quantity: &Quantity) -> Option<f64> {
    parse(&quantity.0)
}

/// Value of a quantity in thousandths of its base unit (millicores)
pub fn milli_value(quantity: &Quantity) -> Option<f64> {
    value(quantity).map(|v| (v * 1000.0).round())
}

/// Quantity of `n` decimal megabytes
pub fn megabytes(n: u64) -> Quantity {
    Quantity(format!("{}M", n))
}

/// Quantity of `n` millicores
pub fn millicores(n: u64) -> Quantity {
    Quantity(format!("{}m", n))
}
