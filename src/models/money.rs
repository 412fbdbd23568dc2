/// Валюты без дробной части по ISO 4217: сумма в минимальных единицах
/// совпадает с суммой в основных.
const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Валюты с тремя знаками после запятой.
const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Число знаков после запятой для валюты.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Сумма в минимальных единицах как десятичная строка: `15050 USD` → `150.50`.
pub fn format_minor(amount: i64, currency: &str) -> String {
    let exponent = minor_unit_exponent(currency);
    if exponent == 0 {
        return amount.to_string();
    }

    let scale = 10_i64.pow(exponent);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale as u64,
        abs % scale as u64,
        width = exponent as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_by_currency_exponent() {
        assert_eq!(format_minor(15_050, "USD"), "150.50");
        assert_eq!(format_minor(7, "eur"), "0.07");
        assert_eq!(format_minor(1_500, "JPY"), "1500");
        assert_eq!(format_minor(1_500, "KWD"), "1.500");
        assert_eq!(format_minor(-250, "USD"), "-2.50");
    }

    #[test]
    fn unknown_currency_defaults_to_two_decimals() {
        assert_eq!(minor_unit_exponent("XYZ"), 2);
        assert_eq!(minor_unit_exponent("krw"), 0);
    }
}
