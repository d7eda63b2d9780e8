//! Validation and normalization of free-text answers.
//!
//! Every parser returns `None` for input the bot should ask for again.

use leadbot_core::domain::lead::Utm;

pub const MIN_YEAR: u16 = 1960;

/// Longest free-text comment passed on to the CRM, in characters.
pub const MAX_COMMENT_CHARS: usize = 800;

/// Parses a deep-link start parameter such as `utm_source:vk~utm_medium:cpc`.
pub fn parse_utm(start_param: &str) -> Utm {
    let mut utm = Utm::default();
    for part in start_param.split('~') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        *slot = value.trim().to_string();
    }
    utm
}

/// Latin brand and model, e.g. `BMW X5` or `Mercedes-Benz GLE`.
pub fn validate_brand_model(input: &str) -> Option<String> {
    let value = input.trim();
    let len = value.chars().count();
    if !(2..=40).contains(&len) {
        return None;
    }

    let mut chars = value.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || c == '-');
    (first_ok && rest_ok).then(|| value.to_string())
}

/// Strips a leading `г.`/`город`, collapses spaces and capitalizes each word.
pub fn normalize_city(input: &str) -> Option<String> {
    let trimmed = strip_city_prefix(input.trim());
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");

    let len = collapsed.chars().count();
    let valid_chars = collapsed
        .chars()
        .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'' || c == '’');
    if !valid_chars || !(2..=50).contains(&len) {
        return None;
    }

    Some(capitalize_words(&collapsed))
}

fn strip_city_prefix(value: &str) -> &str {
    let lower = value.to_lowercase();
    for prefix in ["город", "г.", "г"] {
        if !lower.starts_with(prefix) {
            continue;
        }
        if let Some(rest) = value.get(prefix.len()..) {
            if rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    value
}

fn capitalize_words(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut at_word_start = true;
    for c in value.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                output.extend(c.to_uppercase());
            } else {
                output.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            output.push(c);
            at_word_start = true;
        }
    }
    output
}

/// First four-digit number in `input` within `MIN_YEAR..=current_year`.
pub fn parse_year(input: &str, current_year: u16) -> Option<u16> {
    input
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<u16>().ok())
        .find(|year| (MIN_YEAR..=current_year).contains(year))
}

/// Mileage ceiling in kilometres; `до 80 000 км` → 80000.
pub fn parse_mileage(input: &str) -> Option<u32> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u32>().ok().filter(|km| *km > 0)
}

/// Normalizes a shared contact number to E.164. Russian `8XXXXXXXXXX` becomes `+7XXXXXXXXXX`.
pub fn normalize_phone(input: &str) -> Option<String> {
    let cleaned: String = input.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();
    let digits = cleaned.trim_start_matches('+');
    if digits.contains('+') || !(10..=15).contains(&digits.len()) {
        return None;
    }

    if cleaned.starts_with('+') {
        Some(cleaned)
    } else if digits.len() == 11 && digits.starts_with('8') {
        Some(format!("+7{}", &digits[1..]))
    } else {
        Some(format!("+{digits}"))
    }
}

/// Telegram username without `@`.
pub fn normalize_handle(input: &str) -> Option<String> {
    let handle = input.trim().trim_start_matches('@');
    let valid = (3..=32).contains(&handle.len())
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| handle.to_string())
}

/// Trims a free-text comment and cuts it to [`MAX_COMMENT_CHARS`] characters.
pub fn normalize_comment(input: &str) -> String {
    input.trim().chars().take(MAX_COMMENT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_pairs_are_split_on_tilde_and_colon() {
        let utm = parse_utm("utm_source:vk~utm_medium:cpc~junk~utm_campaign:spring");

        assert_eq!(utm.source, "vk");
        assert_eq!(utm.medium, "cpc");
        assert_eq!(utm.campaign, "spring");
        assert_eq!(utm.content, "");
        assert!(parse_utm("organic").is_empty());
    }

    #[test]
    fn brand_model_accepts_latin_models_only() {
        assert_eq!(validate_brand_model("  BMW X5 "), Some("BMW X5".to_string()));
        assert_eq!(validate_brand_model("Mercedes-Benz GLE"), Some("Mercedes-Benz GLE".to_string()));
        assert_eq!(validate_brand_model("Лада Веста"), None);
        assert_eq!(validate_brand_model("-X5"), None);
        assert_eq!(validate_brand_model("X"), None);
        assert_eq!(validate_brand_model(&"A".repeat(41)), None);
    }

    #[test]
    fn city_prefix_is_stripped_and_words_capitalized() {
        assert_eq!(normalize_city("г. москва"), Some("Москва".to_string()));
        assert_eq!(normalize_city("город  нижний   новгород"), Some("Нижний Новгород".to_string()));
        assert_eq!(normalize_city("санкт-петербург"), Some("Санкт-Петербург".to_string()));
        assert_eq!(normalize_city("Гродно"), Some("Гродно".to_string()));
        assert_eq!(normalize_city("Moscow 1"), None);
        assert_eq!(normalize_city("я"), None);
    }

    #[test]
    fn year_is_bounded_by_current_year() {
        assert_eq!(parse_year("2019 год", 2025), Some(2019));
        assert_eq!(parse_year("выпуск 1959", 2025), None);
        assert_eq!(parse_year("2026", 2025), None);
        assert_eq!(parse_year("12345", 2025), None);
    }

    #[test]
    fn mileage_keeps_digits_only() {
        assert_eq!(parse_mileage("до 80 000 км"), Some(80_000));
        assert_eq!(parse_mileage("0"), None);
        assert_eq!(parse_mileage("много"), None);
    }

    #[test]
    fn phones_are_normalized_to_e164() {
        assert_eq!(normalize_phone("8 (999) 123-45-67"), Some("+79991234567".to_string()));
        assert_eq!(normalize_phone("+7 999 123 45 67"), Some("+79991234567".to_string()));
        assert_eq!(normalize_phone("79991234567"), Some("+79991234567".to_string()));
        assert_eq!(normalize_phone("12345"), None);
    }

    #[test]
    fn handles_drop_the_at_sign() {
        assert_eq!(normalize_handle("@ivan_petrov"), Some("ivan_petrov".to_string()));
        assert_eq!(normalize_handle("@иван"), None);
    }

    #[test]
    fn comments_are_trimmed_and_capped_by_characters() {
        assert_eq!(normalize_comment("  нужен кредит \n"), "нужен кредит");

        let long = "ж".repeat(MAX_COMMENT_CHARS + 200);
        let capped = normalize_comment(&long);
        assert_eq!(capped.chars().count(), MAX_COMMENT_CHARS);
        assert!(long.starts_with(&capped));
    }
}
