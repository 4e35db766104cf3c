//! Text cleanup for catalog metadata
//!
//! 카탈로그가 돌려주는 제목/설명에는 HTML 태그와 엔티티가 섞여 있다.
//! 메시지 렌더링 전에 정리한다.

use regex::Regex;
use std::sync::OnceLock;
use vigia_foundation::UNAVAILABLE;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<]+?>").expect("valid regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Remove HTML tags and entities, collapse whitespace
pub fn clean_html_text(text: &str) -> String {
    if text.is_empty() || text == UNAVAILABLE {
        return text.to_string();
    }

    let without_tags = tag_regex().replace_all(text, "");

    let mut clean = without_tags.into_owned();
    for (entity, replacement) in [
        ("&nbsp;", " "),
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
    ] {
        clean = clean.replace(entity, replacement);
    }

    whitespace_regex()
        .replace_all(&clean, " ")
        .trim()
        .to_string()
}

/// Convert an ISO date string to a friendly Spanish date
///
/// "2025-08-12T11:14:26+00:00" → "12 de agosto de 2025". 파싱 실패 시
/// 날짜 부분만 돌려준다.
pub fn format_friendly_date(date_string: &str) -> String {
    if date_string.is_empty() || date_string == UNAVAILABLE {
        return UNAVAILABLE.to_string();
    }

    const MONTHS: [&str; 12] = [
        "enero",
        "febrero",
        "marzo",
        "abril",
        "mayo",
        "junio",
        "julio",
        "agosto",
        "septiembre",
        "octubre",
        "noviembre",
        "diciembre",
    ];

    // Cut on chars, not bytes: upstream text can hold multibyte characters
    let date_part: String = date_string
        .split('T')
        .next()
        .unwrap_or(date_string)
        .chars()
        .take(10)
        .collect();
    match chrono::NaiveDate::parse_from_str(&date_part, "%Y-%m-%d") {
        Ok(date) => {
            use chrono::Datelike;
            format!(
                "{} de {} de {}",
                date.day(),
                MONTHS[date.month0() as usize],
                date.year()
            )
        }
        Err(_) => {
            if date_string.chars().count() >= 10 {
                date_string.chars().take(10).collect()
            } else {
                "Fecha no disponible".to_string()
            }
        }
    }
}

/// Truncate a title for message rendering
pub fn truncate_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        return title.to_string();
    }
    let truncated: String = title.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_entities() {
        assert_eq!(
            clean_html_text("<p>Calidad &amp; cantidad</p>"),
            "Calidad & cantidad"
        );
        assert_eq!(
            clean_html_text("Datos&nbsp;abiertos   de\n\nCastilla"),
            "Datos abiertos de Castilla"
        );
    }

    #[test]
    fn sentinel_passes_through() {
        assert_eq!(clean_html_text(UNAVAILABLE), UNAVAILABLE);
        assert_eq!(clean_html_text(""), "");
    }

    #[test]
    fn friendly_dates() {
        assert_eq!(
            format_friendly_date("2025-08-12T11:14:26.781000+00:00"),
            "12 de agosto de 2025"
        );
        assert_eq!(format_friendly_date("2024-01-03"), "3 de enero de 2024");
        assert_eq!(format_friendly_date(UNAVAILABLE), UNAVAILABLE);
        assert_eq!(format_friendly_date("garbage"), "Fecha no disponible");
    }

    #[test]
    fn multibyte_text_around_the_cut_does_not_panic() {
        // The 10th byte of this string lands inside a multibyte character
        assert_eq!(format_friendly_date("123456789é garbage"), "123456789é");
        assert_eq!(format_friendly_date("fechaé"), "Fecha no disponible");
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate_title("corto", 50), "corto");
        let long = "x".repeat(60);
        assert_eq!(truncate_title(&long, 50).chars().count(), 53);
    }
}
