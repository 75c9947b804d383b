//! Localized outage alert messages (English and French).

use chrono::Datelike;
use kouran_core::Outage;

const EN_ALERT: &str = "⚠️ Power Outage Alert\n\n📍 Locality: {locality}\n🏘️ District: {district}\n📅 Date: {date}\n🕐 From: {from_time}\n🕐 To: {to_time}\n📌 Streets: {streets}\n\nStay prepared!";
const EN_ALERT_NO_STREETS: &str = "⚠️ Power Outage Alert\n\n📍 Locality: {locality}\n🏘️ District: {district}\n📅 Date: {date}\n🕐 From: {from_time}\n🕐 To: {to_time}\n\nStay prepared!";
const FR_ALERT: &str = "⚠️ Alerte de Coupure d'Électricité\n\n📍 Localité: {locality}\n🏘️ District: {district}\n📅 Date: {date}\n🕐 De: {from_time}\n🕐 À: {to_time}\n📌 Rues: {streets}\n\nRestez préparé!";
const FR_ALERT_NO_STREETS: &str = "⚠️ Alerte de Coupure d'Électricité\n\n📍 Localité: {locality}\n🏘️ District: {district}\n📅 Date: {date}\n🕐 De: {from_time}\n🕐 À: {to_time}\n\nRestez préparé!";

const FR_MONTHS: [&str; 12] = [
    "janvier", "février", "mars", "avril", "mai", "juin",
    "juillet", "août", "septembre", "octobre", "novembre", "décembre",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    En,
    Fr,
}

impl Language {
    fn parse(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "en" => Some(Self::En),
            "fr" => Some(Self::Fr),
            _ => None,
        }
    }

    fn alert(self, with_streets: bool) -> &'static str {
        match (self, with_streets) {
            (Self::En, true) => EN_ALERT,
            (Self::En, false) => EN_ALERT_NO_STREETS,
            (Self::Fr, true) => FR_ALERT,
            (Self::Fr, false) => FR_ALERT_NO_STREETS,
        }
    }
}

/// `plaines_wilhems` → `Plaines Wilhems`.
pub fn display_district(district: &str) -> String {
    district
        .replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_date(outage: &Outage, language: Language) -> String {
    let local = outage.from_local();
    match language {
        Language::En => local.format("%d %B %Y").to_string(),
        Language::Fr => {
            let month = FR_MONTHS[local.month0() as usize];
            format!("{} {month} {}", local.format("%d"), local.year())
        }
    }
}

/// Render the alert for `outage` in `language`, falling back to `default_language`
/// and then to English when a code has no templates.
pub fn render_outage_alert(outage: &Outage, language: &str, default_language: &str) -> String {
    let language = Language::parse(language)
        .or_else(|| Language::parse(default_language))
        .unwrap_or(Language::En);

    let template = language.alert(!outage.streets.is_empty());
    template
        .replace("{locality}", &outage.locality)
        .replace("{district}", &display_district(&outage.district))
        .replace("{date}", &format_date(outage, language))
        .replace("{from_time}", &outage.from_local().format("%H:%M").to_string())
        .replace("{to_time}", &outage.to_local().format("%H:%M").to_string())
        .replace("{streets}", &outage.streets)
}
