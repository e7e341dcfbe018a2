//! Voice selection for the synthesis engine.

use crate::config::TtsConfig;

/// A voice offered by the synthesis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Engine-specific display name.
    pub name: String,
    /// BCP-47 language tag, e.g. `zh-CN`.
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Pick a voice: explicit hint, then preferred names in order, then the first
/// voice whose language matches the configured locale's primary subtag.
///
/// Returns `None` when nothing matches, leaving the engine on its default.
pub fn select_voice<'a>(voices: &'a [Voice], config: &TtsConfig) -> Option<&'a Voice> {
    if let Some(hint) = config.voice_hint.as_deref().filter(|h| !h.trim().is_empty()) {
        if let Some(v) = voices.iter().find(|v| v.name.contains(hint)) {
            return Some(v);
        }
    }

    let locale_voices = || voices.iter().filter(|v| same_language(&v.lang, &config.locale));
    for preferred in &config.preferred_voices {
        if let Some(v) = locale_voices().find(|v| v.name.contains(preferred.as_str())) {
            return Some(v);
        }
    }

    locale_voices().next()
}

fn same_language(a: &str, b: &str) -> bool {
    let primary = |tag: &str| {
        tag.split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    !a.is_empty() && primary(a) == primary(b)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn voices() -> Vec<Voice> {
        vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Microsoft Xiaoxiao Online", "zh-CN"),
            Voice::new("Google 普通话（中国大陆）", "zh-CN"),
            Voice::new("Ting-Ting", "zh_CN"),
        ]
    }

    #[test]
    fn hint_wins() {
        let config = TtsConfig {
            voice_hint: Some("Samantha".into()),
            ..TtsConfig::default()
        };
        let all = voices();
        assert_eq!(select_voice(&all, &config).unwrap().name, "Samantha");
    }

    #[test]
    fn preferred_order_is_respected() {
        let all = voices();
        let v = select_voice(&all, &TtsConfig::default()).unwrap();
        assert!(v.name.starts_with("Google"));
    }

    #[test]
    fn falls_back_to_language_match() {
        let config = TtsConfig {
            preferred_voices: Vec::new(),
            ..TtsConfig::default()
        };
        let all = voices();
        assert_eq!(
            select_voice(&all, &config).unwrap().name,
            "Microsoft Xiaoxiao Online"
        );
    }

    #[test]
    fn no_match_uses_engine_default() {
        let config = TtsConfig {
            locale: "fr-FR".into(),
            ..TtsConfig::default()
        };
        assert!(select_voice(&voices(), &config).is_none());
        assert!(select_voice(&[], &TtsConfig::default()).is_none());
    }

    #[test]
    fn underscore_tags_match() {
        assert!(same_language("zh_CN", "zh-CN"));
        assert!(!same_language("", "zh-CN"));
    }
}
