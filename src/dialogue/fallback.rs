//! Locally generated replies used when the dialogue backend is unavailable.
//!
//! Every template echoes the user's transcript so the user can tell they were
//! heard even when no real answer is possible.

use crate::config::FallbackPolicy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ENGLISH: &[&str] = &[
    "Okay, I heard \"{}\".",
    "\"{}\"... let me think about that.",
    "About \"{}\", I've made a note of it.",
    "Got it! \"{}\"",
    "\"{}\", that's an interesting topic.",
    "I understand what you mean: {}",
];

const CHINESE: &[&str] = &[
    "好的，我听到了“{}”",
    "“{}”……让我想一想",
    "关于“{}”，我记下来了",
    "收到！“{}”",
    "“{}”，这个话题挺有意思",
    "我明白你的意思了：{}",
];

/// Picks a fallback template for a transcript.
#[derive(Debug)]
pub struct FallbackResponder {
    templates: &'static [&'static str],
    picker: Picker,
}

#[derive(Debug)]
enum Picker {
    Rotation(usize),
    Seeded(StdRng),
}

impl FallbackResponder {
    /// Create a responder whose language follows `locale` (Chinese for
    /// `zh*`, English otherwise).
    pub fn new(policy: &FallbackPolicy, locale: &str) -> Self {
        let templates = if locale.to_ascii_lowercase().starts_with("zh") {
            CHINESE
        } else {
            ENGLISH
        };
        let picker = match policy {
            FallbackPolicy::Rotation => Picker::Rotation(0),
            FallbackPolicy::Seeded { seed } => Picker::Seeded(StdRng::seed_from_u64(*seed)),
        };
        Self { templates, picker }
    }

    /// Number of distinct templates.
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Produce a reply that quotes `transcript`.
    pub fn respond(&mut self, transcript: &str) -> String {
        let index = match &mut self.picker {
            Picker::Rotation(next) => {
                let i = *next % self.templates.len();
                *next = next.wrapping_add(1);
                i
            }
            Picker::Seeded(rng) => rng.gen_range(0..self.templates.len()),
        };
        self.templates[index].replacen("{}", transcript.trim(), 1)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_reply_quotes_transcript() {
        let mut r = FallbackResponder::new(&FallbackPolicy::Rotation, "en-US");
        for _ in 0..r.template_count() * 2 {
            assert!(r.respond("what time is it").contains("what time is it"));
        }
    }

    #[test]
    fn rotation_cycles_through_all_templates() {
        let mut r = FallbackResponder::new(&FallbackPolicy::Rotation, "en-US");
        let n = r.template_count();
        let replies: HashSet<String> = (0..n).map(|_| r.respond("x")).collect();
        assert_eq!(replies.len(), n);
        let first_again = r.respond("x");
        let mut fresh = FallbackResponder::new(&FallbackPolicy::Rotation, "en-US");
        assert_eq!(first_again, fresh.respond("x"));
    }

    #[test]
    fn seeded_policy_is_reproducible() {
        let policy = FallbackPolicy::Seeded { seed: 7 };
        let mut a = FallbackResponder::new(&policy, "zh-CN");
        let mut b = FallbackResponder::new(&policy, "zh-CN");
        for _ in 0..20 {
            assert_eq!(a.respond("今天天气"), b.respond("今天天气"));
        }
    }

    #[test]
    fn locale_selects_language() {
        let mut zh = FallbackResponder::new(&FallbackPolicy::Rotation, "zh-CN");
        assert!(zh.respond("你好").starts_with("好的"));
        let mut en = FallbackResponder::new(&FallbackPolicy::Rotation, "fr-FR");
        assert!(en.respond("bonjour").starts_with("Okay"));
    }
}
