use std::time::Duration;

use tracing::debug;
use vitalscope_core::config::MutationConfig;
use vitalscope_core::{AddedNode, MutationRecord};

pub const AD_PATTERNS: &[&str] = &[
    "adsbygoogle", "google_ads", "doubleclick", "ad-slot", "ad-container", "ad-banner",
    "advert", "sponsor", "dfp-", "taboola", "outbrain",
];

pub const INFINITE_SCROLL_PATTERNS: &[&str] = &[
    "infinite", "load-more", "loadmore", "feed-item", "virtual-list", "virtualized",
    "lazy-list", "next-page",
];

const IMAGE_ADD: u32 = 15;
const AD_ELEMENT: u32 = 20;
const LARGE_BLOCK: u32 = 25;
const SCRIPT_ADD: u32 = 10;
const STYLE_CHANGE: u32 = 5;
const ATTRIBUTE_CHANGE: u32 = 2;
const INFINITE_SCROLL: u32 = 30;
const MINOR: u32 = 1;

fn matches_any(node: &AddedNode, patterns: &[&str]) -> bool {
    let id = node.id.to_ascii_lowercase();
    let class = node.class_name.to_ascii_lowercase();
    patterns.iter().any(|p| id.contains(p) || class.contains(p))
}

/// Outcome of recording one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstScore {
    pub score: u32,
    /// Set when this burst opened a new scoring window that closes at the given time.
    pub scoring_window_closes_at: Option<Duration>,
}

/// Weighs bursts of DOM mutations and tracks when the page last changed.
pub struct ContentMutationScorer {
    config: MutationConfig,
    pending: u32,
    scoring_window_closes_at: Option<Duration>,
    first_mutation: Option<Duration>,
    first_content: Option<Duration>,
    last_mutation: Option<Duration>,
    significant: u32,
}

impl ContentMutationScorer {
    pub fn new(config: MutationConfig) -> Self {
        Self {
            config,
            pending: 0,
            scoring_window_closes_at: None,
            first_mutation: None,
            first_content: None,
            last_mutation: None,
            significant: 0,
        }
    }

    pub fn reset(&mut self) {
        self.pending = 0;
        self.scoring_window_closes_at = None;
        self.first_mutation = None;
        self.first_content = None;
        self.last_mutation = None;
        self.significant = 0;
    }

    pub fn score_node(&self, node: &AddedNode) -> u32 {
        let tag = node.tag.to_ascii_uppercase();
        if matches_any(node, INFINITE_SCROLL_PATTERNS) {
            INFINITE_SCROLL
        } else if matches_any(node, AD_PATTERNS) || (tag == "IFRAME" && matches_any(node, &["ad"])) {
            AD_ELEMENT
        } else if matches!(tag.as_str(), "IMG" | "PICTURE" | "VIDEO" | "SVG") {
            IMAGE_ADD
        } else if tag == "SCRIPT" {
            SCRIPT_ADD
        } else if node.text_length >= self.config.large_block_text || node.area >= self.config.large_block_area {
            LARGE_BLOCK
        } else {
            MINOR
        }
    }

    pub fn score_record(&self, record: &MutationRecord) -> u32 {
        match record {
            MutationRecord::ChildList { added } if added.is_empty() => MINOR,
            MutationRecord::ChildList { added } => added.iter().map(|n| self.score_node(n)).sum(),
            MutationRecord::Attributes { name } if name == "style" || name == "class" => STYLE_CHANGE,
            MutationRecord::Attributes { .. } => ATTRIBUTE_CHANGE,
            MutationRecord::CharacterData => MINOR,
        }
    }

    pub fn score_burst(&self, records: &[MutationRecord]) -> u32 {
        records.iter().map(|r| self.score_record(r)).sum()
    }

    /// Records a burst observed at `now`.
    pub fn record(&mut self, records: &[MutationRecord], now: Duration) -> BurstScore {
        if records.is_empty() {
            return BurstScore {
                score: 0,
                scoring_window_closes_at: None,
            };
        }
        let score = self.score_burst(records);
        self.last_mutation = Some(now);
        self.first_mutation.get_or_insert(now);
        let adds_content = records
            .iter()
            .any(|r| matches!(r, MutationRecord::ChildList { added } if !added.is_empty()));
        if adds_content {
            self.first_content.get_or_insert(now);
        }

        self.pending = self.pending.saturating_add(score);
        let scoring_window_closes_at = match self.scoring_window_closes_at {
            Some(_) => None,
            None => {
                let closes = now + self.config.scoring_window;
                self.scoring_window_closes_at = Some(closes);
                Some(closes)
            }
        };
        BurstScore {
            score,
            scoring_window_closes_at,
        }
    }

    /// Closes the scoring window. Returns whether it was significant.
    pub fn close_scoring_window(&mut self) -> bool {
        if self.scoring_window_closes_at.take().is_none() {
            return false;
        }
        let total = std::mem::take(&mut self.pending);
        let significant = total > self.config.significance_threshold;
        if significant {
            self.significant += 1;
            debug!(score = total, "significant content change");
        }
        significant
    }

    pub fn last_mutation_time(&self) -> Option<Duration> {
        self.last_mutation
    }

    pub fn first_mutation_time(&self) -> Option<Duration> {
        self.first_mutation
    }

    pub fn first_content_time(&self) -> Option<Duration> {
        self.first_content
    }

    pub fn since_last_mutation(&self, now: Duration) -> Option<Duration> {
        self.last_mutation.map(|t| now.saturating_sub(t))
    }

    pub fn significant_changes(&self) -> u32 {
        self.significant
    }

    pub fn pending_score(&self) -> u32 {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str, class_name: &str) -> AddedNode {
        AddedNode {
            tag: tag.into(),
            id: String::new(),
            class_name: class_name.into(),
            text_length: 0,
            area: 0.0,
        }
    }

    fn added(nodes: Vec<AddedNode>) -> MutationRecord {
        MutationRecord::ChildList { added: nodes }
    }

    fn scorer() -> ContentMutationScorer {
        ContentMutationScorer::new(MutationConfig::default())
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn weights() {
        let s = scorer();
        assert_eq!(s.score_node(&node("img", "")), 15);
        assert_eq!(s.score_node(&node("DIV", "adsbygoogle")), 20);
        assert_eq!(s.score_node(&node("SCRIPT", "")), 10);
        assert_eq!(s.score_node(&node("LI", "feed-item")), 30);
        let mut block = node("ARTICLE", "");
        block.text_length = 1200;
        assert_eq!(s.score_node(&block), 25);
        assert_eq!(s.score_node(&node("SPAN", "")), 1);
        assert_eq!(s.score_record(&MutationRecord::Attributes { name: "style".into() }), 5);
        assert_eq!(s.score_record(&MutationRecord::Attributes { name: "aria-hidden".into() }), 2);
        assert_eq!(s.score_record(&MutationRecord::CharacterData), 1);
    }

    #[test]
    fn every_burst_moves_last_mutation_time() {
        let mut s = scorer();
        s.record(&[MutationRecord::CharacterData], ms(120));
        s.record(&[MutationRecord::Attributes { name: "title".into() }], ms(450));
        assert_eq!(s.first_mutation_time(), Some(ms(120)));
        assert_eq!(s.last_mutation_time(), Some(ms(450)));
        assert_eq!(s.first_content_time(), None);
        assert_eq!(s.since_last_mutation(ms(1000)), Some(ms(550)));
    }

    /// Plays scripted bursts through the scorer, closing windows the way the
    /// controller's timer would.
    fn play(bursts: &[(u64, Vec<MutationRecord>)]) -> u32 {
        let mut s = scorer();
        let mut fired = 0;
        let mut closes_at: Option<Duration> = None;
        for (at, records) in bursts {
            if closes_at.is_some_and(|c| c <= ms(*at)) {
                fired += u32::from(s.close_scoring_window());
                closes_at = None;
            }
            if let Some(c) = s.record(records, ms(*at)).scoring_window_closes_at {
                closes_at = Some(c);
            }
        }
        if closes_at.is_some() {
            fired += u32::from(s.close_scoring_window());
        }
        assert_eq!(fired, s.significant_changes());
        fired
    }

    #[test]
    fn significant_callbacks_match_window_totals() {
        let img = || added(vec![node("IMG", "")]);
        let feed = || added(vec![node("LI", "feed-item")]);
        let ad = || added(vec![node("DIV", "ad-slot")]);
        let style = || MutationRecord::Attributes { name: "style".into() };
        let bursts = vec![
            // window [0, 300): 15 + 30 + 15 = 60 > 50
            (0, vec![img()]),
            (100, vec![feed()]),
            (250, vec![img()]),
            // window [400, 700): 20 + 5 + 15 = 40
            (400, vec![ad()]),
            (500, vec![style()]),
            (650, vec![img()]),
            // window [800, 1100): 30 + 20 + 1 = 51 > 50
            (800, vec![feed()]),
            (900, vec![ad()]),
            (1050, vec![MutationRecord::CharacterData]),
            // window [1500, 1800): exactly 50 is not enough
            (1500, vec![feed(), ad()]),
        ];
        assert_eq!(bursts.len(), 10);
        assert_eq!(play(&bursts), 2);
    }

    #[test]
    fn later_bursts_do_not_extend_the_scoring_window() {
        let mut s = scorer();
        let opened = s.record(&[added(vec![node("IMG", "")])], ms(0));
        assert_eq!(opened.scoring_window_closes_at, Some(ms(300)));
        let joined = s.record(&[added(vec![node("IMG", "")])], ms(280));
        assert_eq!(joined.scoring_window_closes_at, None);
        assert_eq!(s.pending_score(), 30);
        assert!(!s.close_scoring_window());
        let reopened = s.record(&[MutationRecord::CharacterData], ms(320));
        assert_eq!(reopened.scoring_window_closes_at, Some(ms(620)));
    }

    #[test]
    fn single_heavy_burst_is_significant() {
        let bursts = vec![(0, vec![added(vec![node("LI", "feed-item"), node("LI", "feed-item")])])];
        assert_eq!(play(&bursts), 1);
    }

    #[test]
    fn reset_forgets_pending_score() {
        let mut s = scorer();
        s.record(&[added(vec![node("LI", "feed-item")])], ms(0));
        s.reset();
        assert_eq!(s.pending_score(), 0);
        assert!(!s.close_scoring_window());
        assert_eq!(s.last_mutation_time(), None);
    }
}
