use chrono::{DateTime, NaiveDate, Utc};
use market_core::RawArticle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const POSITIVE_WORDS: &[&str] = &[
    "growth", "profit", "gain", "increase", "rise", "up", "high", "strong", "beat",
    "exceed", "success", "win", "positive", "boost", "surge", "rally",
    "breakthrough", "expansion", "upgrade", "bullish", "outperform", "record",
    "milestone", "achievement",
];

const NEGATIVE_WORDS: &[&str] = &[
    "loss", "decline", "fall", "drop", "down", "low", "weak", "miss", "fail",
    "concern", "risk", "negative", "cut", "reduce", "bearish", "underperform",
    "warning", "crisis", "recession", "bankruptcy", "lawsuit", "investigation",
    "scandal", "penalty",
];

/// Checked in order; the first group with a hit decides the category.
const CATEGORY_RULES: &[(NewsCategory, &[&str])] = &[
    (NewsCategory::Earnings, &["earnings", "revenue", "profit"]),
    (NewsCategory::Partnerships, &["partnership", "deal", "agreement"]),
    (NewsCategory::MergersAcquisitions, &["merger", "acquisition", "buyout"]),
    (NewsCategory::Regulatory, &["regulation", "sec", "fda", "government"]),
    (NewsCategory::CorporateActions, &["dividend", "split", "buyback"]),
    (NewsCategory::ProductNews, &["product", "launch", "innovation"]),
];

const BASE_IMPACT: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NewsCategory {
    Earnings,
    Partnerships,
    #[serde(rename = "M&A")]
    MergersAcquisitions,
    Regulatory,
    #[serde(rename = "Corporate Actions")]
    CorporateActions,
    #[serde(rename = "Product News")]
    ProductNews,
    General,
}

impl NewsCategory {
    pub fn label(&self) -> &'static str {
        match self {
            NewsCategory::Earnings => "Earnings",
            NewsCategory::Partnerships => "Partnerships",
            NewsCategory::MergersAcquisitions => "M&A",
            NewsCategory::Regulatory => "Regulatory",
            NewsCategory::CorporateActions => "Corporate Actions",
            NewsCategory::ProductNews => "Product News",
            NewsCategory::General => "General",
        }
    }

    /// Categories that tend to move the price on their own
    fn is_market_moving(&self) -> bool {
        matches!(
            self,
            NewsCategory::Earnings | NewsCategory::MergersAcquisitions | NewsCategory::Regulatory
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_impact(impact: u8) -> Self {
        if impact >= 8 {
            Priority::High
        } else if impact >= 6 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// A provider article with derived sentiment, category and impact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticleAnalysis {
    pub id: i64,
    pub headline: String,
    pub summary: String,
    pub url: String,
    pub image: String,
    pub source: String,
    /// Provider timestamp, epoch seconds
    pub datetime: i64,
    pub published_at: DateTime<Utc>,
    pub sentiment: Sentiment,
    pub category: NewsCategory,
    pub impact_score: u8,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSummary {
    pub symbol: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_articles: usize,
    pub sentiment: SentimentDistribution,
    pub categories: BTreeMap<NewsCategory, usize>,
    pub average_impact_score: f64,
}

pub struct NewsAnalysisEngine {
    positive_words: &'static [&'static str],
    negative_words: &'static [&'static str],
}

impl NewsAnalysisEngine {
    pub fn new() -> Self {
        Self {
            positive_words: POSITIVE_WORDS,
            negative_words: NEGATIVE_WORDS,
        }
    }

    fn article_text(headline: &str, summary: &str) -> String {
        format!("{} {}", headline, summary).to_lowercase()
    }

    /// Keyword vote. Each keyword counts at most once; ties are Neutral.
    pub fn classify_sentiment(&self, headline: &str, summary: &str) -> Sentiment {
        let text = Self::article_text(headline, summary);
        let positive = self.positive_words.iter().filter(|w| text.contains(*w)).count();
        let negative = self.negative_words.iter().filter(|w| text.contains(*w)).count();

        if positive > negative {
            Sentiment::Positive
        } else if negative > positive {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }

    pub fn categorize(&self, headline: &str, summary: &str) -> NewsCategory {
        let text = Self::article_text(headline, summary);
        CATEGORY_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(NewsCategory::General)
    }

    /// Impact in [1, 10]. Negative news weighs more than positive news.
    pub fn impact_score(
        &self,
        sentiment: Sentiment,
        category: NewsCategory,
        published_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> u8 {
        let mut score = BASE_IMPACT;

        score += match sentiment {
            Sentiment::Positive => 3,
            Sentiment::Negative => 4,
            Sentiment::Neutral => 0,
        };

        if category.is_market_moving() {
            score += 3;
        }

        let hours_old = (now - published_at).num_seconds() as f64 / 3600.0;
        if hours_old < 2.0 {
            score += 2;
        } else if hours_old < 24.0 {
            score += 1;
        } else if hours_old > 168.0 {
            score -= 2;
        }

        score.clamp(1, 10) as u8
    }

    pub fn analyze(&self, article: &RawArticle, now: DateTime<Utc>) -> NewsArticleAnalysis {
        let published_at = DateTime::from_timestamp(article.datetime, 0).unwrap_or_default();
        let sentiment = self.classify_sentiment(&article.headline, &article.summary);
        let category = self.categorize(&article.headline, &article.summary);
        let impact_score = self.impact_score(sentiment, category, published_at, now);

        NewsArticleAnalysis {
            id: article.id,
            headline: article.headline.clone(),
            summary: article.summary.clone(),
            url: article.url.clone(),
            image: article.image.clone(),
            source: article.source.clone(),
            datetime: article.datetime,
            published_at,
            sentiment,
            category,
            impact_score,
            priority: Priority::from_impact(impact_score),
        }
    }

    pub fn analyze_all(&self, articles: &[RawArticle], now: DateTime<Utc>) -> Vec<NewsArticleAnalysis> {
        let analyses: Vec<_> = articles.iter().map(|a| self.analyze(a, now)).collect();
        tracing::debug!(
            "Analysed {} articles ({} high priority)",
            analyses.len(),
            analyses.iter().filter(|a| a.priority == Priority::High).count()
        );
        analyses
    }

    pub fn summarize(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        analyses: &[NewsArticleAnalysis],
    ) -> NewsSummary {
        let mut sentiment = SentimentDistribution::default();
        let mut categories = BTreeMap::new();

        for analysis in analyses {
            match analysis.sentiment {
                Sentiment::Positive => sentiment.positive += 1,
                Sentiment::Negative => sentiment.negative += 1,
                Sentiment::Neutral => sentiment.neutral += 1,
            }
            *categories.entry(analysis.category).or_insert(0) += 1;
        }

        let average_impact_score = if analyses.is_empty() {
            0.0
        } else {
            let total: u32 = analyses.iter().map(|a| a.impact_score as u32).sum();
            let mean = total as f64 / analyses.len() as f64;
            (mean * 10.0).round() / 10.0
        };

        NewsSummary {
            symbol: symbol.to_uppercase(),
            from,
            to,
            total_articles: analyses.len(),
            sentiment,
            categories,
            average_impact_score,
        }
    }
}

impl Default for NewsAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn article(id: i64, headline: &str, summary: &str, age: Duration) -> RawArticle {
        RawArticle {
            id,
            headline: headline.to_string(),
            summary: summary.to_string(),
            url: format!("https://example.com/{}", id),
            image: String::new(),
            source: "Reuters".to_string(),
            datetime: (now() - age).timestamp(),
        }
    }

    #[test]
    fn test_earnings_beat_scenario() {
        let engine = NewsAnalysisEngine::new();
        let raw = article(
            1,
            "Company beats earnings expectations with record profit growth",
            "",
            Duration::minutes(30),
        );
        let analysis = engine.analyze(&raw, now());

        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert_eq!(analysis.category, NewsCategory::Earnings);
        // 5 + 3 (positive) + 3 (earnings) + 2 (fresh) = 13, clamped
        assert_eq!(analysis.impact_score, 10);
        assert_eq!(analysis.priority, Priority::High);
        assert_eq!(analysis.published_at, now() - Duration::minutes(30));
    }

    #[test]
    fn test_sentiment_tie_is_neutral() {
        let engine = NewsAnalysisEngine::new();
        assert_eq!(
            engine.classify_sentiment("Shares gain then loss", ""),
            Sentiment::Neutral
        );
        assert_eq!(engine.classify_sentiment("Quiet session", "nothing to see"), Sentiment::Neutral);
        assert_eq!(
            engine.classify_sentiment("Lawsuit filed", "investigation follows weak quarter"),
            Sentiment::Negative
        );
    }

    #[test]
    fn test_keyword_counted_once() {
        let engine = NewsAnalysisEngine::new();
        // "gain" three times still only one positive hit against two negatives
        assert_eq!(
            engine.classify_sentiment("gain gain gain", "crisis and penalty"),
            Sentiment::Negative
        );
    }

    #[test]
    fn test_category_rule_order() {
        let engine = NewsAnalysisEngine::new();
        // Earnings is checked before M&A
        assert_eq!(
            engine.categorize("Merger lifts revenue outlook", ""),
            NewsCategory::Earnings
        );
        assert_eq!(engine.categorize("Buyout talks", ""), NewsCategory::MergersAcquisitions);
        assert_eq!(engine.categorize("FDA approval", ""), NewsCategory::Regulatory);
        assert_eq!(engine.categorize("Board declares dividend", ""), NewsCategory::CorporateActions);
        assert_eq!(engine.categorize("New product launch", ""), NewsCategory::ProductNews);
        assert_eq!(engine.categorize("Weather update", ""), NewsCategory::General);
        assert_eq!(NewsCategory::MergersAcquisitions.label(), "M&A");
    }

    #[test]
    fn test_impact_recency_and_bounds() {
        let engine = NewsAnalysisEngine::new();
        let at = |hours: i64| now() - Duration::hours(hours);

        assert_eq!(engine.impact_score(Sentiment::Neutral, NewsCategory::General, at(1), now()), 7);
        assert_eq!(engine.impact_score(Sentiment::Neutral, NewsCategory::General, at(5), now()), 6);
        assert_eq!(engine.impact_score(Sentiment::Neutral, NewsCategory::General, at(48), now()), 5);
        assert_eq!(engine.impact_score(Sentiment::Neutral, NewsCategory::General, at(200), now()), 3);
        assert_eq!(engine.impact_score(Sentiment::Negative, NewsCategory::Regulatory, at(1), now()), 10);
        assert_eq!(engine.impact_score(Sentiment::Negative, NewsCategory::General, at(200), now()), 7);

        for sentiment in [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral] {
            for category in [NewsCategory::Earnings, NewsCategory::General, NewsCategory::ProductNews] {
                for hours in [0, 1, 3, 30, 169, 10_000] {
                    let score = engine.impact_score(sentiment, category, at(hours), now());
                    assert!((1..=10).contains(&score));
                }
            }
        }
    }

    #[test]
    fn test_priority_buckets() {
        assert_eq!(Priority::from_impact(8), Priority::High);
        assert_eq!(Priority::from_impact(7), Priority::Medium);
        assert_eq!(Priority::from_impact(6), Priority::Medium);
        assert_eq!(Priority::from_impact(5), Priority::Low);
        assert_eq!(Priority::from_impact(1), Priority::Low);
    }

    #[test]
    fn test_summarize() {
        let engine = NewsAnalysisEngine::new();
        let raws = vec![
            article(1, "Strong earnings beat", "", Duration::hours(1)),
            article(2, "Regulator opens investigation", "government scrutiny", Duration::hours(30)),
            article(3, "Weather report", "", Duration::hours(300)),
        ];
        let analyses = engine.analyze_all(&raws, now());
        let from = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let summary = engine.summarize("msft", from, to, &analyses);

        assert_eq!(summary.symbol, "MSFT");
        assert_eq!(summary.total_articles, 3);
        assert_eq!(summary.sentiment, SentimentDistribution { positive: 1, negative: 1, neutral: 1 });
        assert_eq!(summary.categories.get(&NewsCategory::Earnings), Some(&1));
        assert_eq!(summary.categories.get(&NewsCategory::Regulatory), Some(&1));
        assert_eq!(summary.categories.get(&NewsCategory::General), Some(&1));
        // (10 + 10 + 3) / 3 = 7.67
        assert_eq!(summary.average_impact_score, 7.7);
    }

    #[test]
    fn test_summarize_empty() {
        let engine = NewsAnalysisEngine::new();
        let day = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let summary = engine.summarize("AAPL", day, day, &[]);
        assert_eq!(summary.total_articles, 0);
        assert_eq!(summary.average_impact_score, 0.0);
        assert!(summary.categories.is_empty());
    }
}
