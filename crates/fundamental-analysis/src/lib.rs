use chrono::{DateTime, Utc};
use market_core::RawMetrics;
use serde::{Deserialize, Serialize};

const BASE_SCORE: f64 = 50.0;

// Finnhub reports the same ratio under different names depending on the
// response shape. The first name of each list is the canonical one.
const PE_KEYS: &[&str] = &["peTTM", "peNormalizedAnnual", "peNormalRatio"];
const PB_KEYS: &[&str] = &["pb", "pbAnnual", "pbQuarterly"];
const ROE_KEYS: &[&str] = &["roeTTM", "roe"];
const ROA_KEYS: &[&str] = &["roaTTM", "roa"];
const CURRENT_RATIO_KEYS: &[&str] = &["currentRatioAnnual", "currentRatio"];
const DEBT_TO_EQUITY_KEYS: &[&str] = &[
    "totalDebt/totalEquityAnnual",
    "totalDebt2EquityRatio",
    "debtToEquity",
];

const GROSS_MARGIN_KEYS: &[&str] = &["grossMarginTTM", "grossMarginAnnual"];
const OPERATING_MARGIN_KEYS: &[&str] = &["operatingMarginTTM", "operatingMarginAnnual"];
const NET_MARGIN_KEYS: &[&str] = &["netProfitMarginTTM", "netProfitMarginAnnual"];
const REVENUE_GROWTH_KEYS: &[&str] = &["revenueGrowthTTMYoy", "revenueGrowthQuarterlyYoy"];
const EARNINGS_GROWTH_KEYS: &[&str] = &["epsGrowthTTMYoy", "epsGrowthQuarterlyYoy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthRating {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => HealthRating::Excellent,
            65..=79 => HealthRating::Good,
            50..=64 => HealthRating::Fair,
            _ => HealthRating::Poor,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthRating::Excellent => "Excellent",
            HealthRating::Good => "Good",
            HealthRating::Fair => "Fair",
            HealthRating::Poor => "Poor",
        }
    }

    /// Display color token
    pub fn color(&self) -> &'static str {
        match self {
            HealthRating::Excellent => "green",
            HealthRating::Good => "blue",
            HealthRating::Fair => "yellow",
            HealthRating::Poor => "red",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HealthRating::Excellent => "Strong financial position",
            HealthRating::Good => "Solid fundamentals",
            HealthRating::Fair => "Average performance",
            HealthRating::Poor => "Concerning metrics",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRatios {
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
}

impl KeyRatios {
    pub fn from_metrics(metrics: &RawMetrics) -> Self {
        Self {
            pe: metrics.value(PE_KEYS),
            pb: metrics.value(PB_KEYS),
            roe: metrics.value(ROE_KEYS),
            roa: metrics.value(ROA_KEYS),
            debt_to_equity: metrics.value(DEBT_TO_EQUITY_KEYS),
            current_ratio: metrics.value(CURRENT_RATIO_KEYS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub gross: Option<f64>,
    pub operating: Option<f64>,
    pub net: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Growth {
    pub revenue: Option<f64>,
    pub earnings: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialHealthScore {
    pub symbol: String,
    pub score: u8,
    pub rating: HealthRating,
    pub color: String,
    pub description: String,
    pub key_ratios: KeyRatios,
    pub margins: Margins,
    pub growth: Growth,
    pub computed_at: DateTime<Utc>,
}

/// Banded adjustments per ratio. A missing ratio contributes nothing.
fn pe_adjustment(pe: f64) -> f64 {
    if pe <= 0.0 {
        // Negative or zero earnings: P/E is meaningless
        0.0
    } else if pe < 15.0 {
        15.0
    } else if pe < 25.0 {
        10.0
    } else if pe < 35.0 {
        5.0
    } else {
        -10.0
    }
}

fn roe_adjustment(roe: f64) -> f64 {
    if roe > 20.0 {
        15.0
    } else if roe > 15.0 {
        10.0
    } else if roe > 10.0 {
        5.0
    } else if roe < 5.0 {
        -10.0
    } else {
        0.0
    }
}

fn roa_adjustment(roa: f64) -> f64 {
    if roa > 10.0 {
        10.0
    } else if roa > 5.0 {
        5.0
    } else if roa < 2.0 {
        -5.0
    } else {
        0.0
    }
}

fn current_ratio_adjustment(ratio: f64) -> f64 {
    if (1.5..=3.0).contains(&ratio) {
        10.0
    } else if (1.0..1.5).contains(&ratio) {
        5.0
    } else if ratio < 1.0 {
        -15.0
    } else if ratio > 5.0 {
        -5.0
    } else {
        0.0
    }
}

fn debt_to_equity_adjustment(de: f64) -> f64 {
    if de < 0.3 {
        10.0
    } else if de < 0.6 {
        5.0
    } else if de > 1.5 {
        -15.0
    } else if de > 1.0 {
        -10.0
    } else {
        0.0
    }
}

pub struct FinancialHealthEngine;

impl FinancialHealthEngine {
    pub fn new() -> Self {
        Self
    }

    /// Raw score before clamping. P/B is reported but not scored.
    pub fn raw_score(&self, ratios: &KeyRatios) -> f64 {
        let adjustments = [
            ratios.pe.map(pe_adjustment),
            ratios.roe.map(roe_adjustment),
            ratios.roa.map(roa_adjustment),
            ratios.current_ratio.map(current_ratio_adjustment),
            ratios.debt_to_equity.map(debt_to_equity_adjustment),
        ];
        BASE_SCORE + adjustments.iter().flatten().sum::<f64>()
    }

    pub fn score_ratios(&self, ratios: &KeyRatios) -> u8 {
        self.raw_score(ratios).clamp(0.0, 100.0).round() as u8
    }

    pub fn analyze(&self, metrics: &RawMetrics, now: DateTime<Utc>) -> FinancialHealthScore {
        let key_ratios = KeyRatios::from_metrics(metrics);
        let score = self.score_ratios(&key_ratios);
        let rating = HealthRating::from_score(score);

        tracing::debug!(
            "Health score for {}: {} ({})",
            metrics.symbol,
            score,
            rating.label()
        );

        FinancialHealthScore {
            symbol: metrics.symbol.to_uppercase(),
            score,
            rating,
            color: rating.color().to_string(),
            description: rating.description().to_string(),
            key_ratios,
            margins: Margins {
                gross: metrics.value(GROSS_MARGIN_KEYS),
                operating: metrics.value(OPERATING_MARGIN_KEYS),
                net: metrics.value(NET_MARGIN_KEYS),
            },
            growth: Growth {
                revenue: metrics.value(REVENUE_GROWTH_KEYS),
                earnings: metrics.value(EARNINGS_GROWTH_KEYS),
            },
            computed_at: now,
        }
    }
}

impl Default for FinancialHealthEngine {
    fn default() -> Self {
        Self::new()
    }
}
