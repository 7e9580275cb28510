//! CVSS v3 metric vector and a simplified, deterministic base-score.
//!
//! The score is not the CVSS v3.1 formula. It sums two capped subtotals:
//! impact (3.6 per High C/I/A) and exploitability (AV:N 0.85, AC:L 0.77,
//! PR:N 0.85, UI:N 0.85), caps at 10.0 and rounds to one decimal.
//! Arithmetic runs in integer hundredths so the result is identical on every
//! platform; rounding is half away from zero.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metric values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackVector {
    #[serde(rename = "N")]
    Network,
    #[serde(rename = "A")]
    Adjacent,
    #[serde(rename = "L")]
    Local,
    #[serde(rename = "P")]
    Physical,
}

impl AttackVector {
    pub fn abbrev(self) -> &'static str {
        match self {
            AttackVector::Network => "N",
            AttackVector::Adjacent => "A",
            AttackVector::Local => "L",
            AttackVector::Physical => "P",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackComplexity {
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "H")]
    High,
}

impl AttackComplexity {
    pub fn abbrev(self) -> &'static str {
        match self {
            AttackComplexity::Low => "L",
            AttackComplexity::High => "H",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegesRequired {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "H")]
    High,
}

impl PrivilegesRequired {
    pub fn abbrev(self) -> &'static str {
        match self {
            PrivilegesRequired::None => "N",
            PrivilegesRequired::Low => "L",
            PrivilegesRequired::High => "H",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserInteraction {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "R")]
    Required,
}

impl UserInteraction {
    pub fn abbrev(self) -> &'static str {
        match self {
            UserInteraction::None => "N",
            UserInteraction::Required => "R",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "U")]
    Unchanged,
    #[serde(rename = "C")]
    Changed,
}

impl Scope {
    pub fn abbrev(self) -> &'static str {
        match self {
            Scope::Unchanged => "U",
            Scope::Changed => "C",
        }
    }
}

/// Impact on one of confidentiality, integrity or availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Impact {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "H")]
    High,
}

impl Impact {
    pub fn abbrev(self) -> &'static str {
        match self {
            Impact::None => "N",
            Impact::Low => "L",
            Impact::High => "H",
        }
    }
}

// ---------------------------------------------------------------------------
// CvssMetrics
// ---------------------------------------------------------------------------

/// The eight categorical base metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CvssMetrics {
    pub attack_vector: AttackVector,
    pub attack_complexity: AttackComplexity,
    pub privileges_required: PrivilegesRequired,
    pub user_interaction: UserInteraction,
    pub scope: Scope,
    pub confidentiality: Impact,
    pub integrity: Impact,
    pub availability: Impact,
}

impl CvssMetrics {
    /// Network-reachable, low complexity, no privileges, no user
    /// interaction, high impact on C, I and A. Assigned to every atomic node.
    pub fn worst_case() -> Self {
        Self {
            attack_vector: AttackVector::Network,
            attack_complexity: AttackComplexity::Low,
            privileges_required: PrivilegesRequired::None,
            user_interaction: UserInteraction::None,
            scope: Scope::Unchanged,
            confidentiality: Impact::High,
            integrity: Impact::High,
            availability: Impact::High,
        }
    }

    /// Render as a `CVSS:3.1/AV:N/AC:L/...` vector string.
    pub fn vector_string(&self) -> String {
        format!(
            "CVSS:3.1/AV:{}/AC:{}/PR:{}/UI:{}/S:{}/C:{}/I:{}/A:{}",
            self.attack_vector.abbrev(),
            self.attack_complexity.abbrev(),
            self.privileges_required.abbrev(),
            self.user_interaction.abbrev(),
            self.scope.abbrev(),
            self.confidentiality.abbrev(),
            self.integrity.abbrev(),
            self.availability.abbrev(),
        )
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

const IMPACT_HIGH: u32 = 360;
const AV_NETWORK: u32 = 85;
const AC_LOW: u32 = 77;
const PR_NONE: u32 = 85;
const UI_NONE: u32 = 85;
const MAX_SCORE: u32 = 1000;

fn impact_subtotal(m: &CvssMetrics) -> u32 {
    [m.confidentiality, m.integrity, m.availability]
        .into_iter()
        .filter(|i| *i == Impact::High)
        .count() as u32
        * IMPACT_HIGH
}

fn exploitability_subtotal(m: &CvssMetrics) -> u32 {
    let mut total = 0;
    if m.attack_vector == AttackVector::Network {
        total += AV_NETWORK;
    }
    if m.attack_complexity == AttackComplexity::Low {
        total += AC_LOW;
    }
    if m.privileges_required == PrivilegesRequired::None {
        total += PR_NONE;
    }
    if m.user_interaction == UserInteraction::None {
        total += UI_NONE;
    }
    total
}

/// Compute the simplified base score in `[0.0, 10.0]`, one decimal place.
pub fn calculate_base_score(metrics: &CvssMetrics) -> f64 {
    let hundredths = (impact_subtotal(metrics) + exploitability_subtotal(metrics)).min(MAX_SCORE);
    let tenths = (hundredths + 5) / 10;
    f64::from(tenths) / 10.0
}

// ---------------------------------------------------------------------------
// CvssV3 record
// ---------------------------------------------------------------------------

/// Metrics together with the score derived from them. The two are only ever
/// produced together by [`CvssV3::assess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssV3 {
    #[serde(flatten)]
    metrics: CvssMetrics,
    base_score: f64,
}

impl CvssV3 {
    pub fn assess(metrics: CvssMetrics) -> Self {
        Self {
            base_score: calculate_base_score(&metrics),
            metrics,
        }
    }

    pub fn metrics(&self) -> &CvssMetrics {
        &self.metrics
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn vector_string(&self) -> String {
        self.metrics.vector_string()
    }
}
