use serde::{Deserialize, Serialize};
use std::fmt;

/// Letter grades from best to worst. Declaration order is the scale order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeLetter {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "F")]
    F,
}

/// Inclusive lower bounds, highest first. Anything below the last bound is an F.
const SCALE: [(f64, GradeLetter); 12] = [
    (97.0, GradeLetter::APlus),
    (93.0, GradeLetter::A),
    (90.0, GradeLetter::AMinus),
    (87.0, GradeLetter::BPlus),
    (83.0, GradeLetter::B),
    (80.0, GradeLetter::BMinus),
    (77.0, GradeLetter::CPlus),
    (73.0, GradeLetter::C),
    (70.0, GradeLetter::CMinus),
    (67.0, GradeLetter::DPlus),
    (63.0, GradeLetter::D),
    (60.0, GradeLetter::DMinus),
];

impl GradeLetter {
    pub const ALL: [GradeLetter; 13] = [
        GradeLetter::APlus,
        GradeLetter::A,
        GradeLetter::AMinus,
        GradeLetter::BPlus,
        GradeLetter::B,
        GradeLetter::BMinus,
        GradeLetter::CPlus,
        GradeLetter::C,
        GradeLetter::CMinus,
        GradeLetter::DPlus,
        GradeLetter::D,
        GradeLetter::DMinus,
        GradeLetter::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GradeLetter::APlus => "A+",
            GradeLetter::A => "A",
            GradeLetter::AMinus => "A-",
            GradeLetter::BPlus => "B+",
            GradeLetter::B => "B",
            GradeLetter::BMinus => "B-",
            GradeLetter::CPlus => "C+",
            GradeLetter::C => "C",
            GradeLetter::CMinus => "C-",
            GradeLetter::DPlus => "D+",
            GradeLetter::D => "D",
            GradeLetter::DMinus => "D-",
            GradeLetter::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        GradeLetter::ALL.into_iter().find(|g| g.as_str() == t)
    }

    pub fn grade_points(self) -> f64 {
        match self {
            GradeLetter::APlus | GradeLetter::A => 4.0,
            GradeLetter::AMinus => 3.7,
            GradeLetter::BPlus => 3.3,
            GradeLetter::B => 3.0,
            GradeLetter::BMinus => 2.7,
            GradeLetter::CPlus => 2.3,
            GradeLetter::C => 2.0,
            GradeLetter::CMinus => 1.7,
            GradeLetter::DPlus => 1.3,
            GradeLetter::D => 1.0,
            GradeLetter::DMinus => 0.7,
            GradeLetter::F => 0.0,
        }
    }
}

impl fmt::Display for GradeLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a score to its letter. Scores are not range checked: anything at or
/// above 97 is an A+, anything below 60 (or NaN) is an F.
pub fn classify(score: f64) -> GradeLetter {
    SCALE
        .iter()
        .find(|(lower, _)| score >= *lower)
        .map(|(_, letter)| *letter)
        .unwrap_or(GradeLetter::F)
}

/// Grade points for a stored letter symbol. Unrecognized symbols count as 0.0
/// so partially entered data still produces a GPA.
pub fn grade_points_for(symbol: &str) -> f64 {
    GradeLetter::parse(symbol)
        .map(GradeLetter::grade_points)
        .unwrap_or(0.0)
}

/// Round half up at the second decimal.
pub fn round_2_decimal(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Upper bound on the credit weight of a single course.
pub const MAX_CREDITS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaEntry {
    #[serde(rename = "grade")]
    pub letter: String,
    pub credits: i64,
}

#[cfg(test)]
impl GpaEntry {
    pub fn new(letter: impl Into<String>, credits: i64) -> Self {
        Self {
            letter: letter.into(),
            credits,
        }
    }
}

/// Credit-weighted GPA over `entries`, rounded to 2 decimals.
/// No entries (or no credits) yields 0. Entries without positive credits
/// carry no weight, so the result stays within the grade-point range.
pub fn compute_gpa<'a, I>(entries: I) -> f64
where
    I: IntoIterator<Item = &'a GpaEntry>,
{
    let mut total_points = 0.0;
    let mut total_credits = 0.0;
    for e in entries.into_iter().filter(|e| e.credits > 0) {
        let credits = e.credits as f64;
        total_points += grade_points_for(&e.letter) * credits;
        total_credits += credits;
    }
    if total_credits <= 0.0 {
        return 0.0;
    }
    round_2_decimal(total_points / total_credits)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcademicStanding {
    #[serde(rename = "Summa Cum Laude")]
    SummaCumLaude,
    #[serde(rename = "Magna Cum Laude")]
    MagnaCumLaude,
    #[serde(rename = "Cum Laude")]
    CumLaude,
    #[serde(rename = "Dean's List")]
    DeansList,
    #[serde(rename = "Good Standing")]
    GoodStanding,
    #[serde(rename = "Academic Probation")]
    AcademicProbation,
}

pub fn gpa_standing(gpa: f64) -> AcademicStanding {
    if gpa >= 3.9 {
        AcademicStanding::SummaCumLaude
    } else if gpa >= 3.7 {
        AcademicStanding::MagnaCumLaude
    } else if gpa >= 3.5 {
        AcademicStanding::CumLaude
    } else if gpa >= 3.0 {
        AcademicStanding::DeansList
    } else if gpa >= 2.0 {
        AcademicStanding::GoodStanding
    } else {
        AcademicStanding::AcademicProbation
    }
}

/// Unweighted mean of per-student GPAs, as shown on the dashboard.
pub fn average_gpa<I>(gpas: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut n: usize = 0;
    let mut sum = 0.0;
    for g in gpas {
        n += 1;
        sum += g;
    }
    if n == 0 {
        return 0.0;
    }
    round_2_decimal(sum / (n as f64))
}
