//! Mode-specific result summaries and their display text.
//!
//! Fields the server leaves out read as `false` / `0.0`.

use serde::Deserialize;
use serde_json::Value;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Summary of a trajectory or Z-shape analysis.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrajectorySummary {
    /// Kept at least 1 cm away from the injury site.
    #[serde(rename = "is1cmFromInjurySite")]
    pub clear_of_injury_site: bool,
    /// Disinfection followed a spiral.
    #[serde(rename = "isSpiral")]
    pub spiral: bool,
    /// Direction and order were correct.
    #[serde(rename = "isInOrder")]
    pub in_order: bool,
    /// Diameter of the disinfected area, in metres.
    #[serde(rename = "sphereDiameter")]
    pub sphere_diameter: f64,
    /// Overall score.
    pub score: f64,
}

impl TrajectorySummary {
    /// Read a summary object; `None` if `value` is not a well-typed object.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_object() {
            Self::deserialize(value).ok()
        } else {
            None
        }
    }

    /// Multi-line result text headed by `title`.
    pub fn render(&self, title: &str) -> String {
        format!(
            "{title} analysis result\n\
             Avoided injury site (1cm): {}\n\
             Spiral disinfection: {}\n\
             Direction and order: {}\n\
             Disinfection diameter: {:.2} m\n\
             Score: {:.2}",
            yes_no(self.clear_of_injury_site),
            yes_no(self.spiral),
            yes_no(self.in_order),
            self.sphere_diameter,
            self.score,
        )
    }
}

/// Summary of a CPR analysis.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CprSummary {
    /// Arms were kept straight.
    #[serde(rename = "isArmsStraight")]
    pub arms_straight: bool,
    /// Compressions were perpendicular to the chest.
    #[serde(rename = "isPerpendicular")]
    pub perpendicular: bool,
    /// Overall score.
    pub score: f64,
}

impl CprSummary {
    /// Read a summary object; `None` if `value` is not a well-typed object.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_object() {
            Self::deserialize(value).ok()
        } else {
            None
        }
    }

    /// Multi-line result text.
    pub fn render(&self) -> String {
        format!(
            "CPR analysis result\n\
             Arms straight: {}\n\
             Compression perpendicular: {}\n\
             Score: {:.2}",
            yes_no(self.arms_straight),
            yes_no(self.perpendicular),
            self.score,
        )
    }
}
